//! 에러 타입 정의

use thiserror::Error;

use crate::crypto::CryptoError;

/// SWTP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 프레임 형식 오류 (폐기 대상, ACK 없음)
    #[error("프레임 형식 오류: {0}")]
    Format(String),

    /// 체크섬 불일치 (손실과 동일하게 취급)
    #[error("체크섬 불일치: expected {expected}, got {got}")]
    Integrity { expected: String, got: String },

    #[error("핸드쉐이크 거부: {0}")]
    HandshakeRejected(String),

    #[error("연결 종료")]
    ConnectionClosed,

    /// 개행 없이 한 줄이 너무 길어짐
    #[error("버퍼 오버플로우: 최대 크기 {max_size} 초과")]
    BufferOverflow { max_size: usize },

    #[error("암호화 에러: {0}")]
    Crypto(#[from] CryptoError),

    /// 전송 중 상대방이 보낸 ERR
    #[error("상대방 에러: {0}")]
    Peer(String),

    #[error("전송할 수 없는 메시지: {0}")]
    InvalidMessage(String),

    #[error("설정 에러: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    /// 프레임 단위로 폐기하고 계속 진행할 수 있는 에러인지 여부
    ///
    /// 형식 오류와 체크섬 오류는 송신측 타임아웃 재전송으로만 복구된다.
    pub fn is_frame_error(&self) -> bool {
        matches!(self, Error::Format(_) | Error::Integrity { .. })
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
