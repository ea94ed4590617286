//! # SWTP (Sliding Window Text Protocol)
//!
//! 신뢰성 있는 바이트 스트림 위에서 동작하는 줄 단위 슬라이딩 윈도우 전송 프로토콜
//!
//! ## 핵심 특징
//! - **핸드쉐이크**: HELLO / HELLO-OK / ERR로 세션 파라미터 협상
//! - **4바이트 프래그먼트**: 메시지를 고정 크기 DATA 프레임으로 분할
//! - **누적 ACK**: `ACK|next`, INDIVIDUAL 또는 GROUP 방출
//! - **타임아웃 재전송**: 만료 시 [base, next) 전체를 다시 보냄 (Go-Back-N)
//! - **장애 주입**: 결정적 손실/변조로 복구 과정을 재현
//! - **체크섬**: CRC-16/MODBUS, Adler-32 하위 16비트
//! - **선택적 암호화**: 사전 공유 키 + ChaCha20-Poly1305
//!
//! ```no_run
//! use swtp::{LineStream, MessageSender, SessionParams};
//!
//! # async fn run() -> swtp::Result<()> {
//! let socket = tokio::net::TcpStream::connect(("127.0.0.1", swtp::DEFAULT_PORT)).await?;
//! let mut stream = LineStream::new(socket);
//! let stats = MessageSender::new(SessionParams::default())
//!     .send(&mut stream, b"HelloWorldFromRTPy!")
//!     .await?;
//! println!("{}", stats.summary());
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod chunk;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod transport;

pub use checksum::ChecksumAlgorithm;
pub use chunk::{Fragment, Fragmenter, ReassemblyBuffer, SeqNum};
pub use config::{AckMode, Config, FaultConfig, Mode, WindowBounds};
pub use crypto::{CryptoError, MessageCipher};
pub use error::{Error, Result};
pub use handshake::{Negotiator, Rejection, SessionParams};
pub use message::{DataFrame, Frame};
pub use receiver::{Delivery, MessageReceiver, ReceiverEngine};
pub use sender::{MessageSender, SenderEngine};
pub use stats::{ReceiverStats, SenderStats};
pub use transport::LineStream;

/// 프래그먼트 페이로드 크기 (바이트)
pub const DEFAULT_FRAGMENT_SIZE: usize = 4;

/// 수신측이 허용하는 최소 max_msg_len
pub const MIN_MAX_MSG_LEN: u32 = 30;

/// 소켓 읽기 버퍼 크기 (바이트)
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// 개행 없이 쌓을 수 있는 한 줄의 최대 길이 (바이트)
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// 기본 포트
pub const DEFAULT_PORT: u16 = 5001;
