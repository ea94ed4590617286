//! 핸드쉐이크 (HELLO / HELLO-OK / ERR)
//!
//! 송신측이 세션 파라미터를 제안하고 수신측이 검증한다. 요청/응답 한 번으로
//! 끝나며 이 계층에서는 재시도하지 않는다.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::checksum::ChecksumAlgorithm;
use crate::config::{AckMode, Mode, WindowBounds};
use crate::message::{parse_err, parse_hello_ok, Fields, Frame, HELLO_PREFIX};
use crate::transport::LineStream;
use crate::{Config, Error, Result};

/// 세션 파라미터 (핸드쉐이크 이후 불변)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub mode: Mode,
    pub max_msg_len: u32,
    pub checksum: ChecksumAlgorithm,
    pub timeout_ms: u64,
    pub ack_mode: AckMode,
    /// `crypto=ON|OFF` (생략 가능)
    pub crypto: Option<bool>,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            mode: Mode::Gbn,
            max_msg_len: 64,
            checksum: ChecksumAlgorithm::Crc16,
            timeout_ms: 300,
            ack_mode: AckMode::Individual,
            crypto: None,
        }
    }
}

impl SessionParams {
    pub fn crypto_enabled(&self) -> bool {
        self.crypto == Some(true)
    }

    /// 재전송 타임아웃
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// HELLO 직렬화 (개행 제외)
    pub fn to_hello_line(&self) -> String {
        let mut line = format!(
            "{}modo={} max_msg_len={} checksum={} timeout_ms={} ack_mode={}",
            HELLO_PREFIX, self.mode, self.max_msg_len, self.checksum, self.timeout_ms, self.ack_mode
        );
        if let Some(crypto) = self.crypto {
            line.push_str(if crypto { " crypto=ON" } else { " crypto=OFF" });
        }
        line
    }

    /// HELLO 파싱
    ///
    /// 누락된 필드나 알 수 없는 열거값은 [`Error::Format`].
    pub fn from_hello_line(line: &[u8]) -> Result<Self> {
        let fields = Fields::parse(line, HELLO_PREFIX)?;
        Ok(Self {
            mode: fields.require_parsed("modo")?,
            max_msg_len: fields.require_parsed("max_msg_len")?,
            checksum: fields.require_parsed("checksum")?,
            timeout_ms: fields.require_parsed("timeout_ms")?,
            ack_mode: fields.require_parsed("ack_mode")?,
            crypto: fields.get("crypto").map(parse_crypto).transpose()?,
        })
    }
}

fn parse_crypto(value: &str) -> Result<bool> {
    match value {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        other => Err(Error::format(format!("알 수 없는 crypto: {}", other))),
    }
}

/// 핸드쉐이크 거부 사유 (ERR 줄에 그대로 실림)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Malformed(String),
    InvalidMode,
    MaxMsgLenTooSmall { got: u32, min: u32 },
    InvalidChecksum,
    TimeoutNotPositive,
    InvalidAckMode,
    InvalidCrypto,
    CryptoWithoutKey,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Malformed(detail) => write!(f, "parse HELLO: {}", detail),
            Rejection::InvalidMode => f.write_str("invalid modo"),
            Rejection::MaxMsgLenTooSmall { min, .. } => write!(f, "max_msg_len must be >= {}", min),
            Rejection::InvalidChecksum => f.write_str("invalid checksum"),
            Rejection::TimeoutNotPositive => f.write_str("timeout_ms must be > 0"),
            Rejection::InvalidAckMode => f.write_str("invalid ack_mode"),
            Rejection::InvalidCrypto => f.write_str("invalid crypto"),
            Rejection::CryptoWithoutKey => f.write_str("crypto on but no key"),
        }
    }
}

/// 필수 필드를 읽는다. 누락은 Malformed, 값 오류는 `invalid`.
fn field<T: FromStr>(fields: &Fields<'_>, key: &str, invalid: Rejection) -> std::result::Result<T, Rejection> {
    let raw = fields
        .require(key)
        .map_err(|e| Rejection::Malformed(e.to_string()))?;
    raw.parse().map_err(|_| invalid)
}

fn number<T: FromStr>(fields: &Fields<'_>, key: &str) -> std::result::Result<T, Rejection> {
    fields
        .require_parsed(key)
        .map_err(|e| Rejection::Malformed(e.to_string()))
}

/// 수신측 협상기
#[derive(Debug, Clone)]
pub struct Negotiator {
    config: Config,
    key_configured: bool,
}

impl Negotiator {
    pub fn new(config: Config, key_configured: bool) -> Self {
        Self {
            config,
            key_configured,
        }
    }

    pub fn window(&self) -> WindowBounds {
        self.config.window
    }

    /// HELLO 검증
    ///
    /// 순서: modo, max_msg_len, checksum, timeout_ms, ack_mode, crypto.
    /// 처음 실패한 항목이 거부 사유가 된다.
    pub fn evaluate(&self, line: &[u8]) -> std::result::Result<SessionParams, Rejection> {
        let fields =
            Fields::parse(line, HELLO_PREFIX).map_err(|e| Rejection::Malformed(e.to_string()))?;

        let mode: Mode = field(&fields, "modo", Rejection::InvalidMode)?;

        let max_msg_len: u32 = number(&fields, "max_msg_len")?;
        if max_msg_len < self.config.min_max_msg_len {
            return Err(Rejection::MaxMsgLenTooSmall {
                got: max_msg_len,
                min: self.config.min_max_msg_len,
            });
        }

        let checksum: ChecksumAlgorithm = field(&fields, "checksum", Rejection::InvalidChecksum)?;

        // 음수도 파싱해서 사유를 구분한다
        let timeout_ms: i64 = number(&fields, "timeout_ms")?;
        if timeout_ms <= 0 {
            return Err(Rejection::TimeoutNotPositive);
        }

        let ack_mode: AckMode = field(&fields, "ack_mode", Rejection::InvalidAckMode)?;

        let crypto = match fields.get("crypto") {
            Some(value) => Some(parse_crypto(value).map_err(|_| Rejection::InvalidCrypto)?),
            None => None,
        };
        if crypto == Some(true) && !self.key_configured {
            return Err(Rejection::CryptoWithoutKey);
        }

        Ok(SessionParams {
            mode,
            max_msg_len,
            checksum,
            timeout_ms: timeout_ms as u64,
            ack_mode,
            crypto,
        })
    }

    /// HELLO를 받아 검증하고 HELLO-OK 또는 ERR로 응답
    pub async fn accept<S>(&self, stream: &mut LineStream<S>) -> Result<SessionParams>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let line = stream.recv_line().await?.ok_or(Error::ConnectionClosed)?;
        debug!("HELLO <- {}", String::from_utf8_lossy(&line));

        match self.evaluate(&line) {
            Ok(params) => {
                let window = self.window();
                stream.send(&Frame::HelloOk(window)).await?;
                info!(
                    mode = %params.mode,
                    checksum = %params.checksum,
                    timeout_ms = params.timeout_ms,
                    ack_mode = %params.ack_mode,
                    crypto = params.crypto_enabled(),
                    "핸드쉐이크 완료: win_init={}",
                    window.init
                );
                Ok(params)
            }
            Err(rejection) => {
                warn!("HELLO 거부: {}", rejection);
                stream.send(&Frame::Err(rejection.to_string())).await?;
                Err(Error::HandshakeRejected(rejection.to_string()))
            }
        }
    }
}

/// 송신측: HELLO를 보내고 HELLO-OK의 윈도우 범위를 받는다
pub async fn propose<S>(stream: &mut LineStream<S>, params: &SessionParams) -> Result<WindowBounds>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.send(&Frame::Hello(*params)).await?;
    debug!("HELLO -> {}", params.to_hello_line());

    let line = stream.recv_line().await?.ok_or(Error::ConnectionClosed)?;
    if let Some(reason) = parse_err(&line) {
        warn!("핸드쉐이크 거부됨: {}", reason);
        return Err(Error::HandshakeRejected(reason));
    }

    let window = parse_hello_ok(&line)?;
    window
        .validate()
        .map_err(|e| Error::HandshakeRejected(e.to_string()))?;

    info!(
        "HELLO-OK 수신: win_init={} win_min={} win_max={}",
        window.init, window.min, window.max
    );
    Ok(window)
}
