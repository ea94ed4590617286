//! 프로토콜 설정

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result, DEFAULT_READ_BUFFER_SIZE, MIN_MAX_MSG_LEN};

/// 전송 모드
///
/// SR은 협상만 되는 라벨이다. ACK는 항상 누적형이고 복구는 Go-Back-N으로 동작한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Gbn,
    Sr,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Gbn => "GBN",
            Mode::Sr => "SR",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GBN" => Ok(Mode::Gbn),
            "SR" => Ok(Mode::Sr),
            other => Err(Error::format(format!("알 수 없는 modo: {}", other))),
        }
    }
}

/// ACK 방출 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// 수락한 프래그먼트마다 ACK
    Individual,
    /// 한 번의 읽기에서 수락한 프래그먼트들을 하나의 ACK로 묶음
    Group,
}

impl AckMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Individual => "INDIVIDUAL",
            AckMode::Group => "GROUP",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INDIVIDUAL" => Ok(AckMode::Individual),
            "GROUP" => Ok(AckMode::Group),
            other => Err(Error::format(format!("알 수 없는 ack_mode: {}", other))),
        }
    }
}

/// 수신측이 HELLO-OK로 알리는 윈도우 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub init: u32,
    pub min: u32,
    pub max: u32,
}

impl WindowBounds {
    pub fn new(init: u32, min: u32, max: u32) -> Self {
        Self { init, min, max }
    }

    /// `1 <= min <= init <= max` 검사
    pub fn validate(&self) -> Result<()> {
        if self.min == 0 || self.min > self.init || self.init > self.max {
            return Err(Error::Config(format!(
                "윈도우 범위가 올바르지 않음: init={} min={} max={}",
                self.init, self.min, self.max
            )));
        }
        Ok(())
    }
}

impl Default for WindowBounds {
    fn default() -> Self {
        Self {
            init: 5,
            min: 1,
            max: 5,
        }
    }
}

/// 결정적 장애 주입 설정 (송신측, 첫 전송에만 적용)
///
/// `every`가 0이면 해당 장애는 비활성화된다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultConfig {
    /// `seq % loss_every == loss_offset`이면 와이어에 올리지 않음
    pub loss_every: u32,
    pub loss_offset: u32,

    /// `seq % corrupt_every == corrupt_offset`이면 페이로드 한 바이트 변조
    pub corrupt_every: u32,
    pub corrupt_offset: u32,
}

impl FaultConfig {
    /// 장애 없음
    pub fn none() -> Self {
        Self::default()
    }

    /// 손실과 변조를 모두 일으키는 데모용 설정
    pub fn lossy() -> Self {
        Self {
            loss_every: 3,
            loss_offset: 0,
            corrupt_every: 2,
            corrupt_offset: 1,
        }
    }

    pub fn with_loss(mut self, every: u32, offset: u32) -> Self {
        self.loss_every = every;
        self.loss_offset = offset;
        self
    }

    pub fn with_corruption(mut self, every: u32, offset: u32) -> Self {
        self.corrupt_every = every;
        self.corrupt_offset = offset;
        self
    }

    pub fn should_drop(&self, seq: u32) -> bool {
        self.loss_every > 0 && seq % self.loss_every == self.loss_offset
    }

    pub fn should_corrupt(&self, seq: u32) -> bool {
        self.corrupt_every > 0 && seq % self.corrupt_every == self.corrupt_offset
    }

    pub fn is_active(&self) -> bool {
        self.loss_every > 0 || self.corrupt_every > 0
    }
}

/// 수신측(서버) 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// HELLO-OK로 알릴 윈도우 범위
    pub window: WindowBounds,

    /// 허용하는 최소 max_msg_len
    pub min_max_msg_len: u32,

    /// 소켓 읽기 버퍼 크기
    pub read_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: WindowBounds::default(),
            min_max_msg_len: MIN_MAX_MSG_LEN,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// stop-and-wait와 동일하게 동작하는 설정 (윈도우 1)
    pub fn stop_and_wait() -> Self {
        Self {
            window: WindowBounds::new(1, 1, 1),
            ..Self::default()
        }
    }

    pub fn with_window(mut self, window: WindowBounds) -> Self {
        self.window = window;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.window.validate()?;
        if self.read_buffer_size == 0 {
            return Err(Error::Config("read_buffer_size는 0보다 커야 함".into()));
        }
        Ok(())
    }
}
