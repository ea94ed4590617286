//! 체크섬 제공자
//!
//! - CRC16: CRC-16/MODBUS
//! - Adler32: Adler-32의 하위 16비트
//! - CRC: CRC16과 동일한 코드 (와이어 호환용 별칭)
//!
//! 모든 코드는 대문자 4자리 16진수로 표기된다.

use std::fmt;
use std::str::FromStr;

use crc::{Crc, CRC_16_MODBUS};

use crate::{Error, Result};

const MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Adler-32 모듈러스
const ADLER_MOD: u32 = 65521;

/// 체크섬 코드 표기 길이 (16진수 자릿수)
pub const CHECKSUM_HEX_LEN: usize = 4;

/// 세션에서 협상되는 체크섬 알고리즘
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Crc16,
    Adler32,
    Crc,
}

impl ChecksumAlgorithm {
    /// 페이로드의 16비트 코드 계산
    pub fn compute(&self, payload: &[u8]) -> u16 {
        match self {
            ChecksumAlgorithm::Crc16 | ChecksumAlgorithm::Crc => MODBUS.checksum(payload),
            ChecksumAlgorithm::Adler32 => adler16(payload),
        }
    }

    /// 와이어 표기 (대문자 4자리 16진수)
    pub fn compute_hex(&self, payload: &[u8]) -> String {
        render(self.compute(payload))
    }

    /// 체크섬 검증
    ///
    /// 선언 길이와 실제 길이가 다르면 코드를 비교하기 전에 실패한다.
    /// 16진수 비교는 대소문자를 구분하지 않는다.
    pub fn verify(&self, payload: &[u8], declared_len: usize, code: &str) -> bool {
        if payload.len() != declared_len {
            return false;
        }
        self.compute_hex(payload).eq_ignore_ascii_case(code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Crc16 => "CRC16",
            ChecksumAlgorithm::Adler32 => "Adler32",
            ChecksumAlgorithm::Crc => "CRC",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CRC16" => Ok(ChecksumAlgorithm::Crc16),
            "Adler32" => Ok(ChecksumAlgorithm::Adler32),
            "CRC" => Ok(ChecksumAlgorithm::Crc),
            other => Err(Error::format(format!("알 수 없는 checksum: {}", other))),
        }
    }
}

/// 16비트 코드를 와이어 표기로 변환
pub fn render(code: u16) -> String {
    format!("{:04X}", code)
}

/// Adler-32의 하위 16비트 (A 합계)
fn adler16(payload: &[u8]) -> u16 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in payload {
        a = (a + byte as u32) % ADLER_MOD;
        b = (b + a) % ADLER_MOD;
    }
    (((b << 16) | a) & 0xFFFF) as u16
}
