//! 프로토콜 메시지 정의 (프레임 코덱)
//!
//! 모든 메시지는 `\n`으로 끝나는 한 줄의 텍스트다.
//!
//! ```text
//! HELLO modo=GBN max_msg_len=64 checksum=CRC16 timeout_ms=300 ack_mode=INDIVIDUAL [crypto=ON]
//! HELLO-OK win_init=5 win_min=1 win_max=5
//! ERR <사유>
//! DATA|<seq>|<len>|<total>|<payload>|<checksum>
//! ACK|<next_seq>
//! ```
//!
//! 이 모듈은 I/O를 하지 않는다. 스트림 입출력은 [`crate::transport`] 담당.

use std::fmt;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};

use crate::checksum::{ChecksumAlgorithm, CHECKSUM_HEX_LEN};
use crate::config::WindowBounds;
use crate::handshake::SessionParams;
use crate::{Error, Result, MAX_LINE_LEN};

pub const HELLO_PREFIX: &str = "HELLO ";
pub const HELLO_OK_PREFIX: &str = "HELLO-OK ";
pub const ERR_PREFIX: &str = "ERR";
pub const DATA_PREFIX: &[u8] = b"DATA|";
pub const ACK_PREFIX: &[u8] = b"ACK|";

/// DATA 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub seq: u32,
    pub total: u32,
    pub payload: Bytes,
    /// 와이어 표기 그대로의 체크섬 (4자리 16진수)
    pub checksum: String,
}

impl DataFrame {
    /// 바이트로 직렬화 (개행 포함)
    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!("DATA|{}|{}|{}|", self.seq, self.payload.len(), self.total);
        let mut buf = Vec::with_capacity(head.len() + self.payload.len() + CHECKSUM_HEX_LEN + 2);
        buf.extend_from_slice(head.as_bytes());
        buf.extend_from_slice(&self.payload);
        buf.push(b'|');
        buf.extend_from_slice(self.checksum.as_bytes());
        buf.push(b'\n');
        buf
    }

    /// DATA 줄 파싱 및 검증
    ///
    /// 형식 검사를 모두 통과한 뒤에 체크섬을 확인한다. 체크섬 실패는
    /// [`Error::Integrity`], 그 외는 [`Error::Format`].
    pub fn parse(line: &[u8], algorithm: ChecksumAlgorithm, max_payload: usize) -> Result<Self> {
        let rest = line
            .strip_prefix(DATA_PREFIX)
            .ok_or_else(|| Error::format("DATA 프레임이 아님"))?;

        // seq, len, total은 왼쪽에서, checksum은 오른쪽에서 자른다.
        // 페이로드에 '|'가 들어 있어도 파싱된다.
        let mut fields = rest.splitn(4, |&b| b == b'|');
        let (seq, len, total, tail) = match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(seq), Some(len), Some(total), Some(tail)) => (seq, len, total, tail),
            _ => return Err(Error::format("DATA 필드 수 불일치")),
        };
        let split = tail
            .iter()
            .rposition(|&b| b == b'|')
            .ok_or_else(|| Error::format("DATA 필드 수 불일치"))?;
        let (payload, checksum) = (&tail[..split], &tail[split + 1..]);

        let seq: u32 = parse_number(seq, "seq")?;
        let len: usize = parse_number(len, "len")?;
        let total: u32 = parse_number(total, "total")?;

        if len != payload.len() {
            return Err(Error::format(format!(
                "len 불일치: 선언 {}, 실제 {}",
                len,
                payload.len()
            )));
        }
        if len > max_payload {
            return Err(Error::format(format!("payload > {}", max_payload)));
        }

        let checksum = std::str::from_utf8(checksum)
            .ok()
            .filter(|c| c.len() == CHECKSUM_HEX_LEN && c.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or_else(|| Error::format("checksum 표기 오류"))?;

        if !algorithm.verify(payload, len, checksum) {
            return Err(Error::Integrity {
                expected: algorithm.compute_hex(payload),
                got: checksum.to_string(),
            });
        }

        Ok(Self {
            seq,
            total,
            payload: Bytes::copy_from_slice(payload),
            checksum: checksum.to_string(),
        })
    }
}

/// 누적 ACK 파싱: `ACK|<next_seq>`
pub fn parse_ack(line: &[u8]) -> Result<u32> {
    let rest = line
        .strip_prefix(ACK_PREFIX)
        .ok_or_else(|| Error::format("ACK 프레임이 아님"))?;
    parse_number(rest, "next_seq")
}

/// ERR 줄이면 사유를 반환
pub fn parse_err(line: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(line).ok()?;
    if text == ERR_PREFIX {
        return Some(String::new());
    }
    text.strip_prefix("ERR ").map(|reason| reason.trim().to_string())
}

fn parse_number<T: FromStr>(field: &[u8], name: &str) -> Result<T> {
    std::str::from_utf8(field)
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::format(format!("{} 숫자 아님", name)))
}

/// `PREFIX key=value key=value ...` 형식의 토큰 모음
#[derive(Debug)]
pub struct Fields<'a> {
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> Fields<'a> {
    /// 접두어를 확인하고 `key=value` 토큰을 분리
    pub fn parse(line: &'a [u8], prefix: &str) -> Result<Self> {
        let text = std::str::from_utf8(line).map_err(|_| Error::format("UTF-8 아님"))?;
        let body = text
            .strip_prefix(prefix)
            .ok_or_else(|| Error::format(format!("'{}' 메시지가 아님", prefix.trim())))?;

        let pairs = body
            .split_whitespace()
            .map(|token| {
                token
                    .split_once('=')
                    .ok_or_else(|| Error::format(format!("key=value 아님: {}", token)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { pairs })
    }

    /// 값 조회 (없으면 None)
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    /// 필수 값 조회
    pub fn require(&self, key: &str) -> Result<&'a str> {
        self.get(key)
            .ok_or_else(|| Error::format(format!("필드 누락: {}", key)))
    }

    /// 필수 값을 파싱
    pub fn require_parsed<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
    {
        let raw = self.require(key)?;
        raw.parse()
            .map_err(|_| Error::format(format!("{} 값 오류: {}", key, raw)))
    }
}

/// HELLO-OK 직렬화
pub fn hello_ok_line(window: &WindowBounds) -> String {
    format!(
        "{}win_init={} win_min={} win_max={}",
        HELLO_OK_PREFIX, window.init, window.min, window.max
    )
}

/// HELLO-OK 파싱
pub fn parse_hello_ok(line: &[u8]) -> Result<WindowBounds> {
    let fields = Fields::parse(line, HELLO_OK_PREFIX)?;
    Ok(WindowBounds {
        init: fields.require_parsed("win_init")?,
        min: fields.require_parsed("win_min")?,
        max: fields.require_parsed("win_max")?,
    })
}

/// 송신 가능한 프레임
#[derive(Debug, Clone)]
pub enum Frame {
    Hello(SessionParams),
    HelloOk(WindowBounds),
    Err(String),
    Data(DataFrame),
    Ack(u32),
}

impl Frame {
    /// 바이트로 직렬화 (개행 포함)
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Frame::Data(data) => data.to_bytes(),
            other => {
                let mut line = other.to_string().into_bytes();
                line.push(b'\n');
                line
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello(_) => "HELLO",
            Frame::HelloOk(_) => "HELLO-OK",
            Frame::Err(_) => "ERR",
            Frame::Data(_) => "DATA",
            Frame::Ack(_) => "ACK",
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Hello(params) => f.write_str(&params.to_hello_line()),
            Frame::HelloOk(window) => f.write_str(&hello_ok_line(window)),
            Frame::Err(reason) => write!(f, "ERR {}", reason),
            Frame::Data(data) => write!(
                f,
                "DATA|{}|{}|{}|{}|{}",
                data.seq,
                data.payload.len(),
                data.total,
                String::from_utf8_lossy(&data.payload),
                data.checksum
            ),
            Frame::Ack(next) => write!(f, "ACK|{}", next),
        }
    }
}

/// 개행 단위 프레이밍 버퍼
///
/// 부분 읽기는 완전한 줄이 모일 때까지 보관하고, 한 번의 읽기에 여러 줄이
/// 들어오면 모두 꺼낸다. 마지막의 불완전한 줄은 다음 읽기로 넘긴다.
/// 불완전한 줄이 `max_line`을 넘으면 [`Error::BufferOverflow`].
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            max_line: MAX_LINE_LEN,
        }
    }

    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    /// 읽은 바이트 추가
    pub fn extend(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        let partial = match self.buf.iter().rposition(|&b| b == b'\n') {
            Some(pos) => self.buf.len() - pos - 1,
            None => self.buf.len(),
        };
        if partial > self.max_line {
            return Err(Error::BufferOverflow {
                max_size: self.max_line,
            });
        }
        Ok(())
    }

    /// 다음 완전한 줄 (개행과 `\r` 제거, 빈 줄은 건너뜀)
    pub fn next_line(&mut self) -> Option<Bytes> {
        loop {
            let pos = self.buf.iter().position(|&b| b == b'\n')?;
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            if !line.is_empty() {
                return Some(line.freeze());
            }
        }
    }

    /// 현재 버퍼에 있는 모든 완전한 줄
    pub fn drain_lines(&mut self) -> Vec<Bytes> {
        std::iter::from_fn(|| self.next_line()).collect()
    }

    /// 아직 개행이 오지 않은 바이트 수
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AckMode, Mode};

    const ALGO: ChecksumAlgorithm = ChecksumAlgorithm::Crc16;

    fn data_line(seq: u32, total: u32, payload: &[u8]) -> Vec<u8> {
        DataFrame {
            seq,
            total,
            payload: Bytes::copy_from_slice(payload),
            checksum: ALGO.compute_hex(payload),
        }
        .to_bytes()
    }

    fn strip(mut line: Vec<u8>) -> Vec<u8> {
        assert_eq!(line.pop(), Some(b'\n'));
        line
    }

    #[test]
    fn test_data_wire_shape() {
        let line = data_line(2, 5, b"Worl");
        let expected = format!("DATA|2|4|5|Worl|{}\n", ALGO.compute_hex(b"Worl"));
        assert_eq!(line, expected.as_bytes());
    }

    #[test]
    fn test_data_parse_valid() {
        let line = strip(data_line(0, 3, b"Hell"));
        let frame = DataFrame::parse(&line, ALGO, 4).unwrap();
        assert_eq!(frame.seq, 0);
        assert_eq!(frame.total, 3);
        assert_eq!(&frame.payload[..], b"Hell");
    }

    #[test]
    fn test_data_parse_payload_with_pipe() {
        let line = strip(data_line(1, 2, b"a|b"));
        let frame = DataFrame::parse(&line, ALGO, 4).unwrap();
        assert_eq!(&frame.payload[..], b"a|b");
    }

    #[test]
    fn test_data_parse_lowercase_checksum() {
        let code = ALGO.compute_hex(b"abcd").to_ascii_lowercase();
        let line = format!("DATA|0|4|1|abcd|{}", code);
        assert!(DataFrame::parse(line.as_bytes(), ALGO, 4).is_ok());
    }

    #[test]
    fn test_data_format_errors() {
        let code = ALGO.compute_hex(b"abcd");
        let cases = [
            format!("DATX|0|4|1|abcd|{}", code),
            "DATA|0|4|1".to_string(),
            "DATA|0|4|1|abcd".to_string(),
            format!("DATA|x|4|1|abcd|{}", code),
            format!("DATA|0|3|1|abcd|{}", code),
            format!("DATA|0|5|1|abcde|{}", ALGO.compute_hex(b"abcde")),
            "DATA|0|4|1|abcd|XYZ1".to_string(),
            "DATA|0|4|1|abcd|12345".to_string(),
        ];
        for case in cases {
            let err = DataFrame::parse(case.as_bytes(), ALGO, 4).unwrap_err();
            assert!(matches!(err, Error::Format(_)), "{} -> {:?}", case, err);
        }
    }

    #[test]
    fn test_data_integrity_error() {
        let code = ALGO.compute_hex(b"abcd");
        let line = format!("DATA|0|4|1|abce|{}", code);
        let err = DataFrame::parse(line.as_bytes(), ALGO, 4).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[test]
    fn test_checksum_algorithm_must_match() {
        let line = strip(data_line(0, 1, b"abcd"));
        let err = DataFrame::parse(&line, ChecksumAlgorithm::Adler32, 4).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[test]
    fn test_ack() {
        assert_eq!(Frame::Ack(7).to_bytes(), b"ACK|7\n");
        assert_eq!(parse_ack(b"ACK|7").unwrap(), 7);
        assert!(parse_ack(b"ACK|").is_err());
        assert!(parse_ack(b"ACK|-1").is_err());
        assert!(parse_ack(b"NAK|1").is_err());
    }

    #[test]
    fn test_err() {
        assert_eq!(
            Frame::Err("max_msg_len must be >= 30".into()).to_bytes(),
            b"ERR max_msg_len must be >= 30\n"
        );
        assert_eq!(parse_err(b"ERR bad thing").as_deref(), Some("bad thing"));
        assert_eq!(parse_err(b"ERR").as_deref(), Some(""));
        assert_eq!(parse_err(b"ERROR"), None);
        assert_eq!(parse_err(b"ACK|1"), None);
    }

    #[test]
    fn test_hello_ok_round_trip() {
        let window = WindowBounds::new(5, 1, 5);
        let line = hello_ok_line(&window);
        assert_eq!(line, "HELLO-OK win_init=5 win_min=1 win_max=5");
        assert_eq!(parse_hello_ok(line.as_bytes()).unwrap(), window);
    }

    #[test]
    fn test_hello_ok_missing_field() {
        let err = parse_hello_ok(b"HELLO-OK win_init=5 win_min=1").unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert!(parse_hello_ok(b"HELLO win_init=5 win_min=1 win_max=5").is_err());
    }

    #[test]
    fn test_fields() {
        let fields = Fields::parse(b"HELLO a=1 b=two", HELLO_PREFIX).unwrap();
        assert_eq!(fields.get("b"), Some("two"));
        assert_eq!(fields.require_parsed::<u32>("a").unwrap(), 1);
        assert!(fields.require("c").is_err());
        assert!(fields.require_parsed::<u32>("b").is_err());
        assert!(Fields::parse(b"HELLO a=1 broken", HELLO_PREFIX).is_err());
    }

    #[test]
    fn test_frame_display_matches_bytes() {
        let params = SessionParams {
            mode: Mode::Gbn,
            max_msg_len: 64,
            checksum: ALGO,
            timeout_ms: 300,
            ack_mode: AckMode::Individual,
            crypto: None,
        };
        let frame = Frame::Hello(params);
        let mut expected = frame.to_string().into_bytes();
        expected.push(b'\n');
        assert_eq!(frame.to_bytes(), expected);
        assert_eq!(frame.kind(), "HELLO");
    }

    #[test]
    fn test_line_buffer_partial_reads() {
        let mut buf = LineBuffer::new();
        buf.extend(b"ACK|1").unwrap();
        assert!(buf.next_line().is_none());
        assert_eq!(buf.pending(), 5);

        buf.extend(b"0\nACK|").unwrap();
        assert_eq!(buf.next_line().as_deref(), Some(&b"ACK|10"[..]));
        assert!(buf.next_line().is_none());

        buf.extend(b"11\n").unwrap();
        assert_eq!(buf.next_line().as_deref(), Some(&b"ACK|11"[..]));
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_line_buffer_multiple_frames_in_one_read() {
        let mut buf = LineBuffer::new();
        buf.extend(b"ACK|1\nACK|2\r\n\nACK|3\nACK").unwrap();
        let lines = buf.drain_lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(&lines[1][..], b"ACK|2");
        assert_eq!(buf.pending(), 3);
    }

    #[test]
    fn test_line_buffer_rejects_unterminated_long_line() {
        let mut buf = LineBuffer::new().with_max_line(8);
        buf.extend(b"ACK|1\nACK|").unwrap();
        assert_eq!(buf.next_line().as_deref(), Some(&b"ACK|1"[..]));

        buf.extend(b"2\nDATA|0|").unwrap();
        assert_eq!(buf.next_line().as_deref(), Some(&b"ACK|2"[..]));

        let err = buf.extend(b"4|5|HellXXXX").unwrap_err();
        assert!(matches!(err, Error::BufferOverflow { max_size: 8 }));
    }
}
