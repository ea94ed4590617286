//! 프래그먼트 정의
//!
//! - Fragment: 메시지를 고정 크기(기본 4바이트)로 자른 조각
//! - ReassemblyBuffer: 수신측 재조립 버퍼 (seq -> payload)

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use crate::checksum::{render, ChecksumAlgorithm};
use crate::message::DataFrame;
use crate::{Error, Result};

/// 시퀀스 번호 (0부터 시작)
pub type SeqNum = u32;

/// 프래그먼트 (송신 단위)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub seq: SeqNum,

    /// 메시지 전체 프래그먼트 수
    pub total: u32,

    pub payload: Bytes,

    /// 원본 페이로드의 체크섬
    pub checksum: u16,
}

impl Fragment {
    pub fn new(seq: SeqNum, total: u32, payload: Bytes, algorithm: ChecksumAlgorithm) -> Self {
        let checksum = algorithm.compute(&payload);
        Self {
            seq,
            total,
            payload,
            checksum,
        }
    }

    /// 정상 DATA 프레임
    pub fn to_frame(&self) -> DataFrame {
        DataFrame {
            seq: self.seq,
            total: self.total,
            payload: self.payload.clone(),
            checksum: render(self.checksum),
        }
    }

    /// 변조된 DATA 프레임
    ///
    /// 체크섬은 원본 기준이고 페이로드 첫 바이트만 바뀐다. 바뀐 바이트는
    /// 개행이나 구분자가 되지 않는다.
    pub fn to_corrupted_frame(&self) -> DataFrame {
        let mut frame = self.to_frame();
        if self.payload.is_empty() {
            frame.checksum = render(!self.checksum);
            return frame;
        }

        let mut payload = BytesMut::from(&self.payload[..]);
        payload[0] = if payload[0] == b'#' { b'$' } else { b'#' };
        frame.payload = payload.freeze();
        frame
    }
}

/// 메시지 분할기 (송신측)
pub struct Fragmenter {
    fragment_size: usize,
    algorithm: ChecksumAlgorithm,
}

impl Fragmenter {
    pub fn new(fragment_size: usize, algorithm: ChecksumAlgorithm) -> Self {
        Self {
            fragment_size: fragment_size.max(1),
            algorithm,
        }
    }

    /// 메시지를 순서대로 프래그먼트로 분할
    ///
    /// 줄 단위 프로토콜이므로 개행이 포함된 메시지는 보낼 수 없다.
    pub fn split(&self, message: &[u8]) -> Result<Vec<Fragment>> {
        if message.contains(&b'\n') {
            return Err(Error::InvalidMessage("메시지에 개행 문자가 포함됨".into()));
        }

        let total = message.len().div_ceil(self.fragment_size);
        let total = u32::try_from(total)
            .map_err(|_| Error::InvalidMessage(format!("프래그먼트 수 초과: {}", total)))?;

        Ok(message
            .chunks(self.fragment_size)
            .enumerate()
            .map(|(idx, data)| {
                Fragment::new(
                    idx as SeqNum,
                    total,
                    Bytes::copy_from_slice(data),
                    self.algorithm,
                )
            })
            .collect())
    }
}

/// 삽입 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// 새 프래그먼트
    Inserted,
    /// 이미 받은 seq (버퍼 변화 없음)
    Duplicate,
}

/// 재조립 버퍼 (수신측)
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    fragments: BTreeMap<SeqNum, Bytes>,

    /// 다음에 필요한 seq (누적 ACK 값)
    expected: SeqNum,

    /// 첫 프래그먼트에서 확정되는 전체 수
    total: Option<u32>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 프래그먼트 삽입
    ///
    /// `total`은 처음 받은 프래그먼트의 값으로 고정된다. 그 범위를 벗어나는
    /// seq는 형식 오류로 거부하며, 거부된 프레임은 `total`을 확정하지 않는다.
    pub fn insert(&mut self, seq: SeqNum, total: u32, payload: Bytes) -> Result<InsertOutcome> {
        let total = self.total.unwrap_or(total);
        if seq >= total {
            return Err(Error::format(format!("seq {} 범위 초과 (total={})", seq, total)));
        }
        self.total = Some(total);

        if self.fragments.contains_key(&seq) {
            return Ok(InsertOutcome::Duplicate);
        }
        self.fragments.insert(seq, payload);

        while self.fragments.contains_key(&self.expected) {
            self.expected += 1;
        }
        Ok(InsertOutcome::Inserted)
    }

    pub fn expected(&self) -> SeqNum {
        self.expected
    }

    pub fn total(&self) -> Option<u32> {
        self.total
    }

    /// 버퍼에 있는 프래그먼트 수 (순서 밖 포함)
    pub fn buffered(&self) -> usize {
        self.fragments.len()
    }

    /// 완료 여부 확인
    pub fn is_complete(&self) -> bool {
        matches!(self.total, Some(total) if self.expected >= total)
    }

    /// 완료된 메시지 추출 (0..total 순서로 연결)
    ///
    /// 완료 전이면 None.
    pub fn assemble(self) -> Option<Bytes> {
        if !self.is_complete() {
            return None;
        }
        let mut data = BytesMut::new();
        for payload in self.fragments.values() {
            data.extend_from_slice(payload);
        }
        Some(data.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALGO: ChecksumAlgorithm = ChecksumAlgorithm::Crc16;

    #[test]
    fn test_split_into_fragments() {
        let fragments = Fragmenter::new(4, ALGO).split(b"HelloWorldFromRTPy!").unwrap();
        assert_eq!(fragments.len(), 5);
        assert!(fragments.iter().all(|f| f.total == 5));
        assert_eq!(&fragments[0].payload[..], b"Hell");
        assert_eq!(&fragments[4].payload[..], b"Py!");
        assert_eq!(&fragments[2].payload[..], b"ldFr");
        assert_eq!(fragments[2].checksum, ALGO.compute(b"ldFr"));
    }

    #[test]
    fn test_split_empty_and_newline() {
        assert!(Fragmenter::new(4, ALGO).split(b"").unwrap().is_empty());
        let err = Fragmenter::new(4, ALGO).split(b"two\nlines").unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn test_corrupted_frame_fails_integrity() {
        let fragment = Fragment::new(1, 3, Bytes::from_static(b"oWor"), ALGO);
        let clean = fragment.to_frame();
        let corrupted = fragment.to_corrupted_frame();

        assert_eq!(clean.checksum, corrupted.checksum);
        assert_ne!(clean.payload, corrupted.payload);
        assert_eq!(corrupted.payload.len(), 4);

        let line = corrupted.to_bytes();
        let err = DataFrame::parse(&line[..line.len() - 1], ALGO, 4).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[test]
    fn test_corrupting_hash_byte() {
        let fragment = Fragment::new(0, 1, Bytes::from_static(b"#ab"), ALGO);
        assert_eq!(&fragment.to_corrupted_frame().payload[..], b"$ab");
    }

    #[test]
    fn test_reassembly_out_of_order() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.insert(1, 3, Bytes::from_static(b"bbbb")).unwrap();
        assert_eq!(buffer.expected(), 0);
        buffer.insert(2, 3, Bytes::from_static(b"cc")).unwrap();
        assert_eq!(buffer.expected(), 0);
        assert!(!buffer.is_complete());

        buffer.insert(0, 3, Bytes::from_static(b"aaaa")).unwrap();
        assert_eq!(buffer.expected(), 3);
        assert!(buffer.is_complete());
        assert_eq!(&buffer.assemble().unwrap()[..], b"aaaabbbbcc");
    }

    #[test]
    fn test_duplicate_is_idempotent() {
        let mut buffer = ReassemblyBuffer::new();
        assert_eq!(
            buffer.insert(0, 2, Bytes::from_static(b"abcd")).unwrap(),
            InsertOutcome::Inserted
        );
        let expected = buffer.expected();
        assert_eq!(
            buffer.insert(0, 2, Bytes::from_static(b"abcd")).unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(buffer.expected(), expected);
        assert_eq!(buffer.buffered(), 1);
    }

    #[test]
    fn test_total_fixed_by_first_fragment() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.insert(0, 2, Bytes::from_static(b"ab")).unwrap();
        // 다른 total은 무시되고 범위 검사는 첫 값 기준
        let err = buffer.insert(2, 5, Bytes::from_static(b"cd")).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert_eq!(buffer.total(), Some(2));
    }

    #[test]
    fn test_rejected_fragment_does_not_fix_total() {
        let mut buffer = ReassemblyBuffer::new();
        let err = buffer.insert(9, 2, Bytes::from_static(b"xx")).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert_eq!(buffer.total(), None);

        // total=0 프레임도 범위 밖이라 아무것도 확정하지 않는다
        assert!(buffer.insert(0, 0, Bytes::new()).is_err());
        assert_eq!(buffer.total(), None);
        assert!(!buffer.is_complete());

        let fragments = Fragmenter::new(4, ALGO).split(b"HelloWorldFromRTPy!").unwrap();
        for fragment in &fragments {
            buffer.insert(fragment.seq, fragment.total, fragment.payload.clone()).unwrap();
        }
        assert_eq!(buffer.total(), Some(5));
        assert_eq!(&buffer.assemble().unwrap()[..], b"HelloWorldFromRTPy!");
    }

    #[test]
    fn test_assemble_incomplete() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.insert(1, 2, Bytes::from_static(b"cd")).unwrap();
        assert!(buffer.assemble().is_none());
    }

    proptest! {
        #[test]
        fn fragment_reassemble_round_trip(
            message in "[a-zA-Z0-9 |!?#$]{0,64}",
            size in 1usize..8,
            reverse in any::<bool>(),
        ) {
            let mut fragments = Fragmenter::new(size, ALGO).split(message.as_bytes()).unwrap();
            if reverse {
                fragments.reverse();
            }

            let mut buffer = ReassemblyBuffer::new();
            let mut last_expected = 0;
            for fragment in &fragments {
                buffer.insert(fragment.seq, fragment.total, fragment.payload.clone()).unwrap();
                prop_assert!(buffer.expected() >= last_expected);
                last_expected = buffer.expected();
            }

            if fragments.is_empty() {
                prop_assert!(message.is_empty());
            } else {
                let assembled = buffer.assemble().unwrap();
                prop_assert_eq!(&assembled[..], message.as_bytes());
            }
        }
    }
}
