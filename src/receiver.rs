//! 수신자 (서버측)
//!
//! - DATA 검증 (형식 + 체크섬) 후 재조립
//! - 누적 ACK (INDIVIDUAL: 프래그먼트마다, GROUP: 읽기 한 번마다)
//! - 잘못된 프레임은 폐기, ACK 없음 (송신측 타임아웃으로 복구)

use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::checksum::ChecksumAlgorithm;
use crate::chunk::{InsertOutcome, ReassemblyBuffer, SeqNum};
use crate::config::AckMode;
use crate::crypto::MessageCipher;
use crate::handshake::{Negotiator, SessionParams};
use crate::message::{DataFrame, Frame};
use crate::stats::ReceiverStats;
use crate::transport::{Incoming, LineStream};
use crate::{Config, Error, Result, DEFAULT_FRAGMENT_SIZE};

/// 수신 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverPhase {
    AwaitingData,
    Complete,
}

/// 수신 상태 기계
#[derive(Debug)]
pub struct ReceiverEngine {
    algorithm: ChecksumAlgorithm,
    ack_mode: AckMode,
    max_payload: usize,
    buffer: ReassemblyBuffer,
    stats: ReceiverStats,
}

impl ReceiverEngine {
    pub fn new(algorithm: ChecksumAlgorithm, ack_mode: AckMode) -> Self {
        Self {
            algorithm,
            ack_mode,
            max_payload: DEFAULT_FRAGMENT_SIZE,
            buffer: ReassemblyBuffer::new(),
            stats: ReceiverStats::default(),
        }
    }

    pub fn from_params(params: &SessionParams) -> Self {
        Self::new(params.checksum, params.ack_mode)
    }

    /// 다음에 필요한 seq
    pub fn expected(&self) -> SeqNum {
        self.buffer.expected()
    }

    pub fn total(&self) -> Option<u32> {
        self.buffer.total()
    }

    pub fn phase(&self) -> ReceiverPhase {
        if self.is_complete() {
            ReceiverPhase::Complete
        } else {
            ReceiverPhase::AwaitingData
        }
    }

    pub fn is_complete(&self) -> bool {
        self.buffer.is_complete()
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// DATA 한 줄 처리
    ///
    /// 형식/체크섬 오류는 통계에 기록하고 그대로 반환한다. 호출자는 ACK를
    /// 보내지 않아야 한다.
    pub fn on_line(&mut self, line: &[u8]) -> Result<InsertOutcome> {
        let result = DataFrame::parse(line, self.algorithm, self.max_payload)
            .and_then(|frame| self.buffer.insert(frame.seq, frame.total, frame.payload));

        match &result {
            Ok(InsertOutcome::Inserted) => self.stats.frames_accepted += 1,
            Ok(InsertOutcome::Duplicate) => {
                self.stats.frames_accepted += 1;
                self.stats.duplicates += 1;
            }
            Err(Error::Integrity { .. }) => self.stats.integrity_errors += 1,
            Err(_) => self.stats.format_errors += 1,
        }
        result
    }

    /// 한 번의 읽기로 들어온 줄들을 처리하고 보낼 ACK 값을 반환
    ///
    /// INDIVIDUAL은 수락한 프래그먼트마다, GROUP은 하나라도 수락했으면 한 번.
    /// 어느 쪽이든 최신 expected를 싣는다. 메시지가 완성되면 나머지 줄은
    /// 처리하지 않는다.
    pub fn on_batch(&mut self, lines: &[Bytes]) -> Vec<SeqNum> {
        let mut acks = Vec::new();
        let mut accepted = false;

        for line in lines {
            // 완료 후 남은 줄은 이미 받은 프레임의 재전송이다
            if self.is_complete() {
                break;
            }
            match self.on_line(line) {
                Ok(outcome) => {
                    debug!("DATA 수락: {:?}, expected={}", outcome, self.expected());
                    accepted = true;
                    if self.ack_mode == AckMode::Individual {
                        acks.push(self.expected());
                    }
                }
                Err(e) => warn!("프레임 폐기: {} ({})", e, String::from_utf8_lossy(line)),
            }
        }

        if accepted && self.ack_mode == AckMode::Group {
            acks.push(self.expected());
        }
        self.stats.acks_sent += acks.len() as u64;
        acks
    }

    /// 완료된 메시지와 통계 (완료 전이면 None)
    pub fn finish(self) -> Option<(Bytes, ReceiverStats)> {
        let stats = self.stats;
        self.buffer.assemble().map(|message| (message, stats))
    }
}

/// 핸드쉐이크가 끝난 스트림에서 메시지 하나를 수신 (복호화 전)
///
/// 완료 전에 상대방이 닫으면 부분 메시지는 버리고 [`Error::ConnectionClosed`].
pub async fn receive_message<S>(
    stream: &mut LineStream<S>,
    params: &SessionParams,
) -> Result<(Bytes, ReceiverStats)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let mut engine = ReceiverEngine::from_params(params);

    while !engine.is_complete() {
        // 마감 시각 없이 기다리므로 TimedOut은 오지 않는다
        match stream.recv_batch(None).await? {
            Incoming::Lines(lines) => {
                for next in engine.on_batch(&lines) {
                    stream.send(&Frame::Ack(next)).await?;
                }
            }
            Incoming::TimedOut | Incoming::Closed => {
                warn!(
                    "수신 중 연결 종료: expected={} total={:?}",
                    engine.expected(),
                    engine.total()
                );
                return Err(Error::ConnectionClosed);
            }
        }
    }

    let (message, mut stats) = engine.finish().ok_or(Error::ConnectionClosed)?;
    stats.elapsed = started.elapsed();
    info!("재조립 완료: {} 바이트, {}", message.len(), stats.summary());
    Ok((message, stats))
}

/// 쓰기 방향을 닫고 상대방이 닫을 때까지(최대 `grace`) 남은 입력을 버린다
///
/// 읽지 않은 데이터를 둔 채 소켓을 닫으면 상대방이 마지막 ACK를 읽기 전에
/// 연결이 리셋될 수 있다.
pub async fn linger<S>(stream: &mut LineStream<S>, grace: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.shutdown().await?;
    let deadline = Instant::now() + grace;
    loop {
        match stream.recv_batch(Some(deadline)).await? {
            Incoming::Lines(lines) => debug!("전송 완료 후 {}줄 무시", lines.len()),
            Incoming::TimedOut | Incoming::Closed => return Ok(()),
        }
    }
}

/// 수신 결과
#[derive(Debug, Clone)]
pub struct Delivery {
    /// 복호화까지 끝난 메시지
    pub message: Bytes,
    pub params: SessionParams,
    pub stats: ReceiverStats,
}

/// 메시지 수신자
///
/// 핸드쉐이크, 수신, 선택적 복호화를 한 번에 처리한다.
#[derive(Debug)]
pub struct MessageReceiver {
    config: Config,
    cipher: Option<MessageCipher>,
}

impl MessageReceiver {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cipher: None,
        }
    }

    pub fn with_cipher(mut self, cipher: MessageCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 연결 하나에서 메시지 하나를 수신
    ///
    /// 핸드쉐이크 이후의 치명적 오류는 가능하면 ERR로 상대방에게 알린다.
    pub async fn receive<S>(&self, stream: &mut LineStream<S>) -> Result<Delivery>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let negotiator = Negotiator::new(self.config.clone(), self.cipher.is_some());
        let params = negotiator.accept(stream).await?;

        let span = info_span!("receive", mode = %params.mode, ack_mode = %params.ack_mode);
        async {
            match self.transfer(stream, &params).await {
                Ok(delivery) => {
                    if let Err(e) = linger(stream, params.timeout()).await {
                        debug!("linger 실패: {}", e);
                    }
                    Ok(delivery)
                }
                Err(e) => {
                    if !matches!(e, Error::ConnectionClosed | Error::Io(_)) {
                        if let Err(send_err) = stream.send(&Frame::Err(e.to_string())).await {
                            debug!("ERR 전송 실패: {}", send_err);
                        }
                    }
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn transfer<S>(&self, stream: &mut LineStream<S>, params: &SessionParams) -> Result<Delivery>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (data, stats) = receive_message(stream, params).await?;

        let message = if params.crypto_enabled() {
            let cipher = self
                .cipher
                .as_ref()
                .ok_or_else(|| Error::Config("crypto=ON 이지만 키가 없음".into()))?;
            Bytes::from(cipher.decrypt(&data)?)
        } else {
            data
        };

        Ok(Delivery {
            message,
            params: *params,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Fragment, Fragmenter};

    const ALGO: ChecksumAlgorithm = ChecksumAlgorithm::Crc16;

    fn line(fragment: &Fragment) -> Bytes {
        let mut bytes = fragment.to_frame().to_bytes();
        bytes.pop();
        Bytes::from(bytes)
    }

    fn corrupted_line(fragment: &Fragment) -> Bytes {
        let mut bytes = fragment.to_corrupted_frame().to_bytes();
        bytes.pop();
        Bytes::from(bytes)
    }

    fn fragments() -> Vec<Fragment> {
        Fragmenter::new(4, ALGO).split(b"HelloWorldFromRTPy!").unwrap()
    }

    #[test]
    fn test_in_order_delivery() {
        let mut rx = ReceiverEngine::new(ALGO, AckMode::Individual);
        let lines: Vec<Bytes> = fragments().iter().map(line).collect();

        let acks = rx.on_batch(&lines);
        assert_eq!(acks, vec![1, 2, 3, 4, 5]);
        assert_eq!(rx.phase(), ReceiverPhase::Complete);

        let (message, stats) = rx.finish().unwrap();
        assert_eq!(&message[..], b"HelloWorldFromRTPy!");
        assert_eq!(stats.frames_accepted, 5);
        assert_eq!(stats.acks_sent, 5);
    }

    #[test]
    fn test_duplicate_is_idempotent() {
        let frags = fragments();
        let mut rx = ReceiverEngine::new(ALGO, AckMode::Individual);

        let acks = rx.on_batch(&[line(&frags[0]), line(&frags[0])]);
        assert_eq!(acks, vec![1, 1]);
        assert_eq!(rx.expected(), 1);
        assert_eq!(rx.stats().duplicates, 1);
    }

    #[test]
    fn test_acks_non_decreasing_out_of_order() {
        let frags = fragments();
        let mut rx = ReceiverEngine::new(ALGO, AckMode::Individual);
        let order = [4, 2, 0, 0, 3, 1];

        let mut acks = Vec::new();
        for idx in order {
            acks.extend(rx.on_batch(&[line(&frags[idx])]));
        }
        assert_eq!(acks, vec![0, 0, 1, 1, 1, 5]);
        assert!(acks.windows(2).all(|w| w[0] <= w[1]));
        assert!(rx.is_complete());
    }

    #[test]
    fn test_group_ack_once_per_batch() {
        let frags = fragments();
        let mut rx = ReceiverEngine::new(ALGO, AckMode::Group);

        let acks = rx.on_batch(&[line(&frags[0]), line(&frags[1]), line(&frags[2])]);
        assert_eq!(acks, vec![3]);

        // 수락된 프레임이 없는 배치는 ACK 없음
        let acks = rx.on_batch(&[corrupted_line(&frags[3])]);
        assert!(acks.is_empty());
        assert_eq!(rx.stats().acks_sent, 1);
    }

    #[test]
    fn test_invalid_frames_discarded_without_ack() {
        let frags = fragments();
        let mut rx = ReceiverEngine::new(ALGO, AckMode::Individual);

        let out_of_range = Fragment::new(7, 5, Bytes::from_static(b"zzzz"), ALGO);
        let lines = vec![
            corrupted_line(&frags[1]),
            Bytes::from_static(b"DATA|0|9|5|Hell|0000"),
            Bytes::from_static(b"garbage"),
            line(&frags[0]),
            line(&out_of_range),
        ];

        let acks = rx.on_batch(&lines);
        assert_eq!(acks, vec![1]);
        assert_eq!(rx.stats().integrity_errors, 1);
        assert_eq!(rx.stats().format_errors, 3);
        assert_eq!(rx.stats().discarded(), 4);
    }

    #[test]
    fn test_out_of_range_first_frame_does_not_poison_total() {
        let mut rx = ReceiverEngine::new(ALGO, AckMode::Individual);

        let stray = Fragment::new(9, 2, Bytes::from_static(b"zzzz"), ALGO);
        let empty = Fragment::new(0, 0, Bytes::new(), ALGO);
        assert!(rx.on_batch(&[line(&stray), line(&empty)]).is_empty());
        assert_eq!(rx.stats().format_errors, 2);
        assert_eq!(rx.total(), None);
        assert!(!rx.is_complete());

        let lines: Vec<Bytes> = fragments().iter().map(line).collect();
        assert_eq!(rx.on_batch(&lines), vec![1, 2, 3, 4, 5]);
        let (message, _) = rx.finish().unwrap();
        assert_eq!(&message[..], b"HelloWorldFromRTPy!");
    }

    #[test]
    fn test_wrong_algorithm_is_integrity_error() {
        let frags = fragments();
        let mut rx = ReceiverEngine::new(ChecksumAlgorithm::Adler32, AckMode::Individual);
        assert!(matches!(rx.on_line(&line(&frags[0])), Err(Error::Integrity { .. })));
        assert_eq!(rx.expected(), 0);
    }

    #[test]
    fn test_lines_after_completion_ignored() {
        let frags = fragments();
        let mut rx = ReceiverEngine::new(ALGO, AckMode::Individual);
        let mut lines: Vec<Bytes> = frags.iter().map(line).collect();
        lines.push(line(&frags[2]));

        assert_eq!(rx.on_batch(&lines), vec![1, 2, 3, 4, 5]);
        assert_eq!(rx.stats().duplicates, 0);
    }

    #[test]
    fn test_finish_incomplete() {
        let frags = fragments();
        let mut rx = ReceiverEngine::new(ALGO, AckMode::Individual);
        rx.on_batch(&[line(&frags[1])]);
        assert_eq!(rx.phase(), ReceiverPhase::AwaitingData);
        assert!(rx.finish().is_none());
    }

    #[tokio::test]
    async fn test_receive_message_over_stream() {
        let (a, b) = tokio::io::duplex(1024);
        let mut tx = LineStream::new(a);
        let mut rx = LineStream::new(b);

        let params = SessionParams::default();
        let task = tokio::spawn(async move { receive_message(&mut rx, &params).await });

        let frags = fragments();
        for fragment in frags.iter().rev() {
            tx.send(&Frame::Data(fragment.to_frame())).await.unwrap();
        }

        let mut last = None;
        while let Some(ack) = tx.recv_line().await.unwrap() {
            last = Some(ack.clone());
            if &ack[..] == b"ACK|5" {
                break;
            }
        }
        assert_eq!(last.as_deref(), Some(&b"ACK|5"[..]));

        let (message, _) = task.await.unwrap().unwrap();
        assert_eq!(&message[..], b"HelloWorldFromRTPy!");
    }

    #[tokio::test]
    async fn test_receive_message_peer_closed() {
        let (a, b) = tokio::io::duplex(1024);
        let mut tx = LineStream::new(a);
        let mut rx = LineStream::new(b);

        let frags = fragments();
        tx.send(&Frame::Data(frags[0].to_frame())).await.unwrap();
        drop(tx);

        let err = receive_message(&mut rx, &SessionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
