//! 송신자 (클라이언트측)
//!
//! - 슬라이딩 윈도우 (누적 ACK)
//! - 결정적 손실/변조 주입 (첫 전송에만)
//! - 타임아웃 시 [base, next) 전체 재전송
//!
//! [`SenderEngine`]은 I/O를 하지 않는 상태 기계이고 현재 시각을 인자로 받는다.
//! 스트림 위에서 돌리는 것은 [`send_message`] 담당.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::chunk::{Fragment, Fragmenter, SeqNum};
use crate::config::{FaultConfig, WindowBounds};
use crate::crypto::MessageCipher;
use crate::handshake::{propose, SessionParams};
use crate::message::{parse_ack, parse_err, DataFrame, Frame};
use crate::stats::SenderStats;
use crate::transport::{Incoming, LineStream};
use crate::{Error, Result, DEFAULT_FRAGMENT_SIZE};

/// 송신 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderPhase {
    /// 윈도우에 빈 자리가 있음
    FillingWindow,
    /// 윈도우가 가득 차서 ACK 대기
    AwaitingAck,
    /// 모든 프래그먼트 확인됨
    Done,
}

/// 윈도우 채우기 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// 와이어에 쓸 프레임 (변조되었을 수 있음)
    Send(DataFrame),
    /// 손실 주입으로 쓰지 않은 seq (in-flight로는 잡혀 있음)
    Dropped(SeqNum),
}

/// 송신 상태 기계
#[derive(Debug)]
pub struct SenderEngine {
    fragments: Vec<Fragment>,
    base: SeqNum,
    next_to_send: SeqNum,
    window_size: u32,
    in_flight: BTreeSet<SeqNum>,
    timeout: Duration,
    deadline: Option<Instant>,
    faults: FaultConfig,
    stats: SenderStats,
}

impl SenderEngine {
    pub fn new(fragments: Vec<Fragment>, window_size: u32, timeout: Duration, faults: FaultConfig) -> Self {
        let stats = SenderStats {
            fragments: fragments.len() as u32,
            ..Default::default()
        };
        Self {
            fragments,
            base: 0,
            next_to_send: 0,
            window_size: window_size.max(1),
            in_flight: BTreeSet::new(),
            timeout,
            deadline: None,
            faults,
            stats,
        }
    }

    pub fn total(&self) -> u32 {
        self.fragments.len() as u32
    }

    pub fn base(&self) -> SeqNum {
        self.base
    }

    pub fn next_to_send(&self) -> SeqNum {
        self.next_to_send
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// ACK를 기다리는 seq (손실 주입된 것 포함)
    pub fn in_flight(&self) -> impl Iterator<Item = SeqNum> + '_ {
        self.in_flight.iter().copied()
    }

    /// 재전송 마감 시각 (대기 중인 프레임이 없으면 None)
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    fn window_end(&self) -> SeqNum {
        self.base.saturating_add(self.window_size).min(self.total())
    }

    pub fn phase(&self) -> SenderPhase {
        if self.is_done() {
            SenderPhase::Done
        } else if self.next_to_send < self.window_end() {
            SenderPhase::FillingWindow
        } else {
            SenderPhase::AwaitingAck
        }
    }

    pub fn is_done(&self) -> bool {
        self.base >= self.total()
    }

    /// 윈도우를 채운다
    ///
    /// 손실 주입된 seq도 in-flight에 넣고 타이머를 건다. 첫 전송에만
    /// 장애를 주입한다.
    pub fn fill_window(&mut self, now: Instant) -> Vec<Outgoing> {
        let mut out = Vec::new();

        while self.next_to_send < self.window_end() {
            let seq = self.next_to_send;
            let fragment = &self.fragments[seq as usize];

            if self.faults.should_drop(seq) {
                self.stats.injected_drops += 1;
                out.push(Outgoing::Dropped(seq));
            } else if self.faults.should_corrupt(seq) {
                self.stats.injected_corruptions += 1;
                self.stats.frames_sent += 1;
                out.push(Outgoing::Send(fragment.to_corrupted_frame()));
            } else {
                self.stats.frames_sent += 1;
                out.push(Outgoing::Send(fragment.to_frame()));
            }

            self.in_flight.insert(seq);
            if self.deadline.is_none() {
                self.deadline = Some(now + self.timeout);
            }
            self.next_to_send += 1;
        }

        out
    }

    /// 누적 ACK 처리
    ///
    /// base를 움직였으면 true. `next <= base`는 중복, `next > next_to_send`는
    /// 보내지 않은 프레임에 대한 ACK이므로 무시한다.
    pub fn on_ack(&mut self, next: SeqNum, now: Instant) -> bool {
        if next <= self.base || next > self.next_to_send {
            if next > self.next_to_send {
                warn!(
                    "범위 밖 ACK 무시: {} (next_to_send={})",
                    next, self.next_to_send
                );
            }
            self.stats.record_ack(false);
            return false;
        }

        self.base = next;
        self.in_flight = self.in_flight.split_off(&next);
        self.deadline = if self.base == self.next_to_send {
            None
        } else {
            Some(now + self.timeout)
        };
        self.stats.record_ack(true);
        true
    }

    /// 마감 시각이 지났는지
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    /// 타임아웃 처리: [base, next_to_send)의 in-flight 전체를 정상 프레임으로 재전송
    ///
    /// SR 라벨이어도 동일하게 동작한다.
    pub fn on_timeout(&mut self, now: Instant) -> Vec<DataFrame> {
        if self.base >= self.next_to_send {
            self.deadline = None;
            return Vec::new();
        }

        let frames: Vec<DataFrame> = self
            .in_flight
            .range(self.base..self.next_to_send)
            .map(|&seq| self.fragments[seq as usize].to_frame())
            .collect();

        self.stats.timeouts += 1;
        self.stats.retransmissions += frames.len() as u64;
        self.stats.frames_sent += frames.len() as u64;
        self.deadline = Some(now + self.timeout);
        frames
    }

    pub fn into_stats(self) -> SenderStats {
        self.stats
    }
}

/// 핸드쉐이크가 끝난 스트림으로 메시지 하나를 전송
///
/// 상대방이 ERR을 보내면 [`Error::Peer`], 도중에 닫으면 [`Error::ConnectionClosed`].
pub async fn send_message<S>(
    stream: &mut LineStream<S>,
    params: &SessionParams,
    window: WindowBounds,
    message: &[u8],
    faults: FaultConfig,
) -> Result<SenderStats>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let fragments = Fragmenter::new(DEFAULT_FRAGMENT_SIZE, params.checksum).split(message)?;
    let mut engine = SenderEngine::new(fragments, window.init, params.timeout(), faults);

    info!(
        "전송 시작: {} 바이트, {} 프래그먼트, 윈도우 {}",
        message.len(),
        engine.total(),
        engine.window_size()
    );

    loop {
        for outgoing in engine.fill_window(Instant::now()) {
            match outgoing {
                Outgoing::Send(frame) => {
                    debug!("DATA -> seq={}", frame.seq);
                    stream.send(&Frame::Data(frame)).await?;
                }
                Outgoing::Dropped(seq) => debug!("손실 주입: seq={}", seq),
            }
        }

        if engine.is_done() {
            break;
        }

        match stream.recv_batch(engine.deadline()).await? {
            Incoming::Lines(lines) => {
                for line in lines {
                    if let Some(reason) = parse_err(&line) {
                        warn!("전송 중 ERR 수신: {}", reason);
                        return Err(Error::Peer(reason));
                    }
                    match parse_ack(&line) {
                        Ok(next) => {
                            let advanced = engine.on_ack(next, Instant::now());
                            debug!("ACK <- {} (base={}, advanced={})", next, engine.base(), advanced);
                        }
                        Err(e) => warn!("ACK 파싱 실패, 무시: {}", e),
                    }
                }
                // 중복 ACK만 계속 오면 타이머가 만료된 채로 남는다
                let now = Instant::now();
                if engine.is_expired(now) {
                    retransmit(stream, &mut engine, now).await?;
                }
            }
            Incoming::TimedOut => retransmit(stream, &mut engine, Instant::now()).await?,
            Incoming::Closed => {
                warn!("ACK 대기 중 연결 종료 (base={})", engine.base());
                return Err(Error::ConnectionClosed);
            }
        }
    }

    let mut stats = engine.into_stats();
    stats.elapsed = started.elapsed();
    info!("전송 완료: {}", stats.summary());
    Ok(stats)
}

async fn retransmit<S>(stream: &mut LineStream<S>, engine: &mut SenderEngine, now: Instant) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frames = engine.on_timeout(now);
    if !frames.is_empty() {
        info!(
            "타임아웃: seq {}..{} 재전송 ({}개)",
            engine.base(),
            engine.next_to_send(),
            frames.len()
        );
    }
    for frame in frames {
        stream.send(&Frame::Data(frame)).await?;
    }
    Ok(())
}

/// 메시지 송신자
///
/// 핸드쉐이크, 선택적 암호화, 전송을 한 번에 처리한다.
#[derive(Debug)]
pub struct MessageSender {
    params: SessionParams,
    faults: FaultConfig,
    cipher: Option<MessageCipher>,
}

impl MessageSender {
    pub fn new(params: SessionParams) -> Self {
        Self {
            params,
            faults: FaultConfig::none(),
            cipher: None,
        }
    }

    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_cipher(mut self, cipher: MessageCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    /// 핸드쉐이크 후 메시지 전송
    pub async fn send<S>(&self, stream: &mut LineStream<S>, message: &[u8]) -> Result<SenderStats>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let payload = match (self.params.crypto_enabled(), &self.cipher) {
            (true, Some(cipher)) => cipher.encrypt(message)?,
            (true, None) => return Err(Error::Config("crypto=ON 이지만 키가 없음".into())),
            (false, _) => message.to_vec(),
        };

        let span = info_span!("send", mode = %self.params.mode, checksum = %self.params.checksum);
        async {
            let window = propose(stream, &self.params).await?;
            send_message(stream, &self.params, window, &payload, self.faults).await
        }
        .instrument(span)
        .await
    }
}
