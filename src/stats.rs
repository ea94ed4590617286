//! 전송 통계

use std::time::Duration;

/// 송신측 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// 메시지 프래그먼트 수
    pub fragments: u32,

    /// 와이어에 실제로 쓴 DATA 프레임 수 (재전송 포함)
    pub frames_sent: u64,

    /// 타임아웃으로 재전송한 프레임 수
    pub retransmissions: u64,

    /// 타임아웃 발생 횟수
    pub timeouts: u64,

    /// 손실 시뮬레이션으로 버린 프레임 수
    pub injected_drops: u64,

    /// 변조 시뮬레이션으로 망가뜨린 프레임 수
    pub injected_corruptions: u64,

    /// 수신한 ACK 수
    pub acks_received: u64,

    /// base를 움직이지 못한 ACK 수
    pub duplicate_acks: u64,

    /// 전송 소요 시간
    pub elapsed: Duration,
}

impl SenderStats {
    pub fn record_ack(&mut self, advanced: bool) {
        self.acks_received += 1;
        if !advanced {
            self.duplicate_acks += 1;
        }
    }

    /// 재전송 비율 (재전송 / 전체 전송)
    pub fn retransmit_ratio(&self) -> f64 {
        if self.frames_sent == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.frames_sent as f64
    }

    pub fn summary(&self) -> String {
        format!(
            "fragments={} sent={} retransmitted={} ({:.1}%) timeouts={} dropped={} corrupted={} acks={} dup_acks={} elapsed={:.1}ms",
            self.fragments,
            self.frames_sent,
            self.retransmissions,
            self.retransmit_ratio() * 100.0,
            self.timeouts,
            self.injected_drops,
            self.injected_corruptions,
            self.acks_received,
            self.duplicate_acks,
            self.elapsed.as_secs_f64() * 1000.0
        )
    }
}

/// 수신측 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// 형식과 체크섬을 통과한 프레임 수 (중복 포함)
    pub frames_accepted: u64,

    /// 이미 받은 seq
    pub duplicates: u64,

    /// 형식 오류로 폐기
    pub format_errors: u64,

    /// 체크섬 오류로 폐기
    pub integrity_errors: u64,

    pub acks_sent: u64,

    pub elapsed: Duration,
}

impl ReceiverStats {
    /// 폐기된 프레임 수
    pub fn discarded(&self) -> u64 {
        self.format_errors + self.integrity_errors
    }

    pub fn summary(&self) -> String {
        format!(
            "accepted={} duplicates={} format_errors={} integrity_errors={} acks={} elapsed={:.1}ms",
            self.frames_accepted,
            self.duplicates,
            self.format_errors,
            self.integrity_errors,
            self.acks_sent,
            self.elapsed.as_secs_f64() * 1000.0
        )
    }
}
