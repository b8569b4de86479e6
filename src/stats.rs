//! 송신 통계

use std::time::{Duration, Instant};

/// 송신 버퍼 + 송신자 누적 통계
#[derive(Debug, Clone)]
pub struct TxStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 애플리케이션이 넣은 총 바이트
    pub bytes_appended: u64,

    /// 처음 전송된 바이트
    pub bytes_sent: u64,

    /// 재전송된 바이트
    pub bytes_retransmitted: u64,

    /// 누적 ACK로 확인된 바이트
    pub bytes_acked: u64,

    /// 레코드 분할 횟수
    pub splits: u64,

    /// 레코드 병합 횟수
    pub merges: u64,

    /// 처리한 SACK 블록 수
    pub sack_blocks: u64,

    /// 무시된 SACK 블록 수 (범위 밖 / 경계 불일치)
    pub ignored_sack_blocks: u64,

    /// 새로 SACK된 바이트
    pub bytes_sacked: u64,

    /// 손실로 표시된 바이트
    pub bytes_marked_lost: u64,

    /// SACK 철회(renege)로 교정된 헤드 수
    pub reneged_heads: u64,

    /// 빠른 복구 진입 횟수
    pub fast_recoveries: u64,

    /// 재전송 타임아웃 횟수
    pub timeouts: u64,

    /// 중복 ACK 수
    pub dup_acks: u64,
}

impl TxStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            bytes_appended: 0,
            bytes_sent: 0,
            bytes_retransmitted: 0,
            bytes_acked: 0,
            splits: 0,
            merges: 0,
            sack_blocks: 0,
            ignored_sack_blocks: 0,
            bytes_sacked: 0,
            bytes_marked_lost: 0,
            reneged_heads: 0,
            fast_recoveries: 0,
            timeouts: 0,
            dup_acks: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 재전송 비율 (재전송 바이트 / 첫 전송 바이트)
    pub fn retransmission_ratio(&self) -> f64 {
        if self.bytes_sent == 0 {
            return 0.0;
        }
        self.bytes_retransmitted as f64 / self.bytes_sent as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Sent: {} | Retrans: {} ({:.2}%) | Acked: {} | Sacked: {} | Lost: {} | FastRecovery: {} | RTO: {} | DupAck: {} | Split/Merge: {}/{}",
            self.bytes_sent,
            self.bytes_retransmitted,
            self.retransmission_ratio() * 100.0,
            self.bytes_acked,
            self.bytes_sacked,
            self.bytes_marked_lost,
            self.fast_recoveries,
            self.timeouts,
            self.dup_acks,
            self.splits,
            self.merges,
        )
    }
}

impl Default for TxStats {
    fn default() -> Self {
        Self::new()
    }
}
