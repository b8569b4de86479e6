//! 송신자
//!
//! - 송신 버퍼 위의 손실 복구 상태 머신 (Open / Disorder / Recovery / Loss)
//! - SACK 스코어보드 또는 중복 ACK 기반 Reno 흉내
//! - RFC 6675 pipe로 전송 허용량 계산, RFC 6582 부분 ACK 처리

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::buffer::TxBuffer;
use crate::clock::{Clock, SystemClock};
use crate::congestion::{self, AckSample, CongState, CongestionOps, CongestionState};
use crate::sack::SackBlock;
use crate::stats::TxStats;
use crate::{Config, Result, SeqNum};

/// 전송할 세그먼트
#[derive(Debug, Clone)]
pub struct Segment {
    pub seq: SeqNum,
    pub payload: Bytes,

    /// 이미 한 번 보낸 범위인지
    pub retransmission: bool,
}

impl Segment {
    pub fn end_seq(&self) -> SeqNum {
        self.seq + self.payload.len() as u32
    }
}

/// 송신자
pub struct Sender {
    /// 설정
    config: Config,

    /// 송신 버퍼
    buffer: TxBuffer,

    /// 혼잡 제어 알고리즘
    ops: Box<dyn CongestionOps>,

    /// 윈도우 상태
    cc: CongestionState,

    clock: Arc<dyn Clock>,

    /// 지금까지 보낸 가장 높은 시퀀스 + 1
    high_tx: SeqNum,

    /// 복구 종료 지점
    recover: SeqNum,

    /// 연속 중복 ACK 수
    dup_acks: u32,

    /// 다음 poll에서 헤드를 윈도우와 무관하게 재전송
    retransmit_head: bool,

    /// 평활 RTT (RFC 6298)
    srtt: Option<Duration>,
    rttvar: Duration,
}

impl Sender {
    /// 새 송신자 생성 (시스템 시계)
    pub fn new(config: Config, isn: SeqNum) -> Result<Self> {
        Self::with_clock(config, isn, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, isn: SeqNum, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let mut buffer = TxBuffer::with_clock(&config, clock.clone());
        buffer.set_head_sequence(isn);

        let ops = congestion::build(config.congestion);
        info!(
            "송신자 생성: isn={} smss={} cwnd={} {} (SACK {})",
            isn,
            config.segment_size,
            config.initial_cwnd_bytes(),
            ops.name(),
            if config.sack_enabled { "on" } else { "off" }
        );

        Ok(Self {
            cc: CongestionState::new(&config),
            config,
            buffer,
            ops,
            clock,
            high_tx: isn,
            recover: isn,
            dup_acks: 0,
            retransmit_head: false,
            srtt: None,
            rttvar: Duration::ZERO,
        })
    }

    /// 애플리케이션 데이터 큐잉
    pub fn send(&mut self, data: impl Into<Bytes>) -> Result<()> {
        self.buffer.append(data)
    }

    pub fn buffer(&self) -> &TxBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> &TxStats {
        self.buffer.stats()
    }

    pub fn cwnd(&self) -> u32 {
        self.cc.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.cc.ssthresh
    }

    pub fn state(&self) -> CongState {
        self.cc.state
    }

    pub fn congestion_state(&self) -> &CongestionState {
        &self.cc
    }

    pub fn algorithm(&self) -> &'static str {
        self.ops.name()
    }

    pub fn high_tx(&self) -> SeqNum {
        self.high_tx
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    pub fn bytes_in_flight(&self) -> u32 {
        self.buffer.bytes_in_flight()
    }

    /// 보낼 것도 확인받을 것도 없음
    pub fn is_idle(&self) -> bool {
        self.buffer.size() == 0
    }

    /// 미전송 데이터의 시작 (SND.NXT)
    fn snd_nxt(&self) -> SeqNum {
        self.buffer.head_sequence() + self.buffer.sent_size()
    }

    /// 윈도우가 허락하면 다음 세그먼트를 꺼낸다
    pub fn poll_transmit(&mut self) -> Option<Segment> {
        if self.retransmit_head {
            self.retransmit_head = false;
            if self.buffer.sent_size() > 0 {
                let head = self.buffer.head_sequence();
                debug!("빠른 재전송 {}", head);
                return Some(self.transmit(head));
            }
        }

        let in_flight = self.buffer.bytes_in_flight();
        let room = self.cc.cwnd.saturating_sub(in_flight);
        if in_flight > 0 && room < self.cc.segment_size {
            return None;
        }

        // 규칙 3은 실제 SACK 스코어보드에서만
        let rule3 = self.cc.state == CongState::Recovery && self.config.sack_enabled;
        let seq = self.buffer.next_seg(rule3)?;
        if seq == self.snd_nxt()
            && self.cc.state == CongState::Disorder
            && !self.config.limited_transmit
        {
            return None;
        }

        Some(self.transmit(seq))
    }

    fn transmit(&mut self, seq: SeqNum) -> Segment {
        let retransmission = seq < self.snd_nxt();
        let payload = self.buffer.copy_from_sequence(self.cc.segment_size, seq);
        let segment = Segment {
            seq,
            payload,
            retransmission,
        };

        if segment.end_seq() > self.high_tx {
            self.high_tx = segment.end_seq();
        }
        trace!(
            "전송 [{};{}]{} cwnd={} pipe={}",
            segment.seq,
            segment.end_seq(),
            if retransmission { " (재전송)" } else { "" },
            self.cc.cwnd,
            self.buffer.bytes_in_flight()
        );
        segment
    }

    /// 누적 ACK + SACK 블록 처리
    pub fn on_ack(&mut self, ack: SeqNum, sack: &[SackBlock]) {
        let una = self.buffer.head_sequence();
        if ack < una {
            trace!("오래된 ACK {} (una={})", ack, una);
            return;
        }
        if ack > self.high_tx {
            warn!("보내지 않은 데이터에 대한 ACK {} (high_tx={})", ack, self.high_tx);
            return;
        }

        if ack == una {
            let changed = self.config.sack_enabled && self.buffer.update(sack);
            let outstanding = self.buffer.sent_size() > 0;
            if outstanding && (!self.config.sack_enabled || sack.is_empty() || changed) {
                self.on_dup_ack();
            }
            return;
        }

        let (acked_bytes, rtt) = self.acknowledge(ack);
        if self.config.sack_enabled && !sack.is_empty() {
            self.buffer.update(sack);
        }
        self.dup_acks = 0;

        match self.cc.state {
            CongState::Recovery if ack < self.recover => self.on_partial_ack(acked_bytes),
            CongState::Recovery => {
                self.cc.cwnd = self.cc.ssthresh;
                self.set_state(CongState::Open);
            }
            CongState::Loss => {
                if ack >= self.recover {
                    self.set_state(CongState::Open);
                }
                self.grow_window(acked_bytes);
            }
            CongState::Open | CongState::Disorder => {
                self.set_state(CongState::Open);
                self.grow_window(acked_bytes);
            }
        }

        let sample = AckSample {
            acked_bytes,
            segments_acked: self.segments_for(acked_bytes),
            rtt,
            now: self.clock.now(),
        };
        self.ops.pkts_acked(&self.cc, &sample);
    }

    /// 새로 확인된 데이터 제거, RTT 샘플 (재전송된 레코드는 제외)
    fn acknowledge(&mut self, ack: SeqNum) -> (u32, Option<Duration>) {
        let una = self.buffer.head_sequence();
        if !self.config.sack_enabled {
            // 흉내 낸 SACK은 새 ACK가 오면 의미가 없다
            self.buffer.reset_reno_sack();
        }

        let now = self.clock.now();
        let mut rtt = None;
        self.buffer.discard_up_to_with(ack, |item| {
            if item.is_retransmitted() || item.is_lost() || item.is_sacked() {
                return;
            }
            if let Some(sent) = item.last_sent() {
                rtt = Some(now.saturating_duration_since(sent));
            }
        });

        if let Some(sample) = rtt {
            self.update_rtt(sample);
        }
        (ack - una, rtt)
    }

    fn update_rtt(&mut self, sample: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = sample / 2;
            }
            Some(srtt) => {
                let delta = if srtt > sample { srtt - sample } else { sample - srtt };
                self.rttvar = (self.rttvar * 3 + delta) / 4;
                self.srtt = Some((srtt * 7 + sample) / 8);
            }
        }
        trace!("RTT 샘플 {:?}, srtt={:?}", sample, self.srtt);
    }

    fn segments_for(&self, bytes: u32) -> u32 {
        let smss = self.cc.segment_size.max(1);
        (bytes + smss - 1) / smss
    }

    fn grow_window(&mut self, acked_bytes: u32) {
        let segments = self.segments_for(acked_bytes);
        self.ops.increase_window(&mut self.cc, segments);
    }

    fn on_dup_ack(&mut self) {
        self.dup_acks += 1;
        self.buffer.stats_mut().dup_acks += 1;
        if !self.config.sack_enabled {
            self.buffer.add_reno_sack();
        }

        match self.cc.state {
            CongState::Open => self.set_state(CongState::Disorder),
            CongState::Disorder => {}
            CongState::Recovery => {
                if !self.config.sack_enabled {
                    // Reno: 중복 ACK마다 윈도우 팽창
                    self.cc.cwnd = self.cc.cwnd.saturating_add(self.cc.segment_size);
                }
                return;
            }
            CongState::Loss => return,
        }

        let una = self.buffer.head_sequence();
        if self.dup_acks >= self.config.dup_ack_threshold || self.buffer.is_lost(una) {
            self.enter_recovery();
        }
    }

    fn enter_recovery(&mut self) {
        self.recover = self.high_tx;
        self.cc.ssthresh = self.ops.ssthresh(&self.cc, self.buffer.bytes_in_flight());
        self.buffer.mark_head_as_lost();

        self.cc.cwnd = if self.config.sack_enabled {
            self.cc.ssthresh
        } else {
            self.cc.ssthresh + self.dup_acks * self.cc.segment_size
        };
        self.retransmit_head = true;
        self.buffer.stats_mut().fast_recoveries += 1;
        self.set_state(CongState::Recovery);

        info!(
            "빠른 복구 진입: recover={} ssthresh={} cwnd={} dupacks={}",
            self.recover, self.cc.ssthresh, self.cc.cwnd, self.dup_acks
        );
    }

    /// RFC 6582: 확인된 만큼 윈도우 수축, 다음 구멍 재전송
    fn on_partial_ack(&mut self, acked_bytes: u32) {
        self.buffer.mark_head_as_lost();

        self.cc.cwnd = self.cc.cwnd.saturating_sub(acked_bytes);
        if acked_bytes >= self.cc.segment_size {
            self.cc.cwnd += self.cc.segment_size;
        }
        self.retransmit_head = true;
        debug!(
            "부분 ACK {} bytes: una={} recover={} cwnd={}",
            acked_bytes,
            self.buffer.head_sequence(),
            self.recover,
            self.cc.cwnd
        );
    }

    /// 재전송 타이머 만료
    pub fn on_retransmission_timeout(&mut self) {
        if self.buffer.sent_size() == 0 {
            trace!("RTO: 미확인 데이터 없음");
            return;
        }

        self.cc.ssthresh = self.ops.ssthresh(&self.cc, self.buffer.bytes_in_flight());
        self.cc.cwnd = self.cc.segment_size;
        self.recover = self.high_tx;
        self.dup_acks = 0;
        self.retransmit_head = false;
        self.buffer.set_sent_list_lost(true);
        self.buffer.stats_mut().timeouts += 1;
        self.set_state(CongState::Loss);

        warn!(
            "재전송 타임아웃: una={} recover={} ssthresh={}",
            self.buffer.head_sequence(),
            self.recover,
            self.cc.ssthresh
        );
    }

    fn set_state(&mut self, state: CongState) {
        if self.cc.state != state {
            debug!("{} -> {}", self.cc.state, state);
            self.cc.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CongestionAlgorithm;

    const ISN: u32 = 1000;

    fn config(sack: bool) -> Config {
        Config {
            segment_size: 100,
            sack_enabled: sack,
            ..Config::default()
        }
    }

    fn sender(config: Config, bytes: usize) -> (Sender, ManualClock) {
        let clock = ManualClock::default();
        let mut sender = Sender::with_clock(config, SeqNum(ISN), Arc::new(clock.clone())).unwrap();
        sender.send(vec![7u8; bytes]).unwrap();
        (sender, clock)
    }

    fn drain(sender: &mut Sender) -> Vec<Segment> {
        std::iter::from_fn(|| sender.poll_transmit()).collect()
    }

    fn sack(left: u32, right: u32) -> SackBlock {
        SackBlock::new(SeqNum(left), SeqNum(right))
    }

    #[test]
    fn test_initial_window_and_slow_start() {
        let (mut sender, _) = sender(config(true), 5000);

        let segs = drain(&mut sender);
        assert_eq!(segs.len(), 10);
        assert_eq!(segs[0].seq, SeqNum(ISN));
        assert!(segs.iter().all(|s| !s.retransmission));
        assert_eq!(sender.bytes_in_flight(), 1000);

        for seg in &segs {
            sender.on_ack(seg.end_seq(), &[]);
        }
        assert_eq!(sender.cwnd(), 2000);
        assert_eq!(sender.state(), CongState::Open);
        assert_eq!(drain(&mut sender).len(), 20);
    }

    #[test]
    fn test_sack_fast_retransmit_and_full_ack() {
        let (mut sender, _) = sender(config(true), 1200);
        assert_eq!(drain(&mut sender).len(), 10);

        // 첫 세그먼트 손실, 중복 ACK마다 limited transmit
        sender.on_ack(SeqNum(ISN), &[sack(1100, 1200)]);
        assert_eq!(sender.state(), CongState::Disorder);
        let segs = drain(&mut sender);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].seq, SeqNum(2000));

        sender.on_ack(SeqNum(ISN), &[sack(1100, 1300)]);
        assert_eq!(drain(&mut sender)[0].seq, SeqNum(2100));

        // 같은 SACK 반복은 중복 ACK가 아니다
        sender.on_ack(SeqNum(ISN), &[sack(1100, 1300)]);
        assert_eq!(sender.stats().dup_acks, 2);

        sender.on_ack(SeqNum(ISN), &[sack(1100, 1400)]);
        assert_eq!(sender.state(), CongState::Recovery);
        assert_eq!(sender.ssthresh(), 400);
        assert_eq!(sender.cwnd(), 400);

        let segs = drain(&mut sender);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].seq, SeqNum(ISN));
        assert!(segs[0].retransmission);

        sender.on_ack(SeqNum(2200), &[]);
        assert_eq!(sender.state(), CongState::Open);
        assert_eq!(sender.cwnd(), 400);
        assert_eq!(sender.bytes_in_flight(), 0);
        assert!(sender.is_idle());
        assert_eq!(sender.stats().fast_recoveries, 1);
    }

    #[test]
    fn test_reno_recovery_with_partial_ack() {
        let (mut sender, _) = sender(config(false), 2000);
        assert_eq!(drain(&mut sender).len(), 10);

        sender.on_ack(SeqNum(ISN), &[]);
        assert_eq!(drain(&mut sender)[0].seq, SeqNum(2000));
        sender.on_ack(SeqNum(ISN), &[]);
        assert_eq!(drain(&mut sender)[0].seq, SeqNum(2100));

        sender.on_ack(SeqNum(ISN), &[]);
        assert_eq!(sender.state(), CongState::Recovery);
        assert_eq!(sender.ssthresh(), 450);
        assert_eq!(sender.cwnd(), 750);

        let segs = drain(&mut sender);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].seq, SeqNum(ISN));
        assert!(segs[0].retransmission);

        // 팽창
        sender.on_ack(SeqNum(ISN), &[]);
        assert_eq!(sender.cwnd(), 850);

        // 부분 ACK: 다음 구멍을 바로 재전송
        sender.on_ack(SeqNum(1500), &[]);
        assert_eq!(sender.state(), CongState::Recovery);
        assert_eq!(sender.cwnd(), 450);
        assert_eq!(sender.buffer().get_sacked(), 0);
        let segs = drain(&mut sender);
        assert_eq!(segs[0].seq, SeqNum(1500));
        assert!(segs[0].retransmission);

        sender.on_ack(SeqNum(2200), &[]);
        assert_eq!(sender.state(), CongState::Open);
        assert_eq!(sender.cwnd(), 450);
    }

    #[test]
    fn test_reno_recovery_without_new_data_resends_only_head() {
        let (mut sender, _) = sender(config(false), 1000);
        assert_eq!(drain(&mut sender).len(), 10);

        let mut retransmitted = Vec::new();
        for _ in 0..6 {
            sender.on_ack(SeqNum(ISN), &[]);
            retransmitted.extend(drain(&mut sender).iter().map(|s| s.seq));
        }

        assert_eq!(sender.state(), CongState::Recovery);
        assert_eq!(retransmitted, vec![SeqNum(ISN)]);
        assert_eq!(sender.stats().bytes_retransmitted, 100);
    }

    #[test]
    fn test_retransmission_timeout() {
        let (mut sender, _) = sender(config(true), 1000);
        assert_eq!(drain(&mut sender).len(), 10);

        sender.on_retransmission_timeout();
        assert_eq!(sender.state(), CongState::Loss);
        assert_eq!(sender.cwnd(), 100);
        assert_eq!(sender.ssthresh(), 500);
        assert_eq!(sender.buffer().get_lost(), 1000);
        assert_eq!(sender.stats().timeouts, 1);

        let segs = drain(&mut sender);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].seq, SeqNum(ISN));
        assert!(segs[0].retransmission);

        sender.on_ack(SeqNum(1100), &[]);
        assert_eq!(sender.state(), CongState::Loss);
        assert_eq!(sender.cwnd(), 200);
        let segs = drain(&mut sender);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].seq, SeqNum(1100));
        assert_eq!(segs[1].seq, SeqNum(1200));

        sender.on_ack(SeqNum(2000), &[]);
        assert_eq!(sender.state(), CongState::Open);
    }

    #[test]
    fn test_timeout_without_outstanding_data_is_ignored() {
        let (mut sender, _) = sender(config(true), 0);
        sender.on_retransmission_timeout();
        assert_eq!(sender.state(), CongState::Open);
        assert_eq!(sender.stats().timeouts, 0);
    }

    #[test]
    fn test_rtt_sample_skips_retransmissions() {
        let (mut sender, clock) = sender(config(true), 300);
        let segs = drain(&mut sender);
        assert_eq!(segs.len(), 3);

        clock.advance(Duration::from_millis(50));
        sender.on_ack(SeqNum(1100), &[]);
        assert_eq!(sender.srtt(), Some(Duration::from_millis(50)));

        sender.on_retransmission_timeout();
        let retx = drain(&mut sender);
        assert!(retx[0].retransmission);

        clock.advance(Duration::from_millis(500));
        sender.on_ack(SeqNum(1200), &[]);
        assert_eq!(sender.srtt(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_ignores_invalid_acks() {
        let (mut sender, _) = sender(config(true), 500);
        drain(&mut sender);

        sender.on_ack(SeqNum(ISN - 10), &[]);
        sender.on_ack(SeqNum(9000), &[]);
        assert_eq!(sender.buffer().head_sequence(), SeqNum(ISN));
        assert_eq!(sender.stats().dup_acks, 0);
    }

    #[test]
    fn test_no_limited_transmit() {
        let config = Config {
            limited_transmit: false,
            ..config(true)
        };
        let (mut sender, _) = sender(config, 2000);
        drain(&mut sender);

        sender.on_ack(SeqNum(ISN), &[sack(1100, 1200)]);
        assert_eq!(sender.state(), CongState::Disorder);
        assert!(sender.poll_transmit().is_none());
    }

    #[test]
    fn test_westwood_sender() {
        let config = Config {
            congestion: CongestionAlgorithm::Westwood,
            ..config(true)
        };
        let (sender, _) = sender(config, 100);
        assert_eq!(sender.algorithm(), "Westwood");
    }
}
