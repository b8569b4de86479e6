//! 혼잡 제어
//!
//! - `CongestionOps`: 윈도우 증가, ssthresh 계산, ACK 샘플 처리
//! - NewReno: slow start + congestion avoidance (RFC 5681)
//! - Westwood+: ACK 흐름으로 대역폭을 추정해 손실 후 ssthresh를 정한다

use std::fmt;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::config::{CongestionAlgorithm, Config};

/// 혼잡 제어 상태 (Linux의 ca_state와 같은 구분)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongState {
    /// 정상
    Open,
    /// 중복 ACK / SACK 수신, 아직 손실 판정 전
    Disorder,
    /// 빠른 복구 중
    Recovery,
    /// RTO 이후 복구 중
    Loss,
}

impl fmt::Display for CongState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CongState::Open => "OPEN",
            CongState::Disorder => "DISORDER",
            CongState::Recovery => "RECOVERY",
            CongState::Loss => "LOSS",
        };
        f.write_str(name)
    }
}

/// 혼잡 윈도우 상태
#[derive(Debug, Clone)]
pub struct CongestionState {
    /// 혼잡 윈도우 (바이트)
    pub cwnd: u32,

    /// slow start 임계값 (바이트)
    pub ssthresh: u32,

    /// SMSS
    pub segment_size: u32,

    pub state: CongState,
}

impl CongestionState {
    pub fn new(config: &Config) -> Self {
        Self {
            cwnd: config.initial_cwnd_bytes(),
            ssthresh: config.initial_ssthresh,
            segment_size: config.segment_size,
            state: CongState::Open,
        }
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// 혼잡 윈도우 (세그먼트 수)
    pub fn cwnd_segments(&self) -> u32 {
        self.cwnd / self.segment_size.max(1)
    }
}

/// 누적 ACK 하나에 대한 샘플
#[derive(Debug, Clone, Copy)]
pub struct AckSample {
    /// 새로 확인된 바이트
    pub acked_bytes: u32,

    /// 새로 확인된 세그먼트 수
    pub segments_acked: u32,

    /// 재전송되지 않은 세그먼트로 잰 RTT (Karn)
    pub rtt: Option<Duration>,

    pub now: Instant,
}

/// 혼잡 제어 알고리즘 인터페이스
pub trait CongestionOps: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    /// 손실 후 새 ssthresh (바이트)
    fn ssthresh(&self, state: &CongestionState, bytes_in_flight: u32) -> u32;

    /// 복구 밖에서 ACK를 받았을 때 윈도우 증가
    fn increase_window(&mut self, state: &mut CongestionState, segments_acked: u32);

    /// ACK 샘플 관찰 (대역폭/RTT 추정용)
    fn pkts_acked(&mut self, _state: &CongestionState, _sample: &AckSample) {}
}

/// 설정에 맞는 알고리즘 생성
pub fn build(algorithm: CongestionAlgorithm) -> Box<dyn CongestionOps> {
    match algorithm {
        CongestionAlgorithm::NewReno => Box::new(NewReno),
        CongestionAlgorithm::Westwood => Box::new(Westwood::new()),
    }
}

/// NewReno
#[derive(Debug, Clone, Copy, Default)]
pub struct NewReno;

impl NewReno {
    /// ACK된 세그먼트 하나당 SMSS씩 증가, 남은 세그먼트 수 반환
    fn slow_start(state: &mut CongestionState, segments_acked: u32) -> u32 {
        if segments_acked == 0 {
            return 0;
        }
        state.cwnd = state.cwnd.saturating_add(state.segment_size);
        trace!("slow start: cwnd={} ssthresh={}", state.cwnd, state.ssthresh);
        segments_acked - 1
    }

    /// RTT마다 약 SMSS 하나
    fn congestion_avoidance(state: &mut CongestionState) {
        let smss = state.segment_size as u64;
        let adder = (smss * smss / state.cwnd.max(1) as u64).max(1) as u32;
        state.cwnd = state.cwnd.saturating_add(adder);
        trace!("congestion avoidance: cwnd={} (+{})", state.cwnd, adder);
    }
}

impl CongestionOps for NewReno {
    fn name(&self) -> &'static str {
        "NewReno"
    }

    fn ssthresh(&self, state: &CongestionState, bytes_in_flight: u32) -> u32 {
        (bytes_in_flight / 2).max(2 * state.segment_size)
    }

    fn increase_window(&mut self, state: &mut CongestionState, segments_acked: u32) {
        let mut remaining = segments_acked;
        if state.in_slow_start() {
            remaining = Self::slow_start(state, remaining);
        }
        if !state.in_slow_start() && remaining > 0 {
            Self::congestion_avoidance(state);
        }
    }
}

/// Tustin 저역 통과 필터 계수
const WESTWOOD_ALPHA: f64 = 0.9;

/// Westwood+
///
/// RTT 한 번 동안 확인된 바이트로 대역폭 샘플을 만들고,
/// 손실이 나면 `추정 대역폭 * 최소 RTT`를 ssthresh로 쓴다.
#[derive(Debug, Clone)]
pub struct Westwood {
    /// 필터링된 대역폭 추정 (bytes/sec)
    bw_estimate: f64,

    /// 직전 대역폭 샘플 (bytes/sec)
    last_sample: f64,

    min_rtt: Option<Duration>,

    /// 최근 RTT
    last_rtt: Option<Duration>,

    /// 현재 샘플 구간에서 확인된 바이트
    acked_in_window: u64,

    /// 현재 샘플 구간 시작
    window_start: Option<Instant>,
}

impl Westwood {
    pub fn new() -> Self {
        Self {
            bw_estimate: 0.0,
            last_sample: 0.0,
            min_rtt: None,
            last_rtt: None,
            acked_in_window: 0,
            window_start: None,
        }
    }

    /// 대역폭 추정 (bytes/sec)
    pub fn bandwidth_estimate(&self) -> f64 {
        self.bw_estimate
    }

    pub fn min_rtt(&self) -> Option<Duration> {
        self.min_rtt
    }

    fn update_bandwidth(&mut self, sample: f64) {
        self.bw_estimate = WESTWOOD_ALPHA * self.bw_estimate
            + (1.0 - WESTWOOD_ALPHA) * (sample + self.last_sample) / 2.0;
        self.last_sample = sample;
        trace!(
            "Westwood 대역폭 샘플 {:.0} B/s, 추정 {:.0} B/s",
            sample,
            self.bw_estimate
        );
    }
}

impl Default for Westwood {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionOps for Westwood {
    fn name(&self) -> &'static str {
        "Westwood"
    }

    fn ssthresh(&self, state: &CongestionState, bytes_in_flight: u32) -> u32 {
        let floor = 2 * state.segment_size;
        match self.min_rtt {
            Some(min_rtt) if self.bw_estimate > 0.0 => {
                let bdp = self.bw_estimate * min_rtt.as_secs_f64();
                (bdp.min(u32::MAX as f64) as u32).max(floor)
            }
            _ => (bytes_in_flight / 2).max(floor),
        }
    }

    fn increase_window(&mut self, state: &mut CongestionState, segments_acked: u32) {
        NewReno.increase_window(state, segments_acked);
    }

    fn pkts_acked(&mut self, _state: &CongestionState, sample: &AckSample) {
        if let Some(rtt) = sample.rtt {
            self.last_rtt = Some(rtt);
            if self.min_rtt.map_or(true, |min| rtt < min) {
                self.min_rtt = Some(rtt);
            }
        }

        let Some(start) = self.window_start else {
            self.window_start = Some(sample.now);
            return;
        };
        self.acked_in_window += sample.acked_bytes as u64;

        // 샘플 구간: 최소 RTT 하나
        let Some(interval) = self.last_rtt else {
            return;
        };
        let elapsed = sample.now.saturating_duration_since(start);
        if elapsed < interval || elapsed.is_zero() {
            return;
        }

        let bw = self.acked_in_window as f64 / elapsed.as_secs_f64();
        self.update_bandwidth(bw);
        self.acked_in_window = 0;
        self.window_start = Some(sample.now);
    }
}
