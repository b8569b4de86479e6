//! 송신 설정

use crate::{Error, Result, DEFAULT_DUP_ACK_THRESHOLD, DEFAULT_SEGMENT_SIZE};

/// 혼잡 제어 알고리즘
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionAlgorithm {
    NewReno,
    Westwood,
}

/// 송신 측 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 송신 버퍼 최대 크기 (바이트)
    pub max_buffer_size: u32,

    /// 송신 최대 세그먼트 크기 SMSS (바이트)
    pub segment_size: u32,

    /// 손실 판정에 필요한 중복 ACK / SACK 세그먼트 수
    pub dup_ack_threshold: u32,

    /// 초기 혼잡 윈도우 (세그먼트 수)
    pub initial_cwnd: u32,

    /// 초기 slow start 임계값 (바이트)
    pub initial_ssthresh: u32,

    /// SACK 스코어보드 사용 여부
    /// false면 중복 ACK 수로 SACK을 흉내 낸다 (Reno)
    pub sack_enabled: bool,

    /// RFC 3042 limited transmit
    pub limited_transmit: bool,

    /// 혼잡 제어 알고리즘
    pub congestion: CongestionAlgorithm,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_buffer_size: 128 * 1024,          // 128KB
            segment_size: DEFAULT_SEGMENT_SIZE,
            dup_ack_threshold: DEFAULT_DUP_ACK_THRESHOLD,
            initial_cwnd: 10,
            initial_ssthresh: u32::MAX,
            sack_enabled: true,
            limited_transmit: true,
            congestion: CongestionAlgorithm::NewReno,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// SACK 없는 고전 NewReno 설정
    pub fn reno() -> Self {
        Self {
            sack_enabled: false,
            ..Self::default()
        }
    }

    /// 대역폭-지연 곱이 큰 링크용 설정
    pub fn high_bdp() -> Self {
        Self {
            max_buffer_size: 4 * 1024 * 1024, // 4MB
            segment_size: 1448,
            initial_cwnd: 10,
            congestion: CongestionAlgorithm::Westwood,
            ..Self::default()
        }
    }

    /// 초기 혼잡 윈도우 (바이트)
    pub fn initial_cwnd_bytes(&self) -> u32 {
        self.initial_cwnd.saturating_mul(self.segment_size)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.segment_size == 0 {
            return Err(Error::InvalidConfig("segment_size는 0일 수 없음".into()));
        }
        if self.dup_ack_threshold == 0 {
            return Err(Error::InvalidConfig("dup_ack_threshold는 0일 수 없음".into()));
        }
        if self.initial_cwnd == 0 {
            return Err(Error::InvalidConfig("initial_cwnd는 0일 수 없음".into()));
        }
        if self.max_buffer_size < self.segment_size {
            return Err(Error::InvalidConfig(format!(
                "max_buffer_size({})가 segment_size({})보다 작음",
                self.max_buffer_size, self.segment_size
            )));
        }
        Ok(())
    }
}
