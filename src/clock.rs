//! 시계 추상화
//!
//! 버퍼와 송신자는 스스로 시간을 읽지 않는다. 호출자가 단조 증가하는
//! 시계를 넘겨준다 (실제 스택은 `SystemClock`, 시뮬레이션/테스트는 `ManualClock`).

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// 현재 시각 제공자
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// 운영체제 단조 시계
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 수동으로 진행시키는 시계 (가상 시간)
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new(start: Instant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    /// `d`만큼 시간 진행
    pub fn advance(&self, d: Duration) {
        *self.inner.lock() += d;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.inner.lock()
    }
}
