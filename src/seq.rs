//! 시퀀스 번호 공간
//!
//! RFC 793 / RFC 1982 방식의 32비트 순환(serial number) 산술.
//! 이 크레이트의 모든 시퀀스 비교는 반드시 `SeqNum`을 거친다.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// TCP 시퀀스 번호 (2^32 모듈러)
///
/// 두 값의 순서는 부호 있는 차이 `(a - b) as i32`로 정의된다.
/// 따라서 2^31 이상 떨어진 값끼리의 비교는 의미가 없다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNum(pub u32);

impl SeqNum {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// 원시 32비트 값
    pub const fn value(self) -> u32 {
        self.0
    }

    /// 부호 있는 거리 `self - other`
    pub fn distance(self, other: SeqNum) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }

    pub fn max(self, other: SeqNum) -> SeqNum {
        if self >= other {
            self
        } else {
            other
        }
    }

    pub fn min(self, other: SeqNum) -> SeqNum {
        if self <= other {
            self
        } else {
            other
        }
    }
}

impl From<u32> for SeqNum {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for SeqNum {
    fn partial_cmp(&self, other: &SeqNum) -> Option<Ordering> {
        Some(self.distance(*other).cmp(&0))
    }
}

impl Add<u32> for SeqNum {
    type Output = SeqNum;

    fn add(self, rhs: u32) -> SeqNum {
        SeqNum(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for SeqNum {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<u32> for SeqNum {
    type Output = SeqNum;

    fn sub(self, rhs: u32) -> SeqNum {
        SeqNum(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<u32> for SeqNum {
    fn sub_assign(&mut self, rhs: u32) {
        *self = *self - rhs;
    }
}

/// 두 시퀀스 사이의 바이트 수. `self < rhs`이면 호출자 버그.
impl Sub for SeqNum {
    type Output = u32;

    fn sub(self, rhs: SeqNum) -> u32 {
        let diff = self.distance(rhs);
        assert!(
            diff >= 0,
            "시퀀스 뺄셈 언더플로우: {} - {}",
            self,
            rhs
        );
        diff as u32
    }
}
