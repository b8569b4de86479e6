//! # tcptx
//!
//! TCP 송신 버퍼와 SACK 기반 손실 복구 엔진
//!
//! ## 핵심 특징
//! - **송신 버퍼**: 바이트 범위 단위로 분할/병합되는 송신 레코드 목록
//! - **SACK 스코어보드**: 레코드별 sacked/lost/retrans 플래그 + O(1) 카운터
//! - **RFC 6675**: NextSeg, pipe(bytes in flight), IsLost
//! - **Reno 흉내**: SACK 없는 연결에서 중복 ACK로 스코어보드 유지
//! - **혼잡 제어**: NewReno, Westwood+
//! - **단일 스레드**: 소켓 하나의 이벤트 처리 안에서 동기적으로 호출

pub mod buffer;
pub mod clock;
pub mod config;
pub mod congestion;
pub mod error;
pub mod item;
pub mod receiver;
pub mod sack;
pub mod sender;
pub mod seq;
pub mod stats;

pub use buffer::{HighestSack, TxBuffer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CongestionAlgorithm, Config};
pub use congestion::{CongState, CongestionOps, CongestionState, NewReno, Westwood};
pub use error::{Error, Result};
pub use item::TxItem;
pub use receiver::{AckInfo, Receiver};
pub use sack::{SackBlock, SackList, SackOption};
pub use sender::{Segment, Sender};
pub use seq::SeqNum;
pub use stats::TxStats;

#[cfg(any(test, feature = "inspect"))]
pub use buffer::inspect::TxBufferInspect;

/// 기본 송신 최대 세그먼트 크기 (RFC 879)
pub const DEFAULT_SEGMENT_SIZE: u32 = 536;

/// 기본 중복 ACK 임계값
pub const DEFAULT_DUP_ACK_THRESHOLD: u32 = 3;
