//! 내부 상태 조회 (테스트, 디버깅용)
//!
//! `inspect` 기능을 켜면 외부 크레이트에서도 쓸 수 있다.

use std::collections::VecDeque;

use super::{HighestSack, TxBuffer};
use crate::item::TxItem;
use crate::SeqNum;

/// 송신 버퍼 내부 조회 인터페이스
pub trait TxBufferInspect {
    /// 전송 목록 레코드
    fn sent_items(&self) -> &VecDeque<TxItem>;

    /// 미전송 큐 레코드
    fn unsent_items(&self) -> &VecDeque<TxItem>;

    /// 가장 높은 SACK 레코드 범위
    fn highest_sacked(&self) -> Option<HighestSack>;

    /// 전송 목록 레코드 경계 `(start, end)`
    fn sent_bounds(&self) -> Vec<(SeqNum, SeqNum)> {
        self.sent_items()
            .iter()
            .filter_map(|item| Some((item.start_seq()?, item.end_seq()?)))
            .collect()
    }
}

impl TxBufferInspect for TxBuffer {
    fn sent_items(&self) -> &VecDeque<TxItem> {
        &self.sent
    }

    fn unsent_items(&self) -> &VecDeque<TxItem> {
        &self.unsent
    }

    fn highest_sacked(&self) -> Option<HighestSack> {
        self.highest_sack
    }
}
