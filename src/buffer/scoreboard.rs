//! SACK 스코어보드
//!
//! - SACK 블록 반영 (`update`)과 손실 재계산
//! - SACK 없는 연결용 힌트 (Reno SACK 흉내, 헤드 손실, RTO 후 전체 손실)

use tracing::{debug, trace, warn};

use super::{HighestSack, TxBuffer};
use crate::item::TxItem;
use crate::sack::{max_blocks_for, SackBlock, SackList};
use crate::SeqNum;

impl TxBuffer {
    /// SACK 블록 목록 반영
    ///
    /// 반환값: 스코어보드가 바뀌었는지 (false면 중복 SACK)
    pub fn update(&mut self, blocks: &[SackBlock]) -> bool {
        self.update_with(blocks, |_| {})
    }

    /// `update` + 새로 SACK된 레코드마다 콜백
    pub fn update_with<F>(&mut self, blocks: &[SackBlock], mut on_sacked: F) -> bool
    where
        F: FnMut(&TxItem),
    {
        self.debug_check();

        let first = self.first_byte_seq;
        let sent_end = first + self.sent_size;
        let mut modified = false;

        for block in blocks {
            self.stats.sack_blocks += 1;

            if block.is_empty() || block.left >= sent_end || block.right <= first {
                debug!("SACK 블록 {} 무시 (전송 범위 [{};{}] 밖)", block, first, sent_end);
                self.stats.ignored_sack_blocks += 1;
                continue;
            }

            let mut begin = first;
            let mut matched = false;
            for i in 0..self.sent.len() {
                let end = begin + self.sent[i].size();
                if block.covers(begin, end) {
                    matched = true;
                    if i == 0 {
                        // 헤드는 누적 ACK로만 확인된다
                        trace!("헤드 {}를 덮는 SACK 블록 {}", self.sent[0], block);
                    } else if !self.sent[i].sacked {
                        self.mark_sacked(i);
                        on_sacked(&self.sent[i]);
                        if self.highest_sack.map_or(true, |hs| hs.end <= end) {
                            self.highest_sack = Some(HighestSack { start: begin, end });
                        }
                        modified = true;
                    }
                } else if end > block.right {
                    break;
                }
                begin = end;
            }

            if !matched {
                trace!("SACK 블록 {}이 레코드 경계와 맞지 않음", block);
                self.stats.ignored_sack_blocks += 1;
            }
        }

        if modified {
            self.update_lost_count();
        }

        self.debug_check();
        modified
    }

    /// 레코드를 SACK 상태로 (lost/retrans 기여분 제거)
    fn mark_sacked(&mut self, idx: usize) {
        let item = &mut self.sent[idx];
        let size = item.size();
        if item.lost {
            item.lost = false;
            self.lost_out -= size;
        }
        if item.retrans {
            item.retrans = false;
            self.retrans -= size;
        }
        item.sacked = true;
        self.sacked_out += size;
        self.stats.bytes_sacked += size as u64;
        trace!("SACK {}", item);
    }

    /// 레코드를 손실 상태로 (이미 손실이면 그대로)
    fn mark_lost(&mut self, idx: usize) {
        let item = &mut self.sent[idx];
        if item.lost {
            return;
        }
        let size = item.size();
        item.lost = true;
        self.lost_out += size;
        self.stats.bytes_marked_lost += size as u64;
        trace!("손실 {}", item);
    }

    /// highest SACK에서 헤드 방향으로 걸으며 손실 표시
    ///
    /// 지나온 SACK 레코드가 dup_ack_threshold개에 이르면 그 아래의
    /// SACK되지 않은 레코드는 모두 손실이다.
    pub(crate) fn update_lost_count(&mut self) {
        let Some(top) = self.highest_sack_index() else {
            return;
        };

        let mut sacked = 0u32;
        for i in (0..=top).rev() {
            if self.sent[i].sacked {
                sacked += 1;
            } else if sacked >= self.dup_ack_threshold {
                self.mark_lost(i);
            }
        }

        debug!("손실 재계산: lost={} sacked={}", self.lost_out, self.sacked_out);
    }

    /// 헤드를 손실로 표시 (SACK/재전송 플래그 해제)
    pub fn mark_head_as_lost(&mut self) {
        let Some(head) = self.sent.front_mut() else {
            trace!("전송 목록이 비어 헤드 손실 표시 생략");
            return;
        };

        let size = head.size();
        if head.sacked {
            head.sacked = false;
            self.sacked_out -= size;
        }
        if head.retrans {
            head.retrans = false;
            self.retrans -= size;
        }
        self.mark_lost(0);
        debug!("헤드 손실 표시 {}", self.sent[0]);
        self.debug_check();
    }

    /// 중복 ACK 하나를 SACK 하나로 흉내: 헤드 다음의 첫 미SACK 레코드
    pub fn add_reno_sack(&mut self) {
        let found = (1..self.sent.len()).find(|&i| !self.sent[i].sacked);
        let Some(idx) = found else {
            warn!("Reno SACK을 붙일 레코드 없음: {}", self);
            return;
        };

        self.mark_sacked(idx);
        if let (Some(start), Some(end)) = (self.sent[idx].start_seq(), self.sent[idx].end_seq()) {
            if self.highest_sack.map_or(true, |hs| hs.end <= end) {
                self.highest_sack = Some(HighestSack { start, end });
            }
        }
        self.debug_check();
    }

    /// Reno SACK 흉내 전부 취소
    pub fn reset_reno_sack(&mut self) {
        for item in self.sent.iter_mut() {
            item.sacked = false;
        }
        self.sacked_out = 0;
        self.highest_sack = None;
        trace!("Reno SACK 초기화");
        self.debug_check();
    }

    /// RTO 이후: 전송 목록 전체를 손실로
    ///
    /// `reset_sack`이면 SACK 정보도 버린다 (수신자가 renege했을 수 있음).
    /// 아니면 SACK된 레코드는 그대로 두고 나머지만 손실로 표시한다.
    pub fn set_sent_list_lost(&mut self, reset_sack: bool) {
        self.retrans = 0;
        if reset_sack {
            self.sacked_out = 0;
            self.highest_sack = None;
        }

        for i in 0..self.sent.len() {
            let item = &mut self.sent[i];
            item.retrans = false;
            if reset_sack {
                item.sacked = false;
            }
            if !item.sacked {
                self.mark_lost(i);
            }
        }

        debug!(
            "전송 목록 전체 손실 (reset_sack={}): lost={} sacked={}",
            reset_sack, self.lost_out, self.sacked_out
        );
        self.debug_check();
    }

    /// 전송 목록을 미전송 큐 앞으로 되돌린다 (플래그, 카운터 초기화)
    pub fn reset_sent_list(&mut self) {
        while let Some(mut item) = self.sent.pop_back() {
            item.start_seq = None;
            item.lost = false;
            item.retrans = false;
            item.sacked = false;
            self.unsent.push_front(item);
        }

        self.sent_size = 0;
        self.lost_out = 0;
        self.sacked_out = 0;
        self.retrans = 0;
        self.highest_sack = None;

        debug!("전송 목록 초기화, 미전송 {} bytes", self.size);
        self.debug_check();
    }

    /// `seq`가 든 세그먼트만 빼고 모두 받은 수신자의 SACK 옵션 흉내
    ///
    /// 첫 블록은 `seq` 레코드 다음의 첫 미SACK 레코드, 이어서 이미 SACK된
    /// 레코드를 뒤로 걸으며 하나씩. 최대 `max_blocks_for(available)`개.
    pub fn craft_sack_option(&self, seq: SeqNum, available: usize) -> SackList {
        let max_blocks = max_blocks_for(available);
        let mut blocks = SackList::new();
        if max_blocks == 0 {
            return blocks;
        }

        let Some(lost_idx) = self.index_of(seq) else {
            return blocks;
        };
        let Some(newest) = (lost_idx + 1..self.sent.len()).find(|&i| !self.sent[i].sacked) else {
            return blocks;
        };

        blocks.push(self.block_of(newest));
        for i in (lost_idx + 1..newest).rev() {
            if blocks.len() >= max_blocks {
                break;
            }
            if self.sent[i].sacked {
                blocks.push(self.block_of(i));
            }
        }

        trace!("SACK 옵션 생성 {:?}", blocks);
        blocks
    }

    fn block_of(&self, idx: usize) -> SackBlock {
        let item = &self.sent[idx];
        match (item.start_seq(), item.end_seq()) {
            (Some(start), Some(end)) => SackBlock::new(start, end),
            _ => unreachable!("전송 레코드에 시작 시퀀스 없음"),
        }
    }
}
