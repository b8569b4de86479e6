//! 수신자 (참조 구현)
//!
//! - 순서대로 온 데이터는 바로 전달, 순서가 어긋난 데이터는 보관
//! - 누적 ACK + SACK 블록 생성 (RFC 2018: 가장 최근 세그먼트가 든 블록이 먼저)
//! - 시뮬레이터와 테스트에서 송신자의 상대편으로 쓴다

use std::collections::{BTreeMap, VecDeque};

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::sack::{SackBlock, SackList, MAX_SACK_BLOCKS};
use crate::SeqNum;

/// 기본 SACK 블록 수 (타임스탬프 옵션과 함께 쓸 때)
pub const DEFAULT_MAX_SACK_BLOCKS: usize = 3;

/// 기억해 둘 최근 세그먼트 수
const RECENT_HISTORY: usize = 16;

/// 세그먼트 하나에 대한 응답
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckInfo {
    /// 누적 ACK (RCV.NXT)
    pub ack: SeqNum,
    pub sack: SackList,
}

/// 수신자
///
/// 순서가 어긋난 구간은 스트림 시작 기준 64비트 오프셋으로 보관한다.
/// 오프셋은 RCV.NXT 기준 거리로 계산하므로 시퀀스 공간이 몇 번 돌아도 된다.
#[derive(Debug)]
pub struct Receiver {
    isn: SeqNum,

    /// 다음에 기대하는 시퀀스
    rcv_nxt: SeqNum,

    /// `rcv_nxt`의 스트림 오프셋 (순서대로 전달된 총 바이트)
    rcv_offset: u64,

    /// 순서대로 전달된 데이터
    delivered: BytesMut,

    /// 순서가 어긋난 세그먼트 (ISN 기준 오프셋 → 페이로드)
    out_of_order: BTreeMap<u64, Bytes>,

    /// 최근 순서 밖 세그먼트 오프셋 (최근 것이 앞)
    recent: VecDeque<u64>,

    max_sack_blocks: usize,

    /// 중복 수신 바이트
    duplicate_bytes: u64,
}

impl Receiver {
    pub fn new(isn: SeqNum) -> Self {
        Self {
            isn,
            rcv_nxt: isn,
            rcv_offset: 0,
            delivered: BytesMut::new(),
            out_of_order: BTreeMap::new(),
            recent: VecDeque::new(),
            max_sack_blocks: DEFAULT_MAX_SACK_BLOCKS,
            duplicate_bytes: 0,
        }
    }

    /// SACK 블록 수 제한 (최대 4)
    pub fn with_max_sack_blocks(mut self, max: usize) -> Self {
        self.max_sack_blocks = max.min(MAX_SACK_BLOCKS);
        self
    }

    pub fn rcv_nxt(&self) -> SeqNum {
        self.rcv_nxt
    }

    /// 지금까지 순서대로 받은 데이터
    pub fn delivered(&self) -> Bytes {
        Bytes::copy_from_slice(&self.delivered)
    }

    pub fn delivered_len(&self) -> usize {
        self.delivered.len()
    }

    pub fn duplicate_bytes(&self) -> u64 {
        self.duplicate_bytes
    }

    /// 보관 중인 순서 밖 바이트
    pub fn buffered_bytes(&self) -> usize {
        self.out_of_order.values().map(Bytes::len).sum()
    }

    /// `seq`의 스트림 오프셋 (`seq >= rcv_nxt`)
    fn offset(&self, seq: SeqNum) -> u64 {
        self.rcv_offset + (seq - self.rcv_nxt) as u64
    }

    fn seq_at(&self, offset: u64) -> SeqNum {
        self.isn + offset as u32
    }

    /// 세그먼트 수신
    pub fn on_segment(&mut self, seq: SeqNum, payload: Bytes) -> AckInfo {
        let end = seq + payload.len() as u32;
        if payload.is_empty() || end <= self.rcv_nxt {
            self.duplicate_bytes += payload.len() as u64;
            trace!("중복 세그먼트 [{};{}]", seq, end);
            return self.ack_info();
        }

        let (seq, payload) = if seq < self.rcv_nxt {
            let skip = (self.rcv_nxt - seq) as usize;
            self.duplicate_bytes += skip as u64;
            (self.rcv_nxt, payload.slice(skip..))
        } else {
            (seq, payload)
        };

        if seq == self.rcv_nxt {
            self.deliver(&payload);
            self.drain_out_of_order();
        } else {
            let offset = self.offset(seq);
            let keep = self
                .out_of_order
                .get(&offset)
                .map_or(true, |held| held.len() < payload.len());
            if keep {
                self.out_of_order.insert(offset, payload);
            } else {
                self.duplicate_bytes += payload.len() as u64;
            }

            self.recent.retain(|&o| o != offset);
            self.recent.push_front(offset);
            self.recent.truncate(RECENT_HISTORY);
            trace!("순서 밖 세그먼트 [{};{}], rcv_nxt={}", seq, end, self.rcv_nxt);
        }

        self.ack_info()
    }

    fn deliver(&mut self, payload: &[u8]) {
        self.delivered.extend_from_slice(payload);
        self.rcv_nxt += payload.len() as u32;
        self.rcv_offset += payload.len() as u64;
    }

    /// 구멍이 메워졌으면 보관된 데이터를 이어서 전달
    fn drain_out_of_order(&mut self) {
        while let Some((&offset, _)) = self.out_of_order.first_key_value() {
            let next = self.offset(self.rcv_nxt);
            if offset > next {
                break;
            }
            if let Some(data) = self.out_of_order.remove(&offset) {
                let end = offset + data.len() as u64;
                if end > next {
                    self.deliver(&data[(next - offset) as usize..]);
                } else {
                    self.duplicate_bytes += data.len() as u64;
                }
            }
        }

        let next = self.offset(self.rcv_nxt);
        self.recent.retain(|&o| o >= next);
    }

    /// 보관 중인 구간을 합친 연속 범위 `(start, end)` 오프셋
    fn ranges(&self) -> Vec<(u64, u64)> {
        let mut ranges: Vec<(u64, u64)> = Vec::new();
        for (&offset, data) in &self.out_of_order {
            let end = offset + data.len() as u64;
            match ranges.last_mut() {
                Some(last) if offset <= last.1 => last.1 = last.1.max(end),
                _ => ranges.push((offset, end)),
            }
        }
        ranges
    }

    /// 현재 누적 ACK와 SACK 블록
    pub fn ack_info(&self) -> AckInfo {
        let ranges = self.ranges();
        let mut chosen: Vec<(u64, u64)> = Vec::new();

        // 최근에 받은 세그먼트가 든 범위부터
        for &offset in &self.recent {
            if chosen.len() >= self.max_sack_blocks {
                break;
            }
            if let Some(&range) = ranges.iter().find(|r| r.0 <= offset && offset < r.1) {
                if !chosen.contains(&range) {
                    chosen.push(range);
                }
            }
        }
        for range in &ranges {
            if chosen.len() >= self.max_sack_blocks {
                break;
            }
            if !chosen.contains(range) {
                chosen.push(*range);
            }
        }

        AckInfo {
            ack: self.rcv_nxt,
            sack: chosen
                .into_iter()
                .map(|(start, end)| SackBlock::new(self.seq_at(start), self.seq_at(end)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(len: usize, fill: u8) -> Bytes {
        Bytes::from(vec![fill; len])
    }

    fn block(left: u32, right: u32) -> SackBlock {
        SackBlock::new(SeqNum(left), SeqNum(right))
    }

    #[test]
    fn test_in_order_delivery() {
        let mut rx = Receiver::new(SeqNum(100));

        let info = rx.on_segment(SeqNum(100), data(50, 1));
        assert_eq!(info.ack, SeqNum(150));
        assert!(info.sack.is_empty());

        let info = rx.on_segment(SeqNum(150), data(50, 2));
        assert_eq!(info.ack, SeqNum(200));
        assert_eq!(rx.delivered_len(), 100);
    }

    #[test]
    fn test_out_of_order_sack_blocks() {
        let mut rx = Receiver::new(SeqNum(0));

        let info = rx.on_segment(SeqNum(100), data(100, 2));
        assert_eq!(info.ack, SeqNum(0));
        assert_eq!(info.sack, vec![block(100, 200)]);

        let info = rx.on_segment(SeqNum(300), data(100, 4));
        assert_eq!(info.sack, vec![block(300, 400), block(100, 200)]);

        // 이어지는 구간은 합쳐지고, 최근 블록이 먼저
        let info = rx.on_segment(SeqNum(200), data(100, 3));
        assert_eq!(info.sack, vec![block(100, 400)]);

        let info = rx.on_segment(SeqNum(0), data(100, 1));
        assert_eq!(info.ack, SeqNum(400));
        assert!(info.sack.is_empty());

        let delivered = rx.delivered();
        assert_eq!(delivered.len(), 400);
        assert_eq!(delivered[0], 1);
        assert_eq!(delivered[150], 2);
        assert_eq!(delivered[399], 4);
        assert_eq!(rx.buffered_bytes(), 0);
    }

    #[test]
    fn test_sack_block_limit() {
        let mut rx = Receiver::new(SeqNum(0));
        for i in 1..=5u32 {
            rx.on_segment(SeqNum(i * 200), data(100, 0));
        }

        let info = rx.ack_info();
        assert_eq!(info.sack.len(), DEFAULT_MAX_SACK_BLOCKS);
        assert_eq!(info.sack[0], block(1000, 1100));
        assert_eq!(info.sack[1], block(800, 900));

        let rx = rx.with_max_sack_blocks(10);
        assert_eq!(rx.ack_info().sack.len(), MAX_SACK_BLOCKS);
    }

    #[test]
    fn test_duplicate_and_overlapping_segments() {
        let mut rx = Receiver::new(SeqNum(0));
        rx.on_segment(SeqNum(0), data(100, 1));

        let info = rx.on_segment(SeqNum(0), data(100, 1));
        assert_eq!(info.ack, SeqNum(100));
        assert_eq!(rx.duplicate_bytes(), 100);

        let info = rx.on_segment(SeqNum(50), data(100, 2));
        assert_eq!(info.ack, SeqNum(150));
        assert_eq!(rx.delivered_len(), 150);
        assert_eq!(rx.duplicate_bytes(), 150);
    }

    #[test]
    fn test_offsets_past_half_sequence_space() {
        let isn = SeqNum(7);
        let mut rx = Receiver::new(isn);

        // 2^31 바이트 넘게 전달한 뒤의 상태
        let delivered = (1u64 << 31) + 100;
        rx.rcv_nxt = isn + delivered as u32;
        rx.rcv_offset = delivered;
        let nxt = rx.rcv_nxt();

        let info = rx.on_segment(nxt + 100, data(100, 2));
        assert_eq!(info.ack, nxt);
        assert_eq!(info.sack, vec![SackBlock::new(nxt + 100, nxt + 200)]);

        let info = rx.on_segment(nxt, data(100, 1));
        assert_eq!(info.ack, nxt + 200);
        assert!(info.sack.is_empty());
        assert_eq!(rx.rcv_offset, delivered + 200);
        assert_eq!(rx.buffered_bytes(), 0);
    }

    #[test]
    fn test_wrapping_sequence_space() {
        let isn = SeqNum(u32::MAX - 49);
        let mut rx = Receiver::new(isn);

        let info = rx.on_segment(isn + 100, data(100, 2));
        assert_eq!(info.sack, vec![SackBlock::new(isn + 100, isn + 200)]);

        rx.on_segment(isn, data(100, 1));
        assert_eq!(rx.rcv_nxt(), isn + 200);
        assert_eq!(rx.rcv_nxt(), SeqNum(150));
    }
}
