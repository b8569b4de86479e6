//! 송신 버퍼 (TxBuffer)
//!
//! - 미전송 큐: 애플리케이션이 넣었지만 한 번도 보내지 않은 레코드
//! - 전송 목록: `[first_byte_seq, first_byte_seq + sent_size)`를 빈틈없이 덮는 레코드
//! - 전송 목록 위의 lost/sacked/retrans 플래그와 그 합계 카운터 (스코어보드)
//!
//! 모든 공개 연산의 앞뒤에서 불변식이 성립한다. 디버그 빌드에서는
//! `check_consistency`가 매번 실행된다.

mod flight;
mod scoreboard;

#[cfg(any(test, feature = "inspect"))]
pub mod inspect;


use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::item::TxItem;
use crate::stats::TxStats;
use crate::{Config, Error, Result, SeqNum};

/// 지금까지 SACK된 레코드 중 끝 시퀀스가 가장 큰 것의 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighestSack {
    pub start: SeqNum,
    pub end: SeqNum,
}

/// 추출 엔진이 목록을 고친 내역
#[derive(Debug, Default, Clone, Copy)]
struct Edits {
    splits: u64,
    merges: u64,
    restarts: u64,
    /// 병합으로 재전송 플래그가 지워진 바이트
    retrans_cleared: u32,
}

/// 송신 버퍼
pub struct TxBuffer {
    /// 미전송 레코드 (시작 시퀀스 없음)
    unsent: VecDeque<TxItem>,

    /// 전송된 미확인 레코드 (연속, 겹침 없음)
    sent: VecDeque<TxItem>,

    /// SND.UNA
    first_byte_seq: SeqNum,

    /// 보유 중인 총 바이트 (전송 + 미전송)
    size: u32,

    /// 전송 목록의 바이트
    sent_size: u32,

    max_buffer_size: u32,

    lost_out: u32,
    sacked_out: u32,
    retrans: u32,

    highest_sack: Option<HighestSack>,

    dup_ack_threshold: u32,
    segment_size: u32,

    clock: Arc<dyn Clock>,
    stats: TxStats,
}

impl TxBuffer {
    /// 기본 설정 + 시스템 시계
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            unsent: VecDeque::new(),
            sent: VecDeque::new(),
            first_byte_seq: SeqNum(0),
            size: 0,
            sent_size: 0,
            max_buffer_size: config.max_buffer_size,
            lost_out: 0,
            sacked_out: 0,
            retrans: 0,
            highest_sack: None,
            dup_ack_threshold: config.dup_ack_threshold,
            segment_size: config.segment_size,
            clock,
            stats: TxStats::new(),
        }
    }

    /// 연결 설정 시 SND.UNA 지정 (전송된 데이터가 있으면 호출자 버그)
    pub fn set_head_sequence(&mut self, seq: SeqNum) {
        assert!(
            self.sent.is_empty(),
            "데이터 전송 후 헤드 시퀀스 변경 시도: {}",
            self
        );
        self.first_byte_seq = seq;
        self.highest_sack = None;
    }

    pub fn set_max_buffer_size(&mut self, size: u32) {
        self.max_buffer_size = size;
    }

    pub fn set_dup_ack_threshold(&mut self, threshold: u32) {
        self.dup_ack_threshold = threshold;
    }

    pub fn set_segment_size(&mut self, size: u32) {
        self.segment_size = size;
    }

    pub fn max_buffer_size(&self) -> u32 {
        self.max_buffer_size
    }

    pub fn dup_ack_threshold(&self) -> u32 {
        self.dup_ack_threshold
    }

    pub fn segment_size(&self) -> u32 {
        self.segment_size
    }

    /// SND.UNA
    pub fn head_sequence(&self) -> SeqNum {
        self.first_byte_seq
    }

    /// 버퍼 마지막 바이트 다음 시퀀스
    pub fn tail_sequence(&self) -> SeqNum {
        self.first_byte_seq + self.size
    }

    /// 보유 중인 총 바이트
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn sent_size(&self) -> u32 {
        self.sent_size
    }

    /// 추가로 넣을 수 있는 바이트
    pub fn available(&self) -> u32 {
        self.max_buffer_size.saturating_sub(self.size)
    }

    pub fn highest_sack(&self) -> Option<HighestSack> {
        self.highest_sack
    }

    pub fn stats(&self) -> &TxStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut TxStats {
        &mut self.stats
    }

    /// 전송 목록의 첫 레코드
    pub fn head_item(&self) -> Option<&TxItem> {
        self.sent.front()
    }

    pub fn is_head_retransmitted(&self) -> bool {
        self.sent.front().map_or(false, |item| item.retrans)
    }

    /// 애플리케이션 데이터 추가
    ///
    /// 공간이 부족하면 아무것도 바꾸지 않고 `BufferOverflow`.
    pub fn append(&mut self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        let available = self.available() as usize;
        if data.len() > available {
            return Err(Error::BufferOverflow {
                requested: data.len(),
                available,
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        self.size += data.len() as u32;
        self.stats.bytes_appended += data.len() as u64;
        trace!("추가 {} bytes, 버퍼 {} bytes", data.len(), self.size);
        self.unsent.push_back(TxItem::new(data));
        Ok(())
    }

    /// `seq`부터 버퍼 끝까지의 바이트 수 (범위 밖이면 0)
    pub fn size_from_sequence(&self, seq: SeqNum) -> u32 {
        let tail = self.tail_sequence();
        if tail >= seq {
            tail - seq
        } else {
            trace!("요청 시퀀스 {}가 버퍼 끝 {} 너머", seq, tail);
            0
        }
    }

    /// `[seq, seq + num_bytes)`를 꺼내 전송용 페이로드로 반환
    ///
    /// 이미 전송한 범위면 재전송, 전송 경계에서 시작하면 새 데이터.
    /// 경계에 걸치면 이미 전송한 앞부분만 반환한다 (새 데이터는 호출자가 다시 요청).
    /// 반환되는 `Bytes`는 불변 소유 값이라 버퍼 내부 상태와 독립적이다.
    pub fn copy_from_sequence(&mut self, num_bytes: u32, seq: SeqNum) -> Bytes {
        assert!(
            seq >= self.first_byte_seq,
            "이미 버려진 시퀀스 {} 요청 (SND.UNA={})",
            seq,
            self.first_byte_seq
        );
        self.debug_check();

        let mut s = num_bytes.min(self.size_from_sequence(seq));
        if s == 0 {
            return Bytes::new();
        }

        let sent_end = self.first_byte_seq + self.sent_size;
        let idx = if seq >= sent_end {
            assert!(
                seq == sent_end,
                "새 데이터 요청 {} 앞에 구멍이 있음 (전송 끝 {})",
                seq,
                sent_end
            );
            self.get_new_segment(s)
        } else {
            if seq + s > sent_end {
                s = sent_end - seq;
                trace!("전송 경계 걸침, 재전송 부분 {} bytes만 반환", s);
            }
            self.get_transmitted_segment(s, seq)
        };

        let now = self.clock.now();
        let item = &mut self.sent[idx];
        item.last_sent = Some(now);
        let payload = item.payload.clone();

        self.debug_check();
        payload
    }

    /// 미전송 큐 앞에서 `num_bytes`를 잘라 전송 목록 끝으로 옮긴다
    fn get_new_segment(&mut self, num_bytes: u32) -> usize {
        let start = self.first_byte_seq + self.sent_size;
        let mut edits = Edits::default();
        let idx = extract(&mut self.unsent, start, num_bytes, start, &mut edits);
        self.apply_edits(&edits);

        let mut item = match self.unsent.remove(idx) {
            Some(item) => item,
            None => unreachable!("추출한 레코드가 미전송 큐에 없음"),
        };
        item.start_seq = Some(start);

        let size = item.size();
        self.sent_size += size;
        self.stats.bytes_sent += size as u64;
        trace!("새 세그먼트 {}", item);

        self.sent.push_back(item);
        self.sent.len() - 1
    }

    /// 전송 목록에서 `[seq, seq + num_bytes)`를 재전송용으로 만든다
    fn get_transmitted_segment(&mut self, num_bytes: u32, seq: SeqNum) -> usize {
        assert!(num_bytes <= self.sent_size);

        let mut edits = Edits::default();
        let idx = extract(&mut self.sent, self.first_byte_seq, num_bytes, seq, &mut edits);
        self.apply_edits(&edits);

        let item = &mut self.sent[idx];
        let size = item.size();
        // SACK된 레코드는 pipe에 다시 들어가지 않는다
        if !item.retrans && !item.sacked {
            item.retrans = true;
            self.retrans += size;
        }
        self.stats.bytes_retransmitted += size as u64;
        debug!("재전송 세그먼트 {}", self.sent[idx]);
        idx
    }

    fn apply_edits(&mut self, edits: &Edits) {
        self.retrans -= edits.retrans_cleared;
        self.stats.splits += edits.splits;
        self.stats.merges += edits.merges;
        if edits.restarts > 0 {
            trace!(
                "목록 수정 {}회 (분할 {}, 병합 {})",
                edits.restarts,
                edits.splits,
                edits.merges
            );
        }
    }

    /// 누적 ACK 처리: `seq` 이전 바이트를 모두 버린다
    pub fn discard_up_to(&mut self, seq: SeqNum) {
        self.discard_up_to_with(seq, |_| {});
    }

    /// `discard_up_to` + 완전히 확인된 레코드마다 콜백 (제거 직전)
    pub fn discard_up_to_with<F>(&mut self, seq: SeqNum, mut on_acked: F)
    where
        F: FnMut(&TxItem),
    {
        if seq <= self.first_byte_seq {
            trace!("시퀀스 {}는 이미 버려짐", seq);
            return;
        }
        self.debug_check();

        let tail = self.tail_sequence();
        let target = if seq > tail { tail } else { seq };
        let mut offset = target - self.first_byte_seq;

        while offset > 0 {
            if self.sent.is_empty() {
                // 한 번도 보내지 않은 데이터의 확인 (예: zero window probe)
                self.highest_sack = None;
                let first = self.first_byte_seq;
                self.copy_from_sequence(offset, first);
            }

            let head_size = match self.sent.front() {
                Some(head) => head.size(),
                None => panic!("전송 목록을 채우지 못함: {}", self),
            };

            if offset >= head_size {
                if let Some(item) = self.sent.pop_front() {
                    self.remove_from_counts(&item);
                    self.size -= head_size;
                    self.sent_size -= head_size;
                    self.first_byte_seq += head_size;
                    offset -= head_size;
                    self.stats.bytes_acked += head_size as u64;
                    trace!("확인 완료 {}", item);
                    on_acked(&item);
                }
            } else {
                let acked = self.sent[0].split_front(offset);
                self.remove_from_counts(&acked);
                self.size -= offset;
                self.sent_size -= offset;
                self.first_byte_seq += offset;
                self.stats.bytes_acked += offset as u64;
                trace!("부분 확인 {} bytes, 남은 헤드 {}", offset, self.sent[0]);
                offset = 0;
            }
        }

        if let Some(head) = self.sent.front_mut() {
            if head.sacked {
                // SND.UNA가 SACK된 상태일 수 없다: 수신자 renege 또는 Reno 추정 오류
                let size = head.size();
                warn!("헤드 {}가 SACK 상태, 손실로 교정", head);
                head.sacked = false;
                self.sacked_out -= size;
                if !head.lost {
                    head.lost = true;
                    self.lost_out += size;
                    self.stats.bytes_marked_lost += size as u64;
                }
                self.stats.reneged_heads += 1;
            }
        }

        if let Some(hs) = self.highest_sack {
            if hs.start <= self.first_byte_seq {
                self.highest_sack = None;
            }
        }

        debug!(
            "{}까지 확인, lost={} sacked={} retrans={} 남은 {} bytes",
            self.first_byte_seq, self.lost_out, self.sacked_out, self.retrans, self.size
        );
        self.debug_check();
    }

    /// 레코드가 빠질 때 카운터에서 그 기여분 제거
    fn remove_from_counts(&mut self, item: &TxItem) {
        let size = item.size();
        if item.lost {
            self.lost_out -= size;
        }
        if item.sacked {
            self.sacked_out -= size;
        }
        if item.retrans {
            self.retrans -= size;
        }
    }

    /// `seq`를 포함하는 전송 레코드의 인덱스
    pub(crate) fn index_of(&self, seq: SeqNum) -> Option<usize> {
        if seq < self.first_byte_seq {
            return None;
        }
        let idx = self
            .sent
            .partition_point(|item| item.end_seq().map_or(true, |end| end <= seq));
        (idx < self.sent.len()).then_some(idx)
    }

    /// 가장 높은 SACK 레코드의 현재 인덱스
    pub(crate) fn highest_sack_index(&self) -> Option<usize> {
        let hs = self.highest_sack?;
        self.index_of(hs.end - 1)
    }

    /// 불변식 검사
    ///
    /// 1. 전송 목록이 `first_byte_seq`부터 빈틈없이 이어짐
    /// 2. lost/sacked/retrans 카운터 = 플래그 합
    /// 3. 헤드는 SACK 상태가 아님
    /// 4. `size - sent_size` = 미전송 큐 크기
    /// 5. `sent_size >= sacked + lost`
    pub fn check_consistency(&self) -> Result<()> {
        let mut expected = self.first_byte_seq;
        let (mut lost, mut sacked, mut retrans, mut sent) = (0u32, 0u32, 0u32, 0u32);

        for item in &self.sent {
            if item.start_seq != Some(expected) {
                return Err(Error::Inconsistent(format!(
                    "레코드 {}의 시작이 {}이어야 함",
                    item, expected
                )));
            }
            if item.size() == 0 {
                return Err(Error::Inconsistent(format!("빈 레코드 {}", item)));
            }
            if item.sacked && (item.lost || item.retrans) {
                return Err(Error::Inconsistent(format!(
                    "SACK된 레코드 {}에 lost/retrans 플래그",
                    item
                )));
            }
            let size = item.size();
            if item.lost {
                lost += size;
            }
            if item.sacked {
                sacked += size;
            }
            if item.retrans {
                retrans += size;
            }
            sent += size;
            expected += size;
        }

        if sent != self.sent_size {
            return Err(Error::Inconsistent(format!(
                "sent_size {} != 레코드 합 {}",
                self.sent_size, sent
            )));
        }
        if lost != self.lost_out || sacked != self.sacked_out || retrans != self.retrans {
            return Err(Error::Inconsistent(format!(
                "카운터 lost/sacked/retrans = {}/{}/{}, 플래그 합 = {}/{}/{}",
                self.lost_out, self.sacked_out, self.retrans, lost, sacked, retrans
            )));
        }
        if self.sent.front().map_or(false, |head| head.sacked) {
            return Err(Error::Inconsistent("헤드가 SACK 상태".into()));
        }

        let unsent: u32 = self.unsent.iter().map(TxItem::size).sum();
        if self.size - self.sent_size != unsent {
            return Err(Error::Inconsistent(format!(
                "미전송 {} bytes, 기대 {} bytes",
                unsent,
                self.size - self.sent_size
            )));
        }
        if self.unsent.iter().any(|item| item.start_seq.is_some()) {
            return Err(Error::Inconsistent("미전송 레코드에 시작 시퀀스".into()));
        }
        if self.sent_size < self.sacked_out + self.lost_out {
            return Err(Error::Inconsistent(format!(
                "sent {} < sacked {} + lost {}",
                self.sent_size, self.sacked_out, self.lost_out
            )));
        }

        if let Some(hs) = self.highest_sack {
            if hs.start <= self.first_byte_seq || hs.end > self.first_byte_seq + self.sent_size {
                return Err(Error::Inconsistent(format!(
                    "highest SACK [{};{}]이 전송 범위 밖",
                    hs.start, hs.end
                )));
            }
        }
        Ok(())
    }

    #[inline]
    fn debug_check(&self) {
        if cfg!(debug_assertions) {
            if let Err(e) = self.check_consistency() {
                panic!("{}\n{}", e, self);
            }
        }
    }
}

impl Default for TxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TxBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxBuffer")
            .field("first_byte_seq", &self.first_byte_seq)
            .field("size", &self.size)
            .field("sent_size", &self.sent_size)
            .field("lost_out", &self.lost_out)
            .field("sacked_out", &self.sacked_out)
            .field("retrans", &self.retrans)
            .field("highest_sack", &self.highest_sack)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for TxBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sent list: ")?;
        for item in &self.sent {
            write!(f, "{}", item)?;
        }
        write!(
            f,
            ", unsent: {} items, size={} sent={} lost={} sacked={} retrans={} una={}",
            self.unsent.len(),
            self.size,
            self.sent_size,
            self.lost_out,
            self.sacked_out,
            self.retrans,
            self.first_byte_seq
        )
    }
}

/// 두 레코드를 합쳐도 스코어보드가 바뀌지 않는지
fn can_merge(current: &TxItem, next: &TxItem) -> bool {
    !current.sacked && !next.sacked && current.lost == next.lost
}

/// 분할/병합 엔진
///
/// `list`(첫 레코드가 `list_start`에서 시작)에서 정확히 `[seq, seq + num_bytes)`인
/// 레코드를 만들고 그 인덱스를 반환한다. 목록을 고칠 때마다 처음부터 다시 찾는다.
/// 다음 레코드가 SACK됐거나 플래그가 다르면 병합하지 않고 더 짧은 레코드를 반환한다.
fn extract(
    list: &mut VecDeque<TxItem>,
    list_start: SeqNum,
    num_bytes: u32,
    seq: SeqNum,
    edits: &mut Edits,
) -> usize {
    loop {
        let mut begin = list_start;
        let mut found = None;
        for (i, item) in list.iter().enumerate() {
            let end = begin + item.size();
            if seq < end {
                found = Some((i, begin));
                break;
            }
            begin = end;
        }

        let (i, begin) = match found {
            Some(found) => found,
            None => panic!("시퀀스 {}가 목록 범위 밖 (시작 {})", seq, list_start),
        };
        assert!(seq >= begin, "시퀀스 {}가 레코드 시작 {} 앞", seq, begin);

        if seq > begin {
            // seq가 레코드 중간: 앞부분을 떼고 다시 탐색
            let head = list[i].split_front(seq - begin);
            list.insert(i, head);
            edits.splits += 1;
            edits.restarts += 1;
            continue;
        }

        let size = list[i].size();
        if num_bytes == size {
            return i;
        }
        if num_bytes < size {
            let head = list[i].split_front(num_bytes);
            list.insert(i, head);
            edits.splits += 1;
            return i;
        }

        let mergeable = list
            .get(i + 1)
            .map_or(false, |next| can_merge(&list[i], next));
        if !mergeable {
            return i;
        }
        if let Some(next) = list.remove(i + 1) {
            edits.retrans_cleared += list[i].merge(next);
            edits.merges += 1;
            edits.restarts += 1;
        }
    }
}
