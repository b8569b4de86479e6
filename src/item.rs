//! 송신 레코드 (TxItem)
//!
//! - 송신 버퍼가 추적하는 최소 단위: 연속된 바이트 범위 + 상태 플래그
//! - 분할(split)과 병합(merge)만으로 경계가 바뀐다

use std::fmt;
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::SeqNum;

/// 송신 레코드
///
/// 미전송 큐에 있는 동안에는 시작 시퀀스가 없다.
/// `sacked`와 `lost`는 동시에 참일 수 없다.
#[derive(Debug, Clone)]
pub struct TxItem {
    /// 첫 바이트의 시퀀스 (전송 목록에 들어간 뒤에만 설정)
    pub(crate) start_seq: Option<SeqNum>,

    /// 페이로드 (불변 버퍼, 분할 시 복사 없음)
    pub(crate) payload: Bytes,

    /// 손실로 추정됨 (재전송 필요, in-flight에서 제외)
    pub(crate) lost: bool,

    /// 이 범위가 두 번 이상 전송됨
    pub(crate) retrans: bool,

    /// 수신자가 SACK으로 수신 확인
    pub(crate) sacked: bool,

    /// 이 레코드의 마지막 전송 시각
    pub(crate) last_sent: Option<Instant>,
}

impl TxItem {
    /// 애플리케이션 데이터로 새 (미전송) 레코드 생성
    pub fn new(payload: Bytes) -> Self {
        Self {
            start_seq: None,
            payload,
            lost: false,
            retrans: false,
            sacked: false,
            last_sent: None,
        }
    }

    /// 시퀀스 공간에서 차지하는 바이트 수
    pub fn size(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn start_seq(&self) -> Option<SeqNum> {
        self.start_seq
    }

    pub fn end_seq(&self) -> Option<SeqNum> {
        self.start_seq.map(|s| s + self.size())
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub fn is_retransmitted(&self) -> bool {
        self.retrans
    }

    pub fn is_sacked(&self) -> bool {
        self.sacked
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    /// 앞쪽 `size` 바이트를 떼어 새 레코드로 반환
    ///
    /// 플래그는 양쪽 모두에 복사되고, `self`는 뒷부분이 된다.
    /// 바이트 카운터 합은 변하지 않는다.
    pub(crate) fn split_front(&mut self, size: u32) -> TxItem {
        assert!(
            size > 0 && size < self.size(),
            "분할 위치 {}가 레코드 크기 {} 범위 밖",
            size,
            self.size()
        );

        let head = TxItem {
            start_seq: self.start_seq,
            payload: self.payload.split_to(size as usize),
            lost: self.lost,
            retrans: self.retrans,
            sacked: self.sacked,
            last_sent: self.last_sent,
        };
        if let Some(start) = self.start_seq.as_mut() {
            *start += size;
        }
        head
    }

    /// 바로 뒤 레코드를 흡수
    ///
    /// 반환값: 재전송 플래그가 지워진 바이트 수 (버퍼의 재전송 카운터에서 뺄 값).
    /// 한쪽만 재전송된 경우 플래그는 양쪽 모두 해제된다.
    pub(crate) fn merge(&mut self, next: TxItem) -> u32 {
        assert_eq!(
            self.sacked, next.sacked,
            "SACK된 레코드와 안 된 레코드 병합 시도: {} + {}",
            self, next
        );
        assert_eq!(
            self.lost, next.lost,
            "손실 레코드와 정상 레코드 병합 시도: {} + {}",
            self, next
        );

        let mut cleared = 0;
        if self.retrans != next.retrans {
            cleared = if self.retrans { self.size() } else { next.size() };
            self.retrans = false;
        }

        self.last_sent = match (self.last_sent, next.last_sent) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let mut buf = BytesMut::with_capacity(self.payload.len() + next.payload.len());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&next.payload);
        self.payload = buf.freeze();

        cleared
    }
}

impl fmt::Display for TxItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start_seq {
            Some(start) => write!(f, "[{};{}|{}]", start, start + self.size(), self.size())?,
            None => write!(f, "[unsent|{}]", self.size())?,
        }
        if self.lost {
            f.write_str("[lost]")?;
        }
        if self.retrans {
            f.write_str("[retrans]")?;
        }
        if self.sacked {
            f.write_str("[sacked]")?;
        }
        Ok(())
    }
}
