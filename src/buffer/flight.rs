//! 손실 판정과 in-flight 계산 (RFC 6675)

use tracing::trace;

use super::TxBuffer;
use crate::SeqNum;

impl TxBuffer {
    /// RFC 6675 NextSeg: 다음에 보낼 시퀀스
    ///
    /// 1. 손실로 표시됐고 아직 재전송하지 않은 첫 레코드
    /// 2. 미전송 데이터의 시작
    /// 3. (복구 중일 때만) 재전송도 SACK도 안 된 첫 레코드
    ///
    /// rescue retransmission은 하지 않는다.
    pub fn next_seg(&self, is_recovery: bool) -> Option<SeqNum> {
        let mut begin = self.first_byte_seq;
        let mut rule3 = None;

        for item in &self.sent {
            if !item.retrans && !item.sacked {
                if item.lost {
                    trace!("NextSeg 규칙 1: {}", item);
                    return Some(begin);
                }
                if is_recovery && rule3.is_none() {
                    rule3 = Some(begin);
                }
            }
            begin += item.size();
        }

        let unsent = self.first_byte_seq + self.sent_size;
        if self.size_from_sequence(unsent) > 0 {
            trace!("NextSeg 규칙 2: 새 데이터 {}", unsent);
            return Some(unsent);
        }

        if let Some(seq) = rule3 {
            trace!("NextSeg 규칙 3: {}", seq);
        }
        rule3
    }

    /// 네트워크에 떠 있는 바이트 (카운터 기반, O(1))
    pub fn bytes_in_flight(&self) -> u32 {
        self.sent_size - (self.sacked_out + self.lost_out) + self.retrans
    }

    /// RFC 6675 pipe 정의를 따라 전송 목록을 걷는 계산
    ///
    /// SACK되지 않은 레코드마다 (a) 손실 플래그가 없으면 크기를 더하고,
    /// (b) 재전송됐으면 크기를 한 번 더 더한다.
    /// 손실 판단은 `is_lost`가 아니라 레코드의 lost 플래그다 (RTO 뒤에는
    /// highest SACK 위쪽 레코드도 손실). 카운터 공식을 플래그와 대조하는
    /// 값이며 `bytes_in_flight`와 항상 같다.
    pub fn bytes_in_flight_rfc(&self) -> u32 {
        let mut pipe = 0;

        for item in &self.sent {
            if !item.sacked {
                if !item.lost {
                    pipe += item.size();
                }
                if item.retrans {
                    pipe += item.size();
                }
            }
        }

        pipe
    }

    /// `seq`가 손실로 간주되는지 (스코어보드 플래그 기준)
    ///
    /// 가장 높은 SACK 레코드보다 아래일 때만 손실이다 (SACK이 없으면 항상 false).
    pub fn is_lost(&self, seq: SeqNum) -> bool {
        let Some(idx) = self.index_of(seq) else {
            return false;
        };
        match self.highest_sack {
            Some(hs) if seq < hs.start => self.sent[idx].lost,
            _ => false,
        }
    }

    /// RFC 6675 IsLost: `seq` 위쪽의 SACK 증거로 손실 판정
    ///
    /// SACK된 레코드가 dup_ack_threshold개 이상이거나
    /// SACK된 바이트가 `(dup_ack_threshold - 1) * segment_size`를 넘으면 손실.
    pub fn is_lost_rfc(&self, seq: SeqNum) -> bool {
        let Some(idx) = self.index_of(seq) else {
            return false;
        };
        let Some(hs) = self.highest_sack else {
            return false;
        };

        let byte_limit = self
            .dup_ack_threshold
            .saturating_sub(1)
            .saturating_mul(self.segment_size);
        let (mut count, mut bytes) = (0u32, 0u32);

        for item in self.sent.iter().skip(idx + 1) {
            if item.start_seq().map_or(true, |start| start >= hs.end) {
                break;
            }
            if item.sacked {
                count += 1;
                bytes += item.size();
                if count >= self.dup_ack_threshold || bytes > byte_limit {
                    return true;
                }
            }
        }
        false
    }

    /// 손실로 표시된 바이트
    pub fn get_lost(&self) -> u32 {
        self.lost_out
    }

    /// SACK된 바이트
    pub fn get_sacked(&self) -> u32 {
        self.sacked_out
    }

    /// 재전송 플래그가 붙은 바이트
    pub fn get_retransmits_count(&self) -> u32 {
        self.retrans
    }
}
