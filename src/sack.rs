//! SACK 블록과 SACK 옵션(kind=5) 코덱
//!
//! RFC 2018: 옵션 길이는 2 + 8*n 바이트, 각 블록은 네트워크 바이트 순서의
//! 32비트 왼쪽/오른쪽 경계 두 개. TCP 옵션 공간(40바이트) 때문에 최대 4개.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result, SeqNum};

/// SACK 옵션 kind
pub const SACK_OPTION_KIND: u8 = 5;

/// 옵션 하나에 들어가는 최대 블록 수
pub const MAX_SACK_BLOCKS: usize = 4;

const HEADER_LEN: usize = 2;
const BLOCK_LEN: usize = 8;

/// 수신자가 확인한 연속 구간 `[left, right)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SackBlock {
    pub left: SeqNum,
    pub right: SeqNum,
}

impl SackBlock {
    pub fn new(left: SeqNum, right: SeqNum) -> Self {
        Self { left, right }
    }

    /// 블록이 덮는 바이트 수 (역순 블록이면 0)
    pub fn len(&self) -> u32 {
        if self.right > self.left {
            self.right - self.left
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `[start, end)`가 이 블록 안에 완전히 들어가는지
    pub fn covers(&self, start: SeqNum, end: SeqNum) -> bool {
        start >= self.left && end <= self.right
    }
}

impl fmt::Display for SackBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{};{}]", self.left, self.right)
    }
}

/// 순서 있는 SACK 블록 목록 (옵션에 실린 순서 그대로)
pub type SackList = Vec<SackBlock>;

/// 주어진 옵션 공간에 넣을 수 있는 블록 수
pub fn max_blocks_for(available: usize) -> usize {
    (available.saturating_sub(HEADER_LEN) / BLOCK_LEN).min(MAX_SACK_BLOCKS)
}

/// SACK 옵션
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SackOption {
    pub blocks: SackList,
}

impl SackOption {
    pub fn new(blocks: SackList) -> Self {
        Self { blocks }
    }

    /// 직렬화된 옵션 길이 (kind, length 포함)
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + BLOCK_LEN * self.blocks.len()
    }

    /// 버퍼에 옵션 기록
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.blocks.is_empty() || self.blocks.len() > MAX_SACK_BLOCKS {
            return Err(Error::InvalidSackLength {
                len: self.wire_len(),
            });
        }
        if buf.remaining_mut() < self.wire_len() {
            return Err(Error::Truncated {
                needed: self.wire_len(),
                got: buf.remaining_mut(),
            });
        }

        buf.put_u8(SACK_OPTION_KIND);
        buf.put_u8(self.wire_len() as u8);
        for block in &self.blocks {
            buf.put_u32(block.left.value());
            buf.put_u32(block.right.value());
        }
        Ok(())
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// 바이트에서 역직렬화 (kind 바이트부터 시작)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Truncated {
                needed: HEADER_LEN,
                got: bytes.len(),
            });
        }

        let mut buf = bytes;
        let kind = buf.get_u8();
        if kind != SACK_OPTION_KIND {
            return Err(Error::InvalidSackOption { kind });
        }

        let len = buf.get_u8() as usize;
        if len < HEADER_LEN + BLOCK_LEN
            || (len - HEADER_LEN) % BLOCK_LEN != 0
            || len > HEADER_LEN + BLOCK_LEN * MAX_SACK_BLOCKS
        {
            return Err(Error::InvalidSackLength { len });
        }
        if bytes.len() < len {
            return Err(Error::Truncated {
                needed: len,
                got: bytes.len(),
            });
        }

        let count = (len - HEADER_LEN) / BLOCK_LEN;
        let blocks = (0..count)
            .map(|_| {
                let left = SeqNum(buf.get_u32());
                let right = SeqNum(buf.get_u32());
                SackBlock::new(left, right)
            })
            .collect();

        Ok(Self { blocks })
    }
}
