//! 에러 타입 정의

use thiserror::Error;

/// tcptx 에러 타입
///
/// 호출자 계약 위반(이미 버린 시퀀스 요청 등)은 에러가 아니라 패닉이다.
/// 여기에는 호출자가 복구할 수 있는 상황만 들어간다.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("송신 버퍼 공간 부족: requested {requested} bytes, available {available} bytes")]
    BufferOverflow { requested: usize, available: usize },

    #[error("SACK 옵션이 아님: kind={kind}")]
    InvalidSackOption { kind: u8 },

    #[error("유효하지 않은 SACK 옵션 길이: {len}")]
    InvalidSackLength { len: usize },

    #[error("데이터 부족: needed {needed} bytes, got {got} bytes")]
    Truncated { needed: usize, got: usize },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("스코어보드 불일치: {0}")]
    Inconsistent(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
