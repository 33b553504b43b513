//! Strand configuration and strand id validation.

use serde::{Deserialize, Serialize};

/// Longest accepted strand id, in bytes.
pub const MAX_STRAND_ID_LEN: usize = 255;

/// strand ごとのポリシー（登録時に確定）
///
/// - `durable`: メッセージを持つストアを選ぶ
/// - `ordered`: 意図として記録するだけ。配送順はトランスポートの性質
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrandConf {
    pub durable: bool,
    pub ordered: bool,
}

impl StrandConf {
    pub fn durable() -> Self {
        Self {
            durable: true,
            ordered: false,
        }
    }

    pub fn volatile() -> Self {
        Self {
            durable: false,
            ordered: false,
        }
    }

    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }
}

/// Why a strand id was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidStrandReason {
    Empty,
    TooLong,
    /// `:` separates the parts of store keys (`msg:<strand>:<id>`).
    ContainsSeparator,
}

impl std::fmt::Display for InvalidStrandReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("strand id is empty"),
            Self::TooLong => write!(f, "strand id exceeds {MAX_STRAND_ID_LEN} bytes"),
            Self::ContainsSeparator => f.write_str("strand id contains ':'"),
        }
    }
}

/// Check that `id` can be used as a strand name.
pub fn validate_strand_id(id: &str) -> Result<(), InvalidStrandReason> {
    if id.is_empty() {
        return Err(InvalidStrandReason::Empty);
    }
    if id.len() > MAX_STRAND_ID_LEN {
        return Err(InvalidStrandReason::TooLong);
    }
    if id.contains(':') {
        return Err(InvalidStrandReason::ContainsSeparator);
    }
    Ok(())
}
