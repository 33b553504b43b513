//! IdGenerator port - メッセージ id + 作成時刻
//!
//! id は作成順にソートされる必要がある。KV ストアは `msg:<strand>:<id>` キーを
//! 辞書順に走査し、recovery はその順で再送する。
//!
//! # Implementations
//! - **UlidGenerator**: monotonic ULIDs stamped from a [`Clock`]

use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use ulid::{Generator, Ulid};

use crate::ports::Clock;

/// Id and creation timestamp for a new envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageStamp {
    pub id: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

/// IdGenerator hands out envelope ids.
///
/// # Thread Safety
/// - `Send + Sync`: shared by every caller of the broker.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> MessageStamp;
}

/// UlidGenerator は狭義単調増加の ULID を生成する
///
/// 同じミリ秒内ではランダム部を引き直さずにインクリメントするので、
/// 連続して生成した id は常に生成順に比較される。
pub struct UlidGenerator<C> {
    clock: C,
    inner: Mutex<Generator>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            inner: Mutex::new(Generator::new()),
        }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate(&self) -> MessageStamp {
        let now = self.clock.now();
        let at = SystemTime::from(now);
        let ulid = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate_from_datetime(at)
            .unwrap_or_else(|err| {
                // Only reachable after 2^80 ids in one millisecond.
                tracing::warn!(error = %err, "monotonic ulid overflow, falling back to random");
                Ulid::from_datetime(at)
            });

        MessageStamp {
            id: ulid.to_string(),
            timestamp: now.timestamp(),
        }
    }
}
