//! Ports - Broker と外部との境界（抽象化レイヤー）
//!
//! Broker はこれらの trait だけを使う。バックエンドは呼び出し側が選ぶ。
//!
//! - Storage: strand 登録 + メッセージ永続化（volatile / durable）
//! - Transport: 送信側から受信側へ envelope を運ぶ
//! - MetricsSink: counters/gauges（fire-and-forget）
//! - Clock / IdGenerator: 時刻と envelope id（テストで差し替え可能）

pub mod clock;
pub mod id_generator;
pub mod metrics;
pub mod storage;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, MessageStamp, UlidGenerator};
pub use self::metrics::{MetricsSink, NoopMetrics};
pub use self::storage::{Storage, UnackedCursor};
pub use self::transport::Transport;
