//! Impls - ポートの具体実装
//!
//! # ストア
//! - **MemoryStore**: volatile strand 用、テスト用
//! - **SledStore**: durable strand 用（組み込み KV ストア）
//!
//! # トランスポート
//! - **ChannelTransport**: プロセス内の有界キュー
//! - **WsTransport**: strand ごとの双方向 WebSocket
//! - **UdpTransport**: 1 envelope = 1 データグラム
//!
//! # メトリクス
//! - **RecordingMetrics**: in-memory counters/gauges

pub mod channel_transport;
pub mod memory_store;
pub mod recording_metrics;
pub mod sled_store;
pub mod udp_transport;
pub mod ws_transport;

pub use self::channel_transport::ChannelTransport;
pub use self::memory_store::MemoryStore;
pub use self::recording_metrics::{RecordingMetrics, StrandMetrics};
pub use self::sled_store::SledStore;
pub use self::udp_transport::UdpTransport;
pub use self::ws_transport::WsTransport;
