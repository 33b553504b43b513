//! skein-core
//!
//! プロセス内メッセージブローカー。名前付きキュー（strand）、volatile / durable の
//! 永続化、差し替え可能なトランスポート、recovery による at-least-once 配送。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（envelope, strand 設定, errors）
//! - **ports**: 抽象化レイヤー（Storage, Transport, MetricsSink, Clock, IdGenerator）
//! - **impls**: 実装（MemoryStore, SledStore, Channel/Ws/Udp transports, RecordingMetrics）
//! - **broker**: エンジン（登録, ルーティング, send/receive/ack, recovery）
//! - **config**: TOML によるプロセス設定

pub mod broker;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use broker::{Broker, BrokerBuilder, Durability, RecoveryReport};
pub use config::{BrokerConfig, ConfigError, StrandEntry, TransportConfig};
pub use domain::{BrokerError, ErrorKind, Msg, StrandConf};
