//! Transport port - send された envelope を対応する receive まで運ぶ
//!
//! トランスポートは永続化の責任を持たない（Broker が送信前に永続化する）。
//!
//! # 実装
//! - **ChannelTransport**: strand ごとのプロセス内有界 FIFO
//! - **WsTransport**: strand ごとの双方向 WebSocket
//! - **UdpTransport**: 1 メッセージ = 1 データグラム

use async_trait::async_trait;

use crate::domain::{Msg, TransportError};

#[async_trait]
pub trait Transport: Send + Sync {
    /// `msg.strand()` を待っている相手に envelope を渡す
    async fn send_message(&self, msg: &Msg) -> Result<(), TransportError>;

    /// `strand` の次の envelope を待つ
    ///
    /// チャネルや接続が閉じたら、待ち続けずにエラーを返す
    async fn receive_message(&self, strand: &str) -> Result<Msg, TransportError>;

    /// 1 つの strand に送った envelope が送信順に届くか
    fn preserves_order(&self) -> bool {
        true
    }
}
