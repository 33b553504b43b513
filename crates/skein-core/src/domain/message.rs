//! Msg - ストアとトランスポートを流れる envelope

use serde::{Deserialize, Serialize};

/// メッセージ envelope
///
/// 設計:
/// - `id`, `strand`, `payload`, `timestamp` は構築時に確定（setter なし）
/// - 変更できるのは `acked` だけで、false -> true の一方向
/// - この構造体の JSON 表現がディスク上・ワイヤ上のフォーマット
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Msg {
    id: String,
    strand: String,
    payload: String,
    acked: bool,
    /// Seconds since the Unix epoch.
    timestamp: i64,
}

impl Msg {
    pub fn new(
        id: impl Into<String>,
        strand: impl Into<String>,
        payload: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            strand: strand.into(),
            payload: payload.into(),
            acked: false,
            timestamp,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn strand(&self) -> &str {
        &self.strand
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn acked(&self) -> bool {
        self.acked
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// ack を記録する。2 回目以降は何もしない
    pub fn mark_acked(&mut self) {
        self.acked = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_is_unacked() {
        let msg = Msg::new("01J0", "orders", "A", 1_700_000_000);
        assert_eq!(msg.id(), "01J0");
        assert_eq!(msg.strand(), "orders");
        assert_eq!(msg.payload(), "A");
        assert_eq!(msg.timestamp(), 1_700_000_000);
        assert!(!msg.acked());
    }

    #[test]
    fn mark_acked_is_one_way() {
        let mut msg = Msg::new("01J0", "orders", "A", 0);
        msg.mark_acked();
        msg.mark_acked();
        assert!(msg.acked());
    }

    #[test]
    fn json_uses_plain_field_names() {
        let msg = Msg::new("01J0", "orders", "A", 42);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": "01J0",
                "strand": "orders",
                "payload": "A",
                "acked": false,
                "timestamp": 42,
            })
        );
    }
}
