//! MetricsSink port - fire-and-forget の counters / gauges
//!
//! Broker の構築時に渡す。メソッドは何も返さない
//! （メトリクス側が壊れていても send や acknowledge を失敗させない）。

/// MetricsSink receives per-strand observations.
pub trait MetricsSink: Send + Sync {
    fn message_sent(&self, strand: &str);

    fn message_received(&self, strand: &str);

    /// Unacknowledged envelopes currently held for `strand`.
    fn queue_depth(&self, strand: &str, depth: usize);
}

/// NoopMetrics drops every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn message_sent(&self, _strand: &str) {}

    fn message_received(&self, _strand: &str) {}

    fn queue_depth(&self, _strand: &str, _depth: usize) {}
}
