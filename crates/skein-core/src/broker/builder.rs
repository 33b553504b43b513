//! BrokerBuilder - wiring of stores, transport and capabilities.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::Broker;
use crate::ports::{IdGenerator, MetricsSink, NoopMetrics, Storage, SystemClock, Transport, UlidGenerator};

/// BrokerBuilder assembles a [`Broker`].
///
/// # Example
/// ```ignore
/// let broker = BrokerBuilder::new(volatile, durable, transport)
///     .metrics(metrics.clone())
///     .build();
/// ```
///
/// ストアとトランスポートは必須。メトリクスのデフォルトは [`NoopMetrics`]、
/// id はシステム時計の単調 ULID。
pub struct BrokerBuilder {
    volatile: Arc<dyn Storage>,
    durable: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    metrics: Option<Arc<dyn MetricsSink>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl BrokerBuilder {
    pub fn new(
        volatile: Arc<dyn Storage>,
        durable: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            volatile,
            durable,
            transport,
            metrics: None,
            id_generator: None,
        }
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(id_generator);
        self
    }

    pub fn build(self) -> Broker {
        Broker {
            volatile: self.volatile,
            durable: self.durable,
            transport: self.transport,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
            id_generator: self
                .id_generator
                .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock))),
            lock: Mutex::new(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StrandConf;
    use crate::impls::{ChannelTransport, MemoryStore, RecordingMetrics};
    use crate::ports::{FixedClock, MessageStamp};
    use chrono::{TimeZone, Utc};

    struct Sequential;

    impl IdGenerator for Sequential {
        fn generate(&self) -> MessageStamp {
            MessageStamp {
                id: "fixed".to_string(),
                timestamp: 1,
            }
        }
    }

    fn parts() -> (Arc<MemoryStore>, Arc<MemoryStore>, Arc<ChannelTransport>) {
        (
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(ChannelTransport::new()),
        )
    }

    #[tokio::test]
    async fn build_with_defaults() {
        let (volatile, durable, transport) = parts();
        let broker = BrokerBuilder::new(volatile, durable, transport).build();
        broker
            .strand_add("a", StrandConf::volatile())
            .await
            .unwrap();
        let sent = broker.send("a", "x").await.unwrap();
        assert_eq!(sent.id().len(), 26); // ULID
    }

    #[tokio::test]
    async fn injected_capabilities_are_used() {
        let (volatile, durable, transport) = parts();
        let metrics = Arc::new(RecordingMetrics::new());
        let broker = BrokerBuilder::new(volatile, durable, transport)
            .metrics(metrics.clone())
            .id_generator(Arc::new(Sequential))
            .build();

        broker
            .strand_add("a", StrandConf::volatile())
            .await
            .unwrap();
        let sent = broker.send("a", "x").await.unwrap();

        assert_eq!(sent.id(), "fixed");
        assert_eq!(sent.timestamp(), 1);
        assert_eq!(metrics.sent("a"), 1);
    }

    #[tokio::test]
    async fn fixed_clock_pins_timestamps() {
        let (volatile, durable, transport) = parts();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let broker = BrokerBuilder::new(volatile, durable, transport)
            .id_generator(Arc::new(UlidGenerator::new(FixedClock::new(at))))
            .build();

        broker
            .strand_add("a", StrandConf::volatile())
            .await
            .unwrap();
        let sent = broker.send("a", "x").await.unwrap();
        assert_eq!(sent.timestamp(), at.timestamp());
    }
}
