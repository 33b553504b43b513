//! Turns a `BrokerConfig` into live stores, transport and broker.

use std::sync::Arc;

use anyhow::{Context, Result};
use skein_core::domain::ErrorKind;
use skein_core::impls::ws_transport::DEFAULT_MAX_MESSAGE;
use skein_core::impls::{ChannelTransport, MemoryStore, RecordingMetrics, SledStore, UdpTransport, WsTransport};
use skein_core::ports::Transport;
use skein_core::{Broker, BrokerConfig, StrandEntry, TransportConfig};

pub struct Wired {
    pub broker: Broker,
    pub durable: Arc<SledStore>,
    pub metrics: Arc<RecordingMetrics>,
}

pub fn open_durable(config: &BrokerConfig) -> Result<Arc<SledStore>> {
    let store = SledStore::open(config.data_dir.clone())
        .with_context(|| format!("opening durable store at {}", config.data_dir.display()))?;
    Ok(Arc::new(store))
}

/// Build the configured transport. `extra` names strands that need a WebSocket in
/// addition to the configured ones.
pub async fn transport(config: &BrokerConfig, extra: &[&str]) -> Result<Arc<dyn Transport>> {
    match &config.transport {
        TransportConfig::Channel => Ok(Arc::new(ChannelTransport::with_capacity(
            config.channel_capacity,
        ))),
        TransportConfig::Ws { peer } => {
            let ws = WsTransport::with_limits(config.channel_capacity, DEFAULT_MAX_MESSAGE);
            let names = config
                .strands
                .iter()
                .map(|entry| entry.name.as_str())
                .chain(extra.iter().copied());
            for name in names {
                ws.connect(name, *peer)
                    .await
                    .with_context(|| format!("connecting strand {name} to {peer}"))?;
                tracing::info!(strand = name, %peer, "strand linked");
            }
            Ok(Arc::new(ws))
        }
        TransportConfig::Udp {
            bind,
            peer,
            max_datagram,
        } => {
            let udp = UdpTransport::bind(*bind, *peer, *max_datagram)
                .await
                .with_context(|| format!("binding udp socket on {bind}"))?;
            tracing::info!(local = %udp.local_addr()?, %peer, "udp transport ready");
            Ok(Arc::new(udp))
        }
    }
}

pub fn broker(config: &BrokerConfig, transport: Arc<dyn Transport>) -> Result<Wired> {
    let durable = open_durable(config)?;
    let metrics = Arc::new(RecordingMetrics::new());
    let broker = Broker::builder(Arc::new(MemoryStore::new()), durable.clone(), transport)
        .metrics(metrics.clone())
        .build();
    Ok(Wired {
        broker,
        durable,
        metrics,
    })
}

/// Register every entry. Durable strands from a previous run are already there.
pub async fn register(broker: &Broker, entries: &[StrandEntry]) -> Result<()> {
    for entry in entries {
        match broker.strand_add(&entry.name, entry.conf()).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::StrandExists => {
                tracing::debug!(strand = %entry.name, "strand already registered");
            }
            Err(err) => {
                return Err(err).with_context(|| format!("registering strand {}", entry.name));
            }
        }
    }
    Ok(())
}
