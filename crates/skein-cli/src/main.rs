mod wiring;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use skein_core::impls::ChannelTransport;
use skein_core::ports::Storage;
use skein_core::{BrokerConfig, StrandConf, StrandEntry};
use tracing_subscriber::EnvFilter;

/// How long the demo waits for each message to come back.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "skein", version, about = "Lightweight message broker")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send, receive and acknowledge a batch of messages
    Demo {
        /// Persist the demo strand in the durable store
        #[arg(long)]
        durable: bool,
        #[arg(long, default_value_t = 3)]
        count: usize,
        #[arg(long, default_value = "demo")]
        strand: String,
    },
    /// Redeliver everything the durable store still holds
    Recover,
    /// List durable strands and their unacknowledged messages
    Inspect,
    /// Delete a durable strand and its messages
    RemoveStrand { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => BrokerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BrokerConfig::default(),
    }
    .with_env();

    match cli.command {
        Command::Demo {
            durable,
            count,
            strand,
        } => demo(&config, &strand, durable, count).await,
        Command::Recover => recover(&config).await,
        Command::Inspect => inspect(&config).await,
        Command::RemoveStrand { name } => remove_strand(&config, &name).await,
    }
}

async fn demo(config: &BrokerConfig, strand: &str, durable: bool, count: usize) -> Result<()> {
    let transport = wiring::transport(config, &[strand]).await?;
    let wired = wiring::broker(config, transport)?;
    let broker = &wired.broker;

    let conf = if durable {
        StrandConf::durable().ordered()
    } else {
        StrandConf::volatile().ordered()
    };
    let mut entries = config.strands.clone();
    entries.push(StrandEntry {
        name: strand.to_string(),
        durable: conf.durable,
        ordered: conf.ordered,
    });
    wiring::register(broker, &entries).await?;

    let mut sent = Vec::with_capacity(count);
    for i in 0..count {
        let msg = broker.send(strand, &format!("message-{i}")).await?;
        println!("sent     {} {}", msg.id(), msg.payload());
        sent.push(msg);
    }

    for _ in 0..count {
        let msg = tokio::time::timeout(RECEIVE_TIMEOUT, broker.receive(strand))
            .await
            .context("timed out waiting for a message")??;
        println!("received {} {}", msg.id(), msg.payload());
        broker.acknowledge(strand, msg.id()).await?;
    }

    println!("{}", serde_json::to_string_pretty(&wired.metrics.snapshot())?);
    Ok(())
}

async fn recover(config: &BrokerConfig) -> Result<()> {
    // Always in-process: redelivered messages are drained and printed below.
    let channels = Arc::new(ChannelTransport::with_capacity(config.channel_capacity));
    let wired = wiring::broker(config, channels.clone())?;
    wiring::register(&wired.broker, &config.strands).await?;

    let report = wired.broker.recover_unacked_messages().await?;
    println!("resent {} message(s), {} failed", report.resent, report.failed);

    for (strand, _) in wired.durable.strands().await? {
        for _ in 0..channels.pending(&strand).await {
            let msg = wired.broker.receive(&strand).await?;
            println!("{strand} {} {}", msg.id(), msg.payload());
        }
    }

    if !report.is_clean() {
        bail!("{} message(s) could not be redelivered", report.failed);
    }
    Ok(())
}

async fn inspect(config: &BrokerConfig) -> Result<()> {
    let store = wiring::open_durable(config)?;
    for (strand, conf) in store.strands().await? {
        println!(
            "{strand} durable={} ordered={} unacked={}",
            conf.durable,
            conf.ordered,
            store.unacked(&strand).await?
        );
    }

    let mut cursor = store.unacked_iterator().await?;
    while let Some(msg) = cursor.next_message()? {
        println!("  {} {} {}", msg.strand(), msg.id(), msg.payload());
    }
    cursor.close();
    Ok(())
}

async fn remove_strand(config: &BrokerConfig, name: &str) -> Result<()> {
    let wired = wiring::broker(config, Arc::new(ChannelTransport::new()))?;
    wired
        .broker
        .strand_remove(name)
        .await
        .with_context(|| format!("removing strand {name}"))?;
    println!("removed {name}");
    Ok(())
}
