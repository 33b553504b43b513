//! End-to-end broker scenarios over the real backends.

use std::sync::Arc;

use proptest::prelude::*;
use skein_core::domain::ErrorKind;
use skein_core::impls::{ChannelTransport, MemoryStore, RecordingMetrics, SledStore, WsTransport};
use skein_core::ports::Storage;
use skein_core::{Broker, BrokerError, Durability, Msg, RecoveryReport, StrandConf};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn init_tracing() -> tracing::subscriber::DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(subscriber)
}

fn in_memory() -> (Arc<MemoryStore>, Arc<MemoryStore>, Arc<ChannelTransport>, Broker) {
    let volatile = Arc::new(MemoryStore::new());
    let durable = Arc::new(MemoryStore::new());
    let transport = Arc::new(ChannelTransport::with_capacity(1024));
    let broker = Broker::builder(volatile.clone(), durable.clone(), transport.clone()).build();
    (volatile, durable, transport, broker)
}

async fn unacked_payloads(store: &dyn Storage, strand: &str) -> Vec<String> {
    store
        .unacked_iterator()
        .await
        .unwrap()
        .map(Result::unwrap)
        .filter(|msg| msg.strand() == strand)
        .map(|msg| msg.payload().to_string())
        .collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn fifo_transport_preserves_send_order(payloads in prop::collection::vec(".{0,16}", 0..50)) {
        let received = runtime().block_on(async {
            let (_, _, _, broker) = in_memory();
            broker.strand_add("fifo", StrandConf::durable().ordered()).await.unwrap();
            for payload in &payloads {
                broker.send("fifo", payload).await.unwrap();
            }
            let mut received = Vec::new();
            for _ in 0..payloads.len() {
                received.push(broker.receive("fifo").await.unwrap().payload().to_string());
            }
            received
        });
        prop_assert_eq!(received, payloads);
    }

    #[test]
    fn unordered_strand_delivers_the_same_multiset(payloads in prop::collection::vec("[a-c]{1,2}", 0..50)) {
        let mut received = runtime().block_on(async {
            let (_, _, _, broker) = in_memory();
            broker.strand_add("bag", StrandConf::volatile()).await.unwrap();
            for payload in &payloads {
                broker.send("bag", payload).await.unwrap();
            }
            let mut received = Vec::new();
            for _ in 0..payloads.len() {
                received.push(broker.receive("bag").await.unwrap().payload().to_string());
            }
            received
        });
        let mut sent = payloads.clone();
        sent.sort();
        received.sort();
        prop_assert_eq!(received, sent);
    }
}

#[tokio::test]
async fn durable_messages_survive_a_restart() {
    let _tracing = init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let durable = Arc::new(SledStore::open(dir.path().join("durable")).unwrap());
    let sent: Vec<String> = (0..10).map(|i| format!("job-{i}")).collect();

    {
        let broker = Broker::builder(
            Arc::new(MemoryStore::new()),
            durable.clone(),
            Arc::new(ChannelTransport::new()),
        )
        .build();
        broker.strand_add("jobs", StrandConf::durable()).await.unwrap();
        for payload in &sent {
            broker.send("jobs", payload).await.unwrap();
        }
        // The transport and everything buffered in it are lost with this broker.
    }

    durable.reload().await.unwrap();

    let transport = Arc::new(ChannelTransport::new());
    let broker = Broker::builder(Arc::new(MemoryStore::new()), durable.clone(), transport).build();
    assert_eq!(
        broker.durability("jobs").await.unwrap(),
        Some(Durability::Durable)
    );

    let report = broker.recover_unacked_messages().await.unwrap();
    assert_eq!(report, RecoveryReport { resent: 10, failed: 0 });

    let mut received = Vec::new();
    for _ in 0..sent.len() {
        received.push(broker.receive("jobs").await.unwrap().payload().to_string());
    }
    assert_eq!(received, sent);
}

#[tokio::test]
async fn recovery_redelivers_until_acknowledged() {
    let (_, durable, _, broker) = in_memory();
    broker.strand_add("s", StrandConf::durable()).await.unwrap();
    let msg = broker.send("s", "once").await.unwrap();
    broker.receive("s").await.unwrap();

    broker.recover_unacked_messages().await.unwrap();
    broker.recover_unacked_messages().await.unwrap();

    // Same envelope, twice, with its original id.
    let first = broker.receive("s").await.unwrap();
    let second = broker.receive("s").await.unwrap();
    assert_eq!(first.id(), msg.id());
    assert_eq!(second.id(), msg.id());

    broker.acknowledge("s", msg.id()).await.unwrap();
    let report = broker.recover_unacked_messages().await.unwrap();
    assert_eq!(report.resent, 0);
    assert!(unacked_payloads(durable.as_ref(), "s").await.is_empty());
}

#[tokio::test]
async fn volatile_messages_do_not_survive_a_restart() {
    let volatile = Arc::new(MemoryStore::new());
    let durable = Arc::new(MemoryStore::new());
    {
        let broker = Broker::builder(
            volatile.clone(),
            durable.clone(),
            Arc::new(ChannelTransport::new()),
        )
        .build();
        broker.strand_add("events", StrandConf::volatile()).await.unwrap();
        broker.send("events", "X").await.unwrap();
    }

    volatile.reset().await.unwrap();

    let broker = Broker::builder(volatile.clone(), durable, Arc::new(ChannelTransport::new())).build();
    // Registration does not survive either.
    assert_eq!(
        broker.receive("events").await.unwrap_err().kind(),
        ErrorKind::StrandNotFound
    );

    broker.strand_add("events", StrandConf::volatile()).await.unwrap();
    let report = broker.recover_unacked_messages().await.unwrap();
    assert_eq!(report.resent, 0);

    let err = broker.receive("events").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MessageUnavailable);
}

#[tokio::test]
async fn acknowledge_removes_exactly_one() {
    let (_, durable, _, broker) = in_memory();
    broker.strand_add("s", StrandConf::durable()).await.unwrap();
    let mut sent = Vec::new();
    for payload in ["a", "b", "c"] {
        sent.push(broker.send("s", payload).await.unwrap());
    }

    broker.acknowledge("s", sent[1].id()).await.unwrap();
    assert_eq!(unacked_payloads(durable.as_ref(), "s").await, vec!["a", "c"]);

    let err = broker.acknowledge("s", sent[1].id()).await.unwrap_err();
    assert!(matches!(err, BrokerError::MessageNotFound { ref msg_id, .. } if msg_id == sent[1].id()));
    assert_eq!(unacked_payloads(durable.as_ref(), "s").await, vec!["a", "c"]);
}

#[tokio::test]
async fn registration_errors() {
    let (_, _, _, broker) = in_memory();
    broker.strand_add("s", StrandConf::durable()).await.unwrap();
    assert_eq!(
        broker
            .strand_add("s", StrandConf::durable())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::StrandExists
    );

    assert_eq!(
        broker.send("ghost", "x").await.unwrap_err().kind(),
        ErrorKind::StrandNotFound
    );
    assert_eq!(
        broker.receive("ghost").await.unwrap_err().kind(),
        ErrorKind::StrandNotFound
    );
    assert_eq!(
        broker.acknowledge("ghost", "x").await.unwrap_err().kind(),
        ErrorKind::StrandNotFound
    );
}

#[tokio::test]
async fn orders_flow_end_to_end() {
    let _tracing = init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let durable = Arc::new(SledStore::open(dir.path()).unwrap());
    let metrics = Arc::new(RecordingMetrics::new());
    let broker = Broker::builder(
        Arc::new(MemoryStore::new()),
        durable.clone(),
        Arc::new(ChannelTransport::new()),
    )
    .metrics(metrics.clone())
    .build();

    broker
        .strand_add("orders", StrandConf::durable().ordered())
        .await
        .unwrap();
    for payload in ["A", "B", "C"] {
        broker.send("orders", payload).await.unwrap();
    }
    assert_eq!(metrics.depth("orders"), 3);

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(broker.receive("orders").await.unwrap());
    }
    assert_eq!(
        received.iter().map(Msg::payload).collect::<Vec<_>>(),
        ["A", "B", "C"]
    );

    for msg in &received {
        let acked = broker.acknowledge("orders", msg.id()).await.unwrap();
        assert!(acked.acked());
    }
    assert!(unacked_payloads(durable.as_ref(), "orders").await.is_empty());
    assert_eq!(metrics.depth("orders"), 0);
    assert_eq!(metrics.sent("orders"), 3);
    assert_eq!(metrics.received("orders"), 3);
}

#[tokio::test]
async fn strand_remove_discards_pending_messages() {
    let dir = tempfile::tempdir().unwrap();
    let durable = Arc::new(SledStore::open(dir.path()).unwrap());
    let broker = Broker::builder(
        Arc::new(MemoryStore::new()),
        durable.clone(),
        Arc::new(ChannelTransport::new()),
    )
    .build();

    broker.strand_add("tmp", StrandConf::durable()).await.unwrap();
    broker.strand_add("keep", StrandConf::durable()).await.unwrap();
    broker.send("tmp", "gone").await.unwrap();
    broker.send("keep", "kept").await.unwrap();

    broker.strand_remove("tmp").await.unwrap();
    assert!(!durable.has_strand("tmp").await.unwrap());
    assert!(unacked_payloads(durable.as_ref(), "tmp").await.is_empty());
    assert_eq!(unacked_payloads(durable.as_ref(), "keep").await, vec!["kept"]);
}

#[tokio::test]
async fn brokers_talk_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let producer_link = Arc::new(WsTransport::new());
    let consumer_link = Arc::new(WsTransport::new());
    let (dialed, accepted) = tokio::join!(
        producer_link.connect("orders", addr),
        consumer_link.accept(&listener)
    );
    dialed.unwrap();
    assert_eq!(accepted.unwrap(), "orders");

    let producer = Broker::builder(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStore::new()),
        producer_link,
    )
    .build();
    let consumer = Broker::builder(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryStore::new()),
        consumer_link,
    )
    .build();
    producer
        .strand_add("orders", StrandConf::durable().ordered())
        .await
        .unwrap();
    consumer
        .strand_add("orders", StrandConf::durable().ordered())
        .await
        .unwrap();

    let sent = producer.send("orders", "over the wire").await.unwrap();
    let got = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        consumer.receive("orders"),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(got, sent);
}
