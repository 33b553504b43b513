//! Send/receive/acknowledge round trips over the four strand configurations
//! (ordered or not, durable or not) with the in-process transport.
//!
//! Durable strands go through `SledStore`, which flushes every write.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use skein_core::impls::{ChannelTransport, MemoryStore, SledStore};
use skein_core::{Broker, StrandConf};
use tempfile::TempDir;
use tokio::runtime::Runtime;

const STRAND: &str = "bench";
const PAYLOAD: &str = "{\"order\":42,\"sku\":\"A-1001\",\"qty\":3}";

/// Concurrent producer/consumer tasks per iteration of the parallel group.
const PARALLELISM: usize = 8;

fn configurations() -> [(&'static str, StrandConf); 4] {
    [
        ("ordered_durable", StrandConf::durable().ordered()),
        ("ordered_volatile", StrandConf::volatile().ordered()),
        ("unordered_durable", StrandConf::durable()),
        ("unordered_volatile", StrandConf::volatile()),
    ]
}

/// The returned directory must outlive the broker.
fn broker(rt: &Runtime, conf: StrandConf) -> (Arc<Broker>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let durable = Arc::new(SledStore::open(dir.path().join("durable")).unwrap());
    let broker = Broker::builder(
        Arc::new(MemoryStore::new()),
        durable,
        Arc::new(ChannelTransport::with_capacity(PARALLELISM * 4)),
    )
    .build();
    rt.block_on(broker.strand_add(STRAND, conf)).unwrap();
    (Arc::new(broker), dir)
}

async fn round_trip(broker: &Broker) {
    broker.send(STRAND, PAYLOAD).await.unwrap();
    let msg = broker.receive(STRAND).await.unwrap();
    black_box(broker.acknowledge(STRAND, msg.id()).await.unwrap());
}

fn bench_sequential(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("send_sequential");
    group.throughput(Throughput::Elements(1));

    for (name, conf) in configurations() {
        let (broker, _dir) = broker(&rt, conf);
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.to_async(&rt).iter(|| round_trip(&broker));
        });
    }

    group.finish();
}

fn bench_parallel(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("send_parallel");
    group.throughput(Throughput::Elements(PARALLELISM as u64));

    for (name, conf) in configurations() {
        let (broker, _dir) = broker(&rt, conf);
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.to_async(&rt).iter(|| {
                let broker = Arc::clone(&broker);
                async move {
                    let tasks: Vec<_> = (0..PARALLELISM)
                        .map(|_| {
                            let broker = Arc::clone(&broker);
                            tokio::spawn(async move { round_trip(&broker).await })
                        })
                        .collect();
                    for task in futures::future::join_all(tasks).await {
                        task.unwrap();
                    }
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sequential, bench_parallel);
criterion_main!(benches);
