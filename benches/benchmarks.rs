//! Performance benchmarks for PeerHub backend
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use peerhub_backend::events::EventBus;
use peerhub_backend::geo::{self, Proximity};
use peerhub_backend::protocol::parse_inbound;
use peerhub_backend::registry::{PeerFilter, PeerMeta, PeerRegistry};

/// Benchmark the haversine distance
fn bench_distance(c: &mut Criterion) {
    c.bench_function("distance_km", |b| {
        b.iter(|| {
            geo::distance_km(
                black_box(48.2082),
                black_box(16.3738),
                black_box(52.52),
                black_box(13.405),
            )
        })
    });
}

/// Benchmark proximity listing over registries of different sizes
fn bench_registry_list(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("registry_list_near");

    for peer_count in [100, 1_000, 10_000].iter() {
        let registry = PeerRegistry::new(EventBus::new(16));
        runtime.block_on(async {
            for i in 0..*peer_count {
                // Spread peers over roughly a 10 degree square
                let meta = PeerMeta {
                    name: Some(format!("peer-{}", i)),
                    lat: Some(json!(45.0 + (i % 100) as f64 * 0.1)),
                    lon: Some(json!(10.0 + (i / 100) as f64 * 0.1)),
                    tags: Vec::new(),
                };
                registry.register(format!("peer-{:05}", i), None, meta).await;
            }
        });

        let filter = PeerFilter::all().near(Proximity::new(48.2, 16.37, 250.0));

        group.throughput(Throughput::Elements(*peer_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(peer_count),
            peer_count,
            |b, _| b.iter(|| runtime.block_on(registry.list(black_box(&filter)))),
        );
    }

    group.finish();
}

/// Benchmark inbound frame parsing
fn bench_parse_inbound(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_inbound");

    let frames = [
        ("heartbeat", json!({"type": "heartbeat", "peerId": "gpu-1"})),
        (
            "register",
            json!({
                "type": "register",
                "peerId": "gpu-1",
                "meta": {"name": "rig", "lat": 48.2, "lon": 16.37, "tags": ["cuda", "fp16"]}
            }),
        ),
        (
            "task_result",
            json!({
                "type": "taskResult",
                "peerId": "gpu-1",
                "taskId": "3f2b8c1e-0000-4000-8000-000000000000",
                "result": {"labels": ["cat", "dog"], "scores": [0.91, 0.07]}
            }),
        ),
    ];

    for (name, frame) in frames.iter() {
        let text = frame.to_string();
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &text, |b, text| {
            b.iter(|| parse_inbound(black_box(text)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_distance, bench_registry_list, bench_parse_inbound);
criterion_main!(benches);
