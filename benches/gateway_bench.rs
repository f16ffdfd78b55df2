use criterion::{black_box, criterion_group, criterion_main, Criterion};
use crossbeam_channel::bounded;
use std::sync::Arc;

use edge_gateway::message::{Action, IngressRecord, PriorityMessage};
use edge_gateway::priority::{Priority, PriorityTable};
use edge_gateway::rate_tracker::RateTracker;
use edge_gateway::receive_queue::ReceiveQueue;
use edge_gateway::router::PriorityRouter;

fn bench_rate_tracker(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_tracker");

    group.bench_function("observe_known_source", |b| {
        let tracker = RateTracker::new();
        tracker.observe("10.0.0.5", 0.0);
        let mut now = 0.0;
        b.iter(|| {
            now += 0.001;
            black_box(tracker.observe(black_box("10.0.0.5"), now));
        });
    });

    group.bench_function("observe_many_sources", |b| {
        let tracker = RateTracker::new();
        for i in 0..10_000 {
            tracker.observe(&format!("10.0.{}.{}", i / 256, i % 256), 0.0);
        }
        let mut now = 0.0;
        b.iter(|| {
            now += 0.001;
            black_box(tracker.observe(black_box("10.0.7.42"), now));
        });
    });
}

fn bench_receive_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("receive_queue");

    group.bench_function("push_recv", |b| {
        let queue = Arc::new(ReceiveQueue::new());
        let record = IngressRecord {
            source_ip: "10.0.0.5".to_string(),
            sequence: 1,
            received_at: 1_700_000_000.0,
            delta: 1.0,
        };
        b.iter(|| {
            queue.push(black_box(record.clone()));
            black_box(queue.try_recv().unwrap());
        });
    });
}

fn bench_router(c: &mut Criterion) {
    let mut group = c.benchmark_group("router");

    group.bench_function("route_high", |b| {
        let mut txs = Vec::new();
        let mut rxs = Vec::new();
        for _ in Priority::ALL {
            let (tx, rx) = bounded(1024);
            txs.push(tx);
            rxs.push(rx);
        }
        let rxs = PriorityTable::from_vec(rxs);
        let router = PriorityRouter::new(PriorityTable::from_vec(txs));
        let mut sequence = 0;
        b.iter(|| {
            sequence += 1;
            black_box(router.route(Action::High, "10.0.0.5", sequence, 100.0));
            // Keep the channel from filling so every route takes the happy path.
            let _ = rxs[Priority::High].try_recv();
        });
    });
}

fn bench_line_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_codec");

    let message = PriorityMessage {
        ip: "10.0.0.5".to_string(),
        count: 123_456,
        timestamp: 1_700_000_000.123456,
        priority: Priority::High,
    };
    let line = message.to_line().unwrap();

    group.bench_function("to_line", |b| {
        b.iter(|| black_box(message.to_line().unwrap()));
    });
    group.bench_function("from_line", |b| {
        b.iter(|| black_box(PriorityMessage::from_line(black_box(&line)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_rate_tracker,
    bench_receive_queue,
    bench_router,
    bench_line_codec
);
criterion_main!(benches);
