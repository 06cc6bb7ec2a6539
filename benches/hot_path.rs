use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bytemuck::Zeroable;

use bbo_rx::engine::pool::SlotPool;
use bbo_rx::nic::frame::build_bbo_payload;
use bbo_rx::protocol::bbo::BboRecord;
use bbo_rx::rx::parser;
use bbo_rx::shm::publisher::RingPublisher;
use bbo_rx::shm::ring::GatewayBbo;

fn benchmark_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.sample_size(1000);

    let mut payload = [0u8; 44];
    build_bbo_payload(&mut payload, b"AAPL", 1_500_000, 100, 1_501_000, 150, 1_000);
    let mut pool = SlotPool::new();
    pool.warm_cache();

    group.bench_function("full_payload", |b| {
        let mut seq = 0u32;
        b.iter(|| {
            seq = seq.wrapping_add(1);
            black_box(parser::parse(
                black_box(payload.as_ptr()),
                black_box(payload.len()),
                &mut pool,
                1_000_000,
                seq,
            ))
        });
    });

    group.bench_function("minimal_payload", |b| {
        let mut seq = 0u32;
        b.iter(|| {
            seq = seq.wrapping_add(1);
            black_box(parser::parse(
                black_box(payload.as_ptr()),
                black_box(28),
                &mut pool,
                1_000_000,
                seq,
            ))
        });
    });

    group.finish();
}

fn benchmark_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    group.sample_size(1000);

    let shm = "bborx_bench";
    RingPublisher::unlink(shm);
    let publisher = RingPublisher::open_or_create(shm).expect("ring");

    let mut rec = BboRecord::zeroed();
    rec.set_symbol(b"AAPL");
    rec.bid_price = 150.0;
    rec.ask_price = 150.1;
    rec.bid_shares = 100;
    rec.ask_shares = 150;
    rec.spread = 0.1;
    rec.valid = 1;

    group.bench_function("widen_and_publish", |b| {
        let mut drain = GatewayBbo::zeroed();
        b.iter(|| {
            black_box(publisher.publish(black_box(&rec)));
            // Keep the ring from filling: consume what we publish.
            publisher.ring().try_consume(&mut drain);
        });
    });

    group.finish();
    drop(publisher);
    RingPublisher::unlink(shm);
}

criterion_group!(benches, benchmark_parse, benchmark_publish);
criterion_main!(benches);
