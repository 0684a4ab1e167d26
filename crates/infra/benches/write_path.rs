use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use chrono::Utc;
use merchkit_catalog::{Collection, NewCollection};
use merchkit_core::{AggregateId, CorrelationId, UserId};
use merchkit_events::EventMeta;
use merchkit_infra::store::memory::InMemoryStore;
use merchkit_infra::store::{CoreStore, WriteBatch, WriteOp};

fn meta() -> EventMeta {
    EventMeta::new(UserId::new(), CorrelationId::new(), Utc::now())
}

fn fresh_collection() -> Collection {
    Collection::create(
        NewCollection {
            id: AggregateId::new(),
            name: "Bench Collection".to_string(),
            description: String::new(),
            slug: format!("bench-{}", AggregateId::new()),
            images: vec![],
            positions_id: AggregateId::new(),
        },
        &meta(),
    )
    .unwrap()
}

/// Cost of one mutate + snapshot + event serialization round.
fn bench_aggregate_mutation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_mutation");
    group.throughput(Throughput::Elements(1));
    group.bench_function("publish_and_snapshot", |b| {
        b.iter(|| {
            let mut collection = fresh_collection();
            collection.publish(&meta()).unwrap();
            let snapshot = collection.snapshot().unwrap();
            black_box((snapshot, collection.take_uncommitted_events()))
        })
    });
    group.finish();
}

/// Cost of a full logical transaction landing in the store.
fn bench_store_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_commit");
    group.throughput(Throughput::Elements(1));
    group.bench_function("apply_batch", |b| {
        let store = InMemoryStore::new();
        b.iter(|| {
            let mut collection = fresh_collection();
            collection.publish(&meta()).unwrap();
            let events = collection.take_uncommitted_events();

            let mut batch = WriteBatch::new();
            for event in &events {
                batch.push(WriteOp::AppendEvent(event.clone()));
            }
            batch.push(WriteOp::PutSnapshot(collection.snapshot().unwrap()));
            for event in &events {
                batch.push(WriteOp::InsertOutbox(
                    merchkit_infra::store::OutboxRow::for_event(event),
                ));
            }
            store.apply_batch(black_box(&batch)).unwrap();
        })
    });
    group.finish();
}

criterion_group!(benches, bench_aggregate_mutation, bench_store_commit);
criterion_main!(benches);
