//! State-hash throughput over a populated store.
//!
//! The hash runs once per tick on every participant, so its cost bounds
//! the tick budget directly.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use quorum_engine::store::{FieldDef, Store};
use quorum_engine::{to_fixed, ClientId, Value};

fn populated_store(entities: u32) -> Store {
    let mut store = Store::new(entities.max(64), 1234).unwrap();
    store
        .register_component(
            "Transform2D",
            vec![
                FieldDef::fixed("x", 0),
                FieldDef::fixed("y", 0),
                FieldDef::fixed("vx", 0),
                FieldDef::fixed("vy", 0),
            ],
        )
        .unwrap();
    store
        .register_component("Health", vec![FieldDef::new("hp", Value::U16(100))])
        .unwrap();
    store
        .define_entity("cell")
        .with("Transform2D", &[])
        .with("Health", &[])
        .register()
        .unwrap();

    let owner = ClientId::new("bench");
    let fr = store.field_ref("Transform2D", "x").unwrap();
    for i in 0..entities {
        let id = store.spawn("cell", Some(&owner)).unwrap();
        store
            .write_fixed(fr, id, to_fixed(f64::from(i) * 0.25))
            .unwrap();
    }
    store
}

fn bench_state_hash(c: &mut Criterion) {
    for count in [64u32, 1024, 4096] {
        let store = populated_store(count);
        c.bench_function(&format!("state_hash_{}_entities", count), |b| {
            b.iter(|| black_box(store.state_hash()))
        });
    }
}

fn bench_snapshot_roundtrip(c: &mut Criterion) {
    let mut store = populated_store(1024);
    c.bench_function("sparse_snapshot_1024_entities", |b| {
        b.iter(|| black_box(store.sparse_snapshot(true)))
    });

    let snapshot = store.sparse_snapshot(true);
    c.bench_function("snapshot_encode_1024_entities", |b| {
        b.iter(|| black_box(snapshot.encode()))
    });
}

criterion_group!(benches, bench_state_hash, bench_snapshot_roundtrip);
criterion_main!(benches);
