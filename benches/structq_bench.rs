//! Benchmarks for StructQ evaluation and session index lookups.
//!
//! Run with: cargo bench --bench structq_bench

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::HashMap;

use apolo_charging_engine::decimal::Dec;
use apolo_charging_engine::engine::Cdr;
use apolo_charging_engine::sessions::index::SessionIndex;
use apolo_charging_engine::structq::StructQ;

fn sample_cdr() -> Cdr {
    let mut cdr = Cdr {
        origin_id: "dsafdsaf".to_string(),
        tenant: "cgrates.org".to_string(),
        account: "1001".to_string(),
        destination: "+4986517174963".to_string(),
        setup_time: Some(Utc::now()),
        usage: Duration::seconds(35),
        cost: Dec::new(125, 2),
        ..Default::default()
    };
    cdr.extra_fields.insert("Supplier".to_string(), "supplier1".to_string());
    cdr
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("structq/query");
    let cdr = sample_cdr();

    let queries = [
        ("empty", ""),
        ("equality", r#"{"Account": "1001"}"#),
        ("prefix", r#"{"Destination": {"$sw": "+49"}}"#),
        ("duration_cmp", r#"{"Usage": {"$gt": "30s"}}"#),
        (
            "nested_or",
            r#"{"$or": [{"Account": "1002"}, {"$and": [{"Tenant": "cgrates.org"}, {"Destination": {"$re": "^\\+49"}}]}]}"#,
        ),
        ("extra_field", r#"{"Supplier": {"$in": ["supplier1", "supplier2"]}}"#),
    ];
    for (name, source) in queries {
        let q = StructQ::new(source).expect("valid query");
        group.bench_function(name, |b| b.iter(|| black_box(q.query(black_box(&cdr)))));
    }

    group.bench_function("parse_nested", |b| {
        b.iter(|| {
            black_box(StructQ::new(
                r#"{"$or": [{"Account": "1002"}, {"$and": [{"Tenant": "cgrates.org"}, {"Usage": {"$lte": "1m"}}]}]}"#,
            ))
        })
    });

    group.finish();
}

fn bench_change(c: &mut Criterion) {
    let q = StructQ::new(r#"{"Destination": {"$repl": ["^\\+49(\\d+)", "0049${1}"]}}"#).expect("valid query");
    c.bench_function("structq/change_repl", |b| {
        b.iter_batched(
            sample_cdr,
            |mut cdr| black_box(q.change(&mut cdr)),
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("sessions/index");

    for size in [100usize, 1_000, 10_000] {
        let mut index = SessionIndex::new(vec!["Account".to_string(), "Destination".to_string()]);
        for i in 0..size {
            let id = format!("session{}", i);
            index.index(&id, |field| match field {
                "Account" => format!("{}", 1000 + i % 50),
                _ => format!("+4986{}", i % 7),
            });
        }
        let mut filters = HashMap::new();
        filters.insert("Account".to_string(), "1010".to_string());
        filters.insert("Destination".to_string(), "+49863".to_string());

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("matching", size), &filters, |b, f| {
            b.iter(|| black_box(index.matching(f)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_query, bench_change, bench_index);
criterion_main!(benches);
