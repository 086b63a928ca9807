// Criterion benchmarks for the nomir-common codec.
//
// Run with:
//   cargo bench -p nomir-common

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nomir_common::codec::{decode, encode, NoReferences};
use nomir_common::value::{dict, list, Value};

fn flat_value() -> Value {
    dict([
        ("id", Value::Int(981234)),
        ("name", Value::from("mirrored-object")),
        ("ratio", Value::Float(0.61803)),
        ("live", Value::Bool(true)),
    ])
}

fn nested_value() -> Value {
    let row = |n: i64| list((0..8).map(|i| Value::Int(n * 8 + i)).collect::<Vec<_>>());
    dict([
        ("rows", list([row(0), row(1), row(2), row(3)])),
        ("tags", list([Value::from("a"), Value::from("b")])),
        ("blob", Value::Bytes(vec![0xAB; 200])),
    ])
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    let flat = flat_value();
    group.bench_function("flat_map", |b| {
        b.iter(|| encode(black_box(&flat), &NoReferences).unwrap());
    });

    let nested = nested_value();
    group.bench_function("nested", |b| {
        b.iter(|| encode(black_box(&nested), &NoReferences).unwrap());
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let flat = encode(&flat_value(), &NoReferences).unwrap();
    group.bench_function("flat_map", |b| {
        b.iter(|| decode(black_box(&flat), &NoReferences).unwrap());
    });

    let nested = encode(&nested_value(), &NoReferences).unwrap();
    group.bench_function("nested", |b| {
        b.iter(|| decode(black_box(&nested), &NoReferences).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
