use criterion::{black_box, criterion_group, criterion_main, Criterion};

use msgpack_codec::{pack, unpack, Map, Value};

fn sample_value() -> Value {
    let mut inner = Map::new();
    for i in 0..16u32 {
        inner.push(Value::string(format!("key-{}", i)), Value::from(i));
    }
    let mut outer = Map::new();
    outer.push(Value::string("id"), Value::from(123456789u64));
    outer.push(Value::string("name"), Value::string("a reasonably sized widget name"));
    outer.push(Value::string("fields"), Value::Map(inner));
    outer.push(
        Value::string("tags"),
        Value::Array((0..8).map(|i| Value::string(format!("tag-{}", i))).collect()),
    );
    Value::Map(outer)
}

fn encode(c: &mut Criterion) {
    let value = sample_value();
    c.bench_function("encode nested map/array value", |b| {
        b.iter(|| pack(black_box(&value)).unwrap())
    });
}

fn decode(c: &mut Criterion) {
    let bytes = pack(&sample_value()).unwrap();
    c.bench_function("decode nested map/array value", |b| {
        b.iter(|| unpack(black_box(&bytes)).unwrap())
    });
}

fn round_trip(c: &mut Criterion) {
    let value = sample_value();
    c.bench_function("encode + decode round trip", |b| {
        b.iter(|| {
            let bytes = pack(black_box(&value)).unwrap();
            unpack(black_box(&bytes)).unwrap()
        })
    });
}

criterion_group!(benches, encode, decode, round_trip);
criterion_main!(benches);
