//! End-to-end exercise of the public `pack`/`unpack` surface, plus the
//! factory/pool and streaming decode paths.
use std::io::Cursor;
use std::sync::Arc;

use msgpack_codec::{
    pack, pack_to, unpack, unpack_from, DecodeOptions, Decoder, EncodeOptions, Encoder, Factory,
    Map, PackerFn, Pool, UnpackerFn, Value,
};

/// A point, registered as a recursive extension that writes/reads its
/// fields as an ordinary two-element msgpack array -- covering the
/// "registered recursive extension" scenario end to end through the
/// public API.
#[derive(Debug, PartialEq)]
struct Point {
    x: i64,
    y: i64,
}

fn sample_value() -> Value {
    let mut inner = Map::new();
    inner.push(Value::string("id"), Value::from(42u32));
    inner.push(Value::string("name"), Value::string("widget"));
    inner.push(
        Value::string("tags"),
        Value::Array(vec![Value::string("a"), Value::string("b")]),
    );

    let mut outer = Map::new();
    outer.push(Value::string("ok"), Value::Bool(true));
    outer.push(Value::string("payload"), Value::Map(inner));
    outer.push(Value::string("nothing"), Value::Nil);
    Value::Map(outer)
}

#[test]
fn pack_then_unpack_preserves_a_nested_value() {
    let value = sample_value();
    let bytes = pack(&value).unwrap();
    assert_eq!(unpack(&bytes).unwrap(), value);
}

#[test]
fn pack_to_and_unpack_from_round_trip_through_a_cursor() {
    let value = sample_value();
    let mut buf = Vec::new();
    pack_to(&value, &mut buf).unwrap();

    let mut cursor = Cursor::new(buf);
    assert_eq!(unpack_from(&mut cursor).unwrap(), value);
}

#[test]
fn decoder_feeds_bytes_in_arbitrary_chunks() {
    let value = sample_value();
    let bytes = pack(&value).unwrap();

    let mut decoder = Decoder::new();
    for chunk in bytes.chunks(3) {
        decoder.feed(chunk);
    }
    assert_eq!(decoder.read().unwrap(), Some(value));
}

#[test]
fn decoder_values_iterates_concatenated_messages() {
    let a = Value::from(1u8);
    let b = Value::string("two");
    let c = Value::Array(vec![Value::from(3u8)]);

    let mut bytes = pack(&a).unwrap();
    bytes.extend(pack(&b).unwrap());
    bytes.extend(pack(&c).unwrap());

    let mut decoder = Decoder::new();
    decoder.feed(&bytes);
    let collected: Vec<Value> = decoder.values().map(|v| v.unwrap()).collect();
    assert_eq!(collected, vec![a, b, c]);
}

#[test]
fn factory_and_pool_round_trip_a_value() {
    // pool.rs logs checkout/return events at trace level; initialize a
    // subscriber here so that output is actually observable when this
    // test is run with `RUST_LOG=trace`.
    let _ = env_logger::try_init();

    let factory = Arc::new(Factory::new());
    let pool = Pool::new(factory, 4);

    let value = sample_value();
    let bytes = pool.with_encoder(|e| {
        e.write(&value).unwrap();
        e.finalize().unwrap()
    });

    let decoded = pool.with_decoder(|d| {
        d.feed(&bytes);
        d.read().unwrap().unwrap()
    });
    assert_eq!(decoded, value);
}

#[test]
fn malformed_trailing_bytes_are_rejected_by_unpack() {
    let mut bytes = pack(&Value::from(1u8)).unwrap();
    bytes.push(2); // an extra, unrelated value
    assert!(unpack(&bytes).is_err());
}

#[test]
fn read_array_header_supports_manual_container_traversal() {
    let bytes = pack(&Value::Array(vec![Value::from(10u8), Value::from(20u8)])).unwrap();
    let mut decoder = Decoder::new();
    decoder.feed(&bytes);
    let len = decoder.read_array_header().unwrap().unwrap();
    let mut elements = Vec::new();
    for _ in 0..len {
        elements.push(decoder.read().unwrap().unwrap());
    }
    assert_eq!(elements, vec![Value::from(10u8), Value::from(20u8)]);
}

#[test]
fn compatibility_mode_encoder_avoids_str8_and_binary_tags() {
    let mut factory = Factory::new();
    factory.set_encode_options(EncodeOptions::default().with_compatibility_mode(true));
    factory.freeze();

    let mut encoder: Encoder = factory.encoder();
    encoder.write_binary(&[9, 9, 9]).unwrap();
    let bytes = encoder.finalize().unwrap();

    // compatibility mode emits binary using a fixstr tag (3 bytes -> 0xa3)
    assert_eq!(bytes, vec![0xa3, 9, 9, 9]);

    let decoded = unpack(&bytes).unwrap();
    assert_eq!(decoded, Value::string("\u{9}\u{9}\u{9}"));
}

#[test]
fn registered_recursive_extension_round_trips_through_the_public_api() {
    let mut factory = Factory::new();
    factory
        .register_type::<Point>(
            7,
            PackerFn::Recursive(Arc::new(|value, encoder| {
                let p = value.downcast_ref::<Point>().expect("registered for Point");
                encoder.write(&Value::Array(vec![Value::from(p.x), Value::from(p.y)]))
            })),
            UnpackerFn::Recursive(Arc::new(|decoder| {
                let value = decoder.read()?.ok_or(msgpack_codec::Error::Eof)?;
                let items = value.as_array().expect("extension payload is an array");
                let point = Point {
                    x: items[0].as_i64().expect("x is an integer"),
                    y: items[1].as_i64().expect("y is an integer"),
                };
                Ok(Box::new(point) as Box<dyn std::any::Any + Send>)
            })),
            false,
        )
        .unwrap();
    factory.freeze();

    let mut encoder = factory.encoder();
    encoder.write_typed(&Point { x: 10, y: 20 }).unwrap();
    let bytes = encoder.finalize().unwrap();
    assert_eq!(bytes, vec![0xc7, 0x03, 0x07, 0x92, 0x0a, 0x14]);

    let mut decoder = factory.decoder();
    decoder.feed(&bytes);
    let point: Point = decoder.read_typed().unwrap().unwrap();
    assert_eq!(point, Point { x: 10, y: 20 });
}

#[test]
fn decode_options_builder_round_trips_symbolized_keys() {
    let mut factory = Factory::new();
    factory.set_decode_options(DecodeOptions::default().with_symbolize_keys(true));
    factory.freeze();

    let mut map = Map::new();
    map.push(Value::string("shared-key"), Value::from(1u8));
    let bytes = pack(&Value::Map(map)).unwrap();

    let mut decoder: Decoder = factory.decoder();
    decoder.feed(&bytes);
    match decoder.read().unwrap() {
        Some(Value::Map(m)) => assert_eq!(m.iter().next().unwrap().0, Value::string("shared-key")),
        other => panic!("expected a map, got {:?}", other),
    }
}
