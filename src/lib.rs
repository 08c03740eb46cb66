//! A resumable MessagePack encoder/decoder with a pluggable
//! extension-type registry.
//!
//! The data model is [`Value`]: a closed sum type covering nil, bool,
//! integers, floats, strings, binaries, arrays, maps, the standard
//! timestamp extension, and raw application-defined extensions.
//! [`Encoder`]/[`Decoder`] convert between `Value` and bytes directly;
//! [`Factory`] additionally lets applications register concrete Rust
//! types against extension type ids for a typed `write_typed`/`read_typed`
//! path, and mints a [`Pool`] of recycled instances for high-throughput
//! use.
#![allow(dead_code)]

mod buffer;
mod decoder;
mod encoder;
mod error;
mod ext;
mod factory;
mod integer;
mod intern;
mod marker;
mod pool;
mod registry;
mod timestamp;
mod value;

use std::io::{Read, Write};

pub use decoder::{DecodeOptions, Decoder, Values};
pub use encoder::{EncodeOptions, Encoder};
pub use error::{Error, Result};
pub use factory::Factory;
pub use integer::Integer;
pub use pool::Pool;
pub use registry::{PackerFn, UnpackerFn, OVERSIZED_INTEGER};
pub use timestamp::Timestamp;
pub use value::{Extension, Map, Value};

/// Maximum container/recursion nesting depth enforced by both
/// [`Encoder`] and [`Decoder`], guarding against adversarial input and
/// stack overflow on deeply-nested in-memory values.
pub const MAX_STACK_DEPTH: usize = 128;

/// Encode `value` into a freshly-allocated byte vector.
pub fn pack(value: &Value) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new();
    encoder.write(value)?;
    encoder.finalize()
}

/// Encode `value` and write it to `sink`.
pub fn pack_to<W: Write>(value: &Value, sink: &mut W) -> Result<()> {
    let bytes = pack(value)?;
    sink.write_all(&bytes)?;
    Ok(())
}

/// Decode exactly one value from `bytes`, failing if the bytes don't
/// contain a complete value or if any bytes remain afterward.
pub fn unpack(bytes: &[u8]) -> Result<Value> {
    Decoder::new().full_decode(bytes)
}

/// Decode one value, pulling more bytes from `source` as needed.
pub fn unpack_from<R: Read>(source: &mut R) -> Result<Value> {
    Decoder::new().decode_from(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips_a_nested_value() {
        let mut map = Map::new();
        map.push(Value::string("a"), Value::from(1u32));
        map.push(Value::string("b"), Value::Array(vec![Value::from(2i64), Value::Nil]));
        let value = Value::Map(map);

        let bytes = pack(&value).unwrap();
        assert_eq!(unpack(&bytes).unwrap(), value);
    }

    #[test]
    fn pack_to_and_unpack_from_work_with_plain_io() {
        let value = Value::string("hello");
        let mut buf = Vec::new();
        pack_to(&value, &mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(unpack_from(&mut cursor).unwrap(), value);
    }
}
