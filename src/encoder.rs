//! Value-to-wire-bytes encoding, including width-minimal tag selection.
use std::any::{Any, TypeId};
use std::io::Write;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::integer::{IntPriv, Integer};
use crate::marker::{Marker, TIMESTAMP_EXT_TYPE};
use crate::registry::{PackerFn, PackerRegistry, OVERSIZED_INTEGER};
use crate::value::{Extension, Map, Value};

/// Options controlling how an [`Encoder`] serializes values.
#[derive(Clone, Copy, Debug)]
pub struct EncodeOptions {
    /// Maximum recursion depth permitted while writing a nested
    /// [`Value`]. Guards against stack overflow on adversarially-built
    /// in-memory values; the wire format itself has no depth limit.
    pub max_depth: usize,
    /// Restrict emitted tags to the pre-binary MessagePack subset: `str8`
    /// is never used (strings are promoted to `str16`/`str32`) and binary
    /// payloads are emitted using string tags instead of `bin8/16/32`.
    pub compatibility_mode: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions { max_depth: crate::MAX_STACK_DEPTH, compatibility_mode: false }
    }
}

impl EncodeOptions {
    /// Start from the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set [`EncodeOptions::max_depth`].
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set [`EncodeOptions::compatibility_mode`].
    pub fn with_compatibility_mode(mut self, compatibility_mode: bool) -> Self {
        self.compatibility_mode = compatibility_mode;
        self
    }
}

/// Encodes [`Value`]s (and, via a [`crate::Factory`]'s type registry,
/// arbitrary registered Rust types) into MessagePack bytes.
///
/// Holds a chunked [`Buffer`] of pending output. Call [`Encoder::finalize`]
/// to retrieve the accumulated bytes -- or, if the encoder was built with
/// [`Encoder::with_sink`], to flush them to that sink instead.
pub struct Encoder {
    buf: Buffer,
    registry: Arc<PackerRegistry>,
    options: EncodeOptions,
    sink: Option<Box<dyn Write + Send>>,
}

impl Encoder {
    /// Construct an encoder with no extension type registrations and
    /// default options, accumulating output in memory.
    pub fn new() -> Encoder {
        Encoder {
            buf: Buffer::new(),
            registry: Arc::new(PackerRegistry::new()),
            options: EncodeOptions::default(),
            sink: None,
        }
    }

    pub(crate) fn from_parts(registry: Arc<PackerRegistry>, options: EncodeOptions) -> Encoder {
        Encoder {
            buf: Buffer::new(),
            registry,
            options,
            sink: None,
        }
    }

    /// Bind a sink that [`Encoder::finalize`] flushes to, instead of
    /// returning the bytes directly.
    pub fn with_sink<W: Write + Send + 'static>(mut self, sink: W) -> Encoder {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn write_nil(&mut self) {
        self.buf.write_u8(Marker::Nil.into_u8());
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.write_u8(if v { Marker::True } else { Marker::False }.into_u8());
    }

    pub fn write_int(&mut self, v: Integer) {
        match v.repr() {
            IntPriv::PosInt(n) => {
                if n < 0x80 {
                    self.buf.write_u8(Marker::PosFixInt(n as u8).into_u8());
                } else if n <= u8::MAX as u64 {
                    self.buf.write_u8(Marker::UInt8.into_u8());
                    self.buf.write_u8(n as u8);
                } else if n <= u16::MAX as u64 {
                    self.buf.write_u8(Marker::UInt16.into_u8());
                    self.buf.write_u16_be(n as u16);
                } else if n <= u32::MAX as u64 {
                    self.buf.write_u8(Marker::UInt32.into_u8());
                    self.buf.write_u32_be(n as u32);
                } else {
                    self.buf.write_u8(Marker::UInt64.into_u8());
                    self.buf.write_u64_be(n);
                }
            }
            IntPriv::NegInt(n) => {
                if n >= -32 {
                    self.buf.write_u8(Marker::NegFixInt(n as i8).into_u8());
                } else if n >= i8::MIN as i64 {
                    self.buf.write_u8(Marker::Int8.into_u8());
                    self.buf.write_i8(n as i8);
                } else if n >= i16::MIN as i64 {
                    self.buf.write_u8(Marker::Int16.into_u8());
                    self.buf.write_i16_be(n as i16);
                } else if n >= i32::MIN as i64 {
                    self.buf.write_u8(Marker::Int32.into_u8());
                    self.buf.write_i32_be(n as i32);
                } else {
                    self.buf.write_u8(Marker::Int64.into_u8());
                    self.buf.write_i64_be(n);
                }
            }
        }
    }

    /// Write a single-precision float (`f32`, tag `ca`).
    pub fn write_float32(&mut self, v: f32) {
        self.buf.write_u8(Marker::F32.into_u8());
        self.buf.write_f32_be(v);
    }

    /// Write a double-precision float (`f64`, tag `cb`), the width
    /// [`Value::F64`] always uses.
    pub fn write_float(&mut self, v: f64) {
        self.buf.write_u8(Marker::F64.into_u8());
        self.buf.write_f64_be(v);
    }

    /// Write a UTF-8 string. In [`EncodeOptions::compatibility_mode`],
    /// `str8` is skipped and lengths in `32..256` are promoted to `str16`.
    pub fn write_string(&mut self, v: &str) -> Result<()> {
        let bytes = v.as_bytes();
        let len = bytes.len();
        let skip_str8 = self.options.compatibility_mode;
        if len < 32 {
            self.buf.write_u8(Marker::FixStr(len as u8).into_u8());
        } else if len <= u8::MAX as usize && !skip_str8 {
            self.buf.write_u8(Marker::Str8.into_u8());
            self.buf.write_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.write_u8(Marker::Str16.into_u8());
            self.buf.write_u16_be(len as u16);
        } else if len <= u32::MAX as usize {
            self.buf.write_u8(Marker::Str32.into_u8());
            self.buf.write_u32_be(len as u32);
        } else {
            return Err(Error::Range(format!("string of {} bytes is too long to encode", len)));
        }
        self.buf.write_bytes(bytes);
        Ok(())
    }

    /// Write an opaque byte string. In [`EncodeOptions::compatibility_mode`]
    /// this is emitted using string tags instead of `bin8/16/32`, per the
    /// pre-binary MessagePack subset.
    pub fn write_binary(&mut self, v: &[u8]) -> Result<()> {
        if self.options.compatibility_mode {
            let len = v.len();
            if len < 32 {
                self.buf.write_u8(Marker::FixStr(len as u8).into_u8());
            } else if len <= u16::MAX as usize {
                self.buf.write_u8(Marker::Str16.into_u8());
                self.buf.write_u16_be(len as u16);
            } else if len <= u32::MAX as usize {
                self.buf.write_u8(Marker::Str32.into_u8());
                self.buf.write_u32_be(len as u32);
            } else {
                return Err(Error::Range(format!("binary of {} bytes is too long to encode", len)));
            }
            self.buf.write_bytes(v);
            return Ok(());
        }

        let len = v.len();
        if len <= u8::MAX as usize {
            self.buf.write_u8(Marker::Bin8.into_u8());
            self.buf.write_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.write_u8(Marker::Bin16.into_u8());
            self.buf.write_u16_be(len as u16);
        } else if len <= u32::MAX as usize {
            self.buf.write_u8(Marker::Bin32.into_u8());
            self.buf.write_u32_be(len as u32);
        } else {
            return Err(Error::Range(format!("binary of {} bytes is too long to encode", len)));
        }
        self.buf.write_bytes(v);
        Ok(())
    }

    pub fn write_array_header(&mut self, len: usize) -> Result<()> {
        if len < 16 {
            self.buf.write_u8(Marker::FixArray(len as u8).into_u8());
        } else if len <= u16::MAX as usize {
            self.buf.write_u8(Marker::Array16.into_u8());
            self.buf.write_u16_be(len as u16);
        } else if len <= u32::MAX as usize {
            self.buf.write_u8(Marker::Array32.into_u8());
            self.buf.write_u32_be(len as u32);
        } else {
            return Err(Error::Range(format!("array of {} elements is too long to encode", len)));
        }
        Ok(())
    }

    pub fn write_map_header(&mut self, len: usize) -> Result<()> {
        if len < 16 {
            self.buf.write_u8(Marker::FixMap(len as u8).into_u8());
        } else if len <= u16::MAX as usize {
            self.buf.write_u8(Marker::Map16.into_u8());
            self.buf.write_u16_be(len as u16);
        } else if len <= u32::MAX as usize {
            self.buf.write_u8(Marker::Map32.into_u8());
            self.buf.write_u32_be(len as u32);
        } else {
            return Err(Error::Range(format!("map of {} pairs is too long to encode", len)));
        }
        Ok(())
    }

    /// Write a raw extension: the type id and payload bytes, with no
    /// interpretation of either.
    pub fn write_ext(&mut self, type_id: i8, payload: &[u8]) -> Result<()> {
        let len = payload.len();
        match len {
            1 => self.buf.write_u8(Marker::FixExt1.into_u8()),
            2 => self.buf.write_u8(Marker::FixExt2.into_u8()),
            4 => self.buf.write_u8(Marker::FixExt4.into_u8()),
            8 => self.buf.write_u8(Marker::FixExt8.into_u8()),
            16 => self.buf.write_u8(Marker::FixExt16.into_u8()),
            _ if len <= u8::MAX as usize => {
                self.buf.write_u8(Marker::Ext8.into_u8());
                self.buf.write_u8(len as u8);
            }
            _ if len <= u16::MAX as usize => {
                self.buf.write_u8(Marker::Ext16.into_u8());
                self.buf.write_u16_be(len as u16);
            }
            _ if len <= u32::MAX as usize => {
                self.buf.write_u8(Marker::Ext32.into_u8());
                self.buf.write_u32_be(len as u32);
            }
            _ => return Err(Error::Range(format!("extension of {} bytes is too long to encode", len))),
        }
        self.buf.write_i8(type_id);
        self.buf.write_bytes(payload);
        Ok(())
    }

    fn write_map(&mut self, map: &Map, depth: usize) -> Result<()> {
        self.write_map_header(map.len())?;
        for (k, v) in map.iter() {
            self.write_value(k, depth + 1)?;
            self.write_value(v, depth + 1)?;
        }
        Ok(())
    }

    fn write_value(&mut self, value: &Value, depth: usize) -> Result<()> {
        if depth > self.options.max_depth {
            return Err(Error::Stack);
        }
        match value {
            Value::Nil => self.write_nil(),
            Value::Bool(v) => self.write_bool(*v),
            Value::Integer(v) => self.write_int(*v),
            Value::F32(v) => self.write_float32(*v),
            Value::F64(v) => self.write_float(*v),
            Value::String(v) => self.write_string(v)?,
            Value::Binary(v) => self.write_binary(v)?,
            Value::Array(v) => {
                self.write_array_header(v.len())?;
                for elem in v {
                    self.write_value(elem, depth + 1)?;
                }
            }
            Value::Map(v) => self.write_map(v, depth)?,
            Value::Timestamp(ts) => {
                let mut payload = Vec::with_capacity(ts.wire_len());
                ts.encode_payload(&mut payload);
                self.write_ext(TIMESTAMP_EXT_TYPE, &payload)?;
            }
            Value::Extension(Extension { type_id, payload }) => {
                self.write_ext(*type_id, payload)?;
            }
        }
        Ok(())
    }

    /// Encode a value, including any nested arrays/maps.
    pub fn write(&mut self, value: &Value) -> Result<()> {
        self.write_value(value, 0)
    }

    /// Encode an arbitrary Rust value via the registry a [`crate::Factory`]
    /// seeded this encoder with. Fails with [`Error::UnknownExtType`] if
    /// `T`'s concrete type (or a registered capability predicate) has no
    /// registration.
    ///
    /// A registration for [`Integer`] without the
    /// [`crate::registry::OVERSIZED_INTEGER`] flag is silently ignored
    /// here: in-range integers always use the native tag path, since
    /// that's what every other decoder on the wire expects to see.
    pub fn write_typed<T: Any>(&mut self, value: &T) -> Result<()> {
        let registry = self.registry.clone();
        let (type_id, func, flags) = registry
            .lookup(value)
            .ok_or_else(|| Error::UnknownExtType(0))?;
        if TypeId::of::<T>() == TypeId::of::<Integer>() && flags & OVERSIZED_INTEGER == 0 {
            let n = (value as &dyn Any)
                .downcast_ref::<Integer>()
                .expect("TypeId check above guarantees T is Integer");
            self.write_int(*n);
            return Ok(());
        }
        match func {
            PackerFn::Flat(f) => {
                let payload = f(value);
                self.write_ext(type_id, &payload)
            }
            PackerFn::Recursive(f) => {
                let mut payload_encoder = Encoder::from_parts(registry.clone(), self.options.clone());
                f(value, &mut payload_encoder)?;
                let payload = payload_encoder.finalize()?;
                self.write_ext(type_id, &payload)
            }
        }
    }

    /// Retrieve the accumulated bytes and reset the buffer, or -- if a
    /// sink was bound with [`Encoder::with_sink`] -- flush to it and
    /// return an empty vector.
    pub fn finalize(&mut self) -> Result<Vec<u8>> {
        if let Some(sink) = self.sink.as_mut() {
            self.buf.flush_to(sink)?;
            Ok(Vec::new())
        } else {
            let bytes = self.buf.to_contiguous_bytes();
            self.buf.reset();
            Ok(bytes)
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Encoder::new()
    }
}
