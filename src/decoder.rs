//! Resumable, streaming value decoding.
use std::any::{Any, TypeId};
use std::io::Read;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::integer::Integer;
use crate::intern;
use crate::marker::{Marker, TIMESTAMP_EXT_TYPE};
use crate::registry::{UnpackerFn, UnpackerRegistry, OVERSIZED_INTEGER};
use crate::timestamp::Timestamp;
use crate::value::{Extension, Map, Value};

/// Above this many elements, a container header's declared length is not
/// trusted for up-front `Vec`/`Map` preallocation -- a malicious or
/// truncated length field should not let a few header bytes cause a
/// large allocation before any element has actually been read.
const PREALLOC_CAP: usize = 4096;

/// Options controlling how a [`Decoder`] interprets incoming bytes.
#[derive(Clone, Copy, Debug)]
pub struct DecodeOptions {
    /// When set, map keys that decode as strings are run through the
    /// process-wide interner (see [`crate::intern`]) instead of each
    /// getting a fresh allocation.
    pub symbolize_keys: bool,
    /// When set, an extension type id with no registration in this
    /// decoder's registry (and that isn't -1, the standard timestamp)
    /// decodes to a raw [`Value::Extension`] instead of failing with
    /// [`Error::UnknownExtType`].
    pub allow_unknown_ext: bool,
    /// Maximum container nesting depth before [`Error::Stack`].
    pub max_depth: usize,
    /// When set, a decoded value is handed back only once it (and every
    /// value it contains) can no longer be mutated through the handle
    /// [`Decoder::read`] returns -- see [`Decoder::read`] for what this
    /// means in an ownership-based language with no shared-mutable tree.
    pub freeze: bool,
    /// Advisory flag enabling more aggressive interning on symbol-typed
    /// extension payloads. Has no effect on the bytes produced or
    /// accepted on the wire.
    pub optimized_symbols_parsing: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            symbolize_keys: false,
            allow_unknown_ext: false,
            max_depth: crate::MAX_STACK_DEPTH,
            freeze: false,
            optimized_symbols_parsing: false,
        }
    }
}

impl DecodeOptions {
    /// Start from the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set [`DecodeOptions::max_depth`].
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set [`DecodeOptions::symbolize_keys`].
    pub fn with_symbolize_keys(mut self, symbolize_keys: bool) -> Self {
        self.symbolize_keys = symbolize_keys;
        self
    }

    /// Set [`DecodeOptions::allow_unknown_ext`].
    pub fn with_allow_unknown_ext(mut self, allow_unknown_ext: bool) -> Self {
        self.allow_unknown_ext = allow_unknown_ext;
        self
    }

    /// Set [`DecodeOptions::freeze`].
    pub fn with_freeze(mut self, freeze: bool) -> Self {
        self.freeze = freeze;
        self
    }

    /// Set [`DecodeOptions::optimized_symbols_parsing`].
    pub fn with_optimized_symbols_parsing(mut self, optimized_symbols_parsing: bool) -> Self {
        self.optimized_symbols_parsing = optimized_symbols_parsing;
        self
    }
}

enum FrameKind {
    Array { items: Vec<Value>, remaining: usize },
    Map { pairs: Map, remaining: usize, pending_key: Option<Value> },
}

struct Frame {
    kind: FrameKind,
}

impl Frame {
    /// Deliver a newly-decoded value into this frame. Returns `true` if
    /// the frame is now complete (its declared length has been reached).
    fn push(&mut self, value: Value) -> bool {
        match &mut self.kind {
            FrameKind::Array { items, remaining } => {
                items.push(value);
                *remaining -= 1;
                *remaining == 0
            }
            FrameKind::Map { pairs, remaining, pending_key } => match pending_key.take() {
                None => {
                    *pending_key = Some(value);
                    false
                }
                Some(key) => {
                    pairs.push(key, value);
                    *remaining -= 1;
                    *remaining == 0
                }
            },
        }
    }

    /// `true` if the very next value pushed will be treated as a map key
    /// (as opposed to a value, or an array element).
    fn awaits_map_key(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::Map { pending_key: None, .. }
        )
    }

    fn finish(self) -> Value {
        match self.kind {
            FrameKind::Array { items, .. } => Value::Array(items),
            FrameKind::Map { pairs, .. } => Value::Map(pairs),
        }
    }
}

enum ContainerStart {
    Empty(Value),
    Frame(Frame),
}

fn start_array(len: usize) -> ContainerStart {
    if len == 0 {
        ContainerStart::Empty(Value::Array(Vec::new()))
    } else {
        ContainerStart::Frame(Frame {
            kind: FrameKind::Array {
                items: Vec::with_capacity(len.min(PREALLOC_CAP)),
                remaining: len,
            },
        })
    }
}

fn start_map(len: usize) -> ContainerStart {
    if len == 0 {
        ContainerStart::Empty(Value::Map(Map::new()))
    } else {
        ContainerStart::Frame(Frame {
            kind: FrameKind::Map {
                pairs: Map::with_capacity(len.min(PREALLOC_CAP)),
                remaining: 2 * len,
                pending_key: None,
            },
        })
    }
}

#[derive(Clone)]
enum PartialKind {
    String(usize),
    Binary(usize),
    Ext { type_id: i8, len: usize },
}

enum TagStep {
    NeedMore,
    Value(Value),
    Push(Frame),
}

enum Step {
    NeedMore,
    Progressed,
    Done(Value),
}

/// Decodes the fixed-width payload of a scalar tag that has no direct
/// `Buffer` reader of its own (`Int64`/`F32`/`F64` go through
/// `Buffer::read_i64_be`/`read_f32`/`read_f64` instead, at the call site).
fn decode_scalar_payload(marker: Marker, payload: &[u8]) -> Value {
    match marker {
        Marker::UInt8 => Value::Integer(Integer::from(payload[0])),
        Marker::UInt16 => Value::Integer(Integer::from(u16::from_be_bytes(payload.try_into().unwrap()))),
        Marker::UInt32 => Value::Integer(Integer::from(u32::from_be_bytes(payload.try_into().unwrap()))),
        Marker::UInt64 => Value::Integer(Integer::from(u64::from_be_bytes(payload.try_into().unwrap()))),
        Marker::Int8 => Value::Integer(Integer::from(payload[0] as i8)),
        Marker::Int16 => Value::Integer(Integer::from(i16::from_be_bytes(payload.try_into().unwrap()))),
        Marker::Int32 => Value::Integer(Integer::from(i32::from_be_bytes(payload.try_into().unwrap()))),
        _ => unreachable!("decode_scalar_payload called with a marker handled elsewhere"),
    }
}

/// Decodes [`Value`]s from a stream of bytes fed incrementally via
/// [`Decoder::feed`].
///
/// Each call to [`Decoder::read`] makes as much progress as the
/// currently-buffered bytes allow and returns `Ok(None)` rather than
/// blocking when more input is needed -- no bytes are consumed on a
/// short read, so the same call can simply be retried after the next
/// `feed`. Container nesting (arrays/maps) is tracked on an explicit
/// stack rather than the Rust call stack, bounded by
/// [`DecodeOptions::max_depth`].
pub struct Decoder {
    buf: Buffer,
    registry: Arc<UnpackerRegistry>,
    options: DecodeOptions,
    stack: Vec<Frame>,
    partial: Option<PartialKind>,
}

impl Decoder {
    /// Construct a decoder with no extension type registrations and
    /// default options.
    pub fn new() -> Decoder {
        Decoder {
            buf: Buffer::new(),
            registry: Arc::new(UnpackerRegistry::new()),
            options: DecodeOptions::default(),
            stack: Vec::new(),
            partial: None,
        }
    }

    pub(crate) fn from_parts(registry: Arc<UnpackerRegistry>, options: DecodeOptions) -> Decoder {
        Decoder {
            buf: Buffer::new(),
            registry,
            options,
            stack: Vec::new(),
            partial: None,
        }
    }

    /// Append bytes to the decoder's input buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.feed(data);
    }

    fn build_ext_value(&self, type_id: i8, payload: Vec<u8>) -> Result<Value> {
        if type_id == TIMESTAMP_EXT_TYPE {
            return Timestamp::decode_payload(&payload).map(Value::Timestamp);
        }
        if self.registry.lookup(type_id).is_none() && !self.options.allow_unknown_ext {
            return Err(Error::UnknownExtType(type_id));
        }
        Ok(Value::Extension(Extension::new(type_id, payload)))
    }

    fn finish_payload(&self, marker: Marker, type_id: Option<i8>, payload: Vec<u8>) -> Result<Value> {
        match marker {
            Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                let s = std::str::from_utf8(&payload)?;
                Ok(Value::String(Arc::from(s)))
            }
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => Ok(Value::Binary(payload)),
            _ => self.build_ext_value(type_id.expect("ext marker carries a type id"), payload),
        }
    }

    fn begin_payload_wait(&mut self, marker: Marker, len: usize, type_id: Option<i8>) -> Result<TagStep> {
        if let Some(payload) = self.buf.read_bytes(len) {
            self.finish_payload(marker, type_id, payload).map(TagStep::Value)
        } else {
            self.partial = Some(match (marker, type_id) {
                (Marker::Str8, _) | (Marker::Str16, _) | (Marker::Str32, _) => PartialKind::String(len),
                (Marker::Bin8, _) | (Marker::Bin16, _) | (Marker::Bin32, _) => PartialKind::Binary(len),
                (_, Some(tid)) => PartialKind::Ext { type_id: tid, len },
                _ => unreachable!("begin_payload_wait called with a fixed-size marker"),
            });
            Ok(TagStep::NeedMore)
        }
    }

    fn resume_partial(&mut self, partial: PartialKind) -> Result<Option<Value>> {
        match partial.clone() {
            PartialKind::String(len) => match self.buf.read_bytes(len) {
                Some(bytes) => {
                    let s = std::str::from_utf8(&bytes)?;
                    Ok(Some(Value::String(Arc::from(s))))
                }
                None => {
                    self.partial = Some(partial);
                    Ok(None)
                }
            },
            PartialKind::Binary(len) => match self.buf.read_bytes(len) {
                Some(bytes) => Ok(Some(Value::Binary(bytes))),
                None => {
                    self.partial = Some(partial);
                    Ok(None)
                }
            },
            PartialKind::Ext { type_id, len } => match self.buf.read_bytes(len) {
                Some(bytes) => Ok(Some(self.build_ext_value(type_id, bytes)?)),
                None => {
                    self.partial = Some(partial);
                    Ok(None)
                }
            },
        }
    }

    fn push_container(&mut self, start: ContainerStart) -> Result<TagStep> {
        match start {
            ContainerStart::Empty(v) => Ok(TagStep::Value(v)),
            ContainerStart::Frame(frame) => {
                if self.stack.len() >= self.options.max_depth {
                    return Err(Error::Stack);
                }
                Ok(TagStep::Push(frame))
            }
        }
    }

    fn try_read_tag(&mut self) -> Result<TagStep> {
        let tag = match self.buf.peek_byte() {
            Some(t) => t,
            None => return Ok(TagStep::NeedMore),
        };
        let marker = Marker::from_u8(tag);

        match marker {
            Marker::Reserved => Err(Error::MalformedFormat(
                "tag byte 0xc1 is reserved and never valid".into(),
            )),
            Marker::Nil | Marker::False | Marker::True | Marker::PosFixInt(_) | Marker::NegFixInt(_) => {
                self.buf.read_byte();
                Ok(TagStep::Value(match marker {
                    Marker::Nil => Value::Nil,
                    Marker::False => Value::Bool(false),
                    Marker::True => Value::Bool(true),
                    Marker::PosFixInt(n) => Value::Integer(Integer::from(n)),
                    Marker::NegFixInt(n) => Value::Integer(Integer::from(n)),
                    _ => unreachable!(),
                }))
            }
            Marker::UInt8
            | Marker::UInt16
            | Marker::UInt32
            | Marker::UInt64
            | Marker::Int8
            | Marker::Int16
            | Marker::Int32 => {
                let extra = marker.fixed_payload_len();
                if self.buf.bytes_available() < 1 + extra {
                    return Ok(TagStep::NeedMore);
                }
                self.buf.read_byte();
                let payload = self.buf.read_bytes(extra).expect("availability already checked");
                Ok(TagStep::Value(decode_scalar_payload(marker, &payload)))
            }
            Marker::Int64 | Marker::F32 | Marker::F64 => {
                let extra = marker.fixed_payload_len();
                if self.buf.bytes_available() < 1 + extra {
                    return Ok(TagStep::NeedMore);
                }
                self.buf.read_byte();
                let value = match marker {
                    Marker::Int64 => Value::Integer(Integer::from(
                        self.buf.read_i64_be().expect("availability already checked"),
                    )),
                    Marker::F32 => Value::F32(self.buf.read_f32().expect("availability already checked")),
                    Marker::F64 => Value::F64(self.buf.read_f64().expect("availability already checked")),
                    _ => unreachable!(),
                };
                Ok(TagStep::Value(value))
            }
            Marker::FixStr(len) => {
                let len = len as usize;
                if self.buf.bytes_available() < 1 + len {
                    return Ok(TagStep::NeedMore);
                }
                self.buf.read_byte();
                let bytes = self.buf.read_bytes(len).expect("availability already checked");
                let s = std::str::from_utf8(&bytes)?;
                Ok(TagStep::Value(Value::String(Arc::from(s))))
            }
            Marker::FixExt1 | Marker::FixExt2 | Marker::FixExt4 | Marker::FixExt8 | Marker::FixExt16 => {
                let total = marker.fixed_payload_len();
                if self.buf.bytes_available() < 1 + total {
                    return Ok(TagStep::NeedMore);
                }
                self.buf.read_byte();
                let rest = self.buf.read_bytes(total).expect("availability already checked");
                let type_id = rest[0] as i8;
                Ok(TagStep::Value(self.build_ext_value(type_id, rest[1..].to_vec())?))
            }
            Marker::FixMap(count) => {
                self.buf.read_byte();
                self.push_container(start_map(count as usize))
            }
            Marker::FixArray(count) => {
                self.buf.read_byte();
                self.push_container(start_array(count as usize))
            }
            _ => {
                let header_tail = marker.header_tail_len();
                if self.buf.bytes_available() < 1 + header_tail {
                    return Ok(TagStep::NeedMore);
                }
                self.buf.read_byte();
                match marker {
                    Marker::Bin8 | Marker::Str8 => {
                        let len = self.buf.read_byte().unwrap() as usize;
                        self.begin_payload_wait(marker, len, None)
                    }
                    Marker::Bin16 | Marker::Str16 => {
                        let len = self.buf.read_u16_be().unwrap() as usize;
                        self.begin_payload_wait(marker, len, None)
                    }
                    Marker::Bin32 | Marker::Str32 => {
                        let len = self.buf.read_u32_be().unwrap() as usize;
                        self.begin_payload_wait(marker, len, None)
                    }
                    Marker::Ext8 => {
                        let len = self.buf.read_byte().unwrap() as usize;
                        let type_id = self.buf.read_i8().unwrap();
                        self.begin_payload_wait(marker, len, Some(type_id))
                    }
                    Marker::Ext16 => {
                        let len = self.buf.read_u16_be().unwrap() as usize;
                        let type_id = self.buf.read_i8().unwrap();
                        self.begin_payload_wait(marker, len, Some(type_id))
                    }
                    Marker::Ext32 => {
                        let len = self.buf.read_u32_be().unwrap() as usize;
                        let type_id = self.buf.read_i8().unwrap();
                        self.begin_payload_wait(marker, len, Some(type_id))
                    }
                    Marker::Array16 => {
                        let len = self.buf.read_u16_be().unwrap() as usize;
                        self.push_container(start_array(len))
                    }
                    Marker::Array32 => {
                        let len = self.buf.read_u32_be().unwrap() as usize;
                        self.push_container(start_array(len))
                    }
                    Marker::Map16 => {
                        let len = self.buf.read_u16_be().unwrap() as usize;
                        self.push_container(start_map(len))
                    }
                    Marker::Map32 => {
                        let len = self.buf.read_u32_be().unwrap() as usize;
                        self.push_container(start_map(len))
                    }
                    _ => unreachable!("all variable-length markers are handled above"),
                }
            }
        }
    }

    fn deliver(&mut self, mut value: Value) -> Option<Value> {
        loop {
            let symbolize = self.options.symbolize_keys;
            match self.stack.last_mut() {
                None => return Some(value),
                Some(frame) => {
                    if symbolize && frame.awaits_map_key() {
                        if let Value::String(s) = &value {
                            value = Value::String(intern::intern(s));
                        }
                    }
                    if frame.push(value) {
                        let frame = self.stack.pop().unwrap();
                        value = frame.finish();
                        continue;
                    }
                    return None;
                }
            }
        }
    }

    fn step(&mut self) -> Result<Step> {
        if let Some(partial) = self.partial.take() {
            return match self.resume_partial(partial)? {
                Some(value) => Ok(match self.deliver(value) {
                    Some(v) => Step::Done(v),
                    None => Step::Progressed,
                }),
                None => Ok(Step::NeedMore),
            };
        }
        match self.try_read_tag()? {
            TagStep::NeedMore => Ok(Step::NeedMore),
            TagStep::Value(v) => Ok(match self.deliver(v) {
                Some(v) => Step::Done(v),
                None => Step::Progressed,
            }),
            TagStep::Push(frame) => {
                self.stack.push(frame);
                Ok(Step::Progressed)
            }
        }
    }

    /// Attempt to decode one top-level value out of the bytes fed so
    /// far. Returns `Ok(None)` if the buffered bytes don't yet contain a
    /// complete value -- no bytes are consumed in that case, so calling
    /// [`Decoder::feed`] with more data and retrying is always safe.
    pub fn read(&mut self) -> Result<Option<Value>> {
        loop {
            match self.step()? {
                Step::NeedMore => return Ok(None),
                Step::Progressed => continue,
                Step::Done(v) => {
                    self.buf.gc();
                    return Ok(Some(v));
                }
            }
        }
    }

    /// Decode exactly one value out of `data`, failing if the bytes
    /// don't contain a complete value or if any bytes remain afterward.
    pub fn full_decode(&mut self, data: &[u8]) -> Result<Value> {
        self.feed(data);
        let value = self.read()?.ok_or(Error::Eof)?;
        if self.buf.bytes_available() > 0 {
            return Err(Error::MalformedFormat(
                "trailing bytes after a fully decoded value".into(),
            ));
        }
        Ok(value)
    }

    /// Decode one value, pulling more bytes from `source` as needed.
    pub fn decode_from<R: Read>(&mut self, source: &mut R) -> Result<Value> {
        loop {
            if let Some(value) = self.read()? {
                return Ok(value);
            }
            let mut chunk = [0u8; 4096];
            let n = source.read(&mut chunk)?;
            if n == 0 {
                return Err(Error::Eof);
            }
            self.feed(&chunk[..n]);
        }
    }

    /// Discard the next value without materializing it, if one is fully
    /// buffered. Returns `Ok(None)` if more input is needed, same as
    /// [`Decoder::read`].
    pub fn skip(&mut self) -> Result<Option<()>> {
        Ok(self.read()?.map(|_| ()))
    }

    /// Read a low-level array header -- the declared element count --
    /// without materializing the elements or pushing a container frame.
    /// Returns `Ok(None)` if a complete header isn't buffered yet, same
    /// as [`Decoder::read`]. Fails with [`Error::TypeMismatch`] if the
    /// next tag isn't of the array family.
    pub fn read_array_header(&mut self) -> Result<Option<usize>> {
        self.read_container_header(true)
    }

    /// Read a low-level map header -- the declared key-value pair count.
    /// See [`Decoder::read_array_header`].
    pub fn read_map_header(&mut self) -> Result<Option<usize>> {
        self.read_container_header(false)
    }

    fn read_container_header(&mut self, want_array: bool) -> Result<Option<usize>> {
        let tag = match self.buf.peek_byte() {
            Some(t) => t,
            None => return Ok(None),
        };
        let marker = Marker::from_u8(tag);
        let is_array = matches!(marker, Marker::FixArray(_) | Marker::Array16 | Marker::Array32);
        let is_map = matches!(marker, Marker::FixMap(_) | Marker::Map16 | Marker::Map32);
        let expected = if want_array { "array" } else { "map" };
        if want_array && !is_array {
            return Err(Error::TypeMismatch { expected, found: marker.family_name() });
        }
        if !want_array && !is_map {
            return Err(Error::TypeMismatch { expected, found: marker.family_name() });
        }

        match marker {
            Marker::FixArray(len) | Marker::FixMap(len) => {
                self.buf.read_byte();
                Ok(Some(len as usize))
            }
            Marker::Array16 | Marker::Map16 => {
                if self.buf.bytes_available() < 3 {
                    return Ok(None);
                }
                self.buf.read_byte();
                Ok(Some(self.buf.read_u16_be().expect("availability already checked") as usize))
            }
            Marker::Array32 | Marker::Map32 => {
                if self.buf.bytes_available() < 5 {
                    return Ok(None);
                }
                self.buf.read_byte();
                Ok(Some(self.buf.read_u32_be().expect("availability already checked") as usize))
            }
            _ => unreachable!("checked against is_array/is_map above"),
        }
    }

    /// Read the next value and wrap it in an [`Arc`] so subsequent clones
    /// are O(1) instead of a deep copy. This is the concrete realization
    /// of [`DecodeOptions::freeze`] in an ownership-based language: Rust
    /// gives a plain owned [`Value`] no aliasing to begin with, so
    /// "freezing" it amounts to handing back a shared, immutable handle
    /// rather than the owned tree [`Decoder::read`] returns.
    pub fn read_shared(&mut self) -> Result<Option<Arc<Value>>> {
        Ok(self.read()?.map(Arc::new))
    }

    /// Clear all decoder state (buffered bytes, container stack,
    /// in-flight partial read) so the instance can be reused for an
    /// unrelated stream. Extension registrations are untouched.
    pub fn reset(&mut self) {
        self.buf.reset();
        self.stack.clear();
        self.partial = None;
    }

    /// An iterator over successive top-level values. Ends (rather than
    /// erroring) once the buffered bytes run out mid-value; feed more
    /// bytes and call [`Decoder::values`] again to keep going.
    pub fn values(&mut self) -> Values<'_> {
        Values { decoder: self }
    }

    /// Decode the next value as an extension and convert it to a
    /// concrete Rust type `T` via the registry a [`crate::Factory`]
    /// seeded this decoder with. Returns `Ok(None)` if no complete value
    /// is buffered yet.
    ///
    /// `T = Integer` is handled specially: a value that decoded to the
    /// native [`Value::Integer`] tag is returned directly, and a
    /// registered `Integer` extension without the
    /// [`crate::registry::OVERSIZED_INTEGER`] flag is ignored as though
    /// unregistered, mirroring [`Encoder::write_typed`]'s native-tag-wins
    /// rule for in-range integers.
    pub fn read_typed<T: Any>(&mut self) -> Result<Option<T>> {
        let value = match self.read()? {
            Some(v) => v,
            None => return Ok(None),
        };
        let wants_integer = TypeId::of::<T>() == TypeId::of::<Integer>();
        if wants_integer {
            if let Value::Integer(n) = value {
                let boxed: Box<dyn Any> = Box::new(n);
                return Ok(Some(
                    *boxed
                        .downcast::<T>()
                        .expect("TypeId check above guarantees T is Integer"),
                ));
            }
        }
        let (type_id, payload) = match value {
            Value::Extension(Extension { type_id, payload }) => (type_id, payload),
            Value::Timestamp(ts) => {
                return (Box::new(ts) as Box<dyn Any>)
                    .downcast::<T>()
                    .map(|b| Some(*b))
                    .map_err(|_| Error::TypeMismatch {
                        expected: "registered extension type",
                        found: "timestamp",
                    });
            }
            other => {
                return Err(Error::TypeMismatch {
                    expected: "extension value",
                    found: other.kind_name(),
                })
            }
        };
        let (func, flags) = self
            .registry
            .lookup(type_id)
            .ok_or(Error::UnknownExtType(type_id))?;
        if wants_integer && flags & OVERSIZED_INTEGER == 0 {
            return Err(Error::UnknownExtType(type_id));
        }
        let boxed = match func {
            UnpackerFn::Flat(f) => f(&payload)?,
            UnpackerFn::Recursive(f) => {
                let mut payload_decoder = Decoder::from_parts(self.registry.clone(), self.options.clone());
                payload_decoder.feed(&payload);
                f(&mut payload_decoder)?
            }
        };
        boxed.downcast::<T>().map(|b| Some(*b)).map_err(|_| Error::TypeMismatch {
            expected: "registered type",
            found: "a different registered type",
        })
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new()
    }
}

/// Iterator returned by [`Decoder::values`].
pub struct Values<'a> {
    decoder: &'a mut Decoder,
}

impl<'a> Iterator for Values<'a> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.read().transpose()
    }
}

impl<'a> IntoIterator for &'a mut Decoder {
    type Item = Result<Value>;
    type IntoIter = Values<'a>;

    fn into_iter(self) -> Values<'a> {
        self.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumes_across_feed_boundaries() {
        let mut d = Decoder::new();
        // str8 "hello world!" split mid-payload
        let mut bytes = vec![0xd9, 12];
        bytes.extend_from_slice(b"hello world!");
        d.feed(&bytes[..5]);
        assert!(d.read().unwrap().is_none());
        d.feed(&bytes[5..]);
        assert_eq!(d.read().unwrap(), Some(Value::String(Arc::from("hello world!"))));
    }

    #[test]
    fn nested_array_resumes_one_element_at_a_time() {
        let mut d = Decoder::new();
        d.feed(&[0x92, 1]);
        assert!(d.read().unwrap().is_none());
        d.feed(&[2]);
        assert_eq!(
            d.read().unwrap(),
            Some(Value::Array(vec![Value::from(1u8), Value::from(2u8)]))
        );
    }

    #[test]
    fn reserved_tag_is_an_error() {
        let mut d = Decoder::new();
        d.feed(&[0xc1]);
        assert!(d.read().is_err());
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut d = Decoder::new();
        d.options.max_depth = 2;
        // three nested single-element arrays: 0x91 0x91 0x91 1
        d.feed(&[0x91, 0x91, 0x91, 1]);
        assert!(matches!(d.read(), Err(Error::Stack)));
    }

    #[test]
    fn empty_map_completes_immediately() {
        let mut d = Decoder::new();
        d.feed(&[0x80]);
        assert_eq!(d.read().unwrap(), Some(Value::Map(Map::new())));
    }

    #[test]
    fn timestamp_ext_decodes_specially() {
        let mut d = Decoder::new();
        d.feed(&[0xd6, 0xff, 0x65, 0x53, 0x6a, 0x00]);
        match d.read().unwrap() {
            Some(Value::Timestamp(ts)) => assert_eq!(ts.nanoseconds(), 0),
            other => panic!("expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn values_iterator_yields_each_top_level_value_in_order() {
        let mut d = Decoder::new();
        d.feed(&[1, 2, 3]);
        let values: Vec<_> = d.values().map(|v| v.unwrap()).collect();
        assert_eq!(values, vec![Value::from(1u8), Value::from(2u8), Value::from(3u8)]);
    }

    #[test]
    fn reset_clears_buffered_and_in_flight_state() {
        let mut d = Decoder::new();
        d.feed(&[0x91]); // fixarray of 1, incomplete
        assert!(d.read().unwrap().is_none());
        d.reset();
        assert_eq!(d.stack.len(), 0);
        d.feed(&[42]);
        assert_eq!(d.read().unwrap(), Some(Value::from(42u8)));
    }

    #[test]
    fn unknown_negative_ext_type_errors_by_default() {
        let mut d = Decoder::new();
        d.feed(&[0xd4, 0xfe, 0x00]); // fixext1, type -2
        assert!(matches!(d.read(), Err(Error::UnknownExtType(-2))));
    }

    #[test]
    fn read_array_header_reports_length_without_elements() {
        let mut d = Decoder::new();
        d.feed(&[0x92, 1, 2]);
        assert_eq!(d.read_array_header().unwrap(), Some(2));
        assert_eq!(d.read().unwrap(), Some(Value::from(1u8)));
        assert_eq!(d.read().unwrap(), Some(Value::from(2u8)));
    }

    #[test]
    fn read_map_header_rejects_non_map_tags() {
        let mut d = Decoder::new();
        d.feed(&[0x91, 1]); // a fixarray, not a map
        assert!(matches!(
            d.read_map_header(),
            Err(Error::TypeMismatch { expected: "map", found: "array" })
        ));
    }

    #[test]
    fn read_array_header_waits_for_a_full_header() {
        let mut d = Decoder::new();
        d.feed(&[0xdc, 0x00]); // array16, length byte split mid-header
        assert_eq!(d.read_array_header().unwrap(), None);
        d.feed(&[0x02, 1, 2]);
        assert_eq!(d.read_array_header().unwrap(), Some(2));
    }

    #[test]
    fn read_shared_wraps_the_decoded_value_in_an_arc() {
        let mut d = Decoder::new();
        d.feed(&[42]);
        let shared = d.read_shared().unwrap().unwrap();
        assert_eq!(*shared, Value::from(42u8));
    }

    #[test]
    fn unregistered_app_extension_errors_unless_allowed() {
        let mut d = Decoder::new();
        d.feed(&[0xd4, 5, 0x00]); // fixext1, app-defined type 5, not registered
        assert!(matches!(d.read(), Err(Error::UnknownExtType(5))));

        let mut d = Decoder::new();
        d.options.allow_unknown_ext = true;
        d.feed(&[0xd4, 5, 0x00]);
        match d.read().unwrap() {
            Some(Value::Extension(Extension { type_id, payload })) => {
                assert_eq!(type_id, 5);
                assert_eq!(payload, vec![0]);
            }
            other => panic!("expected a raw extension, got {:?}", other),
        }
    }
}
