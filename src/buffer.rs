//! A chunked byte buffer shared by the encoder (as a pending-output
//! queue) and the decoder (as a sliding window over fed input).
use std::io::{self, Write};

/// Segments smaller than this are coalesced into the previous segment
/// instead of becoming a new one, to keep the segment count low for
/// small, frequent writes (tag bytes, short strings) without copying
/// every byte of a large payload into one contiguous allocation.
const COALESCE_THRESHOLD: usize = 512;

/// An opaque position into a [`Buffer`]'s logical byte stream, returned
/// by [`Buffer::save_position`] and consumed by [`Buffer::restore_position`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Position(usize);

#[derive(Clone, Debug, Default)]
pub(crate) struct Buffer {
    segments: Vec<Vec<u8>>,
    /// Logical offset of `segments[0][0]`. Bytes before this have been
    /// reclaimed by `gc` and can never be read or rolled back to again.
    base: usize,
    /// Current read cursor, as a logical offset.
    position: usize,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::default()
    }

    fn push_data(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Some(last) = self.segments.last_mut() {
            if last.len() < COALESCE_THRESHOLD && data.len() < COALESCE_THRESHOLD {
                last.extend_from_slice(data);
                return;
            }
        }
        self.segments.push(data.to_vec());
    }

    /// Append bytes to be written out by [`Buffer::flush_to`] or
    /// returned by [`Buffer::to_contiguous_bytes`].
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.push_data(data);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.push_data(&[v]);
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.push_data(&v.to_be_bytes());
    }

    pub fn write_u32_be(&mut self, v: u32) {
        self.push_data(&v.to_be_bytes());
    }

    pub fn write_u64_be(&mut self, v: u64) {
        self.push_data(&v.to_be_bytes());
    }

    pub fn write_i8(&mut self, v: i8) {
        self.push_data(&v.to_be_bytes());
    }

    pub fn write_i16_be(&mut self, v: i16) {
        self.push_data(&v.to_be_bytes());
    }

    pub fn write_i32_be(&mut self, v: i32) {
        self.push_data(&v.to_be_bytes());
    }

    pub fn write_i64_be(&mut self, v: i64) {
        self.push_data(&v.to_be_bytes());
    }

    pub fn write_f32_be(&mut self, v: f32) {
        self.push_data(&v.to_bits().to_be_bytes());
    }

    pub fn write_f64_be(&mut self, v: f64) {
        self.push_data(&v.to_bits().to_be_bytes());
    }

    /// Feed externally-received bytes into the buffer for the decoder to
    /// consume. Uses the same coalescing as the write side.
    pub fn feed(&mut self, data: &[u8]) {
        self.push_data(data);
    }

    fn total_len(&self) -> usize {
        self.base + self.segments.iter().map(Vec::len).sum::<usize>()
    }

    /// How many unread bytes are currently buffered.
    pub fn bytes_available(&self) -> usize {
        self.total_len() - self.position
    }

    /// Locate the `(segment index, offset within segment)` for an
    /// absolute logical position. Returns `None` at or past the end of
    /// buffered data.
    fn locate(&self, pos: usize) -> Option<(usize, usize)> {
        if pos < self.base {
            // Only reachable if a caller restores a position from before
            // the last `gc()`, which nothing in this crate ever does.
            return None;
        }
        let mut rel = pos - self.base;
        for (i, seg) in self.segments.iter().enumerate() {
            if rel < seg.len() {
                return Some((i, rel));
            }
            rel -= seg.len();
        }
        None
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.locate(self.position).map(|(i, o)| self.segments[i][o])
    }

    pub fn read_byte(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.position += 1;
        Some(b)
    }

    /// Read exactly `n` bytes, or return `None` (consuming nothing) if
    /// fewer than `n` bytes are currently buffered.
    pub fn read_bytes(&mut self, n: usize) -> Option<Vec<u8>> {
        if self.bytes_available() < n {
            return None;
        }
        let mut out = Vec::with_capacity(n);
        let mut pos = self.position;
        let mut remaining = n;
        while remaining > 0 {
            let (i, o) = self.locate(pos).expect("bytes_available already checked");
            let seg = &self.segments[i];
            let take = remaining.min(seg.len() - o);
            out.extend_from_slice(&seg[o..o + take]);
            pos += take;
            remaining -= take;
        }
        self.position = pos;
        Some(out)
    }

    pub fn read_u16_be(&mut self) -> Option<u16> {
        self.read_bytes(2).map(|b| u16::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn read_u32_be(&mut self) -> Option<u32> {
        self.read_bytes(4).map(|b| u32::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn read_u64_be(&mut self) -> Option<u64> {
        self.read_bytes(8).map(|b| u64::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn read_i8(&mut self) -> Option<i8> {
        self.read_byte().map(|b| b as i8)
    }

    pub fn read_i64_be(&mut self) -> Option<i64> {
        self.read_bytes(8).map(|b| i64::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> Option<f32> {
        self.read_bytes(4).map(|b| f32::from_bits(u32::from_be_bytes(b.try_into().unwrap())))
    }

    pub fn read_f64(&mut self) -> Option<f64> {
        self.read_bytes(8).map(|b| f64::from_bits(u64::from_be_bytes(b.try_into().unwrap())))
    }

    /// Snapshot the current read cursor, to be restored with
    /// [`Buffer::restore_position`] if a tentative read turns out not to
    /// have had enough data available.
    pub fn save_position(&self) -> Position {
        Position(self.position)
    }

    pub fn restore_position(&mut self, pos: Position) {
        self.position = pos.0;
    }

    /// Copy all unread bytes into one contiguous vector, without
    /// consuming them.
    pub fn to_contiguous_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes_available());
        if let Some((i, o)) = self.locate(self.position) {
            out.extend_from_slice(&self.segments[i][o..]);
            for seg in &self.segments[i + 1..] {
                out.extend_from_slice(seg);
            }
        }
        out
    }

    /// Write all unread bytes to `sink` and reset the buffer to empty.
    pub fn flush_to<W: Write>(&mut self, sink: &mut W) -> io::Result<()> {
        if let Some((i, o)) = self.locate(self.position) {
            sink.write_all(&self.segments[i][o..])?;
            for seg in &self.segments[i + 1..] {
                sink.write_all(seg)?;
            }
        }
        self.reset();
        Ok(())
    }

    /// Discard all buffered data and reset the cursor to zero.
    pub fn reset(&mut self) {
        self.segments.clear();
        self.base = 0;
        self.position = 0;
    }

    /// Permanently drop segments that lie entirely behind the read
    /// cursor, reclaiming their memory. Only safe to call when the
    /// caller is certain it will never roll back before the current
    /// position again (e.g. once a top-level value has been fully
    /// assembled).
    pub fn gc(&mut self) {
        while let Some(first) = self.segments.first() {
            if self.base + first.len() <= self.position {
                let len = first.len();
                self.segments.remove(0);
                self.base += len;
            } else {
                break;
            }
        }
    }
}
