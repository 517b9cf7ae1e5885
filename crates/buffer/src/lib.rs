//! # Buffer — sequential typed reads over SSTable component files
//!
//! Every on-disk component of an SSTable (data, index, summary, statistics,
//! compression info) is consumed through the [`Buffer`] trait: a forward
//! cursor handing out borrowed byte slices, with typed decoders layered on
//! top. Two implementations exist:
//!
//! * [`UncompressedBuffer`] — a plain sequential file.
//! * [`CompressedBuffer`] — a *logical* uncompressed stream reassembled on
//!   demand from fixed-size compressed chunks, with per-chunk checksum
//!   verification.
//!
//! ## Wire primitives
//!
//! ```text
//! short / int / longlong   big-endian signed 16/32/64
//! float / double           little-endian IEEE-754 (raw reinterpretation)
//! string                   [len: i16 BE][len bytes]
//! unsigned vint            leading 1-bits of the first byte give the number
//!                          of extra big-endian payload bytes; the remaining
//!                          low bits of the first byte carry the high part
//! vint                     zigzag-encoded signed integer over unsigned vint
//! data                     [len: i32 BE][len bytes]
//! ```
//!
//! ## EOF semantics
//!
//! A short read is not an error: `read_bytes` returns `None`, the buffer
//! latches its EOF flag, and every typed decoder degrades to a zero value /
//! empty slice. Callers watch [`Buffer::is_eof`] to stop cleanly — an
//! SSTable that ends mid-record simply stops producing rows.
//!
//! The slice returned by `read_bytes` borrows the buffer's internal scratch
//! and is invalidated by the next read, skip or seek.

mod compressed;
mod plain;

pub use compressed::{ChecksumKind, CompressedBuffer};
pub use plain::UncompressedBuffer;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while opening a buffer. Mid-stream problems are reported
/// through [`Buffer::is_eof`] instead, see the module docs.
#[derive(Debug, Error)]
pub enum BufferError {
    /// An underlying I/O error (missing file, permission, short sidecar).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The compression info sidecar names an algorithm we cannot decode.
    #[error("unknown compression algorithm {0:?}")]
    UnknownCompression(String),

    /// The compression info sidecar ended before the chunk offset table.
    #[error("truncated compression info {0:?}")]
    TruncatedInfo(PathBuf),
}

/// Sequential reader over one SSTable component file.
///
/// Implementors provide the four cursor primitives; the typed decoders are
/// derived from `read_bytes` and shared by both file flavors.
pub trait Buffer {
    /// Returns the next `n` bytes, or `None` (and latches EOF) if the
    /// stream ends first. The slice is valid until the next call that
    /// touches the cursor.
    fn read_bytes(&mut self, n: usize) -> Option<&[u8]>;

    /// Advances the cursor without decoding.
    fn skip_bytes(&mut self, n: usize);

    /// Repositions the cursor to an absolute (logical) offset.
    fn seek(&mut self, position: i64);

    /// True once a read has run past the end of the stream.
    fn is_eof(&self) -> bool;

    fn read_byte(&mut self) -> u8 {
        self.read_bytes(1).map_or(0, |b| b[0])
    }

    fn read_short(&mut self) -> i16 {
        self.read_bytes(2).map_or(0, BigEndian::read_i16)
    }

    fn read_int(&mut self) -> i32 {
        self.read_bytes(4).map_or(0, BigEndian::read_i32)
    }

    fn read_longlong(&mut self) -> i64 {
        self.read_bytes(8).map_or(0, BigEndian::read_i64)
    }

    fn read_float(&mut self) -> f32 {
        self.read_bytes(4).map_or(0.0, LittleEndian::read_f32)
    }

    fn read_double(&mut self) -> f64 {
        self.read_bytes(8).map_or(0.0, LittleEndian::read_f64)
    }

    /// Unsigned variable-length integer. The count of leading 1-bits in the
    /// first byte selects 0–8 extra big-endian bytes; the surviving low bits
    /// of the first byte become the most significant part of the value.
    fn read_unsigned_vint(&mut self) -> u64 {
        let first = match self.read_bytes(1) {
            Some(b) => b[0],
            None => return 0,
        };
        if first & 0x80 == 0 {
            return u64::from(first);
        }

        let extra = first.leading_ones() as usize;
        let mut value = u64::from(first) & (0xffu64 >> extra);
        let data = match self.read_bytes(extra) {
            Some(d) => d,
            None => return 0,
        };
        for &byte in data {
            value = (value << 8) | u64::from(byte);
        }
        value
    }

    /// Zigzag-encoded signed integer carried in an unsigned vint.
    fn read_vint(&mut self) -> i64 {
        let n = self.read_unsigned_vint();
        ((n >> 1) as i64) ^ -((n & 1) as i64)
    }

    /// 16-bit-length-prefixed byte string. Empty on EOF or a non-positive
    /// length (a zero length is meaningful: it terminates old-format rows).
    fn read_string(&mut self) -> Vec<u8> {
        let len = self.read_short();
        if self.is_eof() || len <= 0 {
            return Vec::new();
        }
        self.read_bytes(len as usize).map_or_else(Vec::new, <[u8]>::to_vec)
    }

    /// Vint-length-prefixed byte string (modern metadata encoding).
    fn read_vint_length_string(&mut self) -> Vec<u8> {
        let len = self.read_unsigned_vint();
        if self.is_eof() || len == 0 {
            return Vec::new();
        }
        self.read_bytes(len as usize).map_or_else(Vec::new, <[u8]>::to_vec)
    }

    /// 32-bit-length-prefixed blob, copied into `out`. Returns false when
    /// the stream ends before the payload does.
    fn read_data(&mut self, out: &mut Vec<u8>) -> bool {
        let len = self.read_int();
        if self.is_eof() || len < 0 {
            return false;
        }
        out.clear();
        if len == 0 {
            return true;
        }
        match self.read_bytes(len as usize) {
            Some(bytes) => {
                out.extend_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Skips a 32-bit-length-prefixed blob without copying it.
    fn skip_data(&mut self) {
        let len = self.read_int();
        if len > 0 {
            self.skip_bytes(len as usize);
        }
    }
}
