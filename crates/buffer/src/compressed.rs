use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::error;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::{Buffer, BufferError, UncompressedBuffer};

/// Checksum algorithm protecting each compressed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Crc32,
    Adler32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Lz4,
    Snappy,
    Deflate,
}

/// A logical uncompressed stream over a physical file of fixed-size
/// compressed chunks.
///
/// The chunk layout comes from the `-CompressionInfo.db` sidecar: algorithm
/// name, chunk length (uncompressed), total uncompressed length, and the
/// physical offset of every chunk. Each physical chunk is followed by a
/// 4-byte big-endian checksum.
///
/// `seek` only moves the logical cursor; chunks intersecting a read are
/// located through the offset table, fetched with one positional read,
/// verified and inflated into a growable window. A still-useful prefix of
/// the window survives sequential reads across chunk boundaries.
///
/// A checksum mismatch is corruption, not I/O: it is logged with the file
/// name and chunk range and the process exits.
#[derive(Debug)]
pub struct CompressedBuffer {
    path: PathBuf,
    file: File,
    algorithm: Algorithm,
    checksum: ChecksumKind,
    /// True when the checksum covers the compressed bytes (verify before
    /// inflating); false when it covers the uncompressed bytes.
    check_before_decompression: bool,
    verify_checksums: bool,
    chunk_len: usize,
    uncompressed_len: i64,
    /// Physical offset of each chunk in the data file.
    offsets: Vec<i64>,

    /// Decompressed window and the logical offset of its first byte.
    window: Vec<u8>,
    window_len: usize,
    window_offset: i64,
    /// Logical read cursor.
    file_offset: i64,
    /// Scratch for the raw (still compressed) bytes of one fetch.
    raw: Vec<u8>,
    eof: bool,
}

impl CompressedBuffer {
    /// Opens `data_path`, parsing the chunk layout from `info_path`.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        data_path: P,
        info_path: Q,
        checksum: ChecksumKind,
        check_before_decompression: bool,
        verify_checksums: bool,
    ) -> Result<Self, BufferError> {
        let info_path = info_path.as_ref().to_path_buf();
        let mut info = UncompressedBuffer::open(&info_path)?;

        let name = info.read_string();
        let algorithm = match name.as_slice() {
            b"LZ4Compressor" => Algorithm::Lz4,
            b"SnappyCompressor" => Algorithm::Snappy,
            b"DeflateCompressor" => Algorithm::Deflate,
            other => {
                return Err(BufferError::UnknownCompression(
                    String::from_utf8_lossy(other).into_owned(),
                ))
            }
        };

        // Key/value parameters are irrelevant to decoding.
        let param_count = info.read_int();
        for _ in 0..param_count.max(0) {
            info.read_string();
            info.read_string();
        }

        let chunk_len = info.read_int();
        let uncompressed_len = info.read_longlong();
        let n_chunks = info.read_int();
        let mut offsets = Vec::with_capacity(n_chunks.max(0) as usize);
        for _ in 0..n_chunks.max(0) {
            offsets.push(info.read_longlong());
        }
        if info.is_eof() || chunk_len <= 0 {
            return Err(BufferError::TruncatedInfo(info_path));
        }

        let path = data_path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            file,
            algorithm,
            checksum,
            check_before_decompression,
            verify_checksums,
            chunk_len: chunk_len as usize,
            uncompressed_len,
            offsets,
            window: Vec::new(),
            window_len: 0,
            window_offset: 0,
            file_offset: 0,
            raw: Vec::new(),
            eof: false,
        })
    }

    /// An independent handle over the same file at the same logical
    /// position. The decompressed window is copied so no re-read is needed.
    pub fn duplicate(&self) -> Result<Self, BufferError> {
        Ok(Self {
            path: self.path.clone(),
            file: File::open(&self.path)?,
            algorithm: self.algorithm,
            checksum: self.checksum,
            check_before_decompression: self.check_before_decompression,
            verify_checksums: self.verify_checksums,
            chunk_len: self.chunk_len,
            uncompressed_len: self.uncompressed_len,
            offsets: self.offsets.clone(),
            window: self.window.clone(),
            window_len: self.window_len,
            window_offset: self.window_offset,
            file_offset: self.file_offset,
            raw: Vec::new(),
            eof: self.eof,
        })
    }

    /// Grows the window to `min_length`, sliding the still-useful suffix
    /// (`useless..useless + useful`) to the front first.
    fn adjust_window(&mut self, min_length: usize, useful: usize, useless: usize) {
        if useful > 0 {
            self.window.copy_within(useless..useless + useful, 0);
        }
        if self.window.len() < min_length {
            self.window.resize(min_length, 0);
        }
        self.window_len = min_length;
    }

    fn verify_chunk(
        &self,
        data: &[u8],
        stored: &[u8],
        chunk_start: i64,
        chunk_end: i64,
    ) -> bool {
        if !self.verify_checksums {
            return true;
        }

        // Seeds: 0 for CRC-32, 1 for Adler-32 (adler32(0, NULL, 0)).
        let computed = match self.checksum {
            ChecksumKind::Crc32 => crc32fast::hash(data),
            ChecksumKind::Adler32 => adler32::RollingAdler32::from_buffer(data).hash(),
        };
        let stored = BigEndian::read_u32(stored);
        if stored == computed {
            return true;
        }

        error!(
            "checksum mismatch in {} (chunk bytes {}..{}): stored {:#010x}, computed {:#010x}",
            self.path.display(),
            chunk_start,
            chunk_end,
            stored,
            computed
        );
        false
    }

    fn decompress_chunk(
        algorithm: Algorithm,
        raw_chunk: &[u8],
        out: &mut [u8],
    ) -> bool {
        match algorithm {
            Algorithm::Snappy => snap::raw::Decoder::new()
                .decompress(raw_chunk, out)
                .is_ok(),
            Algorithm::Lz4 => {
                // LZ4 chunks start with the uncompressed length, little-endian.
                if raw_chunk.len() < 4 {
                    return false;
                }
                let len = LittleEndian::read_u32(&raw_chunk[..4]) as usize;
                if len > out.len() {
                    return false;
                }
                lz4_flex::block::decompress_into(&raw_chunk[4..], &mut out[..len]).is_ok()
            }
            Algorithm::Deflate => {
                let mut decoder = flate2::read::ZlibDecoder::new(raw_chunk);
                let mut written = 0;
                loop {
                    match decoder.read(&mut out[written..]) {
                        Ok(0) => return true,
                        Ok(n) => {
                            written += n;
                            if written == out.len() {
                                return true;
                            }
                        }
                        Err(_) => return false,
                    }
                }
            }
        }
    }

    /// Fetches, verifies and inflates every chunk intersecting
    /// `[file_offset, last_byte_required)` into the window.
    fn refill(&mut self, last_byte_required: i64) -> Option<()> {
        let chunk_len = self.chunk_len as i64;
        let last_in_window = self.window_offset + self.window_len as i64;

        let last_chunk = ((last_byte_required + chunk_len - 1) / chunk_len) as usize;
        let mut first_chunk = (self.file_offset / chunk_len) as usize;
        let mut useful = 0usize;
        if self.file_offset >= self.window_offset && self.file_offset <= last_in_window {
            first_chunk = (last_in_window / chunk_len) as usize;
            useful = (last_in_window - self.file_offset) as usize;
        }
        let useless = self.window_len - useful;
        let min_length = (last_chunk - first_chunk) * self.chunk_len + useful;
        self.adjust_window(min_length, useful, useless);
        self.window_offset = first_chunk as i64 * chunk_len - useful as i64;

        let start_of_read = *self.offsets.get(first_chunk)?;
        let end_of_read = match self.offsets.get(last_chunk) {
            Some(&offset) => offset,
            None => self.file.seek(SeekFrom::End(0)).ok()? as i64,
        };

        let read_len = (end_of_read - start_of_read) as usize;
        if self.raw.len() < read_len {
            self.raw.resize(read_len, 0);
        }
        self.file.seek(SeekFrom::Start(start_of_read as u64)).ok()?;
        self.file.read_exact(&mut self.raw[..read_len]).ok()?;

        for i in first_chunk..last_chunk {
            let chunk_start = self.offsets[i];
            let chunk_end = if i + 1 == last_chunk {
                end_of_read
            } else {
                self.offsets[i + 1]
            };
            // Each chunk trails its 4-byte checksum.
            let chunk_size = (chunk_end - chunk_start - 4) as usize;
            let window_pos = (i - first_chunk) * self.chunk_len + useful;

            let raw_start = (chunk_start - start_of_read) as usize;
            let raw_chunk = &self.raw[raw_start..raw_start + chunk_size];
            let stored = &self.raw[raw_start + chunk_size..raw_start + chunk_size + 4];

            if self.check_before_decompression
                && !self.verify_chunk(raw_chunk, stored, chunk_start, chunk_end)
            {
                std::process::exit(1);
            }

            let out = &mut self.window[window_pos..window_pos + self.chunk_len];
            if !Self::decompress_chunk(self.algorithm, raw_chunk, out) {
                error!(
                    "failed to decompress chunk at {} in {}",
                    chunk_start,
                    self.path.display()
                );
                return None;
            }

            if !self.check_before_decompression {
                // The checksum covers the uncompressed bytes; the final
                // chunk may be logically shorter than chunk_len.
                let logical_remaining =
                    self.uncompressed_len - (self.window_offset + window_pos as i64);
                let valid = logical_remaining.min(chunk_len) as usize;
                let stored =
                    &self.raw[raw_start + chunk_size..raw_start + chunk_size + 4];
                let data = &self.window[window_pos..window_pos + valid];
                if !self.verify_chunk(data, stored, chunk_start, chunk_end) {
                    std::process::exit(1);
                }
            }
        }
        Some(())
    }
}

impl Buffer for CompressedBuffer {
    fn read_bytes(&mut self, n: usize) -> Option<&[u8]> {
        let last_byte_required = self.file_offset + n as i64;
        if last_byte_required > self.uncompressed_len {
            self.eof = true;
            return None;
        }

        let last_in_window = self.window_offset + self.window_len as i64;
        if self.file_offset < self.window_offset || last_byte_required > last_in_window {
            if self.refill(last_byte_required).is_none() {
                self.eof = true;
                return None;
            }
        }

        let start = (self.file_offset - self.window_offset) as usize;
        self.file_offset += n as i64;
        Some(&self.window[start..start + n])
    }

    fn skip_bytes(&mut self, n: usize) {
        self.file_offset += n as i64;
    }

    fn seek(&mut self, position: i64) {
        // Decompression is deferred to the next read.
        self.file_offset = position;
        self.eof = false;
    }

    fn is_eof(&self) -> bool {
        self.eof
    }
}
