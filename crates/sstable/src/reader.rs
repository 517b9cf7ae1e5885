//! One open SSTable generation streamed as partitions → cells.
//!
//! [`SsTableReader`] wraps the two on-disk row formats behind one surface:
//! `OldReader` for everything before `ma`, `NewReader` from `ma` on. Both
//! share `ReaderCore`: the pending partition key/token, the partition deletion
//! timestamp, the current [`ColumnInfo`], and a three-state machine that
//! guarantees a cell payload is consumed or skipped before the cursor moves
//! on.
//!
//! Positioning goes summary → index → data: the sparse `-Summary.db` is
//! binary-searched for the greatest entry ≤ the target, the `-Index.db` is
//! scanned linearly from there, and the resulting data offset is sought on
//! `open`. Data buffers are opened lazily (on activation by the merge) and
//! closed once the file is exhausted.

use buffer::{Buffer, BufferError, ChecksumKind, CompressedBuffer, UncompressedBuffer};
use byteorder::{ByteOrder, NativeEndian};
use log::warn;
use partitioner::{Partitioner, Token};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::format::{
    TableConfig, Version, COMPRESSION_INFO_SUFFIX, DATA_SUFFIX, INDEX_SUFFIX, SUMMARY_SUFFIX,
};
use crate::new::NewReader;
use crate::old::OldReader;

/// Sentinel deletion timestamp: no deletion applies. Never a valid
/// timestamp, so comparisons must check it explicitly.
pub const STILL_ACTIVE: i64 = i64::MIN;

/// The cell currently pending on a reader.
///
/// `name` is empty for end-of-row sentinels and clustering artefacts.
/// The flag bits select which of the remaining fields are meaningful.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    pub name: Vec<u8>,
    /// Writer-assigned timestamp, microseconds since the epoch by
    /// convention but entirely provider-defined.
    pub ts: i64,
    pub deleted: bool,
    pub expiring: bool,
    pub range_tombstone: bool,
    /// Upper bound of a range tombstone.
    pub end_key: Vec<u8>,
    /// TTL in seconds, when `expiring`.
    pub ttl: u32,
    /// Absolute expiration in seconds, when `expiring`.
    pub expiration: u32,
    /// The extra pre-timestamp field of counter cells.
    pub counter_timestamp: i64,
}

impl ColumnInfo {
    pub(crate) fn clear_flags(&mut self) {
        self.deleted = false;
        self.expiring = false;
        self.range_tombstone = false;
    }
}

/// Reader state machine. `ReadColumnData` means a payload is pending:
/// advancing with `read_column` from there implies "skip it".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fsm {
    ReadRow,
    ReadColumn,
    ReadColumnData,
}

/// The data stream of one generation: chunk-compressed when a
/// `-CompressionInfo.db` sidecar exists, plain otherwise.
pub(crate) enum DataBuffer {
    Plain(UncompressedBuffer),
    Compressed(CompressedBuffer),
}

impl DataBuffer {
    fn duplicate(&self) -> Result<Self, BufferError> {
        Ok(match self {
            Self::Plain(b) => Self::Plain(b.duplicate()?),
            Self::Compressed(b) => Self::Compressed(b.duplicate()?),
        })
    }
}

impl Buffer for DataBuffer {
    fn read_bytes(&mut self, n: usize) -> Option<&[u8]> {
        match self {
            Self::Plain(b) => b.read_bytes(n),
            Self::Compressed(b) => b.read_bytes(n),
        }
    }

    fn skip_bytes(&mut self, n: usize) {
        match self {
            Self::Plain(b) => b.skip_bytes(n),
            Self::Compressed(b) => b.skip_bytes(n),
        }
    }

    fn seek(&mut self, position: i64) {
        match self {
            Self::Plain(b) => b.seek(position),
            Self::Compressed(b) => b.seek(position),
        }
    }

    fn is_eof(&self) -> bool {
        match self {
            Self::Plain(b) => b.is_eof(),
            Self::Compressed(b) => b.is_eof(),
        }
    }
}

/// State shared by both format readers.
pub(crate) struct ReaderCore {
    pub(crate) config: Arc<TableConfig>,
    pub(crate) data: Option<DataBuffer>,
    pub(crate) next_key: Vec<u8>,
    pub(crate) next_token: Token,
    pub(crate) row_marked_for_deletion: i64,
    pub(crate) start_offset: i64,
    pub(crate) column: ColumnInfo,
    pub(crate) fsm: Fsm,
}

impl ReaderCore {
    pub(crate) fn new(config: Arc<TableConfig>) -> Self {
        Self {
            config,
            data: None,
            next_key: Vec::new(),
            next_token: [0; 16],
            row_marked_for_deletion: 0,
            start_offset: 0,
            column: ColumnInfo::default(),
            fsm: Fsm::ReadRow,
        }
    }

    /// Acquires the data buffer and seeks to the offset recorded at init.
    pub(crate) fn open(&mut self) -> bool {
        let data_path = self.config.sibling(DATA_SUFFIX);
        let info_path = self.config.sibling(COMPRESSION_INFO_SUFFIX);
        let version = self.config.version;

        let opened = if info_path.exists() {
            // JB through LA checksum the compressed bytes with Adler-32;
            // everything else checksums the uncompressed bytes with CRC-32.
            let adler_era = version >= Version::JB && version < Version::MA;
            let checksum = if adler_era {
                ChecksumKind::Adler32
            } else {
                ChecksumKind::Crc32
            };
            CompressedBuffer::open(
                &data_path,
                &info_path,
                checksum,
                adler_era,
                self.config.verify_checksums,
            )
            .map(DataBuffer::Compressed)
        } else {
            UncompressedBuffer::open(&data_path).map(DataBuffer::Plain)
        };

        match opened {
            Ok(mut data) => {
                data.seek(self.start_offset);
                self.data = Some(data);
                self.fsm = Fsm::ReadRow;
                true
            }
            Err(err) => {
                warn!("cannot open {}: {err}", data_path.display());
                false
            }
        }
    }

    pub(crate) fn close(&mut self) {
        self.data = None;
    }

    pub(crate) fn duplicate(&self) -> Result<Self, BufferError> {
        let data = match &self.data {
            Some(data) => Some(data.duplicate()?),
            None => None,
        };
        Ok(Self {
            config: Arc::clone(&self.config),
            data,
            next_key: self.next_key.clone(),
            next_token: self.next_token,
            row_marked_for_deletion: self.row_marked_for_deletion,
            start_offset: self.start_offset,
            column: self.column.clone(),
            fsm: self.fsm,
        })
    }

    /// Positions `start_offset` at the first partition ≥ the target by
    /// binary-searching the summary and then scanning the index. Returns
    /// false when every partition in the file orders before the target.
    pub(crate) fn init_at_key(
        &mut self,
        partitioner: &Partitioner,
        first_token: &Token,
        first_key: &[u8],
    ) -> bool {
        let Ok(mut index) = UncompressedBuffer::open(self.config.sibling(INDEX_SUFFIX)) else {
            return false;
        };

        if let Some(found) = self.find_partition_in_summary(partitioner, first_token, first_key) {
            index.seek(found);
        }

        while !index.is_eof() {
            let key = index.read_string();
            if index.is_eof() {
                break;
            }
            self.start_offset = if self.config.version >= Version::MA {
                index.read_unsigned_vint() as i64
            } else {
                index.read_longlong()
            };
            self.next_key = key;
            self.next_token = partitioner.assign_token(&self.next_key);
            if partitioner.compare(first_token, first_key, &self.next_token, &self.next_key)
                != Ordering::Greater
            {
                return true;
            }

            // Skip the promoted index blocks of the rejected entry.
            let to_skip = if self.config.version >= Version::MA {
                index.read_unsigned_vint()
            } else {
                index.read_int().max(0) as u64
            };
            index.skip_bytes(to_skip as usize);
        }
        false
    }

    /// Binary search over the sparse summary for the position in the index
    /// where the scan should begin. The offset table is native-endian, the
    /// entries are `(key bytes, index position: i64 native)`.
    fn find_partition_in_summary(
        &self,
        partitioner: &Partitioner,
        first_token: &Token,
        first_key: &[u8],
    ) -> Option<i64> {
        let Ok(mut summary) = UncompressedBuffer::open(self.config.sibling(SUMMARY_SUFFIX)) else {
            return None;
        };

        summary.skip_bytes(4);
        let size = summary.read_int();
        let mem_size = summary.read_longlong() as i32;
        if self.config.version >= Version::KA {
            summary.skip_bytes(8);
        }
        if summary.is_eof() || size <= 0 || mem_size <= 0 {
            return None;
        }
        let toc = summary.read_bytes(mem_size as usize)?.to_vec();

        let offset_at = |i: i32| -> usize {
            NativeEndian::read_i32(&toc[i as usize * 4..i as usize * 4 + 4]) as usize
        };

        let mut lower_bounds: Option<usize> = None;
        let mut bottom = 0;
        let mut top = size - 1;
        while bottom < top {
            let middle = bottom + (top - bottom) / 2;
            let offset = offset_at(middle);
            let next_offset = if middle + 1 == size {
                mem_size as usize
            } else {
                offset_at(middle + 1)
            };
            let len = next_offset.checked_sub(offset + 8)?;
            let entry_key = toc.get(offset..offset + len)?;

            let token = partitioner.assign_token(entry_key);
            match partitioner.compare(first_token, first_key, &token, entry_key) {
                Ordering::Less => top = middle - 1,
                Ordering::Greater => {
                    lower_bounds = Some(offset + len);
                    bottom = middle + 1;
                }
                Ordering::Equal => {
                    lower_bounds = Some(offset + len);
                    break;
                }
            }
        }

        let pos = lower_bounds?;
        Some(NativeEndian::read_i64(toc.get(pos..pos + 8)?))
    }
}

/// A positioned reader over one generation, dispatching to the format
/// variant selected by the file's version.
pub enum SsTableReader {
    Old(OldReader),
    New(NewReader),
}

impl SsTableReader {
    pub fn create(config: Arc<TableConfig>) -> Self {
        if config.version >= Version::MA {
            Self::New(NewReader::new(config))
        } else {
            Self::Old(OldReader::new(config))
        }
    }

    pub(crate) fn core(&self) -> &ReaderCore {
        match self {
            Self::Old(r) => &r.core,
            Self::New(r) => &r.core,
        }
    }

    fn core_mut(&mut self) -> &mut ReaderCore {
        match self {
            Self::Old(r) => &mut r.core,
            Self::New(r) => &mut r.core,
        }
    }

    pub fn next_key(&self) -> &[u8] {
        &self.core().next_key
    }

    pub fn next_token(&self) -> &Token {
        &self.core().next_token
    }

    /// Partition-level deletion timestamp, or [`STILL_ACTIVE`].
    pub fn marked_for_deletion(&self) -> i64 {
        self.core().row_marked_for_deletion
    }

    /// The pending cell. Valid after `read_column` returned true.
    pub fn next_column(&self) -> &ColumnInfo {
        &self.core().column
    }

    /// Opens the data buffer at the position recorded during init.
    pub fn open(&mut self) -> bool {
        let opened = self.core_mut().open();
        if opened {
            if let Self::New(r) = self {
                r.reset();
            }
        }
        opened
    }

    pub fn close(&mut self) {
        self.core_mut().close();
    }

    /// Decodes the first partition header so the reader can be ordered,
    /// then releases the buffer again. Returns false when the data file
    /// cannot be opened at all.
    pub fn init(&mut self, partitioner: &Partitioner) -> bool {
        if self.open() {
            self.read_row(Some(partitioner));
            self.close();
            true
        } else {
            false
        }
    }

    /// [`Self::init`], but positioned at the first partition ≥
    /// `(first_token, first_key)`. Returns false when no such partition
    /// exists in this file.
    pub fn init_at_key(
        &mut self,
        partitioner: &Partitioner,
        first_token: &Token,
        first_key: &[u8],
    ) -> bool {
        self.core_mut().init_at_key(partitioner, first_token, first_key)
    }

    /// Advances to the next partition (modern formats: the next row unit).
    /// Returns true at end of the data file.
    pub fn read_row(&mut self, partitioner: Option<&Partitioner>) -> bool {
        match self {
            Self::Old(r) => r.read_row(partitioner),
            Self::New(r) => r.read_row(partitioner),
        }
    }

    /// Advances to the next cell of the current partition, skipping any
    /// unconsumed payload. Returns false when the partition is exhausted
    /// (the machine then parks at `ReadRow`).
    pub fn read_column(&mut self) -> bool {
        match self {
            Self::Old(r) => r.read_column(),
            Self::New(r) => r.read_column(),
        }
    }

    /// Consumes the pending cell payload into `out`.
    pub fn read_column_data(&mut self, out: &mut Vec<u8>) -> bool {
        match self {
            Self::Old(r) => r.read_column_data(out),
            Self::New(r) => r.read_column_data(out),
        }
    }

    /// An independent reader over the same file at the same logical
    /// position, with its own file handle and decode state.
    pub fn duplicate(&self) -> Result<Self, BufferError> {
        Ok(match self {
            Self::Old(r) => Self::Old(OldReader {
                core: r.core.duplicate()?,
                remaining_columns: r.remaining_columns,
            }),
            Self::New(r) => Self::New(r.duplicate()?),
        })
    }
}
