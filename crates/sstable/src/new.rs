//! The `ma`+ row format: schema-driven cells behind per-row flag bytes.
//!
//! A partition is a key + deletion header followed by row units, each
//! introduced by a flags byte. Normal rows decode clustering headers (only
//! to skip them), delta-encoded timestamps/TTLs against the schema bases,
//! a column-presence subset, then one cell per present column. Range
//! markers surface as a single synthetic range-tombstone cell. A unit with
//! `END_OF_PARTITION` folds back to the partition header state.

use buffer::{Buffer, BufferError};
use partitioner::Partitioner;
use std::sync::Arc;

use crate::format::TableConfig;
use crate::reader::{Fsm, ReaderCore};

const END_OF_PARTITION: u8 = 0x01;
const IS_MARKER: u8 = 0x02;
const HAS_TIMESTAMP: u8 = 0x04;
const HAS_TTL: u8 = 0x08;
const HAS_DELETION: u8 = 0x10;
const HAS_ALL_COLUMNS: u8 = 0x20;
const EXTENSION_FLAG: u8 = 0x80;

/// Extended flags byte.
const IS_STATIC: u8 = 0x01;

const CELL_IS_DELETED: u8 = 0x01;
const CELL_IS_EXPIRING: u8 = 0x02;
const CELL_HAS_EMPTY_VALUE: u8 = 0x04;
const CELL_USE_ROW_TIMESTAMP: u8 = 0x08;
const CELL_USE_ROW_TTL: u8 = 0x10;

/// Boundary markers carry a second deletion time that is skipped.
const EXCL_END_INCL_START_BOUNDARY: u8 = 2;
const INCL_END_EXCL_START_BOUNDARY: u8 = 5;

pub struct NewReader {
    pub(crate) core: ReaderCore,
    at_end_of_partition: bool,
    partition_marked_for_deletion: i64,
    row_timestamp: u64,
    row_ttl: u64,
    /// Row-level local deletion seconds, kept so `USE_ROW_TTL` cells can
    /// report an expiration.
    row_expiration: u32,
    is_static: bool,
    columns_present: Vec<bool>,
    this_column_index: usize,
}

impl NewReader {
    pub(crate) fn new(config: Arc<TableConfig>) -> Self {
        Self {
            core: ReaderCore::new(config),
            at_end_of_partition: true,
            partition_marked_for_deletion: 0,
            row_timestamp: 0,
            row_ttl: u64::MAX,
            row_expiration: 0,
            is_static: false,
            columns_present: Vec::new(),
            this_column_index: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.at_end_of_partition = true;
    }

    pub(crate) fn duplicate(&self) -> Result<Self, BufferError> {
        Ok(Self {
            core: self.core.duplicate()?,
            at_end_of_partition: self.at_end_of_partition,
            partition_marked_for_deletion: self.partition_marked_for_deletion,
            row_timestamp: self.row_timestamp,
            row_ttl: self.row_ttl,
            row_expiration: self.row_expiration,
            is_static: self.is_static,
            columns_present: self.columns_present.clone(),
            this_column_index: self.this_column_index,
        })
    }

    fn columns(&self) -> &[schema::ColumnDef] {
        if self.is_static {
            &self.core.config.schema.static_columns
        } else {
            &self.core.config.schema.regular_columns
        }
    }

    pub(crate) fn read_row(&mut self, partitioner: Option<&Partitioner>) -> bool {
        debug_assert_eq!(self.core.fsm, Fsm::ReadRow);
        loop {
            if self.at_end_of_partition {
                let Some(data) = self.core.data.as_mut() else {
                    return true;
                };
                self.core.next_key = data.read_string();
                if data.is_eof() {
                    return true;
                }
                data.skip_bytes(4); // local deletion time
                self.partition_marked_for_deletion = data.read_longlong();

                if let Some(partitioner) = partitioner {
                    self.core.next_token = partitioner.assign_token(&self.core.next_key);
                }
                self.at_end_of_partition = false;
            }

            let Some(data) = self.core.data.as_mut() else {
                return true;
            };
            let flags = data.read_byte();
            if data.is_eof() {
                return true;
            }

            if flags & END_OF_PARTITION != 0 {
                self.at_end_of_partition = true;
                continue;
            }

            let extended_flags = if flags & EXTENSION_FLAG != 0 {
                data.read_byte()
            } else {
                0
            };
            self.is_static = extended_flags & IS_STATIC != 0;

            return if flags & IS_MARKER != 0 {
                self.read_marker()
            } else {
                self.read_normal_row(flags)
            };
        }
    }

    fn read_marker(&mut self) -> bool {
        let (marker_type, size) = {
            let Some(data) = self.core.data.as_mut() else {
                return true;
            };
            (data.read_byte(), data.read_short().max(0) as usize)
        };
        if !self.is_static {
            self.read_clustering_columns(size);
        }

        let Some(data) = self.core.data.as_mut() else {
            return true;
        };
        data.read_unsigned_vint(); // row size
        data.read_unsigned_vint(); // previous unfiltered size

        self.core.row_marked_for_deletion = data.read_longlong();
        data.skip_bytes(4); // local deletion time
        if marker_type == EXCL_END_INCL_START_BOUNDARY
            || marker_type == INCL_END_EXCL_START_BOUNDARY
        {
            data.skip_bytes(12);
        }
        let eof = data.is_eof();

        // One synthetic range-tombstone cell; the marker itself carries no
        // usable end key (clustering is skipped), so the bound stays empty.
        self.core.column.clear_flags();
        self.core.column.range_tombstone = true;
        self.core.column.name.clear();
        self.core.column.end_key.clear();
        self.core.column.ts = self.core.row_marked_for_deletion;
        self.core.fsm = Fsm::ReadColumn;
        self.columns_present.clear();
        self.this_column_index = 0;
        eof
    }

    fn read_normal_row(&mut self, flags: u8) -> bool {
        if !self.is_static {
            let clustering_count = self.core.config.schema.clustering.len();
            self.read_clustering_columns(clustering_count);
        }

        let min_timestamp = self.core.config.schema.min_timestamp;
        let min_ttl = self.core.config.schema.min_ttl;
        let n_columns = self.columns().len();

        let Some(data) = self.core.data.as_mut() else {
            return true;
        };
        data.read_unsigned_vint(); // row size
        data.read_unsigned_vint(); // previous unfiltered size

        self.row_ttl = u64::MAX;
        self.row_timestamp = 0;
        self.row_expiration = 0;
        if flags & HAS_TIMESTAMP != 0 {
            self.row_timestamp = data.read_unsigned_vint().wrapping_add(min_timestamp);
            if flags & HAS_TTL != 0 {
                self.row_ttl = data.read_unsigned_vint().wrapping_add(min_ttl);
                self.row_expiration = data.read_unsigned_vint() as u32;
            }
        }

        if flags & HAS_DELETION != 0 {
            self.core.row_marked_for_deletion =
                data.read_unsigned_vint().wrapping_add(min_timestamp) as i64;
            data.read_unsigned_vint(); // local deletion time
        } else {
            self.core.row_marked_for_deletion = self.partition_marked_for_deletion;
        }

        if flags & HAS_ALL_COLUMNS != 0 {
            self.columns_present.clear();
            self.columns_present.resize(n_columns, true);
        } else {
            decode_column_subset(data, &mut self.columns_present, n_columns);
        }

        self.this_column_index = 0;
        self.skip_absent_columns();

        self.read_column();
        self.core.data.as_ref().map_or(true, |d| d.is_eof())
    }

    /// Skips the clustering prefix; the values are typed by the schema but
    /// never surfaced. Codes come packed 32 per vint, 2 bits each; code 0
    /// means a value is present on disk.
    fn read_clustering_columns(&mut self, count: usize) {
        let count = count.min(self.core.config.schema.clustering.len());
        let mut column = 0;
        while column < count {
            let Some(data) = self.core.data.as_mut() else {
                return;
            };
            let header = data.read_unsigned_vint();
            let limit = count.min(column + 32);
            let mut shift = 0;
            while column < limit {
                if header & (3u64 << shift) == 0 {
                    let kind = self.core.config.schema.clustering[column];
                    let skip = schema::value_size(kind, data);
                    data.skip_bytes(skip);
                }
                column += 1;
                shift += 2;
            }
        }
    }

    fn skip_absent_columns(&mut self) {
        while self.this_column_index < self.columns_present.len()
            && !self.columns_present[self.this_column_index]
        {
            self.this_column_index += 1;
        }
        self.core.fsm = Fsm::ReadColumn;
    }

    pub(crate) fn read_column(&mut self) -> bool {
        if self.core.fsm == Fsm::ReadColumnData {
            let mut ignore = Vec::new();
            self.read_column_data(&mut ignore);
        }
        debug_assert_eq!(self.core.fsm, Fsm::ReadColumn);

        self.core.column.clear_flags();
        if self.this_column_index >= self.columns_present.len() {
            self.core.fsm = Fsm::ReadRow;
            self.core.column.name.clear();
            return false;
        }

        let min_timestamp = self.core.config.schema.min_timestamp;
        let min_ttl = self.core.config.schema.min_ttl;
        let name = self.columns()[self.this_column_index].name.clone();
        self.core.column.name = name;

        let Some(data) = self.core.data.as_mut() else {
            return false;
        };
        let flags = data.read_byte();

        if flags & CELL_USE_ROW_TIMESTAMP != 0 {
            self.core.column.ts = self.row_timestamp as i64;
        } else {
            self.core.column.ts =
                data.read_unsigned_vint().wrapping_add(min_timestamp) as i64;
        }

        self.core.column.deleted = flags & CELL_IS_DELETED != 0;
        self.core.column.expiring = flags & CELL_IS_EXPIRING != 0;
        if flags & CELL_USE_ROW_TTL != 0 {
            self.core.column.expiring = self.row_ttl != u64::MAX;
            self.core.column.ttl = self.row_ttl as u32;
            self.core.column.expiration = self.row_expiration;
        } else {
            if self.core.column.expiring || self.core.column.deleted {
                self.core.column.expiration = data.read_unsigned_vint() as u32;
            }
            if self.core.column.expiring {
                self.core.column.ttl =
                    data.read_unsigned_vint().wrapping_add(min_ttl) as u32;
            }
        }

        if flags & CELL_HAS_EMPTY_VALUE == 0 {
            self.core.fsm = Fsm::ReadColumnData;
        } else {
            // Nothing on disk for this cell; step to the next present
            // column now so the stream stays aligned.
            self.this_column_index += 1;
            self.skip_absent_columns();
        }
        true
    }

    pub(crate) fn read_column_data(&mut self, out: &mut Vec<u8>) -> bool {
        if self.core.fsm == Fsm::ReadColumn {
            // HAS_EMPTY_VALUE cell: nothing on disk.
            out.clear();
        } else {
            debug_assert_eq!(self.core.fsm, Fsm::ReadColumnData);
            let kind = self.columns()[self.this_column_index].kind;
            let Some(data) = self.core.data.as_mut() else {
                return false;
            };
            let size = schema::value_size(kind, data);
            if let Some(bytes) = data.read_bytes(size) {
                out.clear();
                out.extend_from_slice(bytes);
            }
            self.this_column_index += 1;
            self.skip_absent_columns();
        }
        true
    }
}

/// Decodes the compressed column subset: `encoded == 0` means all present;
/// with ≥ 64 columns a count plus explicit positions (positive when few
/// present, negative when few absent); below 64 a plain bit mask.
fn decode_column_subset(buf: &mut dyn Buffer, subset: &mut Vec<bool>, n_columns: usize) {
    let encoded = buf.read_unsigned_vint();
    subset.clear();
    if encoded == 0 {
        subset.resize(n_columns, true);
    } else if n_columns >= 64 {
        let column_count = n_columns.saturating_sub(encoded as usize);
        let is_positive = column_count < n_columns / 2;
        subset.resize(n_columns, !is_positive);
        for _ in 0..column_count {
            let index = buf.read_unsigned_vint() as usize;
            if let Some(slot) = subset.get_mut(index) {
                *slot = is_positive;
            }
        }
    } else {
        let mut mask = encoded;
        for _ in 0..n_columns {
            subset.push(mask & 1 != 0);
            mask >>= 1;
        }
    }
}
