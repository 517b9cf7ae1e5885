//! The pre-`ma` row format: name-prefixed cells, one flags byte each.
//!
//! A partition is a 16-bit-length key, a deletion header, then cells until
//! an empty name (`ja`+) or a decrementing cell count (older). Cell names
//! may wrap a composite path; only the final element is kept.

use buffer::Buffer;
use partitioner::Partitioner;
use std::sync::Arc;

use crate::format::{TableConfig, Version};
use crate::reader::{Fsm, ReaderCore};

const DELETION_MASK: u8 = 0x01;
const EXPIRATION_MASK: u8 = 0x02;
const COUNTER_MASK: u8 = 0x04;
const RANGE_TOMBSTONE_MASK: u8 = 0x10;

pub struct OldReader {
    pub(crate) core: ReaderCore,
    /// Cells left in the current partition. Only meaningful before `ja`,
    /// where partitions carry a count instead of a terminator.
    pub(crate) remaining_columns: usize,
}

impl OldReader {
    pub(crate) fn new(config: Arc<TableConfig>) -> Self {
        Self {
            core: ReaderCore::new(config),
            remaining_columns: 0,
        }
    }

    pub(crate) fn read_row(&mut self, partitioner: Option<&Partitioner>) -> bool {
        debug_assert_eq!(self.core.fsm, Fsm::ReadRow);
        let version = self.core.config.version;
        let Some(data) = self.core.data.as_mut() else {
            return true;
        };

        self.core.next_key = data.read_string();
        if data.is_eof() {
            return true;
        }

        if let Some(partitioner) = partitioner {
            self.core.next_token = partitioner.assign_token(&self.core.next_key);
        }

        // Row size, dropped in ja when the terminator arrived.
        if version < Version::D {
            data.skip_bytes(4);
        } else if version < Version::JA {
            data.skip_bytes(8);
        }

        data.skip_bytes(4); // local deletion time
        self.core.row_marked_for_deletion = data.read_longlong();

        if version < Version::JA {
            self.remaining_columns = data.read_int().max(0) as usize;
        }

        self.core.fsm = Fsm::ReadColumn;
        self.read_column();
        self.core.data.as_ref().map_or(true, |d| d.is_eof())
    }

    pub(crate) fn read_column(&mut self) -> bool {
        if self.core.fsm == Fsm::ReadColumnData {
            if let Some(data) = self.core.data.as_mut() {
                data.skip_data();
            }
            self.core.fsm = Fsm::ReadColumn;
        }
        if self.core.fsm == Fsm::ReadRow {
            // Partition already exhausted; stay parked.
            return false;
        }
        debug_assert_eq!(self.core.fsm, Fsm::ReadColumn);

        self.core.column.clear_flags();

        if self.core.config.version < Version::JA {
            if self.remaining_columns == 0 {
                self.core.column.name.clear();
                self.core.fsm = Fsm::ReadRow;
                return false;
            }
            self.remaining_columns -= 1;
        }

        let Some(data) = self.core.data.as_mut() else {
            return false;
        };

        // ja and above terminate the partition with an empty name.
        self.core.column.name = data.read_string();
        if self.core.column.name.is_empty() {
            self.core.fsm = Fsm::ReadRow;
            return false;
        }

        // The name may encode a composite (or clustering) path: a run of
        // (u16 length, bytes, separator byte) elements, the last of which
        // consumes the rest exactly. Neither is supported, so keep only the
        // final element.
        let name_len = self.core.column.name.len();
        let mut buffer_len = name_len;
        while buffer_len >= 2 {
            let advanced = name_len - buffer_len;
            let bytes = &self.core.column.name[advanced..];
            let element_len = ((bytes[0] as usize) << 8) | bytes[1] as usize;
            if buffer_len > element_len + 3 {
                buffer_len -= element_len + 3;
            } else {
                if buffer_len == element_len + 3 {
                    let element =
                        self.core.column.name[advanced + 2..advanced + 2 + element_len].to_vec();
                    self.core.column.name = element;
                }
                break;
            }
        }

        let flags = data.read_byte();
        self.core.column.deleted = flags & DELETION_MASK != 0;
        if flags & RANGE_TOMBSTONE_MASK != 0 {
            self.core.column.end_key = data.read_string();
            data.skip_bytes(4); // local deletion time
            self.core.column.ts = data.read_longlong();
            self.core.column.range_tombstone = true;
            // No payload follows; the machine stays at ReadColumn.
        } else {
            if flags & COUNTER_MASK != 0 {
                self.core.column.counter_timestamp = data.read_longlong();
            } else if flags & EXPIRATION_MASK != 0 {
                self.core.column.ttl = data.read_int() as u32;
                self.core.column.expiration = data.read_int() as u32;
                self.core.column.expiring = true;
            }
            self.core.column.ts = data.read_longlong();
            self.core.fsm = Fsm::ReadColumnData;
        }
        true
    }

    pub(crate) fn read_column_data(&mut self, out: &mut Vec<u8>) -> bool {
        debug_assert_eq!(self.core.fsm, Fsm::ReadColumnData);
        let Some(data) = self.core.data.as_mut() else {
            return false;
        };
        let result = data.read_data(out);
        self.core.fsm = Fsm::ReadColumn;
        result
    }
}
