//! # SSTable — offline reader and merge for Cassandra-family tables
//!
//! Streams the on-disk files of a wide-column table *without a running
//! database*, merges overlapping generations, applies deletion and
//! expiration semantics, and reports the live logical rows to a caller
//! through the [`RowSink`] callbacks.
//!
//! ## Input file set (one generation)
//!
//! ```text
//! <prefix>-Data.db             partition → row → cell stream, possibly
//!                              chunk-compressed
//! <prefix>-Index.db            key → data-file position
//! <prefix>-Summary.db          sparse index over the index
//! <prefix>-Statistics.db       metadata: partitioner, schema (ma+)
//! <prefix>-CompressionInfo.db  chunk layout, when Data is compressed
//! ```
//!
//! Integers are big-endian except the summary offset tables
//! (native-endian). Two row formats are supported: the name-prefixed
//! pre-`ma` layout and the schema-driven `ma`+ layout; the format version
//! is recovered from the file name.
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Table (opener)                                          │
//! │   directory scan → TableConfig per generation           │
//! │   -Statistics.db → partitioner + schema, agreement      │
//! ├─────────────────────────────────────────────────────────┤
//! │ SsTableReader × N (old / new format)                    │
//! │   summary + index positioning, lazy data buffer,        │
//! │   three-state decode machine per file                   │
//! ├─────────────────────────────────────────────────────────┤
//! │ MergeIterator                                           │
//! │   k-way merge on (token, key) → column match →          │
//! │   tombstone fold → latest-wins → RowSink callbacks      │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use sstable::{RowSink, Table};
//!
//! struct Print;
//! impl RowSink for Print {
//!     fn new_row(&mut self, key: &[u8]) {
//!         println!("row {:?}", key);
//!     }
//!     fn new_column(&mut self, name: &[u8], value: &[u8], ts: i64) {
//!         println!("  {:?} = {:?} @{ts}", name, value);
//!     }
//!     fn new_column_with_ttl(&mut self, name: &[u8], value: &[u8], ts: i64, ttl: u32, exp: u32) {
//!         println!("  {:?} = {:?} @{ts} ttl={ttl} exp={exp}", name, value);
//!     }
//! }
//!
//! let table = Table::open(&["/var/lib/cassandra/data/ks/tbl"]).unwrap();
//! let mut iter = table.begin();
//! let mut sink = Print;
//! while iter.next(&mut sink) {}
//! ```

mod format;
mod merge;
mod metadata;
mod new;
mod old;
mod reader;
mod table;

pub use format::{TableConfig, Version, DATA_SUFFIX};
pub use merge::{MergeIterator, RowSink};
pub use reader::{ColumnInfo, SsTableReader, STILL_ACTIVE};
pub use table::{Table, TableOptions};

#[cfg(test)]
mod tests;
