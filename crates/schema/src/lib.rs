//! # Schema — the per-table serialization header of modern SSTables
//!
//! Formats `ma` and above embed a serialization header in the statistics
//! sidecar: base values for timestamp/TTL deltas, the key type, the
//! clustering column types, and the ordered static and regular column
//! lists. The column *type* matters for exactly one thing here — how many
//! bytes a cell value occupies in the data stream. Values themselves stay
//! opaque byte strings.
//!
//! Pre-`ma` formats carry no schema; [`TableSchema::default`] is the empty
//! placeholder those readers use (columns are name-prefixed on disk).

use buffer::Buffer;

const MARSHAL_PREFIX: &[u8] = b"org.apache.cassandra.db.marshal.";

/// Closed set of cell encodings. Only the byte length matters: `Text` and
/// `Unknown` are vint-length-prefixed, everything else is fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Int32,
    Uuid,
    Float,
    Long,
    Bool,
    Empty,
    Timestamp,
    Counter,
    Unknown,
}

/// One entry of a static or regular column list.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: Vec<u8>,
    pub kind: ColumnKind,
}

/// Parsed serialization header. Empty (all defaults) for pre-`ma` files.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    /// Base for the vint timestamp deltas in row and cell headers.
    pub min_timestamp: u64,
    /// Base for the vint TTL deltas.
    pub min_ttl: u64,
    pub key_type: Option<ColumnKind>,
    pub clustering: Vec<ColumnKind>,
    pub static_columns: Vec<ColumnDef>,
    pub regular_columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Decodes the header section: `min_timestamp`, `min_local_deletion`
    /// (discarded), `min_ttl`, key type, clustering types, then the static
    /// and regular column lists.
    pub fn parse(buf: &mut dyn Buffer) -> Self {
        let min_timestamp = buf.read_unsigned_vint();
        buf.read_unsigned_vint(); // minLocalDeletionTime
        let min_ttl = buf.read_unsigned_vint();

        let key_type = Some(read_column_kind(buf));
        let n_clustering = buf.read_unsigned_vint();
        let mut clustering = Vec::new();
        for _ in 0..n_clustering {
            clustering.push(read_column_kind(buf));
        }

        let static_columns = read_columns(buf);
        let regular_columns = read_columns(buf);

        Self {
            min_timestamp,
            min_ttl,
            key_type,
            clustering,
            static_columns,
            regular_columns,
        }
    }
}

fn read_columns(buf: &mut dyn Buffer) -> Vec<ColumnDef> {
    let n_columns = buf.read_unsigned_vint();
    let mut columns = Vec::new();
    for _ in 0..n_columns {
        let name = buf.read_vint_length_string();
        let kind = read_column_kind(buf);
        columns.push(ColumnDef { name, kind });
    }
    columns
}

/// Maps a marshaller class name to a [`ColumnKind`]. Anything outside the
/// known set parses as `Unknown`, which shares `Text`'s length-prefixed
/// sizing and therefore still skips correctly.
fn read_column_kind(buf: &mut dyn Buffer) -> ColumnKind {
    let identifier = buf.read_vint_length_string();
    let Some(class_name) = identifier.strip_prefix(MARSHAL_PREFIX) else {
        return ColumnKind::Unknown;
    };

    match class_name {
        b"UTF8Type" | b"AsciiType" => ColumnKind::Text,
        b"LongType" => ColumnKind::Long,
        b"Int32Type" => ColumnKind::Int32,
        b"BooleanType" | b"BoolType" => ColumnKind::Bool,
        b"FloatType" => ColumnKind::Float,
        b"EmptyType" => ColumnKind::Empty,
        b"TimestampType" => ColumnKind::Timestamp,
        b"CounterColumnType" => ColumnKind::Counter,
        b"UUIDType" | b"TimeUUIDType" | b"LexicalUUIDType" => ColumnKind::Uuid,
        _ => ColumnKind::Unknown,
    }
}

/// Byte length of the next cell value of the given kind. Length-prefixed
/// kinds consume their vint prefix from `buf` as a side effect.
pub fn value_size(kind: ColumnKind, buf: &mut dyn Buffer) -> usize {
    match kind {
        ColumnKind::Text | ColumnKind::Unknown => buf.read_unsigned_vint() as usize,
        ColumnKind::Int32 | ColumnKind::Float => 4,
        ColumnKind::Uuid => 16,
        ColumnKind::Long | ColumnKind::Timestamp | ColumnKind::Counter => 8,
        ColumnKind::Bool => 1,
        ColumnKind::Empty => 0,
    }
}
