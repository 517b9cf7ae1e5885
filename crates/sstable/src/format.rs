//! On-disk format versions and per-generation file naming.
//!
//! An SSTable generation is a set of sibling files sharing a prefix and
//! distinguished by suffix (`-Data.db`, `-Index.db`, ...). The format
//! version is a two-letter tag collapsed to `(a - 'a') * 26 + (b - 'a')`;
//! where the tag sits in the file name moved over the years, as did the
//! keyspace/table identification.

use schema::TableSchema;
use std::path::{Path, PathBuf};

pub const DATA_SUFFIX: &str = "-Data.db";
pub const INDEX_SUFFIX: &str = "-Index.db";
pub const SUMMARY_SUFFIX: &str = "-Summary.db";
pub const STATISTICS_SUFFIX: &str = "-Statistics.db";
pub const COMPRESSION_INFO_SUFFIX: &str = "-CompressionInfo.db";

/// A two-letter format tag collapsed to a small integer, ordered so that
/// version gates read as plain comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(i32);

impl Version {
    pub const D: Version = Version::new(b'd', b'a');
    pub const HC: Version = Version::new(b'h', b'c');
    pub const HD: Version = Version::new(b'h', b'd');
    pub const IB: Version = Version::new(b'i', b'b');
    pub const JA: Version = Version::new(b'j', b'a');
    pub const JB: Version = Version::new(b'j', b'b');
    pub const KA: Version = Version::new(b'k', b'a');
    pub const LA: Version = Version::new(b'l', b'a');
    pub const MA: Version = Version::new(b'm', b'a');

    pub const fn new(a: u8, b: u8) -> Self {
        Version((a - b'a') as i32 * 26 + (b - b'a') as i32)
    }

    /// Extracts the version tag from a `-Data.db` file name, or `None` when
    /// no tag sits in a recognized position (the file is then rejected).
    ///
    /// `la` and above lead with the tag (`mc-1-big-Data.db`); earlier
    /// versions place it in the third `-`-separated token
    /// (`keyspace-table-jb-1-Data.db`), ancient ones as a single letter
    /// a–d there.
    pub fn from_filename(name: &str) -> Option<Version> {
        let bytes = name.as_bytes();
        if is_version_pair(bytes, b'l') {
            return Some(Version::new(bytes[0], bytes[1]));
        }

        let mut parts = name.splitn(3, '-');
        parts.next()?;
        parts.next()?;
        let rest = parts.next()?.as_bytes();

        if is_version_pair(rest, b'a') {
            return Some(Version::new(rest[0], rest[1]));
        }
        if rest.len() >= 2 && rest[1] == b'-' && (b'a'..=b'd').contains(&rest[0]) {
            return Some(Version::new(rest[0], b'a'));
        }
        None
    }
}

fn is_version_pair(bytes: &[u8], lower_bound: u8) -> bool {
    bytes.len() >= 3
        && (lower_bound..=b'z').contains(&bytes[0])
        && bytes[1].is_ascii_lowercase()
        && bytes[2] == b'-'
}

/// Keyspace and table identifying one data file: from the first two
/// file-name tokens before `la`, from the last two directory components
/// after.
pub fn keyspace_and_table(
    version: Version,
    file_name: &str,
    dir: &Path,
) -> Option<(String, String)> {
    if version < Version::LA {
        let mut parts = file_name.splitn(3, '-');
        let keyspace = parts.next()?;
        let table = parts.next()?;
        parts.next()?;
        Some((keyspace.to_string(), table.to_string()))
    } else {
        let table = dir.file_name()?.to_str()?;
        let keyspace = dir.parent()?.file_name()?.to_str()?;
        Some((keyspace.to_string(), table.to_string()))
    }
}

/// Immutable per-file configuration, built once at directory scan.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Path prefix of the generation: directory joined with the file name
    /// minus its suffix. Sibling files are `prefix + suffix`.
    pub path: PathBuf,
    pub version: Version,
    /// Parsed serialization header; empty for pre-`ma` files.
    pub schema: TableSchema,
    /// Chunk checksum verification toggle, propagated from
    /// [`TableOptions`](crate::TableOptions).
    pub verify_checksums: bool,
}

impl TableConfig {
    /// Path of the sibling component with the given suffix.
    pub fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }
}
