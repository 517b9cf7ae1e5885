//! Statistics sidecar decoding across format eras.
//!
//! Modern files (`ka`+) lead with a table of contents of `(tag, offset)`
//! pairs; we use two entries: **validation** (the partitioner class name)
//! and **header** (the serialization header handed to [`schema`]). Older
//! files store the partitioner after two histograms and a version-dependent
//! fixed preamble. The oldest files name no partitioner at all — Random is
//! the only one that existed.

use buffer::Buffer;
use log::warn;
use partitioner::Partitioner;
use schema::TableSchema;

use crate::format::Version;

const TOC_VALIDATION: i32 = 0;
const TOC_HEADER: i32 = 3;

/// Reads the partitioner (and, for `ma`+, the column schema) from a
/// `-Statistics.db` stream. `None` means the partitioner was named but not
/// recognized — the caller treats that as a setup error.
pub fn read_metadata(
    buf: &mut dyn Buffer,
    version: Version,
    schema: &mut TableSchema,
) -> Option<Partitioner> {
    if version >= Version::KA {
        let num_components = buf.read_int();
        let mut validation_offset = -1;
        let mut header_offset = -1;
        for _ in 0..num_components.max(0) {
            let tag = buf.read_int();
            let offset = buf.read_int();
            if tag == TOC_VALIDATION {
                validation_offset = offset;
            } else if tag == TOC_HEADER {
                header_offset = offset;
            }
        }

        if header_offset >= 0 {
            buf.seek(i64::from(header_offset));
            *schema = TableSchema::parse(buf);
        }

        if validation_offset < 0 {
            return None;
        }
        buf.seek(i64::from(validation_offset));
        partitioner_from_bytes(&buf.read_string())
    } else if version >= Version::JA {
        skip_histogram(buf);
        skip_histogram(buf);
        buf.skip_bytes(5 * 8 + 2 * 4);
        partitioner_from_bytes(&buf.read_string())
    } else if version >= Version::HC {
        skip_histogram(buf);
        skip_histogram(buf);
        buf.skip_bytes(8 + 4);
        if version >= Version::IB {
            buf.skip_bytes(8);
        }
        if version >= Version::HD {
            buf.skip_bytes(8);
        }
        buf.skip_bytes(8);
        partitioner_from_bytes(&buf.read_string())
    } else {
        // Ancient files predate partitioner choice.
        Some(Partitioner::Random)
    }
}

fn partitioner_from_bytes(name: &[u8]) -> Option<Partitioner> {
    let name = std::str::from_utf8(name).ok()?;
    let found = Partitioner::from_class_name(name);
    if found.is_none() {
        warn!("unknown partitioner {name:?}");
    }
    found
}

/// A histogram is `[n: i32][n * 16 bytes]`.
fn skip_histogram(buf: &mut dyn Buffer) {
    let buckets = buf.read_int();
    if buckets > 0 {
        buf.skip_bytes(buckets as usize * 16);
    }
}
