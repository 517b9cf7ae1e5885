//! Table opener: discovers the generations of one on-disk table and hands
//! out merge iterators over them.

use anyhow::{bail, Context, Result};
use buffer::UncompressedBuffer;
use log::warn;
use partitioner::Partitioner;
use schema::TableSchema;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::format::{
    keyspace_and_table, TableConfig, Version, DATA_SUFFIX, STATISTICS_SUFFIX,
};
use crate::merge::MergeIterator;
use crate::metadata::read_metadata;
use crate::reader::SsTableReader;

/// Opener configuration, propagated into every reader. No global state.
#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Verify per-chunk checksums on compressed data files. A mismatch is
    /// fatal; disabling trades safety for speed on trusted files.
    pub verify_checksums: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
        }
    }
}

/// One logical table: every `-Data.db` generation found under the given
/// directories, validated to agree on keyspace, table name and
/// partitioner.
#[derive(Debug)]
pub struct Table {
    configs: Vec<Arc<TableConfig>>,
    partitioner: Partitioner,
    keyspace: String,
    table_name: String,
    total_file_size: u64,
    num_files: usize,
}

impl Table {
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        Self::open_with(paths, TableOptions::default())
    }

    /// Walks each directory, recording a [`TableConfig`] per data file and
    /// reading each `-Statistics.db` for the partitioner (and, on modern
    /// formats, the schema). Any disagreement between files is an error.
    pub fn open_with<P: AsRef<Path>>(paths: &[P], options: TableOptions) -> Result<Self> {
        let mut configs = Vec::new();
        let mut partitioner: Option<Partitioner> = None;
        let mut keyspace = String::new();
        let mut table_name = String::new();
        let mut total_file_size = 0u64;
        let mut num_files = 0usize;

        for path in paths {
            let dir = path
                .as_ref()
                .canonicalize()
                .with_context(|| format!("cannot resolve directory {}", path.as_ref().display()))?;

            for entry in fs::read_dir(&dir)
                .with_context(|| format!("cannot list directory {}", dir.display()))?
            {
                let entry = entry?;
                let file_name = entry.file_name();
                let Some(name) = file_name.to_str() else {
                    continue;
                };
                if !name.ends_with(DATA_SUFFIX) {
                    continue;
                }
                let file_meta = entry
                    .metadata()
                    .with_context(|| format!("stat({:?}) failed", entry.path()))?;
                if !file_meta.is_file() {
                    continue;
                }

                total_file_size += file_meta.len();
                num_files += 1;

                let Some(version) = Version::from_filename(name) else {
                    bail!("file name {name:?} does not carry a version tag where expected");
                };
                let Some((this_keyspace, this_table)) = keyspace_and_table(version, name, &dir)
                else {
                    bail!("cannot derive keyspace and table for {name:?}");
                };

                if keyspace.is_empty() && table_name.is_empty() {
                    keyspace = this_keyspace;
                    table_name = this_table;
                } else if keyspace != this_keyspace || table_name != this_table {
                    bail!(
                        "incompatible keyspace and table for {name:?}: {keyspace},{table_name} != {this_keyspace},{this_table}"
                    );
                }

                let prefix = dir.join(&name[..name.len() - DATA_SUFFIX.len()]);
                let mut config = TableConfig {
                    path: prefix,
                    version,
                    schema: TableSchema::default(),
                    verify_checksums: options.verify_checksums,
                };

                match UncompressedBuffer::open(config.sibling(STATISTICS_SUFFIX)) {
                    Ok(mut stats) => {
                        let this_partitioner =
                            read_metadata(&mut stats, version, &mut config.schema);
                        match partitioner {
                            None => partitioner = this_partitioner,
                            Some(chosen) => {
                                if this_partitioner != Some(chosen) {
                                    bail!("tables do not use the same partitioner, cannot merge");
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!("no statistics for {}: {err}", config.path.display());
                    }
                }

                configs.push(Arc::new(config));
            }
        }

        if num_files == 0 {
            bail!("no db files found in the given directories");
        }
        let Some(partitioner) = partitioner else {
            bail!("no partitioner specified");
        };

        Ok(Self {
            configs,
            partitioner,
            keyspace,
            table_name,
            total_file_size,
            num_files,
        })
    }

    /// A merge iterator over the whole table.
    pub fn begin(&self) -> MergeIterator {
        let mut tables = Vec::with_capacity(self.configs.len());
        for config in &self.configs {
            let mut table = SsTableReader::create(Arc::clone(config));
            if table.init(&self.partitioner) {
                tables.push(table);
            }
        }
        MergeIterator::new(self.partitioner, tables)
    }

    /// A merge iterator positioned at the first partition whose key is ≥
    /// `primary_key` under this table's partitioner.
    pub fn find(&self, primary_key: &[u8]) -> MergeIterator {
        let first_token = self.partitioner.assign_token(primary_key);

        let mut tables = Vec::with_capacity(self.configs.len());
        for config in &self.configs {
            let mut table = SsTableReader::create(Arc::clone(config));
            if table.init_at_key(&self.partitioner, &first_token, primary_key) {
                tables.push(table);
            }
        }
        MergeIterator::new(self.partitioner, tables)
    }

    #[must_use]
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Aggregate size of the data files, in bytes.
    #[must_use]
    pub fn total_file_size(&self) -> u64 {
        self.total_file_size
    }

    #[must_use]
    pub fn num_files(&self) -> usize {
        self.num_files
    }

    #[must_use]
    pub fn partitioner(&self) -> Partitioner {
        self.partitioner
    }
}
