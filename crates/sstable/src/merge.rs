//! K-way merge over multiple [`SsTableReader`]s.
//!
//! Produces each live logical row exactly once, in partitioner order, with
//! the newest surviving version of every cell. Rows and cells shadowed by
//! partition-level or range tombstones are withheld; a partition whose
//! content is pure tombstone is skipped entirely (and counted).
//!
//! Readers are activated lazily: a file's data buffer is only opened once
//! the merge position reaches the file's first key, and it is closed again
//! when the file is exhausted. At any moment the *active* readers are
//! exactly those spanning the current merge position.

use anyhow::Result;
use partitioner::Partitioner;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::reader::{SsTableReader, STILL_ACTIVE};

/// Receiver for the merged row stream. One `new_row` per emitted
/// partition, then one column callback per surviving cell.
pub trait RowSink {
    fn new_row(&mut self, key: &[u8]);
    fn new_column(&mut self, name: &[u8], value: &[u8], ts: i64);
    fn new_column_with_ttl(
        &mut self,
        name: &[u8],
        value: &[u8],
        ts: i64,
        ttl_secs: u32,
        expiration_secs: u32,
    );
}

/// Deduplicating, tombstone-resolving merge across any number of readers.
///
/// Single-threaded and synchronous; one instance is driven by one caller.
/// [`try_clone`](Self::try_clone) yields an independent iterator (every
/// reader reopened on its own file handle) for parallel consumers.
pub struct MergeIterator {
    partitioner: Partitioner,
    tables: Vec<SsTableReader>,
    /// First table not yet reached by the merge position.
    next_table: usize,
    /// Tables currently spanning the merge position.
    active_tables: BTreeSet<usize>,
    /// Scratch reused across iterations; sized by the table count.
    row_matches: Vec<usize>,
    column_matches: Vec<usize>,
    value_scratch: Vec<u8>,
    /// Range tombstones of the current partition: end key → newest ts.
    tombstones: BTreeMap<Vec<u8>, i64>,
    read_records: usize,
    skipped_records: usize,
}

impl MergeIterator {
    /// Builds the merge over readers that have been positioned by `init`
    /// or `init_at_key`. Usually obtained through [`Table::begin`] or
    /// [`Table::find`](crate::Table::find).
    ///
    /// [`Table::begin`]: crate::Table::begin
    pub fn new(partitioner: Partitioner, mut tables: Vec<SsTableReader>) -> Self {
        tables.sort_by(|a, b| {
            partitioner.compare(a.next_token(), a.next_key(), b.next_token(), b.next_key())
        });
        let n_tables = tables.len();
        Self {
            partitioner,
            tables,
            next_table: 0,
            active_tables: BTreeSet::new(),
            row_matches: Vec::with_capacity(n_tables),
            column_matches: Vec::with_capacity(n_tables),
            value_scratch: Vec::new(),
            tombstones: BTreeMap::new(),
            read_records: 0,
            skipped_records: 0,
        }
    }

    /// Partitions examined, live or not.
    pub fn read_records(&self) -> usize {
        self.read_records
    }

    /// Partitions dropped for being wholly deleted.
    pub fn skipped_records(&self) -> usize {
        self.skipped_records
    }

    /// Advances to the next live row, reporting it through `sink`.
    /// Returns false at end of stream.
    pub fn next(&mut self, sink: &mut dyn RowSink) -> bool {
        loop {
            if self.active_tables.is_empty() {
                if self.next_table >= self.tables.len() {
                    return false;
                }
                let index = self.next_table;
                self.next_table += 1;
                self.activate_table(index);
            }
            if self.next_record(sink) {
                return true;
            }
        }
    }

    /// Peeks the key of the next partition without consuming it. The row
    /// behind the key may still turn out to be entirely deleted.
    pub fn get_next_key(&mut self) -> Option<Vec<u8>> {
        if self.active_tables.is_empty() && self.next_table >= self.tables.len() {
            return None;
        }

        let mut matches = std::mem::take(&mut self.row_matches);
        let n_matches = self.find_first_row_matches(&mut matches);
        let key = if n_matches == 0 {
            None
        } else {
            Some(self.tables[matches[0]].next_key().to_vec())
        };
        self.row_matches = matches;
        key
    }

    /// An independent iterator at the same position: every reader is
    /// duplicated onto its own file handle and decode state.
    pub fn try_clone(&self) -> Result<Self> {
        let mut tables = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            tables.push(table.duplicate()?);
        }
        Ok(Self {
            partitioner: self.partitioner,
            tables,
            next_table: self.next_table,
            active_tables: self.active_tables.clone(),
            row_matches: Vec::with_capacity(self.tables.len()),
            column_matches: Vec::with_capacity(self.tables.len()),
            value_scratch: Vec::new(),
            tombstones: self.tombstones.clone(),
            read_records: self.read_records,
            skipped_records: self.skipped_records,
        })
    }

    /// Opens a table's data buffer and decodes its first partition. On
    /// success the table joins the active set.
    fn activate_table(&mut self, index: usize) -> bool {
        let partitioner = self.partitioner;
        let table = &mut self.tables[index];
        if table.open() && !table.read_row(Some(&partitioner)) {
            self.active_tables.insert(index);
            true
        } else {
            table.close();
            false
        }
    }

    fn deactivate_table(&mut self, index: usize) {
        self.tables[index].close();
        self.active_tables.remove(&index);
    }

    /// Folds `index` into the row-match set: a strictly smaller
    /// `(token, key)` resets the set, a tie joins it.
    fn match_table(&self, matches: &mut Vec<usize>, index: usize) -> bool {
        let table = &self.tables[index];
        let comparison = match matches.first() {
            None => Ordering::Less,
            Some(&smallest) => {
                let smallest = &self.tables[smallest];
                self.partitioner.compare(
                    table.next_token(),
                    table.next_key(),
                    smallest.next_token(),
                    smallest.next_key(),
                )
            }
        };
        match comparison {
            Ordering::Less => {
                matches.clear();
                matches.push(index);
                true
            }
            Ordering::Equal => {
                matches.push(index);
                true
            }
            Ordering::Greater => false,
        }
    }

    /// Collects the readers positioned on the smallest pending partition,
    /// activating any not-yet-opened table whose first key is ≤ the
    /// current minimum (which can shift the minimum further down).
    fn find_first_row_matches(&mut self, matches: &mut Vec<usize>) -> usize {
        loop {
            matches.clear();
            for &index in &self.active_tables {
                self.match_table(matches, index);
            }

            let mut activation_failed = false;
            while self.next_table < self.tables.len() && self.match_table(matches, self.next_table)
            {
                let index = self.next_table;
                self.next_table += 1;
                if !self.activate_table(index) {
                    activation_failed = true;
                }
            }
            if !activation_failed {
                return matches.len();
            }
            // A table failed to activate while already folded into the
            // match set; rebuild from the tables that did come up.
        }
    }

    /// The readers (among the row matches) whose current cell name equals
    /// the smallest pending name.
    fn find_first_column_matches(
        &self,
        matched_columns: &mut Vec<usize>,
        matches: &[usize],
    ) -> usize {
        matched_columns.clear();
        let mut min_name: Option<&[u8]> = None;
        for &index in matches {
            let name = self.tables[index].next_column().name.as_slice();
            match min_name {
                None => {
                    min_name = Some(name);
                    matched_columns.push(index);
                }
                Some(current) => match name.cmp(current) {
                    Ordering::Less => {
                        min_name = Some(name);
                        matched_columns.clear();
                        matched_columns.push(index);
                    }
                    Ordering::Equal => matched_columns.push(index),
                    Ordering::Greater => {}
                },
            }
        }
        matched_columns.len()
    }

    /// The reader holding the newest version of the current column. Equal
    /// timestamps resolve arbitrarily, inheriting last-write-wins freedom.
    fn choose_latest_match(&self, matched_columns: &[usize]) -> usize {
        let mut best = matched_columns[0];
        let mut best_ts = self.tables[best].next_column().ts;
        for &index in &matched_columns[1..] {
            let ts = self.tables[index].next_column().ts;
            if ts > best_ts {
                best_ts = ts;
                best = index;
            }
        }
        best
    }

    /// Folds pending range tombstones into the per-partition map, drops
    /// the ones the merge has stepped past (`end_key ≤ name`), and
    /// recomputes the effective deletion watermark.
    fn update_tombstones(
        &mut self,
        min_time: &mut i64,
        matches: &[usize],
        marked_for_deletion: i64,
        name: &[u8],
    ) {
        for &index in matches {
            let column = self.tables[index].next_column();
            if column.range_tombstone {
                let ts = column.ts;
                match self.tombstones.get_mut(&column.end_key) {
                    Some(existing) => {
                        if *existing < ts {
                            *existing = ts;
                        }
                    }
                    None => {
                        self.tombstones.insert(column.end_key.clone(), ts);
                    }
                }
                if *min_time == STILL_ACTIVE || *min_time < ts {
                    *min_time = ts;
                }
            }
        }

        let mut kept = self.tombstones.split_off(name);
        kept.remove(name);
        self.tombstones = kept;

        *min_time = marked_for_deletion;
        for &ts in self.tombstones.values() {
            if *min_time == STILL_ACTIVE || *min_time < ts {
                *min_time = ts;
            }
        }
    }

    fn next_record(&mut self, sink: &mut dyn RowSink) -> bool {
        let mut matches = std::mem::take(&mut self.row_matches);
        let mut matched_columns = std::mem::take(&mut self.column_matches);
        let result = self.next_record_inner(sink, &mut matches, &mut matched_columns);
        self.row_matches = matches;
        self.column_matches = matched_columns;
        result
    }

    /// Assembles one whole row. Returns false when the row turned out to
    /// be dead (the caller then moves on to the next one).
    fn next_record_inner(
        &mut self,
        sink: &mut dyn RowSink,
        matches: &mut Vec<usize>,
        matched_columns: &mut Vec<usize>,
    ) -> bool {
        if self.find_first_row_matches(matches) == 0 {
            return false;
        }

        // The row is announced lazily, on its first surviving column, so a
        // pure-tombstone partition produces no callback at all.
        let key = self.tables[matches[0]].next_key().to_vec();
        let mut row_announced = false;

        // Partition-level tombstone: newest deletion across the matches.
        let mut marked_for_deletion = STILL_ACTIVE;
        for &index in matches.iter() {
            let this_deletion = self.tables[index].marked_for_deletion();
            if this_deletion != STILL_ACTIVE
                && (marked_for_deletion == STILL_ACTIVE || marked_for_deletion < this_deletion)
            {
                marked_for_deletion = this_deletion;
            }
        }

        let mut has_columns = false;
        self.tombstones.clear();
        let mut min_time = marked_for_deletion;

        while self.find_first_column_matches(matched_columns, matches) > 0 {
            let name = self.tables[matched_columns[0]].next_column().name.clone();
            self.update_tombstones(&mut min_time, matches, marked_for_deletion, &name);

            let winner = self.choose_latest_match(matched_columns);
            let column = self.tables[winner].next_column();

            // Empty names are clustering artefacts; a cell loses to the
            // watermark when the row was deleted after it was written.
            let emit = !name.is_empty()
                && !column.deleted
                && !column.range_tombstone
                && (min_time == STILL_ACTIVE || min_time < column.ts);
            if emit {
                let ts = column.ts;
                let expiring = column.expiring;
                let ttl = column.ttl;
                let expiration = column.expiration;

                if !row_announced {
                    sink.new_row(&key);
                    row_announced = true;
                }
                let mut value = std::mem::take(&mut self.value_scratch);
                self.tables[winner].read_column_data(&mut value);
                if expiring {
                    sink.new_column_with_ttl(&name, &value, ts, ttl, expiration);
                } else {
                    sink.new_column(&name, &value, ts);
                }
                self.value_scratch = value;
                has_columns = true;
            }

            // Winner and losers both step past this column.
            for i in 0..matched_columns.len() {
                let index = matched_columns[i];
                if !self.tables[index].read_column() {
                    if let Some(position) = matches.iter().position(|&m| m == index) {
                        matches.swap_remove(position);
                    }
                    // Line the reader up on its next partition; EOF means
                    // the file is done.
                    let partitioner = self.partitioner;
                    if self.tables[index].read_row(Some(&partitioner)) {
                        self.deactivate_table(index);
                    }
                }
            }
        }

        self.read_records += 1;

        // A row that was deleted and never rewritten is not reported.
        if marked_for_deletion != STILL_ACTIVE && !has_columns {
            self.skipped_records += 1;
            return false;
        }
        // A live row whose cells were all swallowed (clustering artefacts,
        // empty names) still announces itself.
        if !row_announced {
            sink.new_row(&key);
        }
        true
    }
}
