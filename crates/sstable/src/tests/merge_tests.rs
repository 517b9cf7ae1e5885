use partitioner::Partitioner;
use std::path::Path;
use tempfile::tempdir;

use super::fixtures::*;
use crate::format::Version;
use crate::merge::MergeIterator;
use crate::STILL_ACTIVE;

const P: Partitioner = Partitioner::ByteOrdered;

/// One `jb` generation per table, readers initialized and merged under
/// the byte-ordered partitioner (deterministic key order).
fn merge_of(dir: &Path, files: Vec<Vec<OldPartition>>) -> MergeIterator {
    let mut readers = Vec::new();
    for (i, partitions) in files.iter().enumerate() {
        let prefix = write_old_table(
            dir,
            "ks",
            "tbl",
            i as u32 + 1,
            BYTE_ORDERED,
            partitions,
            false,
        );
        readers.push(init_reader(config_for(prefix, Version::JB), &P));
    }
    MergeIterator::new(P, readers)
}

fn live<'a>(key: &'a [u8], cells: Vec<OldCell<'a>>) -> OldPartition<'a> {
    OldPartition {
        key,
        deletion: STILL_ACTIVE,
        cells,
    }
}

fn normal<'a>(name: &'a [u8], value: &'a [u8], ts: i64) -> OldCell<'a> {
    OldCell::Normal { name, value, ts }
}

// -------------------- Single file --------------------

#[test]
fn single_file_two_partitions() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![vec![
            live(b"a", vec![normal(b"x", b"1", 10), normal(b"y", b"2", 10)]),
            live(b"b", vec![normal(b"z", b"3", 10)]),
        ]],
    );

    assert_eq!(
        drain(&mut iter),
        vec![
            row(b"a"),
            col(b"x", b"1", 10),
            col(b"y", b"2", 10),
            row(b"b"),
            col(b"z", b"3", 10),
        ]
    );
    assert_eq!(iter.read_records(), 2);
    assert_eq!(iter.skipped_records(), 0);
}

// -------------------- Overwrites --------------------

#[test]
fn same_partition_latest_timestamp_wins() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![
            vec![live(b"k", vec![normal(b"c", b"old", 5)])],
            vec![live(b"k", vec![normal(b"c", b"new", 7)])],
        ],
    );

    assert_eq!(drain(&mut iter), vec![row(b"k"), col(b"c", b"new", 7)]);
    assert_eq!(iter.read_records(), 1);
}

#[test]
fn each_column_name_appears_at_most_once() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![
            vec![live(
                b"k",
                vec![normal(b"a", b"a1", 1), normal(b"b", b"b1", 9)],
            )],
            vec![live(
                b"k",
                vec![normal(b"a", b"a2", 2), normal(b"c", b"c2", 3)],
            )],
        ],
    );

    assert_eq!(
        drain(&mut iter),
        vec![
            row(b"k"),
            col(b"a", b"a2", 2),
            col(b"b", b"b1", 9),
            col(b"c", b"c2", 3),
        ]
    );
}

// -------------------- Row tombstones --------------------

#[test]
fn row_tombstone_masks_older_data() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![
            vec![live(b"k", vec![normal(b"c", b"v", 5)])],
            vec![OldPartition {
                key: b"k",
                deletion: 6,
                cells: vec![],
            }],
        ],
    );

    assert_eq!(drain(&mut iter), vec![]);
    assert_eq!(iter.read_records(), 1);
    assert_eq!(iter.skipped_records(), 1);
}

#[test]
fn row_tombstone_superseded_by_later_write() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![
            vec![live(b"k", vec![normal(b"c", b"v", 5)])],
            vec![OldPartition {
                key: b"k",
                deletion: 6,
                cells: vec![],
            }],
            vec![live(b"k", vec![normal(b"c", b"v2", 9)])],
        ],
    );

    assert_eq!(drain(&mut iter), vec![row(b"k"), col(b"c", b"v2", 9)]);
    assert_eq!(iter.skipped_records(), 0);
}

#[test]
fn tombstoned_partition_does_not_hide_its_neighbors() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![
            vec![
                live(b"a", vec![normal(b"c", b"1", 1)]),
                live(b"c", vec![normal(b"c", b"3", 3)]),
            ],
            vec![OldPartition {
                key: b"b",
                deletion: 10,
                cells: vec![],
            }],
        ],
    );

    assert_eq!(
        drain(&mut iter),
        vec![row(b"a"), col(b"c", b"1", 1), row(b"c"), col(b"c", b"3", 3)]
    );
    assert_eq!(iter.read_records(), 3);
    assert_eq!(iter.skipped_records(), 1);
}

// -------------------- Range tombstones --------------------

#[test]
fn range_tombstone_shadows_older_cells_before_its_end() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![vec![live(
            b"k",
            vec![
                OldCell::RangeTombstone {
                    name: b"0",
                    end_key: b"m",
                    ts: 8,
                },
                normal(b"a", b"A", 5),
                normal(b"n", b"N", 5),
            ],
        )]],
    );

    // "a" < "m" with ts 5 ≤ 8 is shadowed; "n" ≥ "m" survives.
    assert_eq!(drain(&mut iter), vec![row(b"k"), col(b"n", b"N", 5)]);
}

#[test]
fn range_tombstone_spares_newer_cells() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![
            vec![live(
                b"k",
                vec![
                    OldCell::RangeTombstone {
                        name: b"0",
                        end_key: b"m",
                        ts: 8,
                    },
                    normal(b"a", b"old", 5),
                ],
            )],
            vec![live(b"k", vec![normal(b"a", b"fresh", 9)])],
        ],
    );

    assert_eq!(drain(&mut iter), vec![row(b"k"), col(b"a", b"fresh", 9)]);
}

#[test]
fn range_tombstone_at_its_end_key_no_longer_applies() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![vec![live(
            b"k",
            vec![
                OldCell::RangeTombstone {
                    name: b"0",
                    end_key: b"m",
                    ts: 8,
                },
                normal(b"m", b"M", 5),
            ],
        )]],
    );

    // The bound is exclusive at the end key itself.
    assert_eq!(drain(&mut iter), vec![row(b"k"), col(b"m", b"M", 5)]);
}

// -------------------- Deleted and expiring cells --------------------

#[test]
fn deleted_cells_are_withheld() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![
            vec![live(b"k", vec![normal(b"c", b"v", 5), normal(b"d", b"w", 5)])],
            vec![live(b"k", vec![OldCell::Deleted { name: b"c", ts: 7 }])],
        ],
    );

    assert_eq!(drain(&mut iter), vec![row(b"k"), col(b"d", b"w", 5)]);
}

#[test]
fn expiring_cells_pass_ttl_and_expiration_through() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![vec![live(
            b"k",
            vec![OldCell::Expiring {
                name: b"c",
                value: b"v",
                ts: 10,
                ttl: 300,
                expiration: 1_700_000_300,
            }],
        )]],
    );

    assert_eq!(
        drain(&mut iter),
        vec![row(b"k"), col_ttl(b"c", b"v", 10, 300, 1_700_000_300)]
    );
}

#[test]
fn counter_cells_surface_as_plain_columns() {
    let dir = tempdir().unwrap();
    let prefix = write_ancient_table(
        dir.path(),
        "ks",
        "tbl",
        1,
        &[live(
            b"k",
            vec![OldCell::Counter {
                name: b"hits",
                value: b"\x2a",
                ts: 4,
                counter_ts: 99,
            }],
        )],
    );
    let readers = vec![init_reader(config_for(prefix, Version::IB), &P)];
    let mut iter = MergeIterator::new(P, readers);

    assert_eq!(drain(&mut iter), vec![row(b"k"), col(b"hits", b"\x2a", 4)]);
}

// -------------------- Ordering across files --------------------

#[test]
fn output_keys_are_non_decreasing_across_files() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![
            vec![
                live(b"b", vec![normal(b"c", b"b1", 1)]),
                live(b"d", vec![normal(b"c", b"d1", 1)]),
            ],
            vec![
                live(b"a", vec![normal(b"c", b"a2", 2)]),
                live(b"c", vec![normal(b"c", b"c2", 2)]),
                live(b"e", vec![normal(b"c", b"e2", 2)]),
            ],
        ],
    );

    let events = drain(&mut iter);
    let keys: Vec<&[u8]> = events
        .iter()
        .filter_map(|e| match e {
            Event::Row(k) => Some(k.as_slice()),
            _ => None,
        })
        .collect();
    assert_eq!(keys, vec![b"a" as &[u8], b"b", b"c", b"d", b"e"]);

    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(iter.read_records(), 5);
}

// -------------------- Peeking and duplication --------------------

#[test]
fn get_next_key_peeks_without_consuming() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![vec![
            live(b"a", vec![normal(b"c", b"1", 1)]),
            live(b"b", vec![normal(b"c", b"2", 2)]),
        ]],
    );

    assert_eq!(iter.get_next_key().as_deref(), Some(b"a" as &[u8]));
    assert_eq!(iter.get_next_key().as_deref(), Some(b"a" as &[u8]));

    let mut sink = RecordingSink::default();
    assert!(iter.next(&mut sink));
    assert_eq!(iter.get_next_key().as_deref(), Some(b"b" as &[u8]));
    assert!(iter.next(&mut sink));
    assert_eq!(iter.get_next_key(), None);
}

#[test]
fn get_next_key_may_name_a_dead_partition() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![vec![
            OldPartition {
                key: b"a",
                deletion: 5,
                cells: vec![],
            },
            live(b"b", vec![normal(b"c", b"2", 2)]),
        ]],
    );

    assert_eq!(iter.get_next_key().as_deref(), Some(b"a" as &[u8]));
    let events = drain(&mut iter);
    assert_eq!(events, vec![row(b"b"), col(b"c", b"2", 2)]);
}

#[test]
fn cloned_iterators_advance_independently() {
    let dir = tempdir().unwrap();
    let mut iter = merge_of(
        dir.path(),
        vec![
            vec![live(b"a", vec![normal(b"c", b"1", 1)])],
            vec![live(b"b", vec![normal(b"c", b"2", 2)])],
        ],
    );

    let mut sink = RecordingSink::default();
    assert!(iter.next(&mut sink));

    let mut clone = iter.try_clone().unwrap();
    let from_clone = drain(&mut clone);
    let from_original = drain(&mut iter);
    assert_eq!(from_clone, from_original);
    assert_eq!(from_clone, vec![row(b"b"), col(b"c", b"2", 2)]);
}

// -------------------- Compressed data files --------------------

#[test]
fn merge_reads_lz4_compressed_generations() {
    let dir = tempdir().unwrap();
    let prefix = write_old_table(
        dir.path(),
        "ks",
        "tbl",
        1,
        BYTE_ORDERED,
        &[
            live(b"a", vec![normal(b"x", b"payload-a", 10)]),
            live(b"b", vec![normal(b"y", b"payload-b", 11)]),
        ],
        false,
    );
    compress_old_data(&prefix);

    let readers = vec![init_reader(config_for(prefix, Version::JB), &P)];
    let mut iter = MergeIterator::new(P, readers);

    assert_eq!(
        drain(&mut iter),
        vec![
            row(b"a"),
            col(b"x", b"payload-a", 10),
            row(b"b"),
            col(b"y", b"payload-b", 11),
        ]
    );
}

// -------------------- Modern format through the merge --------------------

#[test]
fn modern_rows_merge_with_latest_wins() {
    let schema = text_schema(&[b"c"]);
    let dir = tempdir().unwrap();

    let old_gen = write_new_table(
        dir.path(),
        1,
        &schema,
        BYTE_ORDERED,
        &[NewPartition {
            key: b"k",
            deletion: STILL_ACTIVE,
            cells: vec![NewCell::Normal {
                column: 0,
                value: b"old",
                ts: 5,
            }],
        }],
    );
    let new_gen = write_new_table(
        dir.path(),
        2,
        &schema,
        BYTE_ORDERED,
        &[NewPartition {
            key: b"k",
            deletion: STILL_ACTIVE,
            cells: vec![NewCell::Normal {
                column: 0,
                value: b"new",
                ts: 7,
            }],
        }],
    );

    let version = Version::new(b'm', b'c');
    let readers = vec![
        init_reader(config_with_schema(old_gen, version, schema.clone()), &P),
        init_reader(config_with_schema(new_gen, version, schema.clone()), &P),
    ];
    let mut iter = MergeIterator::new(P, readers);

    assert_eq!(drain(&mut iter), vec![row(b"k"), col(b"c", b"new", 7)]);
}

#[test]
fn modern_partition_deletion_shadows_stale_cells() {
    let schema = text_schema(&[b"c"]);
    let dir = tempdir().unwrap();

    let generation = write_new_table(
        dir.path(),
        1,
        &schema,
        BYTE_ORDERED,
        &[NewPartition {
            key: b"k",
            deletion: 6,
            cells: vec![NewCell::Normal {
                column: 0,
                value: b"stale",
                ts: 5,
            }],
        }],
    );

    let version = Version::new(b'm', b'c');
    let readers = vec![init_reader(
        config_with_schema(generation, version, schema),
        &P,
    )];
    let mut iter = MergeIterator::new(P, readers);

    assert_eq!(drain(&mut iter), vec![]);
    assert_eq!(iter.skipped_records(), 1);
}

#[test]
fn mixed_format_generations_merge_together() {
    let dir = tempdir().unwrap();

    let old_gen = write_old_table(
        dir.path(),
        "ks",
        "tbl",
        1,
        BYTE_ORDERED,
        &[live(b"k", vec![normal(b"c", b"from-jb", 5)])],
        false,
    );

    let schema = text_schema(&[b"c"]);
    let new_gen = write_new_table(
        dir.path(),
        2,
        &schema,
        BYTE_ORDERED,
        &[NewPartition {
            key: b"k",
            deletion: STILL_ACTIVE,
            cells: vec![NewCell::Normal {
                column: 0,
                value: b"from-mc",
                ts: 9,
            }],
        }],
    );

    let readers = vec![
        init_reader(config_for(old_gen, Version::JB), &P),
        init_reader(
            config_with_schema(new_gen, Version::new(b'm', b'c'), schema),
            &P,
        ),
    ];
    let mut iter = MergeIterator::new(P, readers);

    assert_eq!(drain(&mut iter), vec![row(b"k"), col(b"c", b"from-mc", 9)]);
}
