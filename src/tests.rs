// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! End-to-end scenarios across the writer, the format, and the reader.

use std::fs::File;
use std::io::{BufReader, BufWriter};

use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{
    BloomSpec, ColumnSpec, CompareOp, CompressionType, ReaderOptions, Record, RowGroupReader,
    RowGroupWriter, Selection, SortIndexKind, SortOrder, Value, ValueType, WriterOptions,
};

fn int_record(values: &[i32]) -> Record {
    Record::from_values(values.iter().map(|v| Value::Int32(*v)).collect())
}

fn drain_reader<R: std::io::Read>(mut reader: RowGroupReader<R>) -> Vec<Record> {
    let mut records = vec![];
    while let Some(record) = reader.next_record().unwrap() {
        records.push(record);
    }
    records
}

/// Three int columns, 100 rows, thresholds forcing several row groups,
/// column 0 sorted ascending, bloom filter on column 1.
fn scenario_options() -> WriterOptions {
    WriterOptions::new(vec![
        ColumnSpec::new(ValueType::Int32, 0),
        ColumnSpec::new(ValueType::Int32, 1),
        ColumnSpec::new(ValueType::Int32, 2),
    ])
    .with_default_codec(CompressionType::Gzip)
    .with_row_group_size(900)
    .with_block_size(8 << 10)
    .with_workers(2)
    .with_sorted(0, SortOrder::Ascending)
    .with_bloom(BloomSpec::new(1).with_rate(0.05, 256))
}

fn scenario_rows() -> Vec<[i32; 3]> {
    // column 0 takes each value 0..100 once, out of row order
    (0..100).map(|i| [(i * 37) % 100, i % 10, i]).collect()
}

fn write_scenario() -> Vec<u8> {
    let mut writer = RowGroupWriter::new(Vec::new(), scenario_options()).unwrap();
    for row in scenario_rows() {
        writer.write_record(&int_record(&row)).unwrap();
    }
    assert!(writer.row_groups_written() >= 3);
    writer.close().unwrap()
}

fn scenario_reader_options() -> ReaderOptions {
    ReaderOptions::new(vec![ValueType::Int32; 3])
        .project(0, 0)
        .project(1, 1)
        .project(2, 2)
        .with_block_size(8 << 10)
}

#[test]
fn test_round_trip_in_original_order() {
    let bytes = write_scenario();
    let reader = RowGroupReader::new(&bytes[..], scenario_reader_options()).unwrap();
    let records = drain_reader(reader);

    let expected: Vec<Record> = scenario_rows().iter().map(|r| int_record(r)).collect();
    assert_eq!(records, expected);
}

#[test]
fn test_round_trip_every_codec_and_type() {
    for codec in [
        CompressionType::Gzip,
        CompressionType::Lzma,
        CompressionType::Lz4,
    ] {
        let options = WriterOptions::new(vec![
            ColumnSpec::new(ValueType::Int64, 0),
            ColumnSpec::new(ValueType::Float64, 1),
            ColumnSpec::new(ValueType::Str, 2),
        ])
        .with_default_codec(codec)
        .with_row_group_size(2 << 10)
        .with_block_size(16 << 10);

        let rows: Vec<Record> = (0..200i64)
            .map(|i| {
                Record::from_values(vec![
                    Value::Int64(i * 1_000_003),
                    Value::Float64(i as f64 / 7.0),
                    Value::Str(format!("value-{i:04}")),
                ])
            })
            .collect();

        let mut writer = RowGroupWriter::new(Vec::new(), options).unwrap();
        for row in &rows {
            writer.write_record(row).unwrap();
        }
        let bytes = writer.close().unwrap();

        let options = ReaderOptions::new(vec![
            ValueType::Int64,
            ValueType::Float64,
            ValueType::Str,
        ])
        .project(0, 0)
        .project(1, 1)
        .project(2, 2)
        .with_block_size(16 << 10);
        let records = drain_reader(RowGroupReader::new(&bytes[..], options).unwrap());
        assert_eq!(records, rows, "{codec:?}");
    }
}

#[test]
fn test_projection_and_reordering() {
    let bytes = write_scenario();
    // only columns 2 and 0, swapped into output positions 0 and 1
    let options = ReaderOptions::new(vec![ValueType::Int32; 3])
        .project(2, 0)
        .project(0, 1)
        .with_block_size(8 << 10);
    let records = drain_reader(RowGroupReader::new(&bytes[..], options).unwrap());

    let expected: Vec<Record> = scenario_rows()
        .iter()
        .map(|r| int_record(&[r[2], r[0]]))
        .collect();
    assert_eq!(records, expected);
}

fn scenario_selection() -> Selection {
    Selection::and(vec![
        Selection::predicate(CompareOp::Ge, 0, Value::Int32(50)),
        Selection::predicate(CompareOp::Eq, 1, Value::Int32(7)),
    ])
}

#[test]
fn test_selected_scan_matches_full_scan() {
    let bytes = write_scenario();

    // baseline: full unindexed table scan filtered by hand
    let mut expected = scenario_rows()
        .into_iter()
        .filter(|r| r[0] >= 50 && r[1] == 7)
        .collect_vec();
    expected.sort_by_key(|r| r[2]);
    assert!(!expected.is_empty());

    for kind in [SortIndexKind::BSearch, SortIndexKind::CssTree] {
        let options = scenario_reader_options()
            .with_selection(scenario_selection())
            .with_index_kind(kind);
        let reader = RowGroupReader::new(&bytes[..], options).unwrap();
        let records = drain_reader(reader);

        let mut rows = records
            .into_iter()
            .map(|record| {
                let values = record.into_values();
                let as_int = |v: &Value| match v {
                    Value::Int32(i) => *i,
                    other => panic!("unexpected value {other}"),
                };
                [as_int(&values[0]), as_int(&values[1]), as_int(&values[2])]
            })
            .collect_vec();
        rows.sort_by_key(|r| r[2]);
        assert_eq!(rows, expected, "{kind:?}");
    }
}

#[test]
fn test_selected_scan_prunes_with_bloom() {
    let bytes = write_scenario();
    // column 1 only holds 0..=9: equality on 42 cannot match anywhere
    let options = scenario_reader_options().with_selection(Selection::and(vec![
        Selection::predicate(CompareOp::Ge, 0, Value::Int32(0)),
        Selection::predicate(CompareOp::Eq, 1, Value::Int32(42)),
    ]));
    let reader = RowGroupReader::new(&bytes[..], options).unwrap();
    let records = drain_reader(reader);
    assert!(records.is_empty());
}

#[test]
fn test_round_trip_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("groups.pax");

    let file = BufWriter::new(File::create(&path).unwrap());
    let mut writer = RowGroupWriter::new(file, scenario_options()).unwrap();
    for row in scenario_rows() {
        writer.write_record(&int_record(&row)).unwrap();
    }
    writer.close().unwrap();

    let file = BufReader::new(File::open(&path).unwrap());
    let reader = RowGroupReader::new(file, scenario_reader_options()).unwrap();
    let records = drain_reader(reader);
    assert_eq!(records.len(), 100);
}

#[test]
fn test_lenient_nulls_round_trip() {
    let options = WriterOptions::new(vec![
        ColumnSpec::new(ValueType::Int32, 0),
        ColumnSpec::new(ValueType::Str, 1),
    ])
    .with_default_codec(CompressionType::Lz4)
    .with_row_group_size(1 << 10)
    .with_block_size(8 << 10)
    .with_lenient(true);

    let rows = vec![
        Record::from_values(vec![Value::Int32(1), Value::Str("one".into())]),
        Record::from_values(vec![Value::Int32(2), Value::Null]),
        Record::from_values(vec![Value::Int32(3)]),
    ];
    let mut writer = RowGroupWriter::new(Vec::new(), options).unwrap();
    for row in &rows {
        writer.write_record(row).unwrap();
    }
    let bytes = writer.close().unwrap();

    let options = ReaderOptions::new(vec![ValueType::Int32, ValueType::Str])
        .project(0, 0)
        .project(1, 1)
        .with_block_size(8 << 10);
    let records = drain_reader(RowGroupReader::new(&bytes[..], options).unwrap());
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].field(1), Some(&Value::Null));
    assert_eq!(records[2].field(1), Some(&Value::Null));
}

#[test]
fn test_incompressible_data_skips_and_carries() {
    // random strings barely compress, so some flush must take the
    // SKIP-and-carry path instead of fitting its block
    let options = WriterOptions::new(vec![
        ColumnSpec::new(ValueType::Int32, 0),
        ColumnSpec::new(ValueType::Str, 1),
    ])
    .with_default_codec(CompressionType::Lz4)
    .with_row_group_size(1500)
    .with_block_size(4 << 10);

    let mut rng = StdRng::seed_from_u64(7);
    let rows: Vec<Record> = (0..400)
        .map(|i| {
            let junk: String = (0..40).map(|_| rng.gen_range('!'..='~')).collect();
            Record::from_values(vec![Value::Int32(i), Value::Str(junk)])
        })
        .collect();

    let mut writer = RowGroupWriter::new(Vec::new(), options).unwrap();
    for row in &rows {
        writer.write_record(row).unwrap();
    }
    let bytes = writer.close().unwrap();

    let options = ReaderOptions::new(vec![ValueType::Int32, ValueType::Str])
        .project(0, 0)
        .project(1, 1)
        .with_block_size(4 << 10);
    let reader = RowGroupReader::new(&bytes[..], options).unwrap();
    let records = drain_reader(reader);
    assert_eq!(records, rows);
}

#[test]
fn test_sorted_descending_range_scan() {
    let options = WriterOptions::new(vec![
        ColumnSpec::new(ValueType::Int32, 0),
        ColumnSpec::new(ValueType::Int32, 1),
    ])
    .with_default_codec(CompressionType::Gzip)
    .with_row_group_size(2 << 10)
    .with_block_size(16 << 10)
    .with_sorted(0, SortOrder::Descending);

    let rows: Vec<[i32; 2]> = (0..150).map(|i| [(i * 13) % 151, i]).collect();
    let mut writer = RowGroupWriter::new(Vec::new(), options).unwrap();
    for row in &rows {
        writer.write_record(&int_record(row)).unwrap();
    }
    let bytes = writer.close().unwrap();

    let options = ReaderOptions::new(vec![ValueType::Int32; 2])
        .project(0, 0)
        .project(1, 1)
        .with_block_size(16 << 10)
        .with_selection(Selection::predicate(CompareOp::Lt, 0, Value::Int32(20)));
    let records = drain_reader(RowGroupReader::new(&bytes[..], options).unwrap());

    let mut got: Vec<i32> = records
        .iter()
        .map(|r| match r.field(1) {
            Some(Value::Int32(i)) => *i,
            other => panic!("unexpected field {other:?}"),
        })
        .sorted()
        .collect();
    got.dedup();
    let expected: Vec<i32> = rows
        .iter()
        .filter(|r| r[0] < 20)
        .map(|r| r[1])
        .sorted()
        .collect();
    assert_eq!(got, expected);
}
