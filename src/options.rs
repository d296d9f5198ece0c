// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Writer and reader configuration.
//!
//! These structs are the crate's whole configuration surface: the job
//! configuration layer above feeds them, and `validate` rejects malformed
//! setups before any I/O happens.

use crate::compress::CompressionType;
use crate::error::{FormatError, FormatResult};
use crate::index::SortIndexKind;
use crate::select::Selection;
use crate::sorter::SortOrder;
use crate::types::ValueType;

/// One output column of the writer.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub value_type: ValueType,
    /// Field position read from each incoming record.
    pub source: usize,
    /// Codec override; the writer's default codec otherwise.
    pub codec: Option<CompressionType>,
}

impl ColumnSpec {
    pub fn new(value_type: ValueType, source: usize) -> Self {
        Self {
            value_type,
            source,
            codec: None,
        }
    }

    pub fn with_codec(mut self, codec: CompressionType) -> Self {
        self.codec = Some(codec);
        self
    }
}

/// Sort declaration for one column.
#[derive(Debug, Clone, Copy)]
pub struct SortSpec {
    pub column: usize,
    pub order: SortOrder,
}

/// Bloom filter declaration for one column.
#[derive(Debug, Clone, Copy)]
pub struct BloomSpec {
    pub column: usize,
    pub rate: f64,
    pub expected: usize,
}

impl BloomSpec {
    pub fn new(column: usize) -> Self {
        Self {
            column,
            rate: 0.01,
            expected: 16384,
        }
    }

    pub fn with_rate(mut self, rate: f64, expected: usize) -> Self {
        self.rate = rate;
        self.expected = expected;
        self
    }
}

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub columns: Vec<ColumnSpec>,
    pub default_codec: CompressionType,
    /// Row-group flush threshold in bytes (uncompressed column data plus
    /// the estimated header).
    pub row_group_size: usize,
    /// Fixed storage block size; row groups never span a block boundary.
    pub block_size: usize,
    /// Record missing fields as zero-size instead of failing.
    pub lenient: bool,
    /// Compression worker threads.
    pub workers: usize,
    pub sorted: Vec<SortSpec>,
    pub bloom: Vec<BloomSpec>,
}

impl WriterOptions {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self {
            columns,
            default_codec: CompressionType::Gzip,
            row_group_size: 4 << 20,
            block_size: 64 << 20,
            lenient: false,
            workers: 1,
            sorted: vec![],
            bloom: vec![],
        }
    }

    pub fn with_default_codec(mut self, codec: CompressionType) -> Self {
        self.default_codec = codec;
        self
    }

    pub fn with_row_group_size(mut self, bytes: usize) -> Self {
        self.row_group_size = bytes;
        self
    }

    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn with_lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_sorted(mut self, column: usize, order: SortOrder) -> Self {
        self.sorted.push(SortSpec { column, order });
        self
    }

    pub fn with_bloom(mut self, spec: BloomSpec) -> Self {
        self.bloom.push(spec);
        self
    }

    pub fn validate(&self) -> FormatResult<()> {
        if self.columns.is_empty() {
            return Err(FormatError::config("writer needs at least one column"));
        }
        if self.workers == 0 {
            return Err(FormatError::config("worker count must be at least 1"));
        }
        if self.row_group_size == 0 {
            return Err(FormatError::config("row group size must be positive"));
        }
        if self.block_size < self.row_group_size * 2 {
            return Err(FormatError::config(format!(
                "block size {} is too small for row groups of {}",
                self.block_size, self.row_group_size
            )));
        }
        self.default_codec.ensure_supported()?;
        for (idx, column) in self.columns.iter().enumerate() {
            if let Some(codec) = column.codec {
                codec.ensure_supported().map_err(|_| {
                    FormatError::config(format!("column {idx} selects an unavailable codec"))
                })?;
            }
        }
        check_column_list(
            "sorted",
            self.sorted.iter().map(|s| s.column),
            self.columns.len(),
        )?;
        check_column_list(
            "bloom",
            self.bloom.iter().map(|b| b.column),
            self.columns.len(),
        )?;
        for spec in &self.bloom {
            if !(spec.rate > 0.0 && spec.rate < 1.0) || spec.expected == 0 {
                return Err(FormatError::config(format!(
                    "bloom spec for column {} is out of range",
                    spec.column
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn codec_for(&self, column: usize) -> CompressionType {
        self.columns[column].codec.unwrap_or(self.default_codec)
    }

    pub(crate) fn sort_order_of(&self, column: usize) -> Option<SortOrder> {
        self.sorted
            .iter()
            .find(|s| s.column == column)
            .map(|s| s.order)
    }

    pub(crate) fn bloom_spec_of(&self, column: usize) -> Option<&BloomSpec> {
        self.bloom.iter().find(|b| b.column == column)
    }

    #[cfg(test)]
    pub fn default_for_test(columns: Vec<ColumnSpec>) -> Self {
        Self::new(columns)
            .with_default_codec(CompressionType::Lz4)
            .with_row_group_size(4 << 10)
            .with_block_size(64 << 10)
            .with_workers(2)
    }
}

fn check_column_list(
    what: &str,
    columns: impl Iterator<Item = usize>,
    count: usize,
) -> FormatResult<()> {
    let mut seen = vec![false; count];
    for column in columns {
        if column >= count {
            return Err(FormatError::config(format!(
                "{what} column {column} out of range (have {count})"
            )));
        }
        if seen[column] {
            return Err(FormatError::config(format!(
                "{what} column {column} listed twice"
            )));
        }
        seen[column] = true;
    }
    Ok(())
}

/// One projected column of the reader.
#[derive(Debug, Clone, Copy)]
pub struct OutputColumn {
    /// Column position inside the file.
    pub column: usize,
    /// Field position inside the produced record.
    pub output: usize,
}

/// Reader configuration.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Expected value type of every file column, verified against the block
    /// header.
    pub value_types: Vec<ValueType>,
    pub projection: Vec<OutputColumn>,
    pub selection: Option<Selection>,
    /// Search structure used for index-backed predicates.
    pub index_kind: SortIndexKind,
    /// Fixed storage block size the file was written with; SKIP sentinels
    /// and padding advance the stream to multiples of it.
    pub block_size: usize,
}

impl ReaderOptions {
    pub fn new(value_types: Vec<ValueType>) -> Self {
        Self {
            value_types,
            projection: vec![],
            selection: None,
            index_kind: SortIndexKind::default(),
            block_size: 64 << 20,
        }
    }

    pub fn with_block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn project(mut self, column: usize, output: usize) -> Self {
        self.projection.push(OutputColumn { column, output });
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_index_kind(mut self, kind: SortIndexKind) -> Self {
        self.index_kind = kind;
        self
    }

    pub fn validate(&self) -> FormatResult<()> {
        if self.value_types.is_empty() {
            return Err(FormatError::config("reader needs at least one column"));
        }
        if self.projection.is_empty() {
            return Err(FormatError::config("reader needs at least one projected column"));
        }
        if self.block_size == 0 {
            return Err(FormatError::config("block size must be positive"));
        }
        check_column_list(
            "projected",
            self.projection.iter().map(|p| p.column),
            self.value_types.len(),
        )?;
        let mut outputs: Vec<usize> = self.projection.iter().map(|p| p.output).collect();
        outputs.sort_unstable();
        outputs.dedup();
        if outputs.len() != self.projection.len() {
            return Err(FormatError::config("duplicate output field position"));
        }
        if let Some(selection) = &self.selection {
            for id in 0..selection.node_count() {
                if let crate::select::SelectNode::Predicate(p) = selection.node(id) {
                    let Some(ty) = self.value_types.get(p.column) else {
                        return Err(FormatError::config(format!(
                            "selection references column {} out of range",
                            p.column
                        )));
                    };
                    match p.literal.value_type() {
                        Some(literal_ty) if literal_ty == *ty => {}
                        Some(_) => {
                            return Err(FormatError::config(format!(
                                "selection literal type mismatch on column {}",
                                p.column
                            )));
                        }
                        None => {
                            return Err(FormatError::config(
                                "selection literal must not be null",
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Columns that must be read: the projection plus every column a
    /// predicate touches.
    pub(crate) fn live_columns(&self) -> Vec<bool> {
        let mut live = vec![false; self.value_types.len()];
        for p in &self.projection {
            live[p.column] = true;
        }
        if let Some(selection) = &self.selection {
            for column in selection.columns() {
                live[column] = true;
            }
        }
        live
    }

    pub(crate) fn output_of(&self, column: usize) -> Option<usize> {
        self.projection
            .iter()
            .find(|p| p.column == column)
            .map(|p| p.output)
    }

    /// Size of the produced records.
    pub(crate) fn record_width(&self) -> usize {
        self.projection
            .iter()
            .map(|p| p.output + 1)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::select::CompareOp;
    use crate::types::Value;

    fn two_columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new(ValueType::Int32, 0),
            ColumnSpec::new(ValueType::Str, 1),
        ]
    }

    #[test]
    fn test_writer_validation() {
        assert!(WriterOptions::new(two_columns()).validate().is_ok());
        assert!(WriterOptions::new(vec![]).validate().is_err());
        assert!(WriterOptions::new(two_columns())
            .with_workers(0)
            .validate()
            .is_err());
        assert!(WriterOptions::new(two_columns())
            .with_sorted(5, SortOrder::Ascending)
            .validate()
            .is_err());
        assert!(WriterOptions::new(two_columns())
            .with_bloom(BloomSpec::new(1))
            .with_bloom(BloomSpec::new(1))
            .validate()
            .is_err());
        assert!(WriterOptions::new(two_columns())
            .with_default_codec(CompressionType::QuickLz)
            .validate()
            .is_err());
        // block must comfortably hold a row group
        assert!(WriterOptions::new(two_columns())
            .with_row_group_size(1 << 20)
            .with_block_size(1 << 20)
            .validate()
            .is_err());
    }

    #[test]
    fn test_reader_validation() {
        let types = vec![ValueType::Int32, ValueType::Str];
        assert!(ReaderOptions::new(types.clone())
            .project(0, 0)
            .validate()
            .is_ok());
        assert!(ReaderOptions::new(types.clone()).validate().is_err());
        assert!(ReaderOptions::new(types.clone())
            .project(4, 0)
            .validate()
            .is_err());
        assert!(ReaderOptions::new(types.clone())
            .project(0, 0)
            .project(1, 0)
            .validate()
            .is_err());

        // literal type must match the column type
        let bad = Selection::predicate(CompareOp::Eq, 1, Value::Int32(3));
        assert!(ReaderOptions::new(types.clone())
            .project(0, 0)
            .with_selection(bad)
            .validate()
            .is_err());
        let good = Selection::predicate(CompareOp::Eq, 1, Value::Str("x".into()));
        assert!(ReaderOptions::new(types)
            .project(0, 0)
            .with_selection(good)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_live_columns_include_selection() {
        let options = ReaderOptions::new(vec![ValueType::Int32; 3])
            .project(2, 0)
            .with_selection(Selection::predicate(CompareOp::Ge, 0, Value::Int32(1)));
        assert_eq!(options.live_columns(), vec![true, false, true]);
        assert_eq!(options.record_width(), 1);
        assert_eq!(options.output_of(2), Some(0));
        assert_eq!(options.output_of(1), None);
    }
}
