// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! PaxLight: a columnar (PAX-layout) row-group container format.
//!
//! Records are stored column-major in self-contained row groups, compressed
//! per column, with optional per-column sort permutations, bloom filters and
//! min/max ranges. Readers evaluate predicate trees against row-group
//! metadata to skip irrelevant row groups or rows without decompressing or
//! scanning them.
//!
//! The crate is the storage core only: one writer per file, many sequential
//! readers, no schema evolution, no transactions. Split planning, record
//! semantics above the [`Value`] scalar, and job orchestration belong to
//! the layers around it.

#![deny(unused_must_use)]

mod bloom;
mod buffer;
mod compress;
mod error;
mod index;
mod options;
mod rowgroup;
mod select;
mod sorter;
mod types;

#[cfg(test)]
mod tests;

pub use bloom::{BloomFilter, BloomHash};
pub use buffer::{InputBuffer, OutputBuffer};
pub use compress::{compress, decompress, CompressionType};
pub use error::{FormatError, FormatResult};
pub use index::{BSearch, CssTree, SeekOp, SortIndex, SortIndexKind};
pub use options::{BloomSpec, ColumnSpec, OutputColumn, ReaderOptions, SortSpec, WriterOptions};
pub use rowgroup::{
    BlockHeader, ColumnInfo, ColumnReader, RowGroupHeader, RowGroupReader, RowGroupWriter,
};
pub use select::{
    to_cnf, CompareOp, Composition, EvalContext, LogicalOp, NodeId, Predicate, SelectNode,
    Selection, Verdict,
};
pub use sorter::{SortOrder, SortedRows, Sorter};
pub use types::{Record, Value, ValueType};

/// Per-column vectors are small almost always; keep them inline.
pub(crate) type ColumnVec<T> = smallvec::SmallVec<[T; 8]>;
