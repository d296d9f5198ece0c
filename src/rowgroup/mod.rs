// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Row-group storage: binary layout, writer engine and reader engine.
//!
//! A row group is a self-contained run of records stored column-major with
//! its own header, per-column compression and optional indexes; fixed-size
//! storage blocks group row groups into independently seekable splits.

mod header;
mod reader;
mod writer;

pub use header::{
    decode_offsets, BlockHeader, ColumnInfo, ColumnMeta, HeaderOutcome, RleLengths,
    RowGroupHeader, RowGroupMeta, COLUMN_FIXED_SIZE, GROUP_FIXED_SIZE, MAGIC, SKIP, SYNC_SIZE,
};
pub use reader::{ColumnReader, RowGroupReader};
pub use writer::RowGroupWriter;
