// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Row-group reader: sequential header reads, lazy per-column
//! decompression, and row-level cursor sync.
//!
//! The reader walks one split sequentially: block header, then row groups
//! until the block ends with padding, a SKIP sentinel, or end of stream.
//! Column payloads are read eagerly (they must be consumed to advance the
//! stream) but decompressed lazily on first value access, at most once per
//! row group.

use std::io::Read;

use tracing::debug;

use crate::buffer::InputBuffer;
use crate::compress::{decompress, CompressionType};
use crate::error::{FormatError, FormatResult};
use crate::options::ReaderOptions;
use crate::rowgroup::header::{
    read_header_bytes, skip_bytes, skip_padding, BlockHeader, HeaderOutcome, RowGroupHeader,
    SYNC_SIZE,
};
use crate::select::{to_cnf, EvalContext};
use crate::types::{Record, Value, ValueType};
use crate::ColumnVec;

/// Read-side state of one live column, rebound on every row group.
pub struct ColumnReader {
    ty: ValueType,
    codec: CompressionType,
    compressed: Vec<u8>,
    data: InputBuffer,
    decompressed: bool,
    offsets: Vec<u32>,
    row: u32,
}

impl ColumnReader {
    fn new(ty: ValueType) -> Self {
        Self {
            ty,
            codec: CompressionType::Gzip,
            compressed: vec![],
            data: InputBuffer::default(),
            decompressed: false,
            offsets: vec![],
            row: 0,
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    pub fn records(&self) -> u32 {
        self.offsets.len().saturating_sub(1) as u32
    }

    fn begin_group(&mut self, codec: CompressionType, offsets: Vec<u32>) {
        self.codec = codec;
        self.offsets = offsets;
        self.decompressed = false;
        self.row = 0;
    }

    fn read_payload(&mut self, reader: &mut impl Read, len: usize) -> FormatResult<()> {
        self.compressed.resize(len, 0);
        read_header_bytes(reader, &mut self.compressed)?;
        Ok(())
    }

    /// Decompress at most once per row group, on first access.
    fn ensure_decompressed(&mut self) -> FormatResult<()> {
        if self.decompressed {
            return Ok(());
        }
        let total = *self.offsets.last().unwrap_or(&0) as usize;
        let mut out = vec![0u8; total];
        decompress(self.codec, &self.compressed, &mut out)?;
        self.data.rebind(out);
        self.decompressed = true;
        Ok(())
    }

    /// Move the cursor to `row` using the cumulative offsets: forward moves
    /// skip, backward moves rewind, neither re-decompresses.
    pub fn sync(&mut self, row: u32) -> FormatResult<()> {
        if row >= self.records() {
            return Err(FormatError::corrupt(format!(
                "sync to row {row} beyond {} records",
                self.records()
            )));
        }
        self.ensure_decompressed()?;
        let target = self.offsets[row as usize] as usize;
        let position = self.data.position();
        if target >= position {
            self.data.skip(target - position);
        } else {
            self.data.rewind(position - target);
        }
        self.row = row;
        Ok(())
    }

    /// Decode the value under the cursor and advance past it.
    pub fn next_value(&mut self) -> FormatResult<Value> {
        self.ensure_decompressed()?;
        if self.row >= self.records() {
            return Err(FormatError::corrupt("read past the last record of a column"));
        }
        let row = self.row as usize;
        let len = (self.offsets[row + 1] - self.offsets[row]) as usize;
        let bytes = self
            .data
            .read_slice(len)
            .ok_or_else(|| FormatError::corrupt("column payload shorter than field lengths"))?;
        let value = Value::decode(self.ty, bytes)?;
        self.row += 1;
        Ok(value)
    }

    /// Random access: sync then decode.
    pub fn value_at(&mut self, row: u32) -> FormatResult<Value> {
        self.sync(row)?;
        self.next_value()
    }

    /// In-memory column for search-structure tests.
    #[cfg(test)]
    pub(crate) fn from_values(ty: ValueType, values: Vec<Value>) -> Self {
        let mut payload = vec![];
        let mut offsets = vec![0u32];
        for value in &values {
            value.encode(&mut payload);
            offsets.push(*offsets.last().unwrap() + value.encoded_len() as u32);
        }
        Self {
            ty,
            codec: CompressionType::Gzip,
            compressed: vec![],
            data: InputBuffer::new(payload),
            decompressed: true,
            offsets,
            row: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    BeforeHeader,
    Scanning,
    End,
}

/// Streaming row-group reader over any byte source.
pub struct RowGroupReader<R: Read> {
    inner: R,
    options: ReaderOptions,
    live: Vec<bool>,
    sync: Option<[u8; SYNC_SIZE]>,
    /// Per file column, `Some` for live columns only.
    columns: ColumnVec<Option<ColumnReader>>,
    codecs: Vec<CompressionType>,
    header: Option<RowGroupHeader>,
    state: ReaderState,
    bytes_in_block: usize,
    row: u32,
    eval: Option<EvalContext>,
    groups_read: u64,
}

impl<R: Read> RowGroupReader<R> {
    pub fn new(inner: R, options: ReaderOptions) -> FormatResult<Self> {
        options.validate()?;
        let live = options.live_columns();
        let columns = options
            .value_types
            .iter()
            .enumerate()
            .map(|(idx, ty)| live[idx].then(|| ColumnReader::new(*ty)))
            .collect();
        let eval = options
            .selection
            .as_ref()
            .map(|selection| EvalContext::new(to_cnf(selection), options.index_kind));
        Ok(Self {
            inner,
            options,
            live,
            sync: None,
            columns,
            codecs: vec![],
            header: None,
            state: ReaderState::BeforeHeader,
            bytes_in_block: 0,
            row: 0,
            eval,
            groups_read: 0,
        })
    }

    pub fn row_groups_read(&self) -> u64 {
        self.groups_read
    }

    /// Records in the current row group, 0 between groups.
    pub fn records_in_group(&self) -> u32 {
        self.header.as_ref().map_or(0, |h| h.records)
    }

    fn read_block_header(&mut self) -> FormatResult<bool> {
        let Some(header) = BlockHeader::read_from(&mut self.inner)? else {
            return Ok(false);
        };
        if header.columns.len() != self.options.value_types.len() {
            return Err(FormatError::corrupt(format!(
                "block has {} columns, configured for {}",
                header.columns.len(),
                self.options.value_types.len()
            )));
        }
        for (idx, ((ty, codec), expected)) in header
            .columns
            .iter()
            .zip(self.options.value_types.iter())
            .enumerate()
        {
            if ty != expected {
                return Err(FormatError::corrupt(format!(
                    "column {idx} is {ty:?} on disk but configured as {expected:?}"
                )));
            }
            if self.live[idx] {
                codec.ensure_supported()?;
            }
        }
        self.codecs = header.columns.iter().map(|(_, codec)| *codec).collect();
        self.bytes_in_block = BlockHeader::encoded_size(header.columns.len());
        Ok(true)
    }

    /// Advance to the next row group, reading block headers and consuming
    /// padding as needed. `false` means the stream is exhausted.
    fn advance_group(&mut self) -> FormatResult<bool> {
        loop {
            if self.state == ReaderState::End {
                return Ok(false);
            }
            if self.bytes_in_block == 0 && !self.read_block_header()? {
                self.state = ReaderState::End;
                return Ok(false);
            }
            // a tail too short for a sync marker is always padding
            let block_left = self.options.block_size - self.bytes_in_block;
            if block_left < SYNC_SIZE + 4 {
                if !skip_padding(&mut self.inner, block_left as u64)? {
                    self.state = ReaderState::End;
                    return Ok(false);
                }
                self.bytes_in_block = 0;
                continue;
            }

            match RowGroupHeader::read_from(
                &mut self.inner,
                &mut self.sync,
                &self.options.value_types,
                &self.live,
            )? {
                HeaderOutcome::EndOfStream => {
                    self.state = ReaderState::End;
                    return Ok(false);
                }
                HeaderOutcome::SkipBlock => {
                    let consumed = self.bytes_in_block + SYNC_SIZE + 4;
                    let rest = self.options.block_size - consumed;
                    debug!(rest, "skip sentinel, advancing to next block");
                    if !skip_padding(&mut self.inner, rest as u64)? {
                        self.state = ReaderState::End;
                        return Ok(false);
                    }
                    self.bytes_in_block = 0;
                    continue;
                }
                HeaderOutcome::Group(mut header) => {
                    for (idx, column) in self.columns.iter_mut().enumerate() {
                        let info = &mut header.columns[idx];
                        match column {
                            Some(column) => {
                                column.begin_group(self.codecs[idx], std::mem::take(&mut info.offsets));
                                column.read_payload(&mut self.inner, info.compressed as usize)?;
                            }
                            None => skip_bytes(&mut self.inner, info.compressed as u64)?,
                        }
                    }
                    let consumed =
                        header.header_bytes + header.payload_size() as usize + header.padding as usize;
                    if header.padding > 0 {
                        skip_padding(&mut self.inner, header.padding as u64)?;
                    }
                    self.bytes_in_block += consumed;
                    if self.bytes_in_block > self.options.block_size {
                        return Err(FormatError::corrupt(
                            "row group overruns the block boundary",
                        ));
                    }
                    if self.bytes_in_block == self.options.block_size {
                        self.bytes_in_block = 0;
                    }
                    self.row = 0;
                    self.groups_read += 1;
                    if let Some(eval) = &mut self.eval {
                        eval.begin_group(&header);
                    }
                    debug!(records = header.records, "row group loaded");
                    self.header = Some(header);
                    self.state = ReaderState::Scanning;
                    return Ok(true);
                }
            }
        }
    }

    fn finish_group(&mut self) {
        self.header = None;
        self.state = ReaderState::BeforeHeader;
    }

    fn materialize(&mut self, row: u32) -> FormatResult<Record> {
        let mut record = Record::with_fields(self.options.record_width());
        for (idx, column) in self.columns.iter_mut().enumerate() {
            let Some(column) = column else { continue };
            if let Some(output) = self.options.output_of(idx) {
                record.set(output, column.value_at(row)?);
            }
        }
        Ok(record)
    }

    /// Next record of the scan: the full scan in row order, or the next
    /// selection match when a selection is configured.
    pub fn next_record(&mut self) -> FormatResult<Option<Record>> {
        loop {
            match self.state {
                ReaderState::End => return Ok(None),
                ReaderState::BeforeHeader => {
                    if !self.advance_group()? {
                        return Ok(None);
                    }
                }
                ReaderState::Scanning => {
                    let header = self.header.as_ref().expect("scanning without a header");
                    let matched = match &mut self.eval {
                        Some(eval) => eval.next_match(header, &mut self.columns)?,
                        None => {
                            if self.row < header.records {
                                let row = self.row;
                                self.row += 1;
                                Some(row)
                            } else {
                                None
                            }
                        }
                    };
                    match matched {
                        Some(row) => return Ok(Some(self.materialize(row)?)),
                        None => self.finish_group(),
                    }
                }
            }
        }
    }
}
