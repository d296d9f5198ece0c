// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Row-group writer: accumulation, flush, and block-boundary logic.
//!
//! Records accumulate column-major until the row-group threshold or the
//! block boundary is reached. A flush fans the column buffers out to a
//! fixed worker pool over a bounded queue (capacity = column count, so
//! enqueueing never blocks), waits on a resettable countdown latch, and
//! writes header plus payloads. Workers never throw across the thread
//! boundary: a failure is recorded in shared state and surfaced when the
//! writer observes the latch reaching zero.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BufMut;
use crossbeam_channel::{bounded, Sender};
use itertools::Itertools;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::bloom::{murmur3_32, BloomFilter, BloomHash};
use crate::buffer::OutputBuffer;
use crate::compress::{compress, CompressionType};
use crate::error::{FormatError, FormatResult};
use crate::options::WriterOptions;
use crate::rowgroup::header::{
    BlockHeader, ColumnMeta, RleLengths, RowGroupMeta, GROUP_FIXED_SIZE, SKIP, SYNC_SIZE,
};
use crate::sorter::Sorter;
use crate::types::{Record, Value, ValueType};
use crate::ColumnVec;

/// Write-side state of one output column, reused across row groups.
struct ColumnWriter {
    ty: ValueType,
    source: usize,
    codec: CompressionType,
    buffer: OutputBuffer,
    lengths: RleLengths,
    bloom: Option<BloomFilter>,
    sorter: Option<Sorter>,
    min_max: Option<(Value, Value)>,
}

impl ColumnWriter {
    fn append(&mut self, value: Option<&Value>, row: u32, lenient: bool) -> FormatResult<()> {
        match value {
            Some(value) if !value.is_null() => {
                if value.value_type() != Some(self.ty) {
                    return Err(FormatError::data(format!(
                        "value {value} does not match column type {:?}",
                        self.ty
                    )));
                }
                value.encode(&mut self.buffer);
                let len = value.encoded_len();
                self.lengths.add(len as u32);
                if let Some(bloom) = &mut self.bloom {
                    let data = self.buffer.as_slice();
                    bloom.add(&data[data.len() - len..]);
                }
                if let Some(sorter) = &mut self.sorter {
                    sorter.add(row, value);
                }
                self.min_max = match self.min_max.take() {
                    None => Some((value.clone(), value.clone())),
                    Some((min, max)) => Some((
                        if *value < min { value.clone() } else { min },
                        if *value > max { value.clone() } else { max },
                    )),
                };
                Ok(())
            }
            _ => {
                if !lenient {
                    return Err(FormatError::data(format!(
                        "missing field {} and lenient mode is off",
                        self.source
                    )));
                }
                warn!(field = self.source, row, "recording missing field as zero-size");
                self.lengths.add(0);
                if let Some(sorter) = &mut self.sorter {
                    sorter.add(row, &Value::Null);
                }
                Ok(())
            }
        }
    }

    /// Upper bound of this column's share of the header, before `finish`.
    fn estimated_header_size(&self) -> usize {
        let mut size = crate::rowgroup::header::COLUMN_FIXED_SIZE + self.lengths.estimated_size();
        if let Some(bloom) = &self.bloom {
            size += bloom.encoded_size();
        }
        if let Some(sorter) = &self.sorter {
            size += sorter.estimated_size();
        }
        if let Some((min, max)) = &self.min_max {
            size += 8 + min.encoded_len() + max.encoded_len();
        }
        size
    }

    /// Seal this column's metadata and hand out the payload bytes.
    fn seal(&mut self) -> (ColumnMeta, Vec<u8>) {
        self.lengths.finish();
        let data = self.buffer.take();
        let meta = ColumnMeta {
            uncompressed: data.len() as u32,
            compressed: 0,
            sorted: self
                .sorter
                .as_ref()
                .map(|sorter| (sorter.order(), sorter.finish())),
            bloom: self.bloom.clone(),
            min_max: self.min_max.clone(),
            length_words: self.lengths.words().to_vec(),
        };
        (meta, data)
    }

    fn reset(&mut self) {
        self.buffer.reset();
        self.lengths.reset();
        if let Some(bloom) = &mut self.bloom {
            bloom.reset();
        }
        if let Some(sorter) = &mut self.sorter {
            sorter.clear();
        }
        self.min_max = None;
    }
}

/// Resettable countdown barrier between the writer thread and the workers.
struct CountdownLatch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl CountdownLatch {
    fn new() -> Self {
        Self {
            count: Mutex::new(0),
            zero: Condvar::new(),
        }
    }

    fn arm(&self, n: usize) {
        *self.count.lock() = n;
    }

    fn count_down(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock();
        while *count != 0 {
            self.zero.wait(&mut count);
        }
    }
}

struct CompressJob {
    column: usize,
    data: Vec<u8>,
    codec: CompressionType,
}

/// State shared between the writer thread and the worker pool. Workers
/// record results and failures here under a mutex and count the latch down
/// once per column.
struct PoolShared {
    results: Mutex<Vec<Option<Vec<u8>>>>,
    error: Mutex<Option<FormatError>>,
    latch: CountdownLatch,
}

struct CompressionPool {
    sender: Option<Sender<CompressJob>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<PoolShared>,
}

impl CompressionPool {
    fn new(worker_count: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = bounded::<CompressJob>(queue_capacity);
        let shared = Arc::new(PoolShared {
            results: Mutex::new(vec![]),
            error: Mutex::new(None),
            latch: CountdownLatch::new(),
        });

        let workers = (0..worker_count)
            .map(|_| {
                let receiver = receiver.clone();
                let shared = shared.clone();
                std::thread::spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        match compress(job.codec, &job.data) {
                            Ok(compressed) => {
                                shared.results.lock()[job.column] = Some(compressed);
                            }
                            Err(e) => {
                                let mut slot = shared.error.lock();
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                            }
                        }
                        shared.latch.count_down();
                    }
                })
            })
            .collect_vec();

        Self {
            sender: Some(sender),
            workers,
            shared,
        }
    }

    fn begin(&self, columns: usize) {
        *self.shared.results.lock() = vec![None; columns];
        *self.shared.error.lock() = None;
        self.shared.latch.arm(columns);
    }

    fn submit(&self, job: CompressJob) -> FormatResult<()> {
        self.sender
            .as_ref()
            .expect("pool already shut down")
            .send(job)
            .map_err(|_| FormatError::compression("worker pool disconnected"))
    }

    /// Block until every column reported, then surface any recorded worker
    /// failure as a fatal error for this flush.
    fn finish(&self) -> FormatResult<Vec<Vec<u8>>> {
        self.shared.latch.wait();
        if let Some(error) = self.shared.error.lock().take() {
            return Err(error);
        }
        let results = std::mem::take(&mut *self.shared.results.lock());
        results
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| FormatError::compression("worker produced no output"))
            })
            .collect()
    }

    fn shutdown(&mut self) -> FormatResult<()> {
        self.sender = None;
        for worker in self.workers.drain(..) {
            worker
                .join()
                .map_err(|_| FormatError::compression("compression worker panicked"))?;
        }
        Ok(())
    }
}

static SYNC_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Per-file random sync marker. It only needs to be stable within the file
/// and unlikely to collide with payload bytes, so entropy from the clock,
/// the process id and a process-wide counter is hashed into 16 bytes.
fn generate_sync() -> [u8; SYNC_SIZE] {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut seed_bytes = [0u8; 28];
    seed_bytes[..16].copy_from_slice(&nanos.to_be_bytes());
    seed_bytes[16..20].copy_from_slice(&std::process::id().to_be_bytes());
    seed_bytes[20..28]
        .copy_from_slice(&SYNC_COUNTER.fetch_add(1, AtomicOrdering::Relaxed).to_be_bytes());

    let mut sync = [0u8; SYNC_SIZE];
    for i in 0..4 {
        let word = murmur3_32(&seed_bytes, i as u32 + 1);
        sync[4 * i..4 * i + 4].copy_from_slice(&word.to_be_bytes());
    }
    sync
}

/// Streaming row-group writer over any byte sink.
pub struct RowGroupWriter<W: Write> {
    sink: W,
    options: WriterOptions,
    sync: [u8; SYNC_SIZE],
    columns: ColumnVec<ColumnWriter>,
    pool: CompressionPool,
    records: u32,
    bytes_in_block: usize,
    bytes_written: u64,
    row_groups: u64,
    blocks: u64,
}

impl<W: Write> RowGroupWriter<W> {
    pub fn new(sink: W, options: WriterOptions) -> FormatResult<Self> {
        options.validate()?;
        let columns = options
            .columns
            .iter()
            .enumerate()
            .map(|(idx, spec)| {
                let bloom = match options.bloom_spec_of(idx) {
                    Some(b) => Some(BloomFilter::with_rate(
                        b.rate,
                        b.expected,
                        BloomHash::default(),
                    )?),
                    None => None,
                };
                Ok(ColumnWriter {
                    ty: spec.value_type,
                    source: spec.source,
                    codec: options.codec_for(idx),
                    buffer: OutputBuffer::new(),
                    lengths: RleLengths::new(),
                    bloom,
                    sorter: options.sort_order_of(idx).map(Sorter::new),
                    min_max: None,
                })
            })
            .collect::<FormatResult<ColumnVec<_>>>()?;

        let pool = CompressionPool::new(options.workers, columns.len());
        Ok(Self {
            sink,
            options,
            sync: generate_sync(),
            columns,
            pool,
            records: 0,
            bytes_in_block: 0,
            bytes_written: 0,
            row_groups: 0,
            blocks: 0,
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn row_groups_written(&self) -> u64 {
        self.row_groups
    }

    pub fn blocks_started(&self) -> u64 {
        self.blocks
    }

    /// Append one record, flushing when a row-group or block boundary is
    /// reached.
    pub fn write_record(&mut self, record: &Record) -> FormatResult<()> {
        let row = self.records;
        let lenient = self.options.lenient;
        for column in &mut self.columns {
            column.append(record.field(column.source), row, lenient)?;
        }
        self.records += 1;

        let estimate = self.estimated_group_size();
        if estimate >= self.options.row_group_size {
            self.flush(false)?;
        } else {
            let used = if self.bytes_in_block == 0 {
                BlockHeader::encoded_size(self.columns.len())
            } else {
                self.bytes_in_block
            };
            if used + estimate >= self.options.block_size {
                self.flush(true)?;
            }
        }
        Ok(())
    }

    /// Uncompressed column bytes plus the running header estimate.
    fn estimated_group_size(&self) -> usize {
        GROUP_FIXED_SIZE
            + self
                .columns
                .iter()
                .map(|c| c.buffer.len() + c.estimated_header_size())
                .sum::<usize>()
    }

    fn block_header(&self) -> BlockHeader {
        BlockHeader {
            columns: self
                .columns
                .iter()
                .map(|c| (c.ty, c.codec))
                .collect_vec(),
        }
    }

    fn start_block(&mut self) -> FormatResult<()> {
        let header = self.block_header();
        let mut buf = Vec::with_capacity(BlockHeader::encoded_size(self.columns.len()));
        header.encode(&mut buf);
        self.sink.write_all(&buf)?;
        self.bytes_in_block = buf.len();
        self.bytes_written += buf.len() as u64;
        self.blocks += 1;
        Ok(())
    }

    fn write_zeros(&mut self, mut n: usize) -> FormatResult<()> {
        const CHUNK: [u8; 8192] = [0u8; 8192];
        while n > 0 {
            let step = n.min(CHUNK.len());
            self.sink.write_all(&CHUNK[..step])?;
            self.bytes_written += step as u64;
            n -= step;
        }
        Ok(())
    }

    /// Flush the accumulated row group. `seal_block` pads the rest of the
    /// block afterwards so the next row group starts a fresh block.
    fn flush(&mut self, seal_block: bool) -> FormatResult<()> {
        if self.records == 0 {
            return Ok(());
        }

        // seal columns and fan out compression
        self.pool.begin(self.columns.len());
        let mut metas = Vec::with_capacity(self.columns.len());
        for (idx, column) in self.columns.iter_mut().enumerate() {
            let (meta, data) = column.seal();
            metas.push(meta);
            self.pool.submit(CompressJob {
                column: idx,
                data,
                codec: column.codec,
            })?;
        }
        let compressed = self.pool.finish()?;
        for (meta, payload) in metas.iter_mut().zip(compressed.iter()) {
            meta.compressed = payload.len() as u32;
        }

        let meta = RowGroupMeta {
            records: self.records,
            columns: metas,
        };
        let header_size = meta.encoded_size();
        let payload_size: usize = compressed.iter().map(Vec::len).sum();
        let total = header_size + payload_size;

        if self.bytes_in_block == 0 {
            self.start_block()?;
        }
        let mut remaining = self.options.block_size - self.bytes_in_block;
        if total > remaining {
            // compression did not shrink enough for this block: fill the
            // rest with a SKIP sentinel and carry the group over
            debug!(total, remaining, "row group does not fit, skipping to next block");
            if remaining >= SYNC_SIZE + 4 {
                let mut skip = Vec::with_capacity(SYNC_SIZE + 4);
                skip.put_slice(&self.sync);
                skip.put_i32(SKIP);
                self.sink.write_all(&skip)?;
                self.bytes_written += skip.len() as u64;
                self.write_zeros(remaining - (SYNC_SIZE + 4))?;
            } else {
                self.write_zeros(remaining)?;
            }
            self.start_block()?;
            remaining = self.options.block_size - self.bytes_in_block;
            if total > remaining {
                return Err(FormatError::data(format!(
                    "row group of {total} bytes exceeds block capacity {remaining}"
                )));
            }
        }

        let padding = if seal_block {
            (remaining - total) as i32
        } else {
            0
        };

        let mut head = Vec::with_capacity(header_size);
        meta.encode(&self.sync, padding, &mut head);
        debug_assert_eq!(head.len(), header_size);
        self.sink.write_all(&head)?;
        for payload in &compressed {
            self.sink.write_all(payload)?;
        }
        self.bytes_written += total as u64;
        if padding > 0 {
            self.write_zeros(padding as usize)?;
        }

        self.bytes_in_block += total + padding as usize;
        if self.bytes_in_block >= self.options.block_size {
            self.bytes_in_block = 0;
        }
        self.row_groups += 1;
        debug!(
            records = self.records,
            header_size, payload_size, padding, "row group flushed"
        );

        for column in &mut self.columns {
            column.reset();
        }
        self.records = 0;
        Ok(())
    }

    /// Force-flush any partial row group, stop the workers and flush the
    /// sink. Returns the sink.
    pub fn close(mut self) -> FormatResult<W> {
        self.flush(false)?;
        if self.blocks == 0 {
            // a file with zero records still carries a block header
            self.start_block()?;
        }
        self.pool.shutdown()?;
        self.sink.flush()?;
        Ok(self.sink)
    }
}
