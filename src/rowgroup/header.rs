// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Binary layout of block headers and row-group headers.
//!
//! All integers are big-endian `i32`. A block starts with a magic number and
//! the per-column value-type and codec bytes; row-group headers repeat
//! inside the block until its end, a SKIP sentinel, or end of stream. The
//! first sync marker seen on a stream defines the expected marker for the
//! whole file; every later one must byte-compare equal.

use std::io::Read;

use bytes::{Buf, BufMut};

use crate::bloom::BloomFilter;
use crate::compress::CompressionType;
use crate::error::{FormatError, FormatResult};
use crate::sorter::{SortOrder, SortedRows};
use crate::types::{Value, ValueType};

pub const MAGIC: [u8; 4] = *b"PAXL";
pub const SYNC_SIZE: usize = 16;
/// Padding sentinel: the rest of the block is padding.
pub const SKIP: i32 = i32::MIN;

/// Fixed prefix of a row-group header: sync, padding, sorted-column count,
/// bloom-column count, record count, column count.
pub const GROUP_FIXED_SIZE: usize = SYNC_SIZE + 5 * 4;
/// Fixed per-column part: uncompressed, compressed, size-of-rest, flags.
pub const COLUMN_FIXED_SIZE: usize = 3 * 4 + 1;

const FLAG_SORTED_ASC: u8 = 0x01;
const FLAG_SORTED_DESC: u8 = 0x02;
const FLAG_BLOOM: u8 = 0x04;
const FLAG_MIN_MAX: u8 = 0x08;

/// Run-length tracker for per-record serialized field lengths.
///
/// The emitted stream is a sequence of `i32` words: a non-negative word is a
/// literal length for one record; a negative word `-n` repeats the previous
/// length `n` more times. The pending run is emitted only when it breaks or
/// when the header is finished.
#[derive(Debug, Default)]
pub struct RleLengths {
    words: Vec<i32>,
    pending: Option<(i32, i32)>,
}

impl RleLengths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, len: u32) {
        let len = len as i32;
        match &mut self.pending {
            Some((last, repeats)) if *last == len => *repeats += 1,
            Some((last, repeats)) => {
                self.words.push(*last);
                if *repeats > 0 {
                    self.words.push(-*repeats);
                }
                self.pending = Some((len, 0));
            }
            None => self.pending = Some((len, 0)),
        }
    }

    /// Emit the pending run. Idempotent once the run is flushed.
    pub fn finish(&mut self) {
        if let Some((last, repeats)) = self.pending.take() {
            self.words.push(last);
            if repeats > 0 {
                self.words.push(-repeats);
            }
        }
    }

    pub fn words(&self) -> &[i32] {
        &self.words
    }

    pub fn reset(&mut self) {
        self.words.clear();
        self.pending = None;
    }

    /// Upper bound on the encoded size, valid before `finish`.
    pub fn estimated_size(&self) -> usize {
        4 * (self.words.len() + 2)
    }
}

/// Rebuild absolute cumulative offsets (`records + 1` entries, starting at
/// zero) from the RLE word stream.
pub fn decode_offsets(buf: &mut impl Buf, records: usize) -> FormatResult<Vec<u32>> {
    let mut offsets = Vec::with_capacity(records + 1);
    offsets.push(0u32);
    let mut last: Option<u32> = None;
    while offsets.len() < records + 1 {
        if buf.remaining() < 4 {
            return Err(FormatError::corrupt("field length stream truncated"));
        }
        let word = buf.get_i32();
        if word >= 0 {
            let len = word as u32;
            offsets.push(offsets.last().unwrap() + len);
            last = Some(len);
        } else {
            let len = last
                .ok_or_else(|| FormatError::corrupt("field length stream starts with a repeat"))?;
            for _ in 0..-word {
                if offsets.len() == records + 1 {
                    return Err(FormatError::corrupt("field length repeat overruns records"));
                }
                offsets.push(offsets.last().unwrap() + len);
            }
        }
    }
    Ok(offsets)
}

/// Block header: magic, column count, value-type byte and codec byte per
/// column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub columns: Vec<(ValueType, CompressionType)>,
}

impl BlockHeader {
    pub fn encoded_size(column_count: usize) -> usize {
        4 + 4 + 2 * column_count
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(&MAGIC);
        buf.put_i32(self.columns.len() as i32);
        for (ty, _) in &self.columns {
            buf.put_u8((*ty).into());
        }
        for (_, codec) in &self.columns {
            buf.put_u8((*codec).into());
        }
    }

    /// `None` on clean end of stream before the first magic byte.
    pub fn read_from(reader: &mut impl Read) -> FormatResult<Option<Self>> {
        let mut magic = [0u8; 4];
        if !read_exact_or_eof(reader, &mut magic)? {
            return Ok(None);
        }
        if magic != MAGIC {
            return Err(FormatError::corrupt(format!(
                "bad magic number {magic:02x?} at block start"
            )));
        }
        let count = read_i32(reader)?;
        if count <= 0 {
            return Err(FormatError::corrupt(format!(
                "block header declares {count} columns"
            )));
        }
        let mut type_bytes = vec![0u8; count as usize];
        read_header_bytes(reader, &mut type_bytes)?;
        let mut codec_bytes = vec![0u8; count as usize];
        read_header_bytes(reader, &mut codec_bytes)?;

        let columns = type_bytes
            .iter()
            .zip(codec_bytes.iter())
            .map(|(ty, codec)| {
                Ok((ValueType::try_from(*ty)?, CompressionType::try_from(*codec)?))
            })
            .collect::<FormatResult<Vec<_>>>()?;
        Ok(Some(Self { columns }))
    }
}

/// Write-side metadata of one column of one row group.
#[derive(Debug)]
pub struct ColumnMeta {
    pub uncompressed: u32,
    /// Filled by the compression worker.
    pub compressed: u32,
    pub sorted: Option<(SortOrder, SortedRows)>,
    pub bloom: Option<BloomFilter>,
    pub min_max: Option<(Value, Value)>,
    pub length_words: Vec<i32>,
}

impl ColumnMeta {
    fn flags(&self) -> u8 {
        let mut flags = 0;
        match self.sorted {
            Some((SortOrder::Ascending, _)) => flags |= FLAG_SORTED_ASC,
            Some((SortOrder::Descending, _)) => flags |= FLAG_SORTED_DESC,
            None => {}
        }
        if self.bloom.is_some() {
            flags |= FLAG_BLOOM;
        }
        if self.min_max.is_some() {
            flags |= FLAG_MIN_MAX;
        }
        flags
    }

    fn rest_size(&self) -> usize {
        let mut size = 4 * self.length_words.len();
        if let Some((_, rows)) = &self.sorted {
            size += rows.encoded_size();
        }
        if let Some(bloom) = &self.bloom {
            size += bloom.encoded_size();
        }
        if let Some((min, max)) = &self.min_max {
            size += 8 + min.encoded_len() + max.encoded_len();
        }
        size
    }
}

/// Write-side row-group metadata, sealed by the flush path.
#[derive(Debug)]
pub struct RowGroupMeta {
    pub records: u32,
    pub columns: Vec<ColumnMeta>,
}

impl RowGroupMeta {
    pub fn encoded_size(&self) -> usize {
        GROUP_FIXED_SIZE
            + self
                .columns
                .iter()
                .map(|c| COLUMN_FIXED_SIZE + c.rest_size())
                .sum::<usize>()
    }

    pub fn encode(&self, sync: &[u8; SYNC_SIZE], padding: i32, buf: &mut impl BufMut) {
        buf.put_slice(sync);
        buf.put_i32(padding);
        buf.put_i32(self.columns.iter().filter(|c| c.sorted.is_some()).count() as i32);
        buf.put_i32(self.columns.iter().filter(|c| c.bloom.is_some()).count() as i32);
        buf.put_i32(self.records as i32);
        buf.put_i32(self.columns.len() as i32);

        for column in &self.columns {
            buf.put_i32(column.uncompressed as i32);
            buf.put_i32(column.compressed as i32);
            buf.put_i32(column.rest_size() as i32);
            buf.put_u8(column.flags());
            if let Some((_, rows)) = &column.sorted {
                rows.encode(buf);
            }
            if let Some(bloom) = &column.bloom {
                bloom.encode(buf);
            }
            if let Some((min, max)) = &column.min_max {
                buf.put_i32(min.encoded_len() as i32);
                min.encode(buf);
                buf.put_i32(max.encoded_len() as i32);
                max.encode(buf);
            }
            for word in &column.length_words {
                buf.put_i32(*word);
            }
        }
    }
}

/// Read-side metadata of one column.
#[derive(Debug)]
pub struct ColumnInfo {
    pub uncompressed: u32,
    pub compressed: u32,
    pub projected: bool,
    pub sorted: Option<(SortOrder, SortedRows)>,
    pub bloom: Option<BloomFilter>,
    pub min_max: Option<(Value, Value)>,
    /// Cumulative byte offsets, `records + 1` entries. Empty for columns
    /// that are not projected.
    pub offsets: Vec<u32>,
}

/// Read-side row-group header.
#[derive(Debug)]
pub struct RowGroupHeader {
    pub records: u32,
    pub padding: i32,
    /// Total bytes the header occupied on the stream.
    pub header_bytes: usize,
    pub columns: Vec<ColumnInfo>,
}

/// Outcome of attempting to read one row-group header.
#[derive(Debug)]
pub enum HeaderOutcome {
    Group(RowGroupHeader),
    /// SKIP sentinel: the rest of the block is padding.
    SkipBlock,
    /// Clean end of stream at a row-group boundary.
    EndOfStream,
}

impl RowGroupHeader {
    /// Read one header. `sync` is captured on first use and verified on
    /// every later one. `projected[c]` selects the columns whose optional
    /// sections are decoded; the rest are skipped at the byte level.
    pub fn read_from(
        reader: &mut impl Read,
        sync: &mut Option<[u8; SYNC_SIZE]>,
        types: &[ValueType],
        projected: &[bool],
    ) -> FormatResult<HeaderOutcome> {
        let mut marker = [0u8; SYNC_SIZE];
        if !read_exact_or_eof(reader, &mut marker)? {
            return Ok(HeaderOutcome::EndOfStream);
        }
        match sync {
            Some(expected) if *expected != marker => {
                return Err(FormatError::corrupt(
                    "sync marker mismatch: stream is corrupt or misaligned",
                ));
            }
            Some(_) => {}
            None => *sync = Some(marker),
        }

        let padding = read_i32(reader)?;
        if padding == SKIP {
            return Ok(HeaderOutcome::SkipBlock);
        }
        if padding < 0 {
            return Err(FormatError::corrupt(format!("negative padding {padding}")));
        }

        let sorted_count = read_i32(reader)?;
        let bloom_count = read_i32(reader)?;
        let records = read_i32(reader)?;
        let column_count = read_i32(reader)?;
        if records < 0 || sorted_count < 0 || bloom_count < 0 {
            return Err(FormatError::corrupt("negative count in row-group header"));
        }
        if column_count as usize != projected.len() {
            return Err(FormatError::corrupt(format!(
                "row group declares {column_count} columns, configured for {}",
                projected.len()
            )));
        }

        let mut header_bytes = GROUP_FIXED_SIZE;
        let mut columns = Vec::with_capacity(column_count as usize);
        for c in 0..column_count as usize {
            let uncompressed = read_i32(reader)?;
            let compressed = read_i32(reader)?;
            let rest_size = read_i32(reader)?;
            if uncompressed < 0 || compressed < 0 || rest_size < 0 {
                return Err(FormatError::corrupt("negative size in column header"));
            }
            let mut flags = [0u8; 1];
            read_header_bytes(reader, &mut flags)?;
            let flags = flags[0];
            header_bytes += COLUMN_FIXED_SIZE + rest_size as usize;

            if !projected[c] {
                skip_bytes(reader, rest_size as u64)?;
                columns.push(ColumnInfo {
                    uncompressed: uncompressed as u32,
                    compressed: compressed as u32,
                    projected: false,
                    sorted: None,
                    bloom: None,
                    min_max: None,
                    offsets: vec![],
                });
                continue;
            }

            let mut rest = vec![0u8; rest_size as usize];
            read_header_bytes(reader, &mut rest)?;
            let mut rest = &rest[..];

            let sorted = match (flags & FLAG_SORTED_ASC != 0, flags & FLAG_SORTED_DESC != 0) {
                (true, true) => {
                    return Err(FormatError::corrupt(
                        "column flagged both ascending and descending",
                    ));
                }
                (true, false) => Some((SortOrder::Ascending, SortedRows::decode(&mut rest)?)),
                (false, true) => Some((SortOrder::Descending, SortedRows::decode(&mut rest)?)),
                (false, false) => None,
            };
            let bloom = (flags & FLAG_BLOOM != 0)
                .then(|| BloomFilter::decode(&mut rest))
                .transpose()?;
            let min_max = (flags & FLAG_MIN_MAX != 0)
                .then(|| decode_min_max(&mut rest, types[c]))
                .transpose()?;

            let offsets = decode_offsets(&mut rest, records as usize)?;
            if !rest.is_empty() {
                return Err(FormatError::corrupt(
                    "trailing bytes after field length stream",
                ));
            }
            if *offsets.last().unwrap() != uncompressed as u32 {
                return Err(FormatError::corrupt(format!(
                    "field lengths sum to {}, column declares {uncompressed} bytes",
                    offsets.last().unwrap()
                )));
            }

            columns.push(ColumnInfo {
                uncompressed: uncompressed as u32,
                compressed: compressed as u32,
                projected: true,
                sorted,
                bloom,
                min_max,
                offsets,
            });
        }

        let (sorted_seen, bloom_seen) = columns
            .iter()
            .map(|c| {
                (
                    usize::from(c.projected && c.sorted.is_some()),
                    usize::from(c.projected && c.bloom.is_some()),
                )
            })
            .fold((0, 0), |(s, b), (ds, db)| (s + ds, b + db));
        if sorted_seen > sorted_count as usize || bloom_seen > bloom_count as usize {
            return Err(FormatError::corrupt(
                "feature flags disagree with header counts",
            ));
        }

        Ok(HeaderOutcome::Group(RowGroupHeader {
            records: records as u32,
            padding,
            header_bytes,
            columns,
        }))
    }

    /// Total payload bytes following this header.
    pub fn payload_size(&self) -> u64 {
        self.columns.iter().map(|c| c.compressed as u64).sum()
    }
}

fn decode_length_prefixed(buf: &mut impl Buf, ty: ValueType) -> FormatResult<Value> {
    if buf.remaining() < 4 {
        return Err(FormatError::corrupt("min/max section truncated"));
    }
    let len = buf.get_i32();
    if len < 0 || buf.remaining() < len as usize {
        return Err(FormatError::corrupt("min/max length out of range"));
    }
    let mut bytes = vec![0u8; len as usize];
    buf.copy_to_slice(&mut bytes);
    Value::decode(ty, &bytes)
}

fn decode_min_max(buf: &mut impl Buf, ty: ValueType) -> FormatResult<(Value, Value)> {
    let min = decode_length_prefixed(buf, ty)?;
    let max = decode_length_prefixed(buf, ty)?;
    Ok((min, max))
}

/// `read_exact` with EOF mapped to the header-truncation error.
pub(crate) fn read_header_bytes(reader: &mut impl Read, buf: &mut [u8]) -> FormatResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            FormatError::unexpected_eof("stream ended inside a header")
        }
        _ => FormatError::Io(e),
    })
}

pub(crate) fn read_i32(reader: &mut impl Read) -> FormatResult<i32> {
    let mut bytes = [0u8; 4];
    read_header_bytes(reader, &mut bytes)?;
    Ok(i32::from_be_bytes(bytes))
}

/// Fill `buf` exactly; `false` on clean EOF before the first byte, error on
/// a partial read.
pub(crate) fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> FormatResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(FormatError::unexpected_eof(format!(
                "stream ended after {filled} of {} header bytes",
                buf.len()
            )));
        }
        filled += n;
    }
    Ok(true)
}

pub(crate) fn skip_bytes(reader: &mut impl Read, n: u64) -> FormatResult<()> {
    let copied = std::io::copy(&mut reader.take(n), &mut std::io::sink())?;
    if copied != n {
        return Err(FormatError::unexpected_eof(format!(
            "stream ended while skipping {n} bytes"
        )));
    }
    Ok(())
}

/// Skip padding bytes, tolerating a clean end of stream (a writer may close
/// without sealing the final block). Returns `false` when the stream ended.
pub(crate) fn skip_padding(reader: &mut impl Read, n: u64) -> FormatResult<bool> {
    let copied = std::io::copy(&mut reader.take(n), &mut std::io::sink())?;
    Ok(copied == n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::BloomHash;

    #[test]
    fn test_rle_all_equal_is_one_length_word() {
        let mut rle = RleLengths::new();
        for _ in 0..1000 {
            rle.add(4);
        }
        rle.finish();
        // one literal length plus one repeat word, regardless of count
        assert_eq!(rle.words(), &[4, -999]);

        let mut buf = vec![];
        for w in rle.words() {
            buf.put_i32(*w);
        }
        let offsets = decode_offsets(&mut &buf[..], 1000).unwrap();
        assert_eq!(offsets.len(), 1001);
        assert_eq!(*offsets.last().unwrap(), 4000);
    }

    #[test]
    fn test_rle_alternating_lengths() {
        let mut rle = RleLengths::new();
        for i in 0..6 {
            rle.add(if i % 2 == 0 { 4 } else { 8 });
        }
        rle.finish();
        // one word per transition, no repeat words
        assert_eq!(rle.words(), &[4, 8, 4, 8, 4, 8]);
    }

    #[test]
    fn test_rle_mixed_runs() {
        let mut rle = RleLengths::new();
        for len in [4, 4, 4, 8, 8, 2] {
            rle.add(len);
        }
        rle.finish();
        assert_eq!(rle.words(), &[4, -2, 8, -1, 2]);

        let mut buf = vec![];
        for w in rle.words() {
            buf.put_i32(*w);
        }
        let offsets = decode_offsets(&mut &buf[..], 6).unwrap();
        assert_eq!(offsets, vec![0, 4, 8, 12, 20, 28, 30]);
    }

    #[test]
    fn test_decode_offsets_rejects_malformed() {
        // repeat word with no preceding literal
        let mut buf = vec![];
        buf.put_i32(-3);
        assert!(decode_offsets(&mut &buf[..], 3).is_err());

        // repeat overruns the record count
        let mut buf = vec![];
        buf.put_i32(4);
        buf.put_i32(-5);
        assert!(decode_offsets(&mut &buf[..], 3).is_err());

        // truncated stream
        let mut buf = vec![];
        buf.put_i32(4);
        assert!(decode_offsets(&mut &buf[..], 3).is_err());
    }

    #[test]
    fn test_block_header_roundtrip() {
        let header = BlockHeader {
            columns: vec![
                (ValueType::Int32, CompressionType::Gzip),
                (ValueType::Str, CompressionType::Lz4),
            ],
        };
        let mut buf = vec![];
        header.encode(&mut buf);
        assert_eq!(buf.len(), BlockHeader::encoded_size(2));

        let decoded = BlockHeader::read_from(&mut &buf[..]).unwrap().unwrap();
        assert_eq!(decoded, header);

        // clean EOF yields None, bad magic is corrupt
        assert!(BlockHeader::read_from(&mut &[][..]).unwrap().is_none());
        assert!(BlockHeader::read_from(&mut &b"XXXX\0\0\0\x01ab"[..]).is_err());
    }

    fn meta_fixture() -> RowGroupMeta {
        let mut sorter = crate::sorter::Sorter::new(SortOrder::Ascending);
        sorter.add(0, &Value::Int32(9));
        sorter.add(1, &Value::Int32(3));
        sorter.add(2, &Value::Int32(9));
        let mut bloom = BloomFilter::with_rate(0.05, 16, BloomHash::Murmur).unwrap();
        bloom.add(&9i32.to_be_bytes());

        let mut rle = RleLengths::new();
        for _ in 0..3 {
            rle.add(4);
        }
        rle.finish();

        RowGroupMeta {
            records: 3,
            columns: vec![ColumnMeta {
                uncompressed: 12,
                compressed: 7,
                sorted: Some((SortOrder::Ascending, sorter.finish())),
                bloom: Some(bloom),
                min_max: Some((Value::Int32(3), Value::Int32(9))),
                length_words: rle.words().to_vec(),
            }],
        }
    }

    #[test]
    fn test_row_group_header_roundtrip() {
        let meta = meta_fixture();
        let sync_marker = [7u8; SYNC_SIZE];
        let mut buf = vec![];
        meta.encode(&sync_marker, 0, &mut buf);
        assert_eq!(buf.len(), meta.encoded_size());

        let mut sync = None;
        let outcome = RowGroupHeader::read_from(
            &mut &buf[..],
            &mut sync,
            &[ValueType::Int32],
            &[true],
        )
        .unwrap();
        let header = match outcome {
            HeaderOutcome::Group(h) => h,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(sync, Some(sync_marker));
        assert_eq!(header.records, 3);
        assert_eq!(header.header_bytes, buf.len());
        let column = &header.columns[0];
        assert_eq!(column.offsets, vec![0, 4, 8, 12]);
        assert_eq!(column.min_max, Some((Value::Int32(3), Value::Int32(9))));
        assert!(column.sorted.is_some());
        assert!(column.bloom.as_ref().unwrap().contains(&9i32.to_be_bytes()));
    }

    #[test]
    fn test_sync_mismatch_is_fatal() {
        let meta = meta_fixture();
        let mut buf = vec![];
        meta.encode(&[7u8; SYNC_SIZE], 0, &mut buf);

        let mut sync = Some([8u8; SYNC_SIZE]);
        assert!(matches!(
            RowGroupHeader::read_from(&mut &buf[..], &mut sync, &[ValueType::Int32], &[true]),
            Err(FormatError::Corrupt(_))
        ));
    }

    #[test]
    fn test_skip_sentinel_and_eof() {
        let mut buf = vec![];
        buf.put_slice(&[7u8; SYNC_SIZE]);
        buf.put_i32(SKIP);
        let mut sync = None;
        assert!(matches!(
            RowGroupHeader::read_from(&mut &buf[..], &mut sync, &[ValueType::Int32], &[true])
                .unwrap(),
            HeaderOutcome::SkipBlock
        ));

        assert!(matches!(
            RowGroupHeader::read_from(&mut &[][..], &mut sync, &[ValueType::Int32], &[true])
                .unwrap(),
            HeaderOutcome::EndOfStream
        ));

        // mid-sync EOF is corrupt, not a clean end
        assert!(RowGroupHeader::read_from(
            &mut &[7u8; 5][..],
            &mut sync,
            &[ValueType::Int32],
            &[true]
        )
        .is_err());
    }

    #[test]
    fn test_unprojected_columns_are_skipped() {
        let meta = meta_fixture();
        let mut buf = vec![];
        meta.encode(&[7u8; SYNC_SIZE], 0, &mut buf);

        let mut sync = None;
        let outcome = RowGroupHeader::read_from(
            &mut &buf[..],
            &mut sync,
            &[ValueType::Int32],
            &[false],
        )
        .unwrap();
        let header = match outcome {
            HeaderOutcome::Group(h) => h,
            other => panic!("unexpected outcome {other:?}"),
        };
        let column = &header.columns[0];
        assert!(!column.projected);
        assert!(column.offsets.is_empty());
        assert!(column.sorted.is_none());
        assert_eq!(column.compressed, 7);
        assert_eq!(header.header_bytes, buf.len());
    }
}
