// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Duplicate-aware binary search over the sort permutation.
//!
//! The search probes key values through the column cursor: each probe syncs
//! the column to a run's representative row and decodes one value. After the
//! initial `O(log n)` search the cursor walks qualifying slots and duplicate
//! runs directly, so iterating further matches is amortized `O(1)`.

use crate::error::FormatResult;
use crate::rowgroup::ColumnReader;
use crate::sorter::{SortOrder, SortedRows};
use crate::types::Value;

use super::{slot_of, CursorState, SeekOp, SlotCursor};

#[derive(Debug, Default)]
pub struct BSearch {
    cursor: SlotCursor,
}

impl BSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.cursor.reset();
    }

    fn probe(
        v: usize,
        sorted: &SortedRows,
        order: SortOrder,
        column: &mut ColumnReader,
    ) -> FormatResult<Value> {
        let slot = slot_of(v, sorted.slot_count(), order);
        column.value_at(sorted.representative(slot))
    }

    /// First virtual position whose key satisfies the bound: `>= key` when
    /// `strict` is false, `> key` when true.
    fn partition(
        key: &Value,
        strict: bool,
        sorted: &SortedRows,
        order: SortOrder,
        column: &mut ColumnReader,
    ) -> FormatResult<usize> {
        let mut lo = 0;
        let mut hi = sorted.slot_count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let probed = Self::probe(mid, sorted, order, column)?;
            let below = if strict {
                probed <= *key
            } else {
                probed < *key
            };
            if below {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Search on the first call, continue iterating on later calls.
    pub fn seek(
        &mut self,
        op: SeekOp,
        key: &Value,
        sorted: &SortedRows,
        order: SortOrder,
        column: &mut ColumnReader,
    ) -> FormatResult<Option<u32>> {
        match self.cursor.state {
            CursorState::Done => Ok(None),
            CursorState::Active => Ok(self.cursor.advance(sorted, order)),
            CursorState::Fresh => {
                let count = sorted.slot_count();
                if count == 0 {
                    self.cursor.state = CursorState::Done;
                    return Ok(None);
                }
                let lb = Self::partition(key, false, sorted, order, column)?;
                let ub = match op {
                    SeekOp::Higher | SeekOp::OrLower => {
                        Self::partition(key, true, sorted, order, column)?
                    }
                    _ => lb,
                };
                let eq_hit = match op {
                    SeekOp::Equal => {
                        lb < count && Self::probe(lb, sorted, order, column)? == *key
                    }
                    _ => false,
                };
                self.cursor.locate(op, lb, ub, eq_hit, count);
                if self.cursor.state == CursorState::Done {
                    return Ok(None);
                }
                Ok(Some(self.cursor.current(sorted, order)))
            }
        }
    }

    pub fn get(
        &mut self,
        key: &Value,
        sorted: &SortedRows,
        order: SortOrder,
        column: &mut ColumnReader,
    ) -> FormatResult<Option<u32>> {
        self.seek(SeekOp::Equal, key, sorted, order, column)
    }

    pub fn get_lower(
        &mut self,
        key: &Value,
        sorted: &SortedRows,
        order: SortOrder,
        column: &mut ColumnReader,
    ) -> FormatResult<Option<u32>> {
        self.seek(SeekOp::Lower, key, sorted, order, column)
    }

    pub fn get_or_lower(
        &mut self,
        key: &Value,
        sorted: &SortedRows,
        order: SortOrder,
        column: &mut ColumnReader,
    ) -> FormatResult<Option<u32>> {
        self.seek(SeekOp::OrLower, key, sorted, order, column)
    }

    pub fn get_higher(
        &mut self,
        key: &Value,
        sorted: &SortedRows,
        order: SortOrder,
        column: &mut ColumnReader,
    ) -> FormatResult<Option<u32>> {
        self.seek(SeekOp::Higher, key, sorted, order, column)
    }

    pub fn get_or_higher(
        &mut self,
        key: &Value,
        sorted: &SortedRows,
        order: SortOrder,
        column: &mut ColumnReader,
    ) -> FormatResult<Option<u32>> {
        self.seek(SeekOp::OrHigher, key, sorted, order, column)
    }
}
