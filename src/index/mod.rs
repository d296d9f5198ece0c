// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Search structures over a column's sort permutation.
//!
//! Two structures answer the same queries: [`BSearch`], a duplicate-aware
//! binary search that probes keys through the column cursor, and
//! [`CssTree`], a pointer-free wide-fanout search tree built from the
//! materialized key array. Both are stateful cursors: the first call
//! performs the search, subsequent calls iterate further matches in
//! amortized constant time.

mod bsearch;
mod css;

pub use bsearch::BSearch;
pub use css::CssTree;

use crate::error::FormatResult;
use crate::rowgroup::ColumnReader;
use crate::sorter::{SortOrder, SortedRows};
use crate::types::Value;

/// Query operation of an index cursor, fixed for the cursor's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOp {
    /// Rows whose key equals the probe.
    Equal,
    /// Rows whose key is strictly below the probe.
    Lower,
    /// Rows whose key is at or below the probe.
    OrLower,
    /// Rows whose key is strictly above the probe.
    Higher,
    /// Rows whose key is at or above the probe.
    OrHigher,
}

/// Which search structure serves indexed predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortIndexKind {
    #[default]
    BSearch,
    CssTree,
}

/// Explicit cursor lifecycle. The first call and continuations are distinct
/// states, never inferred from sentinel field values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum CursorState {
    #[default]
    Fresh,
    Active,
    Done,
}

/// Iteration state over a contiguous region of qualifying slots.
///
/// Positions are *virtual*: ascending key order regardless of the stored
/// sort direction. `slot_of` maps back to physical permutation slots.
#[derive(Debug, Default)]
pub(crate) struct SlotCursor {
    pub(crate) state: CursorState,
    v: usize,
    lo: usize,
    hi: usize,
    step: i8,
    dup: usize,
}

pub(crate) fn slot_of(v: usize, count: usize, order: SortOrder) -> usize {
    match order {
        SortOrder::Ascending => v,
        SortOrder::Descending => count - 1 - v,
    }
}

impl SlotCursor {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Configure the qualifying region from the virtual bounds
    /// `lb` (first position at or above the probe) and `ub` (first position
    /// strictly above it). `eq_hit` tells whether position `lb` holds the
    /// probe key exactly.
    pub(crate) fn locate(&mut self, op: SeekOp, lb: usize, ub: usize, eq_hit: bool, count: usize) {
        let region = match op {
            SeekOp::Equal if eq_hit => Some((lb, lb, lb, 0)),
            SeekOp::Equal => None,
            SeekOp::OrHigher if lb < count => Some((lb, count - 1, lb, 1)),
            SeekOp::OrHigher => None,
            SeekOp::Higher if ub < count => Some((ub, count - 1, ub, 1)),
            SeekOp::Higher => None,
            SeekOp::OrLower if ub > 0 => Some((0, ub - 1, ub - 1, -1)),
            SeekOp::OrLower => None,
            SeekOp::Lower if lb > 0 => Some((0, lb - 1, lb - 1, -1)),
            SeekOp::Lower => None,
        };
        match region {
            Some((lo, hi, start, step)) => {
                self.state = CursorState::Active;
                self.lo = lo;
                self.hi = hi;
                self.v = start;
                self.step = step;
                self.dup = 0;
            }
            None => self.state = CursorState::Done,
        }
    }

    /// Row at the current position.
    pub(crate) fn current(&self, sorted: &SortedRows, order: SortOrder) -> u32 {
        let slot = slot_of(self.v, sorted.slot_count(), order);
        sorted.row(slot, self.dup)
    }

    /// Step to the next qualifying row: first within the duplicate run,
    /// then to the neighboring slot in the iteration direction.
    pub(crate) fn advance(&mut self, sorted: &SortedRows, order: SortOrder) -> Option<u32> {
        if self.state != CursorState::Active {
            return None;
        }
        let slot = slot_of(self.v, sorted.slot_count(), order);
        if self.dup + 1 < sorted.run_len(slot) {
            self.dup += 1;
            return Some(self.current(sorted, order));
        }
        let next = self.v as i64 + self.step as i64;
        if self.step == 0 || next < self.lo as i64 || next > self.hi as i64 {
            self.state = CursorState::Done;
            return None;
        }
        self.v = next as usize;
        self.dup = 0;
        Some(self.current(sorted, order))
    }
}

/// Either search structure behind one dispatch point, mirroring how the
/// evaluation engine selects an index per row group.
#[derive(Debug)]
pub enum SortIndex {
    BSearch(BSearch),
    Css(CssTree),
}

impl SortIndex {
    pub fn seek(
        &mut self,
        op: SeekOp,
        key: &Value,
        sorted: &SortedRows,
        order: SortOrder,
        column: &mut ColumnReader,
    ) -> FormatResult<Option<u32>> {
        match self {
            SortIndex::BSearch(inner) => inner.seek(op, key, sorted, order, column),
            SortIndex::Css(inner) => inner.seek(op, key, sorted, order),
        }
    }
}
