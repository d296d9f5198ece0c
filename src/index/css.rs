// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Cache-sensitive search tree over the sorted key array.
//!
//! The tree is pointer-free: every level is a flat array of key copies, and
//! a node is a run of at most 17 entries, each the largest key of the child
//! below it. A lookup does a bounded comparison cascade per level down to a
//! leaf of 16 keys, never chasing pointers, so each level is one or two
//! cache lines of sequential comparisons.

use crate::error::FormatResult;
use crate::rowgroup::ColumnReader;
use crate::sorter::{SortOrder, SortedRows};
use crate::types::Value;

use super::{slot_of, CursorState, SeekOp, SlotCursor};

/// Keys per leaf run.
const LEAF_KEYS: usize = 16;
/// Children per internal node.
const FANOUT: usize = 17;

#[derive(Debug)]
pub struct CssTree {
    /// Distinct keys in ascending order, one per permutation slot.
    keys: Vec<Value>,
    /// Internal levels, root level first. Each level is a flat array of
    /// child-max key copies grouped into nodes of at most `FANOUT` entries.
    levels: Vec<Vec<Value>>,
    cursor: SlotCursor,
}

impl CssTree {
    /// Materialize the distinct-key array through the column cursor and
    /// build the internal levels bottom-up.
    pub fn build(
        sorted: &SortedRows,
        order: SortOrder,
        column: &mut ColumnReader,
    ) -> FormatResult<Self> {
        let count = sorted.slot_count();
        let mut keys = Vec::with_capacity(count);
        for v in 0..count {
            let slot = slot_of(v, count, order);
            keys.push(column.value_at(sorted.representative(slot))?);
        }

        let mut levels: Vec<Vec<Value>> = Vec::new();
        if !keys.is_empty() {
            let mut level: Vec<Value> = keys
                .chunks(LEAF_KEYS)
                .map(|chunk| chunk.last().cloned().unwrap_or(Value::Null))
                .collect();
            loop {
                let done = level.len() <= FANOUT;
                levels.push(level);
                if done {
                    break;
                }
                level = levels
                    .last()
                    .map(|below| {
                        below
                            .chunks(FANOUT)
                            .map(|chunk| chunk.last().cloned().unwrap_or(Value::Null))
                            .collect()
                    })
                    .unwrap_or_default();
            }
            levels.reverse();
        }

        Ok(Self {
            keys,
            levels,
            cursor: SlotCursor::default(),
        })
    }

    pub fn reset(&mut self) {
        self.cursor.reset();
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// First position whose key satisfies the bound (`>= key`, or `> key`
    /// when `strict`): descend the levels with a comparison cascade, then
    /// scan the leaf run.
    fn partition(&self, key: &Value, strict: bool) -> usize {
        let qualifies = |candidate: &Value| {
            if strict {
                candidate > key
            } else {
                candidate >= key
            }
        };

        let mut node = 0usize;
        for level in &self.levels {
            let start = node * FANOUT;
            let end = (start + FANOUT).min(level.len());
            match (start..end).find(|j| qualifies(&level[*j])) {
                Some(j) => node = j,
                // probe is above every key in the tree
                None => return self.keys.len(),
            }
        }

        let start = node * LEAF_KEYS;
        let end = (start + LEAF_KEYS).min(self.keys.len());
        (start..end)
            .find(|p| qualifies(&self.keys[*p]))
            .unwrap_or(end)
    }

    /// Search on the first call, continue iterating on later calls. The key
    /// array was materialized at build time, so no column probes happen
    /// here.
    pub fn seek(
        &mut self,
        op: SeekOp,
        key: &Value,
        sorted: &SortedRows,
        order: SortOrder,
    ) -> FormatResult<Option<u32>> {
        match self.cursor.state {
            CursorState::Done => Ok(None),
            CursorState::Active => Ok(self.cursor.advance(sorted, order)),
            CursorState::Fresh => {
                let count = self.keys.len();
                if count == 0 {
                    self.cursor.state = CursorState::Done;
                    return Ok(None);
                }
                let lb = self.partition(key, false);
                let ub = match op {
                    SeekOp::Higher | SeekOp::OrLower => self.partition(key, true),
                    _ => lb,
                };
                let eq_hit = matches!(op, SeekOp::Equal) && lb < count && self.keys[lb] == *key;
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
    ) -> FormatResult<Option<u32>> {
        self.seek(SeekOp::Equal, key, sorted, order)
    }

    pub fn get_lower(
        &mut self,
        key: &Value,
        sorted: &SortedRows,
        order: SortOrder,
    ) -> FormatResult<Option<u32>> {
        self.seek(SeekOp::Lower, key, sorted, order)
    }

    pub fn get_or_lower(
        &mut self,
        key: &Value,
        sorted: &SortedRows,
        order: SortOrder,
    ) -> FormatResult<Option<u32>> {
        self.seek(SeekOp::OrLower, key, sorted, order)
    }

    pub fn get_higher(
        &mut self,
        key: &Value,
        sorted: &SortedRows,
        order: SortOrder,
    ) -> FormatResult<Option<u32>> {
        self.seek(SeekOp::Higher, key, sorted, order)
    }

    pub fn get_or_higher(
        &mut self,
        key: &Value,
        sorted: &SortedRows,
        order: SortOrder,
    ) -> FormatResult<Option<u32>> {
        self.seek(SeekOp::OrHigher, key, sorted, order)
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::super::BSearch;
    use super::*;
    use crate::sorter::Sorter;
    use crate::types::ValueType;

    fn fixture(keys: &[i32], order: SortOrder) -> (SortedRows, ColumnReader) {
        let mut sorter = Sorter::new(order);
        for (row, key) in keys.iter().enumerate() {
            sorter.add(row as u32, &Value::Int32(*key));
        }
        let sorted = sorter.finish();
        let column = ColumnReader::from_values(
            ValueType::Int32,
            keys.iter().map(|k| Value::Int32(*k)).collect_vec(),
        );
        (sorted, column)
    }

    /// Baseline: rows of `keys` matching `op` against `probe`.
    fn scan_baseline(keys: &[i32], op: SeekOp, probe: i32) -> Vec<u32> {
        keys.iter()
            .enumerate()
            .filter(|(_, k)| match op {
                SeekOp::Equal => **k == probe,
                SeekOp::Lower => **k < probe,
                SeekOp::OrLower => **k <= probe,
                SeekOp::Higher => **k > probe,
                SeekOp::OrHigher => **k >= probe,
            })
            .map(|(row, _)| row as u32)
            .collect()
    }

    fn drain_bsearch(
        op: SeekOp,
        probe: i32,
        sorted: &SortedRows,
        order: SortOrder,
        column: &mut ColumnReader,
    ) -> Vec<u32> {
        let mut out = vec![];
        let mut search = BSearch::new();
        while let Some(row) = search
            .seek(op, &Value::Int32(probe), sorted, order, column)
            .unwrap()
        {
            out.push(row);
        }
        out
    }

    fn drain_css(
        op: SeekOp,
        probe: i32,
        sorted: &SortedRows,
        order: SortOrder,
        column: &mut ColumnReader,
    ) -> Vec<u32> {
        let mut out = vec![];
        let mut tree = CssTree::build(sorted, order, column).unwrap();
        while let Some(row) = tree.seek(op, &Value::Int32(probe), sorted, order).unwrap() {
            out.push(row);
        }
        out
    }

    const OPS: [SeekOp; 5] = [
        SeekOp::Equal,
        SeekOp::Lower,
        SeekOp::OrLower,
        SeekOp::Higher,
        SeekOp::OrHigher,
    ];

    fn check_dataset(keys: &[i32], order: SortOrder) {
        let (sorted, mut column) = fixture(keys, order);
        let probes: Vec<i32> = keys
            .iter()
            .copied()
            .chain([i32::MIN, -1, i32::MAX])
            .unique()
            .collect();
        for op in OPS {
            for probe in &probes {
                let mut expected = scan_baseline(keys, op, *probe);
                expected.sort_unstable();

                let mut via_bsearch = drain_bsearch(op, *probe, &sorted, order, &mut column);
                via_bsearch.sort_unstable();
                assert_eq!(via_bsearch, expected, "bsearch {op:?} probe {probe}");

                let mut via_css = drain_css(op, *probe, &sorted, order, &mut column);
                via_css.sort_unstable();
                assert_eq!(via_css, expected, "css {op:?} probe {probe}");
            }
        }
    }

    #[test]
    fn test_unique_keys() {
        check_dataset(&[40, 10, 30, 20, 50, 0, 70, 60], SortOrder::Ascending);
        check_dataset(&[40, 10, 30, 20, 50, 0, 70, 60], SortOrder::Descending);
    }

    #[test]
    fn test_some_duplicates() {
        let keys = [5, 3, 5, 5, 9, 3, 1, 9, 9, 9, 2];
        check_dataset(&keys, SortOrder::Ascending);
        check_dataset(&keys, SortOrder::Descending);
    }

    #[test]
    fn test_all_duplicates() {
        check_dataset(&[7; 12], SortOrder::Ascending);
        check_dataset(&[7; 12], SortOrder::Descending);
    }

    #[test]
    fn test_multi_level_tree() {
        // enough distinct keys to force two internal levels above the leaves
        let keys: Vec<i32> = (0..4000).map(|i| (i * 37) % 9973).collect();
        let (sorted, mut column) = fixture(&keys, SortOrder::Ascending);
        let mut tree = CssTree::build(&sorted, SortOrder::Ascending, &mut column).unwrap();
        assert!(tree.key_count() > 16 * 17);

        for probe in [0, 1, 4999, 9972, 10000] {
            let expected = scan_baseline(&keys, SeekOp::Equal, probe);
            let first = tree
                .seek(SeekOp::Equal, &Value::Int32(probe), &sorted, SortOrder::Ascending)
                .unwrap();
            match expected.first() {
                Some(_) => assert!(expected.contains(&first.unwrap())),
                None => assert_eq!(first, None),
            }
            tree.reset();
        }
    }

    #[test]
    fn test_boundary_clamping() {
        // or_lower above the largest key lands on the largest key's rows;
        // lower below the smallest key is a miss, not a panic
        let (sorted, mut column) = fixture(&[10, 20, 30], SortOrder::Ascending);
        let mut search = BSearch::new();
        assert_eq!(
            search
                .get_or_lower(&Value::Int32(99), &sorted, SortOrder::Ascending, &mut column)
                .unwrap(),
            Some(2)
        );

        let mut search = BSearch::new();
        assert_eq!(
            search
                .get_lower(&Value::Int32(10), &sorted, SortOrder::Ascending, &mut column)
                .unwrap(),
            None
        );
    }
}
