// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Sort permutation builder for sorted columns.
//!
//! During a write pass the [`Sorter`] collects `(row, key)` pairs in
//! arbitrary insertion order. `finish` produces a [`SortedRows`]: the row
//! permutation in key order, with duplicate-key runs compacted into a
//! trailing section so a binary search touches one slot per distinct key.

use std::collections::BTreeSet;

use bytes::{Buf, BufMut};

use crate::error::{FormatError, FormatResult};
use crate::types::Value;

/// Sort direction of a column, persisted through the header flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Accumulates `(row, key)` pairs for one column of one row group.
#[derive(Debug)]
pub struct Sorter {
    order: SortOrder,
    pairs: BTreeSet<(Value, u32)>,
}

impl Sorter {
    pub fn new(order: SortOrder) -> Self {
        Self {
            order,
            pairs: BTreeSet::new(),
        }
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The key is copied: the column buffer may be reset before `finish`.
    pub fn add(&mut self, row: u32, key: &Value) {
        self.pairs.insert((key.clone(), row));
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    /// Upper bound of the serialized permutation size, usable before all
    /// rows have been seen. Runs of two are the worst case: one slot plus
    /// three duplicate words per pair of rows.
    pub fn estimated_size(&self) -> usize {
        8 * self.pairs.len() + 16
    }

    /// Walk the key-ordered pairs once, compacting maximal equal-key runs.
    pub fn finish(&self) -> SortedRows {
        let mut slots = Vec::new();
        let mut duplicates = Vec::new();

        let mut run: Vec<u32> = Vec::new();
        let mut run_key: Option<&Value> = None;

        let mut close_run = |run: &mut Vec<u32>| {
            if run.len() == 1 {
                slots.push(run[0] as i32);
            } else if run.len() > 1 {
                let offset = duplicates.len() as i32;
                duplicates.push(run.len() as i32);
                duplicates.extend(run.iter().map(|row| *row as i32));
                slots.push(-offset - 1);
            }
            run.clear();
        };

        match self.order {
            SortOrder::Ascending => {
                for (key, row) in self.pairs.iter() {
                    if run_key != Some(key) {
                        close_run(&mut run);
                        run_key = Some(key);
                    }
                    run.push(*row);
                }
            }
            SortOrder::Descending => {
                for (key, row) in self.pairs.iter().rev() {
                    if run_key != Some(key) {
                        close_run(&mut run);
                        run_key = Some(key);
                    }
                    run.push(*row);
                }
            }
        }
        close_run(&mut run);

        SortedRows { slots, duplicates }
    }
}

/// The serialized sort permutation of one column.
///
/// `slots` holds one entry per distinct key, in key order. A non-negative
/// slot is the row index itself; a negative slot `s` points at word
/// `-(s + 1)` of `duplicates`, which holds `[count, row...]` for that run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedRows {
    slots: Vec<i32>,
    duplicates: Vec<i32>,
}

impl SortedRows {
    /// Number of distinct keys.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of rows in the run at `slot` (1 for a unique key).
    pub fn run_len(&self, slot: usize) -> usize {
        let s = self.slots[slot];
        if s >= 0 {
            1
        } else {
            self.duplicates[(-s - 1) as usize] as usize
        }
    }

    /// `index`-th row of the run at `slot`.
    pub fn row(&self, slot: usize, index: usize) -> u32 {
        let s = self.slots[slot];
        if s >= 0 {
            debug_assert_eq!(index, 0);
            s as u32
        } else {
            let offset = (-s - 1) as usize;
            self.duplicates[offset + 1 + index] as u32
        }
    }

    /// First row of the run at `slot`: the probe target for searches.
    pub fn representative(&self, slot: usize) -> u32 {
        self.row(slot, 0)
    }

    pub fn encoded_size(&self) -> usize {
        4 * (2 + self.slots.len() + self.duplicates.len())
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        let rest = 4 * (1 + self.slots.len() + self.duplicates.len());
        buf.put_i32(rest as i32);
        buf.put_i32(self.slots.len() as i32);
        for slot in &self.slots {
            buf.put_i32(*slot);
        }
        for word in &self.duplicates {
            buf.put_i32(*word);
        }
    }

    pub fn decode(buf: &mut impl Buf) -> FormatResult<Self> {
        if buf.remaining() < 8 {
            return Err(FormatError::corrupt("sorted rows section truncated"));
        }
        let rest = buf.get_i32();
        let unique = buf.get_i32();
        if rest < 4 || rest % 4 != 0 || unique < 0 || (unique as usize) > (rest as usize - 4) / 4 {
            return Err(FormatError::corrupt(format!(
                "malformed sorted rows lengths rest={rest} unique={unique}"
            )));
        }
        let total_words = (rest as usize - 4) / 4;
        if buf.remaining() < total_words * 4 {
            return Err(FormatError::corrupt("sorted rows payload truncated"));
        }
        let slots: Vec<i32> = (0..unique).map(|_| buf.get_i32()).collect();
        let duplicates: Vec<i32> = (0..total_words - unique as usize)
            .map(|_| buf.get_i32())
            .collect();

        let decoded = Self { slots, duplicates };
        decoded.validate()?;
        Ok(decoded)
    }

    fn validate(&self) -> FormatResult<()> {
        for (i, s) in self.slots.iter().enumerate() {
            if *s < 0 {
                let offset = (-s - 1) as usize;
                let count = *self
                    .duplicates
                    .get(offset)
                    .ok_or_else(|| FormatError::corrupt("duplicate pointer out of range"))?;
                if count < 2 || offset + count as usize >= self.duplicates.len() {
                    return Err(FormatError::corrupt(format!(
                        "malformed duplicate run at slot {i}"
                    )));
                }
            }
        }
        Ok(())
    }
}
