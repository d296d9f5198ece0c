// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Per-row-group evaluation of a normalized selection.
//!
//! Every candidate row gets a tri-state verdict: a plain mismatch moves to
//! the next row, while `NoMatchGlobal` proves no row of the group can match
//! and prunes the rest of it. Bloom filters and min/max ranges are
//! consulted once per predicate per row group; the single index-backed
//! predicate drives row candidates in key order instead of row order, so
//! running past the last row number is not a termination signal there.

use tracing::trace;

use crate::error::FormatResult;
use crate::index::{BSearch, CssTree, SeekOp, SortIndex, SortIndexKind};
use crate::rowgroup::{ColumnInfo, ColumnReader, RowGroupHeader};
use crate::types::Value;

use super::{apply_sort_affinity, CompareOp, NodeId, SelectNode, Selection};

/// Verdict for one candidate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Match,
    /// This row does not match; another row of the group still might.
    NoMatch,
    /// No row of this group can match; skip the rest of it.
    NoMatchGlobal,
}

/// The predicate hoisted to the front of the conjunction by the
/// sort-affinity pass.
#[derive(Debug, Clone)]
struct HoistedPred {
    node: NodeId,
    column: usize,
    op: CompareOp,
    literal: Value,
}

/// Evaluation state valid for one row group.
#[derive(Default)]
struct GroupState {
    /// Bloom verdict per predicate node, computed at most once per group.
    bloom_pass: Vec<Option<bool>>,
    /// Min/max verdict per predicate node, computed at most once per group.
    range_pass: Vec<Option<bool>>,
    index: Option<SortIndex>,
    row: u32,
    sorted_active: bool,
}

/// Drives a normalized selection across row groups.
pub struct EvalContext {
    selection: Selection,
    index_kind: SortIndexKind,
    affinity_done: bool,
    hoisted: Option<HoistedPred>,
    state: GroupState,
}

impl EvalContext {
    /// `selection` must already be in conjunctive normal form.
    pub fn new(selection: Selection, index_kind: SortIndexKind) -> Self {
        Self {
            selection,
            index_kind,
            affinity_done: false,
            hoisted: None,
            state: GroupState::default(),
        }
    }

    /// Reset per-group state. The sort-affinity pass runs on the first
    /// group, when the sorted columns become known.
    pub fn begin_group(&mut self, header: &RowGroupHeader) {
        if !self.affinity_done {
            let hoisted_id =
                apply_sort_affinity(&mut self.selection, |c| header.columns[c].sorted.is_some());
            self.hoisted = hoisted_id.and_then(|id| match self.selection.node(id) {
                SelectNode::Predicate(p) => Some(HoistedPred {
                    node: id,
                    column: p.column,
                    op: p.op,
                    literal: p.literal.clone(),
                }),
                SelectNode::Composition(_) => None,
            });
            self.affinity_done = true;
        }
        let nodes = self.selection.node_count();
        self.state = GroupState {
            bloom_pass: vec![None; nodes],
            range_pass: vec![None; nodes],
            index: None,
            row: 0,
            sorted_active: self.hoisted.as_ref().is_some_and(|h| {
                h.op != CompareOp::Ne && header.columns[h.column].sorted.is_some()
            }),
        };
    }

    /// Next candidate row from the index cursor; builds the search
    /// structure on first use, after the cheap pruning checks.
    fn index_next(
        &mut self,
        header: &RowGroupHeader,
        columns: &mut [Option<ColumnReader>],
    ) -> FormatResult<Option<u32>> {
        let hoisted = self.hoisted.as_ref().expect("index scan without a hoisted predicate");
        let info = &header.columns[hoisted.column];
        let (order, rows) = info.sorted.as_ref().expect("sorted flag vanished");
        let column = columns[hoisted.column]
            .as_mut()
            .expect("predicate on a column that was not read");

        if self.state.index.is_none() {
            if !prune_check(&mut self.state, hoisted.node, hoisted.op, &hoisted.literal, info)? {
                return Ok(None);
            }
            let index = match self.index_kind {
                SortIndexKind::BSearch => SortIndex::BSearch(BSearch::new()),
                SortIndexKind::CssTree => SortIndex::Css(CssTree::build(rows, *order, column)?),
            };
            self.state.index = Some(index);
        }

        let seek = seek_op(hoisted.op).expect("not-equal predicates never use the index");
        self.state
            .index
            .as_mut()
            .expect("index cursor just installed")
            .seek(seek, &hoisted.literal, rows, *order, column)
    }

    /// Next matching row of the current group, or `None` when the group is
    /// exhausted or pruned.
    pub fn next_match(
        &mut self,
        header: &RowGroupHeader,
        columns: &mut [Option<ColumnReader>],
    ) -> FormatResult<Option<u32>> {
        loop {
            let candidate = if self.state.sorted_active {
                match self.index_next(header, columns)? {
                    Some(row) => row,
                    None => return Ok(None),
                }
            } else {
                if self.state.row >= header.records {
                    return Ok(None);
                }
                self.state.row
            };

            let verdict = visit(
                &self.selection,
                self.hoisted.as_ref(),
                &mut self.state,
                self.selection.root(),
                candidate,
                header,
                columns,
            )?;
            trace!(candidate, ?verdict, "evaluated row");
            match verdict {
                Verdict::Match => {
                    if !self.state.sorted_active {
                        self.state.row = candidate + 1;
                    }
                    return Ok(Some(candidate));
                }
                Verdict::NoMatch => {
                    if !self.state.sorted_active {
                        self.state.row = candidate + 1;
                    }
                }
                Verdict::NoMatchGlobal => return Ok(None),
            }
        }
    }
}

fn seek_op(op: CompareOp) -> Option<SeekOp> {
    match op {
        CompareOp::Eq => Some(SeekOp::Equal),
        CompareOp::Lt => Some(SeekOp::Lower),
        CompareOp::Le => Some(SeekOp::OrLower),
        CompareOp::Gt => Some(SeekOp::Higher),
        CompareOp::Ge => Some(SeekOp::OrHigher),
        CompareOp::Ne => None,
    }
}

/// Could any stored value in `[min, max]` satisfy `stored OP literal`?
fn range_possible(op: CompareOp, literal: &Value, min: &Value, max: &Value) -> bool {
    match op {
        CompareOp::Eq => min <= literal && literal <= max,
        CompareOp::Lt => min < literal,
        CompareOp::Le => min <= literal,
        CompareOp::Gt => max > literal,
        CompareOp::Ge => max >= literal,
        CompareOp::Ne => true,
    }
}

/// Once-per-group pruning for one predicate: bloom filter (equality only),
/// then the min/max range. `false` means no row of the group can satisfy
/// the predicate.
fn prune_check(
    state: &mut GroupState,
    node: NodeId,
    op: CompareOp,
    literal: &Value,
    info: &ColumnInfo,
) -> FormatResult<bool> {
    if op == CompareOp::Eq {
        let pass = match state.bloom_pass[node] {
            Some(pass) => pass,
            None => {
                let pass = match &info.bloom {
                    Some(bloom) => {
                        let mut key = vec![];
                        literal.encode(&mut key);
                        bloom.contains(&key)
                    }
                    None => true,
                };
                state.bloom_pass[node] = Some(pass);
                pass
            }
        };
        if !pass {
            return Ok(false);
        }
    }
    if op != CompareOp::Ne {
        let pass = match state.range_pass[node] {
            Some(pass) => pass,
            None => {
                let pass = match &info.min_max {
                    Some((min, max)) => range_possible(op, literal, min, max),
                    None => true,
                };
                state.range_pass[node] = Some(pass);
                pass
            }
        };
        if !pass {
            return Ok(false);
        }
    }
    Ok(true)
}

fn visit(
    selection: &Selection,
    hoisted: Option<&HoistedPred>,
    state: &mut GroupState,
    id: NodeId,
    row: u32,
    header: &RowGroupHeader,
    columns: &mut [Option<ColumnReader>],
) -> FormatResult<Verdict> {
    match selection.node(id) {
        SelectNode::Predicate(p) => {
            // the index supplied this row, the predicate holds by construction
            if state.sorted_active && hoisted.is_some_and(|h| h.node == id) {
                return Ok(Verdict::Match);
            }
            let info = &header.columns[p.column];
            if !prune_check(state, id, p.op, &p.literal, info)? {
                return Ok(Verdict::NoMatchGlobal);
            }
            let column = columns[p.column]
                .as_mut()
                .expect("predicate on a column that was not read");
            let stored = column.value_at(row)?;
            if stored.is_null() {
                return Ok(Verdict::NoMatch);
            }
            if p.op.matches(stored.cmp(&p.literal)) {
                Ok(Verdict::Match)
            } else {
                Ok(Verdict::NoMatch)
            }
        }
        SelectNode::Composition(c) => {
            debug_assert!(!c.negated, "negation must be gone after normalization");
            match c.op {
                super::LogicalOp::And => {
                    for child in &c.children {
                        match visit(selection, hoisted, state, *child, row, header, columns)? {
                            Verdict::Match => {}
                            other => return Ok(other),
                        }
                    }
                    Ok(Verdict::Match)
                }
                super::LogicalOp::Or => {
                    let mut all_global = true;
                    for child in &c.children {
                        match visit(selection, hoisted, state, *child, row, header, columns)? {
                            Verdict::Match => return Ok(Verdict::Match),
                            Verdict::NoMatch => all_global = false,
                            Verdict::NoMatchGlobal => {}
                        }
                    }
                    // some branch might still match on a different row
                    if all_global {
                        Ok(Verdict::NoMatchGlobal)
                    } else {
                        Ok(Verdict::NoMatch)
                    }
                }
            }
        }
    }
}
