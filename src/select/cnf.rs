// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Conversion to conjunctive normal form.
//!
//! Runs once at configuration time. Negation is pushed to the leaves with
//! De Morgan's laws and absorbed into the predicates by swapping to the
//! algebraic inverse operator, so the normalized tree contains no negation
//! at all. AND is then distributed over OR bottom-up until the tree is a
//! conjunction of disjunctions.

use super::{Composition, LogicalOp, NodeId, Predicate, SelectNode, Selection};

/// Negation-free intermediate tree.
enum NotFree {
    Pred(Predicate),
    And(Vec<NotFree>),
    Or(Vec<NotFree>),
}

fn push_not(selection: &Selection, id: NodeId, negate: bool) -> NotFree {
    match selection.node(id) {
        SelectNode::Predicate(p) => {
            let mut flat = p.clone();
            // two negations cancel; one flips the operator
            let negate = negate != flat.negated;
            flat.negated = false;
            flat.use_index = false;
            if negate {
                flat.op = flat.op.inverse();
            }
            NotFree::Pred(flat)
        }
        SelectNode::Composition(c) => {
            let negate = negate != c.negated;
            let children: Vec<NotFree> = c
                .children
                .iter()
                .map(|child| push_not(selection, *child, negate))
                .collect();
            match (c.op, negate) {
                (LogicalOp::And, false) | (LogicalOp::Or, true) => NotFree::And(children),
                (LogicalOp::Or, false) | (LogicalOp::And, true) => NotFree::Or(children),
            }
        }
    }
}

/// Clauses of the conjunction: each inner vec is one disjunction of
/// predicates. Distribution happens here: `cnf(A or B) = { x ∪ y }` over the
/// clause sets of A and B.
fn clauses(tree: NotFree) -> Vec<Vec<Predicate>> {
    match tree {
        NotFree::Pred(p) => vec![vec![p]],
        NotFree::And(children) => children.into_iter().flat_map(clauses).collect(),
        NotFree::Or(children) => {
            let mut acc: Vec<Vec<Predicate>> = vec![vec![]];
            for child in children {
                let child_clauses = clauses(child);
                let mut merged = Vec::with_capacity(acc.len() * child_clauses.len());
                for left in &acc {
                    for right in &child_clauses {
                        let mut clause = left.clone();
                        clause.extend(right.iter().cloned());
                        merged.push(clause);
                    }
                }
                acc = merged;
            }
            acc
        }
    }
}

/// Normalize to a canonical conjunction: the root is always AND; each child
/// is either a bare predicate (single-literal clause) or an OR composition.
pub fn to_cnf(selection: &Selection) -> Selection {
    let pushed = push_not(selection, selection.root(), false);
    let clause_list = clauses(pushed);

    let mut nodes: Vec<SelectNode> = Vec::new();
    let mut conjunction: Vec<NodeId> = Vec::new();
    for clause in clause_list {
        if clause.len() == 1 {
            let id = nodes.len();
            nodes.push(SelectNode::Predicate(clause.into_iter().next().unwrap()));
            conjunction.push(id);
        } else {
            let mut members = Vec::with_capacity(clause.len());
            for predicate in clause {
                members.push(nodes.len());
                nodes.push(SelectNode::Predicate(predicate));
            }
            let id = nodes.len();
            nodes.push(SelectNode::Composition(Composition {
                op: LogicalOp::Or,
                negated: false,
                children: members,
            }));
            conjunction.push(id);
        }
    }

    let root = nodes.len();
    nodes.push(SelectNode::Composition(Composition {
        op: LogicalOp::And,
        negated: false,
        children: conjunction,
    }));
    Selection::from_parts(nodes, root)
}

/// True when the tree is a conjunction of disjunctions of positive
/// predicates.
#[cfg(test)]
fn is_cnf(selection: &Selection) -> bool {
    let SelectNode::Composition(root) = selection.node(selection.root()) else {
        return false;
    };
    if root.op != LogicalOp::And || root.negated {
        return false;
    }
    root.children.iter().all(|child| match selection.node(*child) {
        SelectNode::Predicate(p) => !p.negated,
        SelectNode::Composition(c) => {
            c.op == LogicalOp::Or
                && !c.negated
                && c.children.iter().all(|grandchild| {
                    matches!(
                        selection.node(*grandchild),
                        SelectNode::Predicate(p) if !p.negated
                    )
                })
        }
    })
}
