//! Read-only structural queries over formula trees.
//!
//! Anything that needs operation metadata (aggregate- or const-foldability)
//! lives on the registry instead; these helpers only look at node shape.

use std::collections::BTreeSet;

use super::index::children;
use super::nodes::*;

/// All nodes of the tree in pre-order, root first.
pub fn walk(root: &Formula) -> Vec<&Formula> {
    let mut nodes = vec![];
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        nodes.push(node);
        // Reversed so that pop() yields children left to right.
        stack.extend(children(node).into_iter().rev());
    }
    nodes
}

/// Field references in traversal order, duplicates preserved.
pub fn used_fields(root: &Formula) -> Vec<&FieldRef> {
    walk(root)
        .into_iter()
        .filter_map(|node| node.kind.as_field())
        .collect()
}

pub fn used_field_names(root: &Formula) -> BTreeSet<String> {
    used_fields(root)
        .into_iter()
        .map(|field| field.name.clone())
        .collect()
}

pub fn contains_fields(root: &Formula) -> bool {
    walk(root).iter().any(|node| node.kind.is_field())
}

pub fn collect_forks(root: &Formula) -> Vec<&QueryFork> {
    walk(root)
        .into_iter()
        .filter_map(|node| node.kind.as_fork())
        .collect()
}

pub fn contains_forks(root: &Formula) -> bool {
    walk(root).iter().any(|node| node.kind.is_fork())
}

pub fn contains_window_calls(root: &Formula) -> bool {
    walk(root).iter().any(|node| {
        matches!(
            &node.kind,
            FormulaItem::Call(call) if matches!(call.shape, CallShape::Window(_))
        )
    })
}

/// Whether any call or fork carries an explicit dimensional scope.
pub fn contains_lod(root: &Formula) -> bool {
    walk(root).iter().any(|node| match &node.kind {
        FormulaItem::Call(call) => call.lod.is_some(),
        FormulaItem::Fork(fork) => fork.lod.is_some(),
        _ => false,
    })
}

pub fn node_count(root: &Formula) -> usize {
    walk(root).len()
}
