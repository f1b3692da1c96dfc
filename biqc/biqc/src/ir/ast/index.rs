use serde::{Deserialize, Serialize};

use super::nodes::*;
use crate::error::{Error, Result};

/// Path to a node inside a formula tree, as child positions from the root.
///
/// Child positions follow a fixed per-variant order, shared by [`children`]
/// and [`replace_at`]: call arguments come before window grouping
/// dimensions, window ordering expressions and LOD dimensions; case/if
/// blocks interleave condition and branch; fork conditions follow the
/// result expression. Split masks store these paths, so the order is part
/// of the IR contract.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct NodeHierarchyIndex {
    pub indices: Vec<usize>,
}

impl NodeHierarchyIndex {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(indices: Vec<usize>) -> Self {
        NodeHierarchyIndex { indices }
    }

    pub fn child(&self, position: usize) -> Self {
        let mut indices = self.indices.clone();
        indices.push(position);
        NodeHierarchyIndex { indices }
    }

    pub fn is_root(&self) -> bool {
        self.indices.is_empty()
    }

    /// The node this index points at, if the path is valid for `root`.
    pub fn get<'a>(&self, root: &'a Formula) -> Option<&'a Formula> {
        let mut node = root;
        for &position in &self.indices {
            node = children(node).into_iter().nth(position)?;
        }
        Some(node)
    }

    /// Whether one index is a prefix of the other (including equality).
    /// Overlapping indices cannot both be relocated.
    pub fn overlaps(&self, other: &NodeHierarchyIndex) -> bool {
        let common = self.indices.len().min(other.indices.len());
        self.indices[..common] == other.indices[..common]
    }
}

impl std::fmt::Display for NodeHierarchyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.indices.is_empty() {
            return write!(f, ".");
        }
        write!(
            f,
            "{}",
            self.indices
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(".")
        )
    }
}

/// Ordered child nodes of a formula node.
pub fn children(formula: &Formula) -> Vec<&Formula> {
    match &formula.kind {
        FormulaItem::Field(_)
        | FormulaItem::Literal(_)
        | FormulaItem::Null
        | FormulaItem::ErrorNode(_) => vec![],
        FormulaItem::ExpressionList(items) => items.iter().collect(),
        FormulaItem::Call(call) => {
            let mut slots: Vec<&Formula> = call.args.iter().collect();
            if let CallShape::Window(spec) = &call.shape {
                match &spec.grouping {
                    WindowGrouping::Total => {}
                    WindowGrouping::Within(dims) | WindowGrouping::Among(dims) => {
                        slots.extend(dims)
                    }
                }
                slots.extend(spec.ordering.iter().map(|item| &item.expr));
            }
            if let Some(lod) = &call.lod {
                slots.extend(&lod.dims);
            }
            slots
        }
        FormulaItem::CaseBlock(case) => {
            let mut slots = vec![case.case_expr.as_ref()];
            for part in &case.when_parts {
                slots.push(&part.val);
                slots.push(&part.expr);
            }
            if let Some(else_part) = &case.else_part {
                slots.push(else_part);
            }
            slots
        }
        FormulaItem::IfBlock(block) => {
            let mut slots = vec![];
            for part in &block.if_parts {
                slots.push(&part.cond);
                slots.push(&part.expr);
            }
            if let Some(else_part) = &block.else_part {
                slots.push(else_part.as_ref());
            }
            slots
        }
        FormulaItem::Parenthesized(inner) => vec![inner.as_ref()],
        FormulaItem::Fork(fork) => {
            let mut slots = vec![fork.result_expr.as_ref()];
            for cond in &fork.joining {
                match cond {
                    JoinConditionNode::SelfEquality { expr } => slots.push(expr),
                    JoinConditionNode::Binary {
                        expr, fork_expr, ..
                    } => {
                        slots.push(expr);
                        slots.push(fork_expr);
                    }
                }
            }
            if let Some(lod) = &fork.lod {
                slots.extend(&lod.dims);
            }
            slots
        }
    }
}

/// Rebuilds `root` with the node at `index` swapped for `replacement`.
/// The rest of the tree is reused as-is.
pub fn replace_at(
    root: Formula,
    index: &NodeHierarchyIndex,
    replacement: Formula,
) -> Result<Formula> {
    replace_inner(root, &index.indices, replacement).map_err(|_: BadPath| {
        Error::new_assert(format!("no node at index {index} during subtree replacement"))
    })
}

struct BadPath;

fn replace_inner(node: Formula, path: &[usize], replacement: Formula) -> Result<Formula, BadPath> {
    let Some((&position, rest)) = path.split_first() else {
        return Ok(replacement);
    };

    let Formula { kind, span } = node;
    let kind = map_child(kind, position, |child| {
        replace_inner(child, rest, replacement)
    })?;
    Ok(Formula { kind, span })
}

fn swap_in(
    slot: &mut Formula,
    map: impl FnOnce(Formula) -> Result<Formula, BadPath>,
) -> Result<(), BadPath> {
    let old = std::mem::replace(slot, Formula::null());
    *slot = map(old)?;
    Ok(())
}

fn swap_in_boxed(
    slot: &mut Box<Formula>,
    map: impl FnOnce(Formula) -> Result<Formula, BadPath>,
) -> Result<(), BadPath> {
    let old = std::mem::replace(slot.as_mut(), Formula::null());
    **slot = map(old)?;
    Ok(())
}

// Mirrors the slot order of `children`; the running `position` countdown
// must visit slots in exactly the same sequence.
fn map_child(
    kind: FormulaItem,
    position: usize,
    map: impl FnOnce(Formula) -> Result<Formula, BadPath>,
) -> Result<FormulaItem, BadPath> {
    let mut remaining = position;

    match kind {
        FormulaItem::Field(_)
        | FormulaItem::Literal(_)
        | FormulaItem::Null
        | FormulaItem::ErrorNode(_) => Err(BadPath),
        FormulaItem::ExpressionList(mut items) => {
            if remaining < items.len() {
                swap_in(&mut items[remaining], map)?;
                Ok(FormulaItem::ExpressionList(items))
            } else {
                Err(BadPath)
            }
        }
        FormulaItem::Call(mut call) => {
            if remaining < call.args.len() {
                swap_in(&mut call.args[remaining], map)?;
                return Ok(FormulaItem::Call(call));
            }
            remaining -= call.args.len();
            if let CallShape::Window(spec) = &mut call.shape {
                match &mut spec.grouping {
                    WindowGrouping::Total => {}
                    WindowGrouping::Within(dims) | WindowGrouping::Among(dims) => {
                        if remaining < dims.len() {
                            swap_in(&mut dims[remaining], map)?;
                            return Ok(FormulaItem::Call(call));
                        }
                        remaining -= dims.len();
                    }
                }
                if remaining < spec.ordering.len() {
                    swap_in(&mut spec.ordering[remaining].expr, map)?;
                    return Ok(FormulaItem::Call(call));
                }
                remaining -= spec.ordering.len();
            }
            if let Some(lod) = &mut call.lod {
                if remaining < lod.dims.len() {
                    swap_in(&mut lod.dims[remaining], map)?;
                    return Ok(FormulaItem::Call(call));
                }
            }
            Err(BadPath)
        }
        FormulaItem::CaseBlock(mut case) => {
            if remaining == 0 {
                swap_in_boxed(&mut case.case_expr, map)?;
                return Ok(FormulaItem::CaseBlock(case));
            }
            remaining -= 1;
            if remaining < case.when_parts.len() * 2 {
                let part = &mut case.when_parts[remaining / 2];
                let slot = if remaining % 2 == 0 {
                    &mut part.val
                } else {
                    &mut part.expr
                };
                swap_in(slot, map)?;
                return Ok(FormulaItem::CaseBlock(case));
            }
            remaining -= case.when_parts.len() * 2;
            match (&mut case.else_part, remaining) {
                (Some(else_part), 0) => {
                    swap_in_boxed(else_part, map)?;
                    Ok(FormulaItem::CaseBlock(case))
                }
                _ => Err(BadPath),
            }
        }
        FormulaItem::IfBlock(mut block) => {
            if remaining < block.if_parts.len() * 2 {
                let part = &mut block.if_parts[remaining / 2];
                let slot = if remaining % 2 == 0 {
                    &mut part.cond
                } else {
                    &mut part.expr
                };
                swap_in(slot, map)?;
                return Ok(FormulaItem::IfBlock(block));
            }
            remaining -= block.if_parts.len() * 2;
            match (&mut block.else_part, remaining) {
                (Some(else_part), 0) => {
                    swap_in_boxed(else_part, map)?;
                    Ok(FormulaItem::IfBlock(block))
                }
                _ => Err(BadPath),
            }
        }
        FormulaItem::Parenthesized(mut inner) => {
            if remaining == 0 {
                swap_in_boxed(&mut inner, map)?;
                Ok(FormulaItem::Parenthesized(inner))
            } else {
                Err(BadPath)
            }
        }
        FormulaItem::Fork(mut fork) => {
            if remaining == 0 {
                swap_in_boxed(&mut fork.result_expr, map)?;
                return Ok(FormulaItem::Fork(fork));
            }
            remaining -= 1;
            // Locate the owning condition first; conditions span one or two
            // slots depending on their variant.
            let mut target = None;
            for (position, cond) in fork.joining.iter().enumerate() {
                let width = match cond {
                    JoinConditionNode::SelfEquality { .. } => 1,
                    JoinConditionNode::Binary { .. } => 2,
                };
                if remaining < width {
                    target = Some((position, remaining));
                    break;
                }
                remaining -= width;
            }
            if let Some((position, offset)) = target {
                let slot = match &mut fork.joining[position] {
                    JoinConditionNode::SelfEquality { expr } => expr,
                    JoinConditionNode::Binary {
                        expr, fork_expr, ..
                    } => {
                        if offset == 0 {
                            expr
                        } else {
                            fork_expr
                        }
                    }
                };
                swap_in(slot, map)?;
                return Ok(FormulaItem::Fork(fork));
            }
            if let Some(lod) = &mut fork.lod {
                if remaining < lod.dims.len() {
                    swap_in(&mut lod.dims[remaining], map)?;
                    return Ok(FormulaItem::Fork(fork));
                }
            }
            Err(BadPath)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Formula {
        // SUM([a]) + QUANTILE([a], 0.9)
        Formula::binary(
            "+",
            Formula::func("sum", vec![Formula::field("a")]),
            Formula::func(
                "quantile",
                vec![
                    Formula::field("a"),
                    Formula::literal(LiteralValue::Float(0.9)),
                ],
            ),
        )
    }

    #[test]
    fn get_navigates_by_position() {
        let formula = sample();
        assert!(NodeHierarchyIndex::root().is_root());
        let index = NodeHierarchyIndex::new(vec![1]);
        assert!(!index.is_root());
        assert_eq!(
            index.get(&formula).map(|node| node.to_string()),
            Some("QUANTILE([a], 0.9)".to_string())
        );
        let index = NodeHierarchyIndex::new(vec![1, 1]);
        assert_eq!(
            index.get(&formula).map(|node| node.to_string()),
            Some("0.9".to_string())
        );
        assert!(NodeHierarchyIndex::new(vec![2]).get(&formula).is_none());
    }

    #[test]
    fn replace_swaps_exactly_one_subtree() {
        let formula = sample();
        let replaced = replace_at(
            formula,
            &NodeHierarchyIndex::new(vec![1]),
            Formula::field("res_0"),
        )
        .unwrap();
        assert_eq!(replaced.to_string(), "SUM([a]) + [res_0]");
    }

    #[test]
    fn replace_at_root_returns_replacement() {
        let replaced = replace_at(
            sample(),
            &NodeHierarchyIndex::root(),
            Formula::field("whole"),
        )
        .unwrap();
        assert_eq!(replaced.to_string(), "[whole]");
    }

    #[test]
    fn replace_with_bad_path_is_an_error() {
        let result = replace_at(
            sample(),
            &NodeHierarchyIndex::new(vec![0, 5]),
            Formula::null(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn overlap_is_prefix_relation() {
        let a = NodeHierarchyIndex::new(vec![0]);
        let b = NodeHierarchyIndex::new(vec![0, 1]);
        let c = NodeHierarchyIndex::new(vec![1]);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(a.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn children_cover_lod_dims() {
        let mut call = match Formula::func("sum", vec![Formula::field("sales")]).kind {
            FormulaItem::Call(call) => call,
            _ => unreachable!(),
        };
        call.lod = Some(LodSpecifier {
            kind: LodKind::Fixed,
            dims: vec![Formula::field("city")],
        });
        let formula = Formula::new(FormulaItem::Call(call));
        let kids = children(&formula);
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[1].to_string(), "[city]");
    }
}
