/// A trait to "fold" a formula tree (similar to a visitor), so a rewrite pass
/// only defines the arms it cares about and inherits traversal for the rest.
use itertools::Itertools;

use super::nodes::*;
use crate::Result;

// Default behavior lives in free functions so an implementor can override a
// method and still delegate to the stock traversal for the uninteresting
// cases.
pub trait FormulaFold {
    fn fold_formula(&mut self, mut formula: Formula) -> Result<Formula> {
        formula.kind = self.fold_item(formula.kind)?;
        Ok(formula)
    }
    fn fold_formulas(&mut self, formulas: Vec<Formula>) -> Result<Vec<Formula>> {
        formulas
            .into_iter()
            .map(|f| self.fold_formula(f))
            .try_collect()
    }
    fn fold_item(&mut self, item: FormulaItem) -> Result<FormulaItem> {
        fold_item(self, item)
    }
    fn fold_call(&mut self, call: OperationCall) -> Result<OperationCall> {
        fold_call(self, call)
    }
    fn fold_fork(&mut self, fork: QueryFork) -> Result<QueryFork> {
        fold_fork(self, fork)
    }
    fn fold_lod(&mut self, lod: LodSpecifier) -> Result<LodSpecifier> {
        fold_lod(self, lod)
    }
}

pub fn fold_item<F: ?Sized + FormulaFold>(fold: &mut F, item: FormulaItem) -> Result<FormulaItem> {
    Ok(match item {
        FormulaItem::Field(_)
        | FormulaItem::Literal(_)
        | FormulaItem::Null
        | FormulaItem::ErrorNode(_) => item,
        FormulaItem::ExpressionList(items) => {
            FormulaItem::ExpressionList(fold.fold_formulas(items)?)
        }
        FormulaItem::Call(call) => FormulaItem::Call(fold.fold_call(call)?),
        FormulaItem::CaseBlock(case) => FormulaItem::CaseBlock(CaseBlock {
            case_expr: Box::new(fold.fold_formula(*case.case_expr)?),
            when_parts: case
                .when_parts
                .into_iter()
                .map(|part| -> Result<_> {
                    Ok(WhenPart {
                        val: fold.fold_formula(part.val)?,
                        expr: fold.fold_formula(part.expr)?,
                    })
                })
                .try_collect()?,
            else_part: fold_optional_box(fold, case.else_part)?,
        }),
        FormulaItem::IfBlock(block) => FormulaItem::IfBlock(IfBlock {
            if_parts: block
                .if_parts
                .into_iter()
                .map(|part| -> Result<_> {
                    Ok(IfPart {
                        cond: fold.fold_formula(part.cond)?,
                        expr: fold.fold_formula(part.expr)?,
                    })
                })
                .try_collect()?,
            else_part: fold_optional_box(fold, block.else_part)?,
        }),
        FormulaItem::Parenthesized(inner) => {
            FormulaItem::Parenthesized(Box::new(fold.fold_formula(*inner)?))
        }
        FormulaItem::Fork(fork) => FormulaItem::Fork(fold.fold_fork(fork)?),
    })
}

pub fn fold_call<F: ?Sized + FormulaFold>(
    fold: &mut F,
    call: OperationCall,
) -> Result<OperationCall> {
    Ok(OperationCall {
        name: call.name,
        args: fold.fold_formulas(call.args)?,
        shape: match call.shape {
            CallShape::Window(spec) => CallShape::Window(fold_window_spec(fold, spec)?),
            shape => shape,
        },
        lod: call.lod.map(|lod| fold.fold_lod(lod)).transpose()?,
        before_filter_by: call.before_filter_by,
    })
}

pub fn fold_window_spec<F: ?Sized + FormulaFold>(
    fold: &mut F,
    spec: WindowSpec,
) -> Result<WindowSpec> {
    Ok(WindowSpec {
        grouping: match spec.grouping {
            WindowGrouping::Total => WindowGrouping::Total,
            WindowGrouping::Within(dims) => WindowGrouping::Within(fold.fold_formulas(dims)?),
            WindowGrouping::Among(dims) => WindowGrouping::Among(fold.fold_formulas(dims)?),
        },
        ordering: spec
            .ordering
            .into_iter()
            .map(|item| -> Result<_> {
                Ok(OrderingItem {
                    expr: fold.fold_formula(item.expr)?,
                    direction: item.direction,
                })
            })
            .try_collect()?,
    })
}

pub fn fold_fork<F: ?Sized + FormulaFold>(fold: &mut F, fork: QueryFork) -> Result<QueryFork> {
    Ok(QueryFork {
        join_type: fork.join_type,
        joining: fork
            .joining
            .into_iter()
            .map(|cond| fold_join_condition(fold, cond))
            .try_collect()?,
        result_expr: Box::new(fold.fold_formula(*fork.result_expr)?),
        lod: fork.lod.map(|lod| fold.fold_lod(lod)).transpose()?,
        before_filter_by: fork.before_filter_by,
    })
}

pub fn fold_join_condition<F: ?Sized + FormulaFold>(
    fold: &mut F,
    cond: JoinConditionNode,
) -> Result<JoinConditionNode> {
    Ok(match cond {
        JoinConditionNode::SelfEquality { expr } => JoinConditionNode::SelfEquality {
            expr: fold.fold_formula(expr)?,
        },
        JoinConditionNode::Binary {
            operator,
            expr,
            fork_expr,
        } => JoinConditionNode::Binary {
            operator,
            expr: fold.fold_formula(expr)?,
            fork_expr: fold.fold_formula(fork_expr)?,
        },
    })
}

pub fn fold_lod<F: ?Sized + FormulaFold>(fold: &mut F, lod: LodSpecifier) -> Result<LodSpecifier> {
    Ok(LodSpecifier {
        kind: lod.kind,
        dims: fold.fold_formulas(lod.dims)?,
    })
}

/// Helper
pub fn fold_optional_box<F: ?Sized + FormulaFold>(
    fold: &mut F,
    opt: Option<Box<Formula>>,
) -> Result<Option<Box<Formula>>> {
    Ok(match opt {
        Some(f) => Some(Box::new(fold.fold_formula(*f)?)),
        None => None,
    })
}

/// Returns the same tree with every span removed.
pub fn strip_spans(formula: Formula) -> Formula {
    struct SpanStripper;
    impl FormulaFold for SpanStripper {
        fn fold_formula(&mut self, mut formula: Formula) -> Result<Formula> {
            formula.span = None;
            formula.kind = self.fold_item(formula.kind)?;
            Ok(formula)
        }
    }
    // SpanStripper itself never fails.
    match SpanStripper.fold_formula(formula) {
        Ok(stripped) => stripped,
        Err(_) => unreachable!("span stripping is infallible"),
    }
}
