use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::nodes::*;

/// A canonical, ordered digest of a formula subtree.
///
/// Two formulas have equal extracts iff they are structurally identical,
/// ignoring spans and parentheses. Unlike [`Formula`] itself this is totally
/// ordered, so extracts can live in sorted sets; the splitter compares
/// dimension lists as sets of extracts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeExtract(String);

impl NodeExtract {
    pub fn of(formula: &Formula) -> NodeExtract {
        let mut out = String::new();
        write_formula(formula, &mut out);
        NodeExtract(out)
    }

    pub fn of_many<'a, I: IntoIterator<Item = &'a Formula>>(formulas: I) -> BTreeSet<NodeExtract> {
        formulas.into_iter().map(NodeExtract::of).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Strings are length-prefixed so that no name or literal can fake the
// structure markers around it.
fn write_str(s: &str, out: &mut String) {
    out.push_str(&format!("{}:{};", s.len(), s));
}

fn write_list(items: &[Formula], out: &mut String) {
    out.push('[');
    for item in items {
        write_formula(item, out);
    }
    out.push(']');
}

fn write_lod(lod: &Option<LodSpecifier>, out: &mut String) {
    match lod {
        None => out.push('-'),
        Some(lod) => {
            out.push_str(match lod.kind {
                LodKind::Fixed => "fixed",
                LodKind::Include => "include",
                LodKind::Exclude => "exclude",
            });
            write_list(&lod.dims, out);
        }
    }
}

fn write_names(names: &BTreeSet<String>, out: &mut String) {
    out.push('{');
    for name in names {
        write_str(name, out);
    }
    out.push('}');
}

fn write_formula(formula: &Formula, out: &mut String) {
    match &formula.kind {
        FormulaItem::Field(field) => {
            out.push_str("fld(");
            write_str(&field.name, out);
            out.push(')');
        }
        FormulaItem::Literal(lit) => {
            out.push_str("lit(");
            write_str(lit.value.as_ref(), out);
            write_str(&lit.value.to_string(), out);
            out.push(')');
        }
        FormulaItem::Null => out.push_str("null"),
        FormulaItem::ExpressionList(items) => {
            out.push_str("list(");
            write_list(items, out);
            out.push(')');
        }
        FormulaItem::Call(call) => {
            out.push_str("call(");
            write_str(&call.name, out);
            match &call.shape {
                CallShape::Unary => out.push_str("un"),
                CallShape::Binary => out.push_str("bin"),
                CallShape::Ternary => out.push_str("tern"),
                CallShape::Function => out.push_str("fn"),
                CallShape::Window(spec) => {
                    out.push_str("win:");
                    match &spec.grouping {
                        WindowGrouping::Total => out.push_str("total"),
                        WindowGrouping::Within(dims) => {
                            out.push_str("within");
                            write_list(dims, out);
                        }
                        WindowGrouping::Among(dims) => {
                            out.push_str("among");
                            write_list(dims, out);
                        }
                    }
                    out.push('<');
                    for item in &spec.ordering {
                        write_formula(&item.expr, out);
                        out.push_str(match item.direction {
                            OrderDirection::Asc => "a",
                            OrderDirection::Desc => "d",
                        });
                    }
                    out.push('>');
                }
            }
            write_list(&call.args, out);
            write_lod(&call.lod, out);
            write_names(&call.before_filter_by, out);
            out.push(')');
        }
        FormulaItem::CaseBlock(case) => {
            out.push_str("case(");
            write_formula(&case.case_expr, out);
            for part in &case.when_parts {
                out.push('?');
                write_formula(&part.val, out);
                write_formula(&part.expr, out);
            }
            if let Some(else_part) = &case.else_part {
                out.push('!');
                write_formula(else_part, out);
            }
            out.push(')');
        }
        FormulaItem::IfBlock(block) => {
            out.push_str("if(");
            for part in &block.if_parts {
                out.push('?');
                write_formula(&part.cond, out);
                write_formula(&part.expr, out);
            }
            if let Some(else_part) = &block.else_part {
                out.push('!');
                write_formula(else_part, out);
            }
            out.push(')');
        }
        FormulaItem::Parenthesized(inner) => {
            // Parentheses are semantically transparent.
            write_formula(inner, out);
        }
        FormulaItem::Fork(fork) => {
            out.push_str("fork(");
            write_str(&fork.join_type.to_string(), out);
            write_formula(&fork.result_expr, out);
            for cond in &fork.joining {
                match cond {
                    JoinConditionNode::SelfEquality { expr } => {
                        out.push_str("self:");
                        write_formula(expr, out);
                    }
                    JoinConditionNode::Binary {
                        operator,
                        expr,
                        fork_expr,
                    } => {
                        write_str(operator.operation_name(), out);
                        write_formula(expr, out);
                        write_formula(fork_expr, out);
                    }
                }
            }
            write_lod(&fork.lod, out);
            write_names(&fork.before_filter_by, out);
            out.push(')');
        }
        FormulaItem::ErrorNode(marker) => {
            out.push_str("err(");
            write_str(&marker.message, out);
            out.push(')');
        }
    }
}
