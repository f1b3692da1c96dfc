//! Backend expression tree: the translator's output.
//!
//! A [`BackendExpr`] has every operation resolved to its concrete dialect
//! spelling and every implicit cast made explicit. Rendering it into final
//! statement text is the per-dialect renderer's job; the `Display` impl
//! here produces generic SQL used for diagnostics, logs and tests.

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::ir::ast::{LiteralValue, OrderDirection};

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner, Serialize, Deserialize)]
pub enum BackendExpr {
    Literal(LiteralValue),
    Null,
    ColumnRef {
        table_alias: Option<String>,
        column: String,
    },
    Func {
        name: String,
        args: Vec<BackendExpr>,
        distinct: bool,
    },
    /// Parenthesized expression list, as produced for IN right-hand sides.
    Tuple(Vec<BackendExpr>),
    Binary {
        op: String,
        left: Box<BackendExpr>,
        right: Box<BackendExpr>,
    },
    /// Prefix operator (`NOT x`, `-x`).
    Unary {
        op: String,
        expr: Box<BackendExpr>,
    },
    /// Postfix operator (`x IS NULL`).
    Postfix {
        op: String,
        expr: Box<BackendExpr>,
    },
    Cast {
        expr: Box<BackendExpr>,
        to: String,
    },
    Case {
        value: Option<Box<BackendExpr>>,
        whens: Vec<CaseWhen>,
        else_result: Option<Box<BackendExpr>>,
    },
    Window {
        name: String,
        args: Vec<BackendExpr>,
        partition_by: Vec<BackendExpr>,
        order_by: Vec<OrderItem>,
    },
    InList {
        expr: Box<BackendExpr>,
        list: Vec<BackendExpr>,
        negated: bool,
    },
    Between {
        expr: Box<BackendExpr>,
        low: Box<BackendExpr>,
        high: Box<BackendExpr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseWhen {
    pub condition: BackendExpr,
    pub result: BackendExpr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub expr: BackendExpr,
    pub direction: OrderDirection,
}

impl BackendExpr {
    pub fn column<S: Into<String>>(table_alias: Option<String>, column: S) -> Self {
        BackendExpr::ColumnRef {
            table_alias,
            column: column.into(),
        }
    }

    pub fn func<S: Into<String>>(name: S, args: Vec<BackendExpr>) -> Self {
        BackendExpr::Func {
            name: name.into(),
            args,
            distinct: false,
        }
    }

    pub fn func_distinct<S: Into<String>>(name: S, args: Vec<BackendExpr>) -> Self {
        BackendExpr::Func {
            name: name.into(),
            args,
            distinct: true,
        }
    }

    pub fn binary<S: Into<String>>(op: S, left: BackendExpr, right: BackendExpr) -> Self {
        BackendExpr::Binary {
            op: op.into(),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary<S: Into<String>>(op: S, expr: BackendExpr) -> Self {
        BackendExpr::Unary {
            op: op.into(),
            expr: Box::new(expr),
        }
    }

    pub fn postfix<S: Into<String>>(op: S, expr: BackendExpr) -> Self {
        BackendExpr::Postfix {
            op: op.into(),
            expr: Box::new(expr),
        }
    }

    pub fn cast<S: Into<String>>(expr: BackendExpr, to: S) -> Self {
        BackendExpr::Cast {
            expr: Box::new(expr),
            to: to.into(),
        }
    }
}

fn write_literal(f: &mut std::fmt::Formatter<'_>, value: &LiteralValue) -> std::fmt::Result {
    match value {
        LiteralValue::Boolean(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
        LiteralValue::Integer(v) => write!(f, "{v}"),
        LiteralValue::Float(v) => write!(f, "{v}"),
        LiteralValue::String(v)
        | LiteralValue::Uuid(v)
        | LiteralValue::Geopoint(v)
        | LiteralValue::Geopolygon(v)
        | LiteralValue::Markup(v) => write!(f, "'{}'", v.replace('\'', "''")),
        LiteralValue::Date(v) => write!(f, "DATE '{v}'"),
        LiteralValue::Datetime(v) | LiteralValue::Genericdatetime(v) => {
            write!(f, "TIMESTAMP '{}'", v.format("%Y-%m-%d %H:%M:%S"))
        }
    }
}

fn write_list(f: &mut std::fmt::Formatter<'_>, items: &[BackendExpr]) -> std::fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl std::fmt::Display for BackendExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendExpr::Literal(value) => write_literal(f, value),
            BackendExpr::Null => write!(f, "NULL"),
            BackendExpr::ColumnRef {
                table_alias,
                column,
            } => match table_alias {
                Some(alias) => write!(f, "{alias}.{column}"),
                None => write!(f, "{column}"),
            },
            BackendExpr::Func {
                name,
                args,
                distinct,
            } => {
                write!(f, "{name}(")?;
                if *distinct {
                    write!(f, "DISTINCT ")?;
                }
                write_list(f, args)?;
                write!(f, ")")
            }
            BackendExpr::Tuple(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                write!(f, ")")
            }
            BackendExpr::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            BackendExpr::Unary { op, expr } => write!(f, "({op} {expr})"),
            BackendExpr::Postfix { op, expr } => write!(f, "({expr} {op})"),
            BackendExpr::Cast { expr, to } => write!(f, "CAST({expr} AS {to})"),
            BackendExpr::Case {
                value,
                whens,
                else_result,
            } => {
                write!(f, "CASE")?;
                if let Some(value) = value {
                    write!(f, " {value}")?;
                }
                for when in whens {
                    write!(f, " WHEN {} THEN {}", when.condition, when.result)?;
                }
                if let Some(else_result) = else_result {
                    write!(f, " ELSE {else_result}")?;
                }
                write!(f, " END")
            }
            BackendExpr::Window {
                name,
                args,
                partition_by,
                order_by,
            } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                write!(f, ") OVER (")?;
                if !partition_by.is_empty() {
                    write!(f, "PARTITION BY ")?;
                    write_list(f, partition_by)?;
                }
                if !order_by.is_empty() {
                    if !partition_by.is_empty() {
                        write!(f, " ")?;
                    }
                    write!(f, "ORDER BY ")?;
                    for (i, item) in order_by.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{} {}", item.expr, item.direction)?;
                    }
                }
                write!(f, ")")
            }
            BackendExpr::InList {
                expr,
                list,
                negated,
            } => {
                let op = if *negated { "NOT IN" } else { "IN" };
                write!(f, "({expr} {op} (")?;
                write_list(f, list)?;
                write!(f, "))")
            }
            BackendExpr::Between { expr, low, high } => {
                write!(f, "({expr} BETWEEN {low} AND {high})")
            }
        }
    }
}
