use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::ir::datatype::DataType;
use crate::span::Span;

/// A formula expression: one AST node plus the source span it came from.
///
/// Structural identity deliberately ignores the span, so the same
/// sub-expression appearing in several fields hashes and compares equal.
/// Translation memoization and split-mask bookkeeping rely on this.
#[derive(Clone, Serialize, Deserialize)]
pub struct Formula {
    pub kind: FormulaItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Debug, EnumAsInner, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum::AsRefStr)]
pub enum FormulaItem {
    /// Reference to a dataset field by title or guid.
    Field(FieldRef),
    Literal(Literal),
    Null,
    /// Argument list for membership operations; never a value on its own.
    ExpressionList(Vec<Formula>),
    Call(OperationCall),
    CaseBlock(CaseBlock),
    IfBlock(IfBlock),
    Parenthesized(Box<Formula>),
    /// Sub-expression that must be evaluated against a separate, joined query.
    Fork(QueryFork),
    /// Marker a rewrite pass leaves in place of a subtree it rejected.
    /// Translating the marker raises the recorded error, so only queries
    /// that still use the subtree fail.
    ErrorNode(ErrorMarker),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorMarker {
    pub message: String,
    // Codes are static registry constants; markers are built internally and
    // never deserialized from outside, so dropping the code there is fine.
    #[serde(skip_deserializing)]
    pub code: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Literal {
    pub value: LiteralValue,
}

impl Literal {
    pub fn data_type(&self) -> DataType {
        self.value.data_type()
    }
}

#[derive(Debug, EnumAsInner, Clone, PartialEq, Serialize, Deserialize, strum::AsRefStr)]
pub enum LiteralValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    Datetime(NaiveDateTime),
    /// Timezone-aware datetime, stored wall-clock after offset normalization.
    Genericdatetime(NaiveDateTime),
    Uuid(String),
    Geopoint(String),
    Geopolygon(String),
    Markup(String),
}

// Float(f64) blocks deriving Eq and Hash. Literal floats come from parsed
// source text and are never NaN, so bit-level equality is the right
// structural identity here.
impl Eq for LiteralValue {}

impl std::hash::Hash for LiteralValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            LiteralValue::Boolean(v) => v.hash(state),
            LiteralValue::Integer(v) => v.hash(state),
            LiteralValue::Float(v) => v.to_bits().hash(state),
            LiteralValue::String(v)
            | LiteralValue::Uuid(v)
            | LiteralValue::Geopoint(v)
            | LiteralValue::Geopolygon(v)
            | LiteralValue::Markup(v) => v.hash(state),
            LiteralValue::Date(v) => v.hash(state),
            LiteralValue::Datetime(v) | LiteralValue::Genericdatetime(v) => v.hash(state),
        }
    }
}

impl LiteralValue {
    /// Literals are always const-typed.
    pub fn data_type(&self) -> DataType {
        match self {
            LiteralValue::Boolean(_) => DataType::CONST_BOOLEAN,
            LiteralValue::Integer(_) => DataType::CONST_INTEGER,
            LiteralValue::Float(_) => DataType::CONST_FLOAT,
            LiteralValue::String(_) => DataType::CONST_STRING,
            LiteralValue::Date(_) => DataType::CONST_DATE,
            LiteralValue::Datetime(_) => DataType::CONST_DATETIME,
            LiteralValue::Genericdatetime(_) => DataType::CONST_GENERICDATETIME,
            LiteralValue::Uuid(_) => DataType::CONST_UUID,
            LiteralValue::Geopoint(_) => DataType::CONST_GEOPOINT,
            LiteralValue::Geopolygon(_) => DataType::CONST_GEOPOLYGON,
            LiteralValue::Markup(_) => DataType::CONST_MARKUP,
        }
    }
}

/// The syntactic shape of an operation call. Registry resolution only cares
/// about the name and window-ness; the shape drives rendering and join
/// condition handling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum::AsRefStr)]
pub enum CallShape {
    Unary,
    Binary,
    Ternary,
    Function,
    Window(WindowSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationCall {
    pub name: String,
    pub args: Vec<Formula>,
    pub shape: CallShape,
    /// Explicit dimensional scope of an aggregation, overriding the ambient
    /// grouping. Only meaningful on aggregate function calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lod: Option<LodSpecifier>,
    /// Filter ids this aggregation must be computed before applying.
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub before_filter_by: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowSpec {
    pub grouping: WindowGrouping,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ordering: Vec<OrderingItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum::AsRefStr)]
pub enum WindowGrouping {
    /// Whole result set is one window partition.
    Total,
    /// Partition by the listed dimensions.
    Within(Vec<Formula>),
    /// Partition by all dimensions except the listed ones.
    Among(Vec<Formula>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderingItem {
    pub expr: Formula,
    pub direction: OrderDirection,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, Default,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn reversed(self) -> OrderDirection {
        match self {
            OrderDirection::Asc => OrderDirection::Desc,
            OrderDirection::Desc => OrderDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum LodKind {
    Fixed,
    Include,
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LodSpecifier {
    pub kind: LodKind,
    pub dims: Vec<Formula>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaseBlock {
    pub case_expr: Box<Formula>,
    pub when_parts: Vec<WhenPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub else_part: Option<Box<Formula>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WhenPart {
    pub val: Formula,
    pub expr: Formula,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IfBlock {
    pub if_parts: Vec<IfPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub else_part: Option<Box<Formula>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IfPart {
    pub cond: Formula,
    pub expr: Formula,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

/// Operators allowed in fork join conditions, mapped to the internal
/// comparison operations the condition compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryJoinOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl BinaryJoinOperator {
    pub fn operation_name(self) -> &'static str {
        match self {
            BinaryJoinOperator::Eq => "_==",
            BinaryJoinOperator::Ne => "_!=",
            BinaryJoinOperator::Gt => ">",
            BinaryJoinOperator::Gte => ">=",
            BinaryJoinOperator::Lt => "<",
            BinaryJoinOperator::Lte => "<=",
        }
    }
}

#[derive(Debug, EnumAsInner, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinConditionNode {
    /// `expr` evaluated in the outer query equals the same `expr` evaluated
    /// in the forked query. The common case for dimension joins.
    SelfEquality { expr: Formula },
    /// Outer `expr` compared against the forked `fork_expr`.
    Binary {
        operator: BinaryJoinOperator,
        expr: Formula,
        fork_expr: Formula,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryFork {
    pub join_type: JoinType,
    pub joining: Vec<JoinConditionNode>,
    pub result_expr: Box<Formula>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lod: Option<LodSpecifier>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub before_filter_by: BTreeSet<String>,
}

impl Formula {
    pub fn new(kind: FormulaItem) -> Self {
        Formula { kind, span: None }
    }

    pub fn with_span(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }

    pub fn field<S: Into<String>>(name: S) -> Self {
        Formula::new(FormulaItem::Field(FieldRef { name: name.into() }))
    }

    pub fn literal(value: LiteralValue) -> Self {
        Formula::new(FormulaItem::Literal(Literal { value }))
    }

    pub fn null() -> Self {
        Formula::new(FormulaItem::Null)
    }

    pub fn expression_list(items: Vec<Formula>) -> Self {
        Formula::new(FormulaItem::ExpressionList(items))
    }

    pub fn unary<S: Into<String>>(name: S, arg: Formula) -> Self {
        Formula::call(name, vec![arg], CallShape::Unary)
    }

    pub fn binary<S: Into<String>>(name: S, left: Formula, right: Formula) -> Self {
        Formula::call(name, vec![left, right], CallShape::Binary)
    }

    pub fn ternary<S: Into<String>>(name: S, args: Vec<Formula>) -> Self {
        Formula::call(name, args, CallShape::Ternary)
    }

    pub fn func<S: Into<String>>(name: S, args: Vec<Formula>) -> Self {
        Formula::call(name, args, CallShape::Function)
    }

    pub fn call<S: Into<String>>(name: S, args: Vec<Formula>, shape: CallShape) -> Self {
        Formula::new(FormulaItem::Call(OperationCall {
            name: name.into(),
            args,
            shape,
            lod: None,
            before_filter_by: BTreeSet::new(),
        }))
    }

    pub fn parenthesized(inner: Formula) -> Self {
        Formula::new(FormulaItem::Parenthesized(Box::new(inner)))
    }

    pub fn error_node<S: Into<String>>(message: S, code: &'static str) -> Self {
        Formula::new(FormulaItem::ErrorNode(ErrorMarker {
            message: message.into(),
            code: Some(code),
        }))
    }

    /// Chains `items` into a binary tree with the given operation,
    /// left-associative. Each combined node spans both operands. Empty input
    /// is a caller bug.
    pub fn chained<S: Into<String> + Clone>(name: S, items: Vec<Formula>) -> Option<Formula> {
        items.into_iter().reduce(|acc, item| {
            let span = Span::merge_opt(acc.span, item.span);
            Formula::binary(name.clone(), acc, item).with_span(span)
        })
    }
}

impl PartialEq for Formula {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for Formula {}

impl std::hash::Hash for Formula {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl std::fmt::Debug for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.span {
            Some(span) => write!(f, "{:?} @{span:?}", self.kind),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiteralValue::Boolean(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            LiteralValue::Integer(v) => write!(f, "{v}"),
            LiteralValue::Float(v) => write!(f, "{v}"),
            LiteralValue::String(v) => write!(f, "\"{v}\""),
            LiteralValue::Date(v) => write!(f, "#{v}#"),
            LiteralValue::Datetime(v) | LiteralValue::Genericdatetime(v) => {
                write!(f, "#{}#", v.format("%Y-%m-%d %H:%M:%S"))
            }
            LiteralValue::Uuid(v)
            | LiteralValue::Geopoint(v)
            | LiteralValue::Geopolygon(v)
            | LiteralValue::Markup(v) => write!(f, "\"{v}\""),
        }
    }
}

fn fmt_args(f: &mut std::fmt::Formatter<'_>, args: &[Formula]) -> std::fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

/// Renders the formula back in source-like syntax. Used by error messages
/// and test snapshots; not guaranteed to re-parse.
impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            FormulaItem::Field(field) => write!(f, "[{}]", field.name),
            FormulaItem::Literal(lit) => write!(f, "{}", lit.value),
            FormulaItem::Null => write!(f, "NULL"),
            FormulaItem::ExpressionList(items) => {
                write!(f, "(")?;
                fmt_args(f, items)?;
                write!(f, ")")
            }
            FormulaItem::Call(call) => {
                match &call.shape {
                    CallShape::Unary => {
                        write!(f, "{}({})", call.name.to_uppercase(), call.args[0])?
                    }
                    CallShape::Binary => {
                        write!(f, "{} {} {}", call.args[0], call.name, call.args[1])?
                    }
                    CallShape::Ternary | CallShape::Function => {
                        write!(f, "{}(", call.name.to_uppercase())?;
                        fmt_args(f, &call.args)?;
                        if let Some(lod) = &call.lod {
                            write!(f, " {}", lod.kind)?;
                            if !lod.dims.is_empty() {
                                write!(f, " ")?;
                                fmt_args(f, &lod.dims)?;
                            }
                        }
                        write!(f, ")")?;
                    }
                    CallShape::Window(spec) => {
                        write!(f, "{}(", call.name.to_uppercase())?;
                        fmt_args(f, &call.args)?;
                        match &spec.grouping {
                            WindowGrouping::Total => write!(f, " TOTAL")?,
                            WindowGrouping::Within(dims) => {
                                write!(f, " WITHIN ")?;
                                fmt_args(f, dims)?;
                            }
                            WindowGrouping::Among(dims) => {
                                write!(f, " AMONG ")?;
                                fmt_args(f, dims)?;
                            }
                        }
                        write!(f, ")")?;
                    }
                }
                Ok(())
            }
            FormulaItem::CaseBlock(case) => {
                write!(f, "CASE {}", case.case_expr)?;
                for part in &case.when_parts {
                    write!(f, " WHEN {} THEN {}", part.val, part.expr)?;
                }
                if let Some(else_part) = &case.else_part {
                    write!(f, " ELSE {else_part}")?;
                }
                write!(f, " END")
            }
            FormulaItem::IfBlock(block) => {
                for (i, part) in block.if_parts.iter().enumerate() {
                    let kw = if i == 0 { "IF" } else { "ELSEIF" };
                    write!(f, "{kw} {} THEN {}", part.cond, part.expr)?;
                    write!(f, " ")?;
                }
                if let Some(else_part) = &block.else_part {
                    write!(f, "ELSE {else_part} ")?;
                }
                write!(f, "END")
            }
            FormulaItem::Parenthesized(inner) => write!(f, "({inner})"),
            FormulaItem::Fork(fork) => {
                write!(f, "FORK[{}]({}", fork.join_type, fork.result_expr)?;
                for cond in &fork.joining {
                    match cond {
                        JoinConditionNode::SelfEquality { expr } => write!(f, " ON {expr}")?,
                        JoinConditionNode::Binary {
                            operator,
                            expr,
                            fork_expr,
                        } => write!(f, " ON {expr} {} {fork_expr}", operator.operation_name())?,
                    }
                }
                write!(f, ")")
            }
            FormulaItem::ErrorNode(marker) => write!(f, "#ERR({})", marker.message),
        }
    }
}
