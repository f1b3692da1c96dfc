//! Formula translation: post-order walk from AST to backend expression.
//!
//! A [`Translator`] is created once per (query, dialect) pass and reused for
//! every formula in it, so sub-expressions shared between result fields are
//! translated once. It holds no shared mutable state beyond the borrowed
//! registry and can run concurrently with translators for other dialects.

use std::collections::{BTreeSet, HashMap};

use crate::error::{codes, Error, Reason, Result, WithErrorInfo};
use crate::ir::ast::{
    CallShape, CaseBlock, Formula, FormulaItem, IfBlock, LiteralValue, NodeExtract, OperationCall,
    WindowGrouping, WindowSpec,
};
use crate::ir::datatype::{DataType, DataTypeKind};
use crate::registry::{ImplementationInput, OperationRegistry, ScopeSet, WindowParts};
use crate::span::Span;
use crate::translate::backend::{BackendExpr, CaseWhen, OrderItem};
use crate::translate::dialect::Dialect;

/// Everything a translation pass needs to know about its surroundings.
/// Constructed once per compile, fully populated, and passed by reference.
#[derive(Debug, Clone)]
pub struct TranslationEnvironment {
    pub dialect: Dialect,
    pub required_scopes: ScopeSet,
    /// Field name exactly as it appears in `Field` nodes, to its data type.
    pub field_types: HashMap<String, DataType>,
    /// Field name to user-facing title, for diagnostics only.
    pub field_names: HashMap<String, String>,
    /// Avatar id to the short alias assigned by the level translator.
    /// Fields qualified with an unmapped avatar keep the raw id.
    pub avatar_aliases: HashMap<String, String>,
    /// When false, an unknown field degrades to a typed NULL plus a warning
    /// instead of failing. Validation-only compiles use this.
    pub restrict_fields: bool,
    /// When false, an unknown operation name degrades to a bare function
    /// call typed by its arguments.
    pub restrict_funcs: bool,
}

impl TranslationEnvironment {
    pub fn new(dialect: Dialect, field_types: HashMap<String, DataType>) -> Self {
        TranslationEnvironment {
            dialect,
            required_scopes: ScopeSet::EXPLICIT_USAGE,
            field_types,
            field_names: HashMap::new(),
            avatar_aliases: HashMap::new(),
            restrict_fields: true,
            restrict_funcs: true,
        }
    }

    pub fn with_scopes(mut self, required_scopes: ScopeSet) -> Self {
        self.required_scopes = required_scopes;
        self
    }

    pub fn with_avatar_aliases(mut self, avatar_aliases: HashMap<String, String>) -> Self {
        self.avatar_aliases = avatar_aliases;
        self
    }

    /// Unknown fields and functions degrade instead of failing.
    pub fn permissive(mut self) -> Self {
        self.restrict_fields = false;
        self.restrict_funcs = false;
        self
    }
}

pub struct Translator<'a> {
    registry: &'a OperationRegistry,
    env: &'a TranslationEnvironment,
    /// Pre-translated subtrees, consulted before the memo cache. The split
    /// pass parks relocated subtree results here so the cropped outer
    /// formula translates against them.
    replacements: HashMap<NodeExtract, (BackendExpr, DataType)>,
    /// Memo cache for the pass, keyed by structural extract plus the active
    /// scope restriction.
    cache: HashMap<(NodeExtract, ScopeSet), (BackendExpr, DataType)>,
    warnings: Vec<Error>,
}

impl<'a> Translator<'a> {
    pub fn new(registry: &'a OperationRegistry, env: &'a TranslationEnvironment) -> Self {
        Translator {
            registry,
            env,
            replacements: HashMap::new(),
            cache: HashMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn environment(&self) -> &TranslationEnvironment {
        self.env
    }

    /// Registers a pre-translated result for every node structurally equal
    /// to `source`.
    pub fn add_replacement(&mut self, source: &Formula, expr: BackendExpr, data_type: DataType) {
        self.replacements
            .insert(NodeExtract::of(source), (expr, data_type));
    }

    /// Advisory warnings accumulated so far; draining resets the list.
    pub fn take_warnings(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.warnings)
    }

    pub fn translate(&mut self, formula: &Formula) -> Result<(BackendExpr, DataType)> {
        self.translate_scoped(formula, self.env.required_scopes)
    }

    /// Boolean projections get a `CASE WHEN .. THEN 1 ELSE 0` wrapper in
    /// dialects that cannot select a bare predicate. Filters keep the raw
    /// predicate, so this is separate from [`Translator::translate`].
    pub fn coerce_for_projection(&self, expr: BackendExpr, data_type: DataType) -> BackendExpr {
        if data_type.kind == DataTypeKind::Boolean
            && self.env.dialect.handler().requires_bool_wrap_in_projection()
        {
            return BackendExpr::Case {
                value: None,
                whens: vec![CaseWhen {
                    condition: expr,
                    result: BackendExpr::Literal(LiteralValue::Integer(1)),
                }],
                else_result: Some(Box::new(BackendExpr::Literal(LiteralValue::Integer(0)))),
            };
        }
        expr
    }

    fn translate_scoped(
        &mut self,
        formula: &Formula,
        scopes: ScopeSet,
    ) -> Result<(BackendExpr, DataType)> {
        let extract = NodeExtract::of(formula);
        if let Some(found) = self.replacements.get(&extract) {
            return Ok(found.clone());
        }
        let key = (extract, scopes);
        if let Some(found) = self.cache.get(&key) {
            return Ok(found.clone());
        }
        let result = self.translate_item(formula, scopes)?;
        self.cache.insert(key, result.clone());
        Ok(result)
    }

    fn translate_item(
        &mut self,
        formula: &Formula,
        scopes: ScopeSet,
    ) -> Result<(BackendExpr, DataType)> {
        match &formula.kind {
            FormulaItem::Literal(literal) => Ok((
                BackendExpr::Literal(literal.value.clone()),
                literal.data_type(),
            )),
            FormulaItem::Null => Ok((BackendExpr::Null, DataType::NULL)),
            FormulaItem::Field(field) => self.translate_field(&field.name, formula.span),
            FormulaItem::ExpressionList(items) => {
                let mut translated = Vec::with_capacity(items.len());
                let mut item_types = Vec::with_capacity(items.len());
                for item in items {
                    let (expr, data_type) = self.translate_scoped(item, scopes)?;
                    translated.push(expr);
                    item_types.push(data_type);
                }
                Ok((
                    BackendExpr::Tuple(translated),
                    DataType::common_type_of(item_types),
                ))
            }
            FormulaItem::Parenthesized(inner) => self.translate_scoped(inner, scopes),
            FormulaItem::Call(call) => self.translate_call(call, scopes, scopes, formula.span),
            FormulaItem::CaseBlock(case) => {
                let call = desugar_case(case);
                self.translate_call(&call, scopes, ScopeSet::INTERNAL, formula.span)
            }
            FormulaItem::IfBlock(if_block) => {
                let call = desugar_if(if_block);
                self.translate_call(&call, scopes, ScopeSet::INTERNAL, formula.span)
            }
            // Forks are relocated into sub-queries by the split pass; until
            // then a fork types and renders as its result expression.
            FormulaItem::Fork(fork) => self.translate_scoped(&fork.result_expr, scopes),
            FormulaItem::ErrorNode(marker) => {
                let mut error = Error::new_simple(&marker.message).with_span(formula.span);
                error.code = marker.code;
                Err(error)
            }
        }
    }

    fn translate_field(
        &mut self,
        name: &str,
        span: Option<Span>,
    ) -> Result<(BackendExpr, DataType)> {
        let Some(&data_type) = self.env.field_types.get(name) else {
            if self.env.restrict_fields {
                let shown = self
                    .env
                    .field_names
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| name.to_string());
                return Err(Error::new(Reason::NotFound {
                    name: shown,
                    namespace: "field".to_string(),
                })
                .with_code(codes::UNKNOWN_FIELD)
                .with_span(span));
            }
            self.warnings.push(
                Error::new_warning(Reason::Simple(format!(
                    "unknown field [{name}] replaced with NULL"
                )))
                .with_span(span),
            );
            return Ok((BackendExpr::Null, DataType::NULL));
        };
        let (table_alias, column) = match name.split_once('.') {
            Some((avatar, column)) => {
                let alias = self
                    .env
                    .avatar_aliases
                    .get(avatar)
                    .cloned()
                    .unwrap_or_else(|| avatar.to_string());
                (Some(alias), column.to_string())
            }
            None => (None, name.to_string()),
        };
        Ok((BackendExpr::column(table_alias, column), data_type))
    }

    fn translate_call(
        &mut self,
        call: &OperationCall,
        scopes: ScopeSet,
        resolution_scopes: ScopeSet,
        span: Option<Span>,
    ) -> Result<(BackendExpr, DataType)> {
        let mut args = Vec::with_capacity(call.args.len());
        let mut arg_types = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let (expr, data_type) = self.translate_scoped(arg, scopes)?;
            args.push(expr);
            arg_types.push(data_type);
        }
        let (is_window, window) = match &call.shape {
            CallShape::Window(spec) => {
                let parts = self.translate_window_parts(spec, scopes, span)?;
                (true, Some(parts))
            }
            _ => (false, None),
        };

        let registry = self.registry;
        let definition = match registry.get_definition(
            &call.name,
            &arg_types,
            is_window,
            self.env.dialect,
            resolution_scopes,
        ) {
            Ok(definition) => definition,
            Err(error)
                if error.code == Some(codes::UNKNOWN_FUNCTION) && !self.env.restrict_funcs =>
            {
                let return_type =
                    DataType::common_type_of(arg_types.iter().copied()).to_runtime();
                return Ok((BackendExpr::func(call.name.clone(), args), return_type));
            }
            Err(error) => return Err(error.with_span_fallback(span)),
        };

        self.push_dialect_warnings(&call.name, &arg_types, span);

        definition
            .variant
            .transformer
            .apply(&mut args, &mut arg_types);
        let expr = definition
            .implement(ImplementationInput {
                args,
                arg_types,
                dialect: self.env.dialect,
                window,
            })
            .with_span_fallback(span)?;
        Ok((expr, definition.return_type))
    }

    fn translate_window_parts(
        &mut self,
        spec: &WindowSpec,
        scopes: ScopeSet,
        span: Option<Span>,
    ) -> Result<WindowParts> {
        // Partition and ordering expressions are dimensions referenced from
        // inside the window clause, not explicit usages of the fields.
        let window_scopes = scopes.without(ScopeSet::EXPLICIT_USAGE);
        let partition_by = match &spec.grouping {
            WindowGrouping::Total => Vec::new(),
            WindowGrouping::Within(dims) => {
                let mut partition_by = Vec::with_capacity(dims.len());
                for dim in dims {
                    partition_by.push(self.translate_scoped(dim, window_scopes)?.0);
                }
                partition_by
            }
            WindowGrouping::Among(_) => {
                return Err(Error::new_assert(
                    "AMONG grouping must be normalized to WITHIN before translation",
                )
                .with_span_fallback(span));
            }
        };
        let mut order_by = Vec::with_capacity(spec.ordering.len());
        for item in &spec.ordering {
            let (expr, _) = self.translate_scoped(&item.expr, window_scopes)?;
            order_by.push(OrderItem {
                expr,
                direction: item.direction,
            });
        }
        Ok(WindowParts {
            partition_by,
            order_by,
        })
    }

    fn push_dialect_warnings(&mut self, name: &str, arg_types: &[DataType], span: Option<Span>) {
        if name == "%"
            && self.env.dialect.handler().warns_on_negative_float_modulo()
            && arg_types.iter().any(|t| t.kind == DataTypeKind::Float)
        {
            self.warnings.push(
                Error::new_warning(Reason::Simple(format!(
                    "modulo of float values is database-specific for negative operands in dialect {}",
                    self.env.dialect
                )))
                .with_span(span),
            );
        }
    }
}

/// Flattens `CASE subject WHEN v THEN r ... ELSE e END` into the internal
/// `[subject, v, r, ..., e]` call layout; a missing else becomes NULL.
fn desugar_case(case: &CaseBlock) -> OperationCall {
    let mut args = Vec::with_capacity(2 + case.when_parts.len() * 2);
    args.push((*case.case_expr).clone());
    for part in &case.when_parts {
        args.push(part.val.clone());
        args.push(part.expr.clone());
    }
    args.push(else_or_null(case.else_part.as_deref()));
    internal_call("_case_block_", args)
}

/// Flattens `IF c THEN r ... ELSE e END` into `[c, r, ..., e]`.
fn desugar_if(if_block: &IfBlock) -> OperationCall {
    let mut args = Vec::with_capacity(1 + if_block.if_parts.len() * 2);
    for part in &if_block.if_parts {
        args.push(part.cond.clone());
        args.push(part.expr.clone());
    }
    args.push(else_or_null(if_block.else_part.as_deref()));
    internal_call("_if_block_", args)
}

fn else_or_null(else_part: Option<&Formula>) -> Formula {
    else_part.cloned().unwrap_or_else(Formula::null)
}

fn internal_call(name: &str, args: Vec<Formula>) -> OperationCall {
    OperationCall {
        name: name.to_string(),
        args,
        shape: CallShape::Function,
        lod: None,
        before_filter_by: BTreeSet::new(),
    }
}
