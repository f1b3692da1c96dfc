//! Operation registry: every callable operation as an ordered set of
//! dialect- and type-scoped variants.
//!
//! The registry is built once at startup and shared immutably by every
//! translator; resolution never mutates it. Operation availability per
//! dialect — the question the level splitter asks — is answered here too,
//! by the same candidate filter the translator uses.

mod matcher;
mod returns;
mod scope;
mod stdlib;

use std::collections::HashMap;

use itertools::Itertools;
pub use matcher::{ArgTypeMatcher, TypeSlot};
pub use returns::ReturnTypeStrategy;
pub use scope::ScopeSet;

use serde::{Deserialize, Serialize};

use crate::error::{codes, Error, Reason, Result, WithErrorInfo};
use crate::ir::ast::{inspect, CallShape, Formula, FormulaItem};
use crate::ir::datatype::DataType;
use crate::translate::backend::{BackendExpr, OrderItem};
use crate::translate::dialect::{Dialect, DialectSet};

/// Window clause parts, translated by the caller before dispatch.
#[derive(Debug, Clone, Default)]
pub struct WindowParts {
    pub partition_by: Vec<BackendExpr>,
    pub order_by: Vec<OrderItem>,
}

/// Everything a variant implementation receives: arguments are already
/// translated and transformed.
#[derive(Debug, Clone)]
pub struct ImplementationInput {
    pub args: Vec<BackendExpr>,
    pub arg_types: Vec<DataType>,
    pub dialect: Dialect,
    pub window: Option<WindowParts>,
}

impl ImplementationInput {
    /// Consumes the n-th argument; arguments are taken left to right.
    pub fn arg(&mut self, position: usize) -> BackendExpr {
        std::mem::replace(&mut self.args[position], BackendExpr::Null)
    }
}

pub type VariantImpl = Box<dyn Fn(ImplementationInput) -> Result<BackendExpr> + Send + Sync>;

/// Rewrites the argument list after a variant is chosen, before its
/// implementation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ArgTransformer {
    #[default]
    Identity,
    /// Swaps two arguments so the non-constant one comes first. Lets
    /// commutative date+number variants assume the temporal operand's
    /// position.
    NonConstFirst,
    Reverse,
}

impl ArgTransformer {
    pub fn apply(&self, args: &mut Vec<BackendExpr>, arg_types: &mut Vec<DataType>) {
        match self {
            ArgTransformer::Identity => {}
            ArgTransformer::NonConstFirst => {
                if arg_types.len() == 2 && arg_types[0].is_const && !arg_types[1].is_const {
                    args.swap(0, 1);
                    arg_types.swap(0, 1);
                }
            }
            ArgTransformer::Reverse => {
                args.reverse();
                arg_types.reverse();
            }
        }
    }
}

/// One overload of an operation.
pub struct TranslationVariant {
    pub dialects: DialectSet,
    pub matcher: ArgTypeMatcher,
    pub transformer: ArgTransformer,
    pub returns: ReturnTypeStrategy,
    pub implement: VariantImpl,
    pub scopes: ScopeSet,
    pub is_window: bool,
    pub is_aggregation: bool,
}

impl TranslationVariant {
    pub fn new(
        matcher: ArgTypeMatcher,
        returns: ReturnTypeStrategy,
        implement: VariantImpl,
    ) -> Self {
        TranslationVariant {
            dialects: DialectSet::ALL,
            matcher,
            transformer: ArgTransformer::Identity,
            returns,
            implement,
            scopes: ScopeSet::STANDARD,
            is_window: false,
            is_aggregation: false,
        }
    }

    pub fn with_dialects(mut self, dialects: DialectSet) -> Self {
        self.dialects = dialects;
        self
    }

    pub fn with_scopes(mut self, scopes: ScopeSet) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_transformer(mut self, transformer: ArgTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn as_window(mut self) -> Self {
        self.is_window = true;
        self
    }

    pub fn as_aggregation(mut self) -> Self {
        self.is_aggregation = true;
        self
    }
}

impl std::fmt::Debug for TranslationVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationVariant")
            .field("matcher", &self.matcher)
            .field("returns", &self.returns)
            .field("is_window", &self.is_window)
            .field("is_aggregation", &self.is_aggregation)
            .finish_non_exhaustive()
    }
}

/// A resolved overload: the winning variant plus its inferred result type.
#[derive(Debug)]
pub struct Definition<'r> {
    pub variant: &'r TranslationVariant,
    pub return_type: DataType,
}

impl Definition<'_> {
    pub fn implement(&self, input: ImplementationInput) -> Result<BackendExpr> {
        (self.variant.implement)(input)
    }
}

/// Operation names are case-insensitive; `SUM`, `Sum` and `sum` resolve to
/// the same entry.
fn normalized(name: &str) -> String {
    name.to_ascii_lowercase()
}

#[derive(Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Vec<TranslationVariant>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full standard operation library.
    pub fn standard() -> Self {
        stdlib::standard()
    }

    pub fn register(&mut self, name: &str, variant: TranslationVariant) {
        self.operations
            .entry(normalized(name))
            .or_default()
            .push(variant);
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(&normalized(name))
    }

    pub fn is_aggregation(&self, name: &str) -> bool {
        self.operations
            .get(&normalized(name))
            .is_some_and(|variants| variants.iter().any(|v| v.is_aggregation))
    }

    /// Whether any variant of the operation exists for this dialect and
    /// context, regardless of argument types. The level splitter uses this
    /// to decide what cannot stay on the assigned level.
    pub fn is_available(
        &self,
        name: &str,
        is_window: bool,
        dialect: Dialect,
        required_scopes: ScopeSet,
    ) -> bool {
        self.operations.get(&normalized(name)).is_some_and(|variants| {
            variants.iter().any(|v| {
                v.is_window == is_window
                    && v.dialects.contains(dialect)
                    && v.scopes.covers(required_scopes)
            })
        })
    }

    /// Resolves an operation call to a single variant.
    ///
    /// Candidates are filtered by window-ness, dialect membership, scope
    /// cover and the argument matcher; among survivors the most specific
    /// signature wins, with registration order breaking ties. Resolution is
    /// deterministic for a fixed registry.
    pub fn get_definition(
        &self,
        name: &str,
        arg_types: &[DataType],
        is_window: bool,
        dialect: Dialect,
        required_scopes: ScopeSet,
    ) -> Result<Definition<'_>> {
        let Some(variants) = self.operations.get(&normalized(name)) else {
            return Err(Error::new(Reason::NotFound {
                name: name.to_uppercase(),
                namespace: "function".to_string(),
            })
            .with_code(codes::UNKNOWN_FUNCTION));
        };

        let window_compatible = variants.iter().filter(|v| v.is_window == is_window);
        let chosen = window_compatible
            .enumerate()
            .filter(|(_, v)| v.dialects.contains(dialect))
            .filter(|(_, v)| v.scopes.covers(required_scopes))
            .filter(|(_, v)| v.matcher.matches(arg_types))
            .min_by_key(|(order, v)| {
                (std::cmp::Reverse(v.matcher.specificity(arg_types)), *order)
            })
            .map(|(_, v)| v);

        let Some(variant) = chosen else {
            if !variants.iter().any(|v| v.is_window == is_window) {
                let reason = if is_window {
                    format!("function {} is not a window function", name.to_uppercase())
                } else {
                    format!(
                        "window function {} requires a window clause",
                        name.to_uppercase()
                    )
                };
                return Err(Error::new_simple(reason).with_code(codes::WRONG_ARGUMENT_TYPES));
            }
            return Err(Error::new(Reason::Expected {
                who: Some(format!("function {}", name.to_uppercase())),
                expected: format!("a supported argument signature in dialect {dialect}"),
                found: format!("({})", arg_types.iter().map(|t| t.to_string()).join(", ")),
            })
            .with_code(codes::WRONG_ARGUMENT_TYPES));
        };

        Ok(Definition {
            variant,
            return_type: variant.returns.infer(arg_types)?,
        })
    }

    /// True when the formula cannot depend on any row: no field references,
    /// no forks, no window calls, no aggregations, no dimensional scope.
    /// Such expressions may be folded to a literal without changing the
    /// translated result.
    pub fn is_constant_expression(&self, formula: &Formula) -> bool {
        inspect::walk(formula).iter().all(|node| match &node.kind {
            FormulaItem::Field(_) | FormulaItem::Fork(_) => false,
            FormulaItem::Call(call) => {
                !matches!(call.shape, CallShape::Window(_))
                    && call.lod.is_none()
                    && !self.is_aggregation(&call.name)
            }
            _ => true,
        })
    }

    /// True when any part of the formula collapses rows: an aggregation
    /// call, or a fork, which always wraps one.
    pub fn is_aggregate_expression(&self, formula: &Formula) -> bool {
        inspect::walk(formula).iter().any(|node| match &node.kind {
            FormulaItem::Fork(_) => true,
            FormulaItem::Call(call) => self.is_aggregation(&call.name),
            _ => false,
        })
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "OperationRegistry({} operations)",
            self.operations.len()
        )
    }
}
