//! Staged compilation of dataset fields into formula trees.
//!
//! A field's expression goes through fixed stages: the base expression for
//! its calculation mode, window-ordering and before-filter-by preparation,
//! substitution of referenced fields, the explicit cast, the explicit
//! aggregation, window-grouping normalization, and a final type check
//! against the registry. Results are cached per field, so a field shared by
//! several query parts compiles once.

use std::collections::{BTreeSet, HashMap};

use crate::compile::literal::make_literal;
use crate::compile::spec::{Dataset, DatasetField, FieldAggregation, FieldCalc, ParameterValueSpec};
use crate::error::{codes, Error, Reason, Result, WithErrorInfo};
use crate::ir::ast::fold::{self, FormulaFold};
use crate::ir::ast::{
    index, inspect, CallShape, Formula, FormulaItem, NodeHierarchyIndex, OrderDirection,
    OrderingItem, WindowGrouping,
};
use crate::ir::datatype::{DataType, DataTypeKind};
use crate::ir::query::{AvatarId, CompiledFormulaInfo, FieldId};
use crate::registry::{OperationRegistry, ScopeSet};
use crate::translate::{Dialect, TranslationEnvironment, Translator};

/// Field types a parameter value can be parsed into.
const ALLOWED_PARAMETER_KINDS: &[DataTypeKind] = &[
    DataTypeKind::String,
    DataTypeKind::Integer,
    DataTypeKind::Float,
    DataTypeKind::Boolean,
    DataTypeKind::Date,
    DataTypeKind::Datetime,
    DataTypeKind::Genericdatetime,
];

/// Formula function implementing an explicit cast to `kind`.
pub(crate) fn cast_function_name(kind: DataTypeKind) -> Result<&'static str> {
    let name = match kind {
        DataTypeKind::Boolean => "bool",
        DataTypeKind::Integer => "int",
        DataTypeKind::Float => "float",
        DataTypeKind::String => "str",
        DataTypeKind::Date => "date",
        DataTypeKind::Datetime => "datetime",
        DataTypeKind::Genericdatetime => "genericdatetime",
        other => {
            return Err(
                Error::new_simple(format!("cast to {other} is not supported"))
                    .with_code(codes::INVALID_QUERY_STRUCTURE),
            )
        }
    };
    Ok(name)
}

/// Avatars referenced by the formula's resolved column names.
pub(crate) fn used_avatar_ids(dataset: &Dataset, formula: &Formula) -> BTreeSet<AvatarId> {
    inspect::used_field_names(formula)
        .into_iter()
        .filter_map(|name| {
            let (avatar_id, _) = name.split_once('.')?;
            dataset.avatar(avatar_id).map(|avatar| avatar.id.clone())
        })
        .collect()
}

/// Everything kept about one compiled field.
#[derive(Debug, Clone)]
struct FieldStages {
    /// Substituted and cast, before the field's explicit aggregation. This
    /// is what a referencing field inlines when it aggregates on top.
    pre_aggregation: Formula,
    formula: Formula,
    data_type: DataType,
    is_measure: bool,
}

pub struct FormulaCompiler<'a> {
    registry: &'a OperationRegistry,
    dataset: &'a Dataset,
    column_env: TranslationEnvironment,
    lenient_env: TranslationEnvironment,
    group_by_ids: Vec<FieldId>,
    default_ordering: Vec<(FieldId, OrderDirection)>,
    parameter_values: HashMap<FieldId, String>,
    stages: HashMap<FieldId, FieldStages>,
    visiting: Vec<FieldId>,
}

impl<'a> FormulaCompiler<'a> {
    pub fn new(registry: &'a OperationRegistry, dataset: &'a Dataset, dialect: Dialect) -> Self {
        let column_env = TranslationEnvironment::new(dialect, dataset.column_types());
        let lenient_env = column_env.clone().permissive();
        FormulaCompiler {
            registry,
            dataset,
            column_env,
            lenient_env,
            group_by_ids: Vec::new(),
            default_ordering: Vec::new(),
            parameter_values: HashMap::new(),
            stages: HashMap::new(),
            visiting: Vec::new(),
        }
    }

    /// Dimensions of the query; window grouping normalizes against these.
    pub fn with_group_by(mut self, group_by_ids: Vec<FieldId>) -> Self {
        self.group_by_ids = group_by_ids;
        self
    }

    /// Query ordering, picked up by window calls without an explicit one.
    pub fn with_default_ordering(mut self, ordering: Vec<(FieldId, OrderDirection)>) -> Self {
        self.default_ordering = ordering;
        self
    }

    pub fn with_parameter_values(
        mut self,
        values: impl IntoIterator<Item = ParameterValueSpec>,
    ) -> Self {
        self.parameter_values = values
            .into_iter()
            .map(|spec| (spec.field_id, spec.value))
            .collect();
        self
    }

    /// Fully compiles one field and attaches the bookkeeping the query
    /// assembly needs. The alias is left for the caller to fill in.
    pub fn compile_field(&mut self, field_id: &str) -> Result<CompiledFormulaInfo> {
        let stages = self.compiled(field_id)?;
        Ok(CompiledFormulaInfo {
            avatar_ids: used_avatar_ids(self.dataset, &stages.formula),
            formula: stages.formula,
            alias: None,
            original_field_id: Some(field_id.to_string()),
        })
    }

    pub fn field_data_type(&mut self, field_id: &str) -> Result<DataType> {
        Ok(self.compiled(field_id)?.data_type)
    }

    pub fn field_is_measure(&mut self, field_id: &str) -> Result<bool> {
        Ok(self.compiled(field_id)?.is_measure)
    }

    /// Reference to a raw avatar column; unknown columns become an error
    /// marker that fails once the enclosing formula is type-checked.
    pub fn direct_column(&self, avatar_id: &str, column: &str) -> Formula {
        if self.dataset.avatar_column(avatar_id, column).is_none() {
            return Formula::error_node(
                format!("unknown column `{column}` in avatar `{avatar_id}`"),
                codes::UNKNOWN_FIELD,
            );
        }
        Formula::field(format!("{avatar_id}.{column}"))
    }

    /// Type check for join conditions, which use the internal null-safe
    /// operators not reachable from user formulas.
    pub fn validate_join_condition(&self, formula: &Formula) -> Result<DataType> {
        let env = self.column_env.clone().with_scopes(ScopeSet::INTERNAL);
        let mut translator = Translator::new(self.registry, &env);
        let (_, data_type) = translator.translate(formula)?;
        Ok(data_type)
    }

    fn compiled(&mut self, field_id: &str) -> Result<FieldStages> {
        if let Some(hit) = self.stages.get(field_id) {
            return Ok(hit.clone());
        }
        let Some(field) = self.dataset.field_by_id(field_id) else {
            return Err(Error::new(Reason::NotFound {
                name: field_id.to_string(),
                namespace: "field".to_string(),
            })
            .with_code(codes::UNKNOWN_FIELD));
        };
        if self.visiting.iter().any(|id| id == field_id) {
            return Err(Error::new_simple(format!(
                "recursion detected in field `{}`",
                field.title
            ))
            .with_code(codes::INVALID_QUERY_STRUCTURE));
        }
        let field = field.clone();
        self.visiting.push(field.id.clone());
        let result = self.build_stages(&field);
        self.visiting.pop();
        let built = result.push_hint(format!("while compiling field `{}`", field.title))?;
        self.stages.insert(field.id.clone(), built.clone());
        Ok(built)
    }

    fn build_stages(&mut self, field: &DatasetField) -> Result<FieldStages> {
        let base = self.base_formula(field)?;
        let prepared = self.prepare(base)?;
        let substituted = self.substitute(prepared)?;
        let pre_aggregation = self.apply_cast(substituted, field.cast)?;
        let aggregated = apply_aggregation(pre_aggregation.clone(), field.aggregation);
        let is_measure = self.registry.is_aggregate_expression(&aggregated);
        let formula = if is_measure || inspect::contains_window_calls(&aggregated) {
            self.normalize_window_grouping(aggregated)?
        } else {
            aggregated
        };
        let data_type = self.check_types(&formula)?;
        Ok(FieldStages {
            pre_aggregation,
            formula,
            data_type,
            is_measure,
        })
    }

    fn base_formula(&self, field: &DatasetField) -> Result<Formula> {
        match &field.calc {
            FieldCalc::Formula { formula } => Ok(formula.clone()),
            FieldCalc::Direct {
                avatar_id,
                source_column,
            } => Ok(self.direct_column(avatar_id, source_column)),
            FieldCalc::Parameter { default_value } => {
                self.parameter_formula(field, default_value.as_deref())
            }
        }
    }

    fn parameter_formula(&self, field: &DatasetField, default_value: Option<&str>) -> Result<Formula> {
        let Some(kind) = field.cast else {
            return Err(Error::new_simple(format!(
                "parameter field `{}` declares no type",
                field.title
            ))
            .with_code(codes::INVALID_QUERY_STRUCTURE));
        };
        if !ALLOWED_PARAMETER_KINDS.contains(&kind) {
            return Err(Error::new_simple(format!(
                "unsupported type {kind} for parameter field `{}`",
                field.title
            ))
            .with_code(codes::INVALID_QUERY_STRUCTURE));
        }
        let value = self
            .parameter_values
            .get(&field.id)
            .map(String::as_str)
            .or(default_value);
        let Some(value) = value else {
            return Err(Error::new_simple(format!(
                "no value supplied for parameter field `{}`",
                field.title
            ))
            .with_code(codes::INVALID_QUERY_STRUCTURE));
        };
        make_literal(value, kind)
            .map_err(|_| {
                Error::new_simple(format!(
                    "invalid value {value:?} for {kind} parameter field `{}`",
                    field.title
                ))
                .with_code(codes::INVALID_LITERAL)
            })
    }

    /// Pre-substitution fixups: window calls without an explicit ordering
    /// inherit the query ordering, and before-filter-by entries given as
    /// titles are remapped to field ids.
    fn prepare(&self, formula: Formula) -> Result<Formula> {
        struct Prepare<'c> {
            dataset: &'c Dataset,
            default_ordering: &'c [(FieldId, OrderDirection)],
        }
        impl FormulaFold for Prepare<'_> {
            fn fold_item(&mut self, item: FormulaItem) -> Result<FormulaItem> {
                let item = fold::fold_item(self, item)?;
                Ok(match item {
                    FormulaItem::Call(mut call) => {
                        if let CallShape::Window(spec) = &mut call.shape {
                            if spec.ordering.is_empty() {
                                spec.ordering = self
                                    .default_ordering
                                    .iter()
                                    .map(|(field_id, direction)| OrderingItem {
                                        expr: Formula::field(field_id.clone()),
                                        direction: *direction,
                                    })
                                    .collect();
                            }
                        }
                        call.before_filter_by =
                            remap_titles_to_ids(self.dataset, call.before_filter_by);
                        FormulaItem::Call(call)
                    }
                    FormulaItem::Fork(mut fork) => {
                        fork.before_filter_by =
                            remap_titles_to_ids(self.dataset, fork.before_filter_by);
                        FormulaItem::Fork(fork)
                    }
                    other => other,
                })
            }
        }
        Prepare {
            dataset: self.dataset,
            default_ordering: &self.default_ordering,
        }
        .fold_formula(formula)
    }

    /// Replaces every field reference with the referenced field's compiled
    /// expression. References resolve by title, then by id; names shaped
    /// like `avatar_id.column` that hit a real column stay as they are.
    fn substitute(&mut self, formula: Formula) -> Result<Formula> {
        let sites: Vec<(Vec<usize>, String, bool)> = field_reference_sites(&formula)
            .into_iter()
            .map(|(path, name)| {
                let aggregated_above = is_aggregated_above(self.registry, &formula, &path);
                (path, name, aggregated_above)
            })
            .collect();

        let mut result = formula;
        for (path, name, aggregated_above) in sites {
            let replacement = match self.dataset.resolve_field(&name) {
                Some(child) => {
                    let child_id = child.id.clone();
                    let suppress_aggregation =
                        child.aggregation != FieldAggregation::None && aggregated_above;
                    let child_stages = self.compiled(&child_id)?;
                    if suppress_aggregation {
                        child_stages.pre_aggregation
                    } else {
                        child_stages.formula
                    }
                }
                None => {
                    if is_avatar_column_reference(self.dataset, &name) {
                        continue;
                    }
                    Formula::error_node(
                        format!("Unknown field found in formula: {name}"),
                        codes::UNKNOWN_FIELD,
                    )
                }
            };
            result = index::replace_at(result, &NodeHierarchyIndex::new(path), replacement)?;
        }
        Ok(result)
    }

    fn apply_cast(&self, formula: Formula, cast: Option<DataTypeKind>) -> Result<Formula> {
        let Some(kind) = cast else {
            return Ok(formula);
        };
        // No cast when the expression already has the type, or when its type
        // is unknown enough to be NULL.
        if let Some(current) = self.infer_type(&formula) {
            if current.kind == kind || current.kind == DataTypeKind::Null {
                return Ok(formula);
            }
        }
        Ok(Formula::func(cast_function_name(kind)?, vec![formula]))
    }

    /// Best-effort type of a partially compiled expression. Anything the
    /// lenient pass cannot type reads as unknown.
    fn infer_type(&self, formula: &Formula) -> Option<DataType> {
        let mut translator = Translator::new(self.registry, &self.lenient_env);
        translator
            .translate(formula)
            .ok()
            .map(|(_, data_type)| data_type)
    }

    /// AMONG grouping becomes WITHIN relative to the query dimensions, and
    /// WITHIN dimensions outside the query are dropped.
    fn normalize_window_grouping(&mut self, formula: Formula) -> Result<Formula> {
        let dims = self.global_dimensions();
        struct Normalize<'d> {
            dims: &'d [Formula],
        }
        impl FormulaFold for Normalize<'_> {
            fn fold_item(&mut self, item: FormulaItem) -> Result<FormulaItem> {
                let item = fold::fold_item(self, item)?;
                let FormulaItem::Call(mut call) = item else {
                    return Ok(item);
                };
                if let CallShape::Window(spec) = &mut call.shape {
                    spec.grouping =
                        match std::mem::replace(&mut spec.grouping, WindowGrouping::Total) {
                            WindowGrouping::Among(excluded) => WindowGrouping::Within(
                                self.dims
                                    .iter()
                                    .filter(|dim| !excluded.contains(dim))
                                    .cloned()
                                    .collect(),
                            ),
                            WindowGrouping::Within(dims) => WindowGrouping::Within(
                                dims.into_iter()
                                    .filter(|dim| self.dims.contains(dim))
                                    .collect(),
                            ),
                            WindowGrouping::Total => WindowGrouping::Total,
                        };
                }
                Ok(FormulaItem::Call(call))
            }
        }
        Normalize { dims: &dims }.fold_formula(formula)
    }

    /// Compiled expressions of the query dimensions. A dimension that fails
    /// to compile reports its error where it is selected, not here.
    fn global_dimensions(&mut self) -> Vec<Formula> {
        let ids = self.group_by_ids.clone();
        let mut dims = Vec::new();
        for dim_id in &ids {
            if self.visiting.iter().any(|id| id == dim_id) {
                continue;
            }
            if let Ok(stages) = self.compiled(dim_id) {
                dims.push(stages.formula);
            }
        }
        dims
    }

    fn check_types(&self, formula: &Formula) -> Result<DataType> {
        let mut translator = Translator::new(self.registry, &self.column_env);
        let (_, data_type) = translator.translate(formula)?;
        Ok(data_type)
    }
}

fn apply_aggregation(formula: Formula, aggregation: FieldAggregation) -> Formula {
    match aggregation.function_name() {
        Some(name) => Formula::func(name, vec![formula]),
        None => formula,
    }
}

fn remap_titles_to_ids(dataset: &Dataset, entries: BTreeSet<String>) -> BTreeSet<String> {
    entries
        .into_iter()
        .map(|entry| match dataset.field_by_title(&entry) {
            Some(field) => field.id.clone(),
            None => entry,
        })
        .collect()
}

fn is_avatar_column_reference(dataset: &Dataset, name: &str) -> bool {
    name.split_once('.')
        .is_some_and(|(avatar_id, column)| dataset.avatar_column(avatar_id, column).is_some())
}

/// Paths of every field-reference leaf. Leaves never contain each other, so
/// replacing them one by one leaves the remaining paths valid.
fn field_reference_sites(formula: &Formula) -> Vec<(Vec<usize>, String)> {
    fn visit(node: &Formula, path: &mut Vec<usize>, out: &mut Vec<(Vec<usize>, String)>) {
        if let FormulaItem::Field(field) = &node.kind {
            out.push((path.clone(), field.name.clone()));
            return;
        }
        for (position, child) in index::children(node).iter().enumerate() {
            path.push(position);
            visit(child, path, out);
            path.pop();
        }
    }
    let mut out = Vec::new();
    visit(formula, &mut Vec::new(), &mut out);
    out
}

/// Whether any strict ancestor of the node at `path` aggregates. Used to
/// suppress a referenced field's own aggregation under an outer one.
fn is_aggregated_above(registry: &OperationRegistry, root: &Formula, path: &[usize]) -> bool {
    let mut node = root;
    for &step in path {
        match &node.kind {
            FormulaItem::Call(call) if registry.is_aggregation(&call.name) => return true,
            FormulaItem::Fork(_) => return true,
            _ => {}
        }
        node = match index::children(node).into_iter().nth(step) {
            Some(child) => child,
            None => return false,
        };
    }
    false
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;
    use crate::compile::spec::{Avatar, AvatarColumn};
    use crate::ir::ast::{OperationCall, WindowSpec};
    use crate::registry::OperationRegistry;

    fn dataset() -> Dataset {
        let avatar = Avatar {
            id: "ava_1".into(),
            title: "orders".into(),
            source_id: "src_1".into(),
            columns: vec![
                AvatarColumn {
                    name: "city".into(),
                    data_type: DataTypeKind::String,
                },
                AvatarColumn {
                    name: "category".into(),
                    data_type: DataTypeKind::String,
                },
                AvatarColumn {
                    name: "sales".into(),
                    data_type: DataTypeKind::Float,
                },
                AvatarColumn {
                    name: "qty".into(),
                    data_type: DataTypeKind::Integer,
                },
            ],
        };
        let direct = |id: &str, title: &str, column: &str| DatasetField {
            id: id.into(),
            title: title.into(),
            calc: FieldCalc::Direct {
                avatar_id: "ava_1".into(),
                source_column: column.into(),
            },
            cast: None,
            aggregation: FieldAggregation::None,
        };
        Dataset {
            fields: vec![
                direct("city_id", "City", "city"),
                direct("cat_id", "Category", "category"),
                direct("sales_id", "Sales", "sales"),
                direct("qty_id", "Qty", "qty"),
                DatasetField {
                    aggregation: FieldAggregation::Sum,
                    ..direct("total", "Total", "sales")
                },
                DatasetField {
                    id: "profit".into(),
                    title: "Profit".into(),
                    calc: FieldCalc::Formula {
                        formula: Formula::binary(
                            "-",
                            Formula::field("Total"),
                            Formula::func("avg", vec![Formula::field("Sales")]),
                        ),
                    },
                    cast: None,
                    aggregation: FieldAggregation::None,
                },
                DatasetField {
                    id: "lim".into(),
                    title: "Limit".into(),
                    calc: FieldCalc::Parameter {
                        default_value: Some("10".into()),
                    },
                    cast: Some(DataTypeKind::Integer),
                    aggregation: FieldAggregation::None,
                },
            ],
            avatars: vec![avatar],
            relations: vec![],
            root_avatar_id: None,
        }
    }

    fn compiler<'a>(registry: &'a OperationRegistry, dataset: &'a Dataset) -> FormulaCompiler<'a> {
        FormulaCompiler::new(registry, dataset, Dialect::Postgres)
    }

    fn window(name: &str, args: Vec<Formula>, grouping: WindowGrouping) -> Formula {
        Formula::new(FormulaItem::Call(OperationCall {
            name: name.into(),
            args,
            shape: CallShape::Window(WindowSpec {
                grouping,
                ordering: vec![],
            }),
            lod: None,
            before_filter_by: BTreeSet::new(),
        }))
    }

    #[test]
    fn direct_field_resolves_to_qualified_column() {
        let registry = OperationRegistry::standard();
        let dataset = dataset();
        let mut compiler = compiler(&registry, &dataset);
        let info = compiler.compile_field("city_id").unwrap();
        assert_snapshot!(info.formula, @"[ava_1.city]");
        assert_eq!(info.avatar_ids, BTreeSet::from(["ava_1".to_string()]));
        assert_eq!(info.original_field_id.as_deref(), Some("city_id"));
        assert_eq!(
            compiler.field_data_type("city_id").unwrap(),
            DataType::STRING
        );
        assert!(!compiler.field_is_measure("city_id").unwrap());
    }

    #[test]
    fn explicit_aggregation_wraps_the_expression() {
        let registry = OperationRegistry::standard();
        let dataset = dataset();
        let mut compiler = compiler(&registry, &dataset);
        let info = compiler.compile_field("total").unwrap();
        assert_snapshot!(info.formula, @"SUM([ava_1.sales])");
        assert!(compiler.field_is_measure("total").unwrap());
        assert_eq!(compiler.field_data_type("total").unwrap(), DataType::FLOAT);
    }

    #[test]
    fn references_resolve_by_title_and_inline() {
        let registry = OperationRegistry::standard();
        let dataset = dataset();
        let mut compiler = compiler(&registry, &dataset);
        let info = compiler.compile_field("profit").unwrap();
        assert_snapshot!(info.formula, @"SUM([ava_1.sales]) - AVG([ava_1.sales])");
    }

    #[test]
    fn nested_aggregation_is_suppressed() {
        let registry = OperationRegistry::standard();
        let mut dataset = dataset();
        dataset.fields.push(DatasetField {
            id: "avg_total".into(),
            title: "Avg Total".into(),
            calc: FieldCalc::Formula {
                formula: Formula::func("avg", vec![Formula::field("Total")]),
            },
            cast: None,
            aggregation: FieldAggregation::None,
        });
        let mut compiler = compiler(&registry, &dataset);
        let info = compiler.compile_field("avg_total").unwrap();
        // `Total` aggregates on its own; under AVG only its bare expression
        // survives.
        assert_snapshot!(info.formula, @"AVG([ava_1.sales])");
    }

    #[test]
    fn unknown_reference_is_reported_with_the_field() {
        let registry = OperationRegistry::standard();
        let mut dataset = dataset();
        dataset.fields.push(DatasetField {
            id: "broken".into(),
            title: "Broken".into(),
            calc: FieldCalc::Formula {
                formula: Formula::unary("isnull", Formula::field("Nope")),
            },
            cast: None,
            aggregation: FieldAggregation::None,
        });
        let mut compiler = compiler(&registry, &dataset);
        let error = compiler.compile_field("broken").unwrap_err();
        assert_eq!(error.code, Some("E0103"));
        assert!(error
            .reason
            .to_string()
            .contains("Unknown field found in formula: Nope"));
        assert_eq!(error.hints, vec!["while compiling field `Broken`"]);
    }

    #[test]
    fn mutual_recursion_is_detected() {
        let registry = OperationRegistry::standard();
        let mut dataset = dataset();
        for (id, title, other) in [("a", "A", "B"), ("b", "B", "A")] {
            dataset.fields.push(DatasetField {
                id: id.into(),
                title: title.into(),
                calc: FieldCalc::Formula {
                    formula: Formula::binary(
                        "+",
                        Formula::field(other),
                        Formula::literal(crate::ir::ast::LiteralValue::Integer(1)),
                    ),
                },
                cast: None,
                aggregation: FieldAggregation::None,
            });
        }
        let mut compiler = compiler(&registry, &dataset);
        let error = compiler.compile_field("a").unwrap_err();
        assert_eq!(error.code, Some("E0303"));
        assert!(error.reason.to_string().contains("recursion detected"));
    }

    #[test]
    fn cast_is_skipped_when_types_already_match() {
        let registry = OperationRegistry::standard();
        let mut dataset = dataset();
        dataset.fields.push(DatasetField {
            cast: Some(DataTypeKind::Integer),
            ..dataset.fields[3].clone()
        });
        dataset.fields.last_mut().unwrap().id = "qty_int".into();
        dataset.fields.last_mut().unwrap().title = "Qty Int".into();
        dataset.fields.push(DatasetField {
            cast: Some(DataTypeKind::Float),
            ..dataset.fields[3].clone()
        });
        dataset.fields.last_mut().unwrap().id = "qty_float".into();
        dataset.fields.last_mut().unwrap().title = "Qty Float".into();

        let mut compiler = compiler(&registry, &dataset);
        assert_snapshot!(compiler.compile_field("qty_int").unwrap().formula, @"[ava_1.qty]");
        assert_snapshot!(
            compiler.compile_field("qty_float").unwrap().formula,
            @"FLOAT([ava_1.qty])"
        );
    }

    #[test]
    fn parameter_takes_query_value_over_default() {
        let registry = OperationRegistry::standard();
        let dataset = dataset();
        let mut with_value = FormulaCompiler::new(&registry, &dataset, Dialect::Postgres)
            .with_parameter_values([ParameterValueSpec {
                field_id: "lim".into(),
                value: "25".into(),
            }]);
        assert_snapshot!(with_value.compile_field("lim").unwrap().formula, @"25");

        let mut defaulted = compiler(&registry, &dataset);
        assert_snapshot!(defaulted.compile_field("lim").unwrap().formula, @"10");
    }

    #[test]
    fn parameter_without_any_value_fails() {
        let registry = OperationRegistry::standard();
        let mut dataset = dataset();
        dataset.fields.push(DatasetField {
            id: "tag".into(),
            title: "Tag".into(),
            calc: FieldCalc::Parameter {
                default_value: None,
            },
            cast: Some(DataTypeKind::String),
            aggregation: FieldAggregation::None,
        });
        let mut compiler = compiler(&registry, &dataset);
        let error = compiler.compile_field("tag").unwrap_err();
        assert!(error.reason.to_string().contains("no value supplied"));
    }

    #[test]
    fn parameter_rejects_unsupported_types() {
        let registry = OperationRegistry::standard();
        let mut dataset = dataset();
        dataset.fields.push(DatasetField {
            id: "bad".into(),
            title: "Bad".into(),
            calc: FieldCalc::Parameter {
                default_value: Some("x".into()),
            },
            cast: Some(DataTypeKind::ArrayInt),
            aggregation: FieldAggregation::None,
        });
        let mut compiler = compiler(&registry, &dataset);
        let error = compiler.compile_field("bad").unwrap_err();
        assert_eq!(error.code, Some("E0303"));
        assert!(error.reason.to_string().contains("unsupported type ARRAY_INT"));
    }

    #[test]
    fn among_grouping_becomes_within_the_other_dimensions() {
        let registry = OperationRegistry::standard();
        let mut dataset = dataset();
        dataset.fields.push(DatasetField {
            id: "rank_sales".into(),
            title: "Rank Sales".into(),
            calc: FieldCalc::Formula {
                formula: window(
                    "rank",
                    vec![Formula::func("sum", vec![Formula::field("Sales")])],
                    WindowGrouping::Among(vec![Formula::field("City")]),
                ),
            },
            cast: None,
            aggregation: FieldAggregation::None,
        });
        let mut compiler = FormulaCompiler::new(&registry, &dataset, Dialect::Postgres)
            .with_group_by(vec!["city_id".into(), "cat_id".into()]);
        let info = compiler.compile_field("rank_sales").unwrap();
        assert_snapshot!(info.formula, @"RANK(SUM([ava_1.sales]) WITHIN [ava_1.category])");
    }

    #[test]
    fn foreign_within_dimensions_are_dropped() {
        let registry = OperationRegistry::standard();
        let mut dataset = dataset();
        dataset.fields.push(DatasetField {
            id: "rank_sales".into(),
            title: "Rank Sales".into(),
            calc: FieldCalc::Formula {
                formula: window(
                    "rank",
                    vec![Formula::func("sum", vec![Formula::field("Sales")])],
                    WindowGrouping::Within(vec![
                        Formula::field("City"),
                        Formula::field("Category"),
                    ]),
                ),
            },
            cast: None,
            aggregation: FieldAggregation::None,
        });
        let mut compiler = FormulaCompiler::new(&registry, &dataset, Dialect::Postgres)
            .with_group_by(vec!["city_id".into()]);
        let info = compiler.compile_field("rank_sales").unwrap();
        assert_snapshot!(info.formula, @"RANK(SUM([ava_1.sales]) WITHIN [ava_1.city])");
    }

    #[test]
    fn window_calls_inherit_the_query_ordering() {
        let registry = OperationRegistry::standard();
        let mut dataset = dataset();
        dataset.fields.push(DatasetField {
            id: "rsum_sales".into(),
            title: "Running Sales".into(),
            calc: FieldCalc::Formula {
                formula: window(
                    "rsum",
                    vec![Formula::func("sum", vec![Formula::field("Sales")])],
                    WindowGrouping::Total,
                ),
            },
            cast: None,
            aggregation: FieldAggregation::None,
        });
        let mut compiler = FormulaCompiler::new(&registry, &dataset, Dialect::Postgres)
            .with_default_ordering(vec![("city_id".into(), OrderDirection::Desc)]);
        let info = compiler.compile_field("rsum_sales").unwrap();
        let call = info.formula.kind.as_call().unwrap();
        let CallShape::Window(spec) = &call.shape else {
            panic!("window shape expected");
        };
        assert_eq!(spec.ordering.len(), 1);
        assert_eq!(spec.ordering[0].expr.to_string(), "[ava_1.city]");
        assert_eq!(spec.ordering[0].direction, OrderDirection::Desc);
    }
}
