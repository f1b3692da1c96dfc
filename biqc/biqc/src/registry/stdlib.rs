//! The standard operation library.
//!
//! Registration order is part of the contract: among equally specific
//! variants the earliest registration wins, so dialect-restricted variants
//! are registered before their generic fallbacks.

use super::{
    ArgTransformer, ArgTypeMatcher, ImplementationInput, OperationRegistry, ReturnTypeStrategy,
    ScopeSet, TranslationVariant, VariantImpl,
};
use crate::error::{codes, Error, Reason, Result, WithErrorInfo};
use crate::ir::ast::{LiteralValue, OrderDirection};
use crate::ir::datatype::DataType;
use crate::translate::backend::{BackendExpr, CaseWhen, OrderItem};
use crate::translate::dialect::{Dialect, DialectSet};

const NUMERIC: &[DataType] = &[DataType::INTEGER, DataType::FLOAT];
const TEMPORAL: &[DataType] = &[
    DataType::DATE,
    DataType::DATETIME,
    DataType::GENERICDATETIME,
];
const STRING: &[DataType] = &[DataType::STRING];
const BOOL: &[DataType] = &[DataType::BOOLEAN];
/// Strings plus everything with a length.
const SIZED: &[DataType] = &[
    DataType::STRING,
    DataType::ARRAY_INT,
    DataType::ARRAY_FLOAT,
    DataType::ARRAY_STR,
    DataType::TREE_STR,
];
const ANY: &[DataType] = &[
    DataType::NULL,
    DataType::BOOLEAN,
    DataType::INTEGER,
    DataType::FLOAT,
    DataType::DATE,
    DataType::DATETIME,
    DataType::GENERICDATETIME,
    DataType::STRING,
    DataType::UUID,
    DataType::MARKUP,
    DataType::GEOPOINT,
    DataType::GEOPOLYGON,
    DataType::ARRAY_INT,
    DataType::ARRAY_FLOAT,
    DataType::ARRAY_STR,
    DataType::TREE_STR,
];

pub(super) fn standard() -> OperationRegistry {
    let mut registry = OperationRegistry::new();
    register_arithmetic(&mut registry);
    register_comparisons(&mut registry);
    register_logic(&mut registry);
    register_conditionals(&mut registry);
    register_strings(&mut registry);
    register_casts(&mut registry);
    register_date_parts(&mut registry);
    register_aggregations(&mut registry);
    register_window_functions(&mut registry);
    registry
}

fn sql_func(name: &'static str) -> VariantImpl {
    Box::new(move |input| Ok(BackendExpr::func(name, input.args)))
}

fn binary_op(op: &'static str) -> VariantImpl {
    Box::new(move |mut input| Ok(BackendExpr::binary(op, input.arg(0), input.arg(1))))
}

fn chained_op(op: &'static str) -> VariantImpl {
    Box::new(move |input| {
        let mut args = input.args.into_iter();
        let first = args
            .next()
            .ok_or_else(|| Error::new_assert("variadic operator resolved with no arguments"))?;
        Ok(args.fold(first, |acc, next| BackendExpr::binary(op, acc, next)))
    })
}

fn prefix_op(op: &'static str) -> VariantImpl {
    Box::new(move |mut input| Ok(BackendExpr::unary(op, input.arg(0))))
}

fn postfix_op(op: &'static str) -> VariantImpl {
    Box::new(move |mut input| Ok(BackendExpr::postfix(op, input.arg(0))))
}

fn cast_to(sql_type: &'static str) -> VariantImpl {
    Box::new(move |mut input| Ok(BackendExpr::cast(input.arg(0), sql_type)))
}

fn numeric_variant(op: &'static str) -> TranslationVariant {
    TranslationVariant::new(
        ArgTypeMatcher::seq(&[NUMERIC, NUMERIC]),
        ReturnTypeStrategy::from_all_args(),
        binary_op(op),
    )
}

fn register_arithmetic(registry: &mut OperationRegistry) {
    registry.register("+", numeric_variant("+"));
    // Date plus a day count. The reversed signature reorders a constant
    // shift to the front so both spellings share one implementation.
    registry.register(
        "+",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[TEMPORAL, NUMERIC]),
            ReturnTypeStrategy::DateArithmetic,
            binary_op("+"),
        ),
    );
    registry.register(
        "+",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[NUMERIC, TEMPORAL]),
            ReturnTypeStrategy::DateArithmetic,
            binary_op("+"),
        )
        .with_transformer(ArgTransformer::NonConstFirst),
    );
    registry.register("-", numeric_variant("-"));
    registry.register(
        "-",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[TEMPORAL, NUMERIC]),
            ReturnTypeStrategy::DateArithmetic,
            binary_op("-"),
        ),
    );
    // Unary negation shares the operation name with binary subtraction;
    // arity disambiguates.
    registry.register(
        "-",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[NUMERIC]),
            ReturnTypeStrategy::from_all_args(),
            prefix_op("-"),
        ),
    );
    registry.register("*", numeric_variant("*"));
    registry.register(
        "/",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[NUMERIC, NUMERIC]),
            ReturnTypeStrategy::Fixed(DataType::FLOAT),
            binary_op("/"),
        ),
    );
    registry.register("%", numeric_variant("%"));
    registry.register(
        "^",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[NUMERIC, NUMERIC]),
            ReturnTypeStrategy::Fixed(DataType::FLOAT),
            sql_func("power"),
        ),
    );
}

/// `l = r OR (l IS NULL AND r IS NULL)`.
fn null_safe_equality(left: BackendExpr, right: BackendExpr) -> BackendExpr {
    let equal = BackendExpr::binary("=", left.clone(), right.clone());
    let both_null = BackendExpr::binary(
        "AND",
        BackendExpr::postfix("IS NULL", left),
        BackendExpr::postfix("IS NULL", right),
    );
    BackendExpr::binary("OR", equal, both_null)
}

fn register_comparisons(registry: &mut OperationRegistry) {
    for (name, op) in [
        ("==", "="),
        ("!=", "<>"),
        ("<", "<"),
        ("<=", "<="),
        (">", ">"),
        (">=", ">="),
    ] {
        registry.register(
            name,
            TranslationVariant::new(
                ArgTypeMatcher::common_type(ANY),
                ReturnTypeStrategy::Fixed(DataType::BOOLEAN),
                binary_op(op),
            ),
        );
    }
    // Join-condition operators: null-safe so that NULL dimension values on
    // both sides of a sub-query join still pair up.
    for name in ["_==", "_dneq"] {
        registry.register(
            name,
            TranslationVariant::new(
                ArgTypeMatcher::common_type(ANY),
                ReturnTypeStrategy::Fixed(DataType::BOOLEAN),
                Box::new(|mut input| Ok(null_safe_equality(input.arg(0), input.arg(1)))),
            )
            .with_scopes(ScopeSet::INTERNAL),
        );
    }
    registry.register(
        "_!=",
        TranslationVariant::new(
            ArgTypeMatcher::common_type(ANY),
            ReturnTypeStrategy::Fixed(DataType::BOOLEAN),
            Box::new(|mut input| {
                Ok(BackendExpr::unary(
                    "NOT",
                    null_safe_equality(input.arg(0), input.arg(1)),
                ))
            }),
        )
        .with_scopes(ScopeSet::INTERNAL),
    );
}

fn register_logic(registry: &mut OperationRegistry) {
    registry.register(
        "and",
        TranslationVariant::new(
            ArgTypeMatcher::for_each(BOOL, 2),
            ReturnTypeStrategy::Fixed(DataType::BOOLEAN),
            chained_op("AND"),
        ),
    );
    registry.register(
        "or",
        TranslationVariant::new(
            ArgTypeMatcher::for_each(BOOL, 2),
            ReturnTypeStrategy::Fixed(DataType::BOOLEAN),
            chained_op("OR"),
        ),
    );
    registry.register(
        "not",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[BOOL]),
            ReturnTypeStrategy::Fixed(DataType::BOOLEAN),
            prefix_op("NOT"),
        ),
    );
    registry.register("in", membership_variant(false));
    registry.register("notin", membership_variant(true));
    registry.register(
        "between",
        TranslationVariant::new(
            ArgTypeMatcher::common_type(ANY),
            ReturnTypeStrategy::Fixed(DataType::BOOLEAN),
            Box::new(|mut input| {
                Ok(BackendExpr::Between {
                    expr: Box::new(input.arg(0)),
                    low: Box::new(input.arg(1)),
                    high: Box::new(input.arg(2)),
                })
            }),
        ),
    );
}

fn membership_variant(negated: bool) -> TranslationVariant {
    TranslationVariant::new(
        ArgTypeMatcher::common_type(ANY),
        ReturnTypeStrategy::Fixed(DataType::BOOLEAN),
        Box::new(move |mut input| {
            let expr = input.arg(0);
            let list = match input.arg(1) {
                BackendExpr::Tuple(items) => items,
                single => vec![single],
            };
            Ok(BackendExpr::InList {
                expr: Box::new(expr),
                list,
                negated,
            })
        }),
    )
}

/// Splits the flattened `[subject?, value, result, ..., else]` argument
/// layout back into CASE parts.
fn case_parts(
    mut input: ImplementationInput,
    with_subject: bool,
) -> Result<(Option<BackendExpr>, Vec<CaseWhen>, BackendExpr)> {
    let else_result = input
        .args
        .pop()
        .ok_or_else(|| Error::new_assert("case block without an else branch"))?;
    let mut args = input.args.into_iter();
    let subject = if with_subject { args.next() } else { None };
    let mut whens = Vec::new();
    while let Some(condition) = args.next() {
        let result = args
            .next()
            .ok_or_else(|| Error::new_assert("case branch without a result"))?;
        whens.push(CaseWhen { condition, result });
    }
    Ok((subject, whens, else_result))
}

fn register_conditionals(registry: &mut OperationRegistry) {
    registry.register(
        "_case_block_",
        TranslationVariant::new(
            ArgTypeMatcher::for_each(ANY, 4),
            ReturnTypeStrategy::CaseResult,
            Box::new(|input| {
                let (subject, whens, else_result) = case_parts(input, true)?;
                Ok(BackendExpr::Case {
                    value: subject.map(Box::new),
                    whens,
                    else_result: Some(Box::new(else_result)),
                })
            }),
        )
        .with_scopes(ScopeSet::INTERNAL),
    );
    registry.register(
        "_if_block_",
        TranslationVariant::new(
            ArgTypeMatcher::for_each(ANY, 3),
            ReturnTypeStrategy::CaseResult,
            Box::new(|input| {
                let (_, whens, else_result) = case_parts(input, false)?;
                Ok(BackendExpr::Case {
                    value: None,
                    whens,
                    else_result: Some(Box::new(else_result)),
                })
            }),
        )
        .with_scopes(ScopeSet::INTERNAL),
    );
    registry.register(
        "ifnull",
        TranslationVariant::new(
            ArgTypeMatcher::common_type(ANY),
            ReturnTypeStrategy::from_all_args(),
            sql_func("coalesce"),
        ),
    );
    registry.register(
        "isnull",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[ANY]),
            ReturnTypeStrategy::Fixed(DataType::BOOLEAN),
            postfix_op("IS NULL"),
        ),
    );
    registry.register(
        "isnotnull",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[ANY]),
            ReturnTypeStrategy::Fixed(DataType::BOOLEAN),
            postfix_op("IS NOT NULL"),
        ),
    );
    registry.register(
        "zn",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[NUMERIC]),
            ReturnTypeStrategy::FromArgs(vec![0]),
            Box::new(|mut input| {
                Ok(BackendExpr::func(
                    "coalesce",
                    vec![input.arg(0), BackendExpr::Literal(LiteralValue::Integer(0))],
                ))
            }),
        ),
    );
}

/// `strpos(haystack, needle) <op> <expected>`, optionally case-folded.
fn position_check(op: &'static str, expected: i64, case_fold: bool) -> VariantImpl {
    Box::new(move |mut input| {
        let mut haystack = input.arg(0);
        let mut needle = input.arg(1);
        if case_fold {
            haystack = BackendExpr::func("lower", vec![haystack]);
            needle = BackendExpr::func("lower", vec![needle]);
        }
        Ok(BackendExpr::binary(
            op,
            BackendExpr::func("strpos", vec![haystack, needle]),
            BackendExpr::Literal(LiteralValue::Integer(expected)),
        ))
    })
}

fn suffix_check(case_fold: bool) -> VariantImpl {
    Box::new(move |mut input| {
        let mut haystack = input.arg(0);
        let mut needle = input.arg(1);
        if case_fold {
            haystack = BackendExpr::func("lower", vec![haystack]);
            needle = BackendExpr::func("lower", vec![needle]);
        }
        let tail = BackendExpr::func(
            "right",
            vec![
                haystack,
                BackendExpr::func("length", vec![needle.clone()]),
            ],
        );
        Ok(BackendExpr::binary("=", tail, needle))
    })
}

fn string_predicate(implement: VariantImpl) -> TranslationVariant {
    TranslationVariant::new(
        ArgTypeMatcher::seq(&[STRING, STRING]),
        ReturnTypeStrategy::Fixed(DataType::BOOLEAN),
        implement,
    )
}

fn register_strings(registry: &mut OperationRegistry) {
    registry.register(
        "concat",
        TranslationVariant::new(
            ArgTypeMatcher::for_each(ANY, 2),
            ReturnTypeStrategy::Fixed(DataType::STRING),
            Box::new(|input| {
                let args = input
                    .args
                    .into_iter()
                    .zip(&input.arg_types)
                    .map(|(arg, arg_type)| {
                        if arg_type.casts_to(DataType::STRING) {
                            arg
                        } else {
                            BackendExpr::cast(arg, "VARCHAR")
                        }
                    })
                    .collect();
                Ok(BackendExpr::func("concat", args))
            }),
        ),
    );
    registry.register("contains", string_predicate(position_check(">", 0, false)));
    registry.register("icontains", string_predicate(position_check(">", 0, true)));
    // ClickHouse ships dedicated prefix/suffix predicates; everything else
    // goes through the position/right spellings.
    registry.register(
        "startswith",
        string_predicate(sql_func("startsWith"))
            .with_dialects(DialectSet::only(Dialect::ClickHouse)),
    );
    registry.register("startswith", string_predicate(position_check("=", 1, false)));
    registry.register("istartswith", string_predicate(position_check("=", 1, true)));
    registry.register(
        "endswith",
        string_predicate(sql_func("endsWith")).with_dialects(DialectSet::only(Dialect::ClickHouse)),
    );
    registry.register("endswith", string_predicate(suffix_check(false)));
    registry.register("iendswith", string_predicate(suffix_check(true)));
    registry.register(
        "upper",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[STRING]),
            ReturnTypeStrategy::Fixed(DataType::STRING),
            sql_func("upper"),
        ),
    );
    registry.register(
        "lower",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[STRING]),
            ReturnTypeStrategy::Fixed(DataType::STRING),
            sql_func("lower"),
        ),
    );
    registry.register(
        "len",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[SIZED]),
            ReturnTypeStrategy::Fixed(DataType::INTEGER),
            sql_func("length"),
        ),
    );
}

fn register_casts(registry: &mut OperationRegistry) {
    let clickhouse = DialectSet::only(Dialect::ClickHouse);
    let conversions: &[(&str, &[DataType], &'static str, &'static str, DataType)] = &[
        (
            "int",
            &[
                DataType::INTEGER,
                DataType::FLOAT,
                DataType::STRING,
                DataType::BOOLEAN,
            ],
            "toInt64",
            "BIGINT",
            DataType::INTEGER,
        ),
        (
            "float",
            &[
                DataType::INTEGER,
                DataType::FLOAT,
                DataType::STRING,
                DataType::BOOLEAN,
            ],
            "toFloat64",
            "DOUBLE",
            DataType::FLOAT,
        ),
        ("str", ANY, "toString", "VARCHAR", DataType::STRING),
        (
            "bool",
            &[
                DataType::BOOLEAN,
                DataType::INTEGER,
                DataType::FLOAT,
                DataType::STRING,
            ],
            "toBool",
            "BOOLEAN",
            DataType::BOOLEAN,
        ),
        (
            "date",
            &[
                DataType::DATE,
                DataType::DATETIME,
                DataType::GENERICDATETIME,
                DataType::STRING,
                DataType::INTEGER,
            ],
            "toDate",
            "DATE",
            DataType::DATE,
        ),
        (
            "datetime",
            &[
                DataType::DATE,
                DataType::DATETIME,
                DataType::GENERICDATETIME,
                DataType::STRING,
                DataType::INTEGER,
            ],
            "toDateTime",
            "TIMESTAMP",
            DataType::DATETIME,
        ),
        (
            "genericdatetime",
            &[
                DataType::DATE,
                DataType::DATETIME,
                DataType::GENERICDATETIME,
                DataType::STRING,
                DataType::INTEGER,
            ],
            "toDateTime",
            "TIMESTAMP",
            DataType::GENERICDATETIME,
        ),
    ];
    for &(name, accepted, clickhouse_func, sql_type, result) in conversions {
        registry.register(
            name,
            TranslationVariant::new(
                ArgTypeMatcher::seq(&[accepted]),
                ReturnTypeStrategy::Fixed(result),
                sql_func(clickhouse_func),
            )
            .with_dialects(clickhouse),
        );
        registry.register(
            name,
            TranslationVariant::new(
                ArgTypeMatcher::seq(&[accepted]),
                ReturnTypeStrategy::Fixed(result),
                cast_to(sql_type),
            ),
        );
    }
}

fn date_part(part: &'static str) -> VariantImpl {
    Box::new(move |mut input| {
        Ok(BackendExpr::func(
            "date_part",
            vec![
                BackendExpr::Literal(LiteralValue::String(part.to_string())),
                input.arg(0),
            ],
        ))
    })
}

fn register_date_parts(registry: &mut OperationRegistry) {
    let clickhouse = DialectSet::only(Dialect::ClickHouse);
    let parts: &[(&str, &'static str, &'static str)] = &[
        ("year", "year", "toYear"),
        ("month", "month", "toMonth"),
        ("day", "day", "toDayOfMonth"),
        ("hour", "hour", "toHour"),
        ("minute", "minute", "toMinute"),
        ("second", "second", "toSecond"),
    ];
    for &(name, part, clickhouse_func) in parts {
        registry.register(
            name,
            TranslationVariant::new(
                ArgTypeMatcher::seq(&[TEMPORAL]),
                ReturnTypeStrategy::Fixed(DataType::INTEGER),
                sql_func(clickhouse_func),
            )
            .with_dialects(clickhouse),
        );
        registry.register(
            name,
            TranslationVariant::new(
                ArgTypeMatcher::seq(&[TEMPORAL]),
                ReturnTypeStrategy::Fixed(DataType::INTEGER),
                date_part(part),
            ),
        );
    }
}

fn register_aggregations(registry: &mut OperationRegistry) {
    registry.register(
        "sum",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[NUMERIC]),
            ReturnTypeStrategy::FromArgs(vec![0]),
            sql_func("sum"),
        )
        .as_aggregation(),
    );
    registry.register(
        "avg",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[NUMERIC]),
            ReturnTypeStrategy::Fixed(DataType::FLOAT),
            sql_func("avg"),
        )
        .as_aggregation(),
    );
    for name in ["min", "max"] {
        registry.register(
            name,
            TranslationVariant::new(
                ArgTypeMatcher::seq(&[ANY]),
                ReturnTypeStrategy::FromArgs(vec![0]),
                sql_func(name),
            )
            .as_aggregation(),
        );
    }
    registry.register(
        "count",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[]),
            ReturnTypeStrategy::Fixed(DataType::INTEGER),
            Box::new(|_input| {
                Ok(BackendExpr::func(
                    "count",
                    vec![BackendExpr::Literal(LiteralValue::Integer(1))],
                ))
            }),
        )
        .as_aggregation(),
    );
    registry.register(
        "count",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[ANY]),
            ReturnTypeStrategy::Fixed(DataType::INTEGER),
            sql_func("count"),
        )
        .as_aggregation(),
    );
    registry.register(
        "countd",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[ANY]),
            ReturnTypeStrategy::Fixed(DataType::INTEGER),
            Box::new(|input| Ok(BackendExpr::func_distinct("count", input.args))),
        )
        .as_aggregation(),
    );
    // No portable pushdown exists, so quantiles always run in the compute
    // engine; the level splitter relocates them there.
    registry.register(
        "quantile",
        TranslationVariant::new(
            ArgTypeMatcher::seq(&[NUMERIC, &[DataType::CONST_FLOAT]]),
            ReturnTypeStrategy::Fixed(DataType::FLOAT),
            sql_func("quantile"),
        )
        .with_dialects(DialectSet::only(Dialect::Compeng))
        .as_aggregation(),
    );
}

fn direction_flag(
    flag: Option<&BackendExpr>,
    default: OrderDirection,
) -> Result<OrderDirection> {
    let Some(flag) = flag else {
        return Ok(default);
    };
    if let BackendExpr::Literal(LiteralValue::String(value)) = flag {
        match value.to_ascii_lowercase().as_str() {
            "asc" => return Ok(OrderDirection::Asc),
            "desc" => return Ok(OrderDirection::Desc),
            _ => {}
        }
    }
    Err(Error::new(Reason::Expected {
        who: Some("window function direction".to_string()),
        expected: "\"asc\" or \"desc\"".to_string(),
        found: flag.to_string(),
    })
    .with_code(codes::WRONG_ARGUMENT_TYPES))
}

fn rank_impl(mut input: ImplementationInput) -> Result<BackendExpr> {
    let direction = direction_flag(input.args.get(1), OrderDirection::Desc)?;
    let window = input.window.take().unwrap_or_default();
    let mut order_by = vec![OrderItem {
        expr: input.arg(0),
        direction,
    }];
    order_by.extend(window.order_by);
    Ok(BackendExpr::Window {
        name: "rank".to_string(),
        args: vec![],
        partition_by: window.partition_by,
        order_by,
    })
}

fn running_sum_impl(mut input: ImplementationInput) -> Result<BackendExpr> {
    let direction = direction_flag(input.args.get(1), OrderDirection::Asc)?;
    let window = input.window.take().unwrap_or_default();
    let mut order_by = window.order_by;
    if direction == OrderDirection::Desc {
        for item in &mut order_by {
            item.direction = item.direction.reversed();
        }
    }
    Ok(BackendExpr::Window {
        name: "sum".to_string(),
        args: vec![input.arg(0)],
        partition_by: window.partition_by,
        order_by,
    })
}

fn register_window_functions(registry: &mut OperationRegistry) {
    let orderable: &[DataType] = &[
        DataType::INTEGER,
        DataType::FLOAT,
        DataType::DATE,
        DataType::DATETIME,
        DataType::GENERICDATETIME,
        DataType::STRING,
    ];
    for signature in [
        ArgTypeMatcher::seq(&[orderable]),
        ArgTypeMatcher::seq(&[orderable, &[DataType::CONST_STRING]]),
    ] {
        registry.register(
            "rank",
            TranslationVariant::new(
                signature,
                ReturnTypeStrategy::Fixed(DataType::INTEGER),
                Box::new(rank_impl),
            )
            .as_window(),
        );
    }
    for signature in [
        ArgTypeMatcher::seq(&[NUMERIC]),
        ArgTypeMatcher::seq(&[NUMERIC, &[DataType::CONST_STRING]]),
    ] {
        registry.register(
            "rsum",
            TranslationVariant::new(
                signature,
                ReturnTypeStrategy::FromArgs(vec![0]),
                Box::new(running_sum_impl),
            )
            .as_window(),
        );
    }
}
