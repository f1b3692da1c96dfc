//! Filter specs into filter formulas.
//!
//! A filter applies one operation from a fixed table to a compiled field and
//! raw string arguments. Argument and field types are adjusted before the
//! values are parsed: containment on arrays compares against the element
//! type, length operations take integers, and filters on DATE fields are
//! kept on dates whenever the datetime bounds land on day boundaries, so
//! the common "whole day" filters stay sargable.

use chrono::{Days, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::compile::formula::{cast_function_name, FormulaCompiler};
use crate::compile::literal::{is_midnight, make_literal, parse_datetime_like};
use crate::compile::spec::FilterEntrySpec;
use crate::error::{codes, Error, Reason, Result, WithErrorInfo};
use crate::ir::ast::Formula;
use crate::ir::datatype::{DataType, DataTypeKind};
use crate::ir::query::{CompiledFilterFormulaInfo, CompiledFormulaInfo};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum FilterOperation {
    IsNull,
    IsNotNull,
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Contains,
    IContains,
    NotContains,
    NotIContains,
    LenEq,
    LenNe,
    LenGt,
    LenGte,
    LenLt,
    LenLte,
    In,
    Nin,
    Between,
}

impl FilterOperation {
    /// Number of value arguments consumed; `None` folds the whole argument
    /// list into a single membership list.
    pub fn arg_count(self) -> Option<usize> {
        use FilterOperation::*;
        match self {
            IsNull | IsNotNull => Some(0),
            Eq | Ne | Gt | Gte | Lt | Lte | StartsWith | IStartsWith | EndsWith | IEndsWith
            | Contains | IContains | NotContains | NotIContains | LenEq | LenNe | LenGt
            | LenGte | LenLt | LenLte => Some(1),
            Between => Some(2),
            In | Nin => None,
        }
    }

    fn is_containment(self) -> bool {
        use FilterOperation::*;
        matches!(
            self,
            StartsWith
                | IStartsWith
                | EndsWith
                | IEndsWith
                | Contains
                | IContains
                | NotContains
                | NotIContains
        )
    }

    fn is_array_len(self) -> bool {
        use FilterOperation::*;
        matches!(self, LenEq | LenNe | LenGt | LenGte | LenLt | LenLte)
    }

    /// Builds the filter formula over an already-cast field and typed
    /// argument literals.
    fn build(self, field: Formula, mut args: Vec<Formula>) -> Formula {
        use FilterOperation::*;
        let length = |field| Formula::func("len", vec![field]);
        match self {
            IsNull => Formula::unary("isnull", field),
            IsNotNull => Formula::unary("not", Formula::unary("isnull", field)),
            Eq => Formula::binary("==", field, args.remove(0)),
            Ne => Formula::binary("!=", field, args.remove(0)),
            Gt => Formula::binary(">", field, args.remove(0)),
            Gte => Formula::binary(">=", field, args.remove(0)),
            Lt => Formula::binary("<", field, args.remove(0)),
            Lte => Formula::binary("<=", field, args.remove(0)),
            StartsWith => Formula::func("startswith", vec![field, args.remove(0)]),
            IStartsWith => Formula::func("istartswith", vec![field, args.remove(0)]),
            EndsWith => Formula::func("endswith", vec![field, args.remove(0)]),
            IEndsWith => Formula::func("iendswith", vec![field, args.remove(0)]),
            Contains => Formula::func("contains", vec![field, args.remove(0)]),
            IContains => Formula::func("icontains", vec![field, args.remove(0)]),
            NotContains => {
                Formula::unary("not", Formula::func("contains", vec![field, args.remove(0)]))
            }
            NotIContains => {
                Formula::unary("not", Formula::func("icontains", vec![field, args.remove(0)]))
            }
            LenEq => Formula::binary("==", length(field), args.remove(0)),
            LenNe => Formula::binary("!=", length(field), args.remove(0)),
            LenGt => Formula::binary(">", length(field), args.remove(0)),
            LenGte => Formula::binary(">=", length(field), args.remove(0)),
            LenLt => Formula::binary("<", length(field), args.remove(0)),
            LenLte => Formula::binary("<=", length(field), args.remove(0)),
            In => Formula::binary("in", field, args.remove(0)),
            Nin => Formula::binary("notin", field, args.remove(0)),
            Between => {
                let high = args.pop();
                let low = args.pop();
                let mut parts = vec![field];
                parts.extend(low);
                parts.extend(high);
                Formula::ternary("between", parts)
            }
        }
    }
}

/// Working state of one filter while casts are decided. `field_cast` and
/// `arg_cast` start at the field's own type and diverge as the mangles
/// apply.
struct FilterParams {
    operation: FilterOperation,
    args: Vec<String>,
    data_type: DataTypeKind,
    field_cast: DataTypeKind,
    arg_cast: DataTypeKind,
}

fn custom_filter_cast(params: FilterParams) -> Result<FilterParams> {
    let params = mangle_containment_filter(params);
    let params = mangle_array_len_filter(params);
    mangle_date_filter(params)
}

/// Containment against an array compares with its element type; against
/// anything else both sides end up as strings (the field side is handled by
/// the date mangle where it applies).
fn mangle_containment_filter(mut params: FilterParams) -> FilterParams {
    if !params.operation.is_containment() {
        return params;
    }
    match DataType::new(params.data_type, false).array_element() {
        Some(element)
            if matches!(
                params.operation,
                FilterOperation::Contains | FilterOperation::NotContains
            ) =>
        {
            params.arg_cast = element.kind;
        }
        Some(_) => {}
        None => params.arg_cast = DataTypeKind::String,
    }
    params
}

fn mangle_array_len_filter(mut params: FilterParams) -> FilterParams {
    if params.operation.is_array_len() {
        params.arg_cast = DataTypeKind::Integer;
    }
    params
}

/// DATE fields get datetime-shaped arguments all the time. When the bounds
/// land on day boundaries the filter stays on dates, rewriting the operation
/// where an open or closed bound needs it; otherwise both sides are compared
/// as datetimes. The daylight-saving offset of an argument is already gone
/// at this point: bounds are read as wall-clock.
fn mangle_date_filter(mut params: FilterParams) -> Result<FilterParams> {
    if params.data_type != DataTypeKind::Date || params.args.is_empty() {
        return Ok(params);
    }

    let parsed: Option<Vec<NaiveDateTime>> = params
        .args
        .iter()
        .map(|raw| parse_datetime_like(raw))
        .collect();
    // Unparsable values cannot be day-checked; they take the datetime path
    // and fail there as literals.
    let (mut bounds, midnight): (Vec<NaiveDateTime>, Vec<bool>) = match parsed {
        Some(bounds) => {
            let midnight = bounds.iter().map(|value| is_midnight(*value)).collect();
            (bounds, midnight)
        }
        None => (Vec::new(), vec![false; params.args.len()]),
    };

    let mut as_date = false;
    if midnight.iter().all(|on_boundary| *on_boundary) {
        as_date = true;
    } else if params.operation == FilterOperation::Gt && bounds.len() == 1 {
        as_date = true;
    } else if params.operation == FilterOperation::Gte && bounds.len() == 1 {
        // Strictly after the bound's day.
        params.operation = FilterOperation::Gt;
        as_date = true;
    } else if params.operation == FilterOperation::Lte && bounds.len() == 1 {
        as_date = true;
    } else if params.operation == FilterOperation::Lt && bounds.len() == 1 {
        params.operation = FilterOperation::Lte;
        as_date = true;
    } else if params.operation == FilterOperation::Between && bounds.len() == 2 {
        if !midnight[0] {
            // A lower bound inside a day excludes that whole day.
            bounds[0] = bounds[0].checked_add_days(Days::new(1)).ok_or_else(|| {
                Error::new_simple(format!(
                    "Invalid filter value {:?} for type {}",
                    params.args[0],
                    DataTypeKind::Date
                ))
                .with_code(codes::INVALID_LITERAL)
            })?;
        }
        as_date = true;
    }

    if as_date {
        params.args = bounds.iter().map(|value| value.date().to_string()).collect();
        params.arg_cast = DataTypeKind::Date;
    } else {
        params.field_cast = DataTypeKind::Datetime;
        params.arg_cast = DataTypeKind::Datetime;
    }
    if params.operation.is_containment() {
        params.field_cast = DataTypeKind::String;
        params.arg_cast = DataTypeKind::String;
    }
    Ok(params)
}

/// Compiles one filter entry against its field.
pub fn compile_filter_formula(
    compiler: &mut FormulaCompiler<'_>,
    spec: &FilterEntrySpec,
) -> Result<CompiledFilterFormulaInfo> {
    let field = compiler.compile_field(&spec.field_id)?;
    let data_type = compiler.field_data_type(&spec.field_id)?;

    let params = custom_filter_cast(FilterParams {
        operation: spec.operation,
        args: spec.args.clone(),
        data_type: data_type.kind,
        field_cast: data_type.kind,
        arg_cast: data_type.kind,
    })?;

    match params.operation.arg_count() {
        Some(required) if params.args.len() != required => {
            return Err(Error::new(Reason::Expected {
                who: Some(format!("filter {}", params.operation)),
                expected: format!("{required} argument(s)"),
                found: params.args.len().to_string(),
            })
            .with_code(codes::INVALID_FILTER_VALUE));
        }
        None if params.args.is_empty() => {
            return Err(Error::new_simple(format!(
                "filter {} requires at least one value",
                params.operation
            ))
            .with_code(codes::INVALID_FILTER_VALUE));
        }
        _ => {}
    }

    let mut field_formula = field.formula;
    if params.field_cast != params.data_type {
        field_formula = Formula::func(cast_function_name(params.field_cast)?, vec![field_formula]);
    }

    let literals: Vec<Formula> = params
        .args
        .iter()
        .map(|raw| make_literal(raw, params.arg_cast))
        .collect::<Result<_>>()?;
    let args = match params.operation.arg_count() {
        None => vec![Formula::expression_list(literals)],
        Some(_) => literals,
    };
    let formula = params.operation.build(field_formula, args);

    Ok(CompiledFilterFormulaInfo {
        info: CompiledFormulaInfo {
            formula,
            alias: None,
            avatar_ids: field.avatar_ids,
            original_field_id: Some(spec.field_id.clone()),
        },
        original_filter_id: Some(spec.id.clone()),
    })
}
