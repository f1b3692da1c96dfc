//! Error reporting through the public API: codes, messages and hints a
//! caller can route on.

use biqc::compile::{Avatar, AvatarColumn, FilterEntrySpec, FilterOperation, QuerySpec};
use biqc::error::codes;
use biqc::ir::ast::Formula;
use biqc::ir::datatype::DataTypeKind;

use crate::common::{direct, field, formula, grouped, plan_err, postgres, sales_dataset, select};

fn filter(field_id: &str, operation: FilterOperation, args: &[&str]) -> FilterEntrySpec {
    FilterEntrySpec {
        id: "flt_1".into(),
        field_id: field_id.into(),
        operation,
        args: args.iter().map(|arg| arg.to_string()).collect(),
    }
}

#[test]
fn unknown_select_field() {
    let error = plan_err(&sales_dataset(), &select(&["f_nope"]));
    assert_eq!(error.code, Some(codes::UNKNOWN_FIELD));
    assert_eq!(error.reason.to_string(), "field `f_nope` not found");
}

#[test]
fn select_problems_report_at_once() {
    let errors = biqc::plan(
        &sales_dataset(),
        &select(&["f_nope", "f_missing"]),
        &postgres(),
    )
    .unwrap_err();
    assert_eq!(errors.0.len(), 2);
}

#[test]
fn empty_select_is_rejected() {
    let error = plan_err(&sales_dataset(), &select(&[]));
    assert_eq!(error.code, Some(codes::INVALID_QUERY_STRUCTURE));
    assert_eq!(error.reason.to_string(), "query selects no fields");
}

#[test]
fn field_budget_is_enforced() {
    let options = postgres().with_field_count_limit(2);
    let error = biqc::plan(
        &sales_dataset(),
        &select(&["f_city", "f_qty", "f_mgr"]),
        &options,
    )
    .unwrap_err()
    .into_first();
    assert_eq!(error.code, Some(codes::TOO_MANY_FIELDS));
    assert_eq!(
        error.reason.to_string(),
        "query references 3 fields, the limit is 2"
    );
}

#[test]
fn between_needs_both_bounds() {
    let spec = QuerySpec {
        filters: vec![filter("f_date", FilterOperation::Between, &["2024-01-01"])],
        ..select(&["f_city"])
    };
    let error = plan_err(&sales_dataset(), &spec);
    assert_eq!(error.code, Some(codes::INVALID_FILTER_VALUE));
    assert_eq!(
        error.reason.to_string(),
        "filter BETWEEN expected 2 argument(s), but found 1"
    );
}

#[test]
fn membership_needs_values() {
    let spec = QuerySpec {
        filters: vec![filter("f_qty", FilterOperation::In, &[])],
        ..select(&["f_city"])
    };
    let error = plan_err(&sales_dataset(), &spec);
    assert_eq!(error.code, Some(codes::INVALID_FILTER_VALUE));
    assert_eq!(
        error.reason.to_string(),
        "filter IN requires at least one value"
    );
}

#[test]
fn invalid_literal_reports_the_type() {
    let spec = QuerySpec {
        filters: vec![filter("f_qty", FilterOperation::Eq, &["nope"])],
        ..select(&["f_city"])
    };
    let error = plan_err(&sales_dataset(), &spec);
    assert_eq!(error.code, Some(codes::INVALID_LITERAL));
    assert_eq!(
        error.reason.to_string(),
        "Invalid filter value \"nope\" for type INTEGER"
    );
}

#[test]
fn duplicate_filter_ids_collide() {
    let spec = QuerySpec {
        filters: vec![
            filter("f_qty", FilterOperation::Gt, &["1"]),
            filter("f_qty", FilterOperation::Lt, &["9"]),
        ],
        ..select(&["f_city"])
    };
    let error = plan_err(&sales_dataset(), &spec);
    assert_eq!(error.code, Some(codes::INVALID_QUERY_STRUCTURE));
    assert_eq!(error.reason.to_string(), "duplicate filter id `flt_1`");
}

#[test]
fn lod_dimensions_must_stay_in_the_grid() {
    // Category is not part of the query grid, so the fixed aggregation has
    // nothing to join back onto.
    let error = plan_err(
        &sales_dataset(),
        &grouped(&["f_city", "f_cat_sales"], &["f_city"]),
    );
    assert_eq!(error.code, Some(codes::INCOMPATIBLE_LOD_DIMENSIONS));
    assert_eq!(
        error.reason.to_string(),
        "Invalid top-level LOD dimension found in expression"
    );
}

#[test]
fn mixed_lod_grids_are_incompatible() {
    // Both grids are legal on their own; together neither covers the union.
    let error = plan_err(
        &sales_dataset(),
        &grouped(
            &["f_city", "f_cat", "f_city_sales", "f_cat_sales"],
            &["f_city", "f_cat"],
        ),
    );
    assert_eq!(error.code, Some(codes::INCOMPATIBLE_LOD_DIMENSIONS));
    assert_eq!(error.reason.to_string(), "LOD dimensions are incompatible");
}

#[test]
fn unknown_field_inside_a_formula() {
    let mut dataset = sales_dataset();
    dataset.fields.push(field(
        "f_bad",
        "Bad",
        formula(Formula::func("sum", vec![Formula::field("Nope")])),
    ));
    let error = plan_err(&dataset, &select(&["f_bad"]));
    assert_eq!(error.code, Some(codes::UNKNOWN_FIELD));
    assert_eq!(
        error.reason.to_string(),
        "Unknown field found in formula: Nope"
    );
    assert!(error
        .hints
        .iter()
        .any(|hint| hint == "while compiling field `Bad`"));
}

#[test]
fn recursive_fields_are_cut_off() {
    let mut dataset = sales_dataset();
    dataset.fields.push(field(
        "f_loop",
        "Loop",
        formula(Formula::binary(
            "+",
            Formula::field("Loop"),
            Formula::field("Sales"),
        )),
    ));
    let error = plan_err(&dataset, &select(&["f_loop"]));
    assert_eq!(error.code, Some(codes::INVALID_QUERY_STRUCTURE));
    assert_eq!(
        error.reason.to_string(),
        "recursion detected in field `Loop`"
    );
}

#[test]
fn unjoined_avatar_is_structural() {
    let mut dataset = sales_dataset();
    dataset.avatars.push(Avatar {
        id: "ava_3".into(),
        title: "regions".into(),
        source_id: "src_1".into(),
        columns: vec![AvatarColumn {
            name: "name".into(),
            data_type: DataTypeKind::String,
        }],
    });
    dataset
        .fields
        .push(field("f_region", "Region", direct("ava_3", "name")));
    let error = plan_err(&dataset, &select(&["f_city", "f_region"]));
    assert_eq!(error.code, Some(codes::INVALID_QUERY_STRUCTURE));
    assert_eq!(
        error.reason.to_string(),
        "avatar `ava_3` is not joined to the root avatar"
    );
}

#[test]
fn unknown_function_in_a_formula() {
    let mut dataset = sales_dataset();
    dataset.fields.push(field(
        "f_fancy",
        "Fancy",
        formula(Formula::func("frobnicate", vec![Formula::field("Sales")])),
    ));
    let error = plan_err(&dataset, &select(&["f_fancy"]));
    assert_eq!(error.code, Some(codes::UNKNOWN_FUNCTION));
}
