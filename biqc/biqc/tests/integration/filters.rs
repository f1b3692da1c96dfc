//! Filter translation end to end, most of it the DATE policy: filters on
//! date columns stay sargable, so day-granularity bounds compare against
//! `DATE` literals instead of casting the column.

use rstest::rstest;

use biqc::compile::{FilterEntrySpec, FilterOperation, QuerySpec};

use crate::common::{plan_ok, select};

fn filtered(field_id: &str, operation: FilterOperation, args: &[&str]) -> QuerySpec {
    QuerySpec {
        filters: vec![FilterEntrySpec {
            id: "flt_1".into(),
            field_id: field_id.into(),
            operation,
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }],
        ..select(&["f_city"])
    }
}

#[rstest]
#[case::date_day_equality(
    "f_date", FilterOperation::Eq, &["2024-03-10"],
    "(ava_1.order_date = DATE '2024-03-10')"
)]
#[case::date_instant_equality_casts(
    "f_date", FilterOperation::Eq, &["2024-03-10 12:00:00"],
    "(CAST(ava_1.order_date AS TIMESTAMP) = TIMESTAMP '2024-03-10 12:00:00')"
)]
#[case::date_after_midday_excludes_the_day(
    "f_date", FilterOperation::Gte, &["2024-03-10 12:00:00"],
    "(ava_1.order_date > DATE '2024-03-10')"
)]
#[case::date_before_midday_keeps_the_day(
    "f_date", FilterOperation::Lt, &["2024-03-10 12:00:00"],
    "(ava_1.order_date <= DATE '2024-03-10')"
)]
#[case::date_between_bumps_partial_lower_bound(
    "f_date", FilterOperation::Between, &["2024-03-10 18:30:00", "2024-03-15"],
    "(ava_1.order_date BETWEEN DATE '2024-03-11' AND DATE '2024-03-15')"
)]
#[case::date_between_on_day_boundaries(
    "f_date", FilterOperation::Between, &["2024-03-10", "2024-03-15"],
    "(ava_1.order_date BETWEEN DATE '2024-03-10' AND DATE '2024-03-15')"
)]
#[case::datetime_fields_compare_exactly(
    "f_created", FilterOperation::Gte, &["2024-03-10 12:00:00"],
    "(ava_1.created_at >= TIMESTAMP '2024-03-10 12:00:00')"
)]
#[case::integer_membership(
    "f_qty", FilterOperation::In, &["1", "2", "3"],
    "(ava_1.qty IN (1, 2, 3))"
)]
#[case::is_not_null(
    "f_city", FilterOperation::IsNotNull, &[],
    "(NOT (ava_1.city IS NULL))"
)]
#[case::contains_uses_strpos(
    "f_city", FilterOperation::Contains, &["SF"],
    "(strpos(ava_1.city, 'SF') > 0)"
)]
#[case::not_contains_negates(
    "f_city", FilterOperation::NotContains, &["SF"],
    "(NOT (strpos(ava_1.city, 'SF') > 0))"
)]
#[case::startswith_anchors_at_one(
    "f_city", FilterOperation::StartsWith, &["SF"],
    "(strpos(ava_1.city, 'SF') = 1)"
)]
#[case::string_quotes_escape(
    "f_city", FilterOperation::Eq, &["O'Neil"],
    "(ava_1.city = 'O''Neil')"
)]
fn filters_translate_for_postgres(
    #[case] field_id: &str,
    #[case] operation: FilterOperation,
    #[case] args: &[&str],
    #[case] expected: &str,
) {
    let plan = plan_ok(&filtered(field_id, operation, args));
    let top = plan.single_top().unwrap();
    assert_eq!(top.filters.len(), 1);
    assert_eq!(top.filters[0].expr.to_string(), expected);
}

#[test]
fn filters_keep_their_field_id() {
    let plan = plan_ok(&filtered("f_qty", FilterOperation::Gt, &["5"]));
    let top = plan.single_top().unwrap();
    assert_eq!(top.filters[0].original_field_id.as_deref(), Some("f_qty"));
}
