//! Whole-plan shapes: which queries the planner emits, at which execution
//! level, and how they wire together.

use std::collections::BTreeSet;

use insta::assert_snapshot;

use biqc::compile::{OrderByEntrySpec, QuerySpec};
use biqc::ir::ast::OrderDirection;
use biqc::ir::query::{EmptyQueryMode, QueryMetaInfo};
use biqc::translate::TranslatedMultiQuery;

use crate::common::{grouped, plan_ok, render_plan, select};

#[test]
fn plain_aggregation_stays_on_the_source() {
    let spec = QuerySpec {
        order_by: vec![OrderByEntrySpec {
            field_id: "f_total".into(),
            direction: OrderDirection::Desc,
        }],
        limit: Some(10),
        ..grouped(&["f_city", "f_total"], &["f_city"])
    };

    assert_snapshot!(render_plan(&plan_ok(&spec)), @r"
    qq [source_db postgres]
      select: res_0=ava_1.city STRING; res_1=sum(ava_1.sales) FLOAT
      group_by: res_0=ava_1.city
      order_by: sum(ava_1.sales) DESC
      from: ava_1(city,sales,qty,order_date,created_at,category) root=ava_1
      limit: 10
    ");
}

#[test]
fn compeng_only_measure_relocates_the_scan() {
    let plan = plan_ok(&grouped(&["f_city", "f_total", "f_p90"], &["f_city"]));

    assert_snapshot!(render_plan(&plan), @r"
    qq [compeng compeng]
      select: res_0=e_0 STRING; res_1=sum(e_1) FLOAT; res_2=quantile(e_1, 0.9) FLOAT
      group_by: res_0=e_0
      from: q_0(e_0,e_1) root=q_0
    q_0 [source_db postgres]
      select: e_0=ava_1.city STRING; e_1=ava_1.sales FLOAT
      from: ava_1(city,sales,qty,order_date,created_at,category) root=ava_1
    ");

    // One DAG edge: the compute-engine top reads the source projection.
    let top = plan.single_top().unwrap();
    assert_eq!(
        top.froms.referenced_query_ids(),
        BTreeSet::from(["q_0".to_string()])
    );
    let bottoms = plan.bottom_queries();
    assert_eq!(bottoms.len(), 1);
    assert_eq!(bottoms[0].id, "q_0");
}

#[test]
fn fixed_lod_collapses_into_a_grouped_subquery() {
    let plan = plan_ok(&grouped(&["f_city", "f_city_sales"], &["f_city"]));

    // The aggregation grid equals the query grid, so the fork sub-query
    // doubles as the base; no second scan is spawned.
    assert_snapshot!(render_plan(&plan), @r"
    qq [source_db postgres]
      select: res_0=e_0 STRING; res_1=e_1 FLOAT
      from: q_0(e_1,e_0) root=q_0
    q_0 [source_db postgres]
      select: e_1=sum(ava_1.sales) FLOAT; e_0=ava_1.city STRING
      group_by: e_0=ava_1.city
      from: ava_1(city,sales,qty,order_date,created_at,category) root=ava_1
    ");
}

#[test]
fn share_of_total_joins_on_a_constant_key() {
    let plan = plan_ok(&grouped(&["f_city", "f_share"], &["f_city"]));

    // The dimensionless total joins every base row through a constant key;
    // equality is null-safe so NULL city groups still pair up.
    assert_snapshot!(render_plan(&plan), @r"
    qq [source_db postgres]
      select: res_0=e_0 STRING; res_1=(e_1 / e_3) FLOAT
      join_on: ((e_4 = e_2) OR ((e_4 IS NULL) AND (e_2 IS NULL))) [q_0 inner q_1]
      from: q_0(e_1,e_0,e_4); q_1(e_3,e_2) root=q_0
    q_0 [source_db postgres]
      select: e_1=sum(ava_1.sales) FLOAT; e_0=ava_1.city STRING; e_4=1 CONST_INTEGER
      group_by: e_0=ava_1.city
      from: ava_1(city,sales,qty,order_date,created_at,category) root=ava_1
    q_1 [source_db postgres]
      select: e_3=sum(ava_1.sales) FLOAT; e_2=1 CONST_INTEGER
      from: ava_1(city,sales,qty,order_date,created_at,category) root=ava_1
    ");
}

#[test]
fn joined_avatars_keep_their_relation() {
    let plan = plan_ok(&select(&["f_city", "f_mgr"]));

    assert_snapshot!(render_plan(&plan), @r"
    qq [source_db postgres]
      select: res_0=ava_1.city STRING; res_1=ava_2.manager STRING
      join_on: ((ava_1.city = ava_2.city) OR ((ava_1.city IS NULL) AND (ava_2.city IS NULL))) [ava_1 left ava_2]
      from: ava_1(city,sales,qty,order_date,created_at,category); ava_2(city,manager) root=ava_1
    ");
}

#[test]
fn paging_and_flags_survive_planning() {
    let spec = QuerySpec {
        limit: Some(100),
        offset: Some(20),
        distinct: true,
        meta: QueryMetaInfo {
            empty_query_mode: EmptyQueryMode::Empty,
            row_count_hard_limit: Some(500_000),
        },
        ..select(&["f_city"])
    };

    let plan = plan_ok(&spec);
    let top = plan.single_top().unwrap();
    assert_eq!(top.limit, Some(100));
    assert_eq!(top.offset, Some(20));
    assert!(top.distinct);
    assert_eq!(top.meta.empty_query_mode, EmptyQueryMode::Empty);
    assert_eq!(top.meta.row_count_hard_limit, Some(500_000));
}

#[test]
fn plans_serialize_stably() {
    let plan = plan_ok(&grouped(&["f_city", "f_total", "f_p90"], &["f_city"]));

    let json = serde_json::to_string(&plan).unwrap();
    let back: TranslatedMultiQuery = serde_json::from_str(&json).unwrap();
    similar_asserts::assert_eq!(back, plan);
}
