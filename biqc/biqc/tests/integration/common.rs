//! Shared fixture dataset and a compact plan rendering.
//!
//! The rendering puts each query of the plan into one block:
//!
//! ```text
//! <id> [<level> <dialect>]
//!   select: <alias>=<expr> <TYPE>; ...
//!   group_by: <alias>=<expr>; ...
//!   order_by: <expr> <DIR>; ...
//!   filters: <expr>; ...
//!   join_on: <expr> [<left> <join type> <right>]; ...
//!   from: <id>(<columns>); ... root=<root id>
//! ```
//!
//! plus `distinct` / `limit` / `offset` lines when set.

use biqc::compile::{
    Avatar, AvatarColumn, AvatarRelation, ConditionPart, Dataset, DatasetField, FieldAggregation,
    FieldCalc, QuerySpec, RelationCondition,
};
use biqc::ir::ast::{
    BinaryJoinOperator, Formula, FormulaItem, JoinType, LiteralValue, LodKind, LodSpecifier,
};
use biqc::ir::datatype::DataTypeKind;
use biqc::translate::multi::{TranslatedFormulaInfo, TranslatedQuery};
use biqc::translate::{Dialect, TranslatedMultiQuery};
use biqc::{Error, Options};
use itertools::Itertools;

pub fn postgres() -> Options {
    Options::default().with_source_dialect(Dialect::Postgres)
}

pub fn plan_ok(spec: &QuerySpec) -> TranslatedMultiQuery {
    biqc::plan(&sales_dataset(), spec, &postgres()).unwrap()
}

pub fn plan_err(dataset: &Dataset, spec: &QuerySpec) -> Error {
    biqc::plan(dataset, spec, &postgres())
        .unwrap_err()
        .into_first()
}

pub fn select(field_ids: &[&str]) -> QuerySpec {
    QuerySpec {
        select: field_ids.iter().map(|id| id.to_string()).collect(),
        ..Default::default()
    }
}

pub fn grouped(select_ids: &[&str], group_by_ids: &[&str]) -> QuerySpec {
    QuerySpec {
        group_by: group_by_ids.iter().map(|id| id.to_string()).collect(),
        ..select(select_ids)
    }
}

pub fn field(id: &str, title: &str, calc: FieldCalc) -> DatasetField {
    DatasetField {
        id: id.into(),
        title: title.into(),
        calc,
        cast: None,
        aggregation: FieldAggregation::None,
    }
}

pub fn direct(avatar_id: &str, column: &str) -> FieldCalc {
    FieldCalc::Direct {
        avatar_id: avatar_id.into(),
        source_column: column.into(),
    }
}

pub fn formula(formula: Formula) -> FieldCalc {
    FieldCalc::Formula { formula }
}

/// `SUM(arg)` pinned to an explicit dimension set, the `FIXED` form.
pub fn fixed_sum(arg: Formula, dims: Vec<Formula>) -> Formula {
    let mut sum = Formula::func("sum", vec![arg]);
    if let FormulaItem::Call(call) = &mut sum.kind {
        call.lod = Some(LodSpecifier {
            kind: LodKind::Fixed,
            dims,
        });
    }
    sum
}

fn column(name: &str, data_type: DataTypeKind) -> AvatarColumn {
    AvatarColumn {
        name: name.into(),
        data_type,
    }
}

/// Two avatars over one source: `orders` joined left onto `managers` by
/// city. Field ids are stable; tests reference them directly.
pub fn sales_dataset() -> Dataset {
    Dataset {
        fields: vec![
            field("f_city", "City", direct("ava_1", "city")),
            field("f_cat", "Category", direct("ava_1", "category")),
            field("f_sales", "Sales", direct("ava_1", "sales")),
            field("f_qty", "Qty", direct("ava_1", "qty")),
            field("f_date", "Order Date", direct("ava_1", "order_date")),
            field("f_created", "Created At", direct("ava_1", "created_at")),
            field("f_mgr", "Manager", direct("ava_2", "manager")),
            field(
                "f_total",
                "Total Sales",
                formula(Formula::func("sum", vec![Formula::field("Sales")])),
            ),
            field(
                "f_p90",
                "P90 Sales",
                formula(Formula::func(
                    "quantile",
                    vec![
                        Formula::field("Sales"),
                        Formula::literal(LiteralValue::Float(0.9)),
                    ],
                )),
            ),
            field(
                "f_city_sales",
                "City Sales",
                formula(fixed_sum(
                    Formula::field("Sales"),
                    vec![Formula::field("City")],
                )),
            ),
            field(
                "f_cat_sales",
                "Category Sales",
                formula(fixed_sum(
                    Formula::field("Sales"),
                    vec![Formula::field("Category")],
                )),
            ),
            field(
                "f_share",
                "Sales Share",
                formula(Formula::binary(
                    "/",
                    Formula::func("sum", vec![Formula::field("Sales")]),
                    fixed_sum(Formula::field("Sales"), vec![]),
                )),
            ),
        ],
        avatars: vec![
            Avatar {
                id: "ava_1".into(),
                title: "orders".into(),
                source_id: "src_1".into(),
                columns: vec![
                    column("city", DataTypeKind::String),
                    column("sales", DataTypeKind::Float),
                    column("qty", DataTypeKind::Integer),
                    column("order_date", DataTypeKind::Date),
                    column("created_at", DataTypeKind::Datetime),
                    column("category", DataTypeKind::String),
                ],
            },
            Avatar {
                id: "ava_2".into(),
                title: "managers".into(),
                source_id: "src_1".into(),
                columns: vec![
                    column("city", DataTypeKind::String),
                    column("manager", DataTypeKind::String),
                ],
            },
        ],
        relations: vec![AvatarRelation {
            id: "rel_1".into(),
            left_avatar_id: "ava_1".into(),
            right_avatar_id: "ava_2".into(),
            join_type: JoinType::Left,
            conditions: vec![RelationCondition {
                operator: BinaryJoinOperator::Eq,
                left: ConditionPart::Direct {
                    column: "city".into(),
                },
                right: ConditionPart::Direct {
                    column: "city".into(),
                },
            }],
        }],
        root_avatar_id: None,
    }
}

pub fn render_plan(multi: &TranslatedMultiQuery) -> String {
    multi.queries.iter().map(render_query).join("\n")
}

fn render_query(query: &TranslatedQuery) -> String {
    let mut lines = vec![format!(
        "{} [{} {}]",
        query.id, query.level_type, query.dialect
    )];
    if !query.select.is_empty() {
        lines.push(format!(
            "  select: {}",
            query.select.iter().map(render_typed).join("; ")
        ));
    }
    if !query.group_by.is_empty() {
        lines.push(format!(
            "  group_by: {}",
            query.group_by.iter().map(render_plain).join("; ")
        ));
    }
    if !query.order_by.is_empty() {
        lines.push(format!(
            "  order_by: {}",
            query
                .order_by
                .iter()
                .map(|entry| format!("{} {}", entry.info.expr, entry.direction))
                .join("; ")
        ));
    }
    if !query.filters.is_empty() {
        lines.push(format!(
            "  filters: {}",
            query
                .filters
                .iter()
                .map(|filter| filter.expr.to_string())
                .join("; ")
        ));
    }
    if !query.join_on.is_empty() {
        lines.push(format!(
            "  join_on: {}",
            query
                .join_on
                .iter()
                .map(|join| {
                    format!(
                        "{} [{} {} {}]",
                        join.expr, join.left_id, join.join_type, join.right_id
                    )
                })
                .join("; ")
        ));
    }
    if !query.froms.froms.is_empty() {
        lines.push(format!(
            "  from: {} root={}",
            query
                .froms
                .froms
                .iter()
                .map(|from| {
                    format!(
                        "{}({})",
                        from.id(),
                        from.columns().iter().map(|c| c.name.as_str()).join(",")
                    )
                })
                .join("; "),
            query.froms.root_from_id.as_deref().unwrap_or("-")
        ));
    }
    if query.distinct {
        lines.push("  distinct".into());
    }
    if let Some(limit) = query.limit {
        lines.push(format!("  limit: {limit}"));
    }
    if let Some(offset) = query.offset {
        lines.push(format!("  offset: {offset}"));
    }
    lines.join("\n")
}

fn render_typed(info: &TranslatedFormulaInfo) -> String {
    match &info.alias {
        Some(alias) => format!("{alias}={} {}", info.expr, info.data_type),
        None => format!("{} {}", info.expr, info.data_type),
    }
}

fn render_plain(info: &TranslatedFormulaInfo) -> String {
    match &info.alias {
        Some(alias) => format!("{alias}={}", info.expr),
        None => info.expr.to_string(),
    }
}
