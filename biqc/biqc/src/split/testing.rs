//! Shared fixtures and a compact renderer for splitter tests.

use itertools::Itertools;

use crate::ir::query::{
    AvatarFromObject, CompiledFormulaInfo, CompiledMultiQuery, CompiledQuery, FromColumn,
    FromObject,
};
use crate::ir::ast::Formula;
use crate::registry::OperationRegistry;

pub(crate) fn registry() -> OperationRegistry {
    OperationRegistry::standard()
}

pub(crate) fn avatar_from(avatar_id: &str, columns: &[&str]) -> FromObject {
    FromObject::Avatar(AvatarFromObject {
        id: avatar_id.to_string(),
        alias: avatar_id.to_string(),
        columns: columns
            .iter()
            .map(|name| FromColumn::new(format!("{avatar_id}.{name}"), name.to_string()))
            .collect(),
        avatar_id: avatar_id.to_string(),
        source_id: "src_1".to_string(),
    })
}

pub(crate) fn select_info(formula: Formula, alias: &str, avatar_ids: &[&str]) -> CompiledFormulaInfo {
    CompiledFormulaInfo {
        formula,
        alias: Some(alias.to_string()),
        avatar_ids: avatar_ids.iter().map(|s| s.to_string()).collect(),
        original_field_id: None,
    }
}

pub(crate) fn render(query: &CompiledQuery) -> String {
    let mut out = format!("{} [{}]", query.id, query.level_type);
    let infos = |items: &[CompiledFormulaInfo]| {
        items
            .iter()
            .map(|info| {
                format!(
                    "{}={} @{:?}",
                    info.alias.as_deref().unwrap_or("_"),
                    info.formula,
                    info.avatar_ids.iter().collect::<Vec<_>>()
                )
            })
            .join("; ")
    };
    out.push_str(&format!("\n  select: {}", infos(&query.select)));
    if !query.group_by.is_empty() {
        out.push_str(&format!("\n  group_by: {}", infos(&query.group_by)));
    }
    if !query.order_by.is_empty() {
        let rendered = query
            .order_by
            .iter()
            .map(|ob| format!("{} {}", ob.info.formula, ob.direction))
            .join("; ");
        out.push_str(&format!("\n  order_by: {rendered}"));
    }
    if !query.filters.is_empty() {
        let rendered = query
            .filters
            .iter()
            .map(|f| f.info.formula.to_string())
            .join("; ");
        out.push_str(&format!("\n  filters: {rendered}"));
    }
    for jo in &query.join_on {
        out.push_str(&format!(
            "\n  join_on: {} [{} {} {}]",
            jo.info.formula, jo.left_id, jo.join_type, jo.right_id
        ));
    }
    let froms = query
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
        .join("; ");
    out.push_str(&format!(
        "\n  from: {froms} root={}",
        query.froms.root_from_id.as_deref().unwrap_or("-")
    ));
    out
}

pub(crate) fn render_multi(multi: &CompiledMultiQuery) -> String {
    multi.queries.iter().map(render).join("\n")
}
