//! Hand-built translated queries for planner and executor tests.

use biqc::ir::ast::JoinType;
use biqc::ir::datatype::DataType;
use biqc::ir::query::{
    AvatarFromObject, ExecutionLevel, FromObject, JoinedFromObject, QueryMetaInfo,
    SubqueryFromObject,
};
use biqc::translate::multi::{TranslatedFormulaInfo, TranslatedJoinOn};
use biqc::translate::{BackendExpr, Dialect, TranslatedQuery};

pub(crate) fn formula(alias: &str) -> TranslatedFormulaInfo {
    TranslatedFormulaInfo {
        expr: BackendExpr::column(None, alias),
        alias: Some(alias.to_string()),
        data_type: DataType::INTEGER,
        original_field_id: None,
    }
}

pub(crate) fn avatar_from(id: &str) -> FromObject {
    FromObject::Avatar(AvatarFromObject {
        id: id.to_string(),
        alias: id.to_string(),
        columns: vec![],
        avatar_id: id.to_string(),
        source_id: "src_1".to_string(),
    })
}

pub(crate) fn subquery_from(query_id: &str) -> FromObject {
    FromObject::Subquery(SubqueryFromObject {
        id: query_id.to_string(),
        alias: query_id.to_string(),
        columns: vec![],
        query_id: query_id.to_string(),
    })
}

pub(crate) fn join_on(left: &str, right: &str) -> TranslatedJoinOn {
    TranslatedJoinOn {
        expr: BackendExpr::binary(
            "=",
            BackendExpr::column(Some(left.to_string()), "res_0"),
            BackendExpr::column(Some(right.to_string()), "res_0"),
        ),
        left_id: left.to_string(),
        right_id: right.to_string(),
        join_type: JoinType::Inner,
    }
}

/// A one-column query at `level`; the first FROM entry becomes the root.
pub(crate) fn query(id: &str, level: ExecutionLevel, froms: Vec<FromObject>) -> TranslatedQuery {
    let dialect = match level {
        ExecutionLevel::SourceDb => Dialect::Postgres,
        ExecutionLevel::Compeng => Dialect::Compeng,
    };
    TranslatedQuery {
        id: id.to_string(),
        level_type: level,
        dialect,
        select: vec![formula("res_0")],
        group_by: vec![],
        order_by: vec![],
        filters: vec![],
        join_on: vec![],
        froms: JoinedFromObject {
            root_from_id: froms.first().map(|from| from.id().to_string()),
            froms,
        },
        limit: None,
        offset: None,
        distinct: false,
        meta: QueryMetaInfo::default(),
    }
}
