//! Compiled query IR.
//!
//! A [`CompiledQuery`] is the backend-independent result of compiling one
//! field/filter/order specification; a [`CompiledMultiQuery`] is the DAG the
//! splitter produces out of it. All of these values are immutable once
//! built: every rewrite pass returns new values.

use std::collections::BTreeSet;

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, WithErrorInfo};
use crate::ir::ast::{Formula, JoinType, OrderDirection};

/// Id of the query a plain single-query request compiles into.
pub const BASE_QUERY_ID: &str = "qq";

pub type AvatarId = String;
pub type QueryId = String;
pub type FieldId = String;

/// Where a query is allowed to execute.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionLevel {
    SourceDb,
    Compeng,
}

/// What to produce when a query turns out to have no FROM source at all.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, Default,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmptyQueryMode {
    /// Fail the whole request.
    #[default]
    Error,
    /// Zero rows.
    Empty,
    /// One row of zero columns.
    EmptyRow,
}

/// A compiled formula with its bookkeeping: the alias it is selected under
/// and the avatars its field references resolve through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledFormulaInfo {
    pub formula: Formula,
    pub alias: Option<String>,
    pub avatar_ids: BTreeSet<AvatarId>,
    pub original_field_id: Option<FieldId>,
}

impl CompiledFormulaInfo {
    pub fn named_alias(&self) -> Result<&str> {
        self.alias
            .as_deref()
            .ok_or_else(|| Error::new_assert("formula alias is required at this stage"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledOrderByFormulaInfo {
    pub info: CompiledFormulaInfo,
    pub direction: OrderDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledFilterFormulaInfo {
    pub info: CompiledFormulaInfo,
    pub original_filter_id: Option<String>,
}

/// A join condition between two FROM entries of one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledJoinOnFormulaInfo {
    pub info: CompiledFormulaInfo,
    pub left_id: String,
    pub right_id: String,
    pub join_type: JoinType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromColumn {
    pub id: String,
    pub name: String,
}

impl FromColumn {
    pub fn new<S: Into<String>>(id: S, name: S) -> Self {
        FromColumn {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A real data-source avatar appearing in a FROM clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarFromObject {
    pub id: String,
    pub alias: String,
    pub columns: Vec<FromColumn>,
    pub avatar_id: AvatarId,
    pub source_id: String,
}

/// A reference to another compiled query, used as a FROM entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubqueryFromObject {
    pub id: String,
    pub alias: String,
    pub columns: Vec<FromColumn>,
    pub query_id: QueryId,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner, Serialize, Deserialize)]
pub enum FromObject {
    Avatar(AvatarFromObject),
    Subquery(SubqueryFromObject),
}

impl FromObject {
    pub fn id(&self) -> &str {
        match self {
            FromObject::Avatar(avatar) => &avatar.id,
            FromObject::Subquery(subquery) => &subquery.id,
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            FromObject::Avatar(avatar) => &avatar.alias,
            FromObject::Subquery(subquery) => &subquery.alias,
        }
    }

    pub fn columns(&self) -> &[FromColumn] {
        match self {
            FromObject::Avatar(avatar) => &avatar.columns,
            FromObject::Subquery(subquery) => &subquery.columns,
        }
    }
}

/// The FROM clause of a compiled query: an ordered list of sources plus the
/// designated root they are joined onto. Join conditions live on the query
/// itself, in `join_on`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JoinedFromObject {
    pub root_from_id: Option<String>,
    pub froms: Vec<FromObject>,
}

impl JoinedFromObject {
    pub fn get(&self, id: &str) -> Option<&FromObject> {
        self.froms.iter().find(|from| from.id() == id)
    }

    pub fn avatar_ids(&self) -> BTreeSet<AvatarId> {
        self.froms
            .iter()
            .filter_map(|from| from.as_avatar())
            .map(|avatar| avatar.avatar_id.clone())
            .collect()
    }

    pub fn referenced_query_ids(&self) -> BTreeSet<QueryId> {
        self.froms
            .iter()
            .filter_map(|from| from.as_subquery())
            .map(|subquery| subquery.query_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueryMetaInfo {
    pub empty_query_mode: EmptyQueryMode,
    pub row_count_hard_limit: Option<u64>,
}

/// The parts of a query a split mask may point into.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueryPart {
    Select,
    GroupBy,
    OrderBy,
    Filters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub id: QueryId,
    pub level_type: ExecutionLevel,
    pub froms: JoinedFromObject,
    pub select: Vec<CompiledFormulaInfo>,
    pub group_by: Vec<CompiledFormulaInfo>,
    pub order_by: Vec<CompiledOrderByFormulaInfo>,
    pub filters: Vec<CompiledFilterFormulaInfo>,
    pub join_on: Vec<CompiledJoinOnFormulaInfo>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: bool,
    pub meta: QueryMetaInfo,
}

impl CompiledQuery {
    pub fn part_len(&self, part: QueryPart) -> usize {
        match part {
            QueryPart::Select => self.select.len(),
            QueryPart::GroupBy => self.group_by.len(),
            QueryPart::OrderBy => self.order_by.len(),
            QueryPart::Filters => self.filters.len(),
        }
    }

    pub fn formula_at(&self, part: QueryPart, index: usize) -> Option<&CompiledFormulaInfo> {
        match part {
            QueryPart::Select => self.select.get(index),
            QueryPart::GroupBy => self.group_by.get(index),
            QueryPart::OrderBy => self.order_by.get(index).map(|ob| &ob.info),
            QueryPart::Filters => self.filters.get(index).map(|fl| &fl.info),
        }
    }

    pub fn iter_formula_infos(&self) -> impl Iterator<Item = &CompiledFormulaInfo> {
        self.select
            .iter()
            .chain(self.group_by.iter())
            .chain(self.order_by.iter().map(|ob| &ob.info))
            .chain(self.filters.iter().map(|fl| &fl.info))
            .chain(self.join_on.iter().map(|jo| &jo.info))
    }

    /// Whether the query reads from no source at all. Such a query triggers
    /// the empty-query policy instead of executing.
    pub fn is_empty(&self) -> bool {
        self.froms.froms.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CompiledMultiQuery {
    pub queries: Vec<CompiledQuery>,
}

impl CompiledMultiQuery {
    pub fn single(query: CompiledQuery) -> Self {
        CompiledMultiQuery {
            queries: vec![query],
        }
    }

    pub fn get_query(&self, id: &str) -> Option<&CompiledQuery> {
        self.queries.iter().find(|query| query.id == id)
    }

    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    fn referenced_query_ids(&self) -> BTreeSet<QueryId> {
        self.queries
            .iter()
            .flat_map(|query| query.froms.referenced_query_ids())
            .collect()
    }

    /// Queries no other query consumes.
    pub fn top_queries(&self) -> Vec<&CompiledQuery> {
        let referenced = self.referenced_query_ids();
        self.queries
            .iter()
            .filter(|query| !referenced.contains(&query.id))
            .collect()
    }

    /// The single outermost query. More than one (or none) means the DAG is
    /// malformed.
    pub fn single_top(&self) -> Result<&CompiledQuery> {
        let tops = self.top_queries();
        match tops.as_slice() {
            [top] => Ok(top),
            tops => Err(Error::new_assert(format!(
                "expected exactly one top query, found {}",
                tops.len()
            ))
            .with_code(crate::error::codes::INVALID_QUERY_STRUCTURE)),
        }
    }

    /// Queries that read only from real avatars.
    pub fn bottom_queries(&self) -> Vec<&CompiledQuery> {
        self.queries
            .iter()
            .filter(|query| query.froms.referenced_query_ids().is_empty())
            .collect()
    }

    /// FROM entries that are real avatars rather than other queries of the
    /// DAG, in plan order.
    pub fn base_froms(&self) -> Vec<&FromObject> {
        self.queries
            .iter()
            .flat_map(|query| &query.froms.froms)
            .filter(|from| from.is_avatar())
            .collect()
    }

    /// Root FROM ids that resolve to real avatars, deduplicated in plan
    /// order. Execution anchors source-less joins on the first of these.
    pub fn base_root_from_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = vec![];
        for query in &self.queries {
            let Some(root_id) = query.froms.root_from_id.as_deref() else {
                continue;
            };
            let is_base = query
                .froms
                .get(root_id)
                .is_some_and(|from| from.is_avatar());
            if is_base && !ids.iter().any(|id| id == root_id) {
                ids.push(root_id.to_string());
            }
        }
        ids
    }

    /// Every identifier present anywhere in the multi-query. Id generators
    /// are seeded with this set so fresh ids never collide with caller ids.
    pub fn all_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for query in &self.queries {
            ids.insert(query.id.clone());
            for from in &query.froms.froms {
                ids.insert(from.id().to_string());
                ids.insert(from.alias().to_string());
                for column in from.columns() {
                    ids.insert(column.id.clone());
                }
            }
            for info in query.iter_formula_infos() {
                if let Some(alias) = &info.alias {
                    ids.insert(alias.clone());
                }
                ids.extend(info.avatar_ids.iter().cloned());
            }
        }
        ids
    }
}
