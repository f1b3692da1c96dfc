//! Multi-level translation: every query of a compiled DAG rendered to
//! backend expressions under the dialect of its execution level.
//!
//! Queries are translated bottom-up so that the select types of an inner
//! query are known when an outer query references its columns.

use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{codes, Error, Result, WithErrorInfo};
use crate::ir::ast::{JoinType, OrderDirection};
use crate::ir::datatype::DataType;
use crate::ir::query::{
    AvatarFromObject, CompiledFormulaInfo, CompiledMultiQuery, CompiledQuery, ExecutionLevel,
    FieldId, FromObject, JoinedFromObject, QueryId, QueryMetaInfo, SubqueryFromObject,
};
use crate::registry::{OperationRegistry, ScopeSet};
use crate::translate::backend::BackendExpr;
use crate::translate::dialect::Dialect;
use crate::translate::translator::{TranslationEnvironment, Translator};
use crate::utils;

/// Assigns render aliases to FROM entries: `t{n}` in first-reference order,
/// memoized per id. Ids that already work as bare SQL aliases keep
/// themselves.
#[derive(Debug, Default)]
pub struct AvatarAliasMapper {
    assigned: HashMap<String, String>,
    counter: usize,
}

impl AvatarAliasMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alias_for(&mut self, id: &str) -> String {
        if let Some(found) = self.assigned.get(id) {
            return found.clone();
        }
        let alias = if utils::valid_short_ident().is_match(id) {
            id.to_string()
        } else {
            self.generate()
        };
        self.assigned.insert(id.to_string(), alias.clone());
        alias
    }

    fn generate(&mut self) -> String {
        // A raw id may already occupy the next `t{n}`.
        loop {
            self.counter += 1;
            let alias = format!("t{}", self.counter);
            if !self.assigned.values().any(|taken| *taken == alias) {
                return alias;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedFormulaInfo {
    pub expr: BackendExpr,
    pub alias: Option<String>,
    pub data_type: DataType,
    pub original_field_id: Option<FieldId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedOrderBy {
    pub info: TranslatedFormulaInfo,
    pub direction: OrderDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedJoinOn {
    pub expr: BackendExpr,
    pub left_id: String,
    pub right_id: String,
    pub join_type: JoinType,
}

/// One query of the DAG with every formula rendered for its dialect.
/// FROM aliases are final here; `select` entries are always aliased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedQuery {
    pub id: QueryId,
    pub level_type: ExecutionLevel,
    pub dialect: Dialect,
    pub select: Vec<TranslatedFormulaInfo>,
    pub group_by: Vec<TranslatedFormulaInfo>,
    pub order_by: Vec<TranslatedOrderBy>,
    pub filters: Vec<TranslatedFormulaInfo>,
    pub join_on: Vec<TranslatedJoinOn>,
    pub froms: JoinedFromObject,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: bool,
    pub meta: QueryMetaInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TranslatedMultiQuery {
    pub queries: Vec<TranslatedQuery>,
}

impl TranslatedMultiQuery {
    pub fn get_query(&self, id: &str) -> Option<&TranslatedQuery> {
        self.queries.iter().find(|query| query.id == id)
    }

    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    pub fn top_queries(&self) -> Vec<&TranslatedQuery> {
        let referenced: Vec<QueryId> = self
            .queries
            .iter()
            .flat_map(|query| query.froms.referenced_query_ids())
            .collect();
        self.queries
            .iter()
            .filter(|query| !referenced.contains(&query.id))
            .collect()
    }

    pub fn single_top(&self) -> Result<&TranslatedQuery> {
        let tops = self.top_queries();
        match tops.as_slice() {
            [top] => Ok(top),
            tops => Err(Error::new_assert(format!(
                "expected exactly one top query, found {}",
                tops.len()
            ))
            .with_code(codes::INVALID_QUERY_STRUCTURE)),
        }
    }

    pub fn bottom_queries(&self) -> Vec<&TranslatedQuery> {
        self.queries
            .iter()
            .filter(|query| query.froms.referenced_query_ids().is_empty())
            .collect()
    }

    /// Queries assigned to the given level, in DAG order.
    pub fn queries_at(&self, level: ExecutionLevel) -> Vec<&TranslatedQuery> {
        self.queries
            .iter()
            .filter(|query| query.level_type == level)
            .collect()
    }

    /// Root FROM ids that resolve to real avatars, deduplicated in plan
    /// order. A source-less join binds its anchor avatar to the first of
    /// these.
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
}

pub struct MultiLevelTranslator<'a> {
    registry: &'a OperationRegistry,
    source_dialect: Dialect,
    /// Avatar column types, keyed `{avatar_id}.{column_name}`.
    column_types: HashMap<String, DataType>,
    warnings: Vec<Error>,
}

impl<'a> MultiLevelTranslator<'a> {
    pub fn new(
        registry: &'a OperationRegistry,
        source_dialect: Dialect,
        column_types: HashMap<String, DataType>,
    ) -> Self {
        MultiLevelTranslator {
            registry,
            source_dialect,
            column_types,
            warnings: Vec::new(),
        }
    }

    pub fn take_warnings(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.warnings)
    }

    fn dialect_for(&self, level: ExecutionLevel) -> Dialect {
        match level {
            ExecutionLevel::SourceDb => self.source_dialect,
            ExecutionLevel::Compeng => Dialect::Compeng,
        }
    }

    pub fn translate(&mut self, multi: &CompiledMultiQuery) -> Result<TranslatedMultiQuery> {
        let dependencies: Vec<(QueryId, Vec<QueryId>)> = multi
            .queries
            .iter()
            .map(|query| {
                (
                    query.id.clone(),
                    query.froms.referenced_query_ids().into_iter().collect(),
                )
            })
            .collect();
        let Some(order) = utils::toposort(&dependencies) else {
            return Err(Error::new_assert("query graph contains a reference cycle")
                .with_code(codes::INVALID_QUERY_STRUCTURE));
        };
        let order: Vec<QueryId> = order.into_iter().cloned().collect();

        let mut select_types: HashMap<QueryId, HashMap<String, DataType>> = HashMap::new();
        let mut translated: HashMap<QueryId, TranslatedQuery> = HashMap::new();
        for id in &order {
            // Ids in `order` come from the queries themselves.
            let Some(query) = multi.get_query(id) else {
                continue;
            };
            let (done, typed_aliases) = self.translate_query(query, &select_types)?;
            select_types.insert(id.clone(), typed_aliases);
            translated.insert(id.clone(), done);
        }

        let queries = multi
            .queries
            .iter()
            .map(|query| {
                translated.remove(&query.id).ok_or_else(|| {
                    Error::new_assert(format!("duplicate query id {}", query.id))
                        .with_code(codes::INVALID_QUERY_STRUCTURE)
                })
            })
            .try_collect()?;
        Ok(TranslatedMultiQuery { queries })
    }

    fn translate_query(
        &mut self,
        query: &CompiledQuery,
        select_types: &HashMap<QueryId, HashMap<String, DataType>>,
    ) -> Result<(TranslatedQuery, HashMap<String, DataType>)> {
        let dialect = self.dialect_for(query.level_type);
        let (env, froms) = self.environment_for(query, dialect, select_types)?;
        let mut translator = Translator::new(self.registry, &env);

        let mut typed_aliases = HashMap::new();
        let mut select = Vec::with_capacity(query.select.len());
        for info in &query.select {
            let (expr, data_type) = translator.translate(&info.formula)?;
            let alias = info.named_alias()?.to_string();
            typed_aliases.insert(alias.clone(), data_type);
            select.push(TranslatedFormulaInfo {
                expr: translator.coerce_for_projection(expr, data_type),
                alias: Some(alias),
                data_type,
                original_field_id: info.original_field_id.clone(),
            });
        }

        let mut group_by = Vec::with_capacity(query.group_by.len());
        for info in &query.group_by {
            group_by.push(translate_info(&mut translator, info)?);
        }
        let mut order_by = Vec::with_capacity(query.order_by.len());
        for item in &query.order_by {
            order_by.push(TranslatedOrderBy {
                info: translate_info(&mut translator, &item.info)?,
                direction: item.direction,
            });
        }
        let mut filters = Vec::with_capacity(query.filters.len());
        for item in &query.filters {
            filters.push(translate_info(&mut translator, &item.info)?);
        }
        let mut join_on = Vec::with_capacity(query.join_on.len());
        for item in &query.join_on {
            let (expr, _) = translator.translate(&item.info.formula)?;
            join_on.push(TranslatedJoinOn {
                expr,
                left_id: item.left_id.clone(),
                right_id: item.right_id.clone(),
                join_type: item.join_type,
            });
        }
        self.warnings.extend(translator.take_warnings());

        let translated = TranslatedQuery {
            id: query.id.clone(),
            level_type: query.level_type,
            dialect,
            select,
            group_by,
            order_by,
            filters,
            join_on,
            froms,
            limit: query.limit,
            offset: query.offset,
            distinct: query.distinct,
            meta: query.meta.clone(),
        };
        Ok((translated, typed_aliases))
    }

    /// Builds the translation environment of one query and its FROM clause
    /// with final aliases. Subquery columns take the types recorded when the
    /// inner query's select list was translated.
    fn environment_for(
        &self,
        query: &CompiledQuery,
        dialect: Dialect,
        select_types: &HashMap<QueryId, HashMap<String, DataType>>,
    ) -> Result<(TranslationEnvironment, JoinedFromObject)> {
        let mut mapper = AvatarAliasMapper::new();
        let mut field_types = HashMap::new();
        let mut avatar_aliases = HashMap::new();
        let mut froms = Vec::with_capacity(query.froms.froms.len());

        for from in &query.froms.froms {
            let alias = mapper.alias_for(from.id());
            avatar_aliases.insert(from.id().to_string(), alias.clone());
            match from {
                FromObject::Avatar(avatar) => {
                    if avatar.avatar_id != avatar.id {
                        avatar_aliases.insert(avatar.avatar_id.clone(), alias.clone());
                    }
                    for column in &avatar.columns {
                        let key = qualified(&avatar.avatar_id, &column.name);
                        // Unknown columns stay absent and fail as unknown
                        // fields if something references them.
                        let Some(&data_type) = self.column_types.get(&key) else {
                            continue;
                        };
                        if avatar.id != avatar.avatar_id {
                            field_types.insert(qualified(&avatar.id, &column.name), data_type);
                        }
                        field_types.insert(key, data_type);
                    }
                    froms.push(FromObject::Avatar(AvatarFromObject {
                        alias,
                        ..avatar.clone()
                    }));
                }
                FromObject::Subquery(subquery) => {
                    let inner = select_types.get(&subquery.query_id).ok_or_else(|| {
                        Error::new_assert(format!(
                            "query {} is referenced before it is translated",
                            subquery.query_id
                        ))
                    })?;
                    for column in &subquery.columns {
                        let Some(&data_type) = inner.get(&column.name) else {
                            return Err(Error::new_assert(format!(
                                "column {} is not selected by query {}",
                                column.name, subquery.query_id
                            )));
                        };
                        // Cropped queries reference relocated aliases bare.
                        field_types.insert(column.name.clone(), data_type);
                        field_types.insert(qualified(&subquery.id, &column.name), data_type);
                    }
                    froms.push(FromObject::Subquery(SubqueryFromObject {
                        alias,
                        ..subquery.clone()
                    }));
                }
            }
        }

        let env = TranslationEnvironment::new(dialect, field_types)
            .with_scopes(ScopeSet::INTERNAL)
            .with_avatar_aliases(avatar_aliases);
        let froms = JoinedFromObject {
            root_from_id: query.froms.root_from_id.clone(),
            froms,
        };
        Ok((env, froms))
    }
}

fn qualified(scope: &str, name: &str) -> String {
    format!("{scope}.{name}")
}

fn translate_info(
    translator: &mut Translator<'_>,
    info: &CompiledFormulaInfo,
) -> Result<TranslatedFormulaInfo> {
    let (expr, data_type) = translator.translate(&info.formula)?;
    Ok(TranslatedFormulaInfo {
        expr,
        alias: info.alias.clone(),
        data_type,
        original_field_id: info.original_field_id.clone(),
    })
}
