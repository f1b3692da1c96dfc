//! Request assembly: one query spec into one compiled query.
//!
//! Fields compile through [FormulaCompiler], get stable `res_{n}` aliases
//! shared across query parts, and the avatars their columns touch decide
//! which joins the query carries. Problems across all parts are collected
//! and reported together.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::compile::filters::compile_filter_formula;
use crate::compile::formula::{used_avatar_ids, FormulaCompiler};
use crate::compile::spec::{AvatarRelation, ConditionPart, Dataset, QuerySpec};
use crate::error::{codes, Error, Errors, Result, WithErrorInfo};
use crate::ir::ast::{Formula, NodeExtract};
use crate::ir::query::{
    AvatarFromObject, AvatarId, CompiledFilterFormulaInfo, CompiledFormulaInfo,
    CompiledJoinOnFormulaInfo, CompiledOrderByFormulaInfo, CompiledQuery, ExecutionLevel,
    FromColumn, FromObject, JoinedFromObject, BASE_QUERY_ID,
};
use crate::registry::OperationRegistry;
use crate::translate::Dialect;

/// Ceiling on the number of field references one query may carry across
/// select, group-by, order-by and filters.
pub const DEFAULT_FIELD_COUNT_LIMIT: usize = 1000;

/// Hands out `res_{n}` aliases, one per distinct formula.
#[derive(Default)]
struct AliasAllocator {
    assigned: HashMap<NodeExtract, String>,
    counter: usize,
}

impl AliasAllocator {
    fn alias_for(&mut self, formula: &Formula) -> String {
        let extract = NodeExtract::of(formula);
        if let Some(alias) = self.assigned.get(&extract) {
            return alias.clone();
        }
        let alias = format!("res_{}", self.counter);
        self.counter += 1;
        self.assigned.insert(extract, alias.clone());
        alias
    }
}

pub struct QueryCompiler<'a> {
    registry: &'a OperationRegistry,
    dataset: &'a Dataset,
    dialect: Dialect,
    field_count_limit: usize,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(
        registry: &'a OperationRegistry,
        dataset: &'a Dataset,
        dialect: Dialect,
    ) -> Result<Self, Errors> {
        dataset.validate()?;
        Ok(QueryCompiler {
            registry,
            dataset,
            dialect,
            field_count_limit: DEFAULT_FIELD_COUNT_LIMIT,
        })
    }

    pub fn with_field_count_limit(mut self, limit: usize) -> Self {
        self.field_count_limit = limit;
        self
    }

    pub fn compile(&self, spec: &QuerySpec) -> Result<CompiledQuery, Errors> {
        let field_count =
            spec.select.len() + spec.group_by.len() + spec.order_by.len() + spec.filters.len();
        if field_count > self.field_count_limit {
            return Err(Error::new_simple(format!(
                "query references {field_count} fields, the limit is {}",
                self.field_count_limit
            ))
            .with_code(codes::TOO_MANY_FIELDS)
            .into());
        }
        if spec.select.is_empty() {
            return Err(Error::new_simple("query selects no fields")
                .with_code(codes::INVALID_QUERY_STRUCTURE)
                .into());
        }

        let mut errors: Vec<Error> = Vec::new();
        let mut compiler = FormulaCompiler::new(self.registry, self.dataset, self.dialect)
            .with_group_by(spec.group_by.clone())
            .with_default_ordering(
                spec.order_by
                    .iter()
                    .map(|entry| (entry.field_id.clone(), entry.direction))
                    .collect(),
            )
            .with_parameter_values(spec.parameters.iter().cloned());
        let mut aliases = AliasAllocator::default();

        let mut select: Vec<CompiledFormulaInfo> = Vec::new();
        let mut select_aliases: HashSet<String> = HashSet::new();
        let mut copy_counter = 0;
        for field_id in &spec.select {
            match compiler.compile_field(field_id) {
                Ok(mut info) => {
                    let mut alias = aliases.alias_for(&info.formula);
                    // The same field twice still needs two distinct columns.
                    if !select_aliases.insert(alias.clone()) {
                        alias = format!("{alias}_cp{copy_counter}");
                        copy_counter += 1;
                        select_aliases.insert(alias.clone());
                    }
                    info.alias = Some(alias);
                    select.push(info);
                }
                Err(error) => errors.push(error),
            }
        }

        let mut group_by: Vec<CompiledFormulaInfo> = Vec::new();
        for field_id in &spec.group_by {
            match compiler.compile_field(field_id) {
                Ok(mut info) => {
                    info.alias = Some(aliases.alias_for(&info.formula));
                    group_by.push(info);
                }
                Err(error) => errors.push(error),
            }
        }

        let mut order_by: Vec<CompiledOrderByFormulaInfo> = Vec::new();
        let mut ordered: HashSet<NodeExtract> = HashSet::new();
        for entry in &spec.order_by {
            match compiler.compile_field(&entry.field_id) {
                Ok(mut info) => {
                    if !ordered.insert(NodeExtract::of(&info.formula)) {
                        continue;
                    }
                    info.alias = Some(aliases.alias_for(&info.formula));
                    order_by.push(CompiledOrderByFormulaInfo {
                        info,
                        direction: entry.direction,
                    });
                }
                Err(error) => errors.push(error),
            }
        }

        let mut filters: Vec<CompiledFilterFormulaInfo> = Vec::new();
        let mut filter_ids: HashSet<&str> = HashSet::new();
        for entry in &spec.filters {
            if !filter_ids.insert(&entry.id) {
                errors.push(
                    Error::new_simple(format!("duplicate filter id `{}`", entry.id))
                        .with_code(codes::INVALID_QUERY_STRUCTURE),
                );
                continue;
            }
            match compile_filter_formula(&mut compiler, entry) {
                Ok(mut compiled) => {
                    compiled.info.alias = Some(aliases.alias_for(&compiled.info.formula));
                    filters.push(compiled);
                }
                Err(error) => errors.push(error),
            }
        }

        let used_avatars: BTreeSet<AvatarId> = select
            .iter()
            .chain(group_by.iter())
            .chain(order_by.iter().map(|entry| &entry.info))
            .chain(filters.iter().map(|entry| &entry.info))
            .flat_map(|info| info.avatar_ids.iter().cloned())
            .collect();

        let mut join_on: Vec<CompiledJoinOnFormulaInfo> = Vec::new();
        let froms = match self.build_joined_from(&used_avatars) {
            Ok((froms, relations)) => {
                for relation in relations {
                    match self.compile_relation(&mut compiler, relation, &mut aliases) {
                        Ok(compiled) => join_on.push(compiled),
                        Err(error) => errors.push(error),
                    }
                }
                froms
            }
            Err(error) => {
                errors.push(error);
                JoinedFromObject::default()
            }
        };

        if !errors.is_empty() {
            return Err(Errors(errors));
        }

        Ok(CompiledQuery {
            id: BASE_QUERY_ID.to_string(),
            level_type: ExecutionLevel::SourceDb,
            froms,
            select,
            group_by,
            order_by,
            filters,
            join_on,
            limit: spec.limit,
            offset: spec.offset,
            distinct: spec.distinct,
            meta: spec.meta.clone(),
        })
    }

    /// Expands the used avatars with everything on their paths to the root
    /// and lays the result out in traversal order from the root. Relations
    /// form a tree, so each needed avatar pins down exactly one join.
    fn build_joined_from(
        &self,
        used: &BTreeSet<AvatarId>,
    ) -> Result<(JoinedFromObject, Vec<&'a AvatarRelation>)> {
        if used.is_empty() {
            return Ok((JoinedFromObject::default(), Vec::new()));
        }
        let root = self.dataset.root_avatar().ok_or_else(|| {
            Error::new_simple("dataset has no avatars").with_code(codes::INVALID_QUERY_STRUCTURE)
        })?;

        let mut needed: BTreeSet<AvatarId> = used.clone();
        needed.insert(root.id.clone());
        for avatar_id in used {
            let mut current = avatar_id.clone();
            let mut steps = 0;
            while current != root.id {
                let Some(relation) = self.dataset.incoming_relation(&current) else {
                    return Err(Error::new_simple(format!(
                        "avatar `{current}` is not joined to the root avatar"
                    ))
                    .with_code(codes::INVALID_QUERY_STRUCTURE));
                };
                steps += 1;
                if steps > self.dataset.relations.len() {
                    return Err(Error::new_simple("avatar relations form a cycle")
                        .with_code(codes::INVALID_QUERY_STRUCTURE));
                }
                current = relation.left_avatar_id.clone();
                needed.insert(current.clone());
            }
        }

        let mut ordered: Vec<AvatarId> = vec![root.id.clone()];
        let mut relations: Vec<&AvatarRelation> = Vec::new();
        let mut seen: HashSet<AvatarId> = HashSet::from([root.id.clone()]);
        let mut queue: VecDeque<AvatarId> = VecDeque::from([root.id.clone()]);
        while let Some(current) = queue.pop_front() {
            for relation in &self.dataset.relations {
                if relation.left_avatar_id == current
                    && needed.contains(&relation.right_avatar_id)
                    && seen.insert(relation.right_avatar_id.clone())
                {
                    relations.push(relation);
                    ordered.push(relation.right_avatar_id.clone());
                    queue.push_back(relation.right_avatar_id.clone());
                }
            }
        }

        let froms = ordered
            .iter()
            .filter_map(|avatar_id| self.dataset.avatar(avatar_id))
            .map(|avatar| {
                FromObject::Avatar(AvatarFromObject {
                    id: avatar.id.clone(),
                    // Real aliases are assigned when the query is translated.
                    alias: avatar.id.clone(),
                    columns: avatar
                        .columns
                        .iter()
                        .map(|column| {
                            FromColumn::new(
                                format!("{}.{}", avatar.id, column.name),
                                column.name.clone(),
                            )
                        })
                        .collect(),
                    avatar_id: avatar.id.clone(),
                    source_id: avatar.source_id.clone(),
                })
            })
            .collect();

        Ok((
            JoinedFromObject {
                root_from_id: Some(root.id.clone()),
                froms,
            },
            relations,
        ))
    }

    fn compile_relation(
        &self,
        compiler: &mut FormulaCompiler<'_>,
        relation: &AvatarRelation,
        aliases: &mut AliasAllocator,
    ) -> Result<CompiledJoinOnFormulaInfo> {
        if relation.conditions.is_empty() {
            return Err(Error::new_simple(format!(
                "relation `{}` declares no join conditions",
                relation.id
            ))
            .with_code(codes::INVALID_QUERY_STRUCTURE));
        }
        let mut compiled = Vec::with_capacity(relation.conditions.len());
        for condition in &relation.conditions {
            let left =
                self.condition_part_formula(compiler, &relation.left_avatar_id, &condition.left)?;
            let right =
                self.condition_part_formula(compiler, &relation.right_avatar_id, &condition.right)?;
            compiled.push(Formula::binary(
                condition.operator.operation_name(),
                left,
                right,
            ));
        }
        let formula = Formula::chained("and", compiled)
            .ok_or_else(|| Error::new_assert("join condition chain cannot be empty"))?;
        compiler
            .validate_join_condition(&formula)
            .push_hint(format!("in join condition of relation `{}`", relation.id))?;

        let avatar_ids = used_avatar_ids(self.dataset, &formula);
        let alias = aliases.alias_for(&formula);
        Ok(CompiledJoinOnFormulaInfo {
            info: CompiledFormulaInfo {
                formula,
                alias: Some(alias),
                avatar_ids,
                original_field_id: None,
            },
            left_id: relation.left_avatar_id.clone(),
            right_id: relation.right_avatar_id.clone(),
            join_type: relation.join_type,
        })
    }

    fn condition_part_formula(
        &self,
        compiler: &mut FormulaCompiler<'_>,
        avatar_id: &str,
        part: &ConditionPart,
    ) -> Result<Formula> {
        match part {
            ConditionPart::Direct { column } => Ok(compiler.direct_column(avatar_id, column)),
            ConditionPart::ResultField { field_id } => {
                if compiler.field_is_measure(field_id)? {
                    return Err(Error::new_simple(
                        "Joining over aggregated expressions is not supported",
                    )
                    .with_code(codes::INVALID_QUERY_STRUCTURE));
                }
                Ok(compiler.compile_field(field_id)?.formula)
            }
        }
    }
}
