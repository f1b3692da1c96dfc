//! Re-leveling splitter.
//!
//! A query assigned to the source database may call operations its dialect
//! does not implement. This splitter tears such a query apart: every FROM
//! entry gets a flat projection sub-query that stays on the source, and the
//! original formulas are re-rooted over the projected columns in a query
//! re-leveled to the compute engine.
//!
//! The split is joinless. No dimension grid is involved; the original join
//! conditions are remapped over sub-query columns with their join types
//! intact, so outer joins survive re-leveling.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::ir::ast::index::{children, NodeHierarchyIndex};
use crate::ir::ast::{inspect, CallShape, Formula, FormulaItem, NodeExtract};
use crate::ir::query::{CompiledQuery, ExecutionLevel, QueryPart};
use crate::registry::{OperationRegistry, ScopeSet};
use crate::split::mask::{AddFormulaInfo, AliasedFormulaSplitMask, QuerySplitMask, SubqueryType};
use crate::split::splitter::{from_ids_of, from_of_field, MultiQuerySplitter, SPLITTABLE_PARTS};
use crate::translate::Dialect;
use crate::utils::IdArena;

/// Splits queries that cannot run whole on their assigned source dialect.
#[derive(Debug)]
pub struct LevelCropSplitter<'a> {
    registry: &'a OperationRegistry,
    source_dialect: Dialect,
}

impl<'a> LevelCropSplitter<'a> {
    pub fn new(registry: &'a OperationRegistry, source_dialect: Dialect) -> Self {
        LevelCropSplitter {
            registry,
            source_dialect,
        }
    }

    /// Whether the source dialect implements every operation the formula
    /// calls. Forks never count as executable; they are someone else's job.
    fn executable_at_source(&self, formula: &Formula) -> bool {
        inspect::walk(formula).iter().all(|node| match &node.kind {
            FormulaItem::Fork(_) => false,
            FormulaItem::Call(call) => self.registry.is_available(
                &call.name,
                matches!(call.shape, CallShape::Window(_)),
                self.source_dialect,
                ScopeSet::INTERNAL,
            ),
            _ => true,
        })
    }
}

impl MultiQuerySplitter for LevelCropSplitter<'_> {
    fn get_split_masks(
        &self,
        query: &CompiledQuery,
        ids: &mut IdArena,
    ) -> Result<Vec<QuerySplitMask>> {
        if query.level_type != ExecutionLevel::SourceDb {
            return Ok(vec![]);
        }
        // Forks are resolved into sub-queries of their own first; splitting
        // around them here would relocate their join keys twice.
        if query
            .iter_formula_infos()
            .any(|info| inspect::contains_forks(&info.formula))
        {
            return Ok(vec![]);
        }
        if query
            .iter_formula_infos()
            .all(|info| self.executable_at_source(&info.formula))
        {
            return Ok(vec![]);
        }

        // Filters the source can evaluate whole against a single FROM entry
        // are pushed down. Tearing them into leaves instead would filter the
        // projected rows on the compute engine, after the scan.
        let mut pushed: BTreeMap<usize, String> = BTreeMap::new();
        for (idx, filter) in query.filters.iter().enumerate() {
            if !self.executable_at_source(&filter.info.formula) {
                continue;
            }
            let mut from_ids = from_ids_of(query, &filter.info.formula).into_iter();
            if let (Some(from_id), None) = (from_ids.next(), from_ids.next()) {
                pushed.insert(idx, from_id);
            }
        }

        let mut groups: Vec<FromGroup> = vec![];
        for part in SPLITTABLE_PARTS {
            for idx in 0..query.part_len(part) {
                let Some(info) = query.formula_at(part, idx) else {
                    continue;
                };
                if part == QueryPart::Filters && pushed.contains_key(&idx) {
                    continue;
                }
                mask_leaves(query, part, idx, &info.formula, ids, &mut groups)?;
            }
        }

        // Join condition fields become extra projection columns, so the
        // cropped query can re-join the sub-queries the way the FROM tree
        // joined the avatars.
        for entry in &query.join_on {
            for (_, name) in field_leaf_sites(&entry.info.formula) {
                let Some(from_id) = from_of_field(query, &name) else {
                    return Err(Error::new_assert(format!(
                        "join condition field `{name}` resolves to no FROM entry"
                    )));
                };
                let from_id = from_id.to_string();
                let group = group_entry(&mut groups, &from_id);
                let extract = NodeExtract::of(&Formula::field(name.as_str()));
                if group.alias_by_extract.contains_key(&extract) {
                    continue;
                }
                let alias = ids.expr_id();
                group.alias_by_extract.insert(extract, alias.clone());
                group.add_formulas.push(AddFormulaInfo {
                    alias,
                    expr: Formula::field(name.as_str()),
                    from_ids: BTreeSet::from([from_id]),
                    is_group_by: false,
                });
            }
        }

        for (idx, from_id) in pushed {
            match groups.iter_mut().find(|group| group.from_id == from_id) {
                Some(group) => {
                    group.filter_indices.insert(idx);
                }
                None => {
                    // No sub-query reads this FROM entry after all; relocate
                    // the filter's leaves like any other formula.
                    let formula = &query.filters[idx].info.formula;
                    mask_leaves(query, QueryPart::Filters, idx, formula, ids, &mut groups)?;
                }
            }
        }

        Ok(groups
            .into_iter()
            .map(|group| QuerySplitMask {
                subquery_type: SubqueryType::Default,
                subquery_id: ids.query_id(),
                formula_split_masks: group.formula_split_masks,
                add_formulas: group.add_formulas,
                add_filters: vec![],
                filter_indices: group.filter_indices,
                join_type: None,
                joining: vec![],
                is_base: false,
            })
            .collect())
    }

    /// Each sub-query keeps only the FROM entry it reads.
    fn mutate_subquery(
        &self,
        mut subquery: CompiledQuery,
        _mask: &QuerySplitMask,
    ) -> Result<CompiledQuery> {
        let mut referenced: BTreeSet<String> = BTreeSet::new();
        let infos = subquery
            .select
            .iter()
            .chain(subquery.filters.iter().map(|filter| &filter.info));
        for info in infos {
            for name in inspect::used_field_names(&info.formula) {
                if let Some(from_id) = from_of_field(&subquery, &name) {
                    referenced.insert(from_id.to_string());
                }
            }
        }
        subquery
            .froms
            .froms
            .retain(|from| referenced.contains(from.id()));
        subquery.join_on.retain(|entry| {
            referenced.contains(&entry.left_id) && referenced.contains(&entry.right_id)
        });
        let root = match subquery.froms.root_from_id.as_deref() {
            Some(id) if referenced.contains(id) => Some(id.to_string()),
            _ => subquery.froms.froms.first().map(|from| from.id().to_string()),
        };
        subquery.froms.root_from_id = root;
        Ok(subquery)
    }

    /// The remainder cannot run on the source; it re-levels to the compute
    /// engine over the projections.
    fn mutate_cropped_query(&self, mut query: CompiledQuery) -> Result<CompiledQuery> {
        query.level_type = ExecutionLevel::Compeng;
        Ok(query)
    }

    fn preserves_outer_joins(&self) -> bool {
        true
    }
}

/// Accumulator for the projection sub-query serving one FROM entry. Groups
/// are kept in first-reference order; the first becomes the base of the
/// joinless split.
struct FromGroup {
    from_id: String,
    /// One shared alias per distinct relocated leaf.
    alias_by_extract: BTreeMap<NodeExtract, String>,
    formula_split_masks: Vec<AliasedFormulaSplitMask>,
    add_formulas: Vec<AddFormulaInfo>,
    filter_indices: BTreeSet<usize>,
}

impl FromGroup {
    fn new(from_id: &str) -> Self {
        FromGroup {
            from_id: from_id.to_string(),
            alias_by_extract: BTreeMap::new(),
            formula_split_masks: vec![],
            add_formulas: vec![],
            filter_indices: BTreeSet::new(),
        }
    }
}

fn group_entry<'g>(groups: &'g mut Vec<FromGroup>, from_id: &str) -> &'g mut FromGroup {
    match groups.iter().position(|group| group.from_id == from_id) {
        Some(position) => &mut groups[position],
        None => {
            groups.push(FromGroup::new(from_id));
            let last = groups.len() - 1;
            &mut groups[last]
        }
    }
}

/// Every field reference in the tree with its path. Window and LOD
/// decoration slots are included: a field used only for ordering still has
/// to be projected.
fn field_leaf_sites(formula: &Formula) -> Vec<(NodeHierarchyIndex, String)> {
    fn collect(
        node: &Formula,
        path: NodeHierarchyIndex,
        out: &mut Vec<(NodeHierarchyIndex, String)>,
    ) {
        if let FormulaItem::Field(field) = &node.kind {
            out.push((path, field.name.clone()));
            return;
        }
        for (position, child) in children(node).into_iter().enumerate() {
            collect(child, path.child(position), out);
        }
    }
    let mut sites = vec![];
    collect(formula, NodeHierarchyIndex::root(), &mut sites);
    sites
}

/// Records a relocation mask for every field leaf of one formula, routed to
/// the group of the FROM entry the field resolves through. Leaves of the
/// same field share one alias within a group.
fn mask_leaves(
    query: &CompiledQuery,
    part: QueryPart,
    idx: usize,
    formula: &Formula,
    ids: &mut IdArena,
    groups: &mut Vec<FromGroup>,
) -> Result<()> {
    for (path, name) in field_leaf_sites(formula) {
        let Some(from_id) = from_of_field(query, &name) else {
            return Err(Error::new_assert(format!(
                "field `{name}` resolves to no FROM entry"
            )));
        };
        let group = group_entry(groups, from_id);
        let extract = NodeExtract::of(&Formula::field(name.as_str()));
        let alias = match group.alias_by_extract.get(&extract) {
            Some(alias) => alias.clone(),
            None => {
                let alias = ids.expr_id();
                group.alias_by_extract.insert(extract, alias.clone());
                alias
            }
        };
        group
            .formula_split_masks
            .push(AliasedFormulaSplitMask::at_node(alias, part, idx, path));
    }
    Ok(())
}
