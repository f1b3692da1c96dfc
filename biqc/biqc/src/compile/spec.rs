//! Wire-level description of a dataset and of one query against it.
//!
//! A [Dataset] lists fields, source avatars and the relations joining them;
//! a [QuerySpec] picks fields by id and adds filters, ordering and paging.
//! Both deserialize from the caller's JSON and are validated before any
//! compilation starts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::compile::filters::FilterOperation;
use crate::error::{codes, Error, Errors, WithErrorInfo};
use crate::ir::ast::{BinaryJoinOperator, Formula, JoinType, OrderDirection};
use crate::ir::datatype::{DataType, DataTypeKind};
use crate::ir::query::{AvatarId, FieldId, QueryMetaInfo};

/// Aggregation applied on top of a field's own expression.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FieldAggregation {
    #[default]
    None,
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Countd,
}

impl FieldAggregation {
    /// Formula function implementing the aggregation, if there is one.
    pub fn function_name(self) -> Option<&'static str> {
        match self {
            FieldAggregation::None => None,
            FieldAggregation::Sum => Some("sum"),
            FieldAggregation::Avg => Some("avg"),
            FieldAggregation::Min => Some("min"),
            FieldAggregation::Max => Some("max"),
            FieldAggregation::Count => Some("count"),
            FieldAggregation::Countd => Some("countd"),
        }
    }
}

/// How a field produces its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCalc {
    /// A formula over other fields and columns.
    Formula { formula: Formula },
    /// A column of one source avatar, referenced as-is.
    Direct {
        avatar_id: AvatarId,
        source_column: String,
    },
    /// A value supplied with the query (or defaulted), inlined as a literal.
    Parameter {
        #[serde(default)]
        default_value: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetField {
    pub id: FieldId,
    pub title: String,
    pub calc: FieldCalc,
    /// Explicit type the field is cast to after its expression resolves.
    #[serde(default)]
    pub cast: Option<DataTypeKind>,
    #[serde(default)]
    pub aggregation: FieldAggregation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarColumn {
    pub name: String,
    pub data_type: DataTypeKind,
}

/// One use of a data source table inside the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avatar {
    pub id: AvatarId,
    pub title: String,
    pub source_id: String,
    pub columns: Vec<AvatarColumn>,
}

/// One side of a join condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionPart {
    /// A raw column of the avatar on that side.
    Direct { column: String },
    /// A dataset field; must not aggregate.
    ResultField { field_id: FieldId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationCondition {
    pub operator: BinaryJoinOperator,
    pub left: ConditionPart,
    pub right: ConditionPart,
}

/// Join between two avatars. Relations form a tree rooted at the root
/// avatar: every non-root avatar has exactly one incoming relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarRelation {
    pub id: String,
    pub left_avatar_id: AvatarId,
    pub right_avatar_id: AvatarId,
    pub join_type: JoinType,
    pub conditions: Vec<RelationCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Dataset {
    #[serde(default)]
    pub fields: Vec<DatasetField>,
    #[serde(default)]
    pub avatars: Vec<Avatar>,
    #[serde(default)]
    pub relations: Vec<AvatarRelation>,
    /// Explicit root avatar; defaults to the first one declared.
    #[serde(default)]
    pub root_avatar_id: Option<AvatarId>,
}

impl Dataset {
    /// Structural checks that do not need a registry: unique ids and titles,
    /// relation endpoints pointing at known avatars. All problems are
    /// reported at once.
    pub fn validate(&self) -> Result<(), Errors> {
        let mut errors = Vec::new();
        let mut push_duplicates = |names: Vec<&str>, what: &str| {
            let mut seen = std::collections::HashSet::new();
            for name in names {
                if !seen.insert(name) {
                    errors.push(
                        Error::new_simple(format!("duplicate {what} `{name}` in dataset"))
                            .with_code(codes::INVALID_QUERY_STRUCTURE),
                    );
                }
            }
        };
        push_duplicates(self.fields.iter().map(|f| f.id.as_str()).collect(), "field id");
        push_duplicates(
            self.fields.iter().map(|f| f.title.as_str()).collect(),
            "field title",
        );
        push_duplicates(
            self.avatars.iter().map(|a| a.id.as_str()).collect(),
            "avatar id",
        );
        push_duplicates(
            self.relations.iter().map(|r| r.id.as_str()).collect(),
            "relation id",
        );

        for relation in &self.relations {
            for avatar_id in [&relation.left_avatar_id, &relation.right_avatar_id] {
                if self.avatar(avatar_id).is_none() {
                    errors.push(
                        Error::new_simple(format!(
                            "relation `{}` references unknown avatar `{avatar_id}`",
                            relation.id
                        ))
                        .with_code(codes::INVALID_QUERY_STRUCTURE),
                    );
                }
            }
        }
        if let Some(root) = &self.root_avatar_id {
            if self.avatar(root).is_none() {
                errors.push(
                    Error::new_simple(format!("root avatar `{root}` is not declared"))
                        .with_code(codes::INVALID_QUERY_STRUCTURE),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Errors(errors))
        }
    }

    pub fn field_by_id(&self, id: &str) -> Option<&DatasetField> {
        self.fields.iter().find(|field| field.id == id)
    }

    pub fn field_by_title(&self, title: &str) -> Option<&DatasetField> {
        self.fields.iter().find(|field| field.title == title)
    }

    /// Resolves a formula reference: titles shadow ids.
    pub fn resolve_field(&self, reference: &str) -> Option<&DatasetField> {
        self.field_by_title(reference)
            .or_else(|| self.field_by_id(reference))
    }

    pub fn avatar(&self, id: &str) -> Option<&Avatar> {
        self.avatars.iter().find(|avatar| avatar.id == id)
    }

    pub fn avatar_column(&self, avatar_id: &str, name: &str) -> Option<&AvatarColumn> {
        self.avatar(avatar_id)?
            .columns
            .iter()
            .find(|column| column.name == name)
    }

    pub fn root_avatar(&self) -> Option<&Avatar> {
        match &self.root_avatar_id {
            Some(id) => self.avatar(id),
            None => self.avatars.first(),
        }
    }

    /// The relation whose right side is `avatar_id`. Relations form a tree,
    /// so at most one exists; [Dataset::validate] reports all shapes that
    /// break this.
    pub fn incoming_relation(&self, avatar_id: &str) -> Option<&AvatarRelation> {
        self.relations
            .iter()
            .find(|relation| relation.right_avatar_id == avatar_id)
    }

    /// Column types keyed by the `avatar_id.column` names field formulas
    /// resolve to; this is the field environment every translation uses.
    pub fn column_types(&self) -> HashMap<String, DataType> {
        self.avatars
            .iter()
            .flat_map(|avatar| {
                avatar.columns.iter().map(|column| {
                    (
                        format!("{}.{}", avatar.id, column.name),
                        DataType::new(column.data_type, false),
                    )
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByEntrySpec {
    pub field_id: FieldId,
    #[serde(default)]
    pub direction: OrderDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterEntrySpec {
    pub id: String,
    pub field_id: FieldId,
    pub operation: FilterOperation,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterValueSpec {
    pub field_id: FieldId,
    pub value: String,
}

/// One query over a dataset, everything referenced by field id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QuerySpec {
    #[serde(default)]
    pub select: Vec<FieldId>,
    #[serde(default)]
    pub group_by: Vec<FieldId>,
    #[serde(default)]
    pub order_by: Vec<OrderByEntrySpec>,
    #[serde(default)]
    pub filters: Vec<FilterEntrySpec>,
    #[serde(default)]
    pub parameters: Vec<ParameterValueSpec>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub meta: QueryMetaInfo,
}
