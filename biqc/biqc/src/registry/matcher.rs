use serde::{Deserialize, Serialize};

use crate::ir::datatype::DataType;

/// Acceptable types for one argument position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSlot(Vec<DataType>);

impl TypeSlot {
    pub fn of(types: &[DataType]) -> TypeSlot {
        TypeSlot(types.to_vec())
    }

    pub fn accepts(&self, arg: DataType) -> bool {
        self.0.iter().any(|t| arg.casts_to(*t))
    }

    /// How closely `arg` fits: exact type beats same-kind beats autocast.
    fn exactness(&self, arg: DataType) -> u32 {
        self.0
            .iter()
            .filter_map(|t| {
                if arg == *t {
                    Some(3)
                } else if arg.kind == t.kind && arg.casts_to(*t) {
                    Some(2)
                } else if arg.casts_to(*t) {
                    Some(1)
                } else {
                    None
                }
            })
            .max()
            .unwrap_or(0)
    }
}

/// Declared argument signature of a registry variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgTypeMatcher {
    /// Fixed arity; each position accepts its own slot.
    Sequence(Vec<TypeSlot>),
    /// Any arity of at least `min_args`; every argument must fit the same
    /// slot independently.
    ForEach { slot: TypeSlot, min_args: usize },
    /// Any arity of at least one; the arguments' widest common type must
    /// fit the slot. Used by branch-result operations where all branches
    /// must agree.
    CommonType { slot: TypeSlot },
}

impl ArgTypeMatcher {
    pub fn seq(slots: &[&[DataType]]) -> ArgTypeMatcher {
        ArgTypeMatcher::Sequence(slots.iter().map(|types| TypeSlot::of(types)).collect())
    }

    pub fn for_each(types: &[DataType], min_args: usize) -> ArgTypeMatcher {
        ArgTypeMatcher::ForEach {
            slot: TypeSlot::of(types),
            min_args,
        }
    }

    pub fn common_type(types: &[DataType]) -> ArgTypeMatcher {
        ArgTypeMatcher::CommonType {
            slot: TypeSlot::of(types),
        }
    }

    pub fn matches(&self, args: &[DataType]) -> bool {
        match self {
            ArgTypeMatcher::Sequence(slots) => {
                slots.len() == args.len()
                    && slots.iter().zip(args).all(|(slot, arg)| slot.accepts(*arg))
            }
            ArgTypeMatcher::ForEach { slot, min_args } => {
                args.len() >= *min_args && args.iter().all(|arg| slot.accepts(*arg))
            }
            ArgTypeMatcher::CommonType { slot } => {
                !args.is_empty() && slot.accepts(DataType::common_type_of(args.iter().copied()))
            }
        }
    }

    /// Ranking key when several variants match: higher wins; ties fall back
    /// to registration order. Positional signatures rank above flexible
    /// ones for the same arguments.
    pub fn specificity(&self, args: &[DataType]) -> u32 {
        match self {
            ArgTypeMatcher::Sequence(slots) => {
                1 + slots
                    .iter()
                    .zip(args)
                    .map(|(slot, arg)| slot.exactness(*arg))
                    .sum::<u32>()
            }
            ArgTypeMatcher::ForEach { slot, .. } => args
                .iter()
                .map(|arg| slot.exactness(*arg))
                .sum::<u32>(),
            ArgTypeMatcher::CommonType { slot } => {
                slot.exactness(DataType::common_type_of(args.iter().copied()))
            }
        }
    }
}
