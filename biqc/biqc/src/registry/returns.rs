use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ir::datatype::{DataType, DataTypeKind};

/// How a variant's result type is derived from its argument types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnTypeStrategy {
    /// Always the declared type.
    Fixed(DataType),
    /// Widest common type of the listed argument positions; an empty list
    /// means all arguments. Const when every considered argument is const.
    FromArgs(Vec<usize>),
    /// Date/datetime plus-minus a number keeps the temporal kind: the
    /// timezone flavor of the temporal operand is preserved, the numeric
    /// operand only shifts it.
    DateArithmetic,
    /// Widest common type over the result positions of a flattened case/if
    /// argument list: `[subject, value, result, ..., else]` when the count
    /// is even, `[condition, result, ..., else]` when it is odd. Subject,
    /// value and condition positions never widen the result.
    CaseResult,
}

impl ReturnTypeStrategy {
    pub fn from_all_args() -> ReturnTypeStrategy {
        ReturnTypeStrategy::FromArgs(vec![])
    }

    pub fn infer(&self, arg_types: &[DataType]) -> Result<DataType> {
        match self {
            ReturnTypeStrategy::Fixed(data_type) => Ok(*data_type),
            ReturnTypeStrategy::FromArgs(positions) => {
                let considered: Vec<DataType> = if positions.is_empty() {
                    arg_types.to_vec()
                } else {
                    positions
                        .iter()
                        .map(|&position| {
                            arg_types.get(position).copied().ok_or_else(|| {
                                Error::new_assert(format!(
                                    "return type refers to argument {position} of {}",
                                    arg_types.len()
                                ))
                            })
                        })
                        .collect::<Result<_>>()?
                };
                Ok(DataType::common_type_of(considered))
            }
            ReturnTypeStrategy::DateArithmetic => {
                let temporal = arg_types
                    .iter()
                    .find(|t| {
                        matches!(
                            t.kind,
                            DataTypeKind::Date
                                | DataTypeKind::Datetime
                                | DataTypeKind::Genericdatetime
                        )
                    })
                    .ok_or_else(|| {
                        Error::new_assert("date arithmetic variant resolved without a temporal argument")
                    })?;
                let is_const = arg_types.iter().all(|t| t.is_const);
                Ok(DataType::new(temporal.kind, is_const))
            }
            ReturnTypeStrategy::CaseResult => {
                let Some((else_type, branches)) = arg_types.split_last() else {
                    return Err(Error::new_assert("case result strategy on an empty argument list"));
                };
                let first_result = if arg_types.len() % 2 == 0 { 2 } else { 1 };
                let results = branches
                    .iter()
                    .skip(first_result)
                    .step_by(2)
                    .chain(std::iter::once(else_type))
                    .copied();
                Ok(DataType::common_type_of(results))
            }
        }
    }
}
