//! Feature map for target dialects.
//!
//! The translator aims at the generic dialect first; a dialect-specific
//! override exists only where the generic behavior is wrong or markedly
//! slower there. Operation availability is not described here — that is the
//! registry's job, per variant — only ambient properties of the dialect
//! itself.

use core::fmt::Debug;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Target SQL dialect of a translation.
///
/// `Compeng` is the dialect of the local fallback compute engine; queries
/// relocated off the source database are translated against it.
#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Hash,
    Serialize,
    Default,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::EnumString,
    strum::VariantNames,
)]
#[strum(serialize_all = "lowercase")]
pub enum Dialect {
    BigQuery,
    ClickHouse,
    Compeng,
    #[default]
    Generic,
    MsSql,
    MySql,
    Oracle,
    Postgres,
    SQLite,
    Snowflake,
    Trino,
}

impl Dialect {
    pub(crate) fn handler(&self) -> Box<dyn DialectHandler> {
        match self {
            Dialect::BigQuery => Box::new(BigQueryDialect),
            Dialect::ClickHouse => Box::new(ClickHouseDialect),
            Dialect::Compeng => Box::new(CompengDialect),
            Dialect::MsSql => Box::new(MsSqlDialect),
            Dialect::MySql => Box::new(MySqlDialect),
            Dialect::Oracle => Box::new(OracleDialect),
            Dialect::Postgres => Box::new(PostgresDialect),
            Dialect::SQLite => Box::new(SQLiteDialect),
            Dialect::Snowflake => Box::new(SnowflakeDialect),
            Dialect::Trino => Box::new(TrinoDialect),
            Dialect::Generic => Box::new(GenericDialect),
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// A set of dialects, used to scope registry variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialectSet(u32);

impl DialectSet {
    pub const EMPTY: DialectSet = DialectSet(0);
    /// Every dialect, current and future.
    pub const ALL: DialectSet = DialectSet(u32::MAX);

    pub fn only(dialect: Dialect) -> DialectSet {
        DialectSet(dialect.bit())
    }

    pub fn of(dialects: &[Dialect]) -> DialectSet {
        DialectSet(dialects.iter().fold(0, |mask, d| mask | d.bit()))
    }

    pub fn contains(self, dialect: Dialect) -> bool {
        self.0 & dialect.bit() != 0
    }

    pub fn union(self, other: DialectSet) -> DialectSet {
        DialectSet(self.0 | other.0)
    }

    pub fn without(self, dialect: Dialect) -> DialectSet {
        DialectSet(self.0 & !dialect.bit())
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<Dialect> for DialectSet {
    fn from(dialect: Dialect) -> DialectSet {
        DialectSet::only(dialect)
    }
}

impl BitOr for DialectSet {
    type Output = DialectSet;
    fn bitor(self, rhs: DialectSet) -> DialectSet {
        self.union(rhs)
    }
}

impl BitOr<Dialect> for DialectSet {
    type Output = DialectSet;
    fn bitor(self, rhs: Dialect) -> DialectSet {
        self.union(DialectSet::only(rhs))
    }
}

impl BitOr for Dialect {
    type Output = DialectSet;
    fn bitor(self, rhs: Dialect) -> DialectSet {
        DialectSet::only(self) | rhs
    }
}

#[derive(Debug)]
pub struct GenericDialect;
#[derive(Debug)]
pub struct BigQueryDialect;
#[derive(Debug)]
pub struct ClickHouseDialect;
#[derive(Debug)]
pub struct CompengDialect;
#[derive(Debug)]
pub struct MsSqlDialect;
#[derive(Debug)]
pub struct MySqlDialect;
#[derive(Debug)]
pub struct OracleDialect;
#[derive(Debug)]
pub struct PostgresDialect;
#[derive(Debug)]
pub struct SQLiteDialect;
#[derive(Debug)]
pub struct SnowflakeDialect;
#[derive(Debug)]
pub struct TrinoDialect;

pub(crate) trait DialectHandler: Debug {
    /// `%` with a negative float operand has implementation-defined results
    /// here; translation emits an advisory warning.
    fn warns_on_negative_float_modulo(&self) -> bool {
        false
    }

    /// The dialect has no boolean value type, so a boolean-typed result
    /// expression must be wrapped into an explicit 1/0 conversion when
    /// selected.
    fn requires_bool_wrap_in_projection(&self) -> bool {
        false
    }
}

impl DialectHandler for GenericDialect {}

impl DialectHandler for PostgresDialect {}

impl DialectHandler for CompengDialect {}

impl DialectHandler for BigQueryDialect {}

impl DialectHandler for ClickHouseDialect {}

impl DialectHandler for MsSqlDialect {
    fn requires_bool_wrap_in_projection(&self) -> bool {
        true
    }

    fn warns_on_negative_float_modulo(&self) -> bool {
        true
    }
}

impl DialectHandler for MySqlDialect {
    fn warns_on_negative_float_modulo(&self) -> bool {
        true
    }
}

impl DialectHandler for OracleDialect {
    fn requires_bool_wrap_in_projection(&self) -> bool {
        true
    }
}

impl DialectHandler for SQLiteDialect {}

impl DialectHandler for SnowflakeDialect {}

impl DialectHandler for TrinoDialect {}
