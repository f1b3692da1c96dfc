//! Intermediate representations: the formula AST, the data-type lattice and
//! the compiled query DAG.

pub mod ast;
pub mod datatype;
pub mod query;
