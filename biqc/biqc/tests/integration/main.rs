//! End-to-end planning tests: a dataset and a query spec go into
//! [biqc::plan], a translated multi-query comes out. Plans are asserted
//! through the compact text rendering in [common], so the whole query DAG
//! is visible in one snapshot.

mod common;
mod errors;
mod filters;
mod planning;
