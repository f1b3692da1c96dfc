//! # biqc-exec
//!
//! Execution orchestrator for [biqc] plans. A
//! [TranslatedMultiQuery](biqc::translate::TranslatedMultiQuery) assigns
//! every query to an execution level; this crate plans each level into a
//! stream-operation batch, hands the batches to per-level [DataProcessor]s,
//! and drains the one stream that remains:
//!
//! ```ascii
//!    TranslatedMultiQuery
//!             │  processor::plan_level        per level:
//!             ▼                               Upload / Join / Calc / Download
//!    Vec<StreamOperation>
//!             │  DataProcessor::run           source warehouse, then the
//!             ▼                               gated compute engine
//!    Vec<DataStream>
//!             │  QueryExecutor::execute
//!             ▼
//!       ExecutedQuery                         rows + debug SQL + connections
//! ```
//!
//! Processors do all I/O; planning is pure. The [rqe] module carries the
//! wire contract for remote processors: signed serde_json actions and the
//! framed `(event, payload)` result protocol.

pub mod executor;
pub mod ops;
pub mod processor;
pub mod rqe;
pub mod stream;

#[cfg(test)]
pub(crate) mod fixture;

pub use executor::{ExecutedQuery, ExecutedQueryMeta, QueryExecutor};
pub use ops::{query_data_key, CalcOp, DownloadOp, JoinOp, StreamOperation, UploadOp};
pub use processor::{plan_level, DataProcessor, LevelPlan};
pub use stream::{ChunkStream, DataStream, Row, RowChunk, StreamId, StreamMeta};
