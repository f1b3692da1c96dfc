//! Stream operations: the execution plan for one level of a translated
//! multi-query. A processor receives an ordered batch of these and turns
//! them into work against its engine.

use std::fmt;

use enum_as_inner::EnumAsInner;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use biqc::error::{Error, Result};
use biqc::ir::query::QueryId;
use biqc::translate::multi::TranslatedJoinOn;
use biqc::translate::TranslatedQuery;

use crate::stream::StreamId;

/// Registers an incoming stream inside the compute engine under `alias`,
/// making it addressable from statements of this level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOp {
    pub stream_id: StreamId,
    pub dest_stream_id: StreamId,
    pub alias: String,
}

/// Combines source streams into one joined stream a statement can run
/// against. With `use_empty_source` no stream contributes a FROM entry;
/// `root_stream_id` then names the avatar whose connection and dialect
/// metadata the statement is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOp {
    pub stream_ids: Vec<StreamId>,
    pub dest_stream_id: StreamId,
    pub join_on: Vec<TranslatedJoinOn>,
    pub root_stream_id: Option<StreamId>,
    pub use_empty_source: bool,
}

/// Executes one translated statement against a source stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalcOp {
    pub query_id: QueryId,
    pub source_stream_id: StreamId,
    pub dest_stream_id: StreamId,
    pub query: TranslatedQuery,
    /// Content digest of `query`, stable across runs; memoization key.
    pub data_key: String,
}

/// Materializes a result stream for delivery, enforcing the hard row limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadOp {
    pub stream_id: StreamId,
    pub dest_stream_id: StreamId,
    pub row_count_hard_limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, EnumAsInner, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOperation {
    Upload(UploadOp),
    Join(JoinOp),
    Calc(CalcOp),
    Download(DownloadOp),
}

impl StreamOperation {
    pub fn dest_stream_id(&self) -> &str {
        match self {
            StreamOperation::Upload(op) => &op.dest_stream_id,
            StreamOperation::Join(op) => &op.dest_stream_id,
            StreamOperation::Calc(op) => &op.dest_stream_id,
            StreamOperation::Download(op) => &op.dest_stream_id,
        }
    }

    /// Stream ids this operation consumes, in declaration order.
    pub fn input_stream_ids(&self) -> Vec<&str> {
        match self {
            StreamOperation::Upload(op) => vec![op.stream_id.as_str()],
            StreamOperation::Join(op) => op.stream_ids.iter().map(String::as_str).collect(),
            StreamOperation::Calc(op) => vec![op.source_stream_id.as_str()],
            StreamOperation::Download(op) => vec![op.stream_id.as_str()],
        }
    }
}

/// Short one-line form for logs and plan snapshots.
impl fmt::Display for StreamOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamOperation::Upload(op) => {
                write!(
                    f,
                    "upload {} -> {} as {}",
                    op.stream_id, op.dest_stream_id, op.alias
                )
            }
            StreamOperation::Join(op) => {
                write!(
                    f,
                    "join [{}] -> {}",
                    op.stream_ids.iter().join(", "),
                    op.dest_stream_id
                )?;
                if op.use_empty_source {
                    write!(f, " (empty source)")?;
                }
                Ok(())
            }
            StreamOperation::Calc(op) => {
                write!(
                    f,
                    "calc {}: {} -> {}",
                    op.query_id, op.source_stream_id, op.dest_stream_id
                )
            }
            StreamOperation::Download(op) => {
                write!(f, "download {} -> {}", op.stream_id, op.dest_stream_id)?;
                if let Some(limit) = op.row_count_hard_limit {
                    write!(f, " (limit {limit})")?;
                }
                Ok(())
            }
        }
    }
}

/// Content digest of a translated query, used as the `CalcOp` data key.
/// Identical statements hash identically, so a processor may reuse a
/// memoized result across plans.
pub fn query_data_key(query: &TranslatedQuery) -> Result<String> {
    let encoded = serde_json::to_vec(query)
        .map_err(|error| Error::new_assert(format!("translated query does not serialize: {error}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use biqc::ir::query::ExecutionLevel;

    use super::*;
    use crate::fixture;

    #[test]
    fn data_keys_are_stable_and_content_addressed() {
        let query = fixture::query("q_0", ExecutionLevel::SourceDb, vec![]);
        let key = query_data_key(&query).unwrap();
        assert_eq!(key, query_data_key(&query).unwrap());
        assert_eq!(key.len(), 64);

        let other = fixture::query("q_1", ExecutionLevel::SourceDb, vec![]);
        assert_ne!(key, query_data_key(&other).unwrap());
    }

    #[test]
    fn display_is_one_line_per_operation() {
        let upload = StreamOperation::Upload(UploadOp {
            stream_id: "q_0".to_string(),
            dest_stream_id: "s_0".to_string(),
            alias: "q_0".to_string(),
        });
        assert_eq!(upload.to_string(), "upload q_0 -> s_0 as q_0");

        let join = StreamOperation::Join(JoinOp {
            stream_ids: vec![],
            dest_stream_id: "s_1".to_string(),
            join_on: vec![],
            root_stream_id: Some("ava_1".to_string()),
            use_empty_source: true,
        });
        assert_eq!(join.to_string(), "join [] -> s_1 (empty source)");

        let download = StreamOperation::Download(DownloadOp {
            stream_id: "q_0".to_string(),
            dest_stream_id: "s_2".to_string(),
            row_count_hard_limit: Some(10),
        });
        assert_eq!(download.to_string(), "download q_0 -> s_2 (limit 10)");
    }

    #[test]
    fn inputs_and_dest_cover_every_variant() {
        let calc = StreamOperation::Calc(CalcOp {
            query_id: "q_0".to_string(),
            source_stream_id: "s_0".to_string(),
            dest_stream_id: "q_0".to_string(),
            query: fixture::query("q_0", ExecutionLevel::SourceDb, vec![]),
            data_key: String::new(),
        });
        assert_eq!(calc.input_stream_ids(), vec!["s_0"]);
        assert_eq!(calc.dest_stream_id(), "q_0");
    }
}
