//! Data streams flowing between execution levels.
//!
//! A [DataStream] is a lazy, single-pass sequence of row chunks plus the
//! column layout and per-stream execution metadata. Single-pass is enforced
//! by ownership: draining consumes the stream, so rows can never be read
//! twice. The chunk source ends after its terminal marker; a source that
//! fails mid-way yields an `Err` chunk and then ends.

use std::fmt;

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use biqc::error::{codes, Error, Result, WithErrorInfo};
use biqc::ir::datatype::DataType;

pub type StreamId = String;

/// One result row; cells are wire values, in select order.
pub type Row = Vec<serde_json::Value>;

/// One poll's worth of rows.
pub type RowChunk = Vec<Row>;

pub type ChunkStream = BoxStream<'static, Result<RowChunk>>;

/// Execution metadata attached to a stream by the processor that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamMeta {
    /// Connection the stream's statement ran against, if any.
    pub connection_id: Option<String>,
    /// Statement text as rendered by the processor.
    pub debug_query: Option<String>,
    /// Whether `debug_query` may be surfaced to the requesting user.
    pub pass_db_query_to_user: bool,
    pub warnings: Vec<String>,
}

pub struct DataStream {
    pub id: StreamId,
    /// Column names, in select order.
    pub names: Vec<String>,
    /// Column types, parallel to `names`.
    pub types: Vec<DataType>,
    pub meta: StreamMeta,
    chunks: ChunkStream,
}

impl DataStream {
    pub fn new<S>(id: StreamId, names: Vec<String>, types: Vec<DataType>, chunks: S) -> Self
    where
        S: futures::Stream<Item = Result<RowChunk>> + Send + 'static,
    {
        DataStream {
            id,
            names,
            types,
            meta: StreamMeta::default(),
            chunks: chunks.boxed(),
        }
    }

    /// A stream holding one pre-materialized chunk.
    pub fn from_rows(id: StreamId, names: Vec<String>, types: Vec<DataType>, rows: Vec<Row>) -> Self {
        DataStream::new(id, names, types, stream::iter(vec![Ok(rows)]))
    }

    pub fn empty(id: StreamId, names: Vec<String>, types: Vec<DataType>) -> Self {
        DataStream::new(id, names, types, stream::empty())
    }

    pub fn with_meta(mut self, meta: StreamMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Hands the chunk source over, e.g. to wrap it in a transforming stream.
    pub fn into_chunks(self) -> ChunkStream {
        self.chunks
    }

    /// Materializes every remaining chunk.
    pub async fn drain(self) -> Result<Vec<Row>> {
        self.drain_limited(None).await
    }

    /// Materializes the stream, failing as soon as the row count passes the
    /// hard limit.
    pub async fn drain_limited(self, row_count_hard_limit: Option<u64>) -> Result<Vec<Row>> {
        let mut chunks = self.chunks;
        let mut rows: Vec<Row> = Vec::new();
        while let Some(chunk) = chunks.next().await {
            rows.extend(chunk?);
            if let Some(limit) = row_count_hard_limit {
                if rows.len() as u64 > limit {
                    return Err(Error::new_simple(format!(
                        "query returned more than {limit} rows"
                    ))
                    .with_code(codes::ROW_LIMIT));
                }
            }
        }
        Ok(rows)
    }
}

impl fmt::Debug for DataStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStream")
            .field("id", &self.id)
            .field("names", &self.names)
            .field("types", &self.types)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn numbers(id: &str, rows: Vec<Row>) -> DataStream {
        DataStream::from_rows(
            id.to_string(),
            vec!["res_0".to_string()],
            vec![DataType::INTEGER],
            rows,
        )
    }

    #[tokio::test]
    async fn drain_returns_all_rows_in_order() {
        let stream = numbers("s_0", vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]]);
        let rows = stream.drain().await.unwrap();
        assert_eq!(rows, vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]]);
    }

    #[tokio::test]
    async fn drain_concatenates_chunks() {
        let chunks = stream::iter(vec![
            Ok(vec![vec![json!(1)], vec![json!(2)]]),
            Ok(vec![]),
            Ok(vec![vec![json!(3)]]),
        ]);
        let stream = DataStream::new(
            "s_0".to_string(),
            vec!["res_0".to_string()],
            vec![DataType::INTEGER],
            chunks,
        );
        let rows = stream.drain().await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn into_chunks_supports_rewrapping() {
        let stream = numbers("s_0", vec![vec![json!(1)], vec![json!(2)]]);
        let reversed = DataStream::new(
            "s_1".to_string(),
            vec!["res_0".to_string()],
            vec![DataType::INTEGER],
            stream
                .into_chunks()
                .map(|chunk| chunk.map(|rows| rows.into_iter().rev().collect())),
        );
        let rows = reversed.drain().await.unwrap();
        assert_eq!(rows, vec![vec![json!(2)], vec![json!(1)]]);
    }

    #[tokio::test]
    async fn drain_limited_fails_past_the_limit() {
        let stream = numbers("s_0", vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]]);
        let error = stream.drain_limited(Some(2)).await.unwrap_err();
        assert_eq!(error.code, Some(codes::ROW_LIMIT));
        assert_eq!(error.reason.to_string(), "query returned more than 2 rows");
    }

    #[tokio::test]
    async fn drain_limited_accepts_exactly_the_limit() {
        let stream = numbers("s_0", vec![vec![json!(1)], vec![json!(2)]]);
        let rows = stream.drain_limited(Some(2)).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn a_failing_chunk_aborts_the_drain() {
        let chunks = stream::iter(vec![
            Ok(vec![vec![json!(1)]]),
            Err(Error::new_simple("connection reset")),
        ]);
        let stream = DataStream::new(
            "s_0".to_string(),
            vec!["res_0".to_string()],
            vec![DataType::INTEGER],
            chunks,
        );
        let error = stream.drain().await.unwrap_err();
        assert_eq!(error.reason.to_string(), "connection reset");
    }
}
