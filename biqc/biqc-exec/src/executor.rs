//! Running a translated multi-query end to end.
//!
//! Levels run in order: SourceDb first, its output streams then enter the
//! compute engine. Each level goes through its own [DataProcessor]; the
//! compute-engine run holds a slot on a process-wide semaphore for its whole
//! duration, including the final drain. Exactly one output stream must
//! remain at the end; its rows are drained once, under the top query's hard
//! row limit.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use biqc::error::{codes, Error, Result, WithErrorInfo};
use biqc::ir::query::{EmptyQueryMode, ExecutionLevel};
use biqc::translate::TranslatedMultiQuery;

use crate::processor::{plan_level, DataProcessor};
use crate::stream::{DataStream, Row, StreamId};

/// Process-wide cap on compute-engine runs executing at once.
const DEFAULT_COMPENG_SLOTS: usize = 8;

fn process_compeng_gate() -> Arc<Semaphore> {
    static GATE: OnceLock<Arc<Semaphore>> = OnceLock::new();
    GATE.get_or_init(|| Arc::new(Semaphore::new(DEFAULT_COMPENG_SLOTS)))
        .clone()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutedQueryMeta {
    /// Statements the requesting user may see, joined when several ran.
    pub debug_query: Option<String>,
    /// Connections the run touched.
    pub target_connection_ids: BTreeSet<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutedQuery {
    /// Column names, in select order.
    pub names: Vec<String>,
    pub rows: Vec<Row>,
    pub meta: ExecutedQueryMeta,
}

/// Drives a plan through its levels, one processor per level.
pub struct QueryExecutor {
    source_db: Arc<dyn DataProcessor>,
    compeng: Arc<dyn DataProcessor>,
    compeng_gate: Arc<Semaphore>,
}

impl QueryExecutor {
    pub fn new(source_db: Arc<dyn DataProcessor>, compeng: Arc<dyn DataProcessor>) -> Self {
        QueryExecutor {
            source_db,
            compeng,
            compeng_gate: process_compeng_gate(),
        }
    }

    /// Detaches this executor from the process-wide compute-engine gate,
    /// giving it a private slot count.
    pub fn with_compeng_slots(mut self, slots: usize) -> Self {
        self.compeng_gate = Arc::new(Semaphore::new(slots));
        self
    }

    /// Runs the plan and drains the result.
    ///
    /// An `EmptyQuery` raised anywhere during planning or level runs is
    /// resolved by the top query's [EmptyQueryMode] policy.
    pub async fn execute(&self, multi: &TranslatedMultiQuery) -> Result<ExecutedQuery> {
        let top = multi.single_top()?;
        let empty_query_mode = top.meta.empty_query_mode;
        let row_count_hard_limit = top.meta.row_count_hard_limit;

        match self.run_levels(multi, row_count_hard_limit).await {
            Err(error) if error.code == Some(codes::EMPTY_QUERY) => match empty_query_mode {
                EmptyQueryMode::Error => Err(error),
                EmptyQueryMode::Empty => Ok(ExecutedQuery::default()),
                EmptyQueryMode::EmptyRow => Ok(ExecutedQuery {
                    rows: vec![Row::new()],
                    ..ExecutedQuery::default()
                }),
            },
            run => run,
        }
    }

    async fn run_levels(
        &self,
        multi: &TranslatedMultiQuery,
        row_count_hard_limit: Option<u64>,
    ) -> Result<ExecutedQuery> {
        let mut meta = ExecutedQueryMeta::default();
        let mut debug_queries: Vec<String> = Vec::new();

        let source_plan = plan_level(multi, ExecutionLevel::SourceDb, &[])?;
        let mut streams: Vec<DataStream> = Vec::new();
        if !source_plan.is_empty() {
            streams = self
                .source_db
                .run(source_plan.operations, Vec::new(), source_plan.output_stream_ids)
                .await?;
            harvest(&streams, &mut meta, &mut debug_queries);
        }

        let input_ids: Vec<StreamId> = streams.iter().map(|stream| stream.id.clone()).collect();
        let compeng_plan = plan_level(multi, ExecutionLevel::Compeng, &input_ids)?;
        // Held until the result is drained: a compute-engine stream keeps
        // pulling from the engine lazily.
        let _compeng_permit = if compeng_plan.is_empty() {
            None
        } else {
            let permit = self
                .compeng_gate
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| Error::new_assert("compute engine gate is closed"))?;
            streams = self
                .compeng
                .run(compeng_plan.operations, streams, compeng_plan.output_stream_ids)
                .await?;
            harvest(&streams, &mut meta, &mut debug_queries);
            Some(permit)
        };

        let mut streams = streams.into_iter();
        let Some(result) = streams.next() else {
            return Err(Error::new_assert("execution produced no output stream")
                .with_code(codes::INVALID_QUERY_STRUCTURE));
        };
        if streams.next().is_some() {
            return Err(Error::new_assert("execution left more than one output stream")
                .with_code(codes::INVALID_QUERY_STRUCTURE));
        }

        if !debug_queries.is_empty() {
            meta.debug_query = Some(debug_queries.join("\n;\n\n"));
        }
        let names = result.names.clone();
        let rows = result.drain_limited(row_count_hard_limit).await?;
        log::debug!(
            "executed multi-query of {} queries: {} rows from stream of {} columns",
            multi.query_count(),
            rows.len(),
            names.len(),
        );
        Ok(ExecutedQuery { names, rows, meta })
    }
}

fn harvest(streams: &[DataStream], meta: &mut ExecutedQueryMeta, debug_queries: &mut Vec<String>) {
    for stream in streams {
        if let Some(connection_id) = &stream.meta.connection_id {
            meta.target_connection_ids.insert(connection_id.clone());
        }
        if stream.meta.pass_db_query_to_user {
            if let Some(statement) = &stream.meta.debug_query {
                debug_queries.push(statement.clone());
            }
        }
        meta.warnings.extend(stream.meta.warnings.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use itertools::Itertools;
    use serde_json::json;

    use biqc::ir::datatype::DataType;
    use biqc::ir::query::ExecutionLevel;

    use super::*;
    use crate::fixture::{avatar_from, query, subquery_from};
    use crate::ops::StreamOperation;
    use crate::stream::StreamMeta;

    /// Returns canned rows for every requested output stream and records
    /// what it was asked to run.
    struct ScriptedProcessor {
        rows: Vec<Row>,
        meta: StreamMeta,
        delay: Option<Duration>,
        extra_stream: bool,
        calls: Mutex<Vec<Vec<StreamOperation>>>,
        running: AtomicUsize,
        peak_running: AtomicUsize,
    }

    impl ScriptedProcessor {
        fn new(rows: Vec<Row>, meta: StreamMeta) -> Self {
            ScriptedProcessor {
                rows,
                meta,
                delay: None,
                extra_stream: false,
                calls: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                peak_running: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn rendered_call(&self, index: usize) -> String {
            self.calls.lock().unwrap()[index].iter().join("\n")
        }
    }

    #[async_trait::async_trait]
    impl DataProcessor for ScriptedProcessor {
        async fn run(
            &self,
            operations: Vec<StreamOperation>,
            input_streams: Vec<DataStream>,
            output_stream_ids: Vec<StreamId>,
        ) -> Result<Vec<DataStream>> {
            self.calls.lock().unwrap().push(operations);
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_running.fetch_max(running, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            drop(input_streams);

            let mut streams: Vec<DataStream> = output_stream_ids
                .into_iter()
                .map(|id| {
                    DataStream::from_rows(
                        id,
                        vec!["res_0".to_string()],
                        vec![DataType::INTEGER],
                        self.rows.clone(),
                    )
                    .with_meta(self.meta.clone())
                })
                .collect();
            if self.extra_stream {
                streams.push(DataStream::empty(
                    "surplus".to_string(),
                    vec![],
                    vec![],
                ));
            }
            Ok(streams)
        }
    }

    fn source_meta() -> StreamMeta {
        StreamMeta {
            connection_id: Some("conn_1".to_string()),
            debug_query: Some("SELECT city FROM orders".to_string()),
            pass_db_query_to_user: true,
            warnings: vec![],
        }
    }

    fn compeng_meta() -> StreamMeta {
        StreamMeta {
            connection_id: None,
            debug_query: Some("SELECT res_0 FROM q_0".to_string()),
            pass_db_query_to_user: true,
            warnings: vec![],
        }
    }

    fn single_level_multi() -> TranslatedMultiQuery {
        TranslatedMultiQuery {
            queries: vec![query("qq", ExecutionLevel::SourceDb, vec![avatar_from("ava_1")])],
        }
    }

    fn two_level_multi() -> TranslatedMultiQuery {
        TranslatedMultiQuery {
            queries: vec![
                query("qq", ExecutionLevel::Compeng, vec![subquery_from("q_0")]),
                query("q_0", ExecutionLevel::SourceDb, vec![avatar_from("ava_1")]),
            ],
        }
    }

    fn executor(source: Arc<ScriptedProcessor>, compeng: Arc<ScriptedProcessor>) -> QueryExecutor {
        QueryExecutor::new(source, compeng).with_compeng_slots(2)
    }

    #[tokio::test]
    async fn single_level_run_skips_the_compute_engine() {
        let source = Arc::new(ScriptedProcessor::new(
            vec![vec![json!("SF")], vec![json!("LA")]],
            source_meta(),
        ));
        let compeng = Arc::new(ScriptedProcessor::new(vec![], StreamMeta::default()));
        let executed = executor(source.clone(), compeng.clone())
            .execute(&single_level_multi())
            .await
            .unwrap();

        assert_eq!(executed.rows.len(), 2);
        assert_eq!(executed.names, vec!["res_0"]);
        assert_eq!(executed.meta.debug_query.as_deref(), Some("SELECT city FROM orders"));
        assert_eq!(
            executed.meta.target_connection_ids.iter().join(","),
            "conn_1"
        );
        assert_eq!(source.call_count(), 1);
        assert_eq!(compeng.call_count(), 0);
        assert_eq!(
            source.rendered_call(0),
            "join [ava_1] -> s_0\ncalc qq: s_0 -> qq\ndownload qq -> s_1"
        );
    }

    #[tokio::test]
    async fn two_level_run_joins_debug_statements() {
        let source = Arc::new(ScriptedProcessor::new(vec![vec![json!(1)]], source_meta()));
        let compeng = Arc::new(ScriptedProcessor::new(vec![vec![json!(1)]], compeng_meta()));
        let executed = executor(source.clone(), compeng.clone())
            .execute(&two_level_multi())
            .await
            .unwrap();

        assert_eq!(
            executed.meta.debug_query.as_deref(),
            Some("SELECT city FROM orders\n;\n\nSELECT res_0 FROM q_0")
        );
        assert_eq!(executed.meta.target_connection_ids.len(), 1);
        assert_eq!(
            compeng.rendered_call(0),
            "upload q_0 -> s_0 as q_0\ncalc qq: s_0 -> qq\ndownload qq -> s_1"
        );
    }

    #[tokio::test]
    async fn empty_query_policy_error_propagates() {
        let mut degenerate = query("qq", ExecutionLevel::SourceDb, vec![avatar_from("ava_1")]);
        degenerate.select.clear();
        let multi = TranslatedMultiQuery {
            queries: vec![degenerate],
        };
        let source = Arc::new(ScriptedProcessor::new(vec![], StreamMeta::default()));
        let compeng = Arc::new(ScriptedProcessor::new(vec![], StreamMeta::default()));
        let error = executor(source.clone(), compeng)
            .execute(&multi)
            .await
            .unwrap_err();
        assert_eq!(error.code, Some(codes::EMPTY_QUERY));
        assert_eq!(source.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_query_policy_empty_yields_zero_rows() {
        let mut degenerate = query("qq", ExecutionLevel::SourceDb, vec![avatar_from("ava_1")]);
        degenerate.select.clear();
        degenerate.meta.empty_query_mode = EmptyQueryMode::Empty;
        let multi = TranslatedMultiQuery {
            queries: vec![degenerate],
        };
        let source = Arc::new(ScriptedProcessor::new(vec![], StreamMeta::default()));
        let compeng = Arc::new(ScriptedProcessor::new(vec![], StreamMeta::default()));
        let executed = executor(source, compeng).execute(&multi).await.unwrap();
        assert!(executed.rows.is_empty());
        assert!(executed.names.is_empty());
    }

    #[tokio::test]
    async fn empty_query_policy_empty_row_yields_one_bare_row() {
        let mut degenerate = query("qq", ExecutionLevel::SourceDb, vec![avatar_from("ava_1")]);
        degenerate.select.clear();
        degenerate.meta.empty_query_mode = EmptyQueryMode::EmptyRow;
        let multi = TranslatedMultiQuery {
            queries: vec![degenerate],
        };
        let source = Arc::new(ScriptedProcessor::new(vec![], StreamMeta::default()));
        let compeng = Arc::new(ScriptedProcessor::new(vec![], StreamMeta::default()));
        let executed = executor(source, compeng).execute(&multi).await.unwrap();
        assert_eq!(executed.rows, vec![Row::new()]);
        assert!(executed.rows[0].is_empty());
    }

    #[tokio::test]
    async fn hard_row_limit_fails_the_run() {
        let mut top = query("qq", ExecutionLevel::SourceDb, vec![avatar_from("ava_1")]);
        top.meta.row_count_hard_limit = Some(1);
        let multi = TranslatedMultiQuery {
            queries: vec![top],
        };
        let source = Arc::new(ScriptedProcessor::new(
            vec![vec![json!(1)], vec![json!(2)]],
            StreamMeta::default(),
        ));
        let compeng = Arc::new(ScriptedProcessor::new(vec![], StreamMeta::default()));
        let error = executor(source, compeng).execute(&multi).await.unwrap_err();
        assert_eq!(error.code, Some(codes::ROW_LIMIT));
    }

    #[tokio::test]
    async fn surplus_output_streams_are_rejected() {
        let mut source = ScriptedProcessor::new(vec![vec![json!(1)]], StreamMeta::default());
        source.extra_stream = true;
        let compeng = Arc::new(ScriptedProcessor::new(vec![], StreamMeta::default()));
        let error = executor(Arc::new(source), compeng)
            .execute(&single_level_multi())
            .await
            .unwrap_err();
        assert_eq!(error.code, Some(codes::INVALID_QUERY_STRUCTURE));
        assert_eq!(
            error.reason.to_string(),
            "internal compiler error; execution left more than one output stream"
        );
    }

    #[tokio::test]
    async fn dimensionless_piece_reports_one_connection() {
        let multi = TranslatedMultiQuery {
            queries: vec![
                query(
                    "qq",
                    ExecutionLevel::Compeng,
                    vec![subquery_from("q_0"), subquery_from("q_1")],
                ),
                query("q_0", ExecutionLevel::SourceDb, vec![avatar_from("ava_1")]),
                query("q_1", ExecutionLevel::SourceDb, vec![]),
            ],
        };
        let source = Arc::new(ScriptedProcessor::new(vec![vec![json!(1)]], source_meta()));
        let compeng = Arc::new(ScriptedProcessor::new(
            vec![vec![json!(1)]],
            StreamMeta::default(),
        ));
        let executed = executor(source.clone(), compeng)
            .execute(&multi)
            .await
            .unwrap();

        assert_eq!(executed.meta.target_connection_ids.len(), 1);
        let ops = source.rendered_call(0);
        assert!(ops.contains("join [] -> s_1 (empty source)"), "{ops}");
    }

    #[tokio::test]
    async fn compeng_gate_bounds_concurrent_runs() {
        let source = Arc::new(ScriptedProcessor::new(vec![vec![json!(1)]], StreamMeta::default()));
        let mut compeng = ScriptedProcessor::new(vec![vec![json!(1)]], StreamMeta::default());
        compeng.delay = Some(Duration::from_millis(5));
        let compeng = Arc::new(compeng);
        let executor = QueryExecutor::new(source, compeng.clone()).with_compeng_slots(1);

        let multi = two_level_multi();
        let (first, second) = tokio::join!(executor.execute(&multi), executor.execute(&multi));
        first.unwrap();
        second.unwrap();
        assert_eq!(compeng.peak_running.load(Ordering::SeqCst), 1);
    }
}
