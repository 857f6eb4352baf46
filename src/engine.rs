//! Query generation and execution.
//!
//! The loop that turns a question plus schema context into rows: generate
//! SQL, let the guard chain inspect it, execute it. Generation and execution
//! run inside the retry executor so a failed execution's error text reaches
//! the next generation attempt; a guard veto ends the loop immediately with
//! an advisory outcome instead of retrying.

use crate::config::AgentOptions;
use crate::db::{Database, TabularResult};
use crate::error::{AgentError, Result};
use crate::filters::{run_chain, QueryContext, QueryGuard};
use crate::model::{parse_json, ModelService, WriteSqlResponse};
use crate::prompts::{render, PromptName, PromptProvider};
use crate::retry::RetryPolicy;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Turns a natural-language request into SQL for one provider dialect.
/// Shared by the question pipeline and schema discovery.
pub struct SqlWriter {
    model: Arc<dyn ModelService>,
    prompts: Arc<dyn PromptProvider>,
    provider_name: String,
}

impl SqlWriter {
    pub fn new(
        model: Arc<dyn ModelService>,
        prompts: Arc<dyn PromptProvider>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            model,
            prompts,
            provider_name: provider_name.into(),
        }
    }

    /// One generation attempt. `previous_attempt` and `previous_error` carry
    /// the feedback from a failed earlier attempt, empty on the first.
    pub async fn write(
        &self,
        request: &str,
        tables_definition: &str,
        previous_attempt: Option<&str>,
        previous_error: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<WriteSqlResponse> {
        let prompt = render(
            self.prompts.read_prompt(PromptName::WriteSql),
            &[
                ("providerName", self.provider_name.as_str()),
                ("tablesDefinition", tables_definition),
                ("prompt", request),
                ("previousAttempt", previous_attempt.unwrap_or("")),
                ("previousException", previous_error.unwrap_or("")),
            ],
        );

        let raw = self.model.complete(&prompt, cancel).await?;
        let response: WriteSqlResponse = parse_json(&raw)?;

        if response.query.trim().is_empty() {
            return Err(AgentError::Model(
                "the model was unable to generate the expected query".to_string(),
            ));
        }

        for comment in &response.comments {
            debug!(comment, "generation note");
        }

        Ok(response)
    }
}

/// How a question attempt ended: rows, or an advisory from a guard.
#[derive(Debug)]
pub enum QueryOutcome {
    Executed {
        sql: String,
        comments: Vec<String>,
        table: TabularResult,
    },
    Filtered {
        message: String,
    },
}

pub struct QueryEngine {
    database: Arc<dyn Database>,
    writer: SqlWriter,
    guards: Vec<Arc<dyn QueryGuard>>,
    retry: RetryPolicy,
}

impl QueryEngine {
    pub fn new(
        model: Arc<dyn ModelService>,
        prompts: Arc<dyn PromptProvider>,
        database: Arc<dyn Database>,
        guards: Vec<Arc<dyn QueryGuard>>,
        options: &AgentOptions,
    ) -> Self {
        let writer = SqlWriter::new(model, prompts, database.provider_name());
        Self {
            database,
            writer,
            guards,
            retry: RetryPolicy::new(
                options.max_attempts,
                Duration::from_millis(options.retry_delay_ms),
            ),
        }
    }

    pub async fn run(
        &self,
        question: &str,
        schema_context: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome> {
        let previous_sql: Mutex<String> = Mutex::new(String::new());

        self.retry
            .run(cancel, |previous_error| {
                let previous_sql = &previous_sql;
                async move {
                    let previous_attempt = {
                        let sql = previous_sql.lock().unwrap_or_else(|e| e.into_inner());
                        (!sql.is_empty()).then(|| sql.clone())
                    };

                    let generated = self
                        .writer
                        .write(
                            question,
                            schema_context,
                            previous_attempt.as_deref(),
                            previous_error.as_deref(),
                            cancel,
                        )
                        .await?;

                    *previous_sql.lock().unwrap_or_else(|e| e.into_inner()) =
                        generated.query.clone();

                    info!(sql = %generated.query, "SQL query generated");

                    let ctx = QueryContext {
                        question,
                        schema_context,
                        sql: &generated.query,
                        cancel,
                    };

                    let verdict = run_chain(&self.guards, &ctx).await?;
                    if verdict.filtered {
                        info!(message = %verdict.message, "query execution filtered");
                        return Ok(QueryOutcome::Filtered {
                            message: verdict.message,
                        });
                    }

                    let table = self.database.execute(&generated.query, cancel).await?;

                    Ok(QueryOutcome::Executed {
                        sql: generated.query,
                        comments: generated.comments,
                        table,
                    })
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{Next, Verdict};
    use crate::prompts::EmbeddedPrompts;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every generation prompt with the same SQL and records the
    /// prompts it saw.
    struct RecordingModel {
        sql: String,
        prompts: Mutex<Vec<String>>,
    }

    impl RecordingModel {
        fn new(sql: &str) -> Self {
            Self {
                sql: sql.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelService for RecordingModel {
        async fn complete(&self, prompt: &str, _cancel: &CancellationToken) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(format!(r#"{{"comments": ["none"], "query": "{}"}}"#, self.sql))
        }
    }

    /// Fails the first `failures` executions, then returns a fixed table.
    struct FlakyDatabase {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Database for FlakyDatabase {
        fn provider_name(&self) -> &str {
            "SQLite"
        }

        async fn execute(&self, _sql: &str, _cancel: &CancellationToken) -> Result<TabularResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(AgentError::Database("no such column: nmae".to_string()));
            }
            Ok(TabularResult::new(vec!["count".into()], vec![vec!["93".into()]]))
        }
    }

    struct VetoGuard;

    #[async_trait]
    impl QueryGuard for VetoGuard {
        async fn evaluate<'a>(&self, _ctx: &'a QueryContext<'a>, _next: Next<'a>) -> Result<Verdict> {
            Ok(Verdict::veto("please rephrase"))
        }
    }

    fn engine(model: Arc<RecordingModel>, database: Arc<FlakyDatabase>, guards: Vec<Arc<dyn QueryGuard>>) -> QueryEngine {
        let options = AgentOptions {
            retry_delay_ms: 1,
            ..AgentOptions::default()
        };
        QueryEngine::new(model, Arc::new(EmbeddedPrompts), database, guards, &options)
    }

    #[tokio::test]
    async fn executes_generated_sql() {
        let model = Arc::new(RecordingModel::new("SELECT COUNT(*) FROM customers"));
        let database = Arc::new(FlakyDatabase { failures: 0, calls: AtomicUsize::new(0) });
        let cancel = CancellationToken::new();

        let outcome = engine(model.clone(), database, vec![])
            .run("How many customers do I have?", "### customers", &cancel)
            .await
            .unwrap();

        match outcome {
            QueryOutcome::Executed { sql, comments, table } => {
                assert_eq!(sql, "SELECT COUNT(*) FROM customers");
                assert_eq!(comments, vec!["none"]);
                assert_eq!(table.rows[0][0], "93");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_execution_feeds_the_next_attempt() {
        let model = Arc::new(RecordingModel::new("SELECT nmae FROM customers"));
        let database = Arc::new(FlakyDatabase { failures: 1, calls: AtomicUsize::new(0) });
        let cancel = CancellationToken::new();

        let outcome = engine(model.clone(), database.clone(), vec![])
            .run("List customer names", "### customers", &cancel)
            .await
            .unwrap();

        assert!(matches!(outcome, QueryOutcome::Executed { .. }));
        assert_eq!(database.calls.load(Ordering::SeqCst), 2);

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        // First attempt carries no feedback; the second carries both the
        // previous SQL and the database error.
        assert!(!prompts[0].contains("no such column"));
        assert!(prompts[1].contains("no such column: nmae"));
        assert!(prompts[1].contains("SELECT nmae FROM customers"));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_last_error() {
        let model = Arc::new(RecordingModel::new("SELECT nmae FROM customers"));
        let database = Arc::new(FlakyDatabase { failures: 99, calls: AtomicUsize::new(0) });
        let cancel = CancellationToken::new();

        let error = engine(model.clone(), database.clone(), vec![])
            .run("List customer names", "### customers", &cancel)
            .await
            .unwrap_err();

        assert_eq!(database.calls.load(Ordering::SeqCst), 3);
        assert_eq!(error.to_string(), "Database error: no such column: nmae");
    }

    #[tokio::test]
    async fn guard_veto_skips_execution_and_retries() {
        let model = Arc::new(RecordingModel::new("SELECT * FROM shipments"));
        let database = Arc::new(FlakyDatabase { failures: 0, calls: AtomicUsize::new(0) });
        let guards: Vec<Arc<dyn QueryGuard>> = vec![Arc::new(VetoGuard)];
        let cancel = CancellationToken::new();

        let outcome = engine(model.clone(), database.clone(), guards)
            .run("How many customers do I have?", "### customers", &cancel)
            .await
            .unwrap();

        match outcome {
            QueryOutcome::Filtered { message } => assert_eq!(message, "please rephrase"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // No execution and no second generation attempt.
        assert_eq!(database.calls.load(Ordering::SeqCst), 0);
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }
}
