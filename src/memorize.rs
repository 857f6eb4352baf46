//! Schema memorization.
//!
//! Builds the searchable knowledge base from a live database: one embedded
//! snippet per table, reusing previously memorized work unless an update is
//! forced. Tables are processed sequentially; each table is fully described,
//! embedded and upserted before the next begins.

use crate::config::AgentOptions;
use crate::db::{Database, TabularResult};
use crate::engine::SqlWriter;
use crate::error::{AgentError, Result};
use crate::model::{parse_json, EmbeddingService, ExplainTableResponse, ExtractTableNameResponse, ModelService};
use crate::prompts::{render, PromptName, PromptProvider};
use crate::render::{render_row, render_table};
use crate::retry::RetryPolicy;
use crate::store::{KnowledgeStore, TableSnippet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// How many nearest neighbors to inspect when looking for an existing
/// snippet. The match itself is by exact table name, never by similarity
/// alone.
const NEIGHBOR_WINDOW: usize = 10;

/// What a memorization pass produced. `context` is the newline-joined text
/// of every table description, in discovery order.
#[derive(Debug, Clone)]
pub struct MemorizeReport {
    pub context: String,
    pub table_names: Vec<String>,
    pub generated: usize,
    pub reused: usize,
}

pub struct SchemaMemorizer {
    model: Arc<dyn ModelService>,
    embeddings: Arc<dyn EmbeddingService>,
    database: Arc<dyn Database>,
    store: Arc<dyn KnowledgeStore<TableSnippet>>,
    prompts: Arc<dyn PromptProvider>,
    writer: SqlWriter,
    retry: RetryPolicy,
    sample_rows: usize,
}

impl SchemaMemorizer {
    pub fn new(
        model: Arc<dyn ModelService>,
        embeddings: Arc<dyn EmbeddingService>,
        database: Arc<dyn Database>,
        store: Arc<dyn KnowledgeStore<TableSnippet>>,
        prompts: Arc<dyn PromptProvider>,
        options: &AgentOptions,
    ) -> Self {
        let writer = SqlWriter::new(model.clone(), prompts.clone(), database.provider_name());
        Self {
            model,
            embeddings,
            database,
            store,
            prompts,
            writer,
            retry: RetryPolicy::new(
                options.max_attempts,
                Duration::from_millis(options.retry_delay_ms),
            ),
            sample_rows: options.sample_rows,
        }
    }

    /// Discover and memorize every table. With `update` set, descriptions and
    /// embeddings are regenerated even for tables already memorized.
    ///
    /// A table whose name cannot be extracted aborts the whole pass; a
    /// partially built knowledge base is not considered valid.
    pub async fn memorize(&self, update: bool, cancel: &CancellationToken) -> Result<MemorizeReport> {
        self.store.ensure_collection().await?;

        let listing = self.generate_and_execute("List all tables", "", cancel).await?;
        info!(candidates = listing.row_count(), "discovered table candidates");

        let mut descriptions = Vec::with_capacity(listing.row_count());
        let mut table_names = Vec::with_capacity(listing.row_count());
        let mut generated = 0usize;
        let mut reused = 0usize;

        for index in 0..listing.row_count() {
            let Some(candidate) = render_row(&listing, index) else {
                continue;
            };

            let (snippet, was_generated) = self.describe_table(&candidate, update, cancel).await?;

            descriptions.push(snippet.description.clone().unwrap_or_default());
            table_names.push(snippet.table_name);
            if was_generated {
                generated += 1;
            } else {
                reused += 1;
            }
        }

        info!(generated, reused, "schema memorization complete");

        Ok(MemorizeReport {
            context: descriptions.join("\n"),
            table_names,
            generated,
            reused,
        })
    }

    /// Memorize one table candidate. Returns the snippet and whether it was
    /// freshly generated (as opposed to reused from the store).
    async fn describe_table(
        &self,
        candidate: &str,
        update: bool,
        cancel: &CancellationToken,
    ) -> Result<(TableSnippet, bool)> {
        let table_name = self.extract_table_name(candidate, cancel).await?;
        debug!(table = %table_name, "processing table candidate");

        let candidate_embedding = self.embeddings.embed(candidate, cancel).await?;
        let existing = self
            .store
            .search(&candidate_embedding, NEIGHBOR_WINDOW)
            .await?
            .into_iter()
            .map(|hit| hit.record)
            .find(|record| record.table_name == table_name);

        if let Some(existing) = existing.as_ref() {
            if !update {
                debug!(table = %table_name, "reusing memorized snippet");
                return Ok((existing.clone(), false));
            }
        }

        debug!(table = %table_name, "generating table description");

        let definition = render_table(
            &self
                .generate_and_execute(
                    &format!(
                        "Extract the structure of table {table_name} by listing the column \
                         attributes, including the column name, data type, maximum length, \
                         and default value."
                    ),
                    "",
                    cancel,
                )
                .await?,
        );

        let sample = render_table(
            &self
                .generate_and_execute(
                    &format!("Get the first {} rows for '{table_name}'", self.sample_rows),
                    &definition,
                    cancel,
                )
                .await?,
        );

        let explanation = self
            .explain_table(&table_name, &definition, &sample, cancel)
            .await?;

        let description = format!(
            "### {table_name}\n\n{}\n\n#### Attributes\n\n{}\n\n#### Relations\n\n{}",
            explanation.definition, explanation.attributes, explanation.relations
        );

        let embedding = self.embeddings.embed(&description, cancel).await?;

        let snippet = TableSnippet {
            key: existing.map(|record| record.key).unwrap_or_else(Uuid::new_v4),
            table_name,
            definition: Some(definition),
            description: Some(description),
            sample_data: Some(sample),
            embedding,
        };

        self.store.upsert(snippet.clone()).await?;

        Ok((snippet, true))
    }

    async fn extract_table_name(&self, candidate: &str, cancel: &CancellationToken) -> Result<String> {
        self.retry
            .run(cancel, |_previous_error| async move {
                let prompt = render(
                    self.prompts.read_prompt(PromptName::ExtractTableName),
                    &[("item", candidate)],
                );

                let raw = self.model.complete(&prompt, cancel).await?;
                let response: ExtractTableNameResponse = parse_json(&raw)?;

                if response.table_name.trim().is_empty() {
                    return Err(AgentError::Discovery(format!(
                        "failed to extract a table name from candidate: {candidate}"
                    )));
                }

                debug!(thinking = %response.thinking, table = %response.table_name, "table name extracted");
                Ok(response.table_name.trim().to_string())
            })
            .await
    }

    async fn explain_table(
        &self,
        table_name: &str,
        definition: &str,
        sample: &str,
        cancel: &CancellationToken,
    ) -> Result<ExplainTableResponse> {
        self.retry
            .run(cancel, |_previous_error| async move {
                let prompt = render(
                    self.prompts.read_prompt(PromptName::ExplainTable),
                    &[
                        ("providerName", self.database.provider_name()),
                        ("tableName", table_name),
                        ("tableDefinition", definition),
                        ("tableDataExtract", sample),
                    ],
                );

                let raw = self.model.complete(&prompt, cancel).await?;
                parse_json(&raw)
            })
            .await
    }

    /// Generate SQL for `request` and execute it, retrying with the failed
    /// attempt and its error as feedback.
    async fn generate_and_execute(
        &self,
        request: &str,
        tables_definition: &str,
        cancel: &CancellationToken,
    ) -> Result<TabularResult> {
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
                            request,
                            tables_definition,
                            previous_attempt.as_deref(),
                            previous_error.as_deref(),
                            cancel,
                        )
                        .await?;

                    *previous_sql.lock().unwrap_or_else(|e| e.into_inner()) =
                        generated.query.clone();

                    self.database.execute(&generated.query, cancel).await
                }
            })
            .await
    }
}
