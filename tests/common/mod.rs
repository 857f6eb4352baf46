//! Deterministic fakes for the model, embedding and database collaborators.
//!
//! The scripted model routes on distinctive phrases of the embedded prompt
//! templates, so the whole agent lifecycle runs offline and repeatably.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use sqlscout::db::{Database, TabularResult};
use sqlscout::error::{AgentError, Result};
use sqlscout::model::{EmbeddingService, ModelService};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

const EMBEDDING_DIM: usize = 64;

/// Bag-of-words embeddings with a fixed hash, so identical texts embed
/// identically and lexically disjoint texts are near orthogonal.
pub struct HashEmbeddings;

impl HashEmbeddings {
    fn embed_text(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = token
                .to_lowercase()
                .bytes()
                .fold(0usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
                % EMBEDDING_DIM;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingService for HashEmbeddings {
    async fn embed(&self, text: &str, _cancel: &CancellationToken) -> Result<Vec<f32>> {
        Ok(Self::embed_text(text))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        _cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::embed_text(t)).collect())
    }
}

/// A model whose behavior is fixed up front. Records every prompt it sees.
pub struct ScriptedModel {
    /// Tables the fake "knows"; name extraction scans candidates for these.
    pub table_names: Vec<String>,
    /// SQL produced for anything that is not a discovery request.
    pub question_sql: String,
    /// Questions the relevancy guard's extraction step returns.
    pub implied_questions: Vec<String>,
    /// Answer produced by the final grounding call.
    pub final_answer: String,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(table_names: &[&str], question_sql: &str) -> Self {
        Self {
            table_names: table_names.iter().map(|n| n.to_string()).collect(),
            question_sql: question_sql.to_string(),
            implied_questions: vec!["How many customers do I have?".to_string()],
            final_answer: "You have 93 customers.".to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompt_count(&self, marker: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(marker))
            .count()
    }

    fn named_table(&self, text: &str) -> Option<&str> {
        self.table_names
            .iter()
            .find(|name| text.contains(name.as_str()))
            .map(|name| name.as_str())
    }

    fn write_sql(&self, prompt: &str) -> String {
        let request = prompt
            .lines()
            .find(|line| line.starts_with("Request: "))
            .unwrap_or("");

        let query = if request.contains("List all tables") {
            "SELECT name FROM sqlite_master WHERE type = 'table'".to_string()
        } else if request.contains("Extract the structure of table") {
            match self.named_table(request) {
                Some(name) => format!("PRAGMA table_info({name})"),
                None => String::new(),
            }
        } else if request.contains("Get the first") {
            match self.named_table(request) {
                Some(name) => format!("SELECT * FROM {name} LIMIT 5"),
                None => String::new(),
            }
        } else {
            self.question_sql.clone()
        };

        serde_json::json!({ "comments": ["generated offline"], "query": query }).to_string()
    }
}

#[async_trait]
impl ModelService for ScriptedModel {
    async fn complete(&self, prompt: &str, _cancel: &CancellationToken) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if prompt.contains("Request: ") {
            return Ok(self.write_sql(prompt));
        }

        if prompt.contains("Extract the canonical name") {
            let name = self.named_table(prompt).unwrap_or("");
            return Ok(serde_json::json!({
                "thinking": "the row names the table directly",
                "tableName": name
            })
            .to_string());
        }

        if prompt.contains("You are documenting the table") {
            let name = self.named_table(prompt).unwrap_or("unknown");
            return Ok(serde_json::json!({
                "definition": format!("The {name} table holds one row per {name} record."),
                "attributes": "- id: numeric identifier\n- name: display name",
                "relations": "None identified."
            })
            .to_string());
        }

        if prompt.contains("third-person description") {
            return Ok(serde_json::json!({
                "description": "Answers questions about customers and their orders."
            })
            .to_string());
        }

        if prompt.contains("memorable name") {
            return Ok(serde_json::json!({ "name": "northwind_scout" }).to_string());
        }

        if prompt.contains("system instructions") {
            return Ok(serde_json::json!({
                "instructions": "Ground every answer in the query results you are given."
            })
            .to_string());
        }

        if prompt.contains("natural-language questions this query") {
            return Ok(serde_json::json!({ "questions": self.implied_questions }).to_string());
        }

        if prompt.contains("final answer in natural language") {
            return Ok(serde_json::json!({
                "thinking": "the result table contains the count",
                "answer": self.final_answer
            })
            .to_string());
        }

        Err(AgentError::Model(format!(
            "scripted model has no route for prompt: {}",
            prompt.chars().take(80).collect::<String>()
        )))
    }
}

/// In-memory database keyed by SQL substrings. Counts executions so tests
/// can assert that a vetoed query never ran.
pub struct FakeDatabase {
    responses: Vec<(String, TabularResult)>,
    pub executions: AtomicUsize,
}

impl FakeDatabase {
    pub fn new(responses: Vec<(&str, TabularResult)>) -> Self {
        Self {
            responses: responses
                .into_iter()
                .map(|(pattern, table)| (pattern.to_string(), table))
                .collect(),
            executions: AtomicUsize::new(0),
        }
    }

    /// The two-table fixture most scenarios use: Customers and Orders.
    pub fn customers_and_orders() -> Self {
        Self::new(vec![
            (
                "FROM sqlite_master",
                table(&["name"], &[&["Customers"], &["Orders"]]),
            ),
            (
                "table_info(Customers)",
                table(
                    &["name", "type"],
                    &[&["id", "INTEGER"], &["name", "TEXT"], &["city", "TEXT"]],
                ),
            ),
            (
                "table_info(Orders)",
                table(
                    &["name", "type"],
                    &[&["id", "INTEGER"], &["customer_id", "INTEGER"]],
                ),
            ),
            (
                "SELECT * FROM Customers LIMIT 5",
                table(&["id", "name", "city"], &[&["1", "Acme", "Lyon"]]),
            ),
            (
                "SELECT * FROM Orders LIMIT 5",
                table(&["id", "customer_id"], &[&["7", "1"]]),
            ),
            (
                "SELECT COUNT(*) FROM Customers",
                table(&["count"], &[&["93"]]),
            ),
        ])
    }

    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Database for FakeDatabase {
    fn provider_name(&self) -> &str {
        "SQLite"
    }

    async fn execute(&self, sql: &str, _cancel: &CancellationToken) -> Result<TabularResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .ok_or_else(|| AgentError::Database(format!("no such table for query: {sql}")))
    }
}

pub fn table(columns: &[&str], rows: &[&[&str]]) -> TabularResult {
    TabularResult::new(
        columns.iter().map(|c| c.to_string()).collect(),
        rows.iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect(),
    )
}
