//! Agent tuning knobs.

use serde::{Deserialize, Serialize};

/// Options controlling schema retrieval, generation retries and the guard chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOptions {
    /// Number of schema snippets kept after reranking.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Total attempts for each model-backed step (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Fixed delay between attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Rows requested when sampling a table during memorization.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    /// Minimum cosine similarity between the question and the questions
    /// implied by the generated SQL.
    #[serde(default = "default_relevancy_threshold")]
    pub relevancy_threshold: f32,

    #[serde(default = "default_true")]
    pub enable_relevancy_guard: bool,

    #[serde(default = "default_true")]
    pub enable_statement_guard: bool,
}

fn default_top_k() -> usize {
    5
}

fn default_max_attempts() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_sample_rows() -> usize {
    5
}

fn default_relevancy_threshold() -> f32 {
    0.9
}

fn default_true() -> bool {
    true
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            sample_rows: default_sample_rows(),
            relevancy_threshold: default_relevancy_threshold(),
            enable_relevancy_guard: true,
            enable_statement_guard: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = AgentOptions::default();
        assert_eq!(options.top_k, 5);
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.retry_delay_ms, 200);
        assert_eq!(options.sample_rows, 5);
        assert_eq!(options.relevancy_threshold, 0.9);
        assert!(options.enable_relevancy_guard);
        assert!(options.enable_statement_guard);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let options: AgentOptions = serde_json::from_str(r#"{"top_k": 3}"#).unwrap();
        assert_eq!(options.top_k, 3);
        assert_eq!(options.max_attempts, 3);
        assert!(options.enable_statement_guard);
    }
}
