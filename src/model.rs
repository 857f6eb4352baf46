//! Model and embedding services.
//!
//! The pipeline never talks to a provider directly. It depends on two narrow
//! traits, `ModelService` and `EmbeddingService`, so tests can substitute
//! deterministic fakes and deployments can swap providers. The structured
//! responses each call site expects are defined here and parsed with
//! [`parse_json`]; a parse failure is a first-class error that feeds the
//! retry loop.

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait ModelService: Send + Sync {
    /// Run a completion and return the raw response text.
    async fn complete(&self, prompt: &str, cancel: &CancellationToken) -> Result<String>;
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>>;

    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>>;
}

/// SQL produced by the model, with the assumptions it made along the way.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteSqlResponse {
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractTableNameResponse {
    #[serde(default)]
    pub thinking: String,
    #[serde(rename = "tableName", default)]
    pub table_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplainTableResponse {
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub attributes: String,
    #[serde(default)]
    pub relations: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentDescriptionResponse {
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentNameResponse {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentInstructionsResponse {
    pub instructions: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImpliedQuestionsResponse {
    #[serde(default)]
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinalAnswerResponse {
    #[serde(default)]
    pub thinking: String,
    pub answer: String,
}

/// Parse a structured model response, tolerating a Markdown code fence
/// around the JSON body.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let body = strip_code_fence(raw.trim());
    serde_json::from_str(body).map_err(|e| {
        let head: String = body.chars().take(120).collect();
        AgentError::Parse(format!("{e} in model response starting with: {head:?}"))
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Chat-completion client for OpenAI-compatible endpoints.
pub struct OpenAiModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiModel {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key,
            model,
            temperature: 0.0,
            max_tokens: 4096,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ModelService for OpenAiModel {
    async fn complete(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a precise JSON-only responder. Always return valid JSON, no other text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {"type": "json_object"}
        });

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            response = request => {
                response.map_err(|e| AgentError::Model(format!("completion request failed: {e}")))?
            }
        };

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Model(format!("malformed completion response: {e}")))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|content| content.to_string())
            .ok_or_else(|| AgentError::Model(format!("no content in completion response: {payload}")))
    }
}

/// Embedding client for OpenAI-compatible endpoints.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key,
            model,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn request(&self, input: &[String], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
        });

        let request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            response = request => {
                response.map_err(|e| AgentError::Embedding(format!("embedding request failed: {e}")))?
            }
        };

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Embedding(format!("malformed embedding response: {e}")))?;

        let data = payload["data"]
            .as_array()
            .ok_or_else(|| AgentError::Embedding(format!("no data in embedding response: {payload}")))?;

        let mut vectors = Vec::with_capacity(data.len());
        for entry in data {
            let vector = entry["embedding"]
                .as_array()
                .ok_or_else(|| AgentError::Embedding("entry without embedding".to_string()))?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            vectors.push(vector);
        }

        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddings {
    async fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()], cancel).await?;
        vectors
            .pop()
            .ok_or_else(|| AgentError::Embedding("empty embedding response".to_string()))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.request(texts, cancel).await?;
        if vectors.len() != texts.len() {
            return Err(AgentError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_accepts_plain_object() {
        let parsed: WriteSqlResponse =
            parse_json(r#"{"comments": ["a"], "query": "SELECT 1"}"#).unwrap();
        assert_eq!(parsed.query, "SELECT 1");
        assert_eq!(parsed.comments, vec!["a"]);
    }

    #[test]
    fn parse_json_strips_code_fence() {
        let parsed: AgentNameResponse = parse_json("```json\n{\"name\": \"scout\"}\n```").unwrap();
        assert_eq!(parsed.name, "scout");
    }

    #[test]
    fn parse_json_reports_parse_errors() {
        let result = parse_json::<AgentNameResponse>("not json at all");
        assert!(matches!(result, Err(AgentError::Parse(_))));
    }

    #[test]
    fn missing_optional_fields_default() {
        let parsed: WriteSqlResponse = parse_json(r#"{"query": "SELECT 1"}"#).unwrap();
        assert!(parsed.comments.is_empty());
    }
}
