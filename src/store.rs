//! Vector-searchable knowledge stores.
//!
//! Two record kinds live here: one schema snippet per table, and a single
//! agent identity addressed by the reserved nil key. Stores are keyed by
//! surrogate `Uuid`s; every upsert writes a full record, so concurrent
//! upserts to distinct keys never interfere.

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// One memorized table: its structure, sample rows, a human-readable
/// explanation, and the embedding of that explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSnippet {
    pub key: Uuid,
    pub table_name: String,
    pub definition: Option<String>,
    pub description: Option<String>,
    pub sample_data: Option<String>,
    pub embedding: Vec<f32>,
}

/// The derived agent identity. Stored once under [`IdentitySnippet::RESERVED_KEY`]
/// and never regenerated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySnippet {
    pub key: Uuid,
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub embedding: Vec<f32>,
}

impl IdentitySnippet {
    pub const RESERVED_KEY: Uuid = Uuid::nil();
}

pub trait VectorRecord: Clone + Send + Sync {
    fn key(&self) -> Uuid;
    fn embedding(&self) -> &[f32];
}

impl VectorRecord for TableSnippet {
    fn key(&self) -> Uuid {
        self.key
    }

    fn embedding(&self) -> &[f32] {
        &self.embedding
    }
}

impl VectorRecord for IdentitySnippet {
    fn key(&self) -> Uuid {
        self.key
    }

    fn embedding(&self) -> &[f32] {
        &self.embedding
    }
}

/// A search hit with its cosine similarity, higher is closer.
#[derive(Debug, Clone)]
pub struct Scored<R> {
    pub record: R,
    pub score: f32,
}

#[async_trait]
pub trait KnowledgeStore<R: VectorRecord>: Send + Sync {
    async fn ensure_collection(&self) -> Result<()>;

    async fn upsert(&self, record: R) -> Result<Uuid>;

    async fn get(&self, key: Uuid) -> Result<Option<R>>;

    /// Nearest neighbors by cosine similarity, descending.
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Scored<R>>>;

    async fn len(&self) -> Result<usize>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

fn rank_by_similarity<R: VectorRecord>(
    records: impl Iterator<Item = R>,
    embedding: &[f32],
    top_k: usize,
) -> Vec<Scored<R>> {
    let mut hits: Vec<Scored<R>> = records
        .map(|record| Scored {
            score: cosine_similarity(embedding, record.embedding()),
            record,
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(top_k);
    hits
}

/// Volatile store; the default for tests and throwaway sessions.
pub struct InMemoryStore<R> {
    records: RwLock<HashMap<Uuid, R>>,
}

impl<R> InMemoryStore<R> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl<R> Default for InMemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: VectorRecord + 'static> KnowledgeStore<R> for InMemoryStore<R> {
    async fn ensure_collection(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, record: R) -> Result<Uuid> {
        let key = record.key();
        let mut records = self
            .records
            .write()
            .map_err(|_| AgentError::Store("store lock poisoned".to_string()))?;
        records.insert(key, record);
        Ok(key)
    }

    async fn get(&self, key: Uuid) -> Result<Option<R>> {
        let records = self
            .records
            .read()
            .map_err(|_| AgentError::Store("store lock poisoned".to_string()))?;
        Ok(records.get(&key).cloned())
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Scored<R>>> {
        let records = self
            .records
            .read()
            .map_err(|_| AgentError::Store("store lock poisoned".to_string()))?;
        Ok(rank_by_similarity(records.values().cloned(), embedding, top_k))
    }

    async fn len(&self) -> Result<usize> {
        let records = self
            .records
            .read()
            .map_err(|_| AgentError::Store("store lock poisoned".to_string()))?;
        Ok(records.len())
    }
}

/// SQLite-backed store for durable memory between runs. One row per record;
/// the record body and its embedding are stored as JSON and scanned on
/// search, which is plenty for schema-sized collections.
pub struct SqliteStore<R> {
    connection: std::sync::Mutex<rusqlite::Connection>,
    collection: String,
    _record: std::marker::PhantomData<R>,
}

impl<R> SqliteStore<R> {
    pub fn open(path: impl AsRef<std::path::Path>, collection: &str) -> Result<Self> {
        if !collection.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(AgentError::Config(format!(
                "invalid collection name: {collection}"
            )));
        }

        let connection = rusqlite::Connection::open(path.as_ref())
            .map_err(|e| AgentError::Store(e.to_string()))?;

        Ok(Self {
            connection: std::sync::Mutex::new(connection),
            collection: collection.to_string(),
            _record: std::marker::PhantomData,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.connection
            .lock()
            .map_err(|_| AgentError::Store("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl<R> KnowledgeStore<R> for SqliteStore<R>
where
    R: VectorRecord + Serialize + DeserializeOwned + 'static,
{
    async fn ensure_collection(&self) -> Result<()> {
        let connection = self.lock()?;
        connection
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, record TEXT NOT NULL)",
                self.collection
            ))
            .map_err(|e| AgentError::Store(e.to_string()))
    }

    async fn upsert(&self, record: R) -> Result<Uuid> {
        let key = record.key();
        let body = serde_json::to_string(&record)?;

        let connection = self.lock()?;
        connection
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (key, record) VALUES (?1, ?2)",
                    self.collection
                ),
                rusqlite::params![key.to_string(), body],
            )
            .map_err(|e| AgentError::Store(e.to_string()))?;

        Ok(key)
    }

    async fn get(&self, key: Uuid) -> Result<Option<R>> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(&format!("SELECT record FROM {} WHERE key = ?1", self.collection))
            .map_err(|e| AgentError::Store(e.to_string()))?;

        let mut rows = statement
            .query(rusqlite::params![key.to_string()])
            .map_err(|e| AgentError::Store(e.to_string()))?;

        match rows.next().map_err(|e| AgentError::Store(e.to_string()))? {
            Some(row) => {
                let body: String = row.get(0).map_err(|e| AgentError::Store(e.to_string()))?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<Scored<R>>> {
        let records = self.load_all()?;
        Ok(rank_by_similarity(records.into_iter(), embedding, top_k))
    }

    async fn len(&self) -> Result<usize> {
        let connection = self.lock()?;
        connection
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.collection), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| count as usize)
            .map_err(|e| AgentError::Store(e.to_string()))
    }
}

impl<R: DeserializeOwned> SqliteStore<R> {
    fn load_all(&self) -> Result<Vec<R>> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare(&format!("SELECT record FROM {}", self.collection))
            .map_err(|e| AgentError::Store(e.to_string()))?;

        let mut records = Vec::new();
        let mut rows = statement.query([]).map_err(|e| AgentError::Store(e.to_string()))?;
        while let Some(row) = rows.next().map_err(|e| AgentError::Store(e.to_string()))? {
            let body: String = row.get(0).map_err(|e| AgentError::Store(e.to_string()))?;
            records.push(serde_json::from_str(&body)?);
        }

        Ok(records)
    }
}
