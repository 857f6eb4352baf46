//! Schema relevance ranking.
//!
//! Two stages: embedding similarity as a cheap high-recall prefilter, then a
//! BM25 rerank of the candidates against the question text. The lexical pass
//! corrects for cases where a semantically-near but unrelated table outranks
//! the literally-named table the question refers to.

use crate::config::AgentOptions;
use crate::error::Result;
use crate::model::EmbeddingService;
use crate::store::{KnowledgeStore, TableSnippet};
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const MAX_CANDIDATES: usize = 100;

/// The snippets selected for a question and their concatenated context text.
#[derive(Debug, Clone)]
pub struct RankedSchema {
    pub snippets: Vec<TableSnippet>,
    pub context: String,
}

pub struct SchemaRanker {
    embeddings: Arc<dyn EmbeddingService>,
    store: Arc<dyn KnowledgeStore<TableSnippet>>,
    top_k: usize,
}

impl SchemaRanker {
    pub fn new(
        embeddings: Arc<dyn EmbeddingService>,
        store: Arc<dyn KnowledgeStore<TableSnippet>>,
        options: &AgentOptions,
    ) -> Self {
        Self {
            embeddings,
            store,
            top_k: options.top_k,
        }
    }

    /// Select the snippets most relevant to `question`.
    pub async fn rank(&self, question: &str, cancel: &CancellationToken) -> Result<RankedSchema> {
        let question_embedding = self.embeddings.embed(question, cancel).await?;

        let candidate_count = (self.top_k * 5).min(MAX_CANDIDATES);
        let candidates = self.store.search(&question_embedding, candidate_count).await?;

        debug!(candidates = candidates.len(), top_k = self.top_k, "reranking schema snippets");

        let scorer = Bm25::fit(
            candidates
                .iter()
                .map(|hit| hit.record.description.as_deref().unwrap_or_default()),
        );

        let snippets: Vec<TableSnippet> = candidates
            .into_iter()
            .enumerate()
            .map(|(vector_rank, hit)| {
                let text = hit.record.description.as_deref().unwrap_or_default();
                (scorer.score(question, text), vector_rank, hit.record)
            })
            // Vector rank breaks BM25 ties, so zero-overlap candidates keep
            // their similarity order.
            .sorted_by(|(score_a, rank_a, _), (score_b, rank_b, _)| {
                score_b
                    .partial_cmp(score_a)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(rank_a.cmp(rank_b))
            })
            .take(self.top_k)
            .map(|(_, _, record)| record)
            .collect();

        let context = snippets
            .iter()
            .map(|snippet| snippet.description.as_deref().unwrap_or_default())
            .join("\n\n---\n\n");

        Ok(RankedSchema { snippets, context })
    }
}

/// BM25 over a fixed candidate set, rebuilt per question. Small corpora make
/// the usual index machinery unnecessary.
struct Bm25 {
    k1: f32,
    b: f32,
    avgdl: f32,
    total_docs: usize,
    doc_freqs: HashMap<String, usize>,
}

impl Bm25 {
    fn fit<'a>(documents: impl Iterator<Item = &'a str>) -> Self {
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        let mut total_docs = 0usize;
        let mut total_len = 0usize;

        for document in documents {
            let terms = tokenize(document);
            total_docs += 1;
            total_len += terms.len();
            for term in terms.into_iter().unique() {
                *doc_freqs.entry(term).or_insert(0) += 1;
            }
        }

        Self {
            k1: 1.2,
            b: 0.75,
            avgdl: if total_docs == 0 {
                1.0
            } else {
                (total_len as f32 / total_docs as f32).max(1.0)
            },
            total_docs,
            doc_freqs,
        }
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.total_docs as f32;
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(&self, query: &str, document: &str) -> f32 {
        let doc_terms = tokenize(document);
        let doc_len = doc_terms.len() as f32;

        let mut term_freqs: HashMap<&str, f32> = HashMap::new();
        for term in &doc_terms {
            *term_freqs.entry(term.as_str()).or_insert(0.0) += 1.0;
        }

        tokenize(query)
            .into_iter()
            .unique()
            .map(|term| {
                let tf = term_freqs.get(term.as_str()).copied().unwrap_or(0.0);
                if tf == 0.0 {
                    return 0.0;
                }
                let norm = self.k1 * (1.0 - self.b + self.b * doc_len / self.avgdl);
                self.idf(&term) * tf * (self.k1 + 1.0) / (tf + norm)
            })
            .sum()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}
