//! Execution guard chain.
//!
//! Guards sit between query generation and execution. Each guard sees the
//! full context and a continuation for the rest of the chain: it can
//! short-circuit with a user-facing message, or defer by invoking the
//! continuation and returning (possibly transforming) its verdict. The
//! terminal continuation always allows.

use crate::config::AgentOptions;
use crate::error::{AgentError, Result};
use crate::model::{parse_json, EmbeddingService, ImpliedQuestionsResponse, ModelService};
use crate::prompts::{render, PromptName, PromptProvider};
use crate::store::cosine_similarity;
use async_trait::async_trait;
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything a guard may inspect. Read-only; owned by the attempt that
/// generated the query.
pub struct QueryContext<'a> {
    pub question: &'a str,
    pub schema_context: &'a str,
    pub sql: &'a str,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub filtered: bool,
    pub message: String,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            filtered: false,
            message: String::new(),
        }
    }

    pub fn veto(message: impl Into<String>) -> Self {
        Self {
            filtered: true,
            message: message.into(),
        }
    }
}

/// The remainder of the chain after the current guard.
pub struct Next<'a> {
    guards: &'a [Arc<dyn QueryGuard>],
}

impl<'a> Next<'a> {
    pub fn run(
        self,
        ctx: &'a QueryContext<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<Verdict>> + Send + 'a>> {
        Box::pin(async move {
            match self.guards.split_first() {
                Some((guard, rest)) => guard.evaluate(ctx, Next { guards: rest }).await,
                None => Ok(Verdict::allow()),
            }
        })
    }
}

#[async_trait]
pub trait QueryGuard: Send + Sync {
    async fn evaluate<'a>(&self, ctx: &'a QueryContext<'a>, next: Next<'a>) -> Result<Verdict>;
}

/// Run the whole chain in registration order.
pub async fn run_chain<'a>(
    guards: &'a [Arc<dyn QueryGuard>],
    ctx: &'a QueryContext<'a>,
) -> Result<Verdict> {
    Next { guards }.run(ctx).await
}

/// Vetoes queries that drifted away from the question.
///
/// The model lists the natural-language questions the generated SQL actually
/// answers; if none of them is close enough to the original question in
/// embedding space, execution is skipped and the caller is asked to
/// rephrase.
pub struct RelevancyGuard {
    model: Arc<dyn ModelService>,
    embeddings: Arc<dyn EmbeddingService>,
    prompts: Arc<dyn PromptProvider>,
    threshold: f32,
}

impl RelevancyGuard {
    pub fn new(
        model: Arc<dyn ModelService>,
        embeddings: Arc<dyn EmbeddingService>,
        prompts: Arc<dyn PromptProvider>,
        options: &AgentOptions,
    ) -> Self {
        Self {
            model,
            embeddings,
            prompts,
            threshold: options.relevancy_threshold,
        }
    }

    async fn max_similarity(&self, ctx: &QueryContext<'_>) -> Result<f32> {
        let prompt = render(
            self.prompts.read_prompt(PromptName::ImpliedQuestions),
            &[("tablesDefinition", ctx.schema_context), ("query", ctx.sql)],
        );

        let raw = self.model.complete(&prompt, ctx.cancel).await?;
        let implied: ImpliedQuestionsResponse = parse_json(&raw)?;

        if implied.questions.is_empty() {
            return Ok(0.0);
        }

        let mut texts = Vec::with_capacity(implied.questions.len() + 1);
        texts.push(ctx.question.to_string());
        texts.extend(implied.questions);

        let embeddings = self.embeddings.embed_batch(&texts, ctx.cancel).await?;
        let (question, implied) = embeddings
            .split_first()
            .ok_or_else(|| AgentError::Embedding("empty embedding batch".to_string()))?;

        Ok(implied
            .iter()
            .map(|candidate| cosine_similarity(question, candidate))
            .fold(0.0, f32::max))
    }
}

#[async_trait]
impl QueryGuard for RelevancyGuard {
    async fn evaluate<'a>(&self, ctx: &'a QueryContext<'a>, next: Next<'a>) -> Result<Verdict> {
        let similarity = self.max_similarity(ctx).await?;

        if similarity < self.threshold {
            warn!(similarity, threshold = self.threshold, "query relevancy below threshold");
            return Ok(Verdict::veto(format!(
                "The generated query does not appear to answer your question \
                 (relevancy {similarity:.2} below {:.2}). Please rephrase the \
                 question, for example by naming the tables or columns you mean.",
                self.threshold
            )));
        }

        debug!(similarity, "query relevancy accepted");
        next.run(ctx).await
    }
}

/// Keeps the agent read-only: vetoes anything that parses as something other
/// than a single query statement.
pub struct StatementGuard;

#[async_trait]
impl QueryGuard for StatementGuard {
    async fn evaluate<'a>(&self, ctx: &'a QueryContext<'a>, next: Next<'a>) -> Result<Verdict> {
        // An unparsable query is left to the database, whose error feeds the
        // generation retry loop; a veto here would end the attempt instead.
        let Ok(statements) = Parser::parse_sql(&GenericDialect {}, ctx.sql) else {
            return next.run(ctx).await;
        };

        if statements.len() > 1 {
            return Ok(Verdict::veto(
                "The generated SQL contained more than one statement, so it was not executed.",
            ));
        }

        if let Some(statement) = statements.first() {
            if !matches!(statement, Statement::Query(_)) {
                warn!(sql = ctx.sql, "non-query statement rejected");
                return Ok(Verdict::veto(
                    "Only read-only queries are executed; the generated SQL would modify the database.",
                ));
            }
        }

        next.run(ctx).await
    }
}
