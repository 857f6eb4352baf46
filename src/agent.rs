//! The agent facade.
//!
//! Composes the pipeline: on creation, memorize the schema and derive (or
//! load) a persistent identity; on each question, rank the schema, generate
//! and execute SQL behind the guard chain, and compose a grounded
//! natural-language answer.

use crate::config::AgentOptions;
use crate::db::Database;
use crate::engine::{QueryEngine, QueryOutcome};
use crate::error::Result;
use crate::filters::{QueryGuard, RelevancyGuard, StatementGuard};
use crate::memorize::SchemaMemorizer;
use crate::model::{
    parse_json, AgentDescriptionResponse, AgentInstructionsResponse, AgentNameResponse,
    EmbeddingService, FinalAnswerResponse, ModelService,
};
use crate::prompts::{render, PromptName, PromptProvider};
use crate::rank::SchemaRanker;
use crate::render::render_table;
use crate::store::{IdentitySnippet, KnowledgeStore, TableSnippet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Every collaborator the agent depends on. All of them are injected, so
/// tests run against deterministic fakes and deployments pick providers.
pub struct AgentServices {
    pub model: Arc<dyn ModelService>,
    pub embeddings: Arc<dyn EmbeddingService>,
    pub database: Arc<dyn Database>,
    pub tables: Arc<dyn KnowledgeStore<TableSnippet>>,
    pub identity: Arc<dyn KnowledgeStore<IdentitySnippet>>,
    pub prompts: Arc<dyn PromptProvider>,
    pub options: AgentOptions,
}

pub struct Agent {
    identity: IdentitySnippet,
    ranker: SchemaRanker,
    engine: QueryEngine,
    model: Arc<dyn ModelService>,
    prompts: Arc<dyn PromptProvider>,
}

impl Agent {
    /// Create an agent, reusing a previously persisted identity and schema
    /// knowledge when present.
    pub async fn create(services: AgentServices, cancel: &CancellationToken) -> Result<Agent> {
        Self::create_with(services, None, false, cancel).await
    }

    /// Full-control variant: `preferred_name` overrides the generated agent
    /// name, `update` forces schema snippets to be regenerated. The identity
    /// itself is never regenerated once stored; clear the identity
    /// collection to start over.
    pub async fn create_with(
        services: AgentServices,
        preferred_name: Option<&str>,
        update: bool,
        cancel: &CancellationToken,
    ) -> Result<Agent> {
        services.tables.ensure_collection().await?;
        services.identity.ensure_collection().await?;

        let identity = match services.identity.get(IdentitySnippet::RESERVED_KEY).await? {
            Some(identity) => {
                info!(name = %identity.name, "loaded existing agent identity");
                identity
            }
            None => Self::derive_identity(&services, preferred_name, update, cancel).await?,
        };

        Ok(Self::assemble(services, identity))
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn description(&self) -> &str {
        &self.identity.description
    }

    pub fn instructions(&self) -> &str {
        &self.identity.instructions
    }

    /// Answer a question against the database. A guard veto returns its
    /// advisory message instead of data.
    pub async fn answer(&self, question: &str, cancel: &CancellationToken) -> Result<String> {
        let ranked = self.ranker.rank(question, cancel).await?;

        match self.engine.run(question, &ranked.context, cancel).await? {
            QueryOutcome::Filtered { message } => Ok(message),
            QueryOutcome::Executed { sql, table, .. } => {
                debug!(%sql, rows = table.row_count(), "query executed");

                let rendered = render_table(&table);
                let prompt = render(
                    self.prompts.read_prompt(PromptName::FinalAnswer),
                    &[
                        ("instructions", self.identity.instructions.as_str()),
                        ("data", rendered.as_str()),
                        ("question", question),
                    ],
                );

                let raw = self.model.complete(&prompt, cancel).await?;
                let response: FinalAnswerResponse = parse_json(&raw)?;
                debug!(thinking = %response.thinking, "final answer reasoning");

                Ok(response.answer)
            }
        }
    }

    async fn derive_identity(
        services: &AgentServices,
        preferred_name: Option<&str>,
        update: bool,
        cancel: &CancellationToken,
    ) -> Result<IdentitySnippet> {
        info!("no agent identity found, memorizing database schema");

        let memorizer = SchemaMemorizer::new(
            services.model.clone(),
            services.embeddings.clone(),
            services.database.clone(),
            services.tables.clone(),
            services.prompts.clone(),
            &services.options,
        );
        let report = memorizer.memorize(update, cancel).await?;

        let description_prompt = render(
            services.prompts.read_prompt(PromptName::AgentDescription),
            &[
                ("tableDefinitions", report.context.as_str()),
                ("expectedName", preferred_name.unwrap_or("")),
            ],
        );
        let raw = services.model.complete(&description_prompt, cancel).await?;
        let description = parse_json::<AgentDescriptionResponse>(&raw)?.description;
        debug!(%description, "agent description generated");

        let name = match preferred_name {
            Some(name) => name.to_string(),
            None => {
                let name_prompt = render(
                    services.prompts.read_prompt(PromptName::AgentName),
                    &[("agentDescription", description.as_str())],
                );
                let raw = services.model.complete(&name_prompt, cancel).await?;
                parse_json::<AgentNameResponse>(&raw)?.name
            }
        };
        debug!(%name, "agent name selected");

        let instructions_prompt = render(
            services.prompts.read_prompt(PromptName::AgentInstructions),
            &[("agentDescription", description.as_str())],
        );
        let raw = services.model.complete(&instructions_prompt, cancel).await?;
        let instructions = parse_json::<AgentInstructionsResponse>(&raw)?.instructions;

        let embedding = services.embeddings.embed(&description, cancel).await?;

        let identity = IdentitySnippet {
            key: IdentitySnippet::RESERVED_KEY,
            name,
            description,
            instructions,
            embedding,
        };

        services.identity.upsert(identity.clone()).await?;
        info!(name = %identity.name, "agent identity persisted");

        Ok(identity)
    }

    fn assemble(services: AgentServices, identity: IdentitySnippet) -> Agent {
        let mut guards: Vec<Arc<dyn QueryGuard>> = Vec::new();
        if services.options.enable_statement_guard {
            guards.push(Arc::new(StatementGuard));
        }
        if services.options.enable_relevancy_guard {
            guards.push(Arc::new(RelevancyGuard::new(
                services.model.clone(),
                services.embeddings.clone(),
                services.prompts.clone(),
                &services.options,
            )));
        }

        let ranker = SchemaRanker::new(
            services.embeddings.clone(),
            services.tables.clone(),
            &services.options,
        );
        let engine = QueryEngine::new(
            services.model.clone(),
            services.prompts.clone(),
            services.database.clone(),
            guards,
            &services.options,
        );

        Agent {
            identity,
            ranker,
            engine,
            model: services.model,
            prompts: services.prompts,
        }
    }
}
