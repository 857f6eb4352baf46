//! Command-line entry point.
//!
//! Wires an OpenAI-compatible model and embedding service, a database
//! runner picked from the connection URL, and a volatile or SQLite-backed
//! knowledge store into an agent, then answers one question or runs an
//! interactive loop.

use clap::Parser;
use sqlscout::agent::{Agent, AgentServices};
use sqlscout::config::AgentOptions;
use sqlscout::db::{Database, PgDatabase, SqliteDatabase};
use sqlscout::model::{OpenAiEmbeddings, OpenAiModel};
use sqlscout::prompts::EmbeddedPrompts;
use sqlscout::store::{IdentitySnippet, InMemoryStore, KnowledgeStore, SqliteStore, TableSnippet};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "sqlscout", about = "Ask a relational database questions in natural language")]
struct Args {
    /// Database to query: a postgres:// URL or a path to a SQLite file.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Persist schema memory in this SQLite file instead of in memory.
    #[arg(long)]
    store: Option<std::path::PathBuf>,

    /// Regenerate schema snippets even when they are already memorized.
    #[arg(long)]
    update: bool,

    /// Use this agent name instead of generating one.
    #[arg(long)]
    name: Option<String>,

    /// The question to answer. Omit for an interactive session.
    question: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sqlscout=info")),
        )
        .init();

    let args = Args::parse();

    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
    let completion_model =
        std::env::var("SQLSCOUT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let embedding_model = std::env::var("SQLSCOUT_EMBEDDING_MODEL")
        .unwrap_or_else(|_| "text-embedding-3-small".to_string());

    let mut model = OpenAiModel::new(api_key.clone(), completion_model);
    let mut embeddings = OpenAiEmbeddings::new(api_key, embedding_model);
    if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
        model = model.with_base_url(base_url.clone());
        embeddings = embeddings.with_base_url(base_url);
    }

    let database: Arc<dyn Database> = if args.database_url.starts_with("postgres://")
        || args.database_url.starts_with("postgresql://")
    {
        Arc::new(PgDatabase::new(args.database_url.clone()))
    } else {
        let path = args.database_url.trim_start_matches("sqlite://");
        Arc::new(SqliteDatabase::new(path))
    };

    let (tables, identity): (
        Arc<dyn KnowledgeStore<TableSnippet>>,
        Arc<dyn KnowledgeStore<IdentitySnippet>>,
    ) = match &args.store {
        Some(path) => (
            Arc::new(SqliteStore::open(path, "tables")?),
            Arc::new(SqliteStore::open(path, "agent")?),
        ),
        None => (
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryStore::new()),
        ),
    };

    let services = AgentServices {
        model: Arc::new(model),
        embeddings: Arc::new(embeddings),
        database,
        tables,
        identity,
        prompts: Arc::new(EmbeddedPrompts),
        options: AgentOptions::default(),
    };

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let agent = Agent::create_with(services, args.name.as_deref(), args.update, &cancel).await?;
    eprintln!("agent ready: {}", agent.name());

    match args.question {
        Some(question) => {
            let answer = agent.answer(&question, &cancel).await?;
            println!("{answer}");
        }
        None => {
            let stdin = std::io::stdin();
            loop {
                print!("> ");
                std::io::stdout().flush()?;

                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break;
                }
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }

                match agent.answer(question, &cancel).await {
                    Ok(answer) => println!("{answer}"),
                    Err(error) => eprintln!("error: {error}"),
                }
            }
        }
    }

    Ok(())
}
