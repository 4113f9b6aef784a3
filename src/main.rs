//! Composition root: loads configuration, wires a repository (SQLite, with
//! an optional Postgres mirror under dual-write), installs the default
//! no-op provider adapters, and serves the orchestrator HTTP surface.
//!
//! Real channel/LLM/interview adapters are expected to be supplied by a
//! deployment-specific binary that depends on this crate as a library and
//! substitutes its own [`tener_core::providers`] implementations; the
//! adapters below exist so this binary runs standalone for local use and
//! tests.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tener_core::config::Config;
use tener_core::error::ProviderError;
use tener_core::fsm::templates::TemplateSet;
use tener_core::orchestrator::auth::EnvAuthDecision;
use tener_core::orchestrator::OrchestratorState;
use tener_core::providers::{
    ConnectResult, ConnectionStatus, FetchedMessage, Invitation, InvitationPayload, InterviewProvider, InterviewResult, InterviewStatus,
    InterviewStatusReport, InterviewScores, LlmResponder, MessagingProvider, ReplyMode, SendResult, SourcedProfile,
};
use tener_core::repository::dual_write::DualWriteRepository;
use tener_core::repository::postgres::PostgresRepository;
use tener_core::repository::sqlite::SqliteRepository;
use tener_core::repository::Repository;
use tener_core::signals::rules::SignalRulesEngine;

/// Messaging provider that reaches no external service: sourcing returns no
/// candidates, sends report an explicit failure. Lets `run_source`/
/// `run_outreach` exercise their bookkeeping paths without a real channel.
struct UnconfiguredMessagingProvider;

#[async_trait]
impl MessagingProvider for UnconfiguredMessagingProvider {
    async fn search_profiles(&self, _query: &str, _limit: usize) -> Result<Vec<SourcedProfile>, ProviderError> {
        Ok(Vec::new())
    }

    async fn enrich_profile(&self, profile: SourcedProfile) -> Result<SourcedProfile, ProviderError> {
        Ok(profile)
    }

    async fn send_message(&self, _profile_id: &str, _text: &str) -> Result<SendResult, ProviderError> {
        Ok(SendResult { sent: false, chat_id: None, error: Some("no messaging provider configured".to_string()) })
    }

    async fn send_connection_request(&self, _profile_id: &str, _note: Option<&str>) -> Result<ConnectResult, ProviderError> {
        Ok(ConnectResult { sent: false, request_id: None, error: Some("no messaging provider configured".to_string()) })
    }

    async fn check_connection_status(&self, _profile_id: &str) -> Result<ConnectionStatus, ProviderError> {
        Ok(ConnectionStatus { connected: false })
    }

    async fn fetch_chat_messages(&self, _chat_id: &str, _limit: usize) -> Result<Vec<FetchedMessage>, ProviderError> {
        Ok(Vec::new())
    }
}

/// Interview provider stub: every invitation is rejected outright rather
/// than silently pretending to invite. A deployment that uses the
/// interview-evaluation agent must supply a real [`InterviewProvider`].
struct UnconfiguredInterviewProvider;

#[async_trait]
impl InterviewProvider for UnconfiguredInterviewProvider {
    async fn create_invitation(&self, _payload: InvitationPayload) -> Result<Invitation, ProviderError> {
        Err(ProviderError::RequestFailed("no interview provider configured".to_string()))
    }

    async fn get_interview_status(&self, _invitation_id: &str) -> Result<InterviewStatusReport, ProviderError> {
        Ok(InterviewStatusReport { status: InterviewStatus::Invited })
    }

    async fn get_interview_result(&self, _invitation_id: &str) -> Result<InterviewResult, ProviderError> {
        Ok(InterviewResult { status: InterviewStatus::Invited, scores: InterviewScores { technical: None, soft_skills: None, culture_fit: None }, raw: serde_json::json!({}) })
    }
}

/// LLM responder stub: always returns an empty string, which every caller
/// in this crate already treats as "responder absent" and falls back to a
/// deterministic rendering for.
struct UnconfiguredLlmResponder;

#[async_trait]
impl LlmResponder for UnconfiguredLlmResponder {
    async fn generate_candidate_reply(
        &self,
        _mode: ReplyMode,
        _instruction: &str,
        _job_context: &str,
        _candidate_context: &str,
        _inbound_text: &str,
        _history: &[String],
        _fallback: &str,
        _language: &str,
        _state: serde_json::Value,
    ) -> Result<String, ProviderError> {
        Ok(String::new())
    }
}

#[derive(Parser, Debug)]
#[command(name = "tener-core", about = "Outbound recruiting automation orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP orchestrator (default if no subcommand is given).
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },
    /// Apply pending Postgres migrations and exit.
    Migrate,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn build_repository(config: &Config) -> anyhow::Result<(Arc<dyn Repository>, Option<Arc<DualWriteRepository>>)> {
    let sqlite = Arc::new(SqliteRepository::open(&config.database.sqlite_path).context("opening sqlite repository")?);

    if config.database.url().is_none() {
        return Ok((sqlite, None));
    }

    let postgres = PostgresRepository::new(&config.database).await.context("connecting to postgres mirror")?;
    postgres.run_migrations().await.context("running postgres migrations")?;
    let dual_write = Arc::new(DualWriteRepository::new(sqlite, Arc::new(postgres), config.dual_write_strict));
    Ok((dual_write.clone() as Arc<dyn Repository>, Some(dual_write)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    init_tracing(config.log_format_json);

    match cli.command.unwrap_or(Command::Serve { bind: "0.0.0.0:8080".to_string() }) {
        Command::Migrate => {
            let url = config.database.url().context("DATABASE_URL must be set to run migrations")?;
            tracing::info!(url, "running postgres migrations");
            let postgres = PostgresRepository::new(&config.database).await.context("connecting to postgres")?;
            postgres.run_migrations().await.context("running migrations")?;
            tracing::info!("migrations complete");
            Ok(())
        }
        Command::Serve { bind } => {
            let (repo, dual_write) = build_repository(&config).await?;

            let rules_engine = Arc::new(match &config.signal_rules_path {
                Some(path) => SignalRulesEngine::load(path),
                None => SignalRulesEngine::builtin(),
            });
            let templates = Arc::new(TemplateSet::load(None));
            let auth: Arc<dyn tener_core::providers::AuthDecision> = Arc::new(EnvAuthDecision::new(config.auth.clone()));

            let config = Arc::new(config);
            let state = OrchestratorState::new(
                repo,
                dual_write,
                Arc::new(UnconfiguredMessagingProvider),
                Arc::new(UnconfiguredInterviewProvider),
                Some(Arc::new(UnconfiguredLlmResponder) as Arc<dyn LlmResponder>),
                auth,
                config,
                templates,
                rules_engine,
            );

            let app = tener_core::orchestrator::api::router(state).layer(tower_http::trace::TraceLayer::new_for_http());

            tracing::info!(%bind, "starting orchestrator");
            let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("binding {bind}"))?;
            axum::serve(listener, app).await.context("serving http")?;
            Ok(())
        }
    }
}
