//! The Repository trait: the single owner of all persisted state.
//!
//! Narrow, per-entity async methods in the style of this codebase's other
//! storage traits — no ORM, explicit `Result<_, RepositoryError>` on every
//! method, `Send + Sync` so it can be shared behind an `Arc<dyn Repository>`.

pub mod dual_write;
pub mod migration;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::domain::*;
use crate::error::RepositoryError;

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Filters accepted by `list_jobs`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub title_contains: Option<String>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    // Jobs
    async fn create_job(&self, job: NewJob) -> Result<Job>;
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;
    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>>;
    async fn update_job_jd_text(&self, id: Uuid, jd_text: &str) -> Result<Job>;

    // Candidates
    async fn upsert_candidate(&self, candidate: CandidateUpsert) -> Result<Candidate>;
    async fn get_candidate(&self, id: Uuid) -> Result<Option<Candidate>>;
    async fn get_candidate_by_provider_id(&self, provider_id: &str) -> Result<Option<Candidate>>;
    async fn list_candidates_for_job(&self, job_id: Uuid) -> Result<Vec<(Candidate, Match)>>;

    // Matches
    async fn upsert_match(&self, job_id: Uuid, candidate_id: Uuid, score: f64, status: &str, notes: VerificationNotes) -> Result<Match>;
    async fn get_match(&self, job_id: Uuid, candidate_id: Uuid) -> Result<Option<Match>>;
    async fn update_match_status(&self, job_id: Uuid, candidate_id: Uuid, status: &str) -> Result<Match>;
    async fn append_match_notes(&self, job_id: Uuid, candidate_id: Uuid, extra: serde_json::Value) -> Result<Match>;

    // Conversations
    async fn get_or_create_conversation(&self, job_id: Uuid, candidate_id: Uuid, channel: &str) -> Result<Conversation>;
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;
    async fn get_conversation_by_external_chat_id(&self, external_chat_id: &str) -> Result<Option<Conversation>>;
    async fn bind_external_chat_id(&self, conversation_id: Uuid, external_chat_id: &str) -> Result<Conversation>;
    async fn set_conversation_status(&self, conversation_id: Uuid, status: ConversationStatus) -> Result<Conversation>;
    async fn assign_conversation_account(&self, conversation_id: Uuid, account_id: Uuid) -> Result<Conversation>;

    // Messages
    async fn add_message(&self, conversation_id: Uuid, direction: Direction, content: &str, language: Option<&str>, meta: MessageMeta) -> Result<Message>;
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>>;

    // Pre-resume
    async fn insert_pre_resume_session(&self, session: PreResumeSession) -> Result<PreResumeSession>;
    async fn get_pre_resume_session(&self, id: &str) -> Result<Option<PreResumeSession>>;
    async fn get_pre_resume_session_by_conversation(&self, conversation_id: Uuid) -> Result<Option<PreResumeSession>>;
    async fn update_pre_resume_session(&self, session: PreResumeSession) -> Result<PreResumeSession>;
    async fn list_due_pre_resume_sessions(&self, now: DateTime<Utc>) -> Result<Vec<PreResumeSession>>;
    async fn append_pre_resume_event(&self, event: PreResumeEvent) -> Result<PreResumeEvent>;

    // Assessments
    async fn upsert_assessment(&self, assessment: AgentAssessment) -> Result<AgentAssessment>;
    async fn latest_assessments_for_candidate(&self, job_id: Uuid, candidate_id: Uuid) -> Result<Vec<AgentAssessment>>;

    // Outbound actions
    async fn enqueue_outbound_action(&self, action: OutboundAction) -> Result<OutboundAction>;
    async fn claim_pending_outbound_actions(&self, job_id: Option<Uuid>, limit: usize) -> Result<Vec<OutboundAction>>;
    async fn update_outbound_action(&self, action: OutboundAction) -> Result<OutboundAction>;

    // Sender accounts
    async fn list_connected_accounts(&self) -> Result<Vec<SenderAccount>>;
    async fn get_account(&self, id: Uuid) -> Result<Option<SenderAccount>>;
    async fn list_job_assigned_accounts(&self, job_id: Uuid) -> Result<Vec<SenderAccount>>;
    async fn get_day_counters(&self, account_id: Uuid, day: NaiveDate) -> Result<AccountCounters>;
    async fn get_week_counters(&self, account_id: Uuid, week_start: NaiveDate) -> Result<AccountCounters>;
    /// Atomically increments the given counters for (account, day) and
    /// (account, week); must be called within the same transactional scope
    /// as the conversation/account binding it accompanies.
    async fn increment_counters(&self, account_id: Uuid, day: NaiveDate, week_start: NaiveDate, new_threads_sent: u32, connect_sent: u32) -> Result<()>;

    // Operation log
    async fn log_operation(&self, entry: OperationLog) -> Result<OperationLog>;

    // Signals
    async fn upsert_signal(&self, signal: CandidateSignal) -> Result<Option<CandidateSignal>>;
    async fn list_signals_for_job(&self, job_id: Uuid) -> Result<Vec<CandidateSignal>>;

    // Step progress / idempotency
    async fn upsert_step_progress(&self, progress: JobStepProgress) -> Result<JobStepProgress>;
    async fn get_step_progress(&self, job_id: Uuid, step: &str) -> Result<Option<JobStepProgress>>;
    async fn get_idempotency_record(&self, route: &str, key: &str) -> Result<Option<IdempotencyRecord>>;
    async fn put_idempotency_record(&self, record: IdempotencyRecord) -> Result<IdempotencyRecord>;
}
