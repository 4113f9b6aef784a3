//! Dual-Write Proxy: fronts a primary repository with a best-effort or
//! strict mirror, satisfying the requirement that both reference schemas
//! observe the same writes without making the mirror a hard dependency of
//! every write path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::*;
use crate::error::RepositoryError;

use super::{JobFilter, Repository, Result};

/// Outcome of the most recent mirror write attempt, exposed for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct MirrorStatus {
    pub mirror_errors: u64,
    pub mirror_successes: u64,
    pub last_error: Option<String>,
}

/// Wraps a primary [`Repository`] with a mirror that every write is
/// replayed against. Reads always go to the primary.
///
/// In strict mode a mirror failure fails the whole write (surfaced as
/// [`RepositoryError::Query`] carrying the mirror's message); in best-effort
/// mode the mirror failure is recorded in [`MirrorStatus`] and the primary's
/// result still wins. Mode is runtime-toggleable so operators can tighten it
/// once a backfill has caught the mirror up.
pub struct DualWriteRepository {
    primary: Arc<dyn Repository>,
    mirror: Arc<dyn Repository>,
    strict: AtomicBool,
    status: RwLock<MirrorStatus>,
}

impl DualWriteRepository {
    pub fn new(primary: Arc<dyn Repository>, mirror: Arc<dyn Repository>, strict: bool) -> Self {
        Self { primary, mirror, strict: AtomicBool::new(strict), status: RwLock::new(MirrorStatus::default()) }
    }

    pub fn set_strict(&self, strict: bool) {
        self.strict.store(strict, Ordering::SeqCst);
    }

    pub fn is_strict(&self) -> bool {
        self.strict.load(Ordering::SeqCst)
    }

    pub fn primary(&self) -> Arc<dyn Repository> {
        self.primary.clone()
    }

    pub fn mirror(&self) -> Arc<dyn Repository> {
        self.mirror.clone()
    }

    pub async fn mirror_status(&self) -> MirrorStatus {
        self.status.read().await.clone()
    }

    /// Replays `op` against the mirror. Never forwards the primary's
    /// already-written struct to the mirror directly — `op` re-reads the row
    /// from the primary and re-derives the mirror call from that, so the
    /// mirror observes exactly what was durably committed.
    async fn mirror_write<F, Fut>(&self, op: F) -> Result<()>
    where
        F: FnOnce(Arc<dyn Repository>) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        match op(self.mirror.clone()).await {
            Ok(()) => {
                let mut status = self.status.write().await;
                status.mirror_successes += 1;
                status.last_error = None;
                Ok(())
            }
            Err(e) => {
                let mut status = self.status.write().await;
                status.mirror_errors += 1;
                status.last_error = Some(e.to_string());
                if self.is_strict() {
                    Err(RepositoryError::Query(format!("mirror write failed: {e}")))
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[async_trait]
impl Repository for DualWriteRepository {
    async fn create_job(&self, job: NewJob) -> Result<Job> {
        let created = self.primary.create_job(job).await?;
        let id = created.id;
        self.mirror_write(|mirror| async move {
            let primary_row = id;
            let job = self.primary.get_job(primary_row).await?.ok_or_else(|| RepositoryError::NotFound(format!("job {primary_row}")))?;
            mirror
                .create_job(NewJob {
                    id: Some(job.id),
                    title: job.title,
                    jd_text: job.jd_text,
                    location: job.location,
                    preferred_languages: job.preferred_languages,
                    seniority: job.seniority,
                    routing_mode: job.routing_mode,
                })
                .await
                .map(|_| ())
        })
        .await?;
        Ok(created)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        self.primary.get_job(id).await
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.primary.list_jobs(filter).await
    }

    async fn update_job_jd_text(&self, id: Uuid, jd_text: &str) -> Result<Job> {
        let updated = self.primary.update_job_jd_text(id, jd_text).await?;
        let jd_text = jd_text.to_string();
        self.mirror_write(|mirror| async move { mirror.update_job_jd_text(id, &jd_text).await.map(|_| ()) }).await?;
        Ok(updated)
    }

    async fn upsert_candidate(&self, candidate: CandidateUpsert) -> Result<Candidate> {
        let created = self.primary.upsert_candidate(candidate.clone()).await?;
        let mirrored = CandidateUpsert { id: Some(created.id), ..candidate };
        self.mirror_write(|mirror| async move { mirror.upsert_candidate(mirrored).await.map(|_| ()) }).await?;
        Ok(created)
    }

    async fn get_candidate(&self, id: Uuid) -> Result<Option<Candidate>> {
        self.primary.get_candidate(id).await
    }

    async fn get_candidate_by_provider_id(&self, provider_id: &str) -> Result<Option<Candidate>> {
        self.primary.get_candidate_by_provider_id(provider_id).await
    }

    async fn list_candidates_for_job(&self, job_id: Uuid) -> Result<Vec<(Candidate, Match)>> {
        self.primary.list_candidates_for_job(job_id).await
    }

    async fn upsert_match(&self, job_id: Uuid, candidate_id: Uuid, score: f64, status: &str, notes: VerificationNotes) -> Result<Match> {
        let updated = self.primary.upsert_match(job_id, candidate_id, score, status, notes.clone()).await?;
        let status = status.to_string();
        self.mirror_write(|mirror| async move { mirror.upsert_match(job_id, candidate_id, score, &status, notes).await.map(|_| ()) }).await?;
        Ok(updated)
    }

    async fn get_match(&self, job_id: Uuid, candidate_id: Uuid) -> Result<Option<Match>> {
        self.primary.get_match(job_id, candidate_id).await
    }

    async fn update_match_status(&self, job_id: Uuid, candidate_id: Uuid, status: &str) -> Result<Match> {
        let updated = self.primary.update_match_status(job_id, candidate_id, status).await?;
        let status = status.to_string();
        self.mirror_write(|mirror| async move { mirror.update_match_status(job_id, candidate_id, &status).await.map(|_| ()) }).await?;
        Ok(updated)
    }

    async fn append_match_notes(&self, job_id: Uuid, candidate_id: Uuid, extra: serde_json::Value) -> Result<Match> {
        let updated = self.primary.append_match_notes(job_id, candidate_id, extra.clone()).await?;
        self.mirror_write(|mirror| async move { mirror.append_match_notes(job_id, candidate_id, extra).await.map(|_| ()) }).await?;
        Ok(updated)
    }

    async fn get_or_create_conversation(&self, job_id: Uuid, candidate_id: Uuid, channel: &str) -> Result<Conversation> {
        let created = self.primary.get_or_create_conversation(job_id, candidate_id, channel).await?;
        let channel = channel.to_string();
        self.mirror_write(|mirror| async move { mirror.get_or_create_conversation(job_id, candidate_id, &channel).await.map(|_| ()) }).await?;
        Ok(created)
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.primary.get_conversation(id).await
    }

    async fn get_conversation_by_external_chat_id(&self, external_chat_id: &str) -> Result<Option<Conversation>> {
        self.primary.get_conversation_by_external_chat_id(external_chat_id).await
    }

    async fn bind_external_chat_id(&self, conversation_id: Uuid, external_chat_id: &str) -> Result<Conversation> {
        let updated = self.primary.bind_external_chat_id(conversation_id, external_chat_id).await?;
        let external_chat_id = external_chat_id.to_string();
        self.mirror_write(|mirror| async move { mirror.bind_external_chat_id(conversation_id, &external_chat_id).await.map(|_| ()) }).await?;
        Ok(updated)
    }

    async fn set_conversation_status(&self, conversation_id: Uuid, status: ConversationStatus) -> Result<Conversation> {
        let updated = self.primary.set_conversation_status(conversation_id, status).await?;
        self.mirror_write(|mirror| async move { mirror.set_conversation_status(conversation_id, status).await.map(|_| ()) }).await?;
        Ok(updated)
    }

    async fn assign_conversation_account(&self, conversation_id: Uuid, account_id: Uuid) -> Result<Conversation> {
        let updated = self.primary.assign_conversation_account(conversation_id, account_id).await?;
        self.mirror_write(|mirror| async move { mirror.assign_conversation_account(conversation_id, account_id).await.map(|_| ()) }).await?;
        Ok(updated)
    }

    async fn add_message(&self, conversation_id: Uuid, direction: Direction, content: &str, language: Option<&str>, meta: MessageMeta) -> Result<Message> {
        let created = self.primary.add_message(conversation_id, direction, content, language, meta.clone()).await?;
        let content = content.to_string();
        let language = language.map(|s| s.to_string());
        self.mirror_write(|mirror| async move { mirror.add_message(conversation_id, direction, &content, language.as_deref(), meta).await.map(|_| ()) }).await?;
        Ok(created)
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.primary.list_messages(conversation_id).await
    }

    async fn insert_pre_resume_session(&self, session: PreResumeSession) -> Result<PreResumeSession> {
        let created = self.primary.insert_pre_resume_session(session.clone()).await?;
        self.mirror_write(|mirror| async move { mirror.insert_pre_resume_session(session).await.map(|_| ()) }).await?;
        Ok(created)
    }

    async fn get_pre_resume_session(&self, id: &str) -> Result<Option<PreResumeSession>> {
        self.primary.get_pre_resume_session(id).await
    }

    async fn get_pre_resume_session_by_conversation(&self, conversation_id: Uuid) -> Result<Option<PreResumeSession>> {
        self.primary.get_pre_resume_session_by_conversation(conversation_id).await
    }

    async fn update_pre_resume_session(&self, session: PreResumeSession) -> Result<PreResumeSession> {
        let updated = self.primary.update_pre_resume_session(session.clone()).await?;
        self.mirror_write(|mirror| async move { mirror.update_pre_resume_session(session).await.map(|_| ()) }).await?;
        Ok(updated)
    }

    async fn list_due_pre_resume_sessions(&self, now: DateTime<Utc>) -> Result<Vec<PreResumeSession>> {
        self.primary.list_due_pre_resume_sessions(now).await
    }

    async fn append_pre_resume_event(&self, event: PreResumeEvent) -> Result<PreResumeEvent> {
        let created = self.primary.append_pre_resume_event(event.clone()).await?;
        self.mirror_write(|mirror| async move { mirror.append_pre_resume_event(event).await.map(|_| ()) }).await?;
        Ok(created)
    }

    async fn upsert_assessment(&self, assessment: AgentAssessment) -> Result<AgentAssessment> {
        let created = self.primary.upsert_assessment(assessment.clone()).await?;
        self.mirror_write(|mirror| async move { mirror.upsert_assessment(assessment).await.map(|_| ()) }).await?;
        Ok(created)
    }

    async fn latest_assessments_for_candidate(&self, job_id: Uuid, candidate_id: Uuid) -> Result<Vec<AgentAssessment>> {
        self.primary.latest_assessments_for_candidate(job_id, candidate_id).await
    }

    async fn enqueue_outbound_action(&self, action: OutboundAction) -> Result<OutboundAction> {
        let created = self.primary.enqueue_outbound_action(action.clone()).await?;
        self.mirror_write(|mirror| async move { mirror.enqueue_outbound_action(action).await.map(|_| ()) }).await?;
        Ok(created)
    }

    async fn claim_pending_outbound_actions(&self, job_id: Option<Uuid>, limit: usize) -> Result<Vec<OutboundAction>> {
        self.primary.claim_pending_outbound_actions(job_id, limit).await
    }

    async fn update_outbound_action(&self, action: OutboundAction) -> Result<OutboundAction> {
        let updated = self.primary.update_outbound_action(action.clone()).await?;
        self.mirror_write(|mirror| async move { mirror.update_outbound_action(action).await.map(|_| ()) }).await?;
        Ok(updated)
    }

    async fn list_connected_accounts(&self) -> Result<Vec<SenderAccount>> {
        self.primary.list_connected_accounts().await
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<SenderAccount>> {
        self.primary.get_account(id).await
    }

    async fn list_job_assigned_accounts(&self, job_id: Uuid) -> Result<Vec<SenderAccount>> {
        self.primary.list_job_assigned_accounts(job_id).await
    }

    async fn get_day_counters(&self, account_id: Uuid, day: NaiveDate) -> Result<AccountCounters> {
        self.primary.get_day_counters(account_id, day).await
    }

    async fn get_week_counters(&self, account_id: Uuid, week_start: NaiveDate) -> Result<AccountCounters> {
        self.primary.get_week_counters(account_id, week_start).await
    }

    async fn increment_counters(&self, account_id: Uuid, day: NaiveDate, week_start: NaiveDate, new_threads_sent: u32, connect_sent: u32) -> Result<()> {
        self.primary.increment_counters(account_id, day, week_start, new_threads_sent, connect_sent).await?;
        self.mirror_write(|mirror| async move { mirror.increment_counters(account_id, day, week_start, new_threads_sent, connect_sent).await }).await
    }

    async fn log_operation(&self, entry: OperationLog) -> Result<OperationLog> {
        let created = self.primary.log_operation(entry.clone()).await?;
        self.mirror_write(|mirror| async move { mirror.log_operation(entry).await.map(|_| ()) }).await?;
        Ok(created)
    }

    async fn upsert_signal(&self, signal: CandidateSignal) -> Result<Option<CandidateSignal>> {
        let created = self.primary.upsert_signal(signal.clone()).await?;
        self.mirror_write(|mirror| async move { mirror.upsert_signal(signal).await.map(|_| ()) }).await?;
        Ok(created)
    }

    async fn list_signals_for_job(&self, job_id: Uuid) -> Result<Vec<CandidateSignal>> {
        self.primary.list_signals_for_job(job_id).await
    }

    async fn upsert_step_progress(&self, progress: JobStepProgress) -> Result<JobStepProgress> {
        let created = self.primary.upsert_step_progress(progress.clone()).await?;
        self.mirror_write(|mirror| async move { mirror.upsert_step_progress(progress).await.map(|_| ()) }).await?;
        Ok(created)
    }

    async fn get_step_progress(&self, job_id: Uuid, step: &str) -> Result<Option<JobStepProgress>> {
        self.primary.get_step_progress(job_id, step).await
    }

    async fn get_idempotency_record(&self, route: &str, key: &str) -> Result<Option<IdempotencyRecord>> {
        self.primary.get_idempotency_record(route, key).await
    }

    async fn put_idempotency_record(&self, record: IdempotencyRecord) -> Result<IdempotencyRecord> {
        let created = self.primary.put_idempotency_record(record.clone()).await?;
        self.mirror_write(|mirror| async move { mirror.put_idempotency_record(record).await.map(|_| ()) }).await?;
        Ok(created)
    }
}
