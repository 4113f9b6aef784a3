//! Postgres-backed repository.
//!
//! Raw SQL via `tokio-postgres` behind a `deadpool-postgres` pool, manual row
//! mapping rather than an ORM — the pattern this codebase uses throughout its
//! storage layer.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::domain::*;
use crate::error::RepositoryError;

use super::{JobFilter, Repository, Result};

mod embedded {
    refinery::embed_migrations!("migrations");
}

pub struct PostgresRepository {
    pool: Pool,
}

fn map_pool_err(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Pool(e.to_string())
}

fn map_query_err(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn map_ser_err(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Serialization(e.to_string())
}

impl PostgresRepository {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url().ok_or_else(|| RepositoryError::Pool("DATABASE_URL not set".into()))?;
        let mut pool_config = PoolConfig::new();
        pool_config.url = Some(url.to_string());
        if let Some(pool_cfg) = pool_config.pool.as_mut() {
            pool_cfg.max_size = config.pool_size;
        }
        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(map_pool_err)?;
        {
            let client = pool.get().await.map_err(map_pool_err)?;
            client.query_one("SELECT 1", &[]).await.map_err(map_query_err)?;
        }
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let mut client = self.pool.get().await.map_err(map_pool_err)?;
        embedded::migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn job_from_row(row: &Row) -> Result<Job> {
        Ok(Job {
            id: row.get("id"),
            title: row.get("title"),
            jd_text: row.get("jd_text"),
            location: row.get("location"),
            preferred_languages: serde_json::from_value(row.get("preferred_languages")).map_err(map_ser_err)?,
            seniority: row.get("seniority"),
            routing_mode: match row.get::<_, String>("routing_mode").as_str() {
                "manual" => RoutingMode::Manual,
                _ => RoutingMode::Auto,
            },
            created_at: row.get("created_at"),
        })
    }

    fn candidate_from_row(row: &Row) -> Result<Candidate> {
        Ok(Candidate {
            id: row.get("id"),
            provider_id: row.get("provider_id"),
            full_name: row.get("full_name"),
            headline: row.get("headline"),
            location: row.get("location"),
            languages: serde_json::from_value(row.get("languages")).map_err(map_ser_err)?,
            skills: serde_json::from_value(row.get("skills")).map_err(map_ser_err)?,
            years_experience: row.get("years_experience"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn match_from_row(row: &Row) -> Result<Match> {
        Ok(Match {
            id: Uuid::new_v4(),
            job_id: row.get("job_id"),
            candidate_id: row.get("candidate_id"),
            score: row.get("score"),
            status: row.get("status"),
            verification_notes: serde_json::from_value(row.get("verification_notes")).map_err(map_ser_err)?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn conversation_from_row(row: &Row) -> Result<Conversation> {
        let status: String = row.get("status");
        Ok(Conversation {
            id: row.get("id"),
            job_id: row.get("job_id"),
            candidate_id: row.get("candidate_id"),
            channel: row.get("channel"),
            status: match status.as_str() {
                "waiting_connection" => ConversationStatus::WaitingConnection,
                "closed" => ConversationStatus::Closed,
                _ => ConversationStatus::Active,
            },
            external_chat_id: row.get("external_chat_id"),
            assigned_account_id: row.get("assigned_account_id"),
            last_message_at: row.get("last_message_at"),
            created_at: row.get("created_at"),
        })
    }

    fn message_from_row(row: &Row) -> Result<Message> {
        let direction: String = row.get("direction");
        Ok(Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            direction: if direction == "outbound" { Direction::Outbound } else { Direction::Inbound },
            language: row.get("language"),
            content: row.get("content"),
            meta: serde_json::from_value(row.get("meta")).map_err(map_ser_err)?,
            created_at: row.get("created_at"),
            seq: row.get("seq"),
        })
    }

    fn pre_resume_session_from_row(row: &Row) -> Result<PreResumeSession> {
        let state: serde_json::Value = row.get("state");
        serde_json::from_value(state).map_err(map_ser_err)
    }

    fn assessment_from_row(row: &Row) -> Result<AgentAssessment> {
        Ok(AgentAssessment {
            id: row.get("id"),
            job_id: row.get("job_id"),
            candidate_id: row.get("candidate_id"),
            agent_key: row.get("agent_key"),
            stage_key: row.get("stage_key"),
            score: row.get("score"),
            status: row.get("status"),
            reason: row.get("reason"),
            details: row.get("details"),
            created_at: row.get("created_at"),
        })
    }

    fn outbound_action_from_row(row: &Row) -> Result<OutboundAction> {
        let kind: String = row.get("kind");
        let status: String = row.get("status");
        Ok(OutboundAction {
            id: row.get("id"),
            job_id: row.get("job_id"),
            candidate_id: row.get("candidate_id"),
            conversation_id: row.get("conversation_id"),
            kind: if kind == "connect_request" { OutboundKind::ConnectRequest } else { OutboundKind::Message },
            payload: serde_json::from_value(row.get("payload")).map_err(map_ser_err)?,
            status: match status.as_str() {
                "pending_connection" => OutboundStatus::PendingConnection,
                "completed" => OutboundStatus::Completed,
                "deferred" => OutboundStatus::Deferred,
                "failed" => OutboundStatus::Failed,
                _ => OutboundStatus::Pending,
            },
            last_error: row.get("last_error"),
            assigned_account_id: row.get("assigned_account_id"),
            attempts: row.get::<_, i32>("attempts") as u32,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn account_from_row(row: &Row) -> SenderAccount {
        let status: String = row.get("status");
        SenderAccount {
            id: row.get("id"),
            provider_account_id: row.get("provider_account_id"),
            status: match status.as_str() {
                "connected" => AccountStatus::Connected,
                "error" => AccountStatus::Error,
                "disconnected" => AccountStatus::Disconnected,
                _ => AccountStatus::Pending,
            },
            connected_at: row.get("connected_at"),
            last_synced_at: row.get("last_synced_at"),
            provider_user_id: row.get("provider_user_id"),
            label: row.get("label"),
        }
    }

    fn signal_from_row(row: &Row) -> Result<CandidateSignal> {
        let source_type: String = row.get("source_type");
        Ok(CandidateSignal {
            id: row.get("id"),
            job_id: row.get("job_id"),
            candidate_id: row.get("candidate_id"),
            source_type: match source_type.as_str() {
                "pre_resume_event" => SourceType::PreResumeEvent,
                "operation_log" => SourceType::OperationLog,
                "match_snapshot" => SourceType::MatchSnapshot,
                _ => SourceType::Assessment,
            },
            source_id: row.get("source_id"),
            signal_type: row.get("signal_type"),
            category: row.get("category"),
            title: row.get("title"),
            detail: row.get("detail"),
            impact_score: row.get("impact_score"),
            confidence: row.get("confidence"),
            signal_meta: serde_json::from_value(row.get("signal_meta")).map_err(map_ser_err)?,
            observed_at: row.get("observed_at"),
        })
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn create_job(&self, job: NewJob) -> Result<Job> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let id = job.id.unwrap_or_else(Uuid::new_v4);
        let routing_mode = match job.routing_mode {
            RoutingMode::Auto => "auto",
            RoutingMode::Manual => "manual",
        };
        let row = client
            .query_one(
                "INSERT INTO jobs (id, title, jd_text, location, preferred_languages, seniority, routing_mode)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING *",
                &[
                    &id,
                    &job.title,
                    &job.jd_text,
                    &job.location,
                    &serde_json::to_value(&job.preferred_languages).map_err(map_ser_err)?,
                    &job.seniority,
                    &routing_mode,
                ],
            )
            .await
            .map_err(map_query_err)?;
        Self::job_from_row(&row)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client.query_opt("SELECT * FROM jobs WHERE id = $1", &[&id]).await.map_err(map_query_err)?;
        row.as_ref().map(Self::job_from_row).transpose()
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let rows = if let Some(needle) = filter.title_contains {
            client
                .query("SELECT * FROM jobs WHERE title ILIKE $1 ORDER BY created_at DESC", &[&format!("%{needle}%")])
                .await
        } else {
            client.query("SELECT * FROM jobs ORDER BY created_at DESC", &[]).await
        }
        .map_err(map_query_err)?;
        rows.iter().map(Self::job_from_row).collect()
    }

    async fn update_job_jd_text(&self, id: Uuid, jd_text: &str) -> Result<Job> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt("UPDATE jobs SET jd_text = $2 WHERE id = $1 RETURNING *", &[&id, &jd_text])
            .await
            .map_err(map_query_err)?
            .ok_or_else(|| RepositoryError::NotFound(format!("job {id}")))?;
        Self::job_from_row(&row)
    }

    async fn upsert_candidate(&self, candidate: CandidateUpsert) -> Result<Candidate> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let id = candidate.id.unwrap_or_else(Uuid::new_v4);
        let row = client
            .query_one(
                "INSERT INTO candidates (id, provider_id, full_name, headline, location, languages, skills, years_experience)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (provider_id) DO UPDATE SET
                    full_name = EXCLUDED.full_name,
                    headline = EXCLUDED.headline,
                    location = EXCLUDED.location,
                    languages = EXCLUDED.languages,
                    skills = EXCLUDED.skills,
                    years_experience = EXCLUDED.years_experience,
                    updated_at = now()
                 RETURNING *",
                &[
                    &id,
                    &candidate.provider_id,
                    &candidate.full_name,
                    &candidate.headline,
                    &candidate.location,
                    &serde_json::to_value(&candidate.languages).map_err(map_ser_err)?,
                    &serde_json::to_value(&candidate.skills).map_err(map_ser_err)?,
                    &candidate.years_experience,
                ],
            )
            .await
            .map_err(map_query_err)?;
        Self::candidate_from_row(&row)
    }

    async fn get_candidate(&self, id: Uuid) -> Result<Option<Candidate>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client.query_opt("SELECT * FROM candidates WHERE id = $1", &[&id]).await.map_err(map_query_err)?;
        row.as_ref().map(Self::candidate_from_row).transpose()
    }

    async fn get_candidate_by_provider_id(&self, provider_id: &str) -> Result<Option<Candidate>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt("SELECT * FROM candidates WHERE provider_id = $1", &[&provider_id])
            .await
            .map_err(map_query_err)?;
        row.as_ref().map(Self::candidate_from_row).transpose()
    }

    async fn list_candidates_for_job(&self, job_id: Uuid) -> Result<Vec<(Candidate, Match)>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let rows = client
            .query(
                "SELECT c.*, m.score AS m_score, m.status AS m_status, m.verification_notes AS m_notes,
                        m.created_at AS m_created_at, m.updated_at AS m_updated_at, m.job_id AS m_job_id, m.candidate_id AS m_candidate_id
                 FROM matches m JOIN candidates c ON c.id = m.candidate_id
                 WHERE m.job_id = $1",
                &[&job_id],
            )
            .await
            .map_err(map_query_err)?;
        rows.iter()
            .map(|row| {
                let candidate = Self::candidate_from_row(row)?;
                let m = Match {
                    id: Uuid::new_v4(),
                    job_id: row.get("m_job_id"),
                    candidate_id: row.get("m_candidate_id"),
                    score: row.get("m_score"),
                    status: row.get("m_status"),
                    verification_notes: serde_json::from_value(row.get("m_notes")).map_err(map_ser_err)?,
                    created_at: row.get("m_created_at"),
                    updated_at: row.get("m_updated_at"),
                };
                Ok((candidate, m))
            })
            .collect()
    }

    async fn upsert_match(&self, job_id: Uuid, candidate_id: Uuid, score: f64, status: &str, notes: VerificationNotes) -> Result<Match> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_one(
                "INSERT INTO matches (job_id, candidate_id, score, status, verification_notes)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (job_id, candidate_id) DO UPDATE SET
                    score = EXCLUDED.score,
                    status = EXCLUDED.status,
                    verification_notes = EXCLUDED.verification_notes,
                    updated_at = now()
                 RETURNING *",
                &[&job_id, &candidate_id, &score, &status, &serde_json::to_value(&notes).map_err(map_ser_err)?],
            )
            .await
            .map_err(map_query_err)?;
        Self::match_from_row(&row)
    }

    async fn get_match(&self, job_id: Uuid, candidate_id: Uuid) -> Result<Option<Match>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt("SELECT * FROM matches WHERE job_id = $1 AND candidate_id = $2", &[&job_id, &candidate_id])
            .await
            .map_err(map_query_err)?;
        row.as_ref().map(Self::match_from_row).transpose()
    }

    async fn update_match_status(&self, job_id: Uuid, candidate_id: Uuid, status: &str) -> Result<Match> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt(
                "UPDATE matches SET status = $3, updated_at = now() WHERE job_id = $1 AND candidate_id = $2 RETURNING *",
                &[&job_id, &candidate_id, &status],
            )
            .await
            .map_err(map_query_err)?
            .ok_or_else(|| RepositoryError::NotFound(format!("match {job_id}/{candidate_id}")))?;
        Self::match_from_row(&row)
    }

    async fn append_match_notes(&self, job_id: Uuid, candidate_id: Uuid, extra: serde_json::Value) -> Result<Match> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt(
                "UPDATE matches SET verification_notes = jsonb_set(verification_notes, '{extra}', verification_notes->'extra' || $3::jsonb, true), updated_at = now()
                 WHERE job_id = $1 AND candidate_id = $2 RETURNING *",
                &[&job_id, &candidate_id, &extra],
            )
            .await
            .map_err(map_query_err)?
            .ok_or_else(|| RepositoryError::NotFound(format!("match {job_id}/{candidate_id}")))?;
        Self::match_from_row(&row)
    }

    async fn get_or_create_conversation(&self, job_id: Uuid, candidate_id: Uuid, channel: &str) -> Result<Conversation> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        if let Some(row) = client
            .query_opt(
                "SELECT * FROM conversations WHERE job_id = $1 AND candidate_id = $2 AND channel = $3",
                &[&job_id, &candidate_id, &channel],
            )
            .await
            .map_err(map_query_err)?
        {
            return Self::conversation_from_row(&row);
        }
        let id = Uuid::new_v4();
        let row = client
            .query_one(
                "INSERT INTO conversations (id, job_id, candidate_id, channel) VALUES ($1, $2, $3, $4) RETURNING *",
                &[&id, &job_id, &candidate_id, &channel],
            )
            .await
            .map_err(map_query_err)?;
        Self::conversation_from_row(&row)
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client.query_opt("SELECT * FROM conversations WHERE id = $1", &[&id]).await.map_err(map_query_err)?;
        row.as_ref().map(Self::conversation_from_row).transpose()
    }

    async fn get_conversation_by_external_chat_id(&self, external_chat_id: &str) -> Result<Option<Conversation>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt("SELECT * FROM conversations WHERE external_chat_id = $1", &[&external_chat_id])
            .await
            .map_err(map_query_err)?;
        row.as_ref().map(Self::conversation_from_row).transpose()
    }

    async fn bind_external_chat_id(&self, conversation_id: Uuid, external_chat_id: &str) -> Result<Conversation> {
        let mut client = self.pool.get().await.map_err(map_pool_err)?;
        let tx = client.transaction().await.map_err(map_query_err)?;
        // §3 invariant: external_chat_id is unique; on collision the newer
        // conversation wins and the older one loses the id.
        tx.execute(
            "UPDATE conversations SET external_chat_id = NULL WHERE external_chat_id = $1 AND id <> $2",
            &[&external_chat_id, &conversation_id],
        )
        .await
        .map_err(map_query_err)?;
        let row = tx
            .query_opt(
                "UPDATE conversations SET external_chat_id = $2 WHERE id = $1 RETURNING *",
                &[&conversation_id, &external_chat_id],
            )
            .await
            .map_err(map_query_err)?
            .ok_or_else(|| RepositoryError::NotFound(format!("conversation {conversation_id}")))?;
        let result = Self::conversation_from_row(&row)?;
        tx.commit().await.map_err(map_query_err)?;
        Ok(result)
    }

    async fn set_conversation_status(&self, conversation_id: Uuid, status: ConversationStatus) -> Result<Conversation> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let status_str = match status {
            ConversationStatus::Active => "active",
            ConversationStatus::WaitingConnection => "waiting_connection",
            ConversationStatus::Closed => "closed",
        };
        let row = client
            .query_opt("UPDATE conversations SET status = $2 WHERE id = $1 RETURNING *", &[&conversation_id, &status_str])
            .await
            .map_err(map_query_err)?
            .ok_or_else(|| RepositoryError::NotFound(format!("conversation {conversation_id}")))?;
        Self::conversation_from_row(&row)
    }

    async fn assign_conversation_account(&self, conversation_id: Uuid, account_id: Uuid) -> Result<Conversation> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt(
                "UPDATE conversations SET assigned_account_id = $2 WHERE id = $1 RETURNING *",
                &[&conversation_id, &account_id],
            )
            .await
            .map_err(map_query_err)?
            .ok_or_else(|| RepositoryError::NotFound(format!("conversation {conversation_id}")))?;
        Self::conversation_from_row(&row)
    }

    async fn add_message(&self, conversation_id: Uuid, direction: Direction, content: &str, language: Option<&str>, meta: MessageMeta) -> Result<Message> {
        let mut client = self.pool.get().await.map_err(map_pool_err)?;
        let tx = client.transaction().await.map_err(map_query_err)?;
        let next_seq: i64 = tx
            .query_one("SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = $1", &[&conversation_id])
            .await
            .map_err(map_query_err)?
            .get(0);
        let id = Uuid::new_v4();
        let direction_str = match direction {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        };
        let row = tx
            .query_one(
                "INSERT INTO messages (id, conversation_id, direction, language, content, meta, seq)
                 VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
                &[&id, &conversation_id, &direction_str, &language, &content, &serde_json::to_value(&meta).map_err(map_ser_err)?, &next_seq],
            )
            .await
            .map_err(map_query_err)?;
        tx.execute("UPDATE conversations SET last_message_at = now() WHERE id = $1", &[&conversation_id])
            .await
            .map_err(map_query_err)?;
        let message = Self::message_from_row(&row)?;
        tx.commit().await.map_err(map_query_err)?;
        Ok(message)
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let rows = client
            .query("SELECT * FROM messages WHERE conversation_id = $1 ORDER BY seq ASC", &[&conversation_id])
            .await
            .map_err(map_query_err)?;
        rows.iter().map(Self::message_from_row).collect()
    }

    async fn insert_pre_resume_session(&self, session: PreResumeSession) -> Result<PreResumeSession> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let state = serde_json::to_value(&session).map_err(map_ser_err)?;
        let existing = client
            .query_opt("SELECT id FROM pre_resume_sessions WHERE id = $1", &[&session.id])
            .await
            .map_err(map_query_err)?;
        if existing.is_some() {
            return Err(RepositoryError::Conflict(format!("pre-resume session {} already exists", session.id)));
        }
        let row = client
            .query_one(
                "INSERT INTO pre_resume_sessions (id, conversation_id, job_id, candidate_id, state, status, next_followup_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
                &[
                    &session.id,
                    &session.conversation_id,
                    &session.job_id,
                    &session.candidate_id,
                    &state,
                    &session.status,
                    &session.next_followup_at,
                ],
            )
            .await
            .map_err(map_query_err)?;
        Self::pre_resume_session_from_row(&row)
    }

    async fn get_pre_resume_session(&self, id: &str) -> Result<Option<PreResumeSession>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client.query_opt("SELECT * FROM pre_resume_sessions WHERE id = $1", &[&id]).await.map_err(map_query_err)?;
        row.as_ref().map(Self::pre_resume_session_from_row).transpose()
    }

    async fn get_pre_resume_session_by_conversation(&self, conversation_id: Uuid) -> Result<Option<PreResumeSession>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt("SELECT * FROM pre_resume_sessions WHERE conversation_id = $1", &[&conversation_id])
            .await
            .map_err(map_query_err)?;
        row.as_ref().map(Self::pre_resume_session_from_row).transpose()
    }

    async fn update_pre_resume_session(&self, session: PreResumeSession) -> Result<PreResumeSession> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let state = serde_json::to_value(&session).map_err(map_ser_err)?;
        let row = client
            .query_opt(
                "UPDATE pre_resume_sessions SET state = $2, status = $3, next_followup_at = $4, updated_at = now()
                 WHERE id = $1 RETURNING *",
                &[&session.id, &state, &session.status, &session.next_followup_at],
            )
            .await
            .map_err(map_query_err)?
            .ok_or_else(|| RepositoryError::NotFound(format!("pre-resume session {}", session.id)))?;
        Self::pre_resume_session_from_row(&row)
    }

    async fn list_due_pre_resume_sessions(&self, now: DateTime<Utc>) -> Result<Vec<PreResumeSession>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let rows = client
            .query(
                "SELECT * FROM pre_resume_sessions WHERE next_followup_at IS NOT NULL AND next_followup_at <= $1
                 AND status NOT IN ('resume_received', 'not_interested', 'unreachable', 'stalled')",
                &[&now],
            )
            .await
            .map_err(map_query_err)?;
        rows.iter().map(Self::pre_resume_session_from_row).collect()
    }

    async fn append_pre_resume_event(&self, event: PreResumeEvent) -> Result<PreResumeEvent> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let event_type = serde_json::to_value(event.event_type).map_err(map_ser_err)?;
        let event_type = event_type.as_str().unwrap_or("inbound_processed").to_string();
        let row = client
            .query_one(
                "INSERT INTO pre_resume_events (id, session_id, event_type, intent, inbound_text, outbound_text, resulting_status)
                 VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
                &[&event.id, &event.session_id, &event_type, &event.intent, &event.inbound_text, &event.outbound_text, &event.resulting_status],
            )
            .await
            .map_err(map_query_err)?;
        Ok(PreResumeEvent {
            id: row.get("id"),
            session_id: row.get("session_id"),
            event_type: event.event_type,
            intent: row.get("intent"),
            inbound_text: row.get("inbound_text"),
            outbound_text: row.get("outbound_text"),
            resulting_status: row.get("resulting_status"),
            created_at: row.get("created_at"),
        })
    }

    async fn upsert_assessment(&self, assessment: AgentAssessment) -> Result<AgentAssessment> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let id = Uuid::new_v4();
        let row = client
            .query_one(
                "INSERT INTO agent_assessments (id, job_id, candidate_id, agent_key, stage_key, score, status, reason, details)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (job_id, candidate_id, agent_key, stage_key) DO UPDATE SET
                    score = EXCLUDED.score, status = EXCLUDED.status, reason = EXCLUDED.reason, details = EXCLUDED.details, created_at = now()
                 RETURNING *",
                &[
                    &id,
                    &assessment.job_id,
                    &assessment.candidate_id,
                    &assessment.agent_key,
                    &assessment.stage_key,
                    &assessment.score,
                    &assessment.status,
                    &assessment.reason,
                    &assessment.details,
                ],
            )
            .await
            .map_err(map_query_err)?;
        Self::assessment_from_row(&row)
    }

    async fn latest_assessments_for_candidate(&self, job_id: Uuid, candidate_id: Uuid) -> Result<Vec<AgentAssessment>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let rows = client
            .query(
                "SELECT * FROM agent_assessments WHERE job_id = $1 AND candidate_id = $2",
                &[&job_id, &candidate_id],
            )
            .await
            .map_err(map_query_err)?;
        rows.iter().map(Self::assessment_from_row).collect()
    }

    async fn enqueue_outbound_action(&self, action: OutboundAction) -> Result<OutboundAction> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let kind = match action.kind {
            OutboundKind::Message => "message",
            OutboundKind::ConnectRequest => "connect_request",
        };
        let row = client
            .query_one(
                "INSERT INTO outbound_actions (id, job_id, candidate_id, conversation_id, kind, payload)
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
                &[
                    &action.id,
                    &action.job_id,
                    &action.candidate_id,
                    &action.conversation_id,
                    &kind,
                    &serde_json::to_value(&action.payload).map_err(map_ser_err)?,
                ],
            )
            .await
            .map_err(map_query_err)?;
        Self::outbound_action_from_row(&row)
    }

    async fn claim_pending_outbound_actions(&self, job_id: Option<Uuid>, limit: usize) -> Result<Vec<OutboundAction>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let limit = limit as i64;
        let rows = if let Some(job_id) = job_id {
            client
                .query(
                    "SELECT * FROM outbound_actions WHERE status = 'pending' AND job_id = $1 ORDER BY created_at ASC LIMIT $2 FOR UPDATE SKIP LOCKED",
                    &[&job_id, &limit],
                )
                .await
        } else {
            client
                .query(
                    "SELECT * FROM outbound_actions WHERE status = 'pending' ORDER BY created_at ASC LIMIT $1 FOR UPDATE SKIP LOCKED",
                    &[&limit],
                )
                .await
        }
        .map_err(map_query_err)?;
        rows.iter().map(Self::outbound_action_from_row).collect()
    }

    async fn update_outbound_action(&self, action: OutboundAction) -> Result<OutboundAction> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let status = match action.status {
            OutboundStatus::Pending => "pending",
            OutboundStatus::PendingConnection => "pending_connection",
            OutboundStatus::Completed => "completed",
            OutboundStatus::Deferred => "deferred",
            OutboundStatus::Failed => "failed",
        };
        let row = client
            .query_opt(
                "UPDATE outbound_actions SET status = $2, last_error = $3, assigned_account_id = $4, attempts = $5, updated_at = now()
                 WHERE id = $1 RETURNING *",
                &[&action.id, &status, &action.last_error, &action.assigned_account_id, &(action.attempts as i32)],
            )
            .await
            .map_err(map_query_err)?
            .ok_or_else(|| RepositoryError::NotFound(format!("outbound action {}", action.id)))?;
        Self::outbound_action_from_row(&row)
    }

    async fn list_connected_accounts(&self) -> Result<Vec<SenderAccount>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let rows = client
            .query("SELECT * FROM sender_accounts WHERE status = 'connected'", &[])
            .await
            .map_err(map_query_err)?;
        Ok(rows.iter().map(Self::account_from_row).collect())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<SenderAccount>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client.query_opt("SELECT * FROM sender_accounts WHERE id = $1", &[&id]).await.map_err(map_query_err)?;
        Ok(row.as_ref().map(Self::account_from_row))
    }

    async fn list_job_assigned_accounts(&self, job_id: Uuid) -> Result<Vec<SenderAccount>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let rows = client
            .query(
                "SELECT sa.* FROM sender_accounts sa JOIN job_account_assignments j ON j.account_id = sa.id
                 WHERE j.job_id = $1 AND sa.status = 'connected'",
                &[&job_id],
            )
            .await
            .map_err(map_query_err)?;
        Ok(rows.iter().map(Self::account_from_row).collect())
    }

    async fn get_day_counters(&self, account_id: Uuid, day: NaiveDate) -> Result<AccountCounters> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt("SELECT * FROM account_day_counters WHERE account_id = $1 AND day = $2", &[&account_id, &day])
            .await
            .map_err(map_query_err)?;
        Ok(row
            .map(|r| AccountCounters {
                new_threads_sent: r.get::<_, i32>("new_threads_sent") as u32,
                connect_sent: r.get::<_, i32>("connect_sent") as u32,
            })
            .unwrap_or_default())
    }

    async fn get_week_counters(&self, account_id: Uuid, week_start: NaiveDate) -> Result<AccountCounters> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt("SELECT * FROM account_week_counters WHERE account_id = $1 AND week_start = $2", &[&account_id, &week_start])
            .await
            .map_err(map_query_err)?;
        Ok(row
            .map(|r| AccountCounters {
                new_threads_sent: r.get::<_, i32>("new_threads_sent") as u32,
                connect_sent: r.get::<_, i32>("connect_sent") as u32,
            })
            .unwrap_or_default())
    }

    async fn increment_counters(&self, account_id: Uuid, day: NaiveDate, week_start: NaiveDate, new_threads_sent: u32, connect_sent: u32) -> Result<()> {
        let mut client = self.pool.get().await.map_err(map_pool_err)?;
        let tx = client.transaction().await.map_err(map_query_err)?;
        tx.execute(
            "INSERT INTO account_day_counters (account_id, day, new_threads_sent, connect_sent) VALUES ($1, $2, $3, $4)
             ON CONFLICT (account_id, day) DO UPDATE SET
                new_threads_sent = account_day_counters.new_threads_sent + EXCLUDED.new_threads_sent,
                connect_sent = account_day_counters.connect_sent + EXCLUDED.connect_sent",
            &[&account_id, &day, &(new_threads_sent as i32), &(connect_sent as i32)],
        )
        .await
        .map_err(map_query_err)?;
        tx.execute(
            "INSERT INTO account_week_counters (account_id, week_start, new_threads_sent, connect_sent) VALUES ($1, $2, $3, $4)
             ON CONFLICT (account_id, week_start) DO UPDATE SET
                new_threads_sent = account_week_counters.new_threads_sent + EXCLUDED.new_threads_sent,
                connect_sent = account_week_counters.connect_sent + EXCLUDED.connect_sent",
            &[&account_id, &week_start, &(new_threads_sent as i32), &(connect_sent as i32)],
        )
        .await
        .map_err(map_query_err)?;
        tx.commit().await.map_err(map_query_err)?;
        Ok(())
    }

    async fn log_operation(&self, entry: OperationLog) -> Result<OperationLog> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_one(
                "INSERT INTO operation_logs (id, operation, status, entity_type, entity_id, details)
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
                &[&entry.id, &entry.operation, &entry.status, &entry.entity_type, &entry.entity_id, &entry.details],
            )
            .await
            .map_err(map_query_err)?;
        Ok(OperationLog {
            id: row.get("id"),
            operation: row.get("operation"),
            status: row.get("status"),
            entity_type: row.get("entity_type"),
            entity_id: row.get("entity_id"),
            details: row.get("details"),
            created_at: row.get("created_at"),
        })
    }

    async fn upsert_signal(&self, signal: CandidateSignal) -> Result<Option<CandidateSignal>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt(
                "INSERT INTO candidate_signals (id, job_id, candidate_id, source_type, source_id, signal_type, category, title, detail, impact_score, confidence, signal_meta, observed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (job_id, candidate_id, source_type, source_id) DO UPDATE SET
                    signal_type = EXCLUDED.signal_type, category = EXCLUDED.category, title = EXCLUDED.title, detail = EXCLUDED.detail,
                    impact_score = EXCLUDED.impact_score, confidence = EXCLUDED.confidence, signal_meta = EXCLUDED.signal_meta, observed_at = EXCLUDED.observed_at
                 RETURNING *",
                &[
                    &signal.id,
                    &signal.job_id,
                    &signal.candidate_id,
                    &signal.source_type.as_str(),
                    &signal.source_id,
                    &signal.signal_type,
                    &signal.category,
                    &signal.title,
                    &signal.detail,
                    &signal.impact_score,
                    &signal.confidence,
                    &serde_json::to_value(&signal.signal_meta).map_err(map_ser_err)?,
                    &signal.observed_at,
                ],
            )
            .await
            .map_err(map_query_err)?;
        row.as_ref().map(Self::signal_from_row).transpose()
    }

    async fn list_signals_for_job(&self, job_id: Uuid) -> Result<Vec<CandidateSignal>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let rows = client
            .query("SELECT * FROM candidate_signals WHERE job_id = $1 ORDER BY observed_at DESC", &[&job_id])
            .await
            .map_err(map_query_err)?;
        rows.iter().map(Self::signal_from_row).collect()
    }

    async fn upsert_step_progress(&self, progress: JobStepProgress) -> Result<JobStepProgress> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_one(
                "INSERT INTO job_step_progress (job_id, step, status, output) VALUES ($1, $2, $3, $4)
                 ON CONFLICT (job_id, step) DO UPDATE SET status = EXCLUDED.status, output = EXCLUDED.output, updated_at = now()
                 RETURNING *",
                &[&progress.job_id, &progress.step, &progress.status, &progress.output],
            )
            .await
            .map_err(map_query_err)?;
        Ok(JobStepProgress {
            job_id: row.get("job_id"),
            step: row.get("step"),
            status: row.get("status"),
            output: row.get("output"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn get_step_progress(&self, job_id: Uuid, step: &str) -> Result<Option<JobStepProgress>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt("SELECT * FROM job_step_progress WHERE job_id = $1 AND step = $2", &[&job_id, &step])
            .await
            .map_err(map_query_err)?;
        Ok(row.map(|row| JobStepProgress {
            job_id: row.get("job_id"),
            step: row.get("step"),
            status: row.get("status"),
            output: row.get("output"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn get_idempotency_record(&self, route: &str, key: &str) -> Result<Option<IdempotencyRecord>> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_opt("SELECT * FROM idempotency_records WHERE route = $1 AND key = $2", &[&route, &key])
            .await
            .map_err(map_query_err)?;
        Ok(row.map(|row| IdempotencyRecord {
            route: row.get("route"),
            key: row.get("key"),
            payload_hash: row.get("payload_hash"),
            status_code: row.get::<_, i32>("status_code") as u16,
            response: row.get("response"),
            created_at: row.get("created_at"),
        }))
    }

    async fn put_idempotency_record(&self, record: IdempotencyRecord) -> Result<IdempotencyRecord> {
        let client = self.pool.get().await.map_err(map_pool_err)?;
        let row = client
            .query_one(
                "INSERT INTO idempotency_records (route, key, payload_hash, status_code, response) VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (route, key) DO NOTHING RETURNING *",
                &[&record.route, &record.key, &record.payload_hash, &(record.status_code as i32), &record.response],
            )
            .await
            .map_err(map_query_err)?;
        Ok(IdempotencyRecord {
            route: row.get("route"),
            key: row.get("key"),
            payload_hash: row.get("payload_hash"),
            status_code: row.get::<_, i32>("status_code") as u16,
            response: row.get("response"),
            created_at: row.get("created_at"),
        })
    }
}
