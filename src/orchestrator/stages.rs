//! The eight workflow stages, each idempotent via a [`JobStepProgress`]
//! upsert keyed by (job_id, step). Stage failures raise with the
//! originating error and are logged as an `operation_logs` entry with
//! status `error`; per-item failures inside a batch stage (enrich, verify)
//! never abort the batch.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{
    CandidateUpsert, Direction, JobStepProgress, Message, MessageMeta, OperationLog, OutboundAction, OutboundKind, OutboundPayload, OutboundStatus, VerificationNotes,
};
use crate::error::CoreError;
use crate::fsm;
use crate::fsm::templates::TemplateSet;
use crate::matching::{self, CandidateProfile, JobRequirements, MatchVerdict};
use crate::providers::{MessagingProvider, SourcedProfile};
use crate::repository::Repository;

pub struct StageContext {
    pub repo: Arc<dyn Repository>,
    pub messaging: Arc<dyn MessagingProvider>,
    pub config: Arc<Config>,
    pub templates: Arc<TemplateSet>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageSummary {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

async fn record_step(ctx: &StageContext, job_id: Uuid, step: &str, summary: &StageSummary) -> Result<(), CoreError> {
    ctx.repo
        .upsert_step_progress(JobStepProgress {
            job_id,
            step: step.to_string(),
            status: if summary.failed == 0 { "ok".to_string() } else { "partial".to_string() },
            output: serde_json::to_value(summary).unwrap_or(json!({})),
            updated_at: Utc::now(),
        })
        .await
        .map_err(CoreError::from)?;
    Ok(())
}

async fn log_error(ctx: &StageContext, step: &str, entity_id: &str, message: &str) {
    let _ = ctx.repo.log_operation(OperationLog::new(format!("orchestrator.{step}"), "error", "job_step", entity_id, json!({"message": message}))).await;
}

/// `source`: pulls candidate profiles from the messaging provider and
/// dedupes by identity. Raises only if every query failed and nothing was
/// collected — a partial haul from a flaky provider still proceeds.
pub async fn run_source(ctx: &StageContext, job_id: Uuid, query: &str, limit: usize) -> Result<StageSummary, CoreError> {
    let mut summary = StageSummary::default();
    let profiles = match ctx.messaging.search_profiles(query, limit).await {
        Ok(profiles) => profiles,
        Err(err) => {
            summary.failed = 1;
            summary.errors.push(err.to_string());
            log_error(ctx, "source", job_id.to_string().as_str(), &err.to_string()).await;
            record_step(ctx, job_id, "source", &summary).await?;
            return Err(CoreError::Internal(format!("source stage: every query failed: {err}")));
        }
    };

    let mut seen = std::collections::HashSet::new();
    for profile in profiles {
        summary.processed += 1;
        if !seen.insert(profile.provider_id.clone()) {
            continue;
        }
        match ctx
            .repo
            .upsert_candidate(CandidateUpsert {
                id: None,
                provider_id: profile.provider_id,
                full_name: profile.full_name,
                headline: profile.headline,
                location: profile.location,
                languages: profile.languages,
                skills: profile.skills,
                years_experience: profile.years_experience,
            })
            .await
        {
            Ok(_) => summary.succeeded += 1,
            Err(err) => {
                summary.failed += 1;
                summary.errors.push(err.to_string());
            }
        }
    }

    record_step(ctx, job_id, "source", &summary).await?;
    Ok(summary)
}

/// `enrich`: re-fetches profile detail per candidate. A failure retains the
/// original record and is counted, never aborting the batch.
pub async fn run_enrich(ctx: &StageContext, job_id: Uuid) -> Result<StageSummary, CoreError> {
    let mut summary = StageSummary::default();
    let pairs = ctx.repo.list_candidates_for_job(job_id).await.map_err(CoreError::from)?;

    for (candidate, _match) in pairs {
        summary.processed += 1;
        let sourced = SourcedProfile {
            provider_id: candidate.provider_id.clone(),
            full_name: candidate.full_name.clone(),
            headline: candidate.headline.clone(),
            location: candidate.location.clone(),
            languages: candidate.languages.clone(),
            skills: candidate.skills.clone(),
            years_experience: candidate.years_experience,
        };
        match ctx.messaging.enrich_profile(sourced).await {
            Ok(enriched) => {
                let result = ctx
                    .repo
                    .upsert_candidate(CandidateUpsert {
                        id: Some(candidate.id),
                        provider_id: enriched.provider_id,
                        full_name: enriched.full_name,
                        headline: enriched.headline,
                        location: enriched.location,
                        languages: enriched.languages,
                        skills: enriched.skills,
                        years_experience: enriched.years_experience,
                    })
                    .await;
                match result {
                    Ok(_) => summary.succeeded += 1,
                    Err(err) => {
                        summary.failed += 1;
                        summary.errors.push(err.to_string());
                    }
                }
            }
            Err(err) => {
                // Original record is left untouched; the provider failure is
                // counted but doesn't remove what we already have.
                summary.failed += 1;
                summary.errors.push(err.to_string());
            }
        }
    }

    record_step(ctx, job_id, "enrich", &summary).await?;
    Ok(summary)
}

/// `verify`: runs the matching engine per candidate and persists the
/// verdict. Per-candidate failures are captured and skipped.
pub async fn run_verify(ctx: &StageContext, job_id: Uuid) -> Result<StageSummary, CoreError> {
    let mut summary = StageSummary::default();
    let job = ctx.repo.get_job(job_id).await.map_err(CoreError::from)?.ok_or_else(|| CoreError::NotFound(format!("job {job_id} not found")))?;
    let pairs = ctx.repo.list_candidates_for_job(job_id).await.map_err(CoreError::from)?;

    let job_requirements = JobRequirements {
        jd_text: job.jd_text.clone(),
        location: job.location.clone(),
        preferred_languages: job.preferred_languages.clone(),
        seniority: job.seniority.clone(),
    };

    for (candidate, _match) in pairs {
        summary.processed += 1;
        let profile = CandidateProfile {
            full_name: candidate.full_name.clone(),
            headline: candidate.headline.clone(),
            location: candidate.location.clone(),
            languages: candidate.languages.clone(),
            skills: candidate.skills.clone(),
            years_experience: candidate.years_experience,
        };

        match matching::verify(&job_requirements, &profile, &ctx.config.matching) {
            Ok(result) => {
                let status = match result.verdict {
                    MatchVerdict::Verified => "verified",
                    MatchVerdict::Rejected => "rejected",
                };
                match ctx.repo.upsert_match(job_id, candidate.id, result.score, status, result.notes).await {
                    Ok(_) => summary.succeeded += 1,
                    Err(err) => {
                        summary.failed += 1;
                        summary.errors.push(err.to_string());
                    }
                }
            }
            Err(err) => {
                summary.failed += 1;
                summary.errors.push(err.to_string());
            }
        }
    }

    record_step(ctx, job_id, "verify", &summary).await?;
    Ok(summary)
}

/// `add`: re-asserts the candidate/match pair exists for a job — a no-op
/// upsert when `verify` already ran, useful as a standalone idempotent
/// checkpoint for callers that invoke stages out of order.
pub async fn run_add(ctx: &StageContext, job_id: Uuid, candidate_id: Uuid) -> Result<StageSummary, CoreError> {
    let mut summary = StageSummary { processed: 1, ..Default::default() };
    let existing = ctx.repo.get_match(job_id, candidate_id).await.map_err(CoreError::from)?;
    match existing {
        Some(m) => {
            ctx.repo.upsert_match(job_id, candidate_id, m.score, &m.status, m.verification_notes).await.map_err(CoreError::from)?;
            summary.succeeded = 1;
        }
        None => {
            summary.failed = 1;
            summary.errors.push("no prior match to add; run verify first".to_string());
        }
    }
    record_step(ctx, job_id, "add", &summary).await?;
    Ok(summary)
}

fn verified_notes_explanation(notes: &VerificationNotes) -> String {
    notes.explanation.clone().unwrap_or_default()
}

/// `pre_resume start`: resolves or creates the conversation for a
/// (job, candidate) pair, starts the pre-resume session through the FSM
/// (or returns the existing one idempotently), and enqueues the rendered
/// intro as an [`OutboundAction`] rather than sending inline — dispatch is
/// the dispatcher's job.
pub async fn run_pre_resume_start(ctx: &StageContext, job_id: Uuid, candidate_id: Uuid) -> Result<crate::domain::PreResumeSession, CoreError> {
    let job = ctx.repo.get_job(job_id).await.map_err(CoreError::from)?.ok_or_else(|| CoreError::NotFound(format!("job {job_id} not found")))?;
    let candidate = ctx.repo.get_candidate(candidate_id).await.map_err(CoreError::from)?.ok_or_else(|| CoreError::NotFound(format!("candidate {candidate_id} not found")))?;
    let m = ctx.repo.get_match(job_id, candidate_id).await.map_err(CoreError::from)?.ok_or_else(|| CoreError::NotFound(format!("no match for job {job_id} candidate {candidate_id}")))?;

    let conversation = ctx.repo.get_or_create_conversation(job_id, candidate_id, "messaging").await.map_err(CoreError::from)?;

    if let Some(existing) = ctx.repo.get_pre_resume_session_by_conversation(conversation.id).await.map_err(CoreError::from)? {
        return Ok(existing);
    }

    let outcome = fsm::start_session(
        conversation.id,
        job_id,
        candidate_id,
        candidate.full_name.clone(),
        job.title.clone(),
        verified_notes_explanation(&m.verification_notes),
        Some(job.title.clone()),
        Some(ctx.config.fsm.default_language.clone()),
        &ctx.templates,
        &ctx.config.fsm,
        Utc::now(),
    );

    let session = ctx.repo.insert_pre_resume_session(outcome.session).await.map_err(CoreError::from)?;
    ctx.repo.append_pre_resume_event(outcome.event).await.map_err(CoreError::from)?;
    ctx.repo
        .add_message(conversation.id, Direction::Outbound, &outcome.outbound, Some(&session.language), MessageMeta { kind: Some("intro".to_string()), auto: Some(true), ..Default::default() })
        .await
        .map_err(CoreError::from)?;

    let action = OutboundAction {
        id: Uuid::new_v4(),
        job_id,
        candidate_id,
        conversation_id: conversation.id,
        kind: OutboundKind::Message,
        payload: OutboundPayload { text: outcome.outbound, language: session.language.clone() },
        status: OutboundStatus::Pending,
        last_error: None,
        assigned_account_id: None,
        attempts: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    ctx.repo.enqueue_outbound_action(action).await.map_err(CoreError::from)?;

    Ok(session)
}

/// `outreach`: runs [`run_pre_resume_start`] for every verified-but-not-yet-
/// contacted candidate on a job. Per-candidate failures are captured and
/// skipped rather than aborting the batch.
pub async fn run_outreach(ctx: &StageContext, job_id: Uuid) -> Result<StageSummary, CoreError> {
    let mut summary = StageSummary::default();
    let pairs = ctx.repo.list_candidates_for_job(job_id).await.map_err(CoreError::from)?;

    for (candidate, m) in pairs {
        if m.status != "verified" {
            continue;
        }
        summary.processed += 1;

        match run_pre_resume_start(ctx, job_id, candidate.id).await {
            Ok(_) => summary.succeeded += 1,
            Err(err) => {
                summary.failed += 1;
                summary.errors.push(err.to_string());
            }
        }
    }

    record_step(ctx, job_id, "outreach", &summary).await?;
    Ok(summary)
}

/// `pre_resume unreachable`: marks the session for a conversation
/// unreachable (e.g. the messaging provider reports the recipient is gone),
/// ending follow-ups. A no-op get if no session exists yet for the
/// conversation.
pub async fn mark_pre_resume_unreachable(ctx: &StageContext, conversation_id: Uuid, error: String) -> Result<Option<crate::domain::PreResumeSession>, CoreError> {
    let Some(session) = ctx.repo.get_pre_resume_session_by_conversation(conversation_id).await.map_err(CoreError::from)? else {
        return Ok(None);
    };
    let (session, event) = fsm::mark_unreachable(session, error, Utc::now());
    let session = ctx.repo.update_pre_resume_session(session).await.map_err(CoreError::from)?;
    ctx.repo.append_pre_resume_event(event).await.map_err(CoreError::from)?;
    Ok(Some(session))
}

/// `pre_resume get`: current session state for a conversation, if one has
/// been started.
pub async fn get_pre_resume(ctx: &StageContext, conversation_id: Uuid) -> Result<Option<crate::domain::PreResumeSession>, CoreError> {
    ctx.repo.get_pre_resume_session_by_conversation(conversation_id).await.map_err(CoreError::from)
}

pub struct InboundOutcome {
    pub reply: Option<String>,
    pub mode: &'static str,
}

/// `process_inbound`: persists the inbound message, then routes it to the
/// pre-resume FSM if a session is active and non-terminal, or treats it as
/// a FAQ turn otherwise.
pub async fn process_inbound(ctx: &StageContext, conversation_id: Uuid, text: &str) -> Result<InboundOutcome, CoreError> {
    let conversation = ctx.repo.get_conversation(conversation_id).await.map_err(CoreError::from)?.ok_or_else(|| CoreError::NotFound(format!("conversation {conversation_id} not found")))?;

    ctx.repo.add_message(conversation_id, Direction::Inbound, text, None, MessageMeta::default()).await.map_err(CoreError::from)?;

    let session = ctx.repo.get_pre_resume_session_by_conversation(conversation_id).await.map_err(CoreError::from)?;

    match session {
        Some(session) if !crate::domain::is_terminal(&session.status) => {
            let now = Utc::now();
            let outcome = fsm::handle_inbound(session, text, &ctx.templates, &ctx.config.fsm, now);
            ctx.repo.update_pre_resume_session(outcome.session.clone()).await.map_err(CoreError::from)?;
            ctx.repo.append_pre_resume_event(outcome.event).await.map_err(CoreError::from)?;

            if outcome.intent.as_deref() == Some("resume_shared") {
                ctx.repo.update_match_status(conversation.job_id, conversation.candidate_id, "resume_received").await.map_err(CoreError::from)?;
            }

            if let Some(reply) = &outcome.outbound {
                ctx.repo.add_message(conversation_id, Direction::Outbound, reply, Some(&outcome.session.language), MessageMeta { kind: Some("pre_resume".to_string()), auto: Some(true), ..Default::default() }).await.map_err(CoreError::from)?;
            }

            Ok(InboundOutcome { reply: outcome.outbound, mode: "pre_resume" })
        }
        _ => Ok(InboundOutcome { reply: None, mode: "faq" }),
    }
}

/// `followup tick`: scans due sessions and advances each one, delivering
/// the rendered follow-up and binding the provider's chat id if new.
pub async fn run_followup_tick(ctx: &StageContext) -> Result<StageSummary, CoreError> {
    let mut summary = StageSummary::default();
    let now = Utc::now();
    let due = ctx.repo.list_due_pre_resume_sessions(now).await.map_err(CoreError::from)?;

    for session in due {
        summary.processed += 1;
        let conversation_id = session.conversation_id;
        match fsm::build_followup(session, &ctx.templates, &ctx.config.fsm, now) {
            Ok(outcome) => {
                if let Err(err) = ctx.repo.update_pre_resume_session(outcome.session.clone()).await {
                    summary.failed += 1;
                    summary.errors.push(err.to_string());
                    continue;
                }
                if let Some(event) = outcome.event {
                    let _ = ctx.repo.append_pre_resume_event(event).await;
                }
                if let Some(text) = outcome.outbound {
                    if let Err(err) = ctx
                        .repo
                        .add_message(conversation_id, Direction::Outbound, &text, Some(&outcome.session.language), MessageMeta { kind: Some("followup".to_string()), auto: Some(true), ..Default::default() })
                        .await
                    {
                        summary.failed += 1;
                        summary.errors.push(err.to_string());
                        continue;
                    }
                }
                summary.succeeded += 1;
            }
            Err(err) => {
                summary.failed += 1;
                summary.errors.push(err.to_string());
            }
        }
    }

    Ok(summary)
}

/// `poll_inbound`: fetches the last N provider messages for a conversation
/// and folds any not already recorded (deduped by provider message id) into
/// the conversation via [`process_inbound`].
pub async fn run_poll_inbound(ctx: &StageContext, conversation_id: Uuid, limit: usize) -> Result<StageSummary, CoreError> {
    let mut summary = StageSummary::default();
    let conversation = ctx.repo.get_conversation(conversation_id).await.map_err(CoreError::from)?.ok_or_else(|| CoreError::NotFound(format!("conversation {conversation_id} not found")))?;
    let Some(chat_id) = conversation.external_chat_id.clone() else {
        return Ok(summary);
    };

    let fetched = ctx.messaging.fetch_chat_messages(&chat_id, limit).await.map_err(|err| CoreError::Provider(err))?;
    let existing: Vec<Message> = ctx.repo.list_messages(conversation_id).await.map_err(CoreError::from)?;
    let known_ids: std::collections::HashSet<String> =
        existing.iter().filter_map(|m| m.meta.provider_message_id.clone()).collect();

    for message in fetched {
        if !message.direction_is_inbound || known_ids.contains(&message.provider_message_id) {
            continue;
        }
        summary.processed += 1;
        let text = message.text.unwrap_or_else(|| {
            if message.attachment_looks_like_resume {
                // Matches a `RESUME_PHRASE_MARKERS` entry so `classify_intent` resolves to `resume_shared`.
                "[attachment: attached resume]".to_string()
            } else {
                "[attachment]".to_string()
            }
        });
        match process_inbound(ctx, conversation_id, &text).await {
            Ok(_) => summary.succeeded += 1,
            Err(err) => {
                summary.failed += 1;
                summary.errors.push(err.to_string());
            }
        }
    }

    Ok(summary)
}
