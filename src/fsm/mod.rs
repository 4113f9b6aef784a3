//! Pre-resume conversation FSM: a short scripted exchange that collects a
//! candidate's CV before a job moves to full verification. Each transition
//! is written back to storage the moment it happens — there is no
//! in-process session cache for a caller to lose across restarts, unlike the
//! original single-process service this is modeled on.

pub mod language;
pub mod templates;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::FsmConfig;
use crate::domain::{is_terminal, PreResumeEvent, PreResumeEventType, PreResumeSession};
use crate::error::FsmError;
use language::detect_language_from_text;
use templates::{parse_resume_links, RenderVars, TemplateSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    ResumeShared,
    NotInterested,
    WillSendLater,
    Salary,
    Stack,
    Timeline,
    SendJdFirst,
    Default,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResumeShared => "resume_shared",
            Self::NotInterested => "not_interested",
            Self::WillSendLater => "will_send_later",
            Self::Salary => "salary",
            Self::Stack => "stack",
            Self::Timeline => "timeline",
            Self::SendJdFirst => "send_jd_first",
            Self::Default => "default",
        }
    }
}

const NOT_INTERESTED_MARKERS: &[&str] = &["not interested", "no thanks", "stop", "unsubscribe", "not looking"];
const WILL_SEND_LATER_MARKERS: &[&str] = &["will send", "send later", "tomorrow", "next week", "later"];
const RESUME_PHRASE_MARKERS: &[&str] = &["my cv", "my resume", "attached cv", "attached resume", "here is resume"];
const SALARY_MARKERS: &[&str] = &["salary", "compensation", "pay", "range"];
const STACK_MARKERS: &[&str] = &["stack", "technology", "tech", "tools", "requirements"];
const TIMELINE_MARKERS: &[&str] = &["timeline", "process", "interview", "steps", "when"];
const DETAILS_MARKERS: &[&str] = &["send jd", "job description", "details first", "share details", "more details"];

/// Intent classification, in strict priority order: an attached link wins
/// over every keyword bucket, opt-out wins over every remaining bucket, and
/// so on down to the catch-all `default`.
pub fn classify_intent(text: &str) -> (Intent, Vec<String>) {
    let normalized = text.trim();
    let lowered = normalized.to_lowercase();
    let links = parse_resume_links(normalized);

    if !links.is_empty() {
        return (Intent::ResumeShared, links);
    }
    if RESUME_PHRASE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return (Intent::ResumeShared, links);
    }
    if NOT_INTERESTED_MARKERS.iter().any(|m| lowered.contains(m)) {
        return (Intent::NotInterested, links);
    }
    if WILL_SEND_LATER_MARKERS.iter().any(|m| lowered.contains(m)) {
        return (Intent::WillSendLater, links);
    }
    if SALARY_MARKERS.iter().any(|m| lowered.contains(m)) {
        return (Intent::Salary, links);
    }
    if STACK_MARKERS.iter().any(|m| lowered.contains(m)) {
        return (Intent::Stack, links);
    }
    if TIMELINE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return (Intent::Timeline, links);
    }
    if DETAILS_MARKERS.iter().any(|m| lowered.contains(m)) {
        return (Intent::SendJdFirst, links);
    }
    (Intent::Default, links)
}

fn next_followup_at(status: &str, followups_sent: u32, config: &FsmConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if is_terminal(status) || followups_sent >= config.max_followups {
        return None;
    }
    let index = (followups_sent as usize).min(config.followup_delay_hours.len().saturating_sub(1));
    let delay = config.followup_delay_hours.get(index).copied().unwrap_or(48).max(1);
    Some(now + Duration::hours(delay))
}

fn render_vars<'a>(session: &'a PreResumeSession) -> RenderVars<'a> {
    RenderVars {
        name: &session.candidate_name,
        job_title: &session.job_title,
        scope_summary: &session.scope_summary,
        core_profile_summary: &session.core_profile_summary,
    }
}

pub struct StartSessionOutcome {
    pub session: PreResumeSession,
    pub outbound: String,
    pub event: PreResumeEvent,
}

/// `StartSession`: creates the session row, schedules the first follow-up
/// window, and renders the intro message.
pub fn start_session(
    conversation_id: Uuid,
    job_id: Uuid,
    candidate_id: Uuid,
    candidate_name: String,
    job_title: String,
    scope_summary: String,
    core_profile_summary: Option<String>,
    language: Option<String>,
    templates: &TemplateSet,
    config: &FsmConfig,
    now: DateTime<Utc>,
) -> StartSessionOutcome {
    let selected_language = language.filter(|l| !l.trim().is_empty()).unwrap_or_else(|| templates.default_language.clone());
    let core_summary = core_profile_summary.unwrap_or_else(|| scope_summary.clone());
    let session = PreResumeSession {
        id: Uuid::new_v4().to_string(),
        conversation_id,
        job_id,
        candidate_id,
        candidate_name,
        job_title,
        scope_summary,
        core_profile_summary: core_summary,
        language: selected_language,
        status: "awaiting_reply".to_string(),
        followups_sent: 0,
        turns: 0,
        last_intent: "started".to_string(),
        last_error: None,
        resume_links: Vec::new(),
        next_followup_at: next_followup_at("awaiting_reply", 0, config, now),
        created_at: now,
        updated_at: now,
    };
    let outbound = templates.render("intro", &session.language, &render_vars(&session));
    let event = PreResumeEvent {
        id: Uuid::new_v4(),
        session_id: session.id.clone(),
        event_type: PreResumeEventType::SessionStarted,
        intent: None,
        inbound_text: None,
        outbound_text: Some(outbound.clone()),
        resulting_status: session.status.clone(),
        created_at: now,
    };
    StartSessionOutcome { session, outbound, event }
}

pub struct InboundOutcome {
    pub session: PreResumeSession,
    pub intent: Option<String>,
    pub outbound: Option<String>,
    pub event: PreResumeEvent,
}

/// `HandleInbound`: classifies intent, advances state, and renders the
/// reply. A no-op (`ignored_terminal`) once the session reached a terminal
/// status, so a stray late reply never reopens a closed conversation.
pub fn handle_inbound(mut session: PreResumeSession, text: &str, templates: &TemplateSet, config: &FsmConfig, now: DateTime<Utc>) -> InboundOutcome {
    if is_terminal(&session.status) {
        let event = PreResumeEvent {
            id: Uuid::new_v4(),
            session_id: session.id.clone(),
            event_type: PreResumeEventType::InboundProcessed,
            intent: None,
            inbound_text: Some(text.to_string()),
            outbound_text: None,
            resulting_status: session.status.clone(),
            created_at: now,
        };
        return InboundOutcome { session, intent: None, outbound: None, event };
    }

    if session.language.is_empty() || session.language == "auto" {
        session.language = detect_language_from_text(text, &templates.default_language);
    }

    let (intent, links) = classify_intent(text);
    for link in links {
        if !session.resume_links.contains(&link) {
            session.resume_links.push(link);
        }
    }

    session.turns += 1;
    session.last_intent = intent.as_str().to_string();

    let outbound = match intent {
        Intent::ResumeShared => {
            session.status = "resume_received".to_string();
            session.next_followup_at = None;
            templates.render("resume_ack", &session.language, &render_vars(&session))
        }
        Intent::NotInterested => {
            session.status = "not_interested".to_string();
            session.next_followup_at = None;
            templates.render("not_interested_ack", &session.language, &render_vars(&session))
        }
        Intent::WillSendLater => {
            session.status = "resume_promised".to_string();
            session.next_followup_at = next_followup_at(&session.status, session.followups_sent, config, now);
            templates.render("resume_promised_ack", &session.language, &render_vars(&session))
        }
        other => {
            session.status = "engaged_no_resume".to_string();
            session.next_followup_at = next_followup_at(&session.status, session.followups_sent, config, now);
            let answer = templates.render_intent_answer(other.as_str(), &session.language, &render_vars(&session));
            let cta = templates.render("resume_cta", &session.language, &render_vars(&session));
            format!("{} {}", answer, cta).trim().to_string()
        }
    };

    session.updated_at = now;
    let event = PreResumeEvent {
        id: Uuid::new_v4(),
        session_id: session.id.clone(),
        event_type: PreResumeEventType::InboundProcessed,
        intent: Some(session.last_intent.clone()),
        inbound_text: Some(text.to_string()),
        outbound_text: Some(outbound.clone()),
        resulting_status: session.status.clone(),
        created_at: now,
    };
    InboundOutcome { session, intent: Some(session.last_intent.clone()), outbound: Some(outbound), event }
}

pub struct FollowupOutcome {
    pub session: PreResumeSession,
    pub sent: bool,
    pub outbound: Option<String>,
    pub event: Option<PreResumeEvent>,
    /// Populated whenever `sent` is false, naming why: `terminal_status` or
    /// `max_followups_reached`.
    pub reason: Option<&'static str>,
}

/// `BuildFollowup`: sends the next scheduled reminder, or marks the session
/// `stalled` once the follow-up cap is reached. The cap check runs before
/// the increment, so `followups_sent` never exceeds `max_followups`.
pub fn build_followup(mut session: PreResumeSession, templates: &TemplateSet, config: &FsmConfig, now: DateTime<Utc>) -> Result<FollowupOutcome, FsmError> {
    if is_terminal(&session.status) {
        return Ok(FollowupOutcome { session, sent: false, outbound: None, event: None, reason: Some("terminal_status") });
    }

    if session.followups_sent >= config.max_followups {
        session.status = "stalled".to_string();
        session.next_followup_at = None;
        session.updated_at = now;
        return Ok(FollowupOutcome { session, sent: false, outbound: None, event: None, reason: Some("max_followups_reached") });
    }

    let followup_number = session.followups_sent + 1;
    let outbound = templates.render_followup(followup_number, config.max_followups, &session.language, &render_vars(&session));
    session.followups_sent = followup_number;
    session.status = "awaiting_reply".to_string();
    session.updated_at = now;
    session.next_followup_at = next_followup_at(&session.status, session.followups_sent, config, now);

    let event = PreResumeEvent {
        id: Uuid::new_v4(),
        session_id: session.id.clone(),
        event_type: PreResumeEventType::FollowupSent,
        intent: None,
        inbound_text: None,
        outbound_text: Some(outbound.clone()),
        resulting_status: session.status.clone(),
        created_at: now,
    };
    Ok(FollowupOutcome { session, sent: true, outbound: Some(outbound), event: Some(event), reason: None })
}

/// `MarkUnreachable`: a delivery provider gave up on this conversation;
/// stop scheduling follow-ups and record why.
pub fn mark_unreachable(mut session: PreResumeSession, error: String, now: DateTime<Utc>) -> (PreResumeSession, PreResumeEvent) {
    session.status = "unreachable".to_string();
    session.last_error = Some(error);
    session.next_followup_at = None;
    session.updated_at = now;
    let event = PreResumeEvent {
        id: Uuid::new_v4(),
        session_id: session.id.clone(),
        event_type: PreResumeEventType::SessionUnreachable,
        intent: None,
        inbound_text: None,
        outbound_text: None,
        resulting_status: session.status.clone(),
        created_at: now,
    };
    (session, event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FsmConfig {
        FsmConfig::default()
    }

    fn started(now: DateTime<Utc>) -> PreResumeSession {
        start_session(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Jamie".to_string(),
            "Backend Engineer".to_string(),
            "backend APIs".to_string(),
            None,
            None,
            &TemplateSet::default(),
            &config(),
            now,
        )
        .session
    }

    #[test]
    fn resume_link_moves_session_to_resume_received() {
        let now = Utc::now();
        let session = started(now);
        let outcome = handle_inbound(session, "here's my cv https://drive.google.com/file/xyz", &TemplateSet::default(), &config(), now);
        assert_eq!(outcome.session.status, "resume_received");
        assert!(outcome.session.next_followup_at.is_none());
        assert_eq!(outcome.session.resume_links.len(), 1);
    }

    #[test]
    fn opt_out_phrase_stops_followups() {
        let now = Utc::now();
        let session = started(now);
        let outcome = handle_inbound(session, "Not interested, please stop messaging me.", &TemplateSet::default(), &config(), now);
        assert_eq!(outcome.session.status, "not_interested");
        assert!(outcome.session.next_followup_at.is_none());
    }

    #[test]
    fn followups_stop_after_cap_reached() {
        let now = Utc::now();
        let templates = TemplateSet::default();
        let cfg = config();
        let mut session = started(now);
        for _ in 0..cfg.max_followups {
            let outcome = build_followup(session, &templates, &cfg, now).unwrap();
            assert!(outcome.sent);
            session = outcome.session;
        }
        assert_eq!(session.followups_sent, cfg.max_followups);

        let final_outcome = build_followup(session, &templates, &cfg, now).unwrap();
        assert!(!final_outcome.sent);
        assert_eq!(final_outcome.session.status, "stalled");
        assert!(final_outcome.session.next_followup_at.is_none());
        assert_eq!(final_outcome.reason, Some("max_followups_reached"));
    }
}
