//! External interfaces the core depends on but does not implement:
//! messaging, LLM replies, interview scoring, and bearer-token auth.
//! Concrete adapters (HTTP clients, vendor SDKs) live outside this crate and
//! implement these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, ProviderError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcedProfile {
    pub provider_id: String,
    pub full_name: String,
    pub headline: Option<String>,
    pub location: Option<String>,
    pub languages: Vec<String>,
    pub skills: Vec<String>,
    pub years_experience: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub sent: bool,
    pub chat_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResult {
    pub sent: bool,
    pub request_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedMessage {
    pub provider_message_id: String,
    pub direction_is_inbound: bool,
    pub text: Option<String>,
    pub has_attachment: bool,
    pub attachment_looks_like_resume: bool,
}

/// Marker some providers return when a connection-request retry applies —
/// matched against [`ProviderError::RequestFailed`]'s text by the
/// dispatcher, since the provider surface reports this as an error string
/// rather than a typed variant.
pub const NO_CONNECTION_WITH_RECIPIENT: &str = "no_connection_with_recipient";

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn search_profiles(&self, query: &str, limit: usize) -> Result<Vec<SourcedProfile>, ProviderError>;
    async fn enrich_profile(&self, profile: SourcedProfile) -> Result<SourcedProfile, ProviderError>;
    async fn send_message(&self, profile_id: &str, text: &str) -> Result<SendResult, ProviderError>;
    async fn send_connection_request(&self, profile_id: &str, note: Option<&str>) -> Result<ConnectResult, ProviderError>;
    async fn check_connection_status(&self, profile_id: &str) -> Result<ConnectionStatus, ProviderError>;
    async fn fetch_chat_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<FetchedMessage>, ProviderError>;
}

/// The conversational mode a reply is generated for, mirroring the FSM's
/// and the FAQ agent's distinct prompting needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    PreResume,
    Faq,
}

#[async_trait]
pub trait LlmResponder: Send + Sync {
    /// Returns the rendered reply. Implementations that fail or return an
    /// empty string are treated by the caller as absent — it falls back to
    /// `fallback` rather than propagating the error.
    #[allow(clippy::too_many_arguments)]
    async fn generate_candidate_reply(
        &self,
        mode: ReplyMode,
        instruction: &str,
        job_context: &str,
        candidate_context: &str,
        inbound_text: &str,
        history: &[String],
        fallback: &str,
        language: &str,
        state: serde_json::Value,
    ) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationPayload {
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    pub candidate_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub invitation_id: String,
    pub assessment_id: Uuid,
    pub candidate_id: Uuid,
    pub interview_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    Invited,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewStatusReport {
    pub status: InterviewStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewScores {
    pub technical: Option<f64>,
    pub soft_skills: Option<f64>,
    pub culture_fit: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewResult {
    pub status: InterviewStatus,
    pub scores: InterviewScores,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait InterviewProvider: Send + Sync {
    async fn create_invitation(&self, payload: InvitationPayload) -> Result<Invitation, ProviderError>;
    async fn get_interview_status(&self, invitation_id: &str) -> Result<InterviewStatusReport, ProviderError>;
    async fn get_interview_result(&self, invitation_id: &str) -> Result<InterviewResult, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
    pub scopes: Vec<String>,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct AuthDecisionResult {
    pub allowed: bool,
    pub status_code: u16,
    pub principal: Option<Principal>,
}

/// Given a bearer-style header and the scopes/admin flag a route requires,
/// decides whether the request is allowed. The core consumes the decision;
/// it never issues or stores tokens itself.
#[async_trait]
pub trait AuthDecision: Send + Sync {
    async fn decide(&self, authorization_header: Option<&str>, required_scopes: &[String], require_admin: bool) -> Result<AuthDecisionResult, AuthError>;
}

/// Wildcard-aware scope check: a granted scope of `*` or `prefix:*` covers
/// any required scope starting with that prefix.
pub fn scope_satisfies(granted: &[String], required: &str) -> bool {
    granted.iter().any(|g| {
        if g == "*" {
            return true;
        }
        if let Some(prefix) = g.strip_suffix(":*") {
            return required.starts_with(prefix) && required[prefix.len()..].starts_with(':');
        }
        g == required
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_scope_covers_any_required_scope() {
        assert!(scope_satisfies(&["*".to_string()], "jobs:write"));
    }

    #[test]
    fn prefix_wildcard_covers_matching_prefix_only() {
        let granted = vec!["jobs:*".to_string()];
        assert!(scope_satisfies(&granted, "jobs:write"));
        assert!(!scope_satisfies(&granted, "candidates:write"));
    }

    #[test]
    fn exact_scope_match_required_without_wildcard() {
        let granted = vec!["jobs:read".to_string()];
        assert!(scope_satisfies(&granted, "jobs:read"));
        assert!(!scope_satisfies(&granted, "jobs:write"));
    }
}
