//! Named record types for every persisted entity.
//!
//! The source system treats most of these as open maps; here each gets a
//! concrete struct plus a typed JSON wrapper for genuinely open-ended
//! extension fields, while preserving the on-wire JSON shape.

mod account;
mod assessment;
mod candidate;
mod conversation;
mod idempotency;
mod job;
mod match_record;
mod message;
mod operation_log;
mod outbound;
mod pre_resume;
mod signal;
mod step_progress;

pub use account::*;
pub use assessment::*;
pub use candidate::*;
pub use conversation::*;
pub use idempotency::*;
pub use job::*;
pub use match_record::*;
pub use message::*;
pub use operation_log::*;
pub use outbound::*;
pub use pre_resume::*;
pub use signal::*;
pub use step_progress::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered list of identity extractors, first non-empty value wins.
///
/// Grounds the source's `_candidate_key` dynamic-attribute lookup as a
/// static, typed chain instead of dict probing.
pub fn candidate_identity_key(profile: &CandidateProfileSourceFields) -> String {
    let candidates = [
        profile.linkedin_id.as_deref(),
        profile.unipile_profile_id.as_deref(),
        profile.attendee_provider_id.as_deref(),
        profile.provider_id.as_deref(),
        profile.id.as_deref(),
    ];
    for value in candidates {
        if let Some(v) = value {
            if !v.trim().is_empty() {
                return v.to_string();
            }
        }
    }
    format!(
        "{}|{}",
        profile.full_name.trim().to_lowercase(),
        profile.headline.as_deref().unwrap_or("").trim().to_lowercase()
    )
}

/// The subset of a sourced profile relevant to identity resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateProfileSourceFields {
    pub id: Option<String>,
    pub provider_id: Option<String>,
    pub linkedin_id: Option<String>,
    pub unipile_profile_id: Option<String>,
    pub attendee_provider_id: Option<String>,
    pub full_name: String,
    pub headline: Option<String>,
}

/// Generate a fresh identifier.
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}
