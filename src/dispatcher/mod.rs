//! Outbound dispatcher: drains pending [`OutboundAction`]s under per-account
//! budget caps, picking an account, sending through the provider, and
//! falling back to a connection request when the provider reports the
//! recipient isn't yet connected.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::domain::{AccountCounters, ConversationStatus, OutboundAction, OutboundKind, OutboundStatus, RoutingMode, SenderAccount};
use crate::error::DispatchError;
use crate::providers::{MessagingProvider, NO_CONNECTION_WITH_RECIPIENT};
use crate::repository::Repository;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchSummary {
    pub processed: u32,
    pub sent: u32,
    pub pending_connection: u32,
    pub deferred: u32,
    pub failed: u32,
}

fn effective_weekly_connect_cap(account: &SenderAccount, config: &DispatchConfig, now: DateTime<Utc>) -> u32 {
    let Some(connected_at) = account.connected_at else { return config.weekly_connect_cap };
    let days_since_connected = (now - connected_at).num_days();
    if days_since_connected >= 0 && days_since_connected < config.warmup_days as i64 {
        config.warmup_connect_cap
    } else {
        config.weekly_connect_cap
    }
}

/// Picks the account with the smallest day `new_threads_sent`, tie-breaking
/// by smallest week `connect_sent` then by account id. `eligible` must
/// already be filtered to `status = connected` and under whatever caps the
/// caller cares about.
fn select_account(
    eligible: &[SenderAccount],
    day_counters: &HashMap<Uuid, AccountCounters>,
    week_counters: &HashMap<Uuid, AccountCounters>,
) -> Option<Uuid> {
    eligible
        .iter()
        .map(|account| {
            let day = day_counters.get(&account.id).copied().unwrap_or_default();
            let week = week_counters.get(&account.id).copied().unwrap_or_default();
            (account.id, day.new_threads_sent, week.connect_sent)
        })
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)).then_with(|| a.0.cmp(&b.0)))
        .map(|(id, _, _)| id)
}

async fn candidate_accounts(repo: &dyn Repository, job_id: Uuid, routing_mode: RoutingMode) -> Result<Vec<SenderAccount>, DispatchError> {
    let accounts = match routing_mode {
        RoutingMode::Manual => repo.list_job_assigned_accounts(job_id).await?,
        RoutingMode::Auto => repo.list_connected_accounts().await?,
    };
    Ok(accounts.into_iter().filter(|a| a.status == crate::domain::AccountStatus::Connected).collect())
}

fn no_accounts_error(routing_mode: RoutingMode) -> &'static str {
    match routing_mode {
        RoutingMode::Manual => "manual_no_assigned_accounts",
        RoutingMode::Auto => "no_connected_accounts",
    }
}

async fn defer(repo: &dyn Repository, mut action: OutboundAction, reason: &str, now: DateTime<Utc>) -> Result<(), DispatchError> {
    action.status = OutboundStatus::Deferred;
    action.last_error = Some(reason.to_string());
    action.updated_at = now;
    repo.update_outbound_action(action).await?;
    Ok(())
}

fn day_and_week_start(now: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
    let day = now.date_naive();
    let week_start = day - chrono::Duration::days(day.weekday().num_days_from_monday() as i64);
    (day, week_start)
}

/// Dispatches up to `limit` pending actions (optionally scoped to `job_id`),
/// returning per-outcome counts. Each action is handled independently: a
/// provider or budget failure on one never aborts the batch.
pub async fn dispatch(
    repo: Arc<dyn Repository>,
    provider: Arc<dyn MessagingProvider>,
    config: &DispatchConfig,
    job_id: Option<Uuid>,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<DispatchSummary, DispatchError> {
    let mut summary = DispatchSummary::default();
    let actions = repo.claim_pending_outbound_actions(job_id, limit).await?;
    let (day, week_start) = day_and_week_start(now);

    for action in actions {
        summary.processed += 1;
        let Some(job) = repo.get_job(action.job_id).await? else {
            summary.failed += 1;
            continue;
        };

        let mut accounts = candidate_accounts(repo.as_ref(), job.id, job.routing_mode).await?;
        if let OutboundKind::Message = action.kind {
            let mut day_counters = HashMap::new();
            for account in &accounts {
                day_counters.insert(account.id, repo.get_day_counters(account.id, day).await?);
            }
            accounts.retain(|a| day_counters.get(&a.id).map(|c| c.new_threads_sent).unwrap_or(0) < config.daily_new_thread_cap);
        }

        if accounts.is_empty() {
            defer(repo.as_ref(), action, no_accounts_error(job.routing_mode), now).await?;
            summary.deferred += 1;
            continue;
        }

        let mut day_counters = HashMap::new();
        let mut week_counters = HashMap::new();
        for account in &accounts {
            day_counters.insert(account.id, repo.get_day_counters(account.id, day).await?);
            week_counters.insert(account.id, repo.get_week_counters(account.id, week_start).await?);
        }

        let Some(account_id) = select_account(&accounts, &day_counters, &week_counters) else {
            defer(repo.as_ref(), action, no_accounts_error(job.routing_mode), now).await?;
            summary.deferred += 1;
            continue;
        };
        let account = accounts.into_iter().find(|a| a.id == account_id).expect("selected id came from this list");

        match dispatch_one(repo.as_ref(), provider.as_ref(), config, action, account, day, week_start, now).await? {
            DispatchOutcome::Sent => summary.sent += 1,
            DispatchOutcome::PendingConnection => summary.pending_connection += 1,
            DispatchOutcome::Deferred => summary.deferred += 1,
            DispatchOutcome::Failed => summary.failed += 1,
        }
    }

    Ok(summary)
}

enum DispatchOutcome {
    Sent,
    PendingConnection,
    Deferred,
    Failed,
}

async fn dispatch_one(
    repo: &dyn Repository,
    provider: &dyn MessagingProvider,
    config: &DispatchConfig,
    mut action: OutboundAction,
    account: SenderAccount,
    day: NaiveDate,
    week_start: NaiveDate,
    now: DateTime<Utc>,
) -> Result<DispatchOutcome, DispatchError> {
    let Some(conversation) = repo.get_conversation(action.conversation_id).await? else {
        action.status = OutboundStatus::Failed;
        action.last_error = Some("conversation_missing".to_string());
        action.updated_at = now;
        repo.update_outbound_action(action).await?;
        return Ok(DispatchOutcome::Failed);
    };

    let provider_profile_id = conversation.external_chat_id.clone().unwrap_or_else(|| conversation.candidate_id.to_string());
    let send_result = provider.send_message(&provider_profile_id, &action.payload.text).await;

    match send_result {
        Ok(result) if result.sent => {
            repo.increment_counters(account.id, day, week_start, 1, 0).await?;
            if let Some(chat_id) = result.chat_id {
                repo.bind_external_chat_id(conversation.id, &chat_id).await?;
            }
            repo.set_conversation_status(conversation.id, ConversationStatus::Active).await?;
            repo.assign_conversation_account(conversation.id, account.id).await?;
            action.status = OutboundStatus::Completed;
            action.assigned_account_id = Some(account.id);
            action.last_error = None;
            action.attempts += 1;
            action.updated_at = now;
            repo.update_outbound_action(action).await?;
            Ok(DispatchOutcome::Sent)
        }
        Ok(result) => {
            let error_text = result.error.unwrap_or_default();
            handle_send_failure(repo, provider, config, action, account, conversation, &error_text, week_start, now).await
        }
        Err(err) => {
            handle_send_failure(repo, provider, config, action, account, conversation, &err.to_string(), week_start, now).await
        }
    }
}

async fn handle_send_failure(
    repo: &dyn Repository,
    provider: &dyn MessagingProvider,
    config: &DispatchConfig,
    mut action: OutboundAction,
    account: SenderAccount,
    conversation: crate::domain::Conversation,
    error_text: &str,
    week_start: NaiveDate,
    now: DateTime<Utc>,
) -> Result<DispatchOutcome, DispatchError> {
    if error_text.contains(NO_CONNECTION_WITH_RECIPIENT) {
        let week_counters = repo.get_week_counters(account.id, week_start).await?;
        let cap = effective_weekly_connect_cap(&account, config, now);
        if week_counters.connect_sent >= cap {
            action.status = OutboundStatus::Pending;
            action.last_error = Some("connect_budget_reached".to_string());
            action.updated_at = now;
            repo.update_outbound_action(action).await?;
            return Ok(DispatchOutcome::Deferred);
        }

        let provider_profile_id = conversation.external_chat_id.clone().unwrap_or_else(|| conversation.candidate_id.to_string());
        let connect_result = provider.send_connection_request(&provider_profile_id, None).await;
        return match connect_result {
            Ok(result) if result.sent => {
                repo.increment_counters(account.id, now.date_naive(), week_start, 0, 1).await?;
                repo.set_conversation_status(conversation.id, ConversationStatus::WaitingConnection).await?;
                repo.assign_conversation_account(conversation.id, account.id).await?;
                action.status = OutboundStatus::PendingConnection;
                action.assigned_account_id = Some(account.id);
                action.last_error = None;
                action.attempts += 1;
                action.updated_at = now;
                repo.update_outbound_action(action).await?;
                Ok(DispatchOutcome::PendingConnection)
            }
            Ok(result) => {
                action.status = OutboundStatus::Pending;
                action.last_error = result.error.or_else(|| Some("connection_request_failed".to_string()));
                action.updated_at = now;
                repo.update_outbound_action(action).await?;
                Ok(DispatchOutcome::Deferred)
            }
            Err(err) => {
                action.status = OutboundStatus::Pending;
                action.last_error = Some(err.to_string());
                action.updated_at = now;
                repo.update_outbound_action(action).await?;
                Ok(DispatchOutcome::Deferred)
            }
        };
    }

    action.status = OutboundStatus::Pending;
    action.last_error = Some(error_text.to_string());
    action.updated_at = now;
    repo.update_outbound_action(action).await?;
    Ok(DispatchOutcome::Deferred)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: Uuid, connected_at: Option<DateTime<Utc>>) -> SenderAccount {
        SenderAccount { id, provider_account_id: id.to_string(), status: crate::domain::AccountStatus::Connected, connected_at, last_synced_at: None, provider_user_id: None, label: None }
    }

    #[test]
    fn select_account_prefers_smallest_daily_count() {
        let a1 = account(Uuid::new_v4(), None);
        let a2 = account(Uuid::new_v4(), None);
        let mut day_counters = HashMap::new();
        day_counters.insert(a1.id, AccountCounters { new_threads_sent: 5, connect_sent: 0 });
        day_counters.insert(a2.id, AccountCounters { new_threads_sent: 1, connect_sent: 0 });
        let picked = select_account(&[a1.clone(), a2.clone()], &day_counters, &HashMap::new());
        assert_eq!(picked, Some(a2.id));
    }

    #[test]
    fn warmup_ramp_reduces_connect_cap_for_new_accounts() {
        let config = DispatchConfig::default();
        let now = Utc::now();
        let fresh = account(Uuid::new_v4(), Some(now - chrono::Duration::days(3)));
        let seasoned = account(Uuid::new_v4(), Some(now - chrono::Duration::days(90)));
        assert_eq!(effective_weekly_connect_cap(&fresh, &config, now), config.warmup_connect_cap);
        assert_eq!(effective_weekly_connect_cap(&seasoned, &config, now), config.weekly_connect_cap);
    }
}
