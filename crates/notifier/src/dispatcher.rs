//! Notification dispatcher — fans one logical notification out to devices.
//!
//! Flow for a single dispatch:
//! 1. Resolve recipients (explicit tokens, or every active registry token)
//! 2. Drop tokens the provider would reject outright
//! 3. Build one message per token with platform-specific fields
//! 4. Send in chunks of [`MAX_MESSAGES_PER_CHUNK`], retrying transient failures
//! 5. Count tickets, deactivating tokens reported as `DeviceNotRegistered`
//! 6. Append a notification log row
//! 7. Queue receipt checks for accepted tickets
//!
//! A failing chunk never aborts the remaining chunks; every message ends up
//! counted as either sent or failed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use herald_common::config::AppConfig;
use herald_common::error::AppError;
use herald_common::types::{
    DispatchSummary, NotificationLog, NotificationRequest, Platform, redact_token,
};

use crate::expo::is_expo_push_token;
use crate::message::{MessageOptions, PushMessage};
use crate::provider::{MAX_MESSAGES_PER_CHUNK, PushErrorCode, PushProvider, PushTicket};
use crate::reconciler::ReceiptReconciler;
use crate::registry::TokenRegistry;
use crate::store::NotificationStore;

/// Exponential backoff for chunk sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed_attempts`-th failure: `base * 2^failed_attempts`.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(failed_attempts))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    pub retry: RetryPolicy,
    pub message: MessageOptions,
}

impl From<&AppConfig> for DispatcherConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: config.push_max_attempts.max(1),
                base_delay: Duration::from_millis(config.push_retry_base_ms),
            },
            message: MessageOptions {
                android_channel_id: config.push_android_channel_id.clone(),
                ios_badge: config.push_ios_badge,
            },
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    provider: Arc<dyn PushProvider>,
    registry: TokenRegistry,
    reconciler: ReceiptReconciler,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        provider: Arc<dyn PushProvider>,
        reconciler: ReceiptReconciler,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry: TokenRegistry::new(store.clone()),
            store,
            provider,
            reconciler,
            config,
        }
    }

    /// Deliver a notification and record the outcome.
    ///
    /// Per-message and per-chunk provider failures are counted, not returned.
    /// Only a storage failure while resolving recipients or writing the log
    /// row is an error.
    pub async fn dispatch(&self, request: &NotificationRequest) -> Result<DispatchSummary, AppError> {
        let recipients = self.resolve_recipients(request).await?;
        if recipients.is_empty() {
            tracing::warn!(
                notification_type = %request.notification_type,
                "No push tokens to notify"
            );
            return Ok(DispatchSummary::default());
        }

        let mut summary = DispatchSummary {
            total_recipients: recipients.len() as u32,
            ..Default::default()
        };

        let messages: Vec<PushMessage> = recipients
            .iter()
            .filter(|(token, _)| {
                let valid = is_expo_push_token(token);
                if !valid {
                    tracing::warn!(token = %redact_token(token), "Skipping malformed push token");
                }
                valid
            })
            .map(|(token, platform)| {
                PushMessage::build(token, *platform, request, &self.config.message)
            })
            .collect();

        let mut accepted = Vec::new();

        for (index, chunk) in messages.chunks(MAX_MESSAGES_PER_CHUNK).enumerate() {
            let tickets = self.send_with_retry(index, chunk).await;

            for (message, ticket) in chunk.iter().zip(tickets) {
                match &ticket {
                    PushTicket::Ok { id } => {
                        summary.sent_count += 1;
                        accepted.push((id.clone(), message.to.clone()));
                    }
                    PushTicket::Error { message: reason, .. } => {
                        summary.failed_count += 1;
                        let code = ticket.error_code();
                        tracing::warn!(
                            token = %redact_token(&message.to),
                            error_code = ?code,
                            reason = %reason,
                            "Push ticket error"
                        );

                        if code == Some(PushErrorCode::DeviceNotRegistered)
                            && self.registry.deactivate(&message.to).await
                        {
                            summary.deactivated_tokens += 1;
                        }
                    }
                }
            }
        }

        let log = NotificationLog {
            id: Uuid::new_v4(),
            title: request.title.clone(),
            body: request.body.clone(),
            data: request
                .data
                .clone()
                .unwrap_or_else(|| serde_json::json!({})),
            recipients: messages.iter().map(|m| m.to.clone()).collect(),
            sent_count: summary.sent_count as i32,
            failed_count: summary.failed_count as i32,
            notification_type: request.notification_type,
            related_id: request.related_id.clone(),
            sent_by: request.sent_by,
            sent_at: Utc::now(),
        };

        self.store.insert_log(&log).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to write notification log");
            e
        })?;

        if !accepted.is_empty() {
            // Best effort once messages are out
            if let Err(e) = self.reconciler.schedule(accepted).await {
                tracing::error!(error = %e, "Failed to schedule receipt checks");
            }
        }

        tracing::info!(
            log_id = %log.id,
            notification_type = %request.notification_type,
            sent = summary.sent_count,
            failed = summary.failed_count,
            total = summary.total_recipients,
            deactivated = summary.deactivated_tokens,
            "Push notification dispatch complete"
        );

        Ok(summary)
    }

    /// Explicit recipients (deduplicated, platform looked up in the registry),
    /// or every active token when none were given.
    async fn resolve_recipients(
        &self,
        request: &NotificationRequest,
    ) -> Result<Vec<(String, Option<Platform>)>, AppError> {
        match request.recipients.as_deref() {
            Some(explicit) if !explicit.is_empty() => {
                let mut seen = HashSet::new();
                let unique: Vec<String> = explicit
                    .iter()
                    .filter(|t| seen.insert(t.as_str()))
                    .cloned()
                    .collect();

                let known: HashMap<String, Platform> = self
                    .store
                    .find_tokens(&unique)
                    .await?
                    .into_iter()
                    .map(|t| (t.push_token, t.platform))
                    .collect();

                Ok(unique
                    .into_iter()
                    .map(|token| {
                        let platform = known.get(&token).copied();
                        (token, platform)
                    })
                    .collect())
            }
            _ => Ok(self
                .store
                .list_active_tokens()
                .await?
                .into_iter()
                .map(|t| (t.push_token, Some(t.platform)))
                .collect()),
        }
    }

    /// Send one chunk, retrying retryable failures with exponential backoff.
    ///
    /// Always returns exactly one ticket per message: a short provider response
    /// is padded and an exhausted or permanent failure yields error tickets.
    async fn send_with_retry(&self, chunk_index: usize, chunk: &[PushMessage]) -> Vec<PushTicket> {
        let policy = self.config.retry;
        let mut attempt = 1;

        loop {
            match self.provider.send_chunk(chunk).await {
                Ok(tickets) => return align_tickets(tickets, chunk.len()),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(
                        chunk = chunk_index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Push chunk failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        chunk = chunk_index,
                        attempts = attempt,
                        size = chunk.len(),
                        error = %e,
                        "Push chunk failed, marking all messages failed"
                    );
                    let reason = format!("Chunk delivery failed: {}", e);
                    return chunk
                        .iter()
                        .map(|_| PushTicket::synthesized(reason.clone()))
                        .collect();
                }
            }
        }
    }
}

fn align_tickets(mut tickets: Vec<PushTicket>, expected: usize) -> Vec<PushTicket> {
    if tickets.len() != expected {
        tracing::warn!(
            expected,
            received = tickets.len(),
            "Provider returned a mismatched ticket count"
        );
    }
    tickets.truncate(expected);
    tickets.resize_with(expected, || {
        PushTicket::synthesized("No ticket returned for message")
    });
    tickets
}
