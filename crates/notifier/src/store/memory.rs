use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{NotificationLog, PushToken, ReceiptCheck, TokenRegistration};

use super::NotificationStore;

#[derive(Debug, Default)]
struct MemoryState {
    /// Keyed by the push token string (the uniqueness constraint)
    tokens: HashMap<String, PushToken>,
    logs: Vec<NotificationLog>,
    receipt_checks: HashMap<String, ReceiptCheck>,
}

/// In-memory store for local development and tests.
#[derive(Debug, Default)]
pub struct MemoryNotificationStore {
    state: RwLock<MemoryState>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a token record, active or not.
    pub async fn token(&self, push_token: &str) -> Option<PushToken> {
        self.state.read().await.tokens.get(push_token).cloned()
    }

    /// Number of token records regardless of state.
    pub async fn token_count(&self) -> usize {
        self.state.read().await.tokens.len()
    }

    /// All logs in insertion order.
    pub async fn logs(&self) -> Vec<NotificationLog> {
        self.state.read().await.logs.clone()
    }

    /// All queued receipt checks, oldest due first.
    pub async fn receipt_checks(&self) -> Vec<ReceiptCheck> {
        let mut checks: Vec<ReceiptCheck> =
            self.state.read().await.receipt_checks.values().cloned().collect();
        checks.sort_by(|a, b| a.due_at.cmp(&b.due_at).then(a.receipt_id.cmp(&b.receipt_id)));
        checks
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn upsert_token(&self, registration: &TokenRegistration) -> Result<PushToken, AppError> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let token = state
            .tokens
            .entry(registration.push_token.clone())
            .and_modify(|existing| {
                existing.platform = registration.platform;
                existing.device_info = registration.device_info.clone();
                if registration.user_id.is_some() {
                    existing.user_id = registration.user_id;
                }
                existing.active = true;
                existing.last_used = now;
                existing.updated_at = now;
            })
            .or_insert_with(|| PushToken {
                id: Uuid::new_v4(),
                user_id: registration.user_id,
                push_token: registration.push_token.clone(),
                platform: registration.platform,
                device_info: registration.device_info.clone(),
                active: true,
                last_used: now,
                created_at: now,
                updated_at: now,
            });

        Ok(token.clone())
    }

    async fn set_token_active(&self, push_token: &str, active: bool) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        match state.tokens.get_mut(push_token) {
            Some(token) => {
                token.active = active;
                token.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_active_tokens(&self) -> Result<i64, AppError> {
        let state = self.state.read().await;
        Ok(state.tokens.values().filter(|t| t.active).count() as i64)
    }

    async fn list_active_tokens(&self) -> Result<Vec<PushToken>, AppError> {
        let state = self.state.read().await;
        let mut tokens: Vec<PushToken> = state.tokens.values().filter(|t| t.active).cloned().collect();
        tokens.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.push_token.cmp(&b.push_token))
        });
        Ok(tokens)
    }

    async fn find_tokens(&self, push_tokens: &[String]) -> Result<Vec<PushToken>, AppError> {
        let state = self.state.read().await;
        Ok(push_tokens
            .iter()
            .filter_map(|t| state.tokens.get(t).cloned())
            .collect())
    }

    async fn insert_log(&self, log: &NotificationLog) -> Result<(), AppError> {
        self.state.write().await.logs.push(log.clone());
        Ok(())
    }

    async fn list_logs(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<NotificationLog>, i64), AppError> {
        let state = self.state.read().await;
        let mut logs = state.logs.clone();
        // Stable sort keeps later inserts first among equal timestamps once reversed.
        logs.reverse();
        logs.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));

        let total = logs.len() as i64;
        let page = logs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn enqueue_receipt_checks(&self, checks: &[ReceiptCheck]) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        for check in checks {
            state
                .receipt_checks
                .entry(check.receipt_id.clone())
                .or_insert_with(|| check.clone());
        }
        Ok(())
    }

    async fn fetch_due_receipt_checks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ReceiptCheck>, AppError> {
        let state = self.state.read().await;
        let mut due: Vec<ReceiptCheck> = state
            .receipt_checks
            .values()
            .filter(|c| c.due_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.due_at.cmp(&b.due_at).then(a.receipt_id.cmp(&b.receipt_id)));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn reschedule_receipt_checks(
        &self,
        receipt_ids: &[String],
        due_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        for id in receipt_ids {
            if let Some(check) = state.receipt_checks.get_mut(id) {
                check.attempts += 1;
                check.due_at = due_at;
            }
        }
        Ok(())
    }

    async fn delete_receipt_checks(&self, receipt_ids: &[String]) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        for id in receipt_ids {
            state.receipt_checks.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_common::types::Platform;

    fn registration(token: &str, platform: Platform) -> TokenRegistration {
        TokenRegistration {
            push_token: token.to_string(),
            platform,
            device_info: serde_json::json!({}),
            user_id: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_token() {
        let store = MemoryNotificationStore::new();
        let first = store
            .upsert_token(&registration("ExponentPushToken[a]", Platform::Android))
            .await
            .unwrap();
        store.set_token_active("ExponentPushToken[a]", false).await.unwrap();

        let second = store
            .upsert_token(&registration("ExponentPushToken[a]", Platform::Ios))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.active);
        assert_eq!(second.platform, Platform::Ios);
        assert_eq!(store.token_count().await, 1);
    }

    #[tokio::test]
    async fn test_set_token_active_reports_missing_rows() {
        let store = MemoryNotificationStore::new();
        assert!(!store.set_token_active("ExponentPushToken[none]", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_receipt_checks_due_and_reschedule() {
        let store = MemoryNotificationStore::new();
        let now = Utc::now();
        let check = |id: &str, offset_secs: i64| ReceiptCheck {
            receipt_id: id.to_string(),
            push_token: format!("ExponentPushToken[{}]", id),
            due_at: now + chrono::Duration::seconds(offset_secs),
            attempts: 0,
        };
        store
            .enqueue_receipt_checks(&[check("late", 60), check("due", -60)])
            .await
            .unwrap();

        let due = store.fetch_due_receipt_checks(now, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].receipt_id, "due");

        store
            .reschedule_receipt_checks(&["due".to_string()], now + chrono::Duration::seconds(120))
            .await
            .unwrap();
        assert!(store.fetch_due_receipt_checks(now, 10).await.unwrap().is_empty());
        let all = store.receipt_checks().await;
        assert_eq!(all.iter().find(|c| c.receipt_id == "due").unwrap().attempts, 1);

        store.delete_receipt_checks(&["due".to_string(), "late".to_string()]).await.unwrap();
        assert!(store.receipt_checks().await.is_empty());
    }
}
