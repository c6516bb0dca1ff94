//! Token registry — device registration and lifecycle.

use std::sync::Arc;

use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{Platform, PushToken, TokenRegistration, redact_token};

use crate::expo::is_expo_push_token;
use crate::store::NotificationStore;

/// Registers, lists, and deactivates device push tokens.
#[derive(Clone)]
pub struct TokenRegistry {
    store: Arc<dyn NotificationStore>,
}

impl TokenRegistry {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Register a device, or reactivate it if the token is already known.
    ///
    /// Fails with `AppError::Validation` (and writes nothing) when the token is
    /// not in a format the push provider accepts.
    pub async fn register(
        &self,
        push_token: &str,
        platform: Platform,
        device_info: serde_json::Value,
        user_id: Option<Uuid>,
    ) -> Result<PushToken, AppError> {
        if !is_expo_push_token(push_token) {
            tracing::warn!(token = %redact_token(push_token), "Rejected malformed push token");
            return Err(AppError::Validation("Invalid Expo push token".to_string()));
        }

        let registration = TokenRegistration {
            push_token: push_token.to_string(),
            platform,
            device_info,
            user_id,
        };

        let token = self.store.upsert_token(&registration).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to register push token");
            e
        })?;

        tracing::info!(
            token = %redact_token(push_token),
            platform = %platform,
            token_id = %token.id,
            "Push token registered"
        );
        Ok(token)
    }

    /// Mark a token inactive. Never fails: a missing token or a storage error
    /// is logged and swallowed. Returns `true` when a record was updated.
    pub async fn deactivate(&self, push_token: &str) -> bool {
        match self.store.set_token_active(push_token, false).await {
            Ok(true) => {
                tracing::info!(token = %redact_token(push_token), "Push token deactivated");
                true
            }
            Ok(false) => {
                tracing::debug!(
                    token = %redact_token(push_token),
                    "Deactivation requested for unknown push token"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    token = %redact_token(push_token),
                    error = %e,
                    "Failed to deactivate push token"
                );
                false
            }
        }
    }

    pub async fn count_active(&self) -> Result<i64, AppError> {
        self.store.count_active_tokens().await
    }

    pub async fn list_active(&self) -> Result<Vec<PushToken>, AppError> {
        self.store.list_active_tokens().await
    }
}
