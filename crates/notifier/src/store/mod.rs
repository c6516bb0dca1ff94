//! Persistence for push tokens, notification logs, and pending receipt checks.
//!
//! Every method is a single-row (or single-statement) operation; token
//! uniqueness is enforced by the backend, not by application locking.

mod memory;
mod postgres;

pub use memory::MemoryNotificationStore;
pub use postgres::PgNotificationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use herald_common::error::AppError;
use herald_common::types::{NotificationLog, PushToken, ReceiptCheck, TokenRegistration};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a new active token, or reactivate and refresh the existing row
    /// with the same `push_token`.
    async fn upsert_token(&self, registration: &TokenRegistration) -> Result<PushToken, AppError>;

    /// Set the active flag. Returns `false` when no row has that token.
    async fn set_token_active(&self, push_token: &str, active: bool) -> Result<bool, AppError>;

    async fn count_active_tokens(&self) -> Result<i64, AppError>;

    async fn list_active_tokens(&self) -> Result<Vec<PushToken>, AppError>;

    /// Look up the registry records for the given tokens. Unknown tokens are skipped.
    async fn find_tokens(&self, push_tokens: &[String]) -> Result<Vec<PushToken>, AppError>;

    async fn insert_log(&self, log: &NotificationLog) -> Result<(), AppError>;

    /// One page of logs, newest first, plus the total number of logs.
    async fn list_logs(&self, offset: i64, limit: i64)
    -> Result<(Vec<NotificationLog>, i64), AppError>;

    /// Queue receipt checks. Ids already queued are left untouched.
    async fn enqueue_receipt_checks(&self, checks: &[ReceiptCheck]) -> Result<(), AppError>;

    /// Checks whose `due_at` is at or before `now`, oldest first.
    async fn fetch_due_receipt_checks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ReceiptCheck>, AppError>;

    /// Push the given checks back to `due_at` and count one more attempt.
    async fn reschedule_receipt_checks(
        &self,
        receipt_ids: &[String],
        due_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn delete_receipt_checks(&self, receipt_ids: &[String]) -> Result<(), AppError>;
}
