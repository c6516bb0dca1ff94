//! Scripted provider, fixed leases and failing stores shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use herald_common::error::AppError;
use herald_common::types::{NotificationLog, PushToken, ReceiptCheck, TokenRegistration};

use crate::lease::Lease;
use crate::message::PushMessage;
use crate::provider::{ProviderError, PushProvider, PushReceipt, PushTicket};
use crate::store::{MemoryNotificationStore, NotificationStore};

type ReceiptResult = Result<HashMap<String, PushReceipt>, ProviderError>;

/// Replays queued responses, then accepts everything.
///
/// Unscripted sends return one `ok` ticket per message with id `receipt-<token>`;
/// unscripted receipt fetches return an `ok` receipt for every id.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    sends: Mutex<VecDeque<Result<Vec<PushTicket>, ProviderError>>>,
    receipts: Mutex<VecDeque<ReceiptResult>>,
    sent_chunks: Mutex<Vec<Vec<PushMessage>>>,
    receipt_requests: Mutex<Vec<Vec<String>>>,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond_next_send(&self, tickets: Vec<PushTicket>) {
        self.sends.lock().unwrap().push_back(Ok(tickets));
    }

    pub(crate) fn fail_next_send(&self, error: ProviderError) {
        self.sends.lock().unwrap().push_back(Err(error));
    }

    pub(crate) fn respond_next_receipts(&self, receipts: HashMap<String, PushReceipt>) {
        self.receipts.lock().unwrap().push_back(Ok(receipts));
    }

    pub(crate) fn fail_next_receipts(&self, error: ProviderError) {
        self.receipts.lock().unwrap().push_back(Err(error));
    }

    pub(crate) fn send_calls(&self) -> usize {
        self.sent_chunks.lock().unwrap().len()
    }

    pub(crate) fn sent_chunks(&self) -> Vec<Vec<PushMessage>> {
        self.sent_chunks.lock().unwrap().clone()
    }

    pub(crate) fn receipt_calls(&self) -> usize {
        self.receipt_requests.lock().unwrap().len()
    }
}

#[async_trait]
impl PushProvider for ScriptedProvider {
    async fn send_chunk(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, ProviderError> {
        self.sent_chunks.lock().unwrap().push(messages.to_vec());
        let scripted = self.sends.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(messages
                .iter()
                .map(|m| PushTicket::Ok {
                    id: format!("receipt-{}", m.to),
                })
                .collect()),
        }
    }

    async fn fetch_receipts(&self, receipt_ids: &[String]) -> ReceiptResult {
        self.receipt_requests.lock().unwrap().push(receipt_ids.to_vec());
        let scripted = self.receipts.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(receipt_ids
                .iter()
                .map(|id| (id.clone(), PushReceipt::Ok))
                .collect()),
        }
    }
}

/// Store whose every operation fails as if the database were unreachable.
pub(crate) struct UnavailableStore;

fn unavailable<T>() -> Result<T, AppError> {
    Err(AppError::Database(sqlx::Error::PoolTimedOut))
}

#[async_trait]
impl NotificationStore for UnavailableStore {
    async fn upsert_token(&self, _: &TokenRegistration) -> Result<PushToken, AppError> {
        unavailable()
    }

    async fn set_token_active(&self, _: &str, _: bool) -> Result<bool, AppError> {
        unavailable()
    }

    async fn count_active_tokens(&self) -> Result<i64, AppError> {
        unavailable()
    }

    async fn list_active_tokens(&self) -> Result<Vec<PushToken>, AppError> {
        unavailable()
    }

    async fn find_tokens(&self, _: &[String]) -> Result<Vec<PushToken>, AppError> {
        unavailable()
    }

    async fn insert_log(&self, _: &NotificationLog) -> Result<(), AppError> {
        unavailable()
    }

    async fn list_logs(&self, _: i64, _: i64) -> Result<(Vec<NotificationLog>, i64), AppError> {
        unavailable()
    }

    async fn enqueue_receipt_checks(&self, _: &[ReceiptCheck]) -> Result<(), AppError> {
        unavailable()
    }

    async fn fetch_due_receipt_checks(
        &self,
        _: DateTime<Utc>,
        _: i64,
    ) -> Result<Vec<ReceiptCheck>, AppError> {
        unavailable()
    }

    async fn reschedule_receipt_checks(
        &self,
        _: &[String],
        _: DateTime<Utc>,
    ) -> Result<(), AppError> {
        unavailable()
    }

    async fn delete_receipt_checks(&self, _: &[String]) -> Result<(), AppError> {
        unavailable()
    }
}

/// Lease that always answers the same way and records its release.
pub(crate) struct FixedLease {
    /// `None` makes every acquire fail as if Redis were down
    grant: Option<bool>,
    released: Arc<AtomicBool>,
}

impl FixedLease {
    pub(crate) fn granted() -> Self {
        Self::with(Some(true))
    }

    pub(crate) fn denied() -> Self {
        Self::with(Some(false))
    }

    pub(crate) fn failing() -> Self {
        Self::with(None)
    }

    fn with(grant: Option<bool>) -> Self {
        Self {
            grant,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn released_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

#[async_trait]
impl Lease for FixedLease {
    async fn try_acquire(&mut self) -> Result<bool, AppError> {
        self.grant.ok_or_else(|| {
            AppError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "connection refused",
            )))
        })
    }

    async fn release(&mut self) -> Result<(), AppError> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory store whose first `failures` calls to `delete_receipt_checks` fail.
pub(crate) struct FlakyDeleteStore {
    inner: Arc<MemoryNotificationStore>,
    failures: AtomicUsize,
}

impl FlakyDeleteStore {
    pub(crate) fn new(inner: Arc<MemoryNotificationStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl NotificationStore for FlakyDeleteStore {
    async fn upsert_token(&self, registration: &TokenRegistration) -> Result<PushToken, AppError> {
        self.inner.upsert_token(registration).await
    }

    async fn set_token_active(&self, push_token: &str, active: bool) -> Result<bool, AppError> {
        self.inner.set_token_active(push_token, active).await
    }

    async fn count_active_tokens(&self) -> Result<i64, AppError> {
        self.inner.count_active_tokens().await
    }

    async fn list_active_tokens(&self) -> Result<Vec<PushToken>, AppError> {
        self.inner.list_active_tokens().await
    }

    async fn find_tokens(&self, push_tokens: &[String]) -> Result<Vec<PushToken>, AppError> {
        self.inner.find_tokens(push_tokens).await
    }

    async fn insert_log(&self, log: &NotificationLog) -> Result<(), AppError> {
        self.inner.insert_log(log).await
    }

    async fn list_logs(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<NotificationLog>, i64), AppError> {
        self.inner.list_logs(offset, limit).await
    }

    async fn enqueue_receipt_checks(&self, checks: &[ReceiptCheck]) -> Result<(), AppError> {
        self.inner.enqueue_receipt_checks(checks).await
    }

    async fn fetch_due_receipt_checks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ReceiptCheck>, AppError> {
        self.inner.fetch_due_receipt_checks(now, limit).await
    }

    async fn reschedule_receipt_checks(
        &self,
        receipt_ids: &[String],
        due_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inner.reschedule_receipt_checks(receipt_ids, due_at).await
    }

    async fn delete_receipt_checks(&self, receipt_ids: &[String]) -> Result<(), AppError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return unavailable();
        }
        self.inner.delete_receipt_checks(receipt_ids).await
    }
}
