//! Receipt reconciler — deferred delivery-receipt checks.
//!
//! Accepted tickets are queued in the store with a due time (15 minutes after
//! dispatch by default). A background loop picks up due checks, fetches their
//! receipts in provider-sized batches, and deactivates tokens the provider
//! reports as no longer registered. The queue lives in the database, so
//! pending checks survive a restart.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use herald_common::error::AppError;
use herald_common::types::{ReceiptCheck, redact_token};

use crate::expo::REQUEST_TIMEOUT;
use crate::lease::Lease;
use crate::provider::{MAX_RECEIPT_IDS_PER_BATCH, PushErrorCode, PushProvider, PushReceipt};
use crate::registry::TokenRegistry;
use crate::store::NotificationStore;

/// Default delay between dispatch and the receipt check.
pub const DEFAULT_RECEIPT_DELAY: Duration = Duration::from_secs(15 * 60);

/// Upper bound on checks loaded per tick.
const DUE_CHECKS_PER_TICK: i64 = 1000;

/// Fetch attempts per check before it is dropped.
const MAX_FETCH_ATTEMPTS: i32 = 3;

/// Base delay before a check whose batch failed is retried.
const FETCH_RETRY_BASE_SECS: i64 = 60;

/// Counters for one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: u32,
    pub delivered: u32,
    pub failed: u32,
    pub deactivated: u32,
    /// Checks the provider had no receipt for
    pub missing: u32,
    pub fetch_errors: u32,
    /// Batches whose queue update failed; they are picked up again next tick
    pub store_errors: u32,
    pub dropped: u32,
}

#[derive(Clone)]
pub struct ReceiptReconciler {
    store: Arc<dyn NotificationStore>,
    provider: Arc<dyn PushProvider>,
    registry: TokenRegistry,
    delay: chrono::Duration,
}

impl ReceiptReconciler {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        provider: Arc<dyn PushProvider>,
        delay: Duration,
    ) -> Self {
        Self {
            registry: TokenRegistry::new(store.clone()),
            store,
            provider,
            delay: chrono::Duration::seconds(delay.as_secs() as i64),
        }
    }

    /// Queue receipt checks for accepted tickets, given as `(receipt_id, push_token)`.
    pub async fn schedule(&self, accepted: Vec<(String, String)>) -> Result<usize, AppError> {
        let due_at = Utc::now() + self.delay;
        let checks: Vec<ReceiptCheck> = accepted
            .into_iter()
            .map(|(receipt_id, push_token)| ReceiptCheck {
                receipt_id,
                push_token,
                due_at,
                attempts: 0,
            })
            .collect();

        self.store.enqueue_receipt_checks(&checks).await?;
        tracing::debug!(count = checks.len(), due_at = %due_at, "Receipt checks scheduled");
        Ok(checks.len())
    }

    /// Process every check that is due now.
    pub async fn process_due(&self) -> Result<ReconcileReport, AppError> {
        let now = Utc::now();
        let due = self
            .store
            .fetch_due_receipt_checks(now, DUE_CHECKS_PER_TICK)
            .await?;

        let mut report = ReconcileReport::default();

        for batch in due.chunks(MAX_RECEIPT_IDS_PER_BATCH) {
            let ids: Vec<String> = batch.iter().map(|c| c.receipt_id.clone()).collect();

            match self.provider.fetch_receipts(&ids).await {
                Ok(receipts) => {
                    for check in batch {
                        report.checked += 1;
                        match receipts.get(&check.receipt_id) {
                            Some(receipt) => self.apply_receipt(check, receipt, &mut report).await,
                            None => {
                                report.missing += 1;
                                tracing::debug!(
                                    receipt_id = %check.receipt_id,
                                    "No receipt available; treating check as complete"
                                );
                            }
                        }
                    }
                    if let Err(e) = self.store.delete_receipt_checks(&ids).await {
                        report.store_errors += 1;
                        tracing::error!(
                            batch_size = ids.len(),
                            error = %e,
                            "Failed to complete receipt checks for batch"
                        );
                    }
                }
                Err(e) => {
                    report.fetch_errors += 1;
                    tracing::error!(
                        batch_size = ids.len(),
                        error = %e,
                        "Failed to fetch push receipts for batch"
                    );
                    match self.retry_or_drop(batch).await {
                        Ok(dropped) => report.dropped += dropped,
                        Err(e) => {
                            report.store_errors += 1;
                            tracing::error!(
                                batch_size = ids.len(),
                                error = %e,
                                "Failed to reschedule receipt checks for batch"
                            );
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    async fn apply_receipt(
        &self,
        check: &ReceiptCheck,
        receipt: &PushReceipt,
        report: &mut ReconcileReport,
    ) {
        let PushReceipt::Error { message, .. } = receipt else {
            report.delivered += 1;
            tracing::debug!(receipt_id = %check.receipt_id, "Push notification delivered");
            return;
        };

        report.failed += 1;
        let token = redact_token(&check.push_token);

        match receipt.error_code() {
            Some(PushErrorCode::DeviceNotRegistered) => {
                if self.registry.deactivate(&check.push_token).await {
                    report.deactivated += 1;
                }
            }
            Some(PushErrorCode::MessageTooBig) => {
                tracing::error!(token = %token, message = %message, "Push payload too large");
            }
            Some(PushErrorCode::MessageRateExceeded) => {
                tracing::warn!(token = %token, message = %message, "Push rate exceeded for device");
            }
            Some(code @ (PushErrorCode::MismatchSenderId | PushErrorCode::InvalidCredentials)) => {
                tracing::error!(
                    token = %token,
                    error_code = %code,
                    message = %message,
                    "Push credentials rejected by provider"
                );
            }
            Some(PushErrorCode::Other(code)) => {
                tracing::warn!(token = %token, error_code = %code, message = %message, "Push receipt error");
            }
            None => {
                tracing::warn!(token = %token, message = %message, "Push receipt error without code");
            }
        }
    }

    /// Reschedule checks from a failed batch, dropping those out of attempts.
    /// Returns the number dropped.
    async fn retry_or_drop(&self, batch: &[ReceiptCheck]) -> Result<u32, AppError> {
        let mut exhausted = Vec::new();
        let mut retry_by_attempt: BTreeMap<i32, Vec<String>> = BTreeMap::new();

        for check in batch {
            if check.attempts + 1 >= MAX_FETCH_ATTEMPTS {
                exhausted.push(check.receipt_id.clone());
            } else {
                retry_by_attempt
                    .entry(check.attempts)
                    .or_default()
                    .push(check.receipt_id.clone());
            }
        }

        for (attempts, ids) in retry_by_attempt {
            let backoff = FETCH_RETRY_BASE_SECS * 2_i64.pow(attempts as u32);
            let due_at = Utc::now() + chrono::Duration::seconds(backoff);
            self.store.reschedule_receipt_checks(&ids, due_at).await?;
        }

        if !exhausted.is_empty() {
            tracing::warn!(
                count = exhausted.len(),
                attempts = MAX_FETCH_ATTEMPTS,
                "Dropping receipt checks after repeated fetch failures"
            );
            self.store.delete_receipt_checks(&exhausted).await?;
        }

        Ok(exhausted.len() as u32)
    }

    /// Lease TTL that outlives one poll interval plus the slowest possible
    /// pass (every receipt batch hitting the request timeout).
    pub fn lease_ttl(poll_interval: Duration) -> Duration {
        let batches = (DUE_CHECKS_PER_TICK as u32).div_ceil(MAX_RECEIPT_IDS_PER_BATCH as u32);
        poll_interval * 2 + REQUEST_TIMEOUT * batches
    }

    /// Poll for due checks until `shutdown` resolves, then release the lease.
    ///
    /// With a lease, only the instance holding it processes a tick.
    pub async fn run(
        &self,
        poll_interval: Duration,
        mut lease: Option<Box<dyn Lease>>,
        shutdown: impl Future<Output = ()> + Send,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            poll_interval_secs = poll_interval.as_secs(),
            delay_secs = self.delay.num_seconds(),
            leased = lease.is_some(),
            "Receipt reconciler started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            if let Some(lease) = lease.as_mut() {
                match lease.try_acquire().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!("Reconciler lease held by another instance");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Reconciler lease check failed, skipping tick");
                        continue;
                    }
                }
            }

            match self.process_due().await {
                Ok(report)
                    if report.checked > 0 || report.fetch_errors > 0 || report.store_errors > 0 =>
                {
                    tracing::info!(
                        checked = report.checked,
                        delivered = report.delivered,
                        failed = report.failed,
                        deactivated = report.deactivated,
                        fetch_errors = report.fetch_errors,
                        store_errors = report.store_errors,
                        "Receipt reconciliation pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Receipt reconciliation pass failed");
                }
            }
        }

        if let Some(mut lease) = lease {
            if let Err(e) = lease.release().await {
                tracing::warn!(error = %e, "Failed to release reconciler lease");
            }
        }
        tracing::info!("Receipt reconciler stopped");
    }
}
