//! Reconciler lease — keeps one API instance reconciling receipts at a time.
//!
//! The lease is a Redis key holding the owner's id with a TTL, so it expires on
//! its own if the holder dies. Acquire, renew, and release each run as a single
//! Lua script so ownership is checked and changed atomically.

use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use herald_common::error::AppError;

const LEASE_KEY: &str = "herald:receipt-reconciler:lease";

// Take the key when free (SET NX EX), or extend it when we already own it.
const ACQUIRE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    return 1
end
if not current then
    redis.call('SET', KEYS[1], ARGV[1], 'NX', 'EX', ARGV[2])
    return 1
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Exclusive right to run a reconciliation tick.
#[async_trait]
pub trait Lease: Send {
    /// Take the lease if it is free, or renew it if this instance holds it.
    async fn try_acquire(&mut self) -> Result<bool, AppError>;

    /// Give the lease up if this instance holds it.
    async fn release(&mut self) -> Result<(), AppError>;
}

/// Redis-backed [`Lease`].
pub struct ReconcilerLease {
    redis: ConnectionManager,
    holder: String,
    ttl_secs: u64,
}

impl ReconcilerLease {
    /// `ttl` must outlive one poll interval plus one full pass, or another
    /// instance can take over mid-pass. See `ReceiptReconciler::lease_ttl`.
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self {
            redis,
            holder: Uuid::new_v4().to_string(),
            ttl_secs: ttl.as_secs().max(1),
        }
    }
}

#[async_trait]
impl Lease for ReconcilerLease {
    async fn try_acquire(&mut self) -> Result<bool, AppError> {
        let held: i64 = Script::new(ACQUIRE_SCRIPT)
            .key(LEASE_KEY)
            .arg(&self.holder)
            .arg(self.ttl_secs)
            .invoke_async(&mut self.redis)
            .await?;

        Ok(held == 1)
    }

    async fn release(&mut self) -> Result<(), AppError> {
        let released: i64 = Script::new(RELEASE_SCRIPT)
            .key(LEASE_KEY)
            .arg(&self.holder)
            .invoke_async(&mut self.redis)
            .await?;

        if released == 1 {
            tracing::info!(holder = %self.holder, "Reconciler lease released");
        }
        Ok(())
    }
}
