use redis::Client;
use redis::aio::ConnectionManager;

/// Create a Redis connection manager and verify the server answers `PING`.
///
/// Only the receipt reconciler lease uses Redis, so callers treat a failure here
/// as "run without a lease" rather than a fatal startup error.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let mut manager = ConnectionManager::new(client).await?;

    let reply: String = redis::cmd("PING").query_async(&mut manager).await?;
    tracing::info!(reply = %reply, "Connected to Redis");
    Ok(manager)
}
