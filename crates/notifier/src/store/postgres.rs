use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{NotificationLog, PushToken, ReceiptCheck, TokenRegistration};

use super::NotificationStore;

/// PostgreSQL-backed store (see `migrations/`).
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn upsert_token(&self, registration: &TokenRegistration) -> Result<PushToken, AppError> {
        let token: PushToken = sqlx::query_as(
            r#"
            INSERT INTO push_tokens (id, user_id, push_token, platform, device_info, active, last_used)
            VALUES ($1, $2, $3, $4, $5, true, NOW())
            ON CONFLICT (push_token) DO UPDATE SET
                platform = EXCLUDED.platform,
                device_info = EXCLUDED.device_info,
                user_id = COALESCE(EXCLUDED.user_id, push_tokens.user_id),
                active = true,
                last_used = NOW(),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(registration.user_id)
        .bind(&registration.push_token)
        .bind(registration.platform.to_string())
        .bind(&registration.device_info)
        .fetch_one(&self.pool)
        .await?;

        Ok(token)
    }

    async fn set_token_active(&self, push_token: &str, active: bool) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE push_tokens SET active = $1, updated_at = NOW() WHERE push_token = $2",
        )
        .bind(active)
        .bind(push_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_active_tokens(&self) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM push_tokens WHERE active = true")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_active_tokens(&self) -> Result<Vec<PushToken>, AppError> {
        let tokens: Vec<PushToken> = sqlx::query_as(
            "SELECT * FROM push_tokens WHERE active = true ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    async fn find_tokens(&self, push_tokens: &[String]) -> Result<Vec<PushToken>, AppError> {
        if push_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let tokens: Vec<PushToken> =
            sqlx::query_as("SELECT * FROM push_tokens WHERE push_token = ANY($1)")
                .bind(push_tokens)
                .fetch_all(&self.pool)
                .await?;
        Ok(tokens)
    }

    async fn insert_log(&self, log: &NotificationLog) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO notification_logs
                (id, title, body, data, recipients, sent_count, failed_count,
                 notification_type, related_id, sent_by, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(log.id)
        .bind(&log.title)
        .bind(&log.body)
        .bind(&log.data)
        .bind(&log.recipients)
        .bind(log.sent_count)
        .bind(log.failed_count)
        .bind(log.notification_type.to_string())
        .bind(&log.related_id)
        .bind(log.sent_by)
        .bind(log.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_logs(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<NotificationLog>, i64), AppError> {
        let logs = sqlx::query_as::<_, NotificationLog>(
            "SELECT * FROM notification_logs ORDER BY sent_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool);

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notification_logs")
            .fetch_one(&self.pool);

        let (logs, total) = tokio::try_join!(logs, total)?;
        Ok((logs, total))
    }

    async fn enqueue_receipt_checks(&self, checks: &[ReceiptCheck]) -> Result<(), AppError> {
        if checks.is_empty() {
            return Ok(());
        }

        let receipt_ids: Vec<&str> = checks.iter().map(|c| c.receipt_id.as_str()).collect();
        let push_tokens: Vec<&str> = checks.iter().map(|c| c.push_token.as_str()).collect();
        let due_at: Vec<DateTime<Utc>> = checks.iter().map(|c| c.due_at).collect();
        let attempts: Vec<i32> = checks.iter().map(|c| c.attempts).collect();

        // One round trip for the whole dispatch
        sqlx::query(
            r#"
            INSERT INTO receipt_checks (receipt_id, push_token, due_at, attempts)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::timestamptz[], $4::int[])
            ON CONFLICT (receipt_id) DO NOTHING
            "#,
        )
        .bind(&receipt_ids)
        .bind(&push_tokens)
        .bind(&due_at)
        .bind(&attempts)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_due_receipt_checks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ReceiptCheck>, AppError> {
        let checks: Vec<ReceiptCheck> = sqlx::query_as(
            "SELECT * FROM receipt_checks WHERE due_at <= $1 ORDER BY due_at LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(checks)
    }

    async fn reschedule_receipt_checks(
        &self,
        receipt_ids: &[String],
        due_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE receipt_checks SET attempts = attempts + 1, due_at = $1 WHERE receipt_id = ANY($2)",
        )
        .bind(due_at)
        .bind(receipt_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_receipt_checks(&self, receipt_ids: &[String]) -> Result<(), AppError> {
        sqlx::query("DELETE FROM receipt_checks WHERE receipt_id = ANY($1)")
            .bind(receipt_ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
