//! Push notification routes.
//!
//! Registration is public (the mobile app calls it on launch); everything else
//! is admin-only.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    DispatchSummary, LogPage, NotificationRequest, NotificationType, Platform, PushToken,
};
use herald_notifier::history::{DEFAULT_PAGE_SIZE, NotificationHistory};

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

/// Characters of a token shown in the admin token listing.
const TOKEN_PREVIEW_CHARS: usize = 30;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications/register", post(register_token))
        .route("/api/notifications/send", post(send_notification))
        .route("/api/notifications/logs", get(list_logs))
        .route("/api/notifications/stats", get(stats))
        .route("/api/notifications/tokens", get(list_tokens))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTokenBody {
    pub push_token: Option<String>,
    pub platform: Option<String>,
    #[serde(default)]
    pub device_info: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTokenResponse {
    pub success: bool,
    pub token_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationBody {
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub related_id: Option<String>,
    /// Explicit recipient tokens; omitted means every active device
    #[serde(default)]
    pub recipients: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub active_devices: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSummary {
    pub token: String,
    pub platform: Platform,
    pub device_info: serde_json::Value,
    pub registered_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl From<PushToken> for TokenSummary {
    fn from(token: PushToken) -> Self {
        let preview: String = token.push_token.chars().take(TOKEN_PREVIEW_CHARS).collect();
        Self {
            token: format!("{}...", preview),
            platform: token.platform,
            device_info: token.device_info,
            registered_at: token.created_at,
            last_used: token.last_used,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenListResponse {
    pub count: usize,
    pub tokens: Vec<TokenSummary>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// POST /api/notifications/register — Register or refresh a device token.
async fn register_token(
    State(state): State<AppState>,
    Json(body): Json<RegisterTokenBody>,
) -> Result<Json<RegisterTokenResponse>, AppError> {
    let (Some(push_token), Some(platform)) = (non_empty(body.push_token), non_empty(body.platform))
    else {
        return Err(AppError::Validation(
            "pushToken and platform are required".to_string(),
        ));
    };
    let platform: Platform = platform.parse()?;

    let token = state
        .registry
        .register(
            &push_token,
            platform,
            body.device_info.unwrap_or_else(|| serde_json::json!({})),
            None,
        )
        .await?;

    Ok(Json(RegisterTokenResponse {
        success: true,
        token_id: token.id,
    }))
}

/// POST /api/notifications/send — Dispatch a notification to devices.
async fn send_notification(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<SendNotificationBody>,
) -> Result<Json<DispatchSummary>, AppError> {
    let (Some(title), Some(text), Some(notification_type)) = (
        non_empty(body.title),
        non_empty(body.body),
        non_empty(body.notification_type),
    ) else {
        return Err(AppError::Validation(
            "title, body, and type are required".to_string(),
        ));
    };
    let notification_type: NotificationType = notification_type.parse()?;

    let mut request =
        NotificationRequest::new(title, text, notification_type).with_sent_by(auth.user_id);
    request.data = body.data;
    request.related_id = body.related_id;
    request.recipients = body.recipients;

    tracing::info!(
        admin_id = %auth.user_id,
        notification_type = %notification_type,
        "Admin requested push notification"
    );

    let summary = state.dispatcher.dispatch(&request).await?;
    Ok(Json(summary))
}

/// GET /api/notifications/logs — Paginated notification history.
async fn list_logs(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogPage>, AppError> {
    let page = NotificationHistory::page(
        state.store.as_ref(),
        query.page.unwrap_or(1),
        query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    )
    .await?;
    Ok(Json(page))
}

/// GET /api/notifications/stats — Active device count.
async fn stats(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<StatsResponse>, AppError> {
    let active_devices = state.registry.count_active().await?;
    Ok(Json(StatsResponse { active_devices }))
}

/// GET /api/notifications/tokens — Active devices with truncated tokens.
async fn list_tokens(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> Result<Json<TokenListResponse>, AppError> {
    let tokens: Vec<TokenSummary> = state
        .registry
        .list_active()
        .await?
        .into_iter()
        .map(TokenSummary::from)
        .collect();

    Ok(Json(TokenListResponse {
        count: tokens.len(),
        tokens,
    }))
}
