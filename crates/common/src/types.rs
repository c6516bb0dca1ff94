use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Mobile platform a push token was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Ios => write!(f, "ios"),
            Platform::Android => write!(f, "android"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(AppError::Validation(format!(
                "Invalid platform '{}'. Valid platforms: ios, android",
                other
            ))),
        }
    }
}

/// Category of a notification, used for filtering logs and by the app to route taps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum NotificationType {
    News,
    Tender,
    Vacancy,
    General,
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationType::News => write!(f, "news"),
            NotificationType::Tender => write!(f, "tender"),
            NotificationType::Vacancy => write!(f, "vacancy"),
            NotificationType::General => write!(f, "general"),
        }
    }
}

impl std::str::FromStr for NotificationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "news" => Ok(NotificationType::News),
            "tender" => Ok(NotificationType::Tender),
            "vacancy" => Ok(NotificationType::Vacancy),
            "general" => Ok(NotificationType::General),
            other => Err(AppError::Validation(format!(
                "Invalid notification type '{}'. Valid types: news, tender, vacancy, general",
                other
            ))),
        }
    }
}

/// A registered device push token.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PushToken {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub push_token: String,
    pub platform: Platform,
    pub device_info: serde_json::Value,
    pub active: bool,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for registering (or re-registering) a device.
#[derive(Debug, Clone)]
pub struct TokenRegistration {
    pub push_token: String,
    pub platform: Platform,
    pub device_info: serde_json::Value,
    pub user_id: Option<Uuid>,
}

/// Append-only record of one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLog {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    /// Tokens that were part of a constructed message
    pub recipients: Vec<String>,
    pub sent_count: i32,
    pub failed_count: i32,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub related_id: Option<String>,
    pub sent_by: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
}

/// A page of notification logs, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub logs: Vec<NotificationLog>,
    pub total: i64,
    pub page: u32,
    pub total_pages: u32,
}

impl LogPage {
    pub fn new(logs: Vec<NotificationLog>, total: i64, page: u32, limit: u32) -> Self {
        let limit = i64::from(limit.max(1));
        let total_pages = ((total.max(0) + limit - 1) / limit) as u32;
        Self {
            logs,
            total,
            page,
            total_pages,
        }
    }
}

/// A delivery receipt waiting to be checked with the push provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReceiptCheck {
    /// Receipt id returned in the provider's `ok` ticket
    pub receipt_id: String,
    /// Token the message was addressed to
    pub push_token: String,
    pub due_at: DateTime<Utc>,
    pub attempts: i32,
}

/// A logical notification to fan out to devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub related_id: Option<String>,
    #[serde(default)]
    pub sent_by: Option<Uuid>,
    /// Explicit recipient tokens; `None` or empty means every active token.
    #[serde(default)]
    pub recipients: Option<Vec<String>>,
}

impl NotificationRequest {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        notification_type: NotificationType,
    ) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: None,
            notification_type,
            related_id: None,
            sent_by: None,
            recipients: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_related_id(mut self, related_id: impl Into<String>) -> Self {
        self.related_id = Some(related_id.into());
        self
    }

    pub fn with_sent_by(mut self, sent_by: Uuid) -> Self {
        self.sent_by = Some(sent_by);
        self
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = Some(recipients);
        self
    }

    /// Announcement for a newly published news article.
    pub fn news(news_id: &str, title: &str) -> Self {
        Self::new("New News Article", title, NotificationType::News)
            .with_data(serde_json::json!({
                "type": "news",
                "newsId": news_id,
                "screen": "NewsDetail",
            }))
            .with_related_id(news_id)
    }

    /// Announcement for a newly opened tender.
    pub fn tender(tender_id: &str, title: &str, closing_date: &str) -> Self {
        Self::new(
            "New Tender Available",
            format!("{} - Closes: {}", title, closing_date),
            NotificationType::Tender,
        )
        .with_data(serde_json::json!({
            "type": "tender",
            "tenderId": tender_id,
            "screen": "Tenders",
        }))
        .with_related_id(tender_id)
    }

    /// Announcement for a newly advertised job vacancy.
    pub fn vacancy(vacancy_id: &str, title: &str, closing_date: &str) -> Self {
        Self::new(
            "New Job Vacancy",
            format!("{} - Closes: {}", title, closing_date),
            NotificationType::Vacancy,
        )
        .with_data(serde_json::json!({
            "type": "vacancy",
            "vacancyId": vacancy_id,
            "screen": "Vacancies",
        }))
        .with_related_id(vacancy_id)
    }
}

/// Outcome of one dispatch call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub sent_count: u32,
    pub failed_count: u32,
    pub total_recipients: u32,
    /// Tokens deactivated because the provider reported the device as unregistered
    pub deactivated_tokens: u32,
}

/// Shorten a token for log lines so full tokens never end up in log storage.
pub fn redact_token(token: &str) -> String {
    let prefix: String = token.chars().take(20).collect();
    format!("{}...", prefix)
}
