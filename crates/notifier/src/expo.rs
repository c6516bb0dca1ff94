//! Expo push API client.
//!
//! Speaks the two endpoints the pipeline needs:
//! - `POST {base}/push/send` — submit a chunk of messages, one ticket per message
//! - `POST {base}/push/getReceipts` — look up delivery receipts by ticket id

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;

use crate::message::PushMessage;
use crate::provider::{ProviderError, PushProvider, PushReceipt, PushTicket};

/// Per-request timeout for calls to the push service.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Check whether a token has a shape Expo will accept.
///
/// Accepts `ExponentPushToken[...]`, `ExpoPushToken[...]`, and bare
/// hyphenated 8-4-4-4-12 alphanumeric ids.
pub fn is_expo_push_token(token: &str) -> bool {
    let bracketed = ["ExponentPushToken[", "ExpoPushToken["].iter().any(|prefix| {
        token
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(']'))
            .is_some_and(|inner| !inner.is_empty())
    });

    bracketed || is_hyphenated_id(token)
}

fn is_hyphenated_id(token: &str) -> bool {
    let groups: Vec<&str> = token.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8usize, 4, 4, 4, 12])
            .all(|(group, len)| group.len() == len && group.chars().all(|c| c.is_ascii_alphanumeric()))
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    data: Vec<PushTicket>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ReceiptsResponse {
    #[serde(default)]
    data: HashMap<String, PushReceipt>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

fn describe(errors: &[ApiError]) -> String {
    errors
        .iter()
        .map(|e| {
            format!(
                "{}: {}",
                e.code.as_deref().unwrap_or("UNKNOWN"),
                e.message.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// HTTP client for the Expo push service.
pub struct ExpoClient {
    http_client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl ExpoClient {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Result<Self, ProviderError> {
        let http_client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        })
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<Response, ProviderError> {
        let mut request = self
            .http_client
            .post(format!("{}{}", self.base_url, path))
            .header("Accept", "application/json")
            .json(body);

        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl PushProvider for ExpoClient {
    async fn send_chunk(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, ProviderError> {
        let body = serde_json::to_value(messages).map_err(|e| ProviderError::Decode(e.to_string()))?;
        let response: SendResponse = self.post("/push/send", &body).await?.json().await?;

        if response.data.is_empty() && !response.errors.is_empty() {
            return Err(ProviderError::Rejected(describe(&response.errors)));
        }

        tracing::debug!(
            messages = messages.len(),
            tickets = response.data.len(),
            "Expo accepted push chunk"
        );
        Ok(response.data)
    }

    async fn fetch_receipts(
        &self,
        receipt_ids: &[String],
    ) -> Result<HashMap<String, PushReceipt>, ProviderError> {
        let body = json!({ "ids": receipt_ids });
        let response: ReceiptsResponse = self.post("/push/getReceipts", &body).await?.json().await?;

        if response.data.is_empty() && !response.errors.is_empty() {
            return Err(ProviderError::Rejected(describe(&response.errors)));
        }

        Ok(response.data)
    }
}
