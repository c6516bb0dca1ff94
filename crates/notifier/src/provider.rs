//! Push provider seam — tickets, receipts, and the error vocabulary shared by
//! the dispatcher and the receipt reconciler.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::PushMessage;

/// Maximum number of messages the provider accepts in one send request.
pub const MAX_MESSAGES_PER_CHUNK: usize = 100;

/// Maximum number of receipt ids the provider accepts in one receipts request.
pub const MAX_RECEIPT_IDS_PER_BATCH: usize = 300;

/// Error details attached to an error ticket or receipt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Provider error codes the pipeline reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushErrorCode {
    DeviceNotRegistered,
    MessageTooBig,
    MessageRateExceeded,
    MismatchSenderId,
    InvalidCredentials,
    Other(String),
}

impl From<&str> for PushErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "DeviceNotRegistered" => PushErrorCode::DeviceNotRegistered,
            "MessageTooBig" => PushErrorCode::MessageTooBig,
            "MessageRateExceeded" => PushErrorCode::MessageRateExceeded,
            "MismatchSenderId" => PushErrorCode::MismatchSenderId,
            "InvalidCredentials" => PushErrorCode::InvalidCredentials,
            other => PushErrorCode::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for PushErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushErrorCode::DeviceNotRegistered => write!(f, "DeviceNotRegistered"),
            PushErrorCode::MessageTooBig => write!(f, "MessageTooBig"),
            PushErrorCode::MessageRateExceeded => write!(f, "MessageRateExceeded"),
            PushErrorCode::MismatchSenderId => write!(f, "MismatchSenderId"),
            PushErrorCode::InvalidCredentials => write!(f, "InvalidCredentials"),
            PushErrorCode::Other(code) => write!(f, "{}", code),
        }
    }
}

/// The provider's immediate acknowledgement for one submitted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PushTicket {
    Ok {
        /// Receipt id used later for reconciliation
        id: String,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<ErrorDetails>,
    },
}

impl PushTicket {
    /// Error ticket produced locally when the provider never answered for a message.
    pub fn synthesized(message: impl Into<String>) -> Self {
        PushTicket::Error {
            message: message.into(),
            details: None,
        }
    }

    pub fn error_code(&self) -> Option<PushErrorCode> {
        match self {
            PushTicket::Ok { .. } => None,
            PushTicket::Error { details, .. } => details
                .as_ref()
                .and_then(|d| d.error.as_deref())
                .map(PushErrorCode::from),
        }
    }
}

/// The provider's delayed confirmation of the delivery outcome for an accepted ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PushReceipt {
    Ok,
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<ErrorDetails>,
    },
}

impl PushReceipt {
    pub fn error_code(&self) -> Option<PushErrorCode> {
        match self {
            PushReceipt::Ok => None,
            PushReceipt::Error { details, .. } => details
                .as_ref()
                .and_then(|d| d.error.as_deref())
                .map(PushErrorCode::from),
        }
    }
}

/// Failure of a whole provider request (as opposed to a per-message error ticket).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("push provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("push provider request failed: {message}")]
    Network { message: String, retryable: bool },

    #[error("push provider rejected the request: {0}")]
    Rejected(String),

    #[error("push provider response could not be decoded: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Whether the request may succeed if sent again: HTTP 429/5xx, timeouts,
    /// connect failures, and connections dropped mid-request.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            ProviderError::Network { retryable, .. } => *retryable,
            ProviderError::Rejected(_) | ProviderError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return ProviderError::Decode(e.to_string());
        }
        let retryable = e.is_timeout() || e.is_connect() || e.is_request();
        ProviderError::Network {
            message: e.to_string(),
            retryable,
        }
    }
}

/// A push delivery service (Expo in production, scripted fakes in tests).
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Submit one chunk of at most [`MAX_MESSAGES_PER_CHUNK`] messages.
    /// Tickets are returned in message order.
    async fn send_chunk(&self, messages: &[PushMessage]) -> Result<Vec<PushTicket>, ProviderError>;

    /// Fetch receipts for at most [`MAX_RECEIPT_IDS_PER_BATCH`] receipt ids.
    /// Ids the provider has no receipt for are absent from the map.
    async fn fetch_receipts(
        &self,
        receipt_ids: &[String],
    ) -> Result<HashMap<String, PushReceipt>, ProviderError>;
}
