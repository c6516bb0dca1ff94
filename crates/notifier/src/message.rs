//! Provider message construction.

use serde::Serialize;

use herald_common::types::{NotificationRequest, Platform};

/// Platform-specific message fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PlatformTarget {
    Ios {
        badge: u32,
    },
    Android {
        #[serde(rename = "channelId")]
        channel_id: String,
    },
    /// Token with no registry record, so its platform is unknown.
    Generic {},
}

/// Per-platform defaults applied while building messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOptions {
    pub android_channel_id: String,
    pub ios_badge: u32,
}

impl Default for MessageOptions {
    fn default() -> Self {
        Self {
            android_channel_id: "default".to_string(),
            ios_badge: 1,
        }
    }
}

impl MessageOptions {
    pub fn target_for(&self, platform: Option<Platform>) -> PlatformTarget {
        match platform {
            Some(Platform::Ios) => PlatformTarget::Ios {
                badge: self.ios_badge,
            },
            Some(Platform::Android) => PlatformTarget::Android {
                channel_id: self.android_channel_id.clone(),
            },
            None => PlatformTarget::Generic {},
        }
    }
}

/// One message addressed to one device, in the provider's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub sound: &'static str,
    pub priority: &'static str,
    #[serde(flatten)]
    pub target: PlatformTarget,
}

impl PushMessage {
    pub fn build(
        token: &str,
        platform: Option<Platform>,
        request: &NotificationRequest,
        options: &MessageOptions,
    ) -> Self {
        Self {
            to: token.to_string(),
            title: request.title.clone(),
            body: request.body.clone(),
            data: request
                .data
                .clone()
                .unwrap_or_else(|| serde_json::json!({})),
            sound: "default",
            priority: "high",
            target: options.target_for(platform),
        }
    }
}
