use serde::{Deserialize, Serialize};

/// Commands sent by the hosting application over the control channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Drop cached entries. Without a prefix every generation is removed.
    ClearCache {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    QueryStatus,
    /// Activate a generation that finished installing and is waiting
    SkipWaiting,
    /// Install a new generation for the given version tag
    InstallUpdate { version: String },
}

/// Replies and announcements sent by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlReply {
    Status(StatusReport),
    CacheCleared {
        removed: u64,
        timestamp: i64,
    },
    UpdateAvailable {
        #[serde(rename = "generationName")]
        generation_name: String,
    },
    Activated {
        #[serde(rename = "generationName")]
        generation_name: String,
    },
    Error {
        message: String,
    },
}

/// Answer to a `QueryStatus` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Active generation, `None` before the first activation
    pub generation_name: Option<String>,
    pub entry_count: u64,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub state: String,
    pub update_pending: bool,
}

impl ControlMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ControlReply {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether this reply is an unsolicited announcement rather than an answer
    pub fn is_announcement(&self) -> bool {
        matches!(
            self,
            ControlReply::UpdateAvailable { .. } | ControlReply::Activated { .. }
        )
    }
}

/// Current wall-clock time in Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
