//! Captured interaction records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which collector captured the interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Http,
    /// Reserved for a DNS collector.
    Dns,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Http => "http",
            LogKind::Dns => "dns",
        }
    }
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of one received interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub id: Uuid,
    pub instance_id: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub timestamp: u64,
    pub address: String,
    pub raw: String,
}

impl Log {
    /// A new HTTP capture stamped with the current time.
    pub fn http(instance_id: impl Into<String>, address: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id: instance_id.into(),
            kind: LogKind::Http,
            timestamp: super::now_millis(),
            address: address.into(),
            raw: raw.into(),
        }
    }
}
