//! Instances: the unit of routing.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Owner id reserved for instances created without an account.
pub const GUEST_OWNER_ID: &str = "guest";

const INSTANCE_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const INSTANCE_ID_LENGTH: usize = 8;

/// A named user-supplied processor of a dynamic instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Processor {
    pub name: String,
    pub code: String,
}

/// What an instance answers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    /// A complete raw HTTP response, replayed with a corrected Content-Length.
    Static { raw: String },
    /// Ordered processors. Execution is not supported.
    Dynamic { processors: Vec<Processor> },
}

impl Payload {
    /// Short name used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Static { .. } => "static",
            Payload::Dynamic { .. } => "dynamic",
        }
    }
}

/// An addressable endpoint reachable at `<id>.instances.<domain>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub owner_id: String,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Locked instances keep receiving traffic but cannot be deleted.
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub webhook_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Instance {
    /// Create an unlocked, non-expiring instance with no webhooks.
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            created_at: super::now_millis(),
            expires_at: None,
            locked: false,
            webhook_ids: Vec::new(),
            label: None,
            payload,
        }
    }

    /// An expired instance is invisible to every read path.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now_ms)
    }

    pub fn is_guest(&self) -> bool {
        self.owner_id == GUEST_OWNER_ID
    }

    /// Byte length of the stored static response, if any.
    pub fn static_len(&self) -> Option<usize> {
        match &self.payload {
            Payload::Static { raw } => Some(raw.len()),
            Payload::Dynamic { .. } => None,
        }
    }
}

/// Generate a fresh 8-character `[0-9a-z]` instance id.
pub fn generate_instance_id() -> String {
    let mut rng = rand::thread_rng();
    (0..INSTANCE_ID_LENGTH)
        .map(|_| INSTANCE_ID_ALPHABET[rng.gen_range(0..INSTANCE_ID_ALPHABET.len())] as char)
        .collect()
}
