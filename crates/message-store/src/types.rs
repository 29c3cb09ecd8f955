//! Message and policy types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;
use vault::{SealingKey, VaultError};

/// Opaque message identifier.
pub type MessageId = Uuid;

/// A pending message.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Sender principal (E.164 phone number)
    pub sender: String,
    /// Recipient principal (E.164 phone number)
    pub recipient: String,
    /// Payload bytes; sealed at rest when the store runs with [`PayloadPolicy::Sealed`]
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Message {
    /// A message is visible only while `now < expires_at`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// Payloads stay out of logs.
impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .field("payload_len", &self.payload.len())
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of a successful `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageReceipt {
    pub id: MessageId,
    pub expires_at: DateTime<Utc>,
}

/// How payloads are held at rest.
///
/// `Opaque` stores whatever the caller sent; callers are expected to encrypt
/// end-to-end. `Sealed` encrypts on the server with a configured key, so
/// sealed payloads stay readable across restarts as long as the key does.
#[derive(Clone, Debug, Default)]
pub enum PayloadPolicy {
    #[default]
    Opaque,
    Sealed(SealingKey),
}

impl PayloadPolicy {
    pub(crate) fn seal(&self, payload: Vec<u8>) -> Result<Vec<u8>, VaultError> {
        match self {
            PayloadPolicy::Opaque => Ok(payload),
            PayloadPolicy::Sealed(key) => key.seal(&payload),
        }
    }

    pub(crate) fn open(&self, stored: Vec<u8>) -> Result<Vec<u8>, VaultError> {
        match self {
            PayloadPolicy::Opaque => Ok(stored),
            PayloadPolicy::Sealed(key) => key.open(&stored),
        }
    }

    /// Short name used in logs and health output.
    pub fn name(&self) -> &'static str {
        match self {
            PayloadPolicy::Opaque => "opaque",
            PayloadPolicy::Sealed(_) => "sealed",
        }
    }
}

/// Admission limits for `put`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StoreLimits {
    /// Longest accepted time-to-live
    #[serde(default = "default_max_ttl", with = "humantime_serde")]
    pub max_ttl: Duration,

    /// Largest accepted payload, before sealing
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_ttl: default_max_ttl(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_max_ttl() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_max_payload_bytes() -> usize {
    64 * 1024
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
