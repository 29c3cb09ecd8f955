//! Configuration for the relay server.

use anyhow::{bail, Context, Result};
use message_store::{PayloadPolicy, StoreLimits, SweepConfig};
use relay_auth::{HashParams, TokenPolicy};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use vault::SealingKey;

/// Relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Token and password hashing configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Service access keys
    #[serde(default)]
    pub access: AccessConfig,

    /// Snapshot storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Message admission and payload handling
    #[serde(default)]
    pub messages: MessagesConfig,

    /// Expiry sweeper configuration
    #[serde(default)]
    pub sweeper: SweepConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for bearer tokens
    pub token_secret: Option<SecretString>,

    /// Whether bearer tokens expire
    #[serde(default = "default_true")]
    pub token_expires: bool,

    /// Bearer token lifetime when they expire
    #[serde(default = "default_token_ttl", with = "humantime_serde")]
    pub token_ttl: Duration,

    /// Argon2id cost parameters
    #[serde(default)]
    pub hashing: HashParams,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessConfig {
    /// Comma-separated access keys
    pub keys: Option<SecretString>,

    /// File with one access key per line
    pub keys_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Write sealed snapshots to disk (if false, everything is in-memory only)
    #[serde(default)]
    pub persist: bool,

    /// Directory holding the snapshot files
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,

    /// Hex-encoded 32-byte key sealing the snapshots
    pub key: Option<SecretString>,
}

/// How message payloads are held at rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    #[default]
    Opaque,
    Sealed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    #[serde(default)]
    pub payload_mode: PayloadMode,

    /// Hex-encoded 32-byte key for sealed payloads
    pub payload_key: Option<SecretString>,

    /// Longest accepted time-to-live
    #[serde(default = "default_max_ttl", with = "humantime_serde")]
    pub max_ttl: Duration,

    /// Largest accepted payload in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Global requests per minute
    #[serde(default = "default_global_rpm")]
    pub global_per_minute: u32,
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_expires: true,
            token_ttl: default_token_ttl(),
            hashing: HashParams::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persist: false,
            dir: default_storage_dir(),
            key: None,
        }
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            payload_mode: PayloadMode::default(),
            payload_key: None,
            max_ttl: default_max_ttl(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_minute: default_global_rpm(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".into()
}

fn default_true() -> bool {
    true
}

fn default_token_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_max_ttl() -> Duration {
    StoreLimits::default().max_ttl
}

fn default_max_payload_bytes() -> usize {
    StoreLimits::default().max_payload_bytes
}

fn default_global_rpm() -> u32 {
    600
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_environment(config::Environment::default())
    }

    fn from_environment(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(env.separator("__").try_parsing(false))
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        match &self.auth.token_secret {
            Some(secret) if !secret.expose_secret().is_empty() => {}
            _ => bail!("AUTH__TOKEN_SECRET must be set"),
        }

        if let TokenPolicy::Expiring(ttl) = self.token_policy()? {
            if chrono::Utc::now().checked_add_signed(ttl).is_none() {
                bail!("AUTH__TOKEN_TTL is too large");
            }
        }

        if self.storage.persist && self.storage.key.is_none() {
            bail!("STORAGE__KEY is required when STORAGE__PERSIST is enabled");
        }

        if self.messages.payload_mode == PayloadMode::Sealed && self.messages.payload_key.is_none() {
            bail!("MESSAGES__PAYLOAD_KEY is required when MESSAGES__PAYLOAD_MODE is sealed");
        }

        if self.inline_access_keys().is_empty() && self.access.keys_file.is_none() {
            bail!("At least one access key must be configured (ACCESS__KEYS or ACCESS__KEYS_FILE)");
        }

        Ok(())
    }

    /// Access keys given directly in configuration.
    pub fn inline_access_keys(&self) -> Vec<String> {
        self.access
            .keys
            .as_ref()
            .map(|keys| {
                keys.expose_secret()
                    .split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn token_policy(&self) -> Result<TokenPolicy> {
        if !self.auth.token_expires {
            return Ok(TokenPolicy::NonExpiring);
        }
        let ttl = chrono::Duration::from_std(self.auth.token_ttl)
            .context("AUTH__TOKEN_TTL is out of range")?;
        Ok(TokenPolicy::Expiring(ttl))
    }

    /// Key sealing the snapshot files, if persistence is enabled.
    pub fn storage_key(&self) -> Result<Option<SealingKey>> {
        if !self.storage.persist {
            return Ok(None);
        }
        let key = self
            .storage
            .key
            .as_ref()
            .context("STORAGE__KEY is required when STORAGE__PERSIST is enabled")?;
        let key = SealingKey::from_hex(key.expose_secret()).context("Invalid STORAGE__KEY")?;
        Ok(Some(key))
    }

    pub fn payload_policy(&self) -> Result<PayloadPolicy> {
        match self.messages.payload_mode {
            PayloadMode::Opaque => Ok(PayloadPolicy::Opaque),
            PayloadMode::Sealed => {
                let key = self
                    .messages
                    .payload_key
                    .as_ref()
                    .context("MESSAGES__PAYLOAD_KEY is required for sealed payloads")?;
                let key = SealingKey::from_hex(key.expose_secret())
                    .context("Invalid MESSAGES__PAYLOAD_KEY")?;
                Ok(PayloadPolicy::Sealed(key))
            }
        }
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_ttl: self.messages.max_ttl,
            max_payload_bytes: self.messages.max_payload_bytes,
        }
    }
}
