//! Credential store.
//!
//! Identities are keyed by normalized phone number and hold an Argon2id PHC
//! string. Hashing and verification run on the blocking pool so that a burst
//! of logins cannot stall the async workers.
//!
//! With durable snapshots a registration only becomes visible once the
//! snapshot containing it is on disk.

use crate::error::AuthError;
use crate::principal::normalize_phone_number;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use vault::Snapshots;

/// Snapshot schema version.
const DATA_VERSION: u32 = 1;

/// A registered identity.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    /// Phone number in E.164 format
    pub principal: String,
    /// Argon2id PHC string
    password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .field("password_hash", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HashParams {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

fn default_memory_kib() -> u32 {
    Params::DEFAULT_M_COST
}

fn default_iterations() -> u32 {
    Params::DEFAULT_T_COST
}

fn default_parallelism() -> u32 {
    Params::DEFAULT_P_COST
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

impl HashParams {
    fn hasher(&self) -> Result<Argon2<'static>, AuthError> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| AuthError::Config(format!("invalid Argon2 parameters: {}", e)))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Salt length in bytes.
const SALT_LEN: usize = 16;

fn hash_password(hasher: &Argon2<'static>, password: &[u8]) -> Result<String, AuthError> {
    let mut salt_bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Hashing(e.to_string()))?;

    hasher
        .hash_password(password, &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Constant-time verification; cost parameters are read from the PHC string.
fn verify_password(hasher: &Argon2<'static>, password: &[u8], phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => hasher.verify_password(password, &parsed).is_ok(),
        Err(e) => {
            error!("Stored password hash is malformed: {}", e);
            false
        }
    }
}

/// Persistent form of the store.
#[derive(Debug, Serialize, Deserialize)]
struct CredentialData {
    version: u32,
    identities: Vec<Identity>,
}

#[derive(Clone, Default)]
struct CredentialState {
    identities: HashMap<String, Identity>,
    generation: u64,
}

/// Identity records with salted password hashes.
pub struct CredentialStore {
    state: RwLock<CredentialState>,
    /// Held from staging a registration until its snapshot is written.
    commit_lock: Mutex<()>,
    snapshots: Snapshots,
    hasher: Argon2<'static>,
    /// Verified against when the principal is unknown, so both paths cost the same.
    dummy_hash: OnceCell<String>,
}

impl CredentialStore {
    /// Open a store, loading the last snapshot if one exists.
    pub async fn open(snapshots: Snapshots, params: HashParams) -> Result<Self, AuthError> {
        let hasher = params.hasher()?;

        let mut state = CredentialState::default();
        if let Some(bytes) = snapshots.load().await? {
            let data: CredentialData = serde_json::from_slice(&bytes)?;
            if data.version != DATA_VERSION {
                warn!(
                    "Credential snapshot version {} differs from {}",
                    data.version, DATA_VERSION
                );
            }
            for identity in data.identities {
                state.identities.insert(identity.principal.clone(), identity);
            }
        }

        info!(
            identities = state.identities.len(),
            persistent = snapshots.is_persistent(),
            "Credential store opened"
        );

        Ok(Self {
            state: RwLock::new(state),
            commit_lock: Mutex::new(()),
            snapshots,
            hasher,
            dummy_hash: OnceCell::new(),
        })
    }

    /// Memory-only store.
    pub fn in_memory(params: HashParams) -> Result<Self, AuthError> {
        Ok(Self {
            state: RwLock::new(CredentialState::default()),
            commit_lock: Mutex::new(()),
            snapshots: Snapshots::memory(),
            hasher: params.hasher()?,
            dummy_hash: OnceCell::new(),
        })
    }

    async fn hash_blocking(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || hash_password(&hasher, &password))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
    }

    async fn verify_blocking(&self, password: &str, phc: String) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || verify_password(&hasher, &password, &phc))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))
    }

    async fn dummy_hash(&self) -> Result<String, AuthError> {
        self.dummy_hash
            .get_or_try_init(|| self.hash_blocking("relay-dummy-password"))
            .await
            .cloned()
    }

    /// Insert `identity` unless its principal is taken.
    ///
    /// Durable stores stage the insert on a copy and publish it only after the
    /// snapshot is saved, so a failed write leaves no trace in memory or on disk.
    async fn commit(&self, identity: &Identity) -> Result<(), AuthError> {
        let principal = &identity.principal;

        if !self.snapshots.is_persistent() {
            let mut state = self.state.write().await;
            if state.identities.contains_key(principal) {
                return Err(AuthError::DuplicatePrincipal(principal.clone()));
            }
            state.identities.insert(principal.clone(), identity.clone());
            state.generation += 1;
            return Ok(());
        }

        let _commit = self.commit_lock.lock().await;
        let mut staged = self.state.read().await.clone();
        if staged.identities.contains_key(principal) {
            return Err(AuthError::DuplicatePrincipal(principal.clone()));
        }
        staged.identities.insert(principal.clone(), identity.clone());
        staged.generation += 1;

        let data = CredentialData {
            version: DATA_VERSION,
            identities: staged.identities.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec(&data)?;
        self.snapshots.save(staged.generation, &bytes).await?;

        *self.state.write().await = staged;
        Ok(())
    }

    /// Register a new identity.
    #[instrument(skip(self, password))]
    pub async fn register(&self, phone_number: &str, password: &str) -> Result<Identity, AuthError> {
        let principal = normalize_phone_number(phone_number)?;

        // Skip the hashing cost for an obvious duplicate
        if self.state.read().await.identities.contains_key(&principal) {
            return Err(AuthError::DuplicatePrincipal(principal));
        }

        let identity = Identity {
            id: Uuid::new_v4(),
            principal: principal.clone(),
            password_hash: self.hash_blocking(password).await?,
            created_at: Utc::now(),
        };

        match self.commit(&identity).await {
            Ok(()) => {}
            Err(AuthError::Vault(e)) => {
                error!(phone_number = %principal, "Failed to persist identity, not registered: {}", e);
                return Err(AuthError::Vault(e));
            }
            Err(e) => return Err(e),
        }

        info!(phone_number = %principal, identity_id = %identity.id, "Identity registered");
        Ok(identity)
    }

    /// Check a password.
    ///
    /// Returns `None` for a wrong password and for an unknown or malformed
    /// phone number alike.
    #[instrument(skip(self, password))]
    pub async fn verify(&self, phone_number: &str, password: &str) -> Result<Option<Identity>, AuthError> {
        let identity = match normalize_phone_number(phone_number) {
            Ok(principal) => self.find(&principal).await,
            Err(_) => None,
        };

        let phc = match &identity {
            Some(identity) => identity.password_hash.clone(),
            None => self.dummy_hash().await?,
        };
        let matched = self.verify_blocking(password, phc).await?;

        match identity {
            Some(identity) if matched => Ok(Some(identity)),
            _ => {
                debug!("Credential check failed");
                Ok(None)
            }
        }
    }

    /// Look up an identity by normalized phone number.
    pub async fn find(&self, principal: &str) -> Option<Identity> {
        self.state.read().await.identities.get(principal).cloned()
    }

    /// Number of registered identities.
    pub async fn count(&self) -> usize {
        self.state.read().await.identities.len()
    }
}
