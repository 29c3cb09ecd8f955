//! Static service access keys.

use crate::error::AuthError;
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;
use subtle::{Choice, ConstantTimeEq};
use tracing::info;

/// The set of accepted access keys.
pub struct AccessKeys {
    keys: Vec<SecretString>,
}

impl AccessKeys {
    /// Build from raw keys. Blank entries are dropped.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = keys
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .map(SecretString::new)
            .collect();
        Self { keys }
    }

    /// Keys from configuration plus, optionally, a key file with one key per
    /// line. Lines starting with `#` are ignored.
    pub async fn load(inline: &[String], file: Option<&Path>) -> Result<Self, AuthError> {
        let mut keys = Self::new(inline);

        if let Some(path) = file {
            let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
                AuthError::Config(format!("failed to read access key file {:?}: {}", path, e))
            })?;
            let from_file = Self::new(contents.lines().filter(|l| !l.trim_start().starts_with('#')));
            info!("Loaded {} access keys from {:?}", from_file.len(), path);
            keys.keys.extend(from_file.keys);
        }

        Ok(keys)
    }

    /// Whether `presented` matches any configured key.
    ///
    /// Every key is compared, so the time taken does not depend on which one
    /// matched. An empty set accepts nothing.
    pub fn verify(&self, presented: &str) -> bool {
        let presented = presented.as_bytes();
        let mut matched = Choice::from(0);
        for key in &self.keys {
            matched |= key.expose_secret().as_bytes().ct_eq(presented);
        }
        matched.into()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl std::fmt::Debug for AccessKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessKeys").field("count", &self.keys.len()).finish()
    }
}
