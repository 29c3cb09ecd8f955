//! Sealed storage primitives shared by the relay's durable stores.
//!
//! - [`SealingKey`] seals and opens byte blobs with AES-256-GCM
//! - [`Snapshots`] persists whole-store snapshots as sealed files, or keeps
//!   nothing at all when persistence is disabled

mod error;
mod seal;
mod snapshot;

pub use error::VaultError;
pub use seal::{SealingKey, KEY_SIZE, NONCE_SIZE};
pub use snapshot::{SnapshotFile, Snapshots};
