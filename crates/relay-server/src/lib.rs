//! Ephemeral message relay.
//!
//! Registered phone numbers exchange short-lived messages that are destroyed
//! on first read or when their time-to-live runs out:
//! - Access keys gate every message endpoint
//! - Bearer tokens identify the caller; the sender is never client-supplied
//! - An expiry sweeper removes messages nobody read

pub mod api;
pub mod config;
pub mod error;
pub mod relay;

pub use config::Config;
pub use error::RelayError;
pub use relay::{Credentials, Relay};
