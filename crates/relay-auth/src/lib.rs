//! Authentication for the message relay.
//!
//! - [`CredentialStore`]: phone-number identities with Argon2id password hashes
//! - [`TokenService`]: stateless HS256 bearer tokens
//! - [`AccessKeys`]: static service keys checked before any identity lookup

mod access;
mod credentials;
mod error;
mod principal;
mod token;

pub use access::AccessKeys;
pub use credentials::{CredentialStore, HashParams, Identity};
pub use error::AuthError;
pub use principal::normalize_phone_number;
pub use token::{IssuedToken, TokenPolicy, TokenService};
