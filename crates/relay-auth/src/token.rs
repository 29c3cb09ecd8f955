//! Stateless bearer tokens.
//!
//! Tokens are compact HS256 JWS strings: `base64url(header)`, `base64url(claims)`
//! and `base64url(hmac)` joined by dots. Nothing is stored server-side; a
//! token is valid as long as its signature checks out and, under an expiring
//! policy, its `exp` lies in the future.

use crate::error::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

/// Whether issued tokens expire.
///
/// `NonExpiring` tokens stay valid until the signing secret changes; there
/// is no way to revoke a single one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPolicy {
    Expiring(Duration),
    NonExpiring,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        TokenPolicy::Expiring(Duration::minutes(30))
    }
}

/// A freshly issued token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
}

/// Issues and verifies bearer tokens with a process-wide secret.
pub struct TokenService {
    secret: SecretString,
    policy: TokenPolicy,
}

impl TokenService {
    pub fn new(secret: SecretString, policy: TokenPolicy) -> Result<Self, AuthError> {
        if secret.expose_secret().is_empty() {
            return Err(AuthError::Config("token secret must not be empty".into()));
        }
        if let TokenPolicy::Expiring(ttl) = policy {
            if ttl <= Duration::zero() {
                return Err(AuthError::Config("token lifetime must be positive".into()));
            }
            if Utc::now().checked_add_signed(ttl).is_none() {
                return Err(AuthError::Config("token lifetime is out of range".into()));
            }
        }
        Ok(Self { secret, policy })
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| AuthError::Config("unusable token secret".into()))
    }

    /// Issue a token for `principal`.
    pub fn issue(&self, principal: &str) -> Result<IssuedToken, AuthError> {
        self.issue_at(principal, Utc::now())
    }

    fn issue_at(&self, principal: &str, now: DateTime<Utc>) -> Result<IssuedToken, AuthError> {
        let expires_at = match self.policy {
            TokenPolicy::Expiring(ttl) => Some(
                now.checked_add_signed(ttl)
                    .ok_or_else(|| AuthError::Config("token expiry is out of range".into()))?,
            ),
            TokenPolicy::NonExpiring => None,
        };

        let header = Header {
            alg: ALGORITHM.into(),
            typ: "JWT".into(),
        };
        let claims = Claims {
            sub: principal.to_string(),
            iat: now.timestamp(),
            exp: expires_at.map(|t| t.timestamp()),
        };

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(IssuedToken {
            token: format!("{}.{}", signing_input, signature),
            expires_at,
        })
    }

    /// Verify a token and return its subject.
    ///
    /// Every failure, whether structural, cryptographic or temporal, comes
    /// back as the same [`AuthError::InvalidToken`].
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        self.verify_at(token, Utc::now())
    }

    fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
        self.check(token, now).ok_or_else(|| {
            debug!("Rejected bearer token");
            AuthError::InvalidToken
        })
    }

    fn check(&self, token: &str, now: DateTime<Utc>) -> Option<String> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, signature_b64) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }

        let header: Header = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header_b64).ok()?).ok()?;
        if header.alg != ALGORITHM {
            return None;
        }

        let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;
        let mut mac = self.mac().ok()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature).ok()?;

        let claims: Claims = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(claims_b64).ok()?).ok()?;
        match (self.policy, claims.exp) {
            (_, Some(exp)) if now.timestamp() >= exp => None,
            // Tokens minted under a non-expiring policy are not honored once expiry is on
            (TokenPolicy::Expiring(_), None) => None,
            _ => Some(claims.sub),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(policy: TokenPolicy) -> TokenService {
        TokenService::new(SecretString::new("test-signing-secret".into()), policy).unwrap()
    }

    #[test]
    fn test_issue_and_verify() {
        let tokens = service(TokenPolicy::default());
        let issued = tokens.issue("+15550001111").unwrap();

        assert_eq!(issued.token.split('.').count(), 3);
        assert!(issued.expires_at.is_some());
        assert_eq!(tokens.verify(&issued.token).unwrap(), "+15550001111");
    }

    #[test]
    fn test_header_is_standard_jwt() {
        let tokens = service(TokenPolicy::default());
        let issued = tokens.issue("+15550001111").unwrap();

        let header_b64 = issued.token.split('.').next().unwrap();
        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header_b64).unwrap()).unwrap();
        assert_eq!(header["alg"], "HS256");
        assert_eq!(header["typ"], "JWT");
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let tokens = service(TokenPolicy::default());
        let issued = tokens.issue("+15550001111").unwrap();

        let (body, signature) = issued.token.rsplit_once('.').unwrap();
        let mut sig = URL_SAFE_NO_PAD.decode(signature).unwrap();
        sig[0] ^= 0x01;
        let tampered = format!("{}.{}", body, URL_SAFE_NO_PAD.encode(sig));

        assert!(matches!(tokens.verify(&tampered), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let tokens = service(TokenPolicy::default());
        let issued = tokens.issue("+15550001111").unwrap();
        let parts: Vec<&str> = issued.token.split('.').collect();

        let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":"+15550002222","iat":0}"#);
        let token = format!("{}.{}.{}", parts[0], forged, parts[2]);

        assert!(matches!(tokens.verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_other_secret_rejected() {
        let issued = service(TokenPolicy::default()).issue("+15550001111").unwrap();
        let other =
            TokenService::new(SecretString::new("another-secret".into()), TokenPolicy::default())
                .unwrap();

        assert!(matches!(other.verify(&issued.token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_expired_token_rejected() {
        let tokens = service(TokenPolicy::Expiring(Duration::minutes(30)));
        let now = Utc::now();
        let issued = tokens.issue_at("+15550001111", now).unwrap();

        assert!(tokens.verify_at(&issued.token, now + Duration::minutes(29)).is_ok());
        assert!(matches!(
            tokens.verify_at(&issued.token, now + Duration::minutes(30)),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_non_expiring_policy() {
        let tokens = service(TokenPolicy::NonExpiring);
        let now = Utc::now();
        let issued = tokens.issue_at("+15550001111", now).unwrap();

        assert!(issued.expires_at.is_none());
        assert_eq!(
            tokens.verify_at(&issued.token, now + Duration::days(365)).unwrap(),
            "+15550001111"
        );

        // Same secret, expiry switched on: tokens without exp no longer count
        let strict = service(TokenPolicy::default());
        assert!(strict.verify(&issued.token).is_err());
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        let tokens = service(TokenPolicy::default());
        for token in ["", "abc", "a.b", "a.b.c", "a.b.c.d", "..", "!!.!!.!!"] {
            assert!(matches!(tokens.verify(token), Err(AuthError::InvalidToken)));
        }
    }

    #[test]
    fn test_alg_none_rejected() {
        let tokens = service(TokenPolicy::NonExpiring);
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let claims = URL_SAFE_NO_PAD.encode(br#"{"sub":"+15550001111","iat":0}"#);

        assert!(tokens.verify(&format!("{}.{}.", header, claims)).is_err());
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            TokenService::new(SecretString::new(String::new()), TokenPolicy::default()),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn test_out_of_range_lifetime_is_an_error() {
        let ttl = Duration::days(365 * 300_000);
        assert!(matches!(
            TokenService::new(SecretString::new("secret".into()), TokenPolicy::Expiring(ttl)),
            Err(AuthError::Config(_))
        ));

        let tokens = service(TokenPolicy::default());
        assert!(matches!(
            tokens.issue_at("+15550001111", DateTime::<Utc>::MAX_UTC),
            Err(AuthError::Config(_))
        ));
    }
}
