//! Relay orchestration.
//!
//! Every message operation checks the access key first, then the bearer
//! token, then that the token's subject is still a registered identity. The
//! sender of a message is always the token subject.

use crate::error::RelayError;
use message_store::{Message, MessageReceipt, MessageStore};
use relay_auth::{
    normalize_phone_number, AccessKeys, CredentialStore, Identity, IssuedToken, TokenService,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Caller-supplied credentials for message operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials<'a> {
    pub access_key: Option<&'a str>,
    pub bearer_token: Option<&'a str>,
}

pub struct Relay {
    credentials: Arc<CredentialStore>,
    tokens: TokenService,
    access_keys: AccessKeys,
    messages: Arc<MessageStore>,
}

impl Relay {
    pub fn new(
        credentials: Arc<CredentialStore>,
        tokens: TokenService,
        access_keys: AccessKeys,
        messages: Arc<MessageStore>,
    ) -> Self {
        Self {
            credentials,
            tokens,
            access_keys,
            messages,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Register a new identity.
    pub async fn register(&self, phone_number: &str, password: &str) -> Result<Identity, RelayError> {
        Ok(self.credentials.register(phone_number, password).await?)
    }

    /// Exchange a phone number and password for a bearer token.
    pub async fn login(&self, phone_number: &str, password: &str) -> Result<IssuedToken, RelayError> {
        let identity = self
            .credentials
            .verify(phone_number, password)
            .await?
            .ok_or(RelayError::Unauthorized)?;

        let issued = self.tokens.issue(&identity.principal)?;
        info!(phone_number = %identity.principal, "Token issued");
        Ok(issued)
    }

    /// Resolve the calling identity.
    async fn authenticate(&self, creds: Credentials<'_>) -> Result<Identity, RelayError> {
        let access_key = creds.access_key.ok_or(RelayError::Forbidden)?;
        if !self.access_keys.verify(access_key) {
            warn!("Rejected request with invalid access key");
            return Err(RelayError::Forbidden);
        }

        let token = creds.bearer_token.ok_or(RelayError::Unauthorized)?;
        let principal = self.tokens.verify(token)?;

        self.credentials.find(&principal).await.ok_or_else(|| {
            warn!(phone_number = %principal, "Token subject is not a registered identity");
            RelayError::Unauthorized
        })
    }

    /// Store a message from the caller to `recipient`.
    #[instrument(skip(self, creds, payload), fields(payload_len = payload.len()))]
    pub async fn send(
        &self,
        creds: Credentials<'_>,
        recipient: &str,
        payload: Vec<u8>,
        ttl_seconds: i64,
    ) -> Result<MessageReceipt, RelayError> {
        let sender = self.authenticate(creds).await?;
        let recipient = normalize_phone_number(recipient)?;

        let receipt = self
            .messages
            .put(&sender.principal, &recipient, payload, ttl_seconds)
            .await?;

        info!(
            message_id = %receipt.id,
            sender = %sender.principal,
            recipient = %recipient,
            "Message accepted"
        );
        Ok(receipt)
    }

    /// Take the oldest pending message for the caller. Destructive.
    pub async fn receive(&self, creds: Credentials<'_>) -> Result<Message, RelayError> {
        let recipient = self.authenticate(creds).await?;

        match self.messages.take_for_recipient(&recipient.principal).await? {
            Some(message) => {
                info!(message_id = %message.id, recipient = %recipient.principal, "Message delivered");
                Ok(message)
            }
            None => {
                debug!(recipient = %recipient.principal, "No pending message");
                Err(RelayError::NotFound)
            }
        }
    }

    /// Whether a message is waiting for the caller. Never consumes anything.
    pub async fn status(&self, creds: Credentials<'_>) -> Result<bool, RelayError> {
        let recipient = self.authenticate(creds).await?;
        Ok(self.messages.exists_for_recipient(&recipient.principal).await)
    }
}
