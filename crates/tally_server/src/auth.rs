//! Authentication support for the sync server.
//!
//! Tokens are bearer strings of the form `{account}.{issuedAt}.{signature}`,
//! where `issuedAt` is Unix millis and `signature` is the hex-encoded
//! HMAC-SHA256 of `{account}.{issuedAt}` under the server secret.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"[REDACTED]")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// Issues and checks account tokens.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token for `account`, issued now.
    pub fn create_token(&self, account: &str) -> ServerResult<String> {
        self.create_token_at(account, now_millis())
    }

    /// Creates a token for `account` issued at `issued_at` (Unix millis).
    pub fn create_token_at(&self, account: &str, issued_at: u64) -> ServerResult<String> {
        if account.is_empty() {
            return Err(ServerError::InvalidRequest("empty account".into()));
        }
        let payload = format!("{account}.{issued_at}");
        let signature = self.mac(&payload)?.finalize().into_bytes();
        Ok(format!("{payload}.{}", hex::encode(signature)))
    }

    /// Validates a token and returns the account it was issued for.
    pub fn validate(&self, token: &str) -> ServerResult<String> {
        self.validate_at(token, now_millis())
    }

    /// Validates a token against the clock value `now` (Unix millis).
    pub fn validate_at(&self, token: &str, now: u64) -> ServerResult<String> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(signature), Some(issued_at), Some(account)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ServerError::NotAuthorized("malformed token".into()));
        };
        if account.is_empty() {
            return Err(ServerError::NotAuthorized("malformed token".into()));
        }

        let signature = hex::decode(signature)
            .map_err(|_| ServerError::NotAuthorized("malformed signature".into()))?;
        let mac = self.mac(&format!("{account}.{issued_at}"))?;
        mac.verify_slice(&signature)
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        let issued_at: u64 = issued_at
            .parse()
            .map_err(|_| ServerError::NotAuthorized("malformed timestamp".into()))?;
        let expiry = self.config.token_expiry.as_millis() as u64;
        if now > issued_at.saturating_add(expiry) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }

        Ok(account.to_string())
    }

    fn mac(&self, payload: &str) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
