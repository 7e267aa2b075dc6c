//! Server configuration.

use std::time::Duration;

/// Configuration for the sync server.
#[derive(Clone)]
pub struct ServerConfig {
    /// Maximum records accepted in one push.
    pub max_push_batch: usize,
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
    /// Whether to require authentication.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// How long an issued token stays valid.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Account used for every request when auth is off.
    pub const DEFAULT_ACCOUNT: &'static str = "default";

    /// Creates a new server configuration.
    pub fn new() -> Self {
        Self {
            max_push_batch: 1000,
            max_body_bytes: 8 * 1024 * 1024,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Sets the maximum request body size.
    pub fn with_max_body_bytes(mut self, size: usize) -> Self {
        self.max_body_bytes = size;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("max_push_batch", &self.max_push_batch)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("require_auth", &self.require_auth)
            .field("auth_secret", &self.auth_secret.as_ref().map(|_| "[REDACTED]"))
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
