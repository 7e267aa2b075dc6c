//! Configuration for the sync engine.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque account credentials attached to every remote call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(String);

impl Credentials {
    /// Wraps a bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if the token is blank.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credentials").field(&"[REDACTED]").finish()
    }
}

/// Configuration for sync operations.
///
/// Deserializes from the camelCase JSON the host application stores:
///
/// ```json
/// { "cloudSyncEnabled": true, "syncIntervalSeconds": 300, "endpointCredentials": "..." }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Master switch for automatic sync.
    pub cloud_sync_enabled: bool,
    /// Period of the automatic sync timer.
    #[serde(rename = "syncIntervalSeconds", with = "seconds")]
    pub sync_interval: Duration,
    /// Account credentials; automatic sync stays off without them.
    #[serde(rename = "endpointCredentials", skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// Base URL of the remote endpoint.
    pub endpoint_url: String,
    /// Upper bound on each network call.
    #[serde(rename = "requestTimeoutSeconds", with = "seconds")]
    pub request_timeout: Duration,
    /// Quiet period after a local mutation before syncing.
    #[serde(rename = "debounceMillis", with = "millis")]
    pub debounce: Duration,
    /// How long automatic sync pauses after an authentication failure.
    #[serde(rename = "authBackoffSeconds", with = "seconds")]
    pub auth_backoff: Duration,
    /// Most records sent in one push request.
    pub push_batch_size: usize,
    /// Every this many timer ticks the runner reconciles the full dataset;
    /// 0 never does.
    #[serde(rename = "fullSyncEveryTicks")]
    pub full_sync_every: u32,
    /// Backoff after failed cycles.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration for the given endpoint with sync disabled.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Self::default()
        }
    }

    /// Parses the JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Turns automatic sync on or off.
    pub fn with_cloud_sync(mut self, enabled: bool) -> Self {
        self.cloud_sync_enabled = enabled;
        self
    }

    /// Sets the account credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the sync interval for automatic sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the mutation debounce.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the pause after an authentication failure.
    pub fn with_auth_backoff(mut self, backoff: Duration) -> Self {
        self.auth_backoff = backoff;
        self
    }

    /// Sets how many records go into one push request.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Sets how many timer ticks pass between full calibrations.
    pub fn with_full_sync_every(mut self, ticks: u32) -> Self {
        self.full_sync_every = ticks;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns true if usable credentials are configured.
    pub fn has_credentials(&self) -> bool {
        self.credentials.as_ref().is_some_and(|c| !c.is_blank())
    }

    /// Returns true if mutation and timer triggers may start a sync.
    ///
    /// Missing credentials force automatic mode off even when enabled.
    pub fn automatic_enabled(&self) -> bool {
        self.cloud_sync_enabled && self.has_credentials()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cloud_sync_enabled: false,
            sync_interval: Duration::from_secs(300),
            credentials: None,
            endpoint_url: String::new(),
            request_timeout: Duration::from_secs(30),
            debounce: Duration::from_secs(2),
            auth_backoff: Duration::from_secs(15 * 60),
            push_batch_size: 500,
            full_sync_every: 12,
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff after failed cycles.
///
/// [`SyncEngine::sync_with_retry`](crate::SyncEngine::sync_with_retry) waits
/// these delays between attempts. The auto-sync runner holds mutation and
/// timer triggers for the same delays while retryable failures repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Attempts per `sync_with_retry` call, the first one included.
    pub max_attempts: u32,
    /// Delay after the first failure.
    #[serde(rename = "initialDelayMillis", with = "millis")]
    pub initial_delay: Duration,
    /// Longest delay.
    #[serde(rename = "maxDelaySeconds", with = "seconds")]
    pub max_delay: Duration,
    /// Growth per consecutive failure.
    pub multiplier: f64,
    /// Stretch each delay by up to a quarter, at random.
    pub jitter: bool,
}

impl RetryConfig {
    /// Creates a configuration allowing `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(10 * 60),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Single attempts and no hold between cycles.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Sets the delay after the first failure.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the longest delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth per consecutive failure.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay after `failures` consecutive failed cycles; zero for none.
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let secs = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        if self.jitter && secs > 0.0 {
            Duration::from_secs_f64(secs * (1.0 + rand::thread_rng().gen_range(0.0..0.25)))
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
