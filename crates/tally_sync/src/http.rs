//! HTTP endpoint implementation.
//!
//! The remote speaks JSON over `POST`. The actual HTTP client is abstracted
//! via [`HttpClient`] so tests can route requests straight into an
//! in-process server.

use crate::config::{Credentials, SyncConfig};
use crate::endpoint::RemoteEndpoint;
use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::time::Duration;
use tally_protocol::{
    ErrorResponse, ProbeRequest, ProbeResponse, PullRequest, PullResponse, PushRequest,
    PushResult, SyncableRecord, Timestamp, WireMessage, PROBE_PATH, PULL_PATH, PUSH_PATH,
};
use tracing::debug;

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations map connection failures to [`SyncError::Network`] and
/// expired deadlines to [`SyncError::Timeout`]; any status code, including
/// errors, is returned as an [`HttpResponse`].
pub trait HttpClient: Send + Sync {
    /// Sends a JSON `POST` with an optional bearer token.
    fn post(&self, url: &str, body: Vec<u8>, bearer: Option<&str>) -> SyncResult<HttpResponse>;
}

/// Blocking [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn post(&self, url: &str, body: Vec<u8>, bearer: Option<&str>) -> SyncResult<HttpResponse> {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json")
            .body(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(map_reqwest_error)?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::Network(error.to_string())
    }
}

/// HTTP-based remote endpoint.
pub struct HttpRemote<C: HttpClient, R> {
    /// Base URL of the remote (e.g., "https://sync.example.com").
    base_url: String,
    client: C,
    credentials: RwLock<Option<Credentials>>,
    _record: PhantomData<fn() -> R>,
}

impl<C: HttpClient, R: SyncableRecord> HttpRemote<C, R> {
    /// Creates a new HTTP remote.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            credentials: RwLock::new(None),
            _record: PhantomData,
        }
    }

    /// Attaches credentials to every call.
    #[must_use]
    pub fn with_credentials(self, credentials: Option<Credentials>) -> Self {
        *self.credentials.write() = credentials;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post_json<Req, Res>(&self, path: &str, request: &Req) -> SyncResult<Res>
    where
        Req: WireMessage,
        Res: WireMessage,
    {
        let body = request.encode()?;
        let url = format!("{}{}", self.base_url, path);
        let credentials = self.credentials.read().clone();

        let response = self
            .client
            .post(&url, body, credentials.as_ref().map(Credentials::expose))?;
        debug!(%url, status = response.status, bytes = response.body.len(), "remote response");

        if response.is_success() {
            return Ok(Res::decode(&response.body)?);
        }

        let message = ErrorResponse::decode(&response.body)
            .map(|e| e.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(&response.body).into_owned());
        match response.status {
            401 | 403 => Err(SyncError::Auth(message)),
            status => Err(SyncError::Server { status, message }),
        }
    }
}

impl<R: SyncableRecord> HttpRemote<ReqwestClient, R> {
    /// Builds a reqwest-backed remote from a sync configuration.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let client = ReqwestClient::new(config.request_timeout)?;
        Ok(Self::new(config.endpoint_url.clone(), client)
            .with_credentials(config.credentials.clone()))
    }
}

impl<C: HttpClient, R: SyncableRecord> RemoteEndpoint for HttpRemote<C, R> {
    type Record = R;

    fn probe_version(&self) -> SyncResult<Timestamp> {
        let response: ProbeResponse = self.post_json(PROBE_PATH, &ProbeRequest::new())?;
        response.check_version()?;
        Ok(response.version)
    }

    fn pull(&self, since: Timestamp) -> SyncResult<Vec<R>> {
        let response: PullResponse<R> = self.post_json(PULL_PATH, &PullRequest::new(since))?;
        Ok(response.records)
    }

    fn push(&self, records: Vec<R>) -> SyncResult<PushResult> {
        self.post_json(PUSH_PATH, &PushRequest::new(records))
    }

    fn set_credentials(&self, credentials: Option<Credentials>) {
        *self.credentials.write() = credentials;
    }
}

impl<C: HttpClient, R> std::fmt::Debug for HttpRemote<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("credentials", &*self.credentials.read())
            .finish_non_exhaustive()
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a `POST` and returns the response.
    fn handle_post(&self, path: &str, body: &[u8], bearer: Option<&str>) -> HttpResponse;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
#[derive(Debug)]
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, bearer: Option<&str>) -> SyncResult<HttpResponse> {
        let path = url.find("/sync/").map_or(url, |i| &url[i..]);
        Ok(self.server.handle_post(path, &body, bearer))
    }
}
