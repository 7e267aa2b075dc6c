//! Request handlers for sync endpoints.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::RemoteStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tally_protocol::{
    ErrorResponse, ProbeRequest, ProbeResponse, PullRequest, PullResponse, PushRequest,
    PushResult, SyncableRecord, WireMessage, PROBE_PATH, PROTOCOL_VERSION, PULL_PATH, PUSH_PATH,
};
use tracing::{debug, warn};

/// An encoded HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerResponse {
    /// Status code.
    pub status: u16,
    /// JSON body.
    pub body: Vec<u8>,
}

impl ServerResponse {
    fn ok<M: WireMessage>(message: &M) -> ServerResult<Self> {
        Ok(Self {
            status: 200,
            body: message.encode()?,
        })
    }

    fn error(error: &ServerError) -> Self {
        let body = ErrorResponse::new(error.to_string())
            .encode()
            .unwrap_or_else(|_| error.to_string().into_bytes());
        Self {
            status: error.status_code(),
            body,
        }
    }
}

/// Context for request handling.
pub struct HandlerContext<R> {
    /// Server configuration.
    pub config: ServerConfig,
    validator: Option<TokenValidator>,
    accounts: RwLock<HashMap<String, Arc<RemoteStore<R>>>>,
}

impl<R: SyncableRecord> HandlerContext<R> {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig) -> Self {
        let validator = match (&config.auth_secret, config.require_auth) {
            (Some(secret), true) => Some(TokenValidator::new(
                AuthConfig::new(secret.clone()).with_expiry(config.token_expiry),
            )),
            _ => None,
        };
        Self {
            config,
            validator,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the token validator, if auth is enabled.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }

    /// Returns the store for `account`, creating it on first use.
    pub fn store(&self, account: &str) -> Arc<RemoteStore<R>> {
        if let Some(store) = self.accounts.read().get(account) {
            return Arc::clone(store);
        }
        Arc::clone(
            self.accounts
                .write()
                .entry(account.to_string())
                .or_insert_with(|| Arc::new(RemoteStore::new())),
        )
    }

    /// Returns the names of accounts that have stores.
    pub fn accounts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.accounts.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Handler for sync requests.
pub struct RequestHandler<R> {
    context: Arc<HandlerContext<R>>,
}

impl<R: SyncableRecord> RequestHandler<R> {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext<R>>) -> Self {
        Self { context }
    }

    /// Resolves the account a request acts for.
    ///
    /// With auth disabled every request acts for
    /// [`ServerConfig::DEFAULT_ACCOUNT`].
    pub fn authenticate(&self, bearer: Option<&str>) -> ServerResult<String> {
        match self.context.validator() {
            None => Ok(ServerConfig::DEFAULT_ACCOUNT.to_string()),
            Some(validator) => {
                let token =
                    bearer.ok_or_else(|| ServerError::NotAuthorized("missing token".into()))?;
                validator.validate(token)
            }
        }
    }

    /// Handles a version probe.
    pub fn handle_probe(&self, account: &str, request: ProbeRequest) -> ServerResult<ProbeResponse> {
        if request.protocol_version != PROTOCOL_VERSION {
            return Err(ServerError::ProtocolMismatch {
                server: PROTOCOL_VERSION,
                client: request.protocol_version,
            });
        }
        Ok(ProbeResponse::new(self.context.store(account).version()))
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, account: &str, request: PullRequest) -> ServerResult<PullResponse<R>> {
        let store = self.context.store(account);
        let version = store.version();
        let records = store.changed_since(request.since);
        debug!(account, since = request.since, count = records.len(), "pull");
        Ok(PullResponse::new(records, version))
    }

    /// Handles a push request.
    pub fn handle_push(&self, account: &str, request: PushRequest<R>) -> ServerResult<PushResult> {
        let max = self.context.config.max_push_batch;
        if request.records.len() > max {
            return Err(ServerError::BatchTooLarge {
                size: request.records.len(),
                max,
            });
        }
        let result = self.context.store(account).apply(request.records);
        debug!(
            account,
            accepted = result.accepted_count,
            rejected = result.rejected_ids.len(),
            "push"
        );
        Ok(result)
    }

    /// Decodes, authenticates and dispatches a `POST`.
    ///
    /// Errors are encoded as an [`ErrorResponse`] body with a matching status.
    pub fn handle_post(&self, path: &str, body: &[u8], bearer: Option<&str>) -> ServerResponse {
        match self.dispatch(path, body, bearer) {
            Ok(response) => response,
            Err(e) => {
                if e.is_server_error() {
                    warn!(path, error = %e, "request failed");
                } else {
                    debug!(path, error = %e, "request refused");
                }
                ServerResponse::error(&e)
            }
        }
    }

    fn dispatch(
        &self,
        path: &str,
        body: &[u8],
        bearer: Option<&str>,
    ) -> ServerResult<ServerResponse> {
        let max = self.context.config.max_body_bytes;
        if body.len() > max {
            return Err(ServerError::BodyTooLarge {
                size: body.len(),
                max,
            });
        }
        let account = self.authenticate(bearer)?;

        match path {
            PROBE_PATH => {
                let response = self.handle_probe(&account, ProbeRequest::decode(body)?)?;
                ServerResponse::ok(&response)
            }
            PULL_PATH => {
                let response = self.handle_pull(&account, PullRequest::decode(body)?)?;
                ServerResponse::ok(&response)
            }
            PUSH_PATH => {
                let response = self.handle_push(&account, PushRequest::decode(body)?)?;
                ServerResponse::ok(&response)
            }
            other => Err(ServerError::UnknownEndpoint(other.to_string())),
        }
    }
}
