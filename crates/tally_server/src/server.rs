//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler, ServerResponse};
use crate::store::RemoteStore;
use std::sync::Arc;
use tally_protocol::SyncableRecord;

/// The sync server.
///
/// Holds one [`RemoteStore`] per account and answers probe, pull and push
/// requests. It is transport-agnostic: an HTTP front end (or a loopback
/// client in tests) passes each `POST` to [`SyncServer::handle_post`].
///
/// # Example
///
/// ```
/// use tally_protocol::{LedgerRecord, ProbeRequest, ProbeResponse, WireMessage, PROBE_PATH};
/// use tally_server::{ServerConfig, SyncServer};
///
/// let server: SyncServer<LedgerRecord> = SyncServer::new(ServerConfig::default());
/// let body = ProbeRequest::new().encode().unwrap();
///
/// let response = server.handle_post(PROBE_PATH, &body, None);
/// assert_eq!(response.status, 200);
/// assert_eq!(ProbeResponse::decode(&response.body).unwrap().version, 0);
/// ```
pub struct SyncServer<R> {
    handler: RequestHandler<R>,
    context: Arc<HandlerContext<R>>,
}

impl<R: SyncableRecord> SyncServer<R> {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        let context = Arc::new(HandlerContext::new(config));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Returns the request handler.
    pub fn handler(&self) -> &RequestHandler<R> {
        &self.handler
    }

    /// Handles an encoded `POST`.
    pub fn handle_post(&self, path: &str, body: &[u8], bearer: Option<&str>) -> ServerResponse {
        self.handler.handle_post(path, body, bearer)
    }

    /// Issues a token for `account`.
    ///
    /// # Errors
    ///
    /// Fails if auth is not enabled.
    pub fn issue_token(&self, account: &str) -> ServerResult<String> {
        self.context
            .validator()
            .ok_or_else(|| ServerError::InvalidRequest("authentication is disabled".into()))?
            .create_token(account)
    }

    /// Returns the store for `account`.
    pub fn store(&self, account: &str) -> Arc<RemoteStore<R>> {
        self.context.store(account)
    }

    /// Returns the store used when auth is disabled.
    pub fn default_store(&self) -> Arc<RemoteStore<R>> {
        self.store(ServerConfig::DEFAULT_ACCOUNT)
    }

    /// Returns the names of accounts that have stores.
    pub fn accounts(&self) -> Vec<String> {
        self.context.accounts()
    }
}

impl<R> std::fmt::Debug for SyncServer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("config", &self.context.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_protocol::{
        LedgerRecord, PullRequest, PullResponse, PushRequest, PushResult, RecordId, Transaction,
        WireMessage, PULL_PATH, PUSH_PATH,
    };

    fn txn(id: &str, updated_at: i64, deleted: bool) -> LedgerRecord {
        LedgerRecord::from(Transaction {
            id: RecordId::from(id),
            updated_at,
            is_deleted: deleted,
            ..Default::default()
        })
    }

    #[test]
    fn full_sync_flow() {
        let server: SyncServer<LedgerRecord> = SyncServer::new(ServerConfig::default());

        let push = PushRequest::new(vec![txn("1", 100, false), txn("2", 200, false)]);
        let response = server.handle_post(PUSH_PATH, &push.encode().unwrap(), None);
        assert_eq!(PushResult::decode(&response.body).unwrap().accepted_count, 2);

        // A second device deletes record 1 later.
        let push = PushRequest::new(vec![txn("1", 150, true)]);
        server.handle_post(PUSH_PATH, &push.encode().unwrap(), None);

        let response = server.handle_post(PULL_PATH, &PullRequest::new(0).encode().unwrap(), None);
        let pulled: PullResponse<LedgerRecord> = PullResponse::decode(&response.body).unwrap();
        assert_eq!(pulled.records, vec![txn("1", 150, true), txn("2", 200, false)]);
        assert_eq!(pulled.version, 200);
        assert_eq!(server.default_store().len(), 2);
    }

    #[test]
    fn tokens_need_auth_enabled() {
        let open: SyncServer<LedgerRecord> = SyncServer::new(ServerConfig::default());
        assert!(open.issue_token("alice").is_err());

        let secured: SyncServer<LedgerRecord> =
            SyncServer::new(ServerConfig::new().with_auth(b"secret".to_vec()));
        let token = secured.issue_token("alice").unwrap();
        assert_eq!(secured.handler().authenticate(Some(&token)).unwrap(), "alice");
    }

    #[test]
    fn debug_hides_secret() {
        let server: SyncServer<LedgerRecord> =
            SyncServer::new(ServerConfig::new().with_auth(b"hunter2".to_vec()));
        let debug = format!("{server:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("104, 117"));
    }
}
