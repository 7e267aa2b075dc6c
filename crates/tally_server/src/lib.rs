//! # Tally Sync Server
//!
//! Reference remote endpoint for Tally sync.
//!
//! This crate provides:
//! - Probe, pull and push handlers behind a single `handle_post` entry point
//! - Per-account record storage under the last-writer-wins rule
//! - Authentication (HMAC-SHA256 account tokens with expiry)
//!
//! # Architecture
//!
//! The server stores records as documents keyed by id and never looks
//! inside the payload. Pushes are merged with the same decision function
//! the clients use, so devices converge whatever order they push in.
//!
//! # Authentication
//!
//! Authentication is optional. When enabled, every request carries a bearer
//! token naming the account it acts for:
//!
//! ```rust
//! use tally_protocol::LedgerRecord;
//! use tally_server::{ServerConfig, SyncServer};
//!
//! let config = ServerConfig::default().with_auth(b"my-secure-secret".to_vec());
//! let server: SyncServer<LedgerRecord> = SyncServer::new(config);
//!
//! let token = server.issue_token("alice").unwrap();
//! assert_eq!(server.handler().authenticate(Some(&token)).unwrap(), "alice");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;
mod store;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler, ServerResponse};
pub use server::SyncServer;
pub use store::RemoteStore;
