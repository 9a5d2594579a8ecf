//! Key-value store seam.
//!
//! The loader only needs two things from a store: a way to obtain a client
//! handle for an endpoint address ([`ClientFactory`]) and a way to write one
//! key ([`KvClient::set`]). [`memcache`] provides the production client and
//! [`registry`] caches one handle per endpoint for the whole run.

pub mod memcache;
pub mod registry;

use std::io;
use thiserror::Error;

pub use memcache::{MemcacheClient, MemcacheFactory, Timeouts};
pub use registry::ConnectionRegistry;

/// A failed write of a single key.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error talking to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server error from {addr}: {message}")]
    Server { addr: String, message: String },

    #[error("unexpected response from {addr}: {line:?}")]
    UnexpectedResponse { addr: String, line: String },

    #[error("client error from {addr}: {message}")]
    Client { addr: String, message: String },

    #[error("item not stored: {key}")]
    NotStored { key: String },

    #[error("malformed key: {key:?}")]
    MalformedKey { key: String },
}

impl StoreError {
    /// Server or connection fault: the handle for this endpoint should be
    /// dropped and re-created on next use.
    #[must_use]
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::Io { .. }
                | Self::Server { .. }
                | Self::UnexpectedResponse { .. }
        )
    }
}

/// Client handle for one store endpoint.
///
/// A handle is shared by every batch task targeting the endpoint, so
/// implementations must be safe to call concurrently.
pub trait KvClient: Send + Sync {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

/// Creates client handles.
///
/// `create` runs under the registry's write lock and must not perform
/// network I/O; clients connect lazily on first `set`.
pub trait ClientFactory: Send + Sync {
    type Client: KvClient;

    fn create(&self, addr: &str) -> Self::Client;
}
