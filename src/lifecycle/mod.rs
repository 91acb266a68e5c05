//! Server lifecycle coordination.
//!
//! A test targets either a bare address, a server somebody else keeps
//! running, or a factory that is started on an ephemeral port for the
//! duration of one request. Only the last kind is owned, and an owned
//! server is closed exactly once when the request settles.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{ConfigError, ServerCloseError};

pub const LOOPBACK: &str = "127.0.0.1";

/// A server that is bound and accepting connections.
#[async_trait]
pub trait RunningServer: Send + Sync {
    /// The bound address, or `None` when the server is not listening.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Stops the server. Closing a stopped server yields
    /// [`ServerCloseError::NotRunning`].
    async fn close(&self) -> Result<(), ServerCloseError>;
}

/// Something that can be started on demand.
pub trait Listen: Send + Sync {
    /// Starts listening on `addr` before returning.
    fn listen(&self, addr: SocketAddr) -> io::Result<Box<dyn RunningServer>>;
}

/// What a test is pointed at.
#[derive(Clone)]
pub enum ServerHandle {
    /// A full base address such as `http://localhost:8080`.
    Address(String),
    /// Externally managed; never closed by a test.
    Running(Arc<dyn RunningServer>),
    /// Started per test on an OS-assigned port and closed afterwards.
    Factory(Arc<dyn Listen>),
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerHandle::Address(address) => f.debug_tuple("Address").field(address).finish(),
            ServerHandle::Running(server) => f
                .debug_tuple("Running")
                .field(&server.local_addr())
                .finish(),
            ServerHandle::Factory(_) => f.write_str("Factory"),
        }
    }
}

impl From<&str> for ServerHandle {
    fn from(address: &str) -> Self {
        ServerHandle::Address(address.to_string())
    }
}

impl From<String> for ServerHandle {
    fn from(address: String) -> Self {
        ServerHandle::Address(address)
    }
}

/// Per-request lifecycle state: the resolved URL and the owned server, if any.
pub struct Lifecycle {
    url: String,
    owned: Mutex<Option<Box<dyn RunningServer>>>,
}

impl Lifecycle {
    /// Resolves the request URL for `path`, starting the server first when
    /// `handle` is a factory.
    pub fn resolve(
        handle: &ServerHandle,
        path: &str,
        host: Option<&str>,
        secure: bool,
    ) -> Result<Self, ConfigError> {
        let (url, owned) = match handle {
            ServerHandle::Address(address) => (format!("{address}{path}"), None),
            ServerHandle::Running(server) => {
                let addr = server.local_addr().ok_or(ConfigError::InvalidServer)?;
                (compose_url(addr, path, host, secure), None)
            }
            ServerHandle::Factory(factory) => {
                let server = factory
                    .listen(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
                    .map_err(|err| {
                        tracing::debug!(error = %err, "test server failed to listen");
                        ConfigError::InvalidServer
                    })?;
                let addr = server.local_addr().ok_or(ConfigError::InvalidServer)?;
                tracing::debug!(%addr, "started owned test server");
                // a freshly started plain listener cannot be secure
                (compose_url(addr, path, host, false), Some(server))
            }
        };

        Ok(Self {
            url,
            owned: Mutex::new(owned),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Closes the owned server, if there is one. Later calls are no-ops.
    /// "Already closed" failures are swallowed.
    pub async fn close_if_owned(&self) -> Result<(), ServerCloseError> {
        let Some(server) = self.owned.lock().await.take() else {
            return Ok(());
        };

        match server.close().await {
            Ok(()) => {
                tracing::debug!("closed owned test server");
                Ok(())
            }
            Err(err) if err.is_already_closed() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn compose_url(addr: SocketAddr, path: &str, host: Option<&str>, secure: bool) -> String {
    let scheme = if secure { "https" } else { "http" };
    let host = host.unwrap_or(LOOPBACK);
    format!("{scheme}://{host}:{}{path}", addr.port())
}
