use std::{path::Path, sync::Arc, time::Duration};

use tokio::net::UnixListener;
use unix::{SocketGuard, bind, run_unix};

mod client;
pub mod protocol;
mod unix;

pub use client::{CheckerClient, CheckerConnection, ClientError, FailurePolicy, user_from_basic_auth};

/// Answers whether `domain` is blocked for `user`.
pub trait BlockChecker: Send + Sync + 'static {
    fn is_blocked(&self, user: &str, domain: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Read and write timeout applied to every connection.
    pub timeout: Duration,
    /// Largest accepted request payload in bytes.
    pub max_request_size: usize,
    /// Permission bits applied to the socket file after binding.
    pub socket_mode: Option<u32>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_request_size: protocol::DEFAULT_MAX_REQUEST_SIZE,
            socket_mode: None,
        }
    }
}

/// Blocklist query server on a Unix domain socket.
///
/// The socket file is removed when the server is dropped.
pub struct QueryServer<C: ?Sized> {
    listener: UnixListener,
    guard: SocketGuard,
    checker: Arc<C>,
    options: ServerOptions,
}

impl<C: BlockChecker + ?Sized> QueryServer<C> {
    /// Bind to `path`. A stale socket left at that path is replaced.
    pub fn bind(
        path: impl AsRef<Path>,
        checker: Arc<C>,
        options: ServerOptions,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let listener = bind(path, options.socket_mode)?;

        Ok(Self {
            listener,
            guard: SocketGuard(path.to_path_buf()),
            checker,
            options,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.guard.0
    }

    /// Serve connections until the returned future is dropped.
    pub async fn run(self) -> anyhow::Result<()> {
        run_unix(
            &self.listener,
            self.socket_path(),
            self.checker.clone(),
            self.options.clone(),
        )
        .await
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod server_tests;
