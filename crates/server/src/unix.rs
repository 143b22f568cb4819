use std::{
    fmt, fs, io,
    os::unix::fs::{FileTypeExt, PermissionsExt},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::AsyncWriteExt,
    net::{UnixListener, UnixStream},
    time::timeout,
};

use crate::{
    BlockChecker, ServerOptions,
    protocol::{CheckResponse, FrameError, ProtocolError, decode_request, read_frame},
};

/// The I/O step a connection was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    ReadingRequest,
    WritingResponse,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReadingRequest => "reading request",
            Self::WritingResponse => "writing response",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConnectionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("i/o error while {state}: {source}")]
    Transport {
        state: ConnectionState,
        #[source]
        source: io::Error,
    },
    #[error("timed out while {0}")]
    TimedOut(ConnectionState),
}

/// Bind the listening socket, replacing a stale socket file left by a previous run.
pub(crate) fn bind(path: &Path, socket_mode: Option<u32>) -> anyhow::Result<UnixListener> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            tracing::debug!("Removing stale socket {}", path.display());
            fs::remove_file(path)?;
        }
        Ok(_) => anyhow::bail!("{} exists and is not a socket", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = UnixListener::bind(path)?;

    if let Some(mode) = socket_mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }

    Ok(listener)
}

/// Accept connections forever, one task per connection.
pub(crate) async fn run_unix<C>(
    listener: &UnixListener,
    path: &Path,
    checker: Arc<C>,
    options: ServerOptions,
) -> anyhow::Result<()>
where
    C: BlockChecker + ?Sized,
{
    tracing::info!("Query server listening on {}", path.display());

    let next_id = AtomicU64::new(1);

    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let id = next_id.fetch_add(1, Ordering::Relaxed);
        let checker = checker.clone();
        let options = options.clone();

        tokio::spawn(async move {
            match handle_connection(stream, checker.as_ref(), &options).await {
                Ok(()) => tracing::trace!("Connection {} closed by client", id),
                Err(ConnectionError::Transport { state, source })
                    if source.kind() == io::ErrorKind::UnexpectedEof =>
                {
                    tracing::debug!("Connection {} disconnected while {}", id, state);
                }
                Err(e) => tracing::warn!("Connection {} closed: {}", id, e),
            }
        });
    }
}

async fn handle_connection<C>(
    mut stream: UnixStream,
    checker: &C,
    options: &ServerOptions,
) -> Result<(), ConnectionError>
where
    C: BlockChecker + ?Sized,
{
    loop {
        let state = ConnectionState::ReadingRequest;
        let frame = match timeout(
            options.timeout,
            read_frame(&mut stream, options.max_request_size),
        )
        .await
        {
            Err(_) => return Err(ConnectionError::TimedOut(state)),
            Ok(Ok(None)) => return Ok(()),
            Ok(Ok(Some(frame))) => frame,
            Ok(Err(FrameError::Io(source))) => {
                return Err(ConnectionError::Transport { state, source });
            }
            Ok(Err(FrameError::Protocol(e))) => {
                reject(&mut stream, options).await;
                return Err(e.into());
            }
        };

        let request = match decode_request(&frame) {
            Ok(request) => request,
            Err(e) => {
                reject(&mut stream, options).await;
                return Err(e.into());
            }
        };

        let blocked = checker.is_blocked(&request.user, &request.domain);
        tracing::debug!(
            "Checked {} for {}: {}",
            request.domain,
            request.user,
            if blocked { "blocked" } else { "allowed" }
        );

        write_response(&mut stream, CheckResponse::from(blocked), options).await?;
    }
}

async fn write_response(
    stream: &mut UnixStream,
    response: CheckResponse,
    options: &ServerOptions,
) -> Result<(), ConnectionError> {
    let state = ConnectionState::WritingResponse;

    match timeout(options.timeout, stream.write_all(&[response.as_byte()])).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(ConnectionError::Transport { state, source }),
        Err(_) => Err(ConnectionError::TimedOut(state)),
    }
}

/// Best effort error reply before the connection is dropped.
async fn reject(stream: &mut UnixStream, options: &ServerOptions) {
    if let Err(e) = write_response(stream, CheckResponse::Error, options).await {
        tracing::debug!("Failed to send error response: {}", e);
    }
}

/// Owns the socket file for the lifetime of the listener.
pub(crate) struct SocketGuard(pub(crate) PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.0) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove socket {}: {}", self.0.display(), e);
            }
        }
    }
}
