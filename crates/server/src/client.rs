use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    time::timeout,
};

use crate::protocol::{CheckRequest, CheckResponse, ProtocolError, encode_request};

/// What a caller should assume when the checker cannot answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Let the query through (fail-open).
    #[default]
    Allow,
    /// Treat the query as blocked (fail-closed).
    Block,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("checker unreachable at {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("checker connection failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("checker rejected the request")]
    Rejected,
    #[error("checker did not answer within {0:?}")]
    TimedOut(Duration),
}

/// Client for the blocklist query server.
#[derive(Debug, Clone)]
pub struct CheckerClient {
    socket_path: PathBuf,
    timeout: Duration,
    on_failure: FailurePolicy,
}

impl CheckerClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(5),
            on_failure: FailurePolicy::default(),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn with_failure_policy(self, on_failure: FailurePolicy) -> Self {
        Self { on_failure, ..self }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Open a connection that can be reused for several checks.
    pub async fn connect(&self) -> Result<CheckerConnection, ClientError> {
        let connect = UnixStream::connect(&self.socket_path);
        let stream = match timeout(self.timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ClientError::Connect {
                    path: self.socket_path.clone(),
                    source,
                });
            }
            Err(_) => return Err(ClientError::TimedOut(self.timeout)),
        };

        Ok(CheckerConnection {
            stream,
            timeout: self.timeout,
        })
    }

    /// Check a single query over a fresh connection.
    pub async fn check(&self, user: &str, domain: &str) -> Result<bool, ClientError> {
        let mut conn = self.connect().await?;
        conn.check(user, domain).await
    }

    /// Like [`CheckerClient::check`], with failures resolved by the failure policy.
    pub async fn is_blocked(&self, user: &str, domain: &str) -> bool {
        match self.check(user, domain).await {
            Ok(blocked) => blocked,
            Err(e) => {
                let blocked = self.on_failure == FailurePolicy::Block;
                tracing::warn!(
                    "Blocklist check for {} failed, treating {} as {}: {}",
                    user,
                    domain,
                    if blocked { "blocked" } else { "allowed" },
                    e
                );
                blocked
            }
        }
    }
}

/// An open connection to the query server.
///
/// After any error the connection should be discarded.
#[derive(Debug)]
pub struct CheckerConnection {
    stream: UnixStream,
    timeout: Duration,
}

impl CheckerConnection {
    pub async fn check(&mut self, user: &str, domain: &str) -> Result<bool, ClientError> {
        let frame = encode_request(&CheckRequest::new(user, domain))?;

        let limit = self.timeout;
        let stream = &mut self.stream;
        let exchange = async {
            stream.write_all(&frame).await?;
            stream.read_u8().await
        };

        let byte = match timeout(limit, exchange).await {
            Ok(res) => res?,
            Err(_) => return Err(ClientError::TimedOut(limit)),
        };

        match CheckResponse::from_byte(byte)? {
            CheckResponse::Allowed => Ok(false),
            CheckResponse::Blocked => Ok(true),
            CheckResponse::Error => Err(ClientError::Rejected),
        }
    }
}

/// Extract the user name from an `Authorization: Basic ...` header value.
pub fn user_from_basic_auth(header: &str) -> Option<String> {
    let (scheme, credentials) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(credentials.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;

    let user = match decoded.split_once(':') {
        Some((user, _)) => user,
        None => decoded.as_str(),
    };

    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_from_basic_auth() {
        // "alice:secret"
        assert_eq!(
            user_from_basic_auth("Basic YWxpY2U6c2VjcmV0").as_deref(),
            Some("alice")
        );
        // "bob@example.org:p:w"
        assert_eq!(
            user_from_basic_auth("basic  Ym9iQGV4YW1wbGUub3JnOnA6dw==").as_deref(),
            Some("bob@example.org")
        );
    }

    #[test]
    fn test_user_from_basic_auth_rejects() {
        assert!(user_from_basic_auth("Bearer YWxpY2U6c2VjcmV0").is_none());
        assert!(user_from_basic_auth("Basic").is_none());
        assert!(user_from_basic_auth("Basic !!!").is_none());
        // ":secret"
        assert!(user_from_basic_auth("Basic OnNlY3JldA==").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_checker_uses_failure_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sock");

        let client = CheckerClient::new(&path);
        assert!(matches!(
            client.check("alice", "a.com").await,
            Err(ClientError::Connect { .. })
        ));
        assert!(!client.is_blocked("alice", "a.com").await);

        let client = client.with_failure_policy(FailurePolicy::Block);
        assert!(client.is_blocked("alice", "a.com").await);
    }
}
