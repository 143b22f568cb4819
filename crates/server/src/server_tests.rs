#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc, time::Duration};

    use tempfile::TempDir;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::UnixStream,
        task::JoinHandle,
    };

    use crate::{
        BlockChecker, CheckerClient, ClientError, QueryServer, ServerOptions,
        protocol::{CheckRequest, encode_request},
    };

    /// Blocks `blocked.com` for `alice` only.
    struct AliceChecker;

    impl BlockChecker for AliceChecker {
        fn is_blocked(&self, user: &str, domain: &str) -> bool {
            user == "alice" && domain == "blocked.com"
        }
    }

    fn start(options: ServerOptions) -> (TempDir, PathBuf, JoinHandle<anyhow::Result<()>>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check.sock");
        let server = QueryServer::bind(&path, Arc::new(AliceChecker), options).unwrap();
        let handle = tokio::spawn(server.run());
        (dir, path, handle)
    }

    #[tokio::test]
    async fn test_one_check_per_connection() {
        let (_dir, path, _handle) = start(ServerOptions::default());
        let client = CheckerClient::new(&path);

        assert!(client.check("alice", "blocked.com").await.unwrap());
        assert!(!client.check("alice", "fine.com").await.unwrap());
        assert!(!client.check("bob", "blocked.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_persistent_connection() {
        let (_dir, path, _handle) = start(ServerOptions::default());
        let mut conn = CheckerClient::new(&path).connect().await.unwrap();

        for _ in 0..5 {
            assert!(conn.check("alice", "blocked.com").await.unwrap());
            assert!(!conn.check("alice", "other.com").await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_byte() {
        let (_dir, path, _handle) = start(ServerOptions::default());
        let mut stream = UnixStream::connect(&path).await.unwrap();

        let payload = br#"{"user":"alice"}"#;
        stream.write_u16(payload.len() as u16).await.unwrap();
        stream.write_all(payload).await.unwrap();

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, vec![0xff]);
    }

    #[tokio::test]
    async fn test_oversized_request_gets_error_byte() {
        let options = ServerOptions {
            max_request_size: 32,
            ..Default::default()
        };
        let (_dir, path, _handle) = start(options);
        let mut conn = CheckerClient::new(&path).connect().await.unwrap();

        let err = conn
            .check("alice", "a-very-long-domain-name.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected));
    }

    #[tokio::test]
    async fn test_server_survives_client_disconnects() {
        let (_dir, path, handle) = start(ServerOptions::default());

        {
            // Half a length prefix, then gone.
            let mut stream = UnixStream::connect(&path).await.unwrap();
            stream.write_all(&[0x00]).await.unwrap();
        }
        {
            // Full prefix, partial payload, then gone.
            let frame = encode_request(&CheckRequest::new("alice", "blocked.com")).unwrap();
            let mut stream = UnixStream::connect(&path).await.unwrap();
            stream.write_all(&frame[..frame.len() / 2]).await.unwrap();
        }

        let client = CheckerClient::new(&path);
        assert!(client.check("alice", "blocked.com").await.unwrap());
        assert!(!handle.is_finished());
    }

    #[tokio::test]
    async fn test_idle_connection_times_out() {
        let options = ServerOptions {
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let (_dir, path, _handle) = start(options);
        let mut stream = UnixStream::connect(&path).await.unwrap();

        let mut reply = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
            .await
            .expect("server should close the idle connection");
        assert_eq!(read.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_clients() {
        let (_dir, path, _handle) = start(ServerOptions::default());
        let client = CheckerClient::new(&path);

        let checks = (0..64).map(|i| {
            let client = client.clone();
            async move {
                let domain = if i % 2 == 0 { "blocked.com" } else { "fine.com" };
                (i, client.check("alice", domain).await.unwrap())
            }
        });

        for (i, blocked) in futures::future::join_all(checks).await {
            assert_eq!(blocked, i % 2 == 0);
        }
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let server = QueryServer::bind(&path, Arc::new(AliceChecker), ServerOptions::default());
        assert!(server.is_ok());
    }

    #[tokio::test]
    async fn test_refuses_to_replace_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check.sock");
        std::fs::write(&path, b"important").unwrap();

        let server = QueryServer::bind(&path, Arc::new(AliceChecker), ServerOptions::default());
        assert!(server.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"important");
    }

    #[tokio::test]
    async fn test_socket_mode_applied() {
        use std::os::unix::fs::PermissionsExt;

        let options = ServerOptions {
            socket_mode: Some(0o600),
            ..Default::default()
        };
        let (_dir, path, _handle) = start(options);

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_socket_removed_on_shutdown() {
        let (_dir, path, handle) = start(ServerOptions::default());
        assert!(path.exists());

        handle.abort();
        let _ = handle.await;
        assert!(!path.exists());
    }
}
