#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, path::PathBuf, time::Duration};

    use tempfile::tempdir;

    use super::super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.server.socket_path, PathBuf::from("/tmp/dnsblockcheck.sock"));
        assert_eq!(config.server.timeout(), Duration::from_secs(60));
        assert_eq!(config.server.max_request_size, 2048);
        assert_eq!(config.server.log_level, LogLevel::Info);
        assert_eq!(config.blocklist.directory, PathBuf::from("./user-blocklist"));
        assert_eq!(config.blocklist.unknown_user, Policy::Allow);
        assert_eq!(config.proxy.port, 8053);
        assert_eq!(config.proxy.on_checker_failure, Policy::Allow);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [server]
            socket_path = "/run/blockcheck.sock"
            socket_mode = 0o660
            timeout_secs = 5
            log_level = "debug"

            [blocklist]
            directory = "/etc/blockcheck/users"
            unknown_user = "block"

            [proxy]
            listen_address = "0.0.0.0"
            port = 443
            upstream_resolver = "9.9.9.9:53"
            certfile = "/etc/ssl/doh.pem"
            keyfile = "/etc/ssl/doh.key"
            on_checker_failure = "block"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.socket_mode, Some(0o660));
        assert_eq!(config.server.options().timeout, Duration::from_secs(5));
        assert_eq!(config.server.max_request_size, 2048);
        assert_eq!(config.blocklist.unknown_user, Policy::Block);
        assert_eq!(
            config.proxy.upstream_resolver,
            "9.9.9.9:53".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            FailurePolicy::from(config.proxy.on_checker_failure),
            FailurePolicy::Block
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[blocklist]\ndirectory = \"lists\"\n").unwrap();

        assert_eq!(config.blocklist.directory, PathBuf::from("lists"));
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.proxy, ProxyConfig::default());
    }

    #[test]
    fn test_validate_rejects_half_tls() {
        let mut config = Config::default();
        config.proxy.certfile = Some("/etc/ssl/doh.pem".into());

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut config = Config::default();
        config.server.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.max_request_size = 70_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_writes_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = load_config(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reread = load_config(&path).unwrap();
        assert_eq!(reread, config);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nsocket_path = 3").unwrap();

        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_unreadable_file_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let contents: &[u8] = b"[server]\n# caf\xe9\nsocket_path = \"/run/x.sock\"\n";
        std::fs::write(&path, contents).unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Read(_))
        ));
        assert_eq!(std::fs::read(&path).unwrap(), contents);
    }

    #[test]
    fn test_default_config_never_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[blocklist]\ndirectory = \"lists\"\n").unwrap();

        assert!(create_default_config(&path).is_err());
        assert_eq!(load_config(&path).unwrap().blocklist.directory, PathBuf::from("lists"));
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let res = toml::from_str::<Config>("[blocklist]\nunknown_user = \"maybe\"\n");
        assert!(res.is_err());
    }
}
