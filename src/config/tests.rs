#[cfg(test)]
mod tests {
    use super::super::ServerConfig;
    use std::env;
    use std::sync::Mutex;
    use std::time::Duration;

    use once_cell::sync::Lazy;

    /// `from_env` reads process-global state, so tests that mutate env vars
    /// must not interleave with each other across threads.
    static ENV_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    fn clear_env() {
        for var in [
            "MAILCORE_BIND_ADDRESS",
            "MAILCORE_PORT",
            "MAILCORE_SERVER_NAME",
            "MAILCORE_BANNER",
            "MAILCORE_MAX_MESSAGE_SIZE",
            "MAILCORE_MAX_RECIPIENTS",
            "MAILCORE_MAX_CONNECTIONS",
            "MAILCORE_MAX_CONNECTIONS_PER_IP",
            "MAILCORE_MAX_RETRY_COUNT",
            "MAILCORE_REQUIRE_AUTH",
            "MAILCORE_REQUIRE_SECURE",
            "MAILCORE_ALLOW_PLAINTEXT_AUTH",
            "MAILCORE_TLS_CERT_FILE",
            "MAILCORE_TLS_KEY_FILE",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn builder_applies_defaults() {
        let config = ServerConfig::builder().build().unwrap();
        assert_eq!(config.port, 2525);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert!(config.enable_pipelining);
        assert!(!config.require_secure);
        assert_eq!(config.max_connections_per_ip, 10);
    }

    #[test]
    fn banner_defaults_from_server_name() {
        let config = ServerConfig::builder()
            .server_name("mx.example.test")
            .build()
            .unwrap();
        assert!(config.banner.contains("mx.example.test"));
    }

    #[test]
    fn require_secure_without_tls_is_rejected() {
        let result = ServerConfig::builder().require_secure(true).build();
        assert!(result.is_err());
    }

    #[test]
    fn require_auth_without_secure_or_plaintext_is_rejected() {
        let result = ServerConfig::builder().require_auth(true).build();
        assert!(result.is_err());
    }

    #[test]
    fn require_auth_with_plaintext_allowed_is_accepted() {
        let result = ServerConfig::builder()
            .require_auth(true)
            .allow_plaintext_auth(true)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(ServerConfig::builder().max_message_size(0).build().is_err());
        assert!(ServerConfig::builder().max_connections(0).build().is_err());
        assert!(ServerConfig::builder()
            .max_connections_per_ip(0)
            .build()
            .is_err());
    }

    #[test]
    fn custom_timeouts_are_honored() {
        let config = ServerConfig::builder()
            .command_timeout(Duration::from_secs(42))
            .build()
            .unwrap();
        assert_eq!(config.command_timeout, Duration::from_secs(42));
    }

    #[test]
    fn from_env_uses_defaults_when_unset() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear_env();

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.port, 2525);
        assert!(!config.require_auth);

        clear_env();
    }

    #[test]
    fn from_env_honors_overrides() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear_env();

        env::set_var("MAILCORE_BIND_ADDRESS", "127.0.0.1");
        env::set_var("MAILCORE_PORT", "4025");
        env::set_var("MAILCORE_SERVER_NAME", "mx.test.invalid");
        env::set_var("MAILCORE_MAX_RECIPIENTS", "5");
        env::set_var("MAILCORE_REQUIRE_AUTH", "true");
        env::set_var("MAILCORE_ALLOW_PLAINTEXT_AUTH", "yes");

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.port, 4025);
        assert!(config.banner.contains("mx.test.invalid"));
        assert_eq!(config.max_recipients, 5);
        assert!(config.require_auth);
        assert!(config.allow_plaintext_auth);

        clear_env();
    }

    #[test]
    fn from_env_rejects_invalid_port() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear_env();

        env::set_var("MAILCORE_PORT", "not-a-port");
        let result = ServerConfig::from_env();
        assert!(result.is_err());

        clear_env();
    }

    #[test]
    fn from_env_rejects_lopsided_tls_vars() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear_env();

        env::set_var("MAILCORE_TLS_CERT_FILE", "/tmp/does-not-matter.pem");
        let result = ServerConfig::from_env();
        assert!(result.is_err());

        clear_env();
    }
}
