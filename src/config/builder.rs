//! The fluent builder behind [`super::ServerConfig`], mirroring the "dozens
//! of setters culminating in one validating `build()`" shape called out in
//! this crate's redesign notes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::auth::AuthenticatorRegistry;

use super::ServerConfig;

pub struct ServerConfigBuilder {
    bind_address: String,
    port: u16,
    server_name: String,
    banner: Option<String>,

    max_message_size: u64,
    max_recipients: usize,
    max_connections: usize,
    max_connections_per_ip: usize,
    max_retry_count: u32,
    max_command_line_len: usize,

    command_timeout: Duration,
    data_timeout: Duration,
    connection_timeout: Duration,

    enable_pipelining: bool,
    enable_8bit_mime: bool,
    enable_smtp_utf8: bool,

    require_secure: bool,
    require_auth: bool,
    allow_plaintext_auth: bool,
    auth_enabled: bool,

    tls: Option<Arc<rustls::ServerConfig>>,

    auth_mechanisms: Option<Arc<AuthenticatorRegistry>>,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        ServerConfigBuilder {
            bind_address: "0.0.0.0".to_string(),
            port: 2525,
            server_name: "smtp-core".to_string(),
            banner: None,

            max_message_size: 25 * 1024 * 1024,
            max_recipients: 100,
            max_connections: 1000,
            max_connections_per_ip: 10,
            max_retry_count: 10,
            max_command_line_len: crate::command::MAX_COMMAND_LINE_LEN,

            command_timeout: Duration::from_secs(120),
            data_timeout: Duration::from_secs(600),
            connection_timeout: Duration::from_secs(10),

            enable_pipelining: true,
            enable_8bit_mime: true,
            enable_smtp_utf8: true,

            require_secure: false,
            require_auth: false,
            allow_plaintext_auth: false,
            auth_enabled: true,

            tls: None,
            auth_mechanisms: None,
        }
    }
}

impl ServerConfigBuilder {
    pub fn bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    pub fn max_message_size(mut self, size: u64) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn max_recipients(mut self, n: usize) -> Self {
        self.max_recipients = n;
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    pub fn max_connections_per_ip(mut self, n: usize) -> Self {
        self.max_connections_per_ip = n;
        self
    }

    pub fn max_retry_count(mut self, n: u32) -> Self {
        self.max_retry_count = n;
        self
    }

    pub fn max_command_line_len(mut self, n: usize) -> Self {
        self.max_command_line_len = n;
        self
    }

    pub fn command_timeout(mut self, d: Duration) -> Self {
        self.command_timeout = d;
        self
    }

    pub fn data_timeout(mut self, d: Duration) -> Self {
        self.data_timeout = d;
        self
    }

    pub fn connection_timeout(mut self, d: Duration) -> Self {
        self.connection_timeout = d;
        self
    }

    pub fn enable_pipelining(mut self, on: bool) -> Self {
        self.enable_pipelining = on;
        self
    }

    pub fn enable_8bit_mime(mut self, on: bool) -> Self {
        self.enable_8bit_mime = on;
        self
    }

    pub fn enable_smtp_utf8(mut self, on: bool) -> Self {
        self.enable_smtp_utf8 = on;
        self
    }

    pub fn require_secure(mut self, on: bool) -> Self {
        self.require_secure = on;
        self
    }

    pub fn require_auth(mut self, on: bool) -> Self {
        self.require_auth = on;
        self
    }

    pub fn allow_plaintext_auth(mut self, on: bool) -> Self {
        self.allow_plaintext_auth = on;
        self
    }

    pub fn auth_enabled(mut self, on: bool) -> Self {
        self.auth_enabled = on;
        self
    }

    pub fn tls(mut self, tls: Option<Arc<rustls::ServerConfig>>) -> Self {
        self.tls = tls;
        self
    }

    pub fn auth_mechanisms(mut self, registry: AuthenticatorRegistry) -> Self {
        self.auth_mechanisms = Some(Arc::new(registry));
        self
    }

    /// Validates the invariants from the data model and produces an
    /// immutable [`ServerConfig`].
    pub fn build(self) -> Result<ServerConfig> {
        if self.max_message_size == 0 {
            return Err(anyhow!("max_message_size must be positive"));
        }
        if self.max_recipients == 0 {
            return Err(anyhow!("max_recipients must be positive"));
        }
        if self.max_connections == 0 {
            return Err(anyhow!("max_connections must be positive"));
        }
        if self.max_connections_per_ip == 0 {
            return Err(anyhow!("max_connections_per_ip must be positive"));
        }
        if self.max_command_line_len == 0 {
            return Err(anyhow!("max_command_line_len must be positive"));
        }
        if self.require_secure && self.tls.is_none() {
            return Err(anyhow!(
                "require_secure is set but no TLS material was configured"
            ));
        }
        if self.require_auth && !self.require_secure && !self.allow_plaintext_auth {
            return Err(anyhow!(
                "require_auth without require_secure needs allow_plaintext_auth, \
                 or AUTH can never succeed"
            ));
        }

        let server_name = self.server_name;
        let banner = self
            .banner
            .unwrap_or_else(|| format!("{server_name} ESMTP ready"));

        Ok(ServerConfig {
            bind_address: self.bind_address,
            port: self.port,
            server_name,
            banner,

            max_message_size: self.max_message_size,
            max_recipients: self.max_recipients,
            max_connections: self.max_connections,
            max_connections_per_ip: self.max_connections_per_ip,
            max_retry_count: self.max_retry_count,
            max_command_line_len: self.max_command_line_len,

            command_timeout: self.command_timeout,
            data_timeout: self.data_timeout,
            connection_timeout: self.connection_timeout,

            enable_pipelining: self.enable_pipelining,
            enable_8bit_mime: self.enable_8bit_mime,
            enable_smtp_utf8: self.enable_smtp_utf8,

            require_secure: self.require_secure,
            require_auth: self.require_auth,
            allow_plaintext_auth: self.allow_plaintext_auth,
            auth_enabled: self.auth_enabled,

            tls: self.tls,

            auth_mechanisms: self
                .auth_mechanisms
                .unwrap_or_else(|| Arc::new(AuthenticatorRegistry::with_defaults())),
        })
    }
}
