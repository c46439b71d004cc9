//! Manages the server's runtime configuration.
//!
//! Following the teacher's `Config::from_env` shape, [`ServerConfig::from_env`]
//! loads `MAILCORE_`-prefixed environment variables (optionally via a
//! `.env` file through `dotenv`), logging every value it resolves —
//! required variables error out by name if absent, optional ones fall back
//! to a logged default. [`ServerConfigBuilder`] offers the same
//! configuration programmatically for embedding and tests, with every
//! invariant from the data model checked once, in
//! [`ServerConfigBuilder::build`].

mod builder;
mod tests;

pub use builder::ServerConfigBuilder;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::auth::AuthenticatorRegistry;

/// Immutable server configuration, constructed only through
/// [`ServerConfigBuilder::build`] so every instance in existence has
/// already passed validation.
#[derive(Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub server_name: String,
    pub banner: String,

    pub max_message_size: u64,
    pub max_recipients: usize,
    pub max_connections: usize,
    pub max_connections_per_ip: usize,
    pub max_retry_count: u32,
    pub max_command_line_len: usize,

    pub command_timeout: Duration,
    pub data_timeout: Duration,
    pub connection_timeout: Duration,

    pub enable_pipelining: bool,
    pub enable_8bit_mime: bool,
    pub enable_smtp_utf8: bool,

    pub require_secure: bool,
    pub require_auth: bool,
    pub allow_plaintext_auth: bool,
    pub auth_enabled: bool,

    pub tls: Option<Arc<rustls::ServerConfig>>,

    pub auth_mechanisms: Arc<AuthenticatorRegistry>,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Loads configuration from environment variables, following the same
    /// required-vs-default-with-log discipline as the teacher's
    /// `Config::from_env`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();

        let mut builder = ServerConfig::builder();

        builder = builder.bind_address(
            env::var("MAILCORE_BIND_ADDRESS")
                .map(|val| {
                    log::info!("Config: Using bind_address from env: {}", val);
                    val
                })
                .unwrap_or_else(|_| {
                    let default_val = "0.0.0.0".to_string();
                    log::info!("Config: Using default bind_address: {}", default_val);
                    default_val
                }),
        );

        let port_str = env::var("MAILCORE_PORT").unwrap_or_else(|_| "2525".to_string());
        let port: u16 = port_str.parse().map_err(|e| {
            anyhow!("MAILCORE_PORT ('{port_str}') must be a valid u16 port number: {e}")
        })?;
        log::info!("Config: Using port: {}", port);
        builder = builder.port(port);

        if let Ok(val) = env::var("MAILCORE_SERVER_NAME") {
            log::info!("Config: Using server_name from env: {}", val);
            builder = builder.server_name(val);
        }

        if let Ok(val) = env::var("MAILCORE_BANNER") {
            builder = builder.banner(val);
        }

        if let Ok(val) = env::var("MAILCORE_MAX_MESSAGE_SIZE") {
            let size: u64 = val
                .parse()
                .map_err(|e| anyhow!("MAILCORE_MAX_MESSAGE_SIZE must be a valid u64: {e}"))?;
            log::info!("Config: Using max_message_size from env: {}", size);
            builder = builder.max_message_size(size);
        }

        if let Ok(val) = env::var("MAILCORE_MAX_RECIPIENTS") {
            let n: usize = val
                .parse()
                .map_err(|e| anyhow!("MAILCORE_MAX_RECIPIENTS must be a valid usize: {e}"))?;
            builder = builder.max_recipients(n);
        }

        if let Ok(val) = env::var("MAILCORE_MAX_CONNECTIONS") {
            let n: usize = val
                .parse()
                .map_err(|e| anyhow!("MAILCORE_MAX_CONNECTIONS must be a valid usize: {e}"))?;
            log::info!("Config: Using max_connections from env: {}", n);
            builder = builder.max_connections(n);
        }

        if let Ok(val) = env::var("MAILCORE_MAX_CONNECTIONS_PER_IP") {
            let n: usize = val.parse().map_err(|e| {
                anyhow!("MAILCORE_MAX_CONNECTIONS_PER_IP must be a valid usize: {e}")
            })?;
            builder = builder.max_connections_per_ip(n);
        }

        if let Ok(val) = env::var("MAILCORE_MAX_RETRY_COUNT") {
            let n: u32 = val
                .parse()
                .map_err(|e| anyhow!("MAILCORE_MAX_RETRY_COUNT must be a valid u32: {e}"))?;
            builder = builder.max_retry_count(n);
        }

        if let Ok(val) = env::var("MAILCORE_REQUIRE_AUTH") {
            builder = builder.require_auth(parse_bool("MAILCORE_REQUIRE_AUTH", &val)?);
        }

        if let Ok(val) = env::var("MAILCORE_REQUIRE_SECURE") {
            builder = builder.require_secure(parse_bool("MAILCORE_REQUIRE_SECURE", &val)?);
        }

        if let Ok(val) = env::var("MAILCORE_ALLOW_PLAINTEXT_AUTH") {
            builder =
                builder.allow_plaintext_auth(parse_bool("MAILCORE_ALLOW_PLAINTEXT_AUTH", &val)?);
        }

        match (
            env::var("MAILCORE_TLS_CERT_FILE"),
            env::var("MAILCORE_TLS_KEY_FILE"),
        ) {
            (Ok(cert_path), Ok(key_path)) => {
                log::info!("Config: loading TLS material from {cert_path} / {key_path}");
                let tls = crate::tls::load_server_config(&cert_path, &key_path)?;
                builder = builder.tls(Some(tls));
            }
            (Err(_), Err(_)) => {
                log::info!("Config: no TLS material configured, STARTTLS is unavailable");
            }
            _ => {
                return Err(anyhow!(
                    "MAILCORE_TLS_CERT_FILE and MAILCORE_TLS_KEY_FILE must both be set, or neither"
                ))
            }
        }

        builder.build()
    }
}

fn parse_bool(var: &str, val: &str) -> Result<bool> {
    match val.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("{var} must be a boolean, got '{other}'")),
    }
}
