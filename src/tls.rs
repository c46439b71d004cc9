//! TLS material loading for STARTTLS.
//!
//! Grounded on the pack's own `security::tls::TlsConfig::from_pem_files`
//! pattern, updated to the `rustls` 0.23 / `rustls-pemfile` 2.x APIs this
//! crate's `Cargo.toml` actually declares (no client auth, safe default
//! cipher suites and protocol versions from `rustls::ServerConfig::builder()`).

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Loads a certificate chain and private key from PEM files and builds a
/// `rustls::ServerConfig` with no client certificate authentication,
/// suitable for wrapping an accepted `TcpStream` on `STARTTLS`.
pub fn load_server_config(cert_path: &str, key_path: &str) -> Result<Arc<rustls::ServerConfig>> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("failed to build TLS server config from provided certificate/key")?;

    Ok(Arc::new(config))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("failed to open certificate file {path}"))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse certificates in {path}"))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificates found in {path}"));
    }
    Ok(certs)
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("failed to open key file {path}"))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("failed to parse private key in {path}"))?
        .ok_or_else(|| anyhow!("no private key found in {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_cert_and_key() -> (tempfile::NamedTempFile, tempfile::NamedTempFile) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_pem = cert.cert.pem();
        let key_pem = cert.key_pair.serialize_pem();

        let mut cert_file = tempfile::NamedTempFile::new().unwrap();
        cert_file.write_all(cert_pem.as_bytes()).unwrap();
        let mut key_file = tempfile::NamedTempFile::new().unwrap();
        key_file.write_all(key_pem.as_bytes()).unwrap();
        (cert_file, key_file)
    }

    #[test]
    fn loads_a_self_signed_certificate() {
        let (cert_file, key_file) = write_cert_and_key();
        let config =
            load_server_config(cert_file.path().to_str().unwrap(), key_file.path().to_str().unwrap());
        assert!(config.is_ok());
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = load_server_config("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(result.is_err());
    }
}
