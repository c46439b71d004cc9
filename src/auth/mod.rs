//! The SASL authentication sub-protocol: a per-attempt [`Authenticator`]
//! state machine, a name-to-factory [`AuthenticatorRegistry`], and the two
//! mandatory mechanisms, PLAIN and LOGIN.
//!
//! An authenticator is constructed fresh for each `AUTH` attempt (mirroring
//! `mailin-embedded`'s per-session `Handler` construction) so it can hold
//! whatever exchange state it needs without leaking across attempts.

mod login;
mod plain;

pub use login::LoginAuthenticator;
pub use plain::PlainAuthenticator;

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;

use crate::error::SessionError;
use crate::hooks::{AuthenticationCallback, AuthenticationResult};
use crate::response::Response;

/// The result of driving an authenticator to completion.
#[derive(Debug)]
pub enum AuthOutcome {
    Success { identity: String },
    /// Invalid credentials, bad base64, or any other SASL-level failure;
    /// carries the response the session should send.
    Failure(Response),
    /// The client sent `*` to cancel the exchange.
    Aborted,
}

/// Abstracts reading/writing lines during the SASL exchange so an
/// authenticator doesn't need to know about the session's concrete stream
/// type. The session implements this directly over its line reader/writer.
#[async_trait]
pub trait AuthChannel: Send {
    async fn write_challenge(&mut self, response: &Response) -> Result<(), SessionError>;
    async fn read_line(&mut self) -> Result<Option<String>, SessionError>;
}

/// A stateful SASL mechanism, constructed fresh per `AUTH` attempt.
#[async_trait]
pub trait Authenticator: Send {
    /// Drives the exchange to completion. `initial_response` is the
    /// optional base64 blob a client may supply directly on the `AUTH`
    /// line (`AUTH PLAIN <initial-response>`); `None` if the client wants
    /// the mechanism to prompt.
    async fn authenticate(
        &mut self,
        initial_response: Option<String>,
        channel: &mut dyn AuthChannel,
        callback: &dyn AuthenticationCallback,
    ) -> AuthOutcome;
}

/// Decodes a base64 SASL response line, treating `*` as a client-initiated
/// abort and any decode failure as [`AuthOutcome::Failure`].
fn decode_or_abort(line: &str) -> Result<Vec<u8>, AuthOutcome> {
    if line.trim() == "*" {
        return Err(AuthOutcome::Aborted);
    }
    base64::engine::general_purpose::STANDARD
        .decode(line.trim())
        .map_err(|_| AuthOutcome::Failure(Response::auth_failed("Invalid base64 response")))
}

fn outcome_from_result(result: AuthenticationResult) -> AuthOutcome {
    match result {
        AuthenticationResult::Success { identity } => AuthOutcome::Success { identity },
        AuthenticationResult::Failure { reason } => AuthOutcome::Failure(Response::auth_failed(
            reason.unwrap_or_else(|| "Invalid credentials".to_string()),
        )),
    }
}

/// Constructs a fresh [`Authenticator`] for a mechanism name.
pub type AuthenticatorFactory = Box<dyn Fn() -> Box<dyn Authenticator> + Send + Sync>;

/// Maps mechanism name (e.g. `"PLAIN"`, `"LOGIN"`) to a factory. The
/// registry ships PLAIN and LOGIN pre-registered; custom mechanisms can be
/// added with [`AuthenticatorRegistry::register`].
pub struct AuthenticatorRegistry {
    factories: HashMap<String, AuthenticatorFactory>,
}

impl AuthenticatorRegistry {
    /// An empty registry with no mechanisms registered.
    pub fn empty() -> Self {
        AuthenticatorRegistry {
            factories: HashMap::new(),
        }
    }

    /// A registry with PLAIN and LOGIN pre-registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("PLAIN", || Box::new(PlainAuthenticator::default()));
        registry.register("LOGIN", || Box::new(LoginAuthenticator::default()));
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Authenticator> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_ascii_uppercase(), Box::new(factory));
    }

    /// Mechanism names in registration order is not guaranteed; callers
    /// that need a stable order (e.g. advertising in EHLO) should sort.
    pub fn mechanism_names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn create(&self, mechanism: &str) -> Option<Box<dyn Authenticator>> {
        self.factories
            .get(&mechanism.to_ascii_uppercase())
            .map(|f| f())
    }

    pub fn contains(&self, mechanism: &str) -> bool {
        self.factories.contains_key(&mechanism.to_ascii_uppercase())
    }
}

impl Default for AuthenticatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_plain_and_login() {
        let registry = AuthenticatorRegistry::with_defaults();
        assert!(registry.contains("PLAIN"));
        assert!(registry.contains("plain"));
        assert!(registry.contains("LOGIN"));
        assert!(!registry.contains("XOAUTH2"));
    }

    #[test]
    fn custom_mechanism_can_be_registered() {
        let mut registry = AuthenticatorRegistry::empty();
        registry.register("CUSTOM", || Box::new(PlainAuthenticator::default()));
        assert!(registry.contains("CUSTOM"));
        assert!(registry.create("CUSTOM").is_some());
        assert!(registry.create("MISSING").is_none());
    }

    #[test]
    fn star_aborts_decode() {
        assert!(matches!(decode_or_abort("*"), Err(AuthOutcome::Aborted)));
    }

    #[test]
    fn invalid_base64_fails() {
        assert!(matches!(
            decode_or_abort("not base64!!"),
            Err(AuthOutcome::Failure(_))
        ));
    }
}
