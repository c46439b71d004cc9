//! The contracts external collaborators implement to observe and influence
//! a transaction: storage, filtering, statistics, rate limiting, and
//! authentication. Every trait is `async_trait` so an implementer can do
//! its own I/O (a database write, an HTTP call, a DNS lookup) without the
//! core caring how.
//!
//! Default no-op implementations are provided for the purely-observational
//! traits ([`StatisticsCollector`], [`SessionObserver`]) so an embedder that
//! doesn't care about them can skip implementing every method.

use async_trait::async_trait;

use crate::message::Message;
use crate::response::Response;
use crate::session_view::SessionView;

/// The outcome of a policy decision at MAIL or RCPT time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    /// A permanent deny (maps to a 5xx response).
    DenyPermanent,
    /// A transient deny (maps to a 4xx response); the client may retry.
    DenyTransient,
}

/// Decides whether to accept senders and recipients. The default
/// implementation accepts everything, so a minimal embedder doesn't need
/// to supply one just to get mail flowing.
#[async_trait]
pub trait MailboxFilter: Send + Sync {
    async fn can_accept_from(
        &self,
        session: &SessionView,
        sender: &str,
        declared_size: Option<u64>,
    ) -> FilterDecision {
        let _ = (session, sender, declared_size);
        FilterDecision::Accept
    }

    async fn can_deliver_to(
        &self,
        session: &SessionView,
        recipient: &str,
        sender: &str,
    ) -> FilterDecision {
        let _ = (session, recipient, sender);
        FilterDecision::Accept
    }
}

/// Persists an accepted message. Exactly one call per accepted message,
/// after any [`SessionObserver::on_message_received`] hooks have run to
/// completion.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save(&self, session: &SessionView, message: &Message) -> Result<(), String>;
}

/// Fire-and-forget counters. All methods default to doing nothing.
#[async_trait]
pub trait StatisticsCollector: Send + Sync {
    async fn record_session(&self) {}
    async fn record_message(&self, message: &Message) {
        let _ = message;
    }
    async fn record_error(&self, error: &str) {
        let _ = error;
    }
}

/// Consulted once at session accept, keyed on an arbitrary string
/// (typically the remote IP's textual form).
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn is_allowed(&self, key: &str) -> bool;
    async fn record_request(&self, key: &str);
}

/// The result of authenticating a SASL exchange.
#[derive(Debug, Clone)]
pub enum AuthenticationResult {
    Success { identity: String },
    Failure { reason: Option<String> },
}

/// Verifies a username/password pair extracted by an authenticator
/// ([`crate::auth`]). `username`/`password` are `None` only for mechanisms
/// that don't collect one of them; PLAIN and LOGIN always supply both.
#[async_trait]
pub trait AuthenticationCallback: Send + Sync {
    async fn authenticate(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> AuthenticationResult;
}

/// Observes session and message lifecycle events. All methods default to
/// doing nothing; [`SessionObserver::on_message_received`] is the one
/// cancel-capable hook — returning `Some(response)` short-circuits the
/// commit and that response is sent to the client instead of calling the
/// store.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn on_session_created(&self, session: &SessionView) {
        let _ = session;
    }

    /// Runs to completion before `MessageStore::save`. Returning
    /// `Some(response)` cancels the commit: the store is not called and
    /// `response` is written to the client instead of the normal `250`.
    async fn on_message_received(
        &self,
        session: &SessionView,
        message: &Message,
    ) -> Option<Response> {
        let _ = (session, message);
        None
    }

    async fn on_session_completed(&self, session: &SessionView) {
        let _ = session;
    }

    async fn on_error(&self, session: &SessionView, error: &str) {
        let _ = (session, error);
    }
}

/// A [`MailboxFilter`] that accepts every sender and recipient. The default
/// used when an embedder configures no filter.
pub struct PermissiveFilter;

#[async_trait]
impl MailboxFilter for PermissiveFilter {}

/// A [`StatisticsCollector`] and [`SessionObserver`] that do nothing. The
/// defaults used when an embedder configures none.
pub struct NullObserver;

#[async_trait]
impl StatisticsCollector for NullObserver {}

/// An [`AuthenticationCallback`] that rejects every attempt. The default
/// used when an embedder enables no mechanisms of its own; harmless
/// because the session never reaches it unless AUTH is also enabled.
pub struct RejectingAuthenticationCallback;

#[async_trait]
impl AuthenticationCallback for RejectingAuthenticationCallback {
    async fn authenticate(&self, _username: Option<&str>, _password: Option<&str>) -> AuthenticationResult {
        AuthenticationResult::Failure {
            reason: Some("authentication is not configured".to_string()),
        }
    }
}

/// The full set of pluggable collaborators a [`crate::server::Server`] wires
/// into every [`crate::session::Session`] it constructs. Grouping them here
/// keeps `Server::new` and `Session::new` to one argument each instead of
/// five.
#[derive(Clone)]
pub struct Collaborators {
    pub filter: std::sync::Arc<dyn MailboxFilter>,
    pub store: std::sync::Arc<dyn MessageStore>,
    pub stats: std::sync::Arc<dyn StatisticsCollector>,
    pub observer: std::sync::Arc<dyn SessionObserver>,
    pub auth_callback: std::sync::Arc<dyn AuthenticationCallback>,
    /// Consulted once per accepted connection by the listener, not by the
    /// session itself (see the connection admission flow in `server`).
    pub rate_limiter: Option<std::sync::Arc<dyn RateLimiter>>,
}

impl Collaborators {
    /// A permissive set: accepts everything, persists nowhere, observes
    /// nothing, rejects every AUTH attempt, rate-limits nothing. Useful as
    /// a starting point for embedders who only want to override one or two
    /// collaborators.
    pub fn permissive(store: std::sync::Arc<dyn MessageStore>) -> Self {
        Collaborators {
            filter: std::sync::Arc::new(PermissiveFilter),
            store,
            stats: std::sync::Arc::new(NullObserver),
            observer: std::sync::Arc::new(NullObserver),
            auth_callback: std::sync::Arc::new(RejectingAuthenticationCallback),
            rate_limiter: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn view() -> SessionView {
        SessionView::new(
            "s1".to_string(),
            "127.0.0.1:1234".parse::<SocketAddr>().unwrap(),
            "127.0.0.1:25".parse::<SocketAddr>().unwrap(),
            1024,
        )
    }

    #[tokio::test]
    async fn permissive_filter_accepts_everything() {
        let f = PermissiveFilter;
        let s = view();
        assert_eq!(
            f.can_accept_from(&s, "a@example.com", None).await,
            FilterDecision::Accept
        );
        assert_eq!(
            f.can_deliver_to(&s, "b@example.com", "a@example.com").await,
            FilterDecision::Accept
        );
    }

    #[tokio::test]
    async fn null_observer_never_cancels() {
        let o = NullObserver;
        let s = view();
        let m = Message::new("q1".to_string(), "a".to_string(), vec!["b".to_string()], vec![]);
        assert!(o.on_message_received(&s, &m).await.is_none());
    }
}
