//! The read-only view of a session exposed to pluggable collaborators.
//!
//! Hooks never get a mutable [`crate::session::Session`] — only this
//! snapshot-like view, plus a writable scratch property bag for stashing
//! data across calls within one session (e.g. a filter remembering a
//! reputation score it already looked up for this connection).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// Negotiated/announced capability flags for the current connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityFlags {
    pub pipelining: bool,
    pub eight_bit_mime: bool,
    pub smtp_utf8: bool,
    pub binary_mime: bool,
}

/// The read-only session state collaborators are allowed to observe.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub id: String,
    pub remote: SocketAddr,
    pub local: SocketAddr,
    pub start_time: Instant,
    pub secure: bool,
    pub authenticated: bool,
    pub identity: Option<String>,
    pub client_domain: Option<String>,
    pub message_count: u64,
    pub capabilities: CapabilityFlags,
    pub max_message_size: u64,
    /// A writable scratch bag collaborators may use to stash per-session
    /// state of their own between calls.
    pub properties: HashMap<String, String>,
}

impl SessionView {
    pub fn new(id: String, remote: SocketAddr, local: SocketAddr, max_message_size: u64) -> Self {
        SessionView {
            id,
            remote,
            local,
            start_time: Instant::now(),
            secure: false,
            authenticated: false,
            identity: None,
            client_domain: None,
            message_count: 0,
            capabilities: CapabilityFlags::default(),
            max_message_size,
            properties: HashMap::new(),
        }
    }
}
