//! A trivial in-memory [`MessageStore`], used by the demo binary when no
//! webhook URL is configured and by tests that want to assert on exactly
//! what got "delivered" without standing up an HTTP endpoint.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::hooks::MessageStore;
use crate::message::Message;
use crate::session_view::SessionView;

/// Accumulates every accepted message in memory. Never rejects a save.
#[derive(Default)]
pub struct InMemoryStore {
    messages: Mutex<Vec<Message>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    /// A snapshot of every message saved so far, in arrival order.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn save(&self, _session: &SessionView, message: &Message) -> Result<(), String> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}
