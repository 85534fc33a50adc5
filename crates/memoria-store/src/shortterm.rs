//! Per-session short-term memory: a sliding window of recent messages.
//!
//! Process-local only. A single reader-writer lock guards the window map;
//! appends replace the message list rather than mutating it in place, so a
//! snapshot handed out under the read lock stays consistent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use memoria_types::{Messages, ShortTermWindow};

/// Default window size: 20 messages, roughly 10 dialog turns.
pub const DEFAULT_WINDOW_SIZE: usize = 20;

type WindowKey = (String, String, String);

/// Process-wide store of per-(agent, user, session) message windows.
pub struct ShortTermStore {
    windows: RwLock<HashMap<WindowKey, Arc<ShortTermWindow>>>,
    window_size: usize,
}

impl ShortTermStore {
    pub fn new(window_size: usize) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            window_size,
        }
    }

    fn key(agent_id: &str, user_id: &str, session_id: &str) -> WindowKey {
        (
            agent_id.to_string(),
            user_id.to_string(),
            session_id.to_string(),
        )
    }

    /// Append messages to the session window, truncating to the most recent
    /// N, and return the updated snapshot.
    pub fn append_messages(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        messages: &Messages,
    ) -> Arc<ShortTermWindow> {
        let mut windows = self.windows.write();
        let key = Self::key(agent_id, user_id, session_id);

        let mut merged = windows
            .get(&key)
            .map(|w| w.messages.0.clone())
            .unwrap_or_default();
        merged.extend(messages.0.iter().cloned());
        if merged.len() > self.window_size {
            merged.drain(..merged.len() - self.window_size);
        }

        let window = Arc::new(ShortTermWindow {
            agent_id: agent_id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            messages: Messages(merged),
            updated_at: Utc::now(),
        });
        windows.insert(key, Arc::clone(&window));
        window
    }

    /// Read a snapshot of the session window, if one exists.
    pub fn get_window(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Option<Arc<ShortTermWindow>> {
        self.windows
            .read()
            .get(&Self::key(agent_id, user_id, session_id))
            .cloned()
    }

    /// Drop the session window.
    pub fn clear(&self, agent_id: &str, user_id: &str, session_id: &str) {
        self.windows
            .write()
            .remove(&Self::key(agent_id, user_id, session_id));
    }
}

impl Default for ShortTermStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
