//! Bookkeeping for background gadget sessions
//!
//! Sessions live on the gadget runtime; this tracker only remembers which ids this
//! process started so operator logs and tool messages can name the image behind an
//! id. Results are never stored here, they are pulled from the runtime on demand.
//! Ids the tracker has never seen (for example ones started by an earlier server
//! process) are still forwarded to the runtime.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub image: String,
    pub started_at: Instant,
}

/// Background sessions started by this process and not yet stopped, keyed by session id
#[derive(Clone, Default)]
pub struct SessionTracker {
    sessions: Arc<DashMap<String, SessionEntry>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session the runtime accepted
    pub fn record_started(&self, id: &str, image: &str) {
        self.sessions.insert(
            id.to_string(),
            SessionEntry {
                image: image.to_string(),
                started_at: Instant::now(),
            },
        );
        log::info!(
            "Started background gadget {image} with id {id} ({} running)",
            self.running_count()
        );
    }

    /// Forget a session after the runtime confirmed it stopped.
    ///
    /// Returns the removed entry, or None for an id this process never started.
    pub fn record_stopped(&self, id: &str) -> Option<SessionEntry> {
        let (_, entry) = self.sessions.remove(id)?;
        log::info!(
            "Stopped background gadget {} with id {id} after {:?}",
            entry.image,
            entry.started_at.elapsed()
        );
        Some(entry)
    }

    pub fn get(&self, id: &str) -> Option<SessionEntry> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn running_count(&self) -> usize {
        self.sessions.len()
    }
}
