//! Cancellation gate shared between the generate and stop paths.
//!
//! Each generation gets its own [`CancellationToken`], registered under its
//! conversation. A stop request from any task cancels that token; the
//! generation's lease removes the entry when it finishes, but only if no newer
//! generation has replaced it since.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// How long an active-generation entry stays stoppable
pub const GENERATION_TTL: Duration = Duration::from_secs(10 * 60);

struct Entry {
    generation_id: u64,
    token: CancellationToken,
    started_at: Instant,
}

/// Conversation uid -> cancellation token of its live generation
#[derive(Clone)]
pub struct CancellationRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    next_id: Arc<AtomicU64>,
    ttl: Duration,
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::with_ttl(GENERATION_TTL)
    }
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            ttl,
        }
    }

    /// Register a new generation for a conversation.
    ///
    /// A previous entry is replaced; its generation keeps running but can no
    /// longer be stopped through the registry.
    pub fn mark_active(&self, conversation_uid: &str) -> GenerationLease {
        let generation_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries);
        entries.insert(
            conversation_uid.to_string(),
            Entry {
                generation_id,
                token: token.clone(),
                started_at: Instant::now(),
            },
        );
        tracing::debug!(conversation_uid, generation_id, "generation marked active");

        GenerationLease {
            registry: self.clone(),
            conversation_uid: conversation_uid.to_string(),
            generation_id,
            token,
        }
    }

    /// Signal the live generation of a conversation to stop.
    ///
    /// Returns `true` if a live generation was signalled.
    pub fn stop_generate(&self, conversation_uid: &str) -> bool {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries);
        match entries.get(conversation_uid) {
            Some(entry) => {
                entry.token.cancel();
                tracing::info!(
                    conversation_uid,
                    generation_id = entry.generation_id,
                    "stop requested"
                );
                true
            }
            None => {
                tracing::debug!(conversation_uid, "stop requested but nothing is running");
                false
            }
        }
    }

    /// Whether a conversation has a live, stoppable generation
    pub fn is_active(&self, conversation_uid: &str) -> bool {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries);
        entries.contains_key(conversation_uid)
    }

    fn clear(&self, conversation_uid: &str, generation_id: u64) {
        let mut entries = self.entries.lock();
        if entries
            .get(conversation_uid)
            .is_some_and(|entry| entry.generation_id == generation_id)
        {
            entries.remove(conversation_uid);
        }
    }

    fn purge_expired(&self, entries: &mut HashMap<String, Entry>) {
        let ttl = self.ttl;
        entries.retain(|conversation_uid, entry| {
            let live = entry.started_at.elapsed() < ttl;
            if !live {
                tracing::debug!(conversation_uid, "expiring stale generation entry");
            }
            live
        });
    }
}

/// Ownership of one registered generation; clears its entry on drop
pub struct GenerationLease {
    registry: CancellationRegistry,
    conversation_uid: String,
    generation_id: u64,
    token: CancellationToken,
}

impl GenerationLease {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for GenerationLease {
    fn drop(&mut self) {
        self.registry
            .clear(&self.conversation_uid, self.generation_id);
    }
}
