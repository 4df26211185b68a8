// Edit-session generations.
//
// A render always runs to completion. Before its result is committed the
// caller checks its ticket: if a newer session started for the same record in
// the meantime, the older result is dropped instead of clobbering the newer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tessera_common::types::AssetId;

/// Proof that an edit started at a given generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditTicket {
    record: AssetId,
    generation: u64,
}

impl EditTicket {
    pub fn record(&self) -> &AssetId {
        &self.record
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Latest edit generation per record. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    next: Arc<AtomicU64>,
    current: Arc<Mutex<HashMap<AssetId, u64>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new edit for `record`, superseding any earlier ticket.
    pub fn begin(&self, record: &AssetId) -> EditTicket {
        let generation = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock().insert(record.clone(), generation);
        EditTicket { record: record.clone(), generation }
    }

    /// True while no newer edit has begun for the ticket's record.
    pub fn is_current(&self, ticket: &EditTicket) -> bool {
        self.lock().get(&ticket.record) == Some(&ticket.generation)
    }

    /// Forget `record`; every outstanding ticket for it becomes stale.
    pub fn end(&self, record: &AssetId) {
        self.lock().remove(record);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AssetId, u64>> {
        // A poisoned map is still a consistent map of integers.
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AssetId {
        AssetId::parse(s).unwrap()
    }

    #[test]
    fn newer_ticket_supersedes_older() {
        let tracker = SessionTracker::new();
        let first = tracker.begin(&id("hero"));
        let second = tracker.begin(&id("hero"));

        assert!(!tracker.is_current(&first));
        assert!(tracker.is_current(&second));
        assert!(second.generation() > first.generation());
    }

    #[test]
    fn records_are_independent() {
        let tracker = SessionTracker::new();
        let hero = tracker.begin(&id("hero"));
        let _poster = tracker.begin(&id("poster"));

        assert!(tracker.is_current(&hero));
    }

    #[test]
    fn ending_invalidates_tickets() {
        let tracker = SessionTracker::new();
        let ticket = tracker.begin(&id("hero"));
        tracker.end(&id("hero"));

        assert!(!tracker.is_current(&ticket));
    }

    #[test]
    fn clones_share_generations() {
        let tracker = SessionTracker::new();
        let other = tracker.clone();
        let ticket = tracker.begin(&id("hero"));
        other.begin(&id("hero"));

        assert!(!tracker.is_current(&ticket));
    }
}
