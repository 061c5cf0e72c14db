//! In-flight transaction bookkeeping.

use std::collections::{HashMap, HashSet};

use crate::shared_types::{EventId, ModemPath};

/// Multimap from modem to the event ids currently in flight with the
/// transport engine. A given event id is tracked under at most one modem
/// at a time. Guarded by the lifecycle's single mutex; no locking here.
#[derive(Debug, Default)]
pub struct TransactionTable {
    active: HashMap<ModemPath, HashSet<EventId>>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, modem: ModemPath, event_id: EventId) {
        // Re-tracking under a new modem moves the entry.
        self.untrack_everywhere(event_id);
        self.active.entry(modem).or_default().insert(event_id);
    }

    pub fn untrack(&mut self, modem: &ModemPath, event_id: EventId) {
        if let Some(ids) = self.active.get_mut(modem) {
            ids.remove(&event_id);
            if ids.is_empty() {
                self.active.remove(modem);
            }
        }
    }

    /// Drops an entry regardless of which modem it is tracked under. Used
    /// when the event's identity can no longer be resolved to a modem.
    pub fn untrack_everywhere(&mut self, event_id: EventId) {
        self.active.retain(|_, ids| {
            ids.remove(&event_id);
            !ids.is_empty()
        });
    }

    pub fn tracked(&self, modem: &ModemPath) -> Vec<EventId> {
        self.active
            .get(modem)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_tracked(&self, event_id: EventId) -> bool {
        self.active.values().any(|ids| ids.contains(&event_id))
    }

    /// Removes and returns every entry for the modem in one step, so the
    /// caller can abort them without a window where some remain visible.
    pub fn cancel_all(&mut self, modem: &ModemPath) -> Vec<EventId> {
        self.active
            .remove(modem)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default()
    }
}
