//! Port for the persistent conversation/event store.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::Event;
use crate::shared_types::{EventId, GroupId};

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("event {0} not found")]
    NotFound(EventId),

    #[error("storage rejected the operation: {0}")]
    Storage(String),
}

/// The external conversation store. All calls are asynchronous; the caller
/// re-fetches records before mutating to avoid clobbering concurrent
/// updates from the UI side.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists a new event, assigning its id (written back into `event`)
    /// and returning it.
    async fn add_event(&self, event: &mut Event) -> Result<EventId, EventStoreError>;

    /// Writes back a previously persisted event.
    async fn modify_event(&self, event: &Event) -> Result<(), EventStoreError>;

    async fn get_event(&self, id: EventId) -> Result<Option<Event>, EventStoreError>;

    /// Looks up an event by its transport correlation token.
    async fn get_event_by_token(&self, mms_id: &str) -> Result<Option<Event>, EventStoreError>;

    /// Finds or creates the conversation group for the event's recipient and
    /// records it in `event.group_id`.
    async fn ensure_group(&self, event: &mut Event) -> Result<GroupId, EventStoreError>;

    /// Moves a persisted event into another conversation group.
    async fn move_event(&self, id: EventId, group: GroupId) -> Result<(), EventStoreError>;

    /// MMS events in the given group that still owe the sender a read
    /// report (read by the user, report requested, identity still known).
    async fn events_awaiting_read_report(
        &self,
        group: GroupId,
    ) -> Result<Vec<Event>, EventStoreError>;
}
