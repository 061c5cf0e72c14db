//! Port for the OS notification banner subsystem.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared_types::SinkId;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("notification sink error: {0}")]
    Failed(String),
}

/// A named operation the user can trigger from a notification, dispatched
/// to an external service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAction {
    /// Action slot ("default", "app", or empty for named buttons).
    pub name: String,
    /// Button label; empty for the default/app slots.
    pub label: String,
    pub service: String,
    pub path: String,
    pub interface: String,
    pub method: String,
    pub arguments: Vec<serde_json::Value>,
}

/// One entry published to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkNotification {
    pub app_name: String,
    pub category: String,
    pub summary: String,
    pub body: String,
    pub icon: String,
    pub item_count: u32,
    pub timestamp: DateTime<Utc>,
    /// Base64-encoded snapshot of the owning record, restored after a
    /// service restart.
    pub snapshot: Option<String>,
    pub remote_actions: Vec<RemoteAction>,
    /// Id of an existing entry to update in place.
    pub replaces_id: Option<SinkId>,
    /// Banner preview texts; `None` suppresses the banner (used for missed
    /// calls, which only update the count silently).
    pub preview_summary: Option<String>,
    pub preview_body: Option<String>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Publishes (or updates, when `replaces_id` is set) an entry and
    /// returns its sink id.
    async fn publish(&self, notification: &SinkNotification) -> Result<SinkId, SinkError>;

    async fn close(&self, id: SinkId) -> Result<(), SinkError>;
}
