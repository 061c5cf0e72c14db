//! Port for the contact-resolution subsystem.

use async_trait::async_trait;
use thiserror::Error;

use crate::shared_types::Recipient;

#[derive(Debug, Error)]
pub enum ContactError {
    #[error("contact resolution failed: {0}")]
    Failed(String),
}

/// Resolved display data for one remote address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInfo {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Asynchronous address-book lookup. `request` queues a resolution; the
/// wiring layer signals overall completion to the dispatcher
/// (`NotificationDispatcher::on_contacts_resolved`), after which
/// `resolved_info` answers from the warmed cache.
#[async_trait]
pub trait ContactResolver: Send + Sync {
    /// Cache probe; `None` means the address has not been resolved yet.
    async fn resolved_info(&self, recipient: &Recipient) -> Option<ContactInfo>;

    /// Starts resolving an address.
    async fn request(&self, recipient: Recipient) -> Result<(), ContactError>;
}
