//! Domain layer of commlogd, the communication-log daemon.
//!
//! Turns raw telecom events (MMS push notifications, modem/SIM state,
//! delivery and read reports) into persisted conversation records and
//! user-visible notifications, honoring the mobile-data policy. The outer
//! layers supply the real collaborators behind the [`ports`] traits; the
//! logic here is transport- and bus-agnostic.

// Re-export the infrastructure crate
pub use commlogd_core as core;

pub mod error;
pub mod event;
pub mod mms_lifecycle;
pub mod modem_registry;
pub mod notifications;
pub mod ports;
pub mod shared_types;

pub use error::DomainError;
pub use event::{Event, MessagePart};
pub use mms_lifecycle::{MmsError, MmsLifecycle, PartStorage, TransactionTable};
pub use modem_registry::{ModemRegistry, PolicyEvent};
pub use notifications::{
    NotificationDispatcher, NotificationError, Notifier, PersonalNotification, SinkEntry,
};
pub use shared_types::{
    ChatType, Direction, EventId, EventKind, EventStatus, GroupId, Identity, ModemPath,
    ReadStatus, Recipient, RegistrationStatus, SinkId,
};

use std::sync::Arc;

use commlogd_core::config::StorageConfig;
use tokio::sync::broadcast;

use crate::ports::{
    ContactResolver, EventStore, FeedbackPlayer, IdentitySettings, NotificationSink,
    TransportEngine,
};

/// The fully wired domain services.
///
/// `policy_events` carries [`PolicyEvent`] broadcasts from the registry;
/// the host loop forwards each one to
/// [`MmsLifecycle::on_data_policy_changed`].
pub struct DomainServices {
    pub registry: Arc<ModemRegistry>,
    pub lifecycle: Arc<MmsLifecycle>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub policy_events: broadcast::Receiver<PolicyEvent>,
}

/// Wires the domain services together over the given collaborators.
#[allow(clippy::too_many_arguments)]
pub fn initialize(
    store: Arc<dyn EventStore>,
    transport: Arc<dyn TransportEngine>,
    settings: Arc<dyn IdentitySettings>,
    sink: Arc<dyn NotificationSink>,
    resolver: Arc<dyn ContactResolver>,
    feedback: Arc<dyn FeedbackPlayer>,
    storage: StorageConfig,
) -> DomainServices {
    let registry = Arc::new(ModemRegistry::new(16));
    let policy_events = registry.subscribe();

    let dispatcher = Arc::new(NotificationDispatcher::new(sink, resolver, feedback));
    let lifecycle = Arc::new(MmsLifecycle::new(
        store,
        transport,
        settings,
        registry.clone(),
        dispatcher.clone(),
        PartStorage::new(storage),
    ));

    DomainServices {
        registry,
        lifecycle,
        dispatcher,
        policy_events,
    }
}
