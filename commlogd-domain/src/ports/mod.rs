// Traits (ports) the domain logic expects the outer layers to implement:
// the persistent event store, the MMS transport engine, the OS notification
// sink, contact resolution, feedback cues and per-identity settings.

pub mod contacts;
pub mod event_store;
pub mod feedback;
pub mod notification_sink;
pub mod settings;
pub mod transport;

pub use contacts::{ContactError, ContactInfo, ContactResolver};
pub use event_store::{EventStore, EventStoreError};
pub use feedback::{FeedbackError, FeedbackEvent, FeedbackPlayer};
pub use notification_sink::{NotificationSink, RemoteAction, SinkError, SinkNotification};
pub use settings::IdentitySettings;
pub use transport::{TransportEngine, TransportError, TransportPart};
