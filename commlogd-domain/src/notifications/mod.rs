// User-notification reconciliation: the record entity, display texts,
// remote-action sets and the dispatcher service.

pub mod actions;
pub mod errors;
pub mod service;
pub mod strings;
pub mod types;

pub use errors::NotificationError;
pub use service::{notification_text, NotificationDispatcher, Notifier, SinkEntry};
pub use types::{
    sink_category, EventCollection, PersonalNotification, HIDDEN_ADDRESS,
    VOICEMAIL_WAITING_CATEGORY,
};
