//! Identifier and enum types shared across the domain services.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric id of a persisted conversation event, assigned by the event store.
pub type EventId = i64;

/// Numeric id of a conversation group (thread) in the event store.
pub type GroupId = i64;

/// Id of a published entry in the notification sink.
pub type SinkId = u32;

/// Id of a running feedback cue (audible/haptic alert).
pub type CueId = u32;

/// SIM subscriber identity (IMSI). Routes transactions to the right modem
/// and selects per-identity preferences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(imsi: impl Into<String>) -> Self {
        Self(imsi.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Object path of a radio modem as reported by the radio stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModemPath(String);

impl ModemPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The messaging account path bound to this modem.
    pub fn account_path(&self) -> String {
        format!("/org/freedesktop/Telepathy/Account/ring/tel{}", self.0)
    }
}

impl fmt::Display for ModemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cellular network registration status of a modem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RegistrationStatus {
    #[default]
    Unknown,
    Unregistered,
    Searching,
    Denied,
    Home,
    Roaming,
}

/// One (account, remote address) pair, the unit of conversation identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    pub local_uid: String,
    pub remote_uid: String,
}

impl Recipient {
    pub fn new(local_uid: impl Into<String>, remote_uid: impl Into<String>) -> Self {
        Self {
            local_uid: local_uid.into(),
            remote_uid: remote_uid.into(),
        }
    }

    pub fn matches(&self, other: &Recipient) -> bool {
        self.local_uid == other.local_uid && self.remote_uid == other.remote_uid
    }
}

/// Kind of conversation behind a notification or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChatType {
    #[default]
    PeerToPeer,
    Unnamed,
    Room,
}

/// Kind of a persisted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Im,
    Sms,
    Mms,
    Call,
    Voicemail,
    VoicemailSms,
}

impl EventKind {
    /// Conversational message kinds are suppressed while their conversation
    /// is observed and evicted when the inbox is observed.
    pub fn is_message(self) -> bool {
        matches!(self, EventKind::Im | EventKind::Sms | EventKind::Mms)
    }
}

/// Direction of a persisted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Lifecycle status of a message event.
///
/// Inbound messages move `ManualNotification | Waiting → Downloading →
/// Received`; outbound ones `Sending → Sent → Delivered`. Either side can
/// end in `TemporarilyFailed` (the transport layer may still retry) or
/// `PermanentlyFailed` (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    ManualNotification,
    Waiting,
    Downloading,
    Received,
    Sending,
    Sent,
    Delivered,
    TemporarilyFailed,
    PermanentlyFailed,
}

impl EventStatus {
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            EventStatus::TemporarilyFailed | EventStatus::PermanentlyFailed
        )
    }
}

/// Read/deleted acknowledgement state reported by the remote party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadStatus {
    #[default]
    Unread,
    Read,
    Deleted,
}

/// Transport progress states for an inbound transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Receiving,
    Deferred,
    NoSpace,
    Decoding,
    RecvError,
    Garbage,
}

/// Transport progress states for an outbound transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Encoding,
    TooBig,
    Sending,
    Deferred,
    NoSpace,
    SendError,
    Refused,
}

/// Delivery report statuses from the remote MMS center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Indeterminate,
    Expired,
    Retrieved,
    Rejected,
    Deferred,
    Unrecognized,
    Forwarded,
}

/// Outcome of sending our own read report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadReportSendStatus {
    Ok,
    TransientError,
    PermanentError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_path_includes_modem_path() {
        let path = ModemPath::new("/ril_0");
        assert_eq!(
            path.account_path(),
            "/org/freedesktop/Telepathy/Account/ring/tel/ril_0"
        );
    }

    #[test]
    fn message_kinds() {
        assert!(EventKind::Mms.is_message());
        assert!(EventKind::Sms.is_message());
        assert!(!EventKind::Call.is_message());
        assert!(!EventKind::Voicemail.is_message());
    }

    #[test]
    fn failed_statuses() {
        assert!(EventStatus::TemporarilyFailed.is_failed());
        assert!(EventStatus::PermanentlyFailed.is_failed());
        assert!(!EventStatus::Received.is_failed());
    }
}
