//! The notification record entity.
//!
//! One `PersonalNotification` represents one still-relevant entry in the
//! notification sink, collapsed per conversation target. Every record is
//! serialized into its sink entry as a base64 JSON snapshot so the set can
//! be restored after a daemon restart.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::strings;
use crate::shared_types::{ChatType, EventKind, Recipient, SinkId};

/// Remote address placeholder for suppressed caller ids.
pub const HIDDEN_ADDRESS: &str = "<hidden>";

/// Sink category of the single voicemail-waiting entry, which is not a
/// `PersonalNotification` and carries no snapshot.
pub const VOICEMAIL_WAITING_CATEGORY: &str = "x-commlogd.call.voicemail-waiting";

/// Grouping of event kinds into sink notification groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCollection {
    Messaging,
    Voice,
    Voicemail,
}

impl EventCollection {
    pub fn of(kind: EventKind) -> Self {
        match kind {
            EventKind::Call => EventCollection::Voice,
            EventKind::Voicemail => EventCollection::Voicemail,
            _ => EventCollection::Messaging,
        }
    }

    /// App-name label shown by the sink for this group.
    pub fn group_name(self) -> &'static str {
        match self {
            EventCollection::Messaging => strings::MESSAGING_GROUP,
            EventCollection::Voice => strings::MISSED_CALLS_GROUP,
            EventCollection::Voicemail => strings::VOICEMAIL_GROUP,
        }
    }
}

/// Per-kind sink category string.
pub fn sink_category(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Im => "x-commlogd.messaging.im",
        EventKind::Sms => "x-commlogd.messaging.sms",
        EventKind::Mms => "x-commlogd.messaging.mms",
        EventKind::Call => "x-commlogd.call.missed",
        EventKind::Voicemail => "x-commlogd.messaging.voicemail",
        EventKind::VoicemailSms => "x-commlogd.messaging.voicemail-sms",
    }
}

/// One live (or queued-for-resolution) notification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalNotification {
    pub remote_uid: String,
    pub account: String,
    pub event_kind: EventKind,
    /// Collapse key within the account: the conversation channel target.
    pub target_id: String,
    pub chat_type: ChatType,
    pub notification_text: String,
    pub chat_name: String,
    /// Token of the underlying store event, used to amend edited events.
    pub event_token: String,
    pub sms_replace_number: String,
    pub contact_name: String,
    pub avatar_url: String,
    pub item_count: u32,
    pub timestamp: DateTime<Utc>,
    /// Needs (re)publishing to the sink.
    #[serde(skip)]
    pub pending: bool,
    /// Sink id once published.
    #[serde(skip)]
    pub sink_id: Option<SinkId>,
}

impl PersonalNotification {
    pub fn new(
        remote_uid: impl Into<String>,
        account: impl Into<String>,
        event_kind: EventKind,
        target_id: impl Into<String>,
        chat_type: ChatType,
    ) -> Self {
        Self {
            remote_uid: remote_uid.into(),
            account: account.into(),
            event_kind,
            target_id: target_id.into(),
            chat_type,
            notification_text: String::new(),
            chat_name: String::new(),
            event_token: String::new(),
            sms_replace_number: String::new(),
            contact_name: String::new(),
            avatar_url: String::new(),
            item_count: 1,
            timestamp: Utc::now(),
            pending: true,
            sink_id: None,
        }
    }

    pub fn collection(&self) -> EventCollection {
        EventCollection::of(self.event_kind)
    }

    pub fn recipient(&self) -> Recipient {
        Recipient::new(self.account.clone(), self.remote_uid.clone())
    }

    /// The summary line: chat name, then resolved contact name, then the
    /// private-number placeholder, then the raw address.
    pub fn notification_name(&self) -> String {
        if !self.chat_name.is_empty() {
            self.chat_name.clone()
        } else if !self.contact_name.is_empty() {
            self.contact_name.clone()
        } else if self.remote_uid == HIDDEN_ADDRESS {
            strings::PRIVATE_NUMBER.to_string()
        } else {
            self.remote_uid.clone()
        }
    }

    /// Whether the remote address can be dialled, gating the call-back and
    /// call actions. Only phone-transported kinds qualify.
    pub fn has_phone_number(&self) -> bool {
        matches!(
            self.event_kind,
            EventKind::Sms | EventKind::Mms | EventKind::VoicemailSms
        ) && self.remote_uid.chars().any(|c| c.is_ascii_digit())
    }

    /// Base64 JSON snapshot stored in the sink entry.
    pub fn snapshot(&self) -> Option<String> {
        match serde_json::to_vec(self) {
            Ok(json) => Some(BASE64.encode(json)),
            Err(err) => {
                warn!(%err, "failed to serialize notification snapshot");
                None
            }
        }
    }

    /// Rebuilds a record from a sink-stored snapshot. `None` for anything
    /// unparseable; the caller closes such entries.
    pub fn restore(snapshot: &str) -> Option<Self> {
        let json = BASE64.decode(snapshot).ok()?;
        serde_json::from_slice(&json).ok()
    }
}
