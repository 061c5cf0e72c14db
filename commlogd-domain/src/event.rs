//! The conversation event record as seen by this daemon.
//!
//! The authoritative copy lives in the external event store; this is the
//! in-memory view the lifecycle services read, mutate and write back.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared_types::{
    Direction, EventId, EventKind, EventStatus, GroupId, Identity, ReadStatus, Recipient,
};

/// One attachment of a multimedia message, stored durably per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    pub content_id: String,
    pub content_type: String,
    pub path: PathBuf,
}

impl MessagePart {
    pub fn is_text(&self) -> bool {
        self.content_type.starts_with("text/plain")
    }

    /// Parts counted as attachments in notification texts: everything that
    /// is neither plain text nor the SMIL presentation skeleton.
    pub fn is_attachment(&self) -> bool {
        !self.content_type.starts_with("text/plain")
            && !self.content_type.starts_with("application/smil")
    }
}

/// A persisted conversation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned id; `None` until first persisted.
    pub id: Option<EventId>,
    pub kind: EventKind,
    pub direction: Direction,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Local account path.
    pub local_uid: String,
    /// Primary remote address (first recipient).
    pub remote_uid: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    /// Correlation token assigned by the transport layer; links the
    /// notification, the full-content delivery and any delivery/read report
    /// to the same logical message.
    pub mms_id: String,
    /// Opaque token identifying this event for notification amendment.
    pub message_token: String,
    pub status: EventStatus,
    pub read_status: ReadStatus,
    /// Whether the local user has read this event.
    pub is_read: bool,
    /// Whether the sender asked for a read report.
    pub report_read: bool,
    /// Kept only while still needed to route an outgoing read report.
    pub subscriber_identity: Option<Identity>,
    /// Push notification expiry, dropped once the full message arrives.
    pub expiry: Option<u32>,
    /// Raw push payload, dropped once the full message arrives.
    pub push_data: Option<Vec<u8>>,
    pub group_id: Option<GroupId>,
    pub message_parts: Vec<MessagePart>,
    /// Concatenation of all `text/plain` parts.
    pub free_text: String,
    /// Label of an attached vCard, if any (SMS/IM only).
    pub from_vcard_label: Option<String>,
    /// SMS replace-type header, carried through to the notification.
    pub sms_replace_number: Option<String>,
}

impl Event {
    /// A blank event of the given kind and direction, timestamped now.
    pub fn new(kind: EventKind, direction: Direction) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            kind,
            direction,
            start_time: now,
            end_time: now,
            local_uid: String::new(),
            remote_uid: String::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            mms_id: String::new(),
            message_token: String::new(),
            status: EventStatus::Waiting,
            read_status: ReadStatus::Unread,
            is_read: false,
            report_read: false,
            subscriber_identity: None,
            expiry: None,
            push_data: None,
            group_id: None,
            message_parts: Vec::new(),
            free_text: String::new(),
            from_vcard_label: None,
            sms_replace_number: None,
        }
    }

    pub fn recipient(&self) -> Recipient {
        Recipient::new(self.local_uid.clone(), self.remote_uid.clone())
    }

    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    pub fn attachment_count(&self) -> usize {
        self.message_parts.iter().filter(|p| p.is_attachment()).count()
    }
}
