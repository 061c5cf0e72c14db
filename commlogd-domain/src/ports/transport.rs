//! Port for the MMS transport engine.
//!
//! The engine owns encoding/decoding, HTTP transfer and retry policy. This
//! daemon only dispatches requests carrying the event id as correlation and
//! consumes the engine's progress callbacks (which arrive through the
//! `MmsLifecycle` entry points, not through this trait).

use async_trait::async_trait;
use thiserror::Error;

use crate::shared_types::{EventId, Identity, ReadStatus};

#[derive(Debug, Error)]
pub enum TransportError {
    /// Transient failure; the transport layer may retry on its own.
    #[error("transport failure: {0}")]
    Transient(String),

    /// Permanent refusal; never retried.
    #[error("transport rejected the request: {0}")]
    Rejected(String),
}

/// One attachment handed to or received from the transport engine, still
/// referencing the engine's transient spool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPart {
    pub file_name: std::path::PathBuf,
    pub content_type: String,
    pub content_id: String,
}

#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Dispatches an outbound message. Returns the subscriber identity the
    /// engine assigned to the transfer, needed later to match delivery and
    /// read reports.
    #[allow(clippy::too_many_arguments)]
    async fn send_message(
        &self,
        event_id: EventId,
        imsi: &Identity,
        to: &[String],
        cc: &[String],
        bcc: &[String],
        subject: &str,
        flags: u32,
        parts: &[TransportPart],
    ) -> Result<Identity, TransportError>;

    /// Sends our read/deleted acknowledgement for a received message.
    async fn send_read_report(
        &self,
        event_id: EventId,
        imsi: &Identity,
        mms_id: &str,
        recipient: &str,
        status: ReadStatus,
    ) -> Result<(), TransportError>;

    /// Aborts an in-flight transfer. Used for policy-driven cancellation;
    /// there is no timeout-based cancellation in this daemon.
    async fn cancel(&self, event_id: EventId) -> Result<(), TransportError>;
}
