use thiserror::Error;

use super::parts::PartCopyError;
use crate::ports::{EventStoreError, TransportError};

#[derive(Debug, Error)]
pub enum MmsError {
    /// Outgoing group MMS is not implemented; rejected before any state is
    /// created.
    #[error("outgoing group MMS is not supported ({recipients} recipients)")]
    GroupMessageUnsupported { recipients: usize },

    #[error("outgoing MMS has no recipients")]
    NoRecipients,

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    PartCopy(#[from] PartCopyError),
}
