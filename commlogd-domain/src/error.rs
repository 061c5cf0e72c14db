//! Crate-level error aggregation.

use thiserror::Error;

use crate::mms_lifecycle::MmsError;
use crate::notifications::NotificationError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error(transparent)]
    Mms(#[from] MmsError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error(transparent)]
    Core(#[from] commlogd_core::CoreError),
}
