use thiserror::Error;

use crate::ports::{ContactError, FeedbackError, SinkError};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Contact(#[from] ContactError),

    #[error(transparent)]
    Feedback(#[from] FeedbackError),
}
