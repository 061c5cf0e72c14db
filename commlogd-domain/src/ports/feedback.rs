//! Port for short audible/haptic feedback cues.

use async_trait::async_trait;
use thiserror::Error;

use crate::shared_types::CueId;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("feedback playback failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackEvent {
    Sms,
    Chat,
}

/// Plays a cue and returns its id; completion (or failure) is reported back
/// through `NotificationDispatcher::on_feedback_finished`.
#[async_trait]
pub trait FeedbackPlayer: Send + Sync {
    async fn play(&self, event: FeedbackEvent) -> Result<CueId, FeedbackError>;
}
