//! Durable storage of message-part files.
//!
//! The transport engine's spool is transient, so every accepted part is
//! copied into per-message storage before the event is marked received or
//! handed to the engine for sending. Hard links are attempted first and a
//! physical copy is the fallback. On any failure the caller rolls back all
//! files already written for that message; an event must never reference
//! missing files.

use std::fs;
use std::path::{Path, PathBuf};

use commlogd_core::config::{ensure_dir_exists, StorageConfig};
use thiserror::Error;
use tracing::{debug, warn};

use crate::event::MessagePart;
use crate::ports::TransportPart;
use crate::shared_types::EventId;

#[derive(Debug, Error)]
pub enum PartCopyError {
    #[error("failed to copy part '{source_path}' for event {event_id}: {source}")]
    Copy {
        event_id: EventId,
        source_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare part directory for event {event_id}: {source}")]
    Directory {
        event_id: EventId,
        #[source]
        source: commlogd_core::CoreError,
    },
}

pub struct PartStorage {
    config: StorageConfig,
}

impl PartStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    /// Copies all parts of one message into durable storage and returns the
    /// stored parts together with the concatenated plain text. On error the
    /// parts copied so far are returned inside the error path via
    /// [`PartStorage::rollback`]; the caller must invoke it.
    pub fn collect_parts(
        &self,
        event_id: EventId,
        parts: &[TransportPart],
    ) -> Result<(Vec<MessagePart>, String), (Vec<MessagePart>, PartCopyError)> {
        let mut stored = Vec::with_capacity(parts.len());
        let mut free_text = String::new();

        for part in parts {
            let path = match self.copy_part_file(event_id, &part.file_name) {
                Ok(path) => path,
                Err(err) => return Err((stored, err)),
            };

            let message_part = MessagePart {
                content_id: part.content_id.clone(),
                content_type: part.content_type.clone(),
                path,
            };

            // All text/plain parts are concatenated into the message text.
            if message_part.is_text() {
                if let Some(text) = read_plain_text(&message_part.path) {
                    if !text.is_empty() {
                        if !free_text.is_empty() {
                            free_text.push('\n');
                        }
                        free_text.push_str(&text);
                    }
                }
            }

            stored.push(message_part);
        }

        Ok((stored, free_text))
    }

    /// Deletes files written for a message whose persistence failed.
    pub fn rollback(&self, parts: &[MessagePart]) {
        for part in parts {
            if let Err(err) = fs::remove_file(&part.path) {
                warn!(path = %part.path.display(), %err, "failed to remove part during rollback");
            }
        }
    }

    fn copy_part_file(&self, event_id: EventId, source: &Path) -> Result<PathBuf, PartCopyError> {
        let dir = self.config.message_part_dir(event_id);
        ensure_dir_exists(&dir).map_err(|source| PartCopyError::Directory { event_id, source })?;

        let file_name = source
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("part"));
        let dest = dir.join(file_name);

        // Hard link first; fall back to a physical copy across filesystems.
        if fs::hard_link(source, &dest).is_err() {
            let _ = fs::remove_file(&dest); // the file may already exist
            fs::copy(source, &dest).map_err(|err| PartCopyError::Copy {
                event_id,
                source_path: source.to_path_buf(),
                source: err,
            })?;
        }

        debug!(path = %dest.display(), "stored message part");
        Ok(dest)
    }
}

fn read_plain_text(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) => Some(text.trim().to_string()),
        Err(err) => {
            warn!(path = %path.display(), %err, "unreadable text part");
            None
        }
    }
}
