use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Only the most recent messages are kept when the queue is rewritten.
const MAX_MESSAGES: usize = 100;

/// A listener message queued by an external ingestion bot. An unread
/// message biases the next dedication-category selection, then gets
/// marked read — a scheduling bias, not a parsing task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerMessage {
    pub message: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub read: bool,
}

/// File-backed listener message queue, shared with the ingestion side.
/// Reloaded from disk on every operation so external writers are seen.
pub struct MessageStore {
    path: PathBuf,
}

impl MessageStore {
    pub fn new(path: &Path) -> Self {
        MessageStore {
            path: path.to_path_buf(),
        }
    }

    /// All messages. Missing file = empty queue; corrupt file is logged
    /// and treated as empty.
    pub fn load(&self) -> Vec<ListenerMessage> {
        if !self.path.exists() {
            return Vec::new();
        }
        match fs::read_to_string(&self.path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(messages) => messages,
                Err(e) => {
                    crate::log_warn(&format!(
                        "Corrupt message queue '{}': {}",
                        self.path.display(),
                        e
                    ));
                    Vec::new()
                }
            },
            Err(e) => {
                crate::log_warn(&format!("Could not read message queue: {}", e));
                Vec::new()
            }
        }
    }

    /// Oldest unread message and its index, if any.
    pub fn next_unread(&self) -> Option<(usize, ListenerMessage)> {
        self.load()
            .into_iter()
            .enumerate()
            .find(|(_, m)| !m.read)
    }

    /// Mark a message read and trim the queue to the most recent entries.
    pub fn mark_read(&self, index: usize) -> Result<(), String> {
        let mut messages = self.load();
        let msg = messages
            .get_mut(index)
            .ok_or_else(|| format!("Message index {} out of range", index))?;
        msg.read = true;
        if messages.len() > MAX_MESSAGES {
            let excess = messages.len() - MAX_MESSAGES;
            messages.drain(..excess);
        }
        self.save(&messages)
    }

    /// Append a message to the queue (used by the CLI and ingestion tools).
    pub fn push(&self, message: &str, from: &str) -> Result<(), String> {
        let mut messages = self.load();
        messages.push(ListenerMessage {
            message: message.to_string(),
            from: from.to_string(),
            timestamp: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            read: false,
        });
        if messages.len() > MAX_MESSAGES {
            let excess = messages.len() - MAX_MESSAGES;
            messages.drain(..excess);
        }
        self.save(&messages)
    }

    fn save(&self, messages: &[ListenerMessage]) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Cannot create '{}': {}", parent.display(), e))?;
        }
        let json = serde_json::to_string_pretty(messages)
            .map_err(|e| format!("Serialize error: {}", e))?;
        fs::write(&self.path, json)
            .map_err(|e| format!("Write '{}': {}", self.path.display(), e))
    }
}
