//! Conversation store: prior messages in, one persisted outcome out.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::atomic::write_json_atomic;
use crate::core::outcome::{Fragment, MessageKind};
use crate::core::types::{ConversationItem, Role};

/// A persisted conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub project_id: String,
    pub role: Role,
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl StoredMessage {
    pub fn to_conversation_item(&self) -> ConversationItem {
        match self.role {
            Role::User => ConversationItem::user(self.content.clone()),
            Role::Assistant => ConversationItem::assistant(self.content.clone()),
        }
    }
}

/// Input for [`ConversationStore::create_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub project_id: String,
    pub role: Role,
    pub kind: MessageKind,
    pub content: String,
    pub fragment: Option<Fragment>,
    /// Writes carrying a key already stored for the project are not repeated.
    pub idempotency_key: Option<String>,
}

/// External collaborator holding each project's conversation.
pub trait ConversationStore: Send + Sync {
    /// Messages of `project_id`, oldest first.
    fn find_messages(&self, project_id: &str) -> Result<Vec<StoredMessage>>;

    /// Persist `message`. If its idempotency key is already stored for the
    /// project, return that message instead of writing a new one.
    fn create_message(&self, message: NewMessage) -> Result<StoredMessage>;
}

/// Store keeping one `messages.json` per project directory.
#[derive(Debug)]
pub struct FileConversationStore {
    projects_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileConversationStore {
    pub fn new(projects_dir: &Path) -> Self {
        Self {
            projects_dir: projects_dir.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn messages_path(&self, project_id: &str) -> Result<PathBuf> {
        validate_project_id(project_id)?;
        Ok(self.projects_dir.join(project_id).join("messages.json"))
    }

    fn load(&self, path: &Path) -> Result<Vec<StoredMessage>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
    }
}

impl ConversationStore for FileConversationStore {
    fn find_messages(&self, project_id: &str) -> Result<Vec<StoredMessage>> {
        let path = self.messages_path(project_id)?;
        let mut messages = self.load(&path)?;
        messages.sort_by_key(|message| message.created_at);
        debug!(project_id, count = messages.len(), "loaded messages");
        Ok(messages)
    }

    fn create_message(&self, message: NewMessage) -> Result<StoredMessage> {
        let path = self.messages_path(&message.project_id)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("conversation store lock poisoned"))?;
        let mut messages = self.load(&path)?;
        if let Some(existing) = find_by_key(&messages, message.idempotency_key.as_deref()) {
            debug!(message_id = %existing.id, "message already stored");
            return Ok(existing.clone());
        }
        let stored = StoredMessage {
            id: generate_message_id(),
            project_id: message.project_id,
            role: message.role,
            kind: message.kind,
            content: message.content,
            created_at: Utc::now(),
            fragment: message.fragment,
            idempotency_key: message.idempotency_key,
        };
        messages.push(stored.clone());
        write_json_atomic(&path, &messages)?;
        debug!(project_id = %stored.project_id, message_id = %stored.id, kind = ?stored.kind, "message created");
        Ok(stored)
    }
}

/// Message previously stored under `key`, if any.
fn find_by_key<'a>(messages: &'a [StoredMessage], key: Option<&str>) -> Option<&'a StoredMessage> {
    let key = key?;
    messages
        .iter()
        .find(|message| message.idempotency_key.as_deref() == Some(key))
}

/// Turn stored messages into the conversation seed, keeping the newest `limit`.
pub fn history_items(messages: &[StoredMessage], limit: Option<usize>) -> Vec<ConversationItem> {
    let skip = limit.map_or(0, |limit| messages.len().saturating_sub(limit));
    messages
        .iter()
        .skip(skip)
        .map(StoredMessage::to_conversation_item)
        .collect()
}

fn validate_project_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(anyhow!(
            "invalid project id {id:?} (expected [A-Za-z0-9_-]+)"
        ));
    }
    Ok(())
}

fn generate_message_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(10)
        .collect::<String>()
        .to_lowercase();
    format!("msg-{suffix}")
}
