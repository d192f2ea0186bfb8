//! Everything about the message being composed: the draft, its attachments,
//! the reply target, the submit debounce and the transport choice.

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::config::DEFAULT_SEND_DEBOUNCE;
use crate::error::SyncResult;
use crate::model::{ConnectionState, MessageId, ReplyPreview};
use crate::view::ViewEntry;

pub const MAX_ATTACHMENTS: usize = 10;
pub const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_TOTAL_BYTES: u64 = 40 * 1024 * 1024;

/// A file picked by the user, held in memory until sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAttachment {
    pub name: String,
    pub content_type: String,
    /// Modification time in milliseconds since the epoch (0 if unknown).
    pub modified_ms: u64,
    pub data: Vec<u8>,
}

impl LocalAttachment {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            modified_ms: 0,
            data,
        }
    }

    pub async fn read(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let modified_ms = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|ts| ts.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let content_type = guess_content_type(&name).to_string();
        Ok(Self {
            name,
            content_type,
            modified_ms,
            data,
        })
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn is_allowed_type(&self) -> bool {
        self.content_type.starts_with("image/") || self.content_type == "application/pdf"
    }

    fn identity(&self) -> (&str, u64, u64) {
        (&self.name, self.modified_ms, self.size())
    }
}

fn guess_content_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Cumulative file selection with the upload limits the server enforces.
#[derive(Debug, Default)]
pub struct AttachmentSelection {
    files: Vec<LocalAttachment>,
}

impl AttachmentSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge newly picked files into the selection. Returns a message per
    /// rejected file.
    pub fn add(&mut self, picked: Vec<LocalAttachment>) -> Vec<String> {
        let mut rejected = Vec::new();
        let accepted = picked.into_iter().filter(|file| {
            if !file.is_allowed_type() {
                rejected.push(format!("file type not allowed: {}", file.name));
                false
            } else if file.size() > MAX_FILE_BYTES {
                rejected.push(format!(
                    "file too large (> {} MB): {}",
                    MAX_FILE_BYTES / (1024 * 1024),
                    file.name
                ));
                false
            } else {
                true
            }
        });

        let mut merged: Vec<LocalAttachment> = Vec::new();
        for file in std::mem::take(&mut self.files).into_iter().chain(accepted) {
            if merged.iter().all(|kept| kept.identity() != file.identity()) {
                merged.push(file);
            }
        }

        let mut total = 0;
        for file in merged {
            if self.files.len() >= MAX_ATTACHMENTS {
                rejected.push(format!("too many files, skipped: {}", file.name));
                continue;
            }
            if total + file.size() > MAX_TOTAL_BYTES {
                rejected.push(format!("total size limit reached, skipped: {}", file.name));
                continue;
            }
            total += file.size();
            self.files.push(file);
        }
        rejected
    }

    pub fn remove(&mut self, name: &str, modified_ms: u64) {
        self.files
            .retain(|file| !(file.name == name && file.modified_ms == modified_ms));
    }

    pub fn files(&self) -> &[LocalAttachment] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn take(&mut self) -> Vec<LocalAttachment> {
        std::mem::take(&mut self.files)
    }

    pub fn summary(&self) -> Option<String> {
        match self.files.as_slice() {
            [] => None,
            [only] => Some(format!("1 file selected: {}", only.name)),
            files => Some(format!("{} files selected", files.len())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub attachments: Vec<LocalAttachment>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<LocalAttachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRoute {
    /// Socket frame plus optimistic echo.
    Realtime,
    /// Multipart form post followed by an immediate poll.
    Form,
}

pub fn choose_route(draft: &Draft, state: ConnectionState) -> SendRoute {
    if state.is_live() && draft.attachments.is_empty() && !draft.text.trim().is_empty() {
        SendRoute::Realtime
    } else {
        SendRoute::Form
    }
}

/// Generate a correlation token for an optimistic echo.
pub fn new_client_token() -> String {
    format!("c{}", Uuid::new_v4().simple())
}

/// Rejects submissions closer together than the debounce window.
#[derive(Debug)]
pub struct SendDebounce {
    window: Duration,
    last: Option<Instant>,
}

impl Default for SendDebounce {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_DEBOUNCE)
    }
}

impl SendDebounce {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

/// The message the next send replies to.
#[derive(Debug, Default)]
pub struct ReplySelection {
    current: Option<ReplyPreview>,
}

impl ReplySelection {
    /// Select a confirmed row as the reply target. Returns `false` for rows
    /// that have no server id yet.
    pub fn select(&mut self, entry: &ViewEntry) -> bool {
        let Some(id) = entry.id() else {
            return false;
        };
        self.current = Some(ReplyPreview::new(
            Some(id),
            entry.message.user.clone(),
            &entry.message.text,
        ));
        true
    }

    pub fn current(&self) -> Option<&ReplyPreview> {
        self.current.as_ref()
    }

    pub fn target_id(&self) -> Option<MessageId> {
        self.current.as_ref().and_then(|reply| reply.id)
    }

    pub fn cancel(&mut self) {
        self.current = None;
    }

    pub fn take(&mut self) -> Option<ReplyPreview> {
        self.current.take()
    }

    /// Put back a target taken for a send that did not go through.
    pub fn restore(&mut self, reply: Option<ReplyPreview>) {
        if self.current.is_none() {
            self.current = reply;
        }
    }
}
