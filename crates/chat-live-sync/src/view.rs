//! Render/dedupe layer.
//!
//! `MessageView` is the single source of truth for what the message list
//! shows. Every incoming message, whatever transport delivered it, goes
//! through [`MessageView::apply`], which decides whether to skip it,
//! reconcile it with a pending optimistic echo, or append it. Rows are
//! addressed by server id once confirmed and by correlation token before
//! that; both indexes are kept explicitly instead of looking rows up by
//! their rendered content.

use std::collections::{HashMap, HashSet};

use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::config::DEFAULT_SCROLL_THRESHOLD_PX;
use crate::model::{Message, MessageId, ReplyPreview};

/// Where an incoming message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Socket,
    Poll,
    /// Initial backlog (socket `history` frame or first poll).
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Already rendered under this id; `refreshed` when the body text changed.
    Skipped { refreshed: bool },
    /// A pending echo was upgraded in place.
    Reconciled { index: usize },
    /// Appended at `index`; `scroll` when the view should follow it.
    Inserted { index: usize, scroll: bool },
}

/// One row of the message list.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewEntry {
    pub message: Message,
    /// Optimistic echo still waiting for server confirmation.
    pub pending: bool,
    pub from_current_user: bool,
}

impl ViewEntry {
    pub fn id(&self) -> Option<MessageId> {
        self.message.id
    }

    pub fn can_delete(&self) -> bool {
        !self.pending && self.message.is_confirmed() && self.message.can_delete
    }

    pub fn can_reply(&self) -> bool {
        self.message.is_confirmed() && !self.from_current_user
    }
}

#[derive(Debug)]
pub struct MessageView {
    current_user: String,
    entries: Vec<ViewEntry>,
    by_id: HashMap<MessageId, usize>,
    pending: HashMap<String, usize>,
    /// Ids removed by the server or by us; late deliveries must not resurrect them.
    removed: HashSet<MessageId>,
    last_id: Option<MessageId>,
    unseen: u32,
    near_bottom: bool,
    scroll_threshold: u32,
}

impl MessageView {
    pub fn new(current_user: impl Into<String>) -> Self {
        Self::with_threshold(current_user, DEFAULT_SCROLL_THRESHOLD_PX)
    }

    pub fn with_threshold(current_user: impl Into<String>, scroll_threshold: u32) -> Self {
        Self {
            current_user: current_user.into(),
            entries: Vec::new(),
            by_id: HashMap::new(),
            pending: HashMap::new(),
            removed: HashSet::new(),
            last_id: None,
            unseen: 0,
            near_bottom: true,
            scroll_threshold,
        }
    }

    pub fn entries(&self) -> &[ViewEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_by_id(&self, id: MessageId) -> Option<&ViewEntry> {
        self.by_id.get(&id).map(|&index| &self.entries[index])
    }

    pub fn get_by_token(&self, token: &str) -> Option<&ViewEntry> {
        self.pending.get(token).map(|&index| &self.entries[index])
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Highest server id rendered so far; the next `since_id`.
    pub fn last_id(&self) -> Option<MessageId> {
        self.last_id
    }

    /// Messages that arrived while the view was scrolled away from the bottom.
    pub fn unseen(&self) -> u32 {
        self.unseen
    }

    pub fn near_bottom(&self) -> bool {
        self.near_bottom
    }

    pub fn show_jump_button(&self) -> bool {
        !self.near_bottom
    }

    /// Decide what to do with an incoming message and apply it.
    pub fn apply(&mut self, message: Message, origin: Origin) -> RenderOutcome {
        // Reconciliation wins over id dedupe: the confirmed copy may arrive by
        // poll before the socket echo, or the other way round.
        if let Some(index) = message
            .client_id
            .as_deref()
            .and_then(|token| self.pending.get(token).copied())
        {
            return self.reconcile(index, message);
        }

        if let Some(id) = message.id {
            if self.removed.contains(&id) {
                trace!(message_id = id, "ignoring delivery of removed message");
                return RenderOutcome::Skipped { refreshed: false };
            }
            if let Some(&index) = self.by_id.get(&id) {
                let entry = &mut self.entries[index];
                let refreshed = entry.message.text != message.text;
                if refreshed {
                    entry.message.text = message.text;
                }
                trace!(message_id = id, ?origin, refreshed, "duplicate delivery");
                return RenderOutcome::Skipped { refreshed };
            }
        }

        self.insert(message, origin)
    }

    /// Render a backlog: sorted ascending by id then time, never counted as
    /// unseen, and the view jumps to the bottom afterwards.
    pub fn load_history(&mut self, mut messages: Vec<Message>) -> Vec<RenderOutcome> {
        messages.sort_by(|a, b| {
            (a.id.is_none(), a.id, a.created_at).cmp(&(b.id.is_none(), b.id, b.created_at))
        });
        let outcomes = messages
            .into_iter()
            .map(|message| self.apply(message, Origin::History))
            .collect();
        self.jump_to_bottom();
        outcomes
    }

    /// Render a locally sent message before the server has seen it.
    pub fn push_echo(
        &mut self,
        text: impl Into<String>,
        token: impl Into<String>,
        reply_to: Option<ReplyPreview>,
    ) -> RenderOutcome {
        let token = token.into();
        let message = Message {
            id: None,
            user: self.current_user.clone(),
            text: text.into(),
            created_at: Some(OffsetDateTime::now_utc()),
            reply_to,
            attachments: Vec::new(),
            client_id: Some(token.clone()),
            can_delete: false,
            is_current_user: true,
        };
        let index = self.entries.len();
        self.entries.push(ViewEntry {
            message,
            pending: true,
            from_current_user: true,
        });
        self.pending.insert(token, index);
        self.jump_to_bottom();
        RenderOutcome::Inserted {
            index,
            scroll: true,
        }
    }

    /// Drop a pending echo whose send failed.
    pub fn fail_echo(&mut self, token: &str) -> bool {
        let Some(index) = self.pending.remove(token) else {
            return false;
        };
        self.entries.remove(index);
        self.reindex();
        true
    }

    /// Optimistically drop a row the current user asked to delete. Rows that
    /// are pending or not deletable are left alone.
    pub fn mark_removing(&mut self, id: MessageId) -> Option<ViewEntry> {
        if !self.get_by_id(id).is_some_and(ViewEntry::can_delete) {
            return None;
        }
        debug!(message_id = id, "removing message ahead of server confirmation");
        self.remove(id)
    }

    /// Remove a message from the list (server `message_removed`, or a local delete).
    pub fn remove(&mut self, id: MessageId) -> Option<ViewEntry> {
        self.removed.insert(id);
        let index = self.by_id.get(&id).copied()?;
        let entry = self.entries.remove(index);
        self.reindex();
        Some(entry)
    }

    /// Report how far the viewport is from the bottom of the list. Returns
    /// `true` when the unseen counter changed.
    pub fn set_scroll_offset(&mut self, distance_from_bottom: u32) -> bool {
        self.near_bottom = distance_from_bottom <= self.scroll_threshold;
        if self.near_bottom && self.unseen > 0 {
            self.unseen = 0;
            return true;
        }
        false
    }

    /// Dismiss the unseen banner without moving the viewport.
    pub fn dismiss_banner(&mut self) -> bool {
        let had_unseen = self.unseen > 0;
        self.unseen = 0;
        had_unseen
    }

    /// Scroll to the bottom and dismiss the unseen banner.
    pub fn jump_to_bottom(&mut self) {
        self.near_bottom = true;
        self.unseen = 0;
    }

    fn insert(&mut self, message: Message, origin: Origin) -> RenderOutcome {
        let from_current_user = message.authored_by(&self.current_user);
        let scroll = origin != Origin::History && self.near_bottom;
        if origin != Origin::History && !self.near_bottom && !from_current_user {
            self.unseen += 1;
        }

        let index = self.entries.len();
        if let Some(id) = message.id {
            self.by_id.insert(id, index);
            self.bump_last_id(id);
        }
        debug!(
            message_id = ?message.id,
            ?origin,
            index,
            unseen = self.unseen,
            "inserting message"
        );
        self.entries.push(ViewEntry {
            message,
            pending: false,
            from_current_user,
        });
        RenderOutcome::Inserted { index, scroll }
    }

    fn reconcile(&mut self, mut index: usize, confirmed: Message) -> RenderOutcome {
        if let Some(token) = confirmed.client_id.as_deref() {
            self.pending.remove(token);
        }

        if let Some(id) = confirmed.id {
            // The poll may already have rendered the confirmed copy as a
            // separate row; fold it away so one row remains.
            if let Some(duplicate) = self.by_id.get(&id).copied().filter(|&dup| dup != index) {
                self.entries.remove(duplicate);
                if duplicate < index {
                    index -= 1;
                }
            }
            self.bump_last_id(id);
        }

        let entry = &mut self.entries[index];
        let message = &mut entry.message;
        if confirmed.is_confirmed() {
            message.id = confirmed.id;
        }
        if !confirmed.text.is_empty() {
            message.text = confirmed.text;
        }
        if !confirmed.user.is_empty() {
            message.user = confirmed.user;
        }
        if confirmed.created_at.is_some() {
            message.created_at = confirmed.created_at;
        }
        if confirmed.reply_to.is_some() {
            message.reply_to = confirmed.reply_to;
        }
        if !confirmed.attachments.is_empty() {
            message.attachments = confirmed.attachments;
        }
        message.can_delete = confirmed.can_delete;
        entry.pending = false;

        debug!(message_id = ?entry.message.id, index, "reconciled pending echo");
        self.reindex();
        RenderOutcome::Reconciled { index }
    }

    fn bump_last_id(&mut self, id: MessageId) {
        self.last_id = Some(self.last_id.map_or(id, |last| last.max(id)));
    }

    fn reindex(&mut self) {
        self.by_id.clear();
        self.pending.clear();
        for (index, entry) in self.entries.iter().enumerate() {
            if let Some(id) = entry.message.id {
                self.by_id.insert(id, index);
            }
            if entry.pending {
                if let Some(token) = &entry.message.client_id {
                    self.pending.insert(token.clone(), index);
                }
            }
        }
    }
}
