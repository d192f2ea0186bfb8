//! In-memory backend used by tests and offline demos.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite;

use super::{OutgoingPost, RealtimeConnector, RoomApi, SocketLink};
use crate::error::{SyncError, SyncResult};
use crate::model::{Attachment, Message, MessageId};
use crate::protocol::PostReceipt;

const LATEST_PAGE: usize = 50;

#[derive(Default)]
struct RoomState {
    messages: Vec<Message>,
    since_ids: Vec<Option<MessageId>>,
    posts: Vec<OutgoingPost>,
    deletes: Vec<MessageId>,
    next_id: MessageId,
    failing: bool,
    rejection: Option<Vec<String>>,
}

/// Room endpoints backed by a vector of messages.
pub struct MockRoomApi {
    poster: String,
    state: Mutex<RoomState>,
}

impl MockRoomApi {
    /// `poster` is recorded as the author of form posts.
    pub fn new(poster: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            poster: poster.into(),
            state: Mutex::new(RoomState {
                next_id: 1,
                ..RoomState::default()
            }),
        })
    }

    /// Store a message as if another participant had posted it.
    pub async fn seed(&self, message: Message) {
        let mut state = self.state.lock().await;
        if let Some(id) = message.id {
            state.next_id = state.next_id.max(id + 1);
        }
        state.messages.push(message);
    }

    pub async fn set_failing(&self, failing: bool) {
        self.state.lock().await.failing = failing;
    }

    /// Reject subsequent posts with the given form errors.
    pub async fn reject_posts(&self, errors: Option<Vec<String>>) {
        self.state.lock().await.rejection = errors;
    }

    pub async fn since_ids(&self) -> Vec<Option<MessageId>> {
        self.state.lock().await.since_ids.clone()
    }

    pub async fn posts(&self) -> Vec<OutgoingPost> {
        self.state.lock().await.posts.clone()
    }

    pub async fn deletes(&self) -> Vec<MessageId> {
        self.state.lock().await.deletes.clone()
    }

    fn unavailable() -> SyncError {
        SyncError::UnexpectedStatus {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            body: "mock backend failing".into(),
        }
    }
}

#[async_trait]
impl RoomApi for MockRoomApi {
    async fn fetch_since(&self, since_id: Option<MessageId>) -> SyncResult<Vec<Message>> {
        let mut state = self.state.lock().await;
        state.since_ids.push(since_id);
        if state.failing {
            return Err(Self::unavailable());
        }
        let messages = match since_id {
            Some(since) => state
                .messages
                .iter()
                .filter(|m| m.id.is_some_and(|id| id > since))
                .cloned()
                .collect(),
            // Latest page, newest first.
            None => state
                .messages
                .iter()
                .rev()
                .take(LATEST_PAGE)
                .cloned()
                .collect(),
        };
        Ok(messages)
    }

    async fn post_message(&self, post: OutgoingPost) -> SyncResult<PostReceipt> {
        let mut state = self.state.lock().await;
        state.posts.push(post.clone());
        if state.failing {
            return Err(Self::unavailable());
        }
        if let Some(errors) = state.rejection.clone() {
            return Err(SyncError::Rejected(errors));
        }
        let id = state.next_id;
        state.next_id += 1;
        let attachments = post
            .attachments
            .iter()
            .map(|file| Attachment {
                name: file.name.clone(),
                url: format!("/media/chat/{}", file.name),
            })
            .collect();
        state.messages.push(Message {
            id: Some(id),
            user: self.poster.clone(),
            text: post.text,
            attachments,
            can_delete: true,
            ..Message::default()
        });
        Ok(PostReceipt { id: Some(id) })
    }

    async fn delete_message(&self, id: MessageId) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        state.deletes.push(id);
        if state.failing {
            return Err(Self::unavailable());
        }
        state.messages.retain(|m| m.id != Some(id));
        Ok(())
    }
}

/// Hands out in-memory socket links; the server side of each link is
/// delivered to the test as a [`MockSocketPeer`].
pub struct MockConnector {
    available: AtomicBool,
    attempts: AtomicUsize,
    peers: mpsc::UnboundedSender<MockSocketPeer>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockSocketPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            available: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            peers,
        });
        (connector, rx)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeConnector for MockConnector {
    async fn connect(&self) -> SyncResult<SocketLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(tungstenite::Error::ConnectionClosed.into());
        }
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let peer = MockSocketPeer {
            to_client: Some(to_client),
            from_client,
        };
        self.peers.send(peer).map_err(|_| SyncError::Closed)?;
        Ok(SocketLink::new(client_tx, client_rx))
    }
}

/// Server end of a mock socket.
pub struct MockSocketPeer {
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MockSocketPeer {
    /// Push a JSON frame to the client. Returns `false` once closed.
    pub fn push(&self, frame: Value) -> bool {
        self.push_text(frame.to_string())
    }

    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Next frame written by the client, decoded as JSON.
    pub async fn next_frame(&mut self) -> Option<Value> {
        let text = self.from_client.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Any frame already written by the client, without waiting.
    pub fn try_next_frame(&mut self) -> Option<Value> {
        let text = self.from_client.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Simulate the server dropping the connection.
    pub fn close(&mut self) {
        self.to_client = None;
        self.from_client.close();
    }
}
