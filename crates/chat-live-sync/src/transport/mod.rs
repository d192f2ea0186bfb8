//! Network seams of the client.
//!
//! The actor only talks to the backend through [`RoomApi`] (HTTP endpoints)
//! and [`RealtimeConnector`] (the room socket), so tests can swap in the
//! in-memory pair from [`mock`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::compose::LocalAttachment;
use crate::error::{SyncError, SyncResult};
use crate::model::{Message, MessageId};
use crate::protocol::{OutboundFrame, PostReceipt};

pub mod http;
pub mod mock;
pub mod websocket;

pub use http::{ChatApiClient, Invitee};
pub use websocket::WebSocketConnector;

/// A message submitted through the form route.
#[derive(Debug, Clone, Default)]
pub struct OutgoingPost {
    pub text: String,
    pub reply_to: Option<MessageId>,
    pub attachments: Vec<LocalAttachment>,
}

#[async_trait]
pub trait RoomApi: Send + Sync {
    /// Messages newer than `since_id`, or the latest page when `None`.
    async fn fetch_since(&self, since_id: Option<MessageId>) -> SyncResult<Vec<Message>>;

    async fn post_message(&self, post: OutgoingPost) -> SyncResult<PostReceipt>;

    async fn delete_message(&self, id: MessageId) -> SyncResult<()>;
}

#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self) -> SyncResult<SocketLink>;
}

/// An open room socket, seen as two channels of JSON text frames.
///
/// The pump task behind the channels is aborted when the link is dropped.
pub struct SocketLink {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
    task: Option<JoinHandle<()>>,
}

impl SocketLink {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            task: None,
        }
    }

    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn send(&self, frame: &OutboundFrame) -> SyncResult<()> {
        self.outbound
            .send(frame.to_text())
            .map_err(|_| SyncError::Closed)
    }

    /// Next text frame; `None` once the socket is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }
}

impl Drop for SocketLink {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
