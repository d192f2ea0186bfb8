//! Live message synchronization for a chat room.
//!
//! A room is followed over its WebSocket when that is available and by
//! polling the messages endpoint otherwise. Sent messages are echoed
//! optimistically and reconciled with the server's copy by correlation
//! token; every delivery is deduplicated by server id so overlapping socket
//! and poll traffic renders each message once.
//!
//! Start a client with [`ChatSyncClient::spawn`] and drive it through the
//! returned [`ChatHandle`].

pub mod client;
pub mod compose;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod protocol;
pub mod transport;
pub mod typing;
pub mod view;

pub use client::{ChatEvent, ChatHandle, ChatSyncClient, ViewSnapshot};
pub use compose::{AttachmentSelection, Draft, LocalAttachment};
pub use config::{RoomEndpoints, SyncConfig, SyncConfigBuilder};
pub use error::{SyncError, SyncResult};
pub use model::{Attachment, ConnectionState, Message, MessageId, ReplyPreview};
pub use transport::{ChatApiClient, Invitee};
pub use view::{MessageView, ViewEntry};
