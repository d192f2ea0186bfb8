use tracing::{info, warn};

use crate::error::SyncError;
use crate::model::ConnectionState;

/// What the poller should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingCommand {
    Start,
    Stop,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub polling: PollingCommand,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Tracks whether the room is served by the socket or by polling.
///
/// `Connecting → Live` on open, `Connecting | Live → DegradedPolling` on
/// failure or close, and back to `Live` when a later socket opens.
#[derive(Debug)]
pub struct ConnectionManager {
    room_id: u64,
    state: ConnectionState,
}

impl ConnectionManager {
    pub fn new(room_id: u64) -> Self {
        Self {
            room_id,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    pub fn on_socket_open(&mut self) -> Transition {
        let transition = self.move_to(ConnectionState::Live, PollingCommand::Stop);
        if transition.changed() {
            info!(target: "chat.connection", room = self.room_id, "socket open; live updates");
        }
        transition
    }

    pub fn on_socket_closed(&mut self, reason: &str) -> Transition {
        if self.state.polls() {
            return self.move_to(ConnectionState::DegradedPolling, PollingCommand::Keep);
        }
        info!(
            target: "chat.connection",
            room = self.room_id,
            reason,
            "socket unavailable; falling back to polling"
        );
        self.move_to(ConnectionState::DegradedPolling, PollingCommand::Start)
    }

    pub fn on_connect_failed(&mut self, err: &SyncError) -> Transition {
        warn!(target: "chat.connection", room = self.room_id, error = %err, "socket connect failed");
        self.on_socket_closed("connect failed")
    }

    fn move_to(&mut self, to: ConnectionState, polling: PollingCommand) -> Transition {
        let from = self.state;
        self.state = to;
        Transition { from, to, polling }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_connecting_and_goes_live() {
        let mut manager = ConnectionManager::new(1);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        let transition = manager.on_socket_open();
        assert_eq!(
            transition,
            Transition {
                from: ConnectionState::Connecting,
                to: ConnectionState::Live,
                polling: PollingCommand::Stop,
            }
        );
        assert!(manager.is_live());
    }

    #[test]
    fn failure_starts_polling_once() {
        let mut manager = ConnectionManager::new(1);
        let first = manager.on_connect_failed(&SyncError::Closed);
        assert_eq!(first.polling, PollingCommand::Start);
        assert_eq!(first.to, ConnectionState::DegradedPolling);
        assert!(manager.state().polls());

        let second = manager.on_socket_closed("again");
        assert_eq!(second.polling, PollingCommand::Keep);
        assert!(!second.changed());
    }

    #[test]
    fn live_close_degrades_and_reopen_recovers() {
        let mut manager = ConnectionManager::new(1);
        manager.on_socket_open();
        let closed = manager.on_socket_closed("server went away");
        assert_eq!(closed.from, ConnectionState::Live);
        assert_eq!(closed.polling, PollingCommand::Start);

        let reopened = manager.on_socket_open();
        assert_eq!(reopened.from, ConnectionState::DegradedPolling);
        assert_eq!(reopened.polling, PollingCommand::Stop);
        assert!(manager.is_live());
    }
}
