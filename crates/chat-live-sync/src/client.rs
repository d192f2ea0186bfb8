//! The live-sync actor.
//!
//! One task owns the view model, the connection state machine and the
//! compose state. UI code drives it through a [`ChatHandle`] and reads the
//! result back from a `watch` snapshot or a broadcast stream of
//! [`ChatEvent`]s. Network calls run in spawned tasks and report back over
//! an internal channel, so the loop never waits on the network.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::compose::{
    choose_route, new_client_token, Draft, ReplySelection, SendDebounce, SendRoute,
};
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, PollingCommand, Transition};
use crate::error::{SyncError, SyncResult};
use crate::model::{ConnectionState, Message, MessageId, ReplyPreview};
use crate::protocol::{InboundFrame, OutboundFrame, PostReceipt};
use crate::transport::{
    ChatApiClient, OutgoingPost, RealtimeConnector, RoomApi, SocketLink, WebSocketConnector,
};
use crate::typing::{TypingIndicator, TypingSignal, TypingThrottle};
use crate::view::{MessageView, Origin, RenderOutcome, ViewEntry};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Floor for hand-built configs; `tokio::time::interval` panics on zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const EVENT_CAPACITY: usize = 256;

/// Everything a UI needs to draw the room.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub state: ConnectionState,
    pub entries: Vec<ViewEntry>,
    pub unseen: u32,
    pub show_jump_button: bool,
    /// `"<user> is typing…"` while another participant is typing.
    pub typing: Option<String>,
    pub replying_to: Option<ReplyPreview>,
    /// Form errors from the last rejected send, joined with `" · "`.
    pub compose_error: Option<String>,
    pub last_id: Option<MessageId>,
}

impl ViewSnapshot {
    fn empty() -> Self {
        Self {
            state: ConnectionState::Connecting,
            entries: Vec::new(),
            unseen: 0,
            show_jump_button: false,
            typing: None,
            replying_to: None,
            compose_error: None,
            last_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Inserted {
        index: usize,
        message: Message,
        pending: bool,
    },
    Reconciled {
        index: usize,
        id: Option<MessageId>,
    },
    /// Body text of an already rendered message changed.
    Refreshed {
        id: MessageId,
    },
    Removed {
        id: MessageId,
    },
    /// An optimistic echo was withdrawn because its socket write failed.
    EchoDropped {
        client_id: String,
    },
    ScrollToBottom,
    UnseenChanged(u32),
    ConnectionChanged(ConnectionState),
    Typing(Option<String>),
    ComposeError(String),
}

#[derive(Debug)]
enum Command {
    Submit(Draft),
    Keystroke,
    Blur,
    Reply(MessageId),
    CancelReply,
    Delete(MessageId),
    Scrolled(u32),
    JumpToBottom,
    DismissBanner,
    Shutdown,
}

/// Results of background work, posted back to the actor.
enum Completion {
    Connected(SyncResult<SocketLink>),
    Polled {
        since_id: Option<MessageId>,
        result: SyncResult<Vec<Message>>,
    },
    Posted {
        reply: Option<ReplyPreview>,
        result: SyncResult<PostReceipt>,
    },
    Deleted {
        id: MessageId,
        result: SyncResult<()>,
    },
}

/// Cloneable front door to a running client.
#[derive(Clone)]
pub struct ChatHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ViewSnapshot>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatHandle {
    fn command(&self, command: Command) -> SyncResult<()> {
        self.commands.send(command).map_err(|_| SyncError::Closed)
    }

    /// Submit a draft. Empty drafts and submissions inside the debounce
    /// window are ignored.
    pub fn submit(&self, draft: Draft) -> SyncResult<()> {
        self.command(Command::Submit(draft))
    }

    pub fn send_text(&self, text: impl Into<String>) -> SyncResult<()> {
        self.submit(Draft::text(text))
    }

    pub fn keystroke(&self) -> SyncResult<()> {
        self.command(Command::Keystroke)
    }

    pub fn blur(&self) -> SyncResult<()> {
        self.command(Command::Blur)
    }

    pub fn reply(&self, id: MessageId) -> SyncResult<()> {
        self.command(Command::Reply(id))
    }

    pub fn cancel_reply(&self) -> SyncResult<()> {
        self.command(Command::CancelReply)
    }

    pub fn delete(&self, id: MessageId) -> SyncResult<()> {
        self.command(Command::Delete(id))
    }

    /// Report the viewport's distance from the bottom of the list, in pixels.
    pub fn scrolled(&self, distance_from_bottom: u32) -> SyncResult<()> {
        self.command(Command::Scrolled(distance_from_bottom))
    }

    pub fn jump_to_bottom(&self) -> SyncResult<()> {
        self.command(Command::JumpToBottom)
    }

    pub fn dismiss_banner(&self) -> SyncResult<()> {
        self.command(Command::DismissBanner)
    }

    pub fn shutdown(&self) -> SyncResult<()> {
        self.command(Command::Shutdown)
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn watch(&self) -> watch::Receiver<ViewSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }
}

/// Starts live-sync actors.
pub struct ChatSyncClient;

impl ChatSyncClient {
    /// Spawn a client talking to the real backend described by `config`.
    pub fn spawn(config: SyncConfig) -> SyncResult<ChatHandle> {
        let api = Arc::new(ChatApiClient::new(&config)?);
        let connector = Arc::new(WebSocketConnector::new(&config)?);
        Ok(Self::spawn_with(config, api, connector))
    }

    pub fn spawn_with(
        config: SyncConfig,
        api: Arc<dyn RoomApi>,
        connector: Arc<dyn RealtimeConnector>,
    ) -> ChatHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ViewSnapshot::empty());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let actor = Actor {
            view: MessageView::with_threshold(&config.username, config.scroll_threshold_px),
            connection: ConnectionManager::new(config.room_id),
            typing: TypingThrottle::new(config.typing_throttle, config.typing_idle),
            indicator: TypingIndicator::with_ttl(&config.username, config.typing_indicator_ttl),
            debounce: SendDebounce::new(config.send_debounce),
            reply: ReplySelection::default(),
            compose_error: None,
            socket: None,
            poller: None,
            poll_in_flight: false,
            poll_again: false,
            connecting: false,
            reconnect_at: None,
            api,
            connector,
            done_tx,
            snapshot: snapshot_tx,
            events: events_tx.clone(),
            config,
        };
        tokio::spawn(actor.run(commands_rx, done_rx));

        ChatHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            events: events_tx,
        }
    }
}

struct Actor {
    config: SyncConfig,
    api: Arc<dyn RoomApi>,
    connector: Arc<dyn RealtimeConnector>,
    connection: ConnectionManager,
    view: MessageView,
    socket: Option<SocketLink>,
    poller: Option<Interval>,
    poll_in_flight: bool,
    /// A poll was requested while another was running.
    poll_again: bool,
    connecting: bool,
    reconnect_at: Option<Instant>,
    typing: TypingThrottle,
    indicator: TypingIndicator,
    reply: ReplySelection,
    debounce: SendDebounce,
    compose_error: Option<String>,
    done_tx: mpsc::UnboundedSender<Completion>,
    snapshot: watch::Sender<ViewSnapshot>,
    events: broadcast::Sender<ChatEvent>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut done: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!(room_id = self.config.room_id, user = %self.config.username, "chat sync started");
        self.start_connect();
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                frame = next_frame(&mut self.socket) => self.handle_frame(frame),
                _ = tick(&mut self.poller) => self.poll_now(),
                Some(completion) = done.recv() => self.handle_completion(completion),
                _ = sleep_until_opt(self.typing.stop_deadline()) => {
                    if let Some(signal) = self.typing.poll_stop(Instant::now()) {
                        self.send_typing(signal);
                    }
                }
                _ = sleep_until_opt(self.indicator.expires_at()) => {
                    self.indicator.expire(Instant::now());
                }
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.start_connect();
                }
            }
            self.publish();
        }

        if let Some(signal) = self.typing.blur() {
            self.send_typing(signal);
        }
        info!(room_id = self.config.room_id, "chat sync stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(draft) => self.submit(draft),
            Command::Keystroke => {
                if let Some(signal) = self.typing.keystroke(Instant::now()) {
                    self.send_typing(signal);
                }
            }
            Command::Blur => {
                if let Some(signal) = self.typing.blur() {
                    self.send_typing(signal);
                }
            }
            Command::Reply(id) => match self.view.get_by_id(id) {
                Some(entry) => {
                    self.reply.select(entry);
                }
                None => debug!(message_id = id, "reply target not rendered"),
            },
            Command::CancelReply => self.reply.cancel(),
            Command::Delete(id) => self.delete(id),
            Command::Scrolled(distance) => {
                self.view.set_scroll_offset(distance);
            }
            Command::JumpToBottom => {
                self.view.jump_to_bottom();
                self.emit(ChatEvent::ScrollToBottom);
            }
            Command::DismissBanner => {
                self.view.dismiss_banner();
            }
            Command::Shutdown => {}
        }
    }

    fn handle_frame(&mut self, frame: Option<String>) {
        let Some(text) = frame else {
            self.socket = None;
            let transition = self.connection.on_socket_closed("socket closed");
            self.apply_transition(transition);
            return;
        };
        match InboundFrame::parse(&text) {
            Some(InboundFrame::History { messages }) => self.ingest_batch(messages),
            Some(InboundFrame::Message(message)) => self.render(message, Origin::Socket),
            Some(InboundFrame::Typing { user }) => {
                self.indicator.show(&user, Instant::now());
            }
            Some(InboundFrame::MessageRemoved { id }) => {
                if self.view.remove(id).is_some() {
                    self.emit(ChatEvent::Removed { id });
                }
            }
            None => {}
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Connected(Ok(link)) => {
                self.connecting = false;
                self.socket = Some(link);
                let transition = self.connection.on_socket_open();
                self.apply_transition(transition);
            }
            Completion::Connected(Err(err)) => {
                self.connecting = false;
                let transition = self.connection.on_connect_failed(&err);
                self.apply_transition(transition);
                self.schedule_reconnect();
            }
            Completion::Polled { since_id, result } => {
                self.poll_in_flight = false;
                match result {
                    Ok(messages) if since_id.is_none() => self.ingest_batch(messages),
                    Ok(messages) => {
                        for message in messages {
                            self.render(message, Origin::Poll);
                        }
                    }
                    Err(err) => {
                        warn!(target: "chat.poll", ?since_id, error = %err, "poll failed");
                    }
                }
                if std::mem::take(&mut self.poll_again) {
                    self.poll_now();
                }
            }
            Completion::Posted { reply, result } => match result {
                Ok(receipt) => {
                    debug!(target: "chat.send", message_id = ?receipt.id, "form post accepted");
                    self.poll_now();
                    if !self.connection.is_live() && self.poller.is_none() {
                        self.start_polling();
                    }
                }
                Err(SyncError::Rejected(errors)) => {
                    let message = errors.join(" · ");
                    debug!(target: "chat.send", error = %message, "form post rejected");
                    self.reply.restore(reply);
                    self.compose_error = Some(message.clone());
                    self.emit(ChatEvent::ComposeError(message));
                }
                Err(err) => {
                    warn!(target: "chat.send", error = %err, "form post failed");
                }
            },
            Completion::Deleted { id, result } => {
                if let Err(err) = result {
                    warn!(target: "chat.send", message_id = id, error = %err, "delete failed");
                }
            }
        }
    }

    fn submit(&mut self, draft: Draft) {
        if draft.is_empty() {
            return;
        }
        if !self.debounce.try_acquire(Instant::now()) {
            debug!(target: "chat.send", "submit inside debounce window ignored");
            return;
        }
        self.compose_error = None;
        if let Some(signal) = self.typing.blur() {
            self.send_typing(signal);
        }
        let reply = self.reply.take();
        match choose_route(&draft, self.connection.state()) {
            SendRoute::Realtime => self.send_realtime(draft, reply),
            SendRoute::Form => self.send_form(draft, reply),
        }
    }

    fn send_realtime(&mut self, draft: Draft, reply: Option<ReplyPreview>) {
        let token = new_client_token();
        let frame = OutboundFrame::Send {
            text: draft.text.clone(),
            client_id: token.clone(),
            reply_to_id: reply.as_ref().and_then(|r| r.id),
        };
        let outcome = self
            .view
            .push_echo(draft.text.clone(), token.clone(), reply.clone());
        self.emit_outcome(outcome, None);

        let sent = match &self.socket {
            Some(link) => link.send(&frame),
            None => Err(SyncError::Closed),
        };
        match sent {
            Ok(()) => debug!(target: "chat.send", client_id = %token, "sent over socket"),
            Err(err) => {
                warn!(target: "chat.send", client_id = %token, error = %err, "socket send failed; retrying as form post");
                if self.view.fail_echo(&token) {
                    self.emit(ChatEvent::EchoDropped { client_id: token });
                }
                self.send_form(draft, reply);
            }
        }
    }

    fn send_form(&mut self, draft: Draft, reply: Option<ReplyPreview>) {
        let post = OutgoingPost {
            text: draft.text,
            reply_to: reply.as_ref().and_then(|r| r.id),
            attachments: draft.attachments,
        };
        debug!(
            target: "chat.send",
            attachments = post.attachments.len(),
            reply_to = ?post.reply_to,
            "posting message form"
        );
        let api = self.api.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = api.post_message(post).await;
            let _ = done.send(Completion::Posted { reply, result });
        });
    }

    fn delete(&mut self, id: MessageId) {
        if self.view.mark_removing(id).is_none() {
            debug!(message_id = id, "delete ignored; message not deletable");
            return;
        }
        self.emit(ChatEvent::Removed { id });
        let api = self.api.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = api.delete_message(id).await;
            let _ = done.send(Completion::Deleted { id, result });
        });
    }

    fn send_typing(&mut self, signal: TypingSignal) {
        if !self.connection.is_live() {
            return;
        }
        if let Some(link) = &self.socket {
            let frame = OutboundFrame::Typing {
                typing: signal.is_typing(),
            };
            if let Err(err) = link.send(&frame) {
                trace!(target: "chat.socket", error = %err, "typing frame dropped");
            }
        }
    }

    fn start_connect(&mut self) {
        if self.connecting || self.socket.is_some() {
            return;
        }
        self.connecting = true;
        let connector = self.connector.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = match time::timeout(CONNECT_TIMEOUT, connector.connect()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Io(std::io::ErrorKind::TimedOut.into())),
            };
            let _ = done.send(Completion::Connected(result));
        });
    }

    fn schedule_reconnect(&mut self) {
        let interval = self.config.reconnect_interval;
        if interval.is_zero() || self.connecting || self.socket.is_some() {
            return;
        }
        if self.reconnect_at.is_none() {
            self.reconnect_at = Some(Instant::now() + interval);
        }
    }

    fn apply_transition(&mut self, transition: Transition) {
        match transition.polling {
            PollingCommand::Start => self.start_polling(),
            PollingCommand::Stop => self.poller = None,
            PollingCommand::Keep => {}
        }
        match transition.to {
            ConnectionState::Live => self.reconnect_at = None,
            ConnectionState::DegradedPolling => self.schedule_reconnect(),
            ConnectionState::Connecting => {}
        }
        if transition.changed() {
            self.emit(ChatEvent::ConnectionChanged(transition.to));
        }
    }

    /// Polls once right away, then every poll interval.
    fn start_polling(&mut self) {
        let period = self.config.poll_interval.max(MIN_POLL_INTERVAL);
        if period != self.config.poll_interval {
            warn!(
                target: "chat.poll",
                configured = ?self.config.poll_interval,
                using = ?period,
                "poll interval too short"
            );
        }
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.poller = Some(interval);
    }

    fn poll_now(&mut self) {
        if self.poll_in_flight {
            self.poll_again = true;
            trace!(target: "chat.poll", "poll already running");
            return;
        }
        self.poll_in_flight = true;
        let since_id = self.view.last_id();
        let api = self.api.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = api.fetch_since(since_id).await;
            let _ = done.send(Completion::Polled { since_id, result });
        });
    }

    /// A backlog: rendered as history into an empty view, otherwise merged
    /// in id order like any other delivery.
    fn ingest_batch(&mut self, mut messages: Vec<Message>) {
        if self.view.is_empty() {
            for outcome in self.view.load_history(messages) {
                self.emit_outcome(outcome, None);
            }
            self.emit(ChatEvent::ScrollToBottom);
            return;
        }
        messages.sort_by_key(|m| m.id);
        for message in messages {
            self.render(message, Origin::Poll);
        }
    }

    fn render(&mut self, message: Message, origin: Origin) {
        let id = message.id;
        let outcome = self.view.apply(message, origin);
        self.emit_outcome(outcome, id);
    }

    fn emit_outcome(&self, outcome: RenderOutcome, id: Option<MessageId>) {
        match outcome {
            RenderOutcome::Inserted { index, scroll } => {
                if let Some(entry) = self.view.entries().get(index) {
                    self.emit(ChatEvent::Inserted {
                        index,
                        message: entry.message.clone(),
                        pending: entry.pending,
                    });
                }
                if scroll {
                    self.emit(ChatEvent::ScrollToBottom);
                }
            }
            RenderOutcome::Reconciled { index } => {
                let id = self.view.entries().get(index).and_then(ViewEntry::id);
                self.emit(ChatEvent::Reconciled { index, id });
            }
            RenderOutcome::Skipped { refreshed: true } => {
                if let Some(id) = id {
                    self.emit(ChatEvent::Refreshed { id });
                }
            }
            RenderOutcome::Skipped { refreshed: false } => {}
        }
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish(&mut self) {
        let next = ViewSnapshot {
            state: self.connection.state(),
            entries: self.view.entries().to_vec(),
            unseen: self.view.unseen(),
            show_jump_button: self.view.show_jump_button(),
            typing: self.indicator.current(Instant::now()),
            replying_to: self.reply.current().cloned(),
            compose_error: self.compose_error.clone(),
            last_id: self.view.last_id(),
        };
        let mut unseen_changed = None;
        let mut typing_changed = None;
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if current.unseen != next.unseen {
                unseen_changed = Some(next.unseen);
            }
            if current.typing != next.typing {
                typing_changed = Some(next.typing.clone());
            }
            *current = next;
            true
        });
        if let Some(unseen) = unseen_changed {
            self.emit(ChatEvent::UnseenChanged(unseen));
        }
        if let Some(typing) = typing_changed {
            self.emit(ChatEvent::Typing(typing));
        }
    }
}

async fn next_frame(socket: &mut Option<SocketLink>) -> Option<String> {
    match socket {
        Some(link) => link.recv().await,
        None => pending().await,
    }
}

async fn tick(poller: &mut Option<Interval>) {
    match poller {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}
