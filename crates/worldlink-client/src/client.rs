//! The world client loop.
//!
//! [`WorldClient`] owns the mirrored graph, the navigation state, the render
//! notifier and the chat log. Transport events are handled one at a time,
//! each to completion, from [`WorldClient::next_update`]; nothing here is
//! shared with the transport task except the channels between them.

use std::time::Duration;

use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use worldlink_core::{
    Crumb, DeltaRecord, Direction, GameObject, GraphError, NavigationController, ObjectGraphStore,
    ObjectId, ViewNotifier,
};
use worldlink_transport::{
    ClientMessage, ConfigError, ConnectionStatus, Connector, Handshake, InboundRecord,
    ProtocolFault, ServerMessage, TransportError, TransportEvent, TransportSession,
};

use crate::{
    chat::{ChatKind, ChatLine, ChatLog},
    config::ClientConfig,
};

/// Client error.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Invalid transport configuration: {0}")]
    Config(#[from] ConfigError),
}

/// What one step of [`WorldClient::next_update`] did.
#[derive(Debug)]
pub enum ClientUpdate {
    /// Connection lifecycle change.
    Status(ConnectionStatus),
    /// The server (re)announced the session.
    Session(Handshake),
    /// A new session secret to persist.
    SecretRotated(String),
    /// An object was created or updated.
    ObjectChanged(ObjectId),
    /// A delta was refused because it would make an object its own ancestor.
    DeltaRejected(GraphError),
    /// A subtree was removed, in removal order.
    ObjectsRemoved(Vec<ObjectId>),
    /// A chat or system line was appended to the log.
    Chat(ChatLine),
    /// The mirrored world was dropped.
    Reset,
    /// Heartbeat from the server.
    Ping,
    /// An inbound fragment could not be decoded.
    Fault(ProtocolFault),
    /// The coalesced render signal fired.
    Render { generation: u64 },
}

/// Client mirroring a server-authoritative object tree.
pub struct WorldClient {
    session: TransportSession,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    secret: watch::Sender<Option<String>>,
    graph: ObjectGraphStore,
    navigation: NavigationController,
    notifier: ViewNotifier,
    chat: ChatLog,
    status: ConnectionStatus,
    client_id: Option<String>,
    /// Open, but our own handshake has not arrived yet.
    awaiting_handshake: bool,
    pending_focus: Option<ObjectId>,
    reset_on_disconnect: bool,
}

impl WorldClient {
    /// Start connecting to `config.url`.
    ///
    /// `secret` is the persisted session secret, `None` on first contact.
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns error if the transport configuration is unusable.
    pub fn connect<C: Connector>(
        config: ClientConfig,
        connector: C,
        secret: Option<String>,
    ) -> Result<Self, ClientError> {
        let (secret_tx, secret_rx) = watch::channel(secret);
        let (session, events) =
            TransportSession::open(config.url.clone(), config.transport.clone(), connector, secret_rx)?;

        let mut navigation = NavigationController::new(config.breadcrumb_depth);
        navigation.set_root(config.root_id.clone());

        tracing::info!(url = %config.url, "World client started");
        Ok(Self {
            session,
            events,
            secret: secret_tx,
            graph: ObjectGraphStore::new(),
            navigation,
            notifier: ViewNotifier::new(config.render_window()),
            chat: ChatLog::new(config.chat_history),
            status: ConnectionStatus::Connecting,
            client_id: None,
            awaiting_handshake: true,
            pending_focus: None,
            reset_on_disconnect: config.reset_on_disconnect,
        })
    }

    /// Handle the next transport event, or fire a due render.
    ///
    /// Returns `None` once the session has shut down.
    pub async fn next_update(&mut self) -> Option<ClientUpdate> {
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    return event.map(|event| self.handle_event(event));
                }
                () = self.notifier.due() => {
                    if self.notifier.fire_if_due(Instant::now()) {
                        return Some(ClientUpdate::Render {
                            generation: self.notifier.generation(),
                        });
                    }
                }
            }
        }
    }

    // Reads

    #[must_use]
    pub const fn graph(&self) -> &ObjectGraphStore {
        &self.graph
    }

    #[must_use]
    pub const fn navigation(&self) -> &NavigationController {
        &self.navigation
    }

    /// Focused object, if any.
    #[must_use]
    pub fn focus(&self) -> Option<&GameObject> {
        self.navigation.focus(&self.graph)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&GameObject> {
        self.graph.get(id)
    }

    #[must_use]
    pub fn children_of(&self, id: &str) -> &[ObjectId] {
        self.graph.children_of(id)
    }

    /// Siblings of the focus including the focus itself, in stored order.
    #[must_use]
    pub fn siblings(&self) -> &[ObjectId] {
        self.focus()
            .and_then(|focus| focus.parent_id.as_deref())
            .map_or(&[], |parent| self.graph.children_of(parent))
    }

    /// Breadcrumb of the focus, root to leaf.
    #[must_use]
    pub fn breadcrumb(&self) -> Vec<Crumb<'_>> {
        self.navigation.focus_breadcrumb(&self.graph)
    }

    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub const fn chat_log(&self) -> &ChatLog {
        &self.chat
    }

    /// Client id announced by the server.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Current session secret.
    #[must_use]
    pub fn secret(&self) -> Option<String> {
        self.secret.borrow().clone()
    }

    /// Subscribe to render generations.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notifier.subscribe()
    }

    // Mutators

    /// Focus `id`. Returns `false` if it is unknown or outside the root
    /// boundary. Re-focusing the current object still requests a render.
    pub fn set_focus(&mut self, id: &str) -> bool {
        let changed = self.navigation.set_focus(&self.graph, id);
        if changed {
            self.pending_focus = None;
            self.notifier.notify();
        }
        changed
    }

    /// Move the focus. Returns whether it moved.
    pub fn move_focus(&mut self, direction: Direction) -> bool {
        let moved = self.navigation.move_focus(&self.graph, direction);
        if moved {
            self.notifier.notify();
        }
        moved
    }

    /// Confine navigation to the subtree under `root`.
    pub fn set_root(&mut self, root: Option<ObjectId>) {
        self.navigation.set_root(root);
        self.notifier.notify();
    }

    /// Queue a chat line and record it locally.
    ///
    /// # Errors
    /// Returns error if the line cannot be queued. Nothing is recorded then.
    pub fn send_chat(&mut self, content: &str, channel: Option<&str>) -> Result<(), ClientError> {
        let channel = channel.map(str::to_string);
        self.session.send(&ClientMessage::Chat {
            content: content.to_string(),
            channel: channel.clone(),
        })?;
        self.chat.push(ChatLine::new(ChatKind::Sent, channel, content));
        self.notifier.notify();
        Ok(())
    }

    /// Queue an arbitrary application payload.
    ///
    /// # Errors
    /// Returns error if the payload cannot be queued.
    pub fn send<T: serde::Serialize + ?Sized>(&self, payload: &T) -> Result<(), ClientError> {
        Ok(self.session.send(payload)?)
    }

    /// Stop the session. No further updates are produced.
    pub async fn close(self) {
        tracing::info!("World client closing");
        self.session.close().await;
    }

    // Event handling

    fn handle_event(&mut self, event: TransportEvent) -> ClientUpdate {
        match event {
            TransportEvent::Status(status) => self.handle_status(status),
            TransportEvent::Record(InboundRecord::Delta(delta)) => self.handle_delta(&delta),
            TransportEvent::Record(InboundRecord::Control(message)) => self.handle_control(message),
            TransportEvent::Fault(fault) => {
                tracing::warn!("Undecodable record: {fault}");
                ClientUpdate::Fault(fault)
            }
            TransportEvent::SecretRotated(secret) => {
                self.secret.send_replace(Some(secret.clone()));
                ClientUpdate::SecretRotated(secret)
            }
        }
    }

    fn handle_status(&mut self, status: ConnectionStatus) -> ClientUpdate {
        self.status = status;
        match status {
            ConnectionStatus::Connecting => tracing::debug!("Connecting"),
            ConnectionStatus::Open => {
                tracing::info!("Connected");
                self.awaiting_handshake = true;
            }
            ConnectionStatus::Closed { retry_in } => {
                let message = format!("disconnected, retrying in {}s", whole_seconds(retry_in));
                self.chat.push(ChatLine::system(message));
                if self.reset_on_disconnect {
                    self.reset();
                }
            }
        }
        self.notifier.notify();
        ClientUpdate::Status(status)
    }

    fn handle_delta(&mut self, delta: &DeltaRecord) -> ClientUpdate {
        match self.graph.apply_delta(delta) {
            Ok(object) => tracing::debug!(id = %object.id, parent_id = ?object.parent_id, "Applied delta"),
            Err(error) => {
                tracing::warn!("Rejected delta: {error}");
                return ClientUpdate::DeltaRejected(error);
            }
        }

        if self.navigation.focus_id().is_none() && self.pending_focus.as_deref() == Some(delta.id.as_str()) {
            self.set_focus(&delta.id);
        } else if self.navigation.is_visible(&self.graph, &delta.id) {
            self.notifier.notify();
        }
        ClientUpdate::ObjectChanged(delta.id.clone())
    }

    fn handle_control(&mut self, message: ServerMessage) -> ClientUpdate {
        match message {
            ServerMessage::Init(handshake) => {
                let own_id = if self.awaiting_handshake { None } else { self.client_id.as_deref() };
                if handshake.announces_peer(own_id) {
                    let peer = handshake.client_id.unwrap_or_default();
                    return self.record(ChatLine::system(format!("Client {peer} connected")));
                }
                self.awaiting_handshake = false;
                if handshake.client_id.is_some() {
                    self.client_id.clone_from(&handshake.client_id);
                }
                if let Some(player_id) = &handshake.player_id {
                    self.pending_focus = Some(player_id.clone());
                    if self.navigation.focus_id().is_none() {
                        self.set_focus(player_id);
                    }
                }
                tracing::info!(client_id = ?self.client_id, "Session established");
                ClientUpdate::Session(handshake)
            }
            ServerMessage::Chat { content, channel } => {
                self.record(ChatLine::new(ChatKind::Received, channel, content))
            }
            ServerMessage::Offline { message, id } => {
                let someone_else = id.is_some() && id != self.client_id;
                if someone_else {
                    let id = id.unwrap_or_default();
                    return self.record(ChatLine::system(
                        message.unwrap_or_else(|| format!("Client {id} disconnected")),
                    ));
                }
                tracing::info!(?message, "Server went offline");
                let line = ChatLine::system(message.unwrap_or_else(|| "server offline".to_string()));
                if !self.reset_on_disconnect {
                    return self.record(line);
                }
                self.chat.push(line);
                self.reset();
                self.notifier.notify();
                ClientUpdate::Reset
            }
            ServerMessage::Ping => ClientUpdate::Ping,
            ServerMessage::Error { message } => {
                tracing::warn!("Server error: {message}");
                self.record(ChatLine::system(format!("Error: {message}")))
            }
            ServerMessage::Remove { id } => self.handle_remove(&id),
        }
    }

    fn handle_remove(&mut self, id: &str) -> ClientUpdate {
        let focus_inside = self
            .navigation
            .focus_id()
            .is_some_and(|focus| self.graph.is_self_or_descendant(focus, id));
        let visible = focus_inside || self.navigation.is_visible(&self.graph, id);
        let successor = if focus_inside { self.removal_successor(id) } else { None };

        let removed = self.graph.remove(id);
        tracing::debug!(id, count = removed.len(), "Removed subtree");

        if focus_inside {
            let refocused = successor.is_some_and(|next| self.navigation.set_focus(&self.graph, &next));
            if !refocused {
                self.navigation.clear_focus();
            }
        }
        if visible {
            self.notifier.notify();
        }
        ClientUpdate::ObjectsRemoved(removed)
    }

    /// Next sibling of `id`, else the previous one, else its parent.
    fn removal_successor(&self, id: &str) -> Option<ObjectId> {
        let parent = self.graph.get(id)?.parent_id.clone()?;
        let siblings = self.graph.children_of(&parent);
        let index = siblings.iter().position(|s| s == id)?;
        siblings
            .get(index + 1)
            .or_else(|| index.checked_sub(1).and_then(|i| siblings.get(i)))
            .cloned()
            .or_else(|| self.graph.contains(&parent).then_some(parent))
    }

    fn record(&mut self, line: ChatLine) -> ClientUpdate {
        self.chat.push(line.clone());
        self.notifier.notify();
        ClientUpdate::Chat(line)
    }

    fn reset(&mut self) {
        tracing::info!(objects = self.graph.len(), "Resetting mirrored world");
        self.graph.clear();
        self.navigation.clear_focus();
    }
}

fn whole_seconds(delay: Duration) -> u128 {
    delay.as_millis().div_ceil(1000)
}
