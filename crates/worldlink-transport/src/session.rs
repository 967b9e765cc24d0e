//! Reconnecting transport session.
//!
//! A [`TransportSession`] is a handle to an actor task that owns the
//! connection. The caller talks to it through a command channel and hears
//! back through a [`TransportEvent`] channel; nothing else is shared.

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at, sleep},
};

use crate::{
    codec::{CodecError, DEFAULT_DELIMITER, MessageCodec},
    connector::{Connector, FrameSink, Link, TransportError},
    protocol::{ClientMessage, Handshake, InboundRecord, ProtocolFault, ServerMessage},
};

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Record delimiter within one network write.
    pub delimiter: String,
    /// Batching period until the server announces its own.
    pub update_interval_ms: u64,
    /// Server idle timeout until the server announces its own.
    pub keep_alive_timeout_ms: u64,
    /// Fraction of the idle timeout after which a keepalive is sent.
    pub keep_alive_factor: f64,
    /// First reconnect delay.
    pub reconnect_base_ms: u64,
    /// Reconnect delay ceiling.
    pub reconnect_cap_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_string(),
            update_interval_ms: 2000,
            keep_alive_timeout_ms: 30_000,
            keep_alive_factor: 0.8,
            reconnect_base_ms: 1000,
            reconnect_cap_ms: 30_000,
        }
    }
}

/// Smallest and largest fraction of the idle timeout a keepalive may wait.
pub const KEEP_ALIVE_FACTOR_RANGE: (f64, f64) = (0.5, 0.8);

/// Rejected transport configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("Keepalive factor {0} outside [0.5, 0.8]")]
    KeepAliveFactor(f64),
    #[error("Reconnect base delay must be positive")]
    ZeroReconnectBase,
    #[error("Reconnect cap {cap_ms} ms below base {base_ms} ms")]
    ReconnectCapBelowBase { base_ms: u64, cap_ms: u64 },
}

impl TransportConfig {
    /// Check the timing parameters.
    ///
    /// # Errors
    /// Returns error if the keepalive factor is not within
    /// [`KEEP_ALIVE_FACTOR_RANGE`], the reconnect base is zero or the cap is
    /// below the base.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (low, high) = KEEP_ALIVE_FACTOR_RANGE;
        if !(low..=high).contains(&self.keep_alive_factor) {
            return Err(ConfigError::KeepAliveFactor(self.keep_alive_factor));
        }
        if self.reconnect_base_ms == 0 {
            return Err(ConfigError::ZeroReconnectBase);
        }
        if self.reconnect_cap_ms < self.reconnect_base_ms {
            return Err(ConfigError::ReconnectCapBelowBase {
                base_ms: self.reconnect_base_ms,
                cap_ms: self.reconnect_cap_ms,
            });
        }
        Ok(())
    }
}

/// `min(base * 2^attempts, cap)`.
#[must_use]
pub fn backoff_delay(attempts: u32, base: Duration, cap: Duration) -> Duration {
    2u32.checked_pow(attempts)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |delay| delay.min(cap))
}

/// Connection lifecycle as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and handshake sent.
    Open,
    /// Connection lost or refused. Retrying after `retry_in`.
    Closed { retry_in: Duration },
}

/// Event emitted by the session.
#[derive(Debug)]
pub enum TransportEvent {
    /// Lifecycle change.
    Status(ConnectionStatus),
    /// A decoded inbound record, in batch order.
    Record(InboundRecord),
    /// An inbound fragment that failed to decode.
    Fault(ProtocolFault),
    /// The server issued a new session secret. Persist it and feed it back
    /// through the secret channel for the next connect.
    SecretRotated(String),
}

/// Server-authoritative session parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub client_id: Option<String>,
    /// Last secret the server announced.
    pub client_secret: Option<String>,
    pub keep_alive_timeout: Duration,
    pub update_interval: Duration,
}

enum Command {
    Send(String),
    Close,
}

enum Exit {
    Lost,
    Closed,
}

/// Handle to a running transport session.
pub struct TransportSession {
    commands: mpsc::UnboundedSender<Command>,
    codec: MessageCodec,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl TransportSession {
    /// Start a session against `url`.
    ///
    /// The secret is owned by the caller. It is read once per connection
    /// attempt and never written by the session.
    ///
    /// # Errors
    /// Returns error if the configured delimiter is empty or the timing
    /// parameters fail [`TransportConfig::validate`].
    pub fn open<C: Connector>(
        url: impl Into<String>,
        config: TransportConfig,
        connector: C,
        secret: watch::Receiver<Option<String>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), ConfigError> {
        config.validate()?;
        let codec = MessageCodec::new(config.delimiter.clone())?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let keep_alive_timeout = Duration::from_millis(config.keep_alive_timeout_ms);
        let update_interval = Duration::from_millis(config.update_interval_ms.max(1));
        let (state_tx, state_rx) = watch::channel(SessionState {
            client_id: None,
            client_secret: None,
            keep_alive_timeout,
            update_interval,
        });

        let actor = SessionActor {
            url: url.into(),
            codec: codec.clone(),
            connector: Arc::new(connector),
            secret,
            commands: commands_rx,
            events: events_tx,
            state: state_tx,
            outgoing: Vec::new(),
            attempts: 0,
            awaiting_handshake: true,
            last_sent: Instant::now(),
            update_interval,
            keep_alive_timeout,
            keep_alive_factor: config.keep_alive_factor,
            reconnect_base: Duration::from_millis(config.reconnect_base_ms),
            reconnect_cap: Duration::from_millis(config.reconnect_cap_ms),
        };
        let task = tokio::spawn(actor.run());

        Ok((
            Self {
                commands: commands_tx,
                codec,
                state: state_rx,
                task,
            },
            events_rx,
        ))
    }

    /// Queue a payload for the next batch. Never blocks.
    ///
    /// # Errors
    /// Returns error if the serialized payload contains the delimiter or the
    /// session has been closed. Nothing is queued in either case.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), TransportError> {
        let record = self.codec.encode(payload)?;
        self.commands
            .send(Command::Send(record))
            .map_err(|_| TransportError::SessionClosed)
    }

    /// Snapshot of the server-announced session parameters.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Stop retrying, close the socket and wait for the session to wind down.
    /// No events are emitted afterwards.
    pub async fn close(self) {
        let _ = self.commands.send(Command::Close);
        if let Err(e) = self.task.await {
            tracing::error!("Transport task failed: {e}");
        }
    }
}

struct SessionActor<C> {
    url: String,
    codec: MessageCodec,
    connector: Arc<C>,
    secret: watch::Receiver<Option<String>>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: watch::Sender<SessionState>,
    outgoing: Vec<String>,
    attempts: u32,
    /// No handshake adopted yet on the current connection.
    awaiting_handshake: bool,
    last_sent: Instant,
    update_interval: Duration,
    keep_alive_timeout: Duration,
    keep_alive_factor: f64,
    reconnect_base: Duration,
    reconnect_cap: Duration,
}

impl<C: Connector> SessionActor<C> {
    async fn run(mut self) {
        loop {
            self.emit(TransportEvent::Status(ConnectionStatus::Connecting));

            let Some(result) = self.connect().await else {
                break;
            };
            match result {
                Ok(link) => {
                    self.attempts = 0;
                    tracing::info!(url = %self.url, "Transport open");
                    self.emit(TransportEvent::Status(ConnectionStatus::Open));
                    if let Exit::Closed = self.run_connected(link).await {
                        break;
                    }
                }
                Err(e) => tracing::warn!(url = %self.url, "Connect failed: {e}"),
            }

            let delay = backoff_delay(self.attempts, self.reconnect_base, self.reconnect_cap);
            self.attempts = self.attempts.saturating_add(1);
            tracing::info!(
                attempt = self.attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Disconnected, retrying"
            );
            self.emit(TransportEvent::Status(ConnectionStatus::Closed { retry_in: delay }));

            if !self.wait(delay).await {
                break;
            }
        }
        tracing::debug!(url = %self.url, "Transport session finished");
    }

    /// Connect while still accepting commands. `None` means close was requested.
    async fn connect(&mut self) -> Option<Result<Link, TransportError>> {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let connect = async move { connector.connect(&url).await };
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => return Some(result),
                command = self.commands.recv() => {
                    if !self.handle_command(command) {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep out the reconnect delay. `false` means close was requested.
    async fn wait(&mut self, delay: Duration) -> bool {
        let timer = sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                () = &mut timer => return true,
                command = self.commands.recv() => {
                    if !self.handle_command(command) {
                        return false;
                    }
                }
            }
        }
    }

    async fn run_connected(&mut self, link: Link) -> Exit {
        let Link {
            mut sink,
            mut stream,
        } = link;

        self.awaiting_handshake = true;
        if let Err(e) = self.send_handshake(&mut sink).await {
            tracing::warn!("Handshake failed: {e}");
            return Exit::Lost;
        }

        let mut ticker = self.ticker();
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    if !self.handle_command(command) {
                        if let Err(e) = sink.close().await {
                            tracing::debug!("Socket close failed: {e}");
                        }
                        return Exit::Closed;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.flush(&mut sink).await {
                        tracing::warn!("Write failed: {e}");
                        return Exit::Lost;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(batch)) => {
                        if self.handle_batch(&batch) {
                            ticker = self.ticker();
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Read failed: {e}");
                        return Exit::Lost;
                    }
                    None => return Exit::Lost,
                },
            }
        }
    }

    async fn send_handshake(&mut self, sink: &mut FrameSink) -> Result<(), TransportError> {
        let client_secret = self.secret.borrow().clone();
        let record = self.codec.encode(&ClientMessage::Init { client_secret })?;
        sink.send(record).await?;
        self.last_sent = Instant::now();
        Ok(())
    }

    /// Write the queued batch, or a keepalive if idle for too long.
    async fn flush(&mut self, sink: &mut FrameSink) -> Result<(), TransportError> {
        let now = Instant::now();
        if !self.outgoing.is_empty() {
            let batch = self.codec.join(&self.outgoing);
            tracing::debug!(records = self.outgoing.len(), "Sending batch");
            sink.send(batch).await?;
            self.outgoing.clear();
            self.last_sent = now;
        } else if now.duration_since(self.last_sent) > self.keep_alive_threshold() {
            tracing::trace!("Sending keepalive");
            sink.send(self.codec.encode(&ClientMessage::Ping)?).await?;
            self.last_sent = now;
        }
        Ok(())
    }

    /// Decode and forward one network read. Returns whether the batching
    /// period changed.
    fn handle_batch(&mut self, batch: &str) -> bool {
        let mut period_changed = false;
        for decoded in self.codec.decode(batch) {
            match decoded {
                Ok(record) => {
                    if let InboundRecord::Control(ServerMessage::Init(handshake)) = &record {
                        if self.is_peer(handshake) {
                            tracing::debug!(client_id = ?handshake.client_id, "Peer connected");
                        } else {
                            period_changed |= self.adopt(handshake);
                        }
                    }
                    self.emit(TransportEvent::Record(record));
                }
                Err(fault) => {
                    tracing::warn!("Dropping malformed record: {fault}");
                    self.emit(TransportEvent::Fault(fault));
                }
            }
        }
        period_changed
    }

    fn is_peer(&self, handshake: &Handshake) -> bool {
        if self.awaiting_handshake {
            return false;
        }
        handshake.announces_peer(self.state.borrow().client_id.as_deref())
    }

    /// Take over server-announced parameters. Returns whether the batching
    /// period changed.
    fn adopt(&mut self, handshake: &Handshake) -> bool {
        self.awaiting_handshake = false;
        if let Some(secret) = &handshake.client_secret {
            tracing::info!("Session secret rotated");
            self.emit(TransportEvent::SecretRotated(secret.clone()));
        }
        if let Some(ms) = handshake.keep_alive_timeout {
            self.keep_alive_timeout = Duration::from_millis(ms);
        }

        let mut period_changed = false;
        if let Some(ms) = handshake.update_interval.filter(|ms| *ms > 0) {
            let period = Duration::from_millis(ms);
            if period != self.update_interval {
                tracing::debug!(period_ms = ms, "Batching period changed");
                self.update_interval = period;
                period_changed = true;
            }
        }

        let (keep_alive_timeout, update_interval) = (self.keep_alive_timeout, self.update_interval);
        self.state.send_modify(|state| {
            if handshake.client_id.is_some() {
                state.client_id.clone_from(&handshake.client_id);
            }
            if handshake.client_secret.is_some() {
                state.client_secret.clone_from(&handshake.client_secret);
            }
            state.keep_alive_timeout = keep_alive_timeout;
            state.update_interval = update_interval;
        });

        period_changed
    }

    /// Returns `false` when the session should stop.
    fn handle_command(&mut self, command: Option<Command>) -> bool {
        match command {
            Some(Command::Send(record)) => {
                self.outgoing.push(record);
                true
            }
            Some(Command::Close) | None => false,
        }
    }

    fn ticker(&self) -> Interval {
        let mut ticker = interval_at(Instant::now() + self.update_interval, self.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn keep_alive_threshold(&self) -> Duration {
        self.keep_alive_timeout.mul_f64(self.keep_alive_factor)
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}
