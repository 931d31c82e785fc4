//! Presence client: session driver and reconnection loop.
//!
//! A [`PresenceClient`] owns everything stateful about the connection: the
//! listener registry, the current [`Session`] and [`Transport`], and the
//! retry bookkeeping. All of it lives on one task. Collaborators talk to that
//! task through a cloneable [`ClientHandle`], which only sends commands and
//! reads the published [`ConnectionState`].
//!
//! # Usage
//!
//! ```no_run
//! use presence_ipc::client::{ClientConfig, PresenceClient};
//! use presence_ipc::events::names;
//!
//! # async fn demo() {
//! let client = PresenceClient::new(ClientConfig::new("1020683907101892709"));
//! let handle = client.handle();
//!
//! let on_ready = handle.clone();
//! handle.on(names::READY, move |_event| {
//!     on_ready.clear_activity();
//!     Ok(())
//! });
//!
//! let task = client.connect();
//! // ...
//! handle.stop();
//! let _ = task.await;
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::activity::{set_activity_command, Activity};
use crate::constants::{HANDSHAKE_TIMEOUT, STOP_FLUSH_TIMEOUT};
use crate::events::{EventRegistry, IpcEvent, Listener, ListenerId, ListenerIds};
use crate::ipc::framing::Frame;
use crate::ipc::path;
use crate::ipc::session::{Session, SessionState};
use crate::ipc::transport::{Connector, LocalConnector, Transport, TransportEvent};
use crate::ipc::IpcError;
use crate::supervisor::{ConnectionState, ReconnectPolicy, SessionEnd};

/// Settings for a [`PresenceClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Application id sent in the handshake.
    pub client_id: String,
    /// Socket path override. `None` uses the platform default.
    pub ipc_path: Option<PathBuf>,
    /// Delays between attempts.
    pub reconnect: ReconnectPolicy,
    /// How long to wait for `READY` after the handshake.
    pub handshake_timeout: Duration,
}

impl ClientConfig {
    /// Config with default socket path and timing.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ipc_path: None,
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// Socket path this config resolves to.
    pub fn socket_path(&self) -> PathBuf {
        path::socket_path(self.ipc_path.as_deref())
    }
}

/// Commands from handles to the client task.
pub(crate) enum ClientCommand {
    SetActivity(Option<Activity>),
    Subscribe {
        id: ListenerId,
        event: String,
        callback: Listener,
        once: bool,
    },
    Unsubscribe(ListenerId),
    Stop,
}

impl std::fmt::Debug for ClientCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetActivity(activity) => f.debug_tuple("SetActivity").field(activity).finish(),
            Self::Subscribe { id, event, once, .. } => f
                .debug_struct("Subscribe")
                .field("id", id)
                .field("event", event)
                .field("once", once)
                .finish_non_exhaustive(),
            Self::Unsubscribe(id) => f.debug_tuple("Unsubscribe").field(id).finish(),
            Self::Stop => write!(f, "Stop"),
        }
    }
}

/// Cloneable handle to a running (or not yet started) client.
///
/// Every method is non-blocking; commands are applied by the client task in
/// the order they were sent.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    ids: ListenerIds,
}

impl ClientHandle {
    /// Publish an activity, or clear it with `None`.
    ///
    /// Only transmitted while the session is ready; otherwise dropped.
    /// Returns `false` if the client task is gone.
    pub fn set_activity(&self, activity: Option<Activity>) -> bool {
        self.command_tx.send(ClientCommand::SetActivity(activity)).is_ok()
    }

    /// Clear the activity. Same as `set_activity(None)`.
    pub fn clear_activity(&self) -> bool {
        self.set_activity(None)
    }

    /// Subscribe to an event.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&IpcEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(event, Arc::new(callback), false)
    }

    /// Subscribe to the next occurrence of an event only.
    pub fn once<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&IpcEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(event, Arc::new(callback), true)
    }

    fn subscribe(&self, event: &str, callback: Listener, once: bool) -> ListenerId {
        let id = self.ids.next();
        let _ = self.command_tx.send(ClientCommand::Subscribe {
            id,
            event: event.to_string(),
            callback,
            once,
        });
        id
    }

    /// Remove a listener registered through any handle.
    pub fn unsubscribe(&self, id: ListenerId) {
        let _ = self.command_tx.send(ClientCommand::Unsubscribe(id));
    }

    /// Stop the client. Any pending backoff is cut short.
    pub fn stop(&self) {
        let _ = self.command_tx.send(ClientCommand::Stop);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

/// The presence client.
///
/// Generic over the [`Connector`] so tests can supply their own sockets.
pub struct PresenceClient<C: Connector = LocalConnector> {
    config: ClientConfig,
    socket_path: PathBuf,
    connector: C,
    registry: EventRegistry,
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    command_rx: mpsc::UnboundedReceiver<ClientCommand>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<C: Connector> std::fmt::Debug for PresenceClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceClient")
            .field("client_id", &self.config.client_id)
            .field("socket_path", &self.socket_path)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl PresenceClient {
    /// Client that connects to the local host service.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, LocalConnector)
    }
}

impl<C: Connector> PresenceClient<C> {
    /// Client with a custom connector.
    pub fn with_connector(config: ClientConfig, connector: C) -> Self {
        let socket_path = config.socket_path();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            socket_path,
            connector,
            registry: EventRegistry::new(),
            command_tx,
            command_rx,
            state_tx,
        }
    }

    /// Resolved socket path.
    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }

    /// Subscribe to an event.
    pub fn on<F>(&mut self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&IpcEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.subscribe(event, Arc::new(callback), false)
    }

    /// Subscribe to the next occurrence of an event only.
    pub fn once<F>(&mut self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&IpcEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.subscribe(event, Arc::new(callback), true)
    }

    /// Remove a listener.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Handle for use from other tasks and from listeners.
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            command_tx: self.command_tx.clone(),
            state_rx: self.state_tx.subscribe(),
            ids: self.registry.ids(),
        }
    }

    /// Spawn the run loop on the current runtime.
    pub fn connect(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Connect, and keep reconnecting until stopped.
    pub async fn run(mut self) {
        log::info!(
            "[Client] Starting presence client {} on {}",
            self.config.client_id,
            self.socket_path.display()
        );

        let mut attempt: u32 = 0;

        loop {
            if self.drain_idle_commands() {
                log::info!("[Client] Stop requested");
                break;
            }

            let end = self.run_session(&mut attempt).await;
            let Some(delay) = self.config.reconnect.delay_after(&end) else {
                log::info!("[Client] Stop requested, closing session");
                break;
            };

            attempt = attempt.saturating_add(1);
            self.set_state(ConnectionState::Reconnecting { attempt, delay });
            log::info!(
                "[Client] Reconnecting in {:.1}s (attempt {})",
                delay.as_secs_f32(),
                attempt
            );

            if self.wait_backoff(delay).await {
                log::info!("[Client] Stop requested during reconnect backoff");
                break;
            }
        }

        self.set_state(ConnectionState::Stopped);
    }

    /// Run one connection attempt to completion.
    async fn run_session(&mut self, attempt: &mut u32) -> SessionEnd {
        let mut session = Session::new(self.config.client_id.clone(), self.socket_path.clone());
        session.begin_connect();
        self.set_state(ConnectionState::Connecting);

        let stream = match self.connector.connect(&self.socket_path).await {
            Ok(stream) => stream,
            Err(e) => {
                let err = IpcError::ConnectFailed {
                    path: self.socket_path.clone(),
                    reason: e.to_string(),
                };
                log::warn!("[Client] {err}");
                session.fail();
                self.registry.publish(&IpcEvent::Error(err.clone()));
                return SessionEnd::Errored(err);
            }
        };

        let mut transport = Transport::start(stream);
        if let Some(handshake) = session.on_connected() {
            transport.send(handshake);
        }
        self.set_state(ConnectionState::Handshaking);
        self.registry.publish(&IpcEvent::Connect);

        let deadline = Instant::now() + self.config.handshake_timeout;

        loop {
            let handshaking = session.state() == SessionState::HandshakeSent;

            tokio::select! {
                event = transport.next_event() => match event {
                    TransportEvent::Frame(frame) => {
                        if let Some(end) = self.handle_frame(&mut session, &transport, frame, attempt) {
                            return end;
                        }
                    }
                    TransportEvent::Closed => {
                        log::info!("[Client] Session closed");
                        session.close();
                        self.registry.publish(&IpcEvent::End);
                        return SessionEnd::Closed;
                    }
                    TransportEvent::Failed(err) => {
                        log::warn!("[Client] Session failed: {err}");
                        session.fail();
                        self.registry.publish(&IpcEvent::Error(err.clone()));
                        return SessionEnd::Errored(err);
                    }
                },

                () = tokio::time::sleep_until(deadline), if handshaking => {
                    let err = IpcError::HandshakeTimeout(self.config.handshake_timeout);
                    log::warn!("[Client] {err}");
                    session.fail();
                    self.registry.publish(&IpcEvent::Error(err.clone()));
                    return SessionEnd::Errored(err);
                }

                command = self.command_rx.recv() => match command {
                    Some(ClientCommand::SetActivity(activity)) => {
                        Self::send_activity(&session, &transport, activity.as_ref());
                    }
                    Some(ClientCommand::Stop) | None => {
                        session.close();
                        transport.close(STOP_FLUSH_TIMEOUT).await;
                        return SessionEnd::Stopped;
                    }
                    Some(other) => self.apply_registry_command(other),
                },
            }
        }
    }

    /// Dispatch one inbound frame. Returns `Some` if it ended the session.
    fn handle_frame(
        &mut self,
        session: &mut Session,
        transport: &Transport,
        frame: Frame,
        attempt: &mut u32,
    ) -> Option<SessionEnd> {
        self.registry.publish(&IpcEvent::Message(frame.clone()));

        let outcome = session.on_frame(&frame);
        if let Some(reply) = outcome.reply {
            transport.send(reply);
        }
        if let Some(err) = outcome.host_closed {
            log::warn!("[Client] {err}");
            self.registry.publish(&IpcEvent::Error(err.clone()));
            return Some(SessionEnd::Errored(err));
        }
        if outcome.became_ready {
            *attempt = 0;
            self.set_state(ConnectionState::Ready);
        }

        let cmd = frame.cmd().map(str::to_string);
        let evt = frame.evt().map(str::to_string);

        if let Some(name) = &cmd {
            self.registry.publish(&IpcEvent::Relay {
                name: name.clone(),
                frame: frame.clone(),
            });
        }
        if let Some(name) = evt {
            if cmd.as_deref() != Some(name.as_str()) {
                self.registry.publish(&IpcEvent::Relay { name, frame });
            }
        }

        None
    }

    fn send_activity(session: &Session, transport: &Transport, activity: Option<&Activity>) {
        let command = set_activity_command(std::process::id(), activity);
        match session.command_frame(&command) {
            Some(bytes) => {
                if transport.send(bytes) {
                    log::debug!("[Client] Sent activity update (cleared: {})", activity.is_none());
                } else {
                    log::warn!("[Client] Write task stopped, activity update lost");
                }
            }
            None => log::debug!("[Client] Session not ready, dropping activity update"),
        }
    }

    /// Apply queued commands while no session is live.
    ///
    /// Returns `true` if a stop was requested.
    fn drain_idle_commands(&mut self) -> bool {
        while let Ok(command) = self.command_rx.try_recv() {
            if self.apply_idle_command(command) {
                return true;
            }
        }
        false
    }

    fn apply_idle_command(&mut self, command: ClientCommand) -> bool {
        match command {
            ClientCommand::Stop => true,
            ClientCommand::SetActivity(_) => {
                log::debug!("[Client] Not connected, dropping activity update");
                false
            }
            other => {
                self.apply_registry_command(other);
                false
            }
        }
    }

    fn apply_registry_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Subscribe {
                id,
                event,
                callback,
                once,
            } => self.registry.insert(id, &event, callback, once),
            ClientCommand::Unsubscribe(id) => {
                self.registry.unsubscribe(id);
            }
            ClientCommand::SetActivity(_) | ClientCommand::Stop => {}
        }
    }

    /// Sleep out the backoff. Returns `true` if stopped meanwhile.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return false,
                command = self.command_rx.recv() => match command {
                    Some(command) => {
                        if self.apply_idle_command(command) {
                            return true;
                        }
                    }
                    None => return true,
                },
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        log::debug!("[Client] State -> {:?}", state);
        self.state_tx.send_replace(state);
    }
}
