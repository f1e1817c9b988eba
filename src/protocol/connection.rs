// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker session ownership, reconnection and subscription replay.
//!
//! # Architecture
//!
//! ```text
//!  ConnectionManager (handle, Clone)          driver task (owns everything)
//!  ───────────────────────────────           ─────────────────────────────
//!  connect / disconnect / publish    ──req──▶  endpoint, retry counter,
//!  subscribe / unsubscribe                     subscription set, Link
//!  set_network_available                             │
//!                                                    ▼
//!  state() / watch_state()  ◀──watch───  ConnectionState
//!  messages()               ◀──bus─────  SessionEvent::Message
//! ```
//!
//! Handles never touch the transport. They enqueue a request and return;
//! the driver task applies requests in order, so a subscription change can
//! never race a reconnect in progress.

use std::collections::BTreeMap;
use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

use super::classifier::{ConnectFailure, FailureCode, classify};
use super::{InboundMessage, Link, OutboundMessage, QoS, Session, SessionEvent, Transport};
use crate::config::{BrokerEndpoint, ReconnectionPolicy};
use crate::event::{DEFAULT_CHANNEL_CAPACITY, EventBus};

/// Observable state of the broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection wanted.
    #[default]
    Disconnected,
    /// First attempt after `connect()` in progress.
    Connecting,
    /// Session established.
    Connected,
    /// Retry attempt in progress.
    Reconnecting {
        /// 1-based retry number.
        attempt: u32,
        /// Retries allowed before giving up.
        max_attempts: u32,
    },
    /// Connection wanted but the network is down.
    WaitingForNetwork,
    /// Last attempt failed.
    ///
    /// With `recoverable` set a retry is already scheduled; otherwise the
    /// state is terminal until the next `connect()`.
    Error {
        /// Classified, user-facing message.
        message: String,
        /// Whether the connection manager keeps retrying.
        recoverable: bool,
    },
}

impl ConnectionState {
    /// Returns true if a session is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true for an error nothing will retry.
    #[must_use]
    pub fn is_terminal_error(&self) -> bool {
        matches!(
            self,
            Self::Error {
                recoverable: false,
                ..
            }
        )
    }
}

/// Requests queued from handles to the driver task.
#[derive(Debug)]
enum Request {
    Connect(BrokerEndpoint),
    Disconnect,
    Publish(OutboundMessage),
    Subscribe(String, QoS),
    Unsubscribe(String),
    NetworkAvailable(bool),
    Shutdown,
}

/// Handle to the single broker session.
///
/// Cheap to clone; every clone talks to the same driver task. All methods
/// return immediately and completion is observed through
/// [`watch_state`](Self::watch_state) and [`messages`](Self::messages).
///
/// # Examples
///
/// ```no_run
/// use tablethub::config::{BrokerEndpoint, ReconnectionPolicy};
/// use tablethub::protocol::{ConnectionManager, MemoryBroker, QoS};
///
/// # async fn example() {
/// let broker = MemoryBroker::new();
/// let manager = ConnectionManager::start(broker, ReconnectionPolicy::default());
///
/// manager.subscribe("statestream/#", QoS::AtLeastOnce);
/// manager.connect(BrokerEndpoint::new("localhost").with_client_id("panel"));
///
/// let mut state = manager.watch_state();
/// state.wait_for(|s| s.is_connected()).await.unwrap();
/// manager.publish("tablethub/panel/event", "{}", QoS::AtLeastOnce, false);
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    requests: mpsc::UnboundedSender<Request>,
    state: Arc<watch::Sender<ConnectionState>>,
    inbound: EventBus<InboundMessage>,
}

impl ConnectionManager {
    /// Spawns the driver task on the current tokio runtime and returns a
    /// handle to it. The connection starts `Disconnected`.
    #[must_use]
    pub fn start<T: Transport>(transport: T, policy: ReconnectionPolicy) -> Self {
        Self::start_with_capacity(transport, policy, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Like [`start`](Self::start), but buffers up to `capacity` inbound
    /// messages per consumer before a slow consumer starts losing them.
    #[must_use]
    pub fn start_with_capacity<T: Transport>(
        transport: T,
        policy: ReconnectionPolicy,
        capacity: usize,
    ) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let state = Arc::new(state);
        let inbound = EventBus::with_capacity(capacity);

        let driver = Driver {
            transport: Arc::new(transport),
            policy,
            requests: rx,
            state: Arc::clone(&state),
            inbound: inbound.clone(),
            endpoint: None,
            subscriptions: BTreeMap::new(),
            link: None,
            events: None,
            attempt: None,
            retry_at: None,
            retries: 0,
            network_available: true,
        };
        tokio::spawn(driver.run());

        Self {
            requests,
            state,
            inbound,
        }
    }

    /// Connects to `endpoint`, replacing any previous session.
    ///
    /// An endpoint that fails validation (empty host, port zero, empty client
    /// identity) moves straight to a terminal `Error` without any transport
    /// attempt.
    pub fn connect(&self, endpoint: BrokerEndpoint) {
        self.send(Request::Connect(endpoint));
    }

    /// Closes the session and stops reconnecting. Safe in any state.
    pub fn disconnect(&self) {
        self.send(Request::Disconnect);
    }

    /// Disconnects and ends the driver task. Handles become inert.
    pub fn stop(&self) {
        self.send(Request::Disconnect);
        self.send(Request::Shutdown);
    }

    /// Publishes a message. Dropped (and logged) when not connected.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<String>,
        qos: QoS,
        retained: bool,
    ) {
        self.publish_message(OutboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retained,
        });
    }

    /// Publishes a prepared message. Dropped (and logged) when not connected.
    pub fn publish_message(&self, message: OutboundMessage) {
        if !self.is_connected() {
            tracing::debug!(topic = %message.topic, "Not connected, dropping publish");
            return;
        }
        self.send(Request::Publish(message));
    }

    /// Adds a subscription. Applied now if connected, otherwise on the next
    /// successful connection. Subscribing twice is a no-op.
    pub fn subscribe(&self, filter: impl Into<String>, qos: QoS) {
        self.send(Request::Subscribe(filter.into(), qos));
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, filter: impl Into<String>) {
        self.send(Request::Unsubscribe(filter.into()));
    }

    /// Tells the manager whether the network is reachable.
    ///
    /// While unavailable no attempts are made and the state is
    /// `WaitingForNetwork`; when it comes back a fresh attempt starts with the
    /// retry counter reset.
    pub fn set_network_available(&self, available: bool) {
        self.send(Request::NetworkAvailable(available));
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Returns true if a session is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Returns a receiver that sees the current state and every later one.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Attaches a new consumer to the inbound message stream.
    ///
    /// Each consumer buffers independently. One that falls more than the
    /// capacity behind (256 unless set through
    /// [`start_with_capacity`](Self::start_with_capacity)) gets
    /// `RecvError::Lagged(n)` from its next `recv`, loses the `n` oldest
    /// messages and then continues with the rest. Other consumers are not
    /// affected.
    #[must_use]
    pub fn messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }

    fn send(&self, request: Request) {
        if self.requests.send(request).is_err() {
            tracing::debug!("Connection driver stopped, ignoring request");
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

type Attempt = Pin<Box<dyn Future<Output = Result<Session, ConnectFailure>> + Send>>;

/// What woke the driver up.
enum Step {
    Request(Request),
    Session(Option<SessionEvent>),
    Attempt(Result<Session, ConnectFailure>),
    Retry,
    Shutdown,
}

struct Driver<T> {
    transport: Arc<T>,
    policy: ReconnectionPolicy,
    requests: mpsc::UnboundedReceiver<Request>,
    state: Arc<watch::Sender<ConnectionState>>,
    inbound: EventBus<InboundMessage>,
    /// Present while a connection is wanted.
    endpoint: Option<BrokerEndpoint>,
    subscriptions: BTreeMap<String, QoS>,
    link: Option<Box<dyn Link>>,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    attempt: Option<Attempt>,
    retry_at: Option<Instant>,
    retries: u32,
    network_available: bool,
}

impl<T: Transport> Driver<T> {
    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                request = self.requests.recv() => request.map_or(Step::Shutdown, Step::Request),
                event = next_event(&mut self.events) => Step::Session(event),
                outcome = finish_attempt(&mut self.attempt) => Step::Attempt(outcome),
                () = wait_until(self.retry_at) => Step::Retry,
            };

            match step {
                Step::Request(Request::Shutdown) | Step::Shutdown => break,
                Step::Request(request) => self.handle_request(request),
                Step::Session(event) => self.handle_session_event(event),
                Step::Attempt(outcome) => {
                    self.attempt = None;
                    self.handle_attempt(outcome);
                }
                Step::Retry => {
                    self.retry_at = None;
                    self.start_attempt(ConnectionState::Reconnecting {
                        attempt: self.retries,
                        max_attempts: self.policy.max_attempts,
                    });
                }
            }
        }

        self.teardown();
        tracing::debug!("Connection driver stopped");
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect(endpoint) => self.connect(endpoint),
            Request::Disconnect => {
                if self.endpoint.take().is_some() || self.link.is_some() {
                    tracing::info!("Disconnecting from broker");
                }
                self.teardown();
                self.retries = 0;
                self.set_state(ConnectionState::Disconnected);
            }
            Request::Publish(message) => match &self.link {
                Some(link) => {
                    tracing::debug!(
                        topic = %message.topic,
                        retained = message.retained,
                        "Publishing"
                    );
                    if let Err(e) = link.publish(&message) {
                        tracing::warn!(topic = %message.topic, error = %e, "Publish failed");
                    }
                }
                None => {
                    tracing::debug!(topic = %message.topic, "Session gone, dropping publish");
                }
            },
            Request::Subscribe(filter, qos) => {
                if self.subscriptions.insert(filter.clone(), qos) == Some(qos) {
                    return;
                }
                if let Some(link) = &self.link {
                    subscribe_on(link.as_ref(), &filter, qos);
                }
            }
            Request::Unsubscribe(filter) => {
                if self.subscriptions.remove(&filter).is_none() {
                    return;
                }
                if let Some(link) = &self.link
                    && let Err(e) = link.unsubscribe(&filter)
                {
                    tracing::warn!(topic = %filter, error = %e, "Unsubscribe failed");
                }
            }
            Request::NetworkAvailable(available) => self.network_changed(available),
            Request::Shutdown => {}
        }
    }

    fn connect(&mut self, endpoint: BrokerEndpoint) {
        self.teardown();
        self.retries = 0;

        if let Err(e) = endpoint.validate() {
            tracing::error!(error = %e, "Invalid broker endpoint");
            self.endpoint = None;
            self.set_state(ConnectionState::Error {
                message: format!("Invalid configuration: {e}"),
                recoverable: false,
            });
            return;
        }

        tracing::info!(
            host = %endpoint.host,
            port = endpoint.port,
            client_id = %endpoint.client_id,
            tls = endpoint.use_tls,
            "Connecting to broker"
        );
        self.endpoint = Some(endpoint);

        if self.network_available {
            self.start_attempt(ConnectionState::Connecting);
        } else {
            self.set_state(ConnectionState::WaitingForNetwork);
        }
    }

    fn network_changed(&mut self, available: bool) {
        if self.network_available == available {
            return;
        }
        self.network_available = available;
        tracing::info!(available, "Network availability changed");

        if self.endpoint.is_none() || self.link.is_some() {
            // Nothing wanted, or a live session that will report its own loss.
            return;
        }

        if available {
            self.retries = 0;
            self.retry_at = None;
            if self.attempt.is_none() {
                self.start_attempt(ConnectionState::Connecting);
            }
        } else {
            self.attempt = None;
            self.retry_at = None;
            self.set_state(ConnectionState::WaitingForNetwork);
        }
    }

    fn start_attempt(&mut self, state: ConnectionState) {
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        self.set_state(state);

        let transport = Arc::clone(&self.transport);
        let timeout = self.policy.connect_timeout;
        self.attempt = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, transport.connect(&endpoint)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ConnectFailure::code(FailureCode::ClientTimeout)
                    .with_description(format!("no answer within {}s", timeout.as_secs()))),
            }
        }));
    }

    fn handle_attempt(&mut self, outcome: Result<Session, ConnectFailure>) {
        match outcome {
            Ok(session) => {
                let (link, events) = session.into_parts();
                self.retries = 0;
                self.set_state(ConnectionState::Connected);
                tracing::info!(
                    subscriptions = self.subscriptions.len(),
                    "Connected to broker"
                );

                for (filter, qos) in &self.subscriptions {
                    subscribe_on(link.as_ref(), filter, *qos);
                }
                self.link = Some(link);
                self.events = Some(events);
            }
            Err(failure) => self.handle_failure(&failure),
        }
    }

    fn handle_session_event(&mut self, event: Option<SessionEvent>) {
        match event {
            Some(SessionEvent::Message(message)) => {
                tracing::trace!(topic = %message.topic, "Message received");
                self.inbound.publish(message);
            }
            Some(SessionEvent::Closed(failure)) => {
                tracing::warn!(error = %failure, "Broker session lost");
                self.handle_failure(&failure);
            }
            None => {
                tracing::warn!("Broker session ended unexpectedly");
                self.handle_failure(&ConnectFailure::code(FailureCode::ConnectionLost));
            }
        }
    }

    fn handle_failure(&mut self, failure: &ConnectFailure) {
        self.close_session();
        let classified = classify(failure);

        if !classified.recoverable {
            tracing::error!(error = %failure, message = %classified.message, "Connection failed, not retrying");
            self.give_up(classified.message);
            return;
        }

        if !self.policy.enabled || self.retries >= self.policy.max_attempts {
            tracing::error!(
                error = %failure,
                retries = self.retries,
                "Connection failed, retry budget exhausted"
            );
            let message = if self.policy.enabled {
                format!(
                    "{} (gave up after {} attempts)",
                    classified.message, self.retries
                )
            } else {
                classified.message
            };
            self.give_up(message);
            return;
        }

        if !self.network_available {
            self.set_state(ConnectionState::WaitingForNetwork);
            return;
        }

        self.retries += 1;
        tracing::warn!(
            error = %failure,
            attempt = self.retries,
            max_attempts = self.policy.max_attempts,
            delay_ms = u64::try_from(self.policy.delay.as_millis()).unwrap_or(u64::MAX),
            "Connection failed, retrying"
        );
        self.set_state(ConnectionState::Error {
            message: classified.message,
            recoverable: true,
        });
        self.retry_at = Some(Instant::now() + self.policy.delay);
    }

    fn give_up(&mut self, message: String) {
        self.endpoint = None;
        self.retry_at = None;
        self.set_state(ConnectionState::Error {
            message,
            recoverable: false,
        });
    }

    fn close_session(&mut self) {
        self.link = None;
        self.events = None;
    }

    /// Drops every piece of connection work in flight.
    fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.events = None;
        self.attempt = None;
        self.retry_at = None;
    }

    fn set_state(&self, state: ConnectionState) {
        tracing::debug!(?state, "Connection state changed");
        self.state.send_replace(state);
    }
}

fn subscribe_on(link: &dyn Link, filter: &str, qos: QoS) {
    match link.subscribe(filter, qos) {
        Ok(()) => tracing::debug!(topic = %filter, ?qos, "Subscribed"),
        Err(e) => tracing::warn!(topic = %filter, error = %e, "Subscribe failed"),
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<SessionEvent>>,
) -> Option<SessionEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn finish_attempt(attempt: &mut Option<Attempt>) -> Result<Session, ConnectFailure> {
    match attempt {
        Some(fut) => fut.as_mut().await,
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => pending().await,
    }
}
