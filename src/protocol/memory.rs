// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process broker.
//!
//! [`MemoryBroker`] implements [`Transport`] with the parts of broker
//! behaviour the gateway relies on: retained messages (an empty retained
//! payload deletes), wildcard subscriptions, last-will delivery when a
//! session dies and client-id takeover. It also records what clients did and
//! can be scripted to refuse or stall connection attempts, which makes it the
//! transport of choice for tests and demos.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::future::{Future, pending};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::classifier::{ConnectFailure, FailureCode};
use super::topic::topic_matches;
use super::{InboundMessage, Link, OutboundMessage, QoS, Session, SessionEvent, Transport};
use crate::config::BrokerEndpoint;
use crate::error::ProtocolError;

/// How many client publishes the broker remembers for inspection.
pub const PUBLISHED_LOG_LIMIT: usize = 1024;

/// Outcome forced on an upcoming connection attempt.
#[derive(Debug)]
enum Scripted {
    Fail(ConnectFailure),
    Stall,
}

#[derive(Debug)]
struct Client {
    session: u64,
    client_id: String,
    filters: BTreeSet<String>,
    sink: mpsc::UnboundedSender<SessionEvent>,
    will: Option<OutboundMessage>,
}

#[derive(Debug)]
struct Observer {
    filter: String,
    sink: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Debug, Default)]
struct BrokerState {
    next_session: u64,
    clients: Vec<Client>,
    observers: Vec<Observer>,
    retained: BTreeMap<String, String>,
    script: VecDeque<Scripted>,
    connect_attempts: usize,
    published: VecDeque<OutboundMessage>,
    subscribe_log: HashMap<String, Vec<String>>,
    credentials: Option<(String, String)>,
}

impl BrokerState {
    /// Stores, deletes and delivers a message.
    fn route(&mut self, topic: &str, payload: &str, retained: bool) {
        if retained {
            if payload.is_empty() {
                self.retained.remove(topic);
            } else {
                self.retained.insert(topic.to_string(), payload.to_string());
            }
        }

        for client in &self.clients {
            if client.filters.iter().any(|f| topic_matches(f, topic)) {
                let _ = client
                    .sink
                    .send(SessionEvent::Message(InboundMessage::new(topic, payload)));
            }
        }

        self.observers.retain(|observer| {
            !topic_matches(&observer.filter, topic)
                || observer.sink.send(InboundMessage::new(topic, payload)).is_ok()
        });
    }

    fn retained_matching(&self, filter: &str) -> Vec<InboundMessage> {
        self.retained
            .iter()
            .filter(|(topic, _)| topic_matches(filter, topic))
            .map(|(topic, payload)| InboundMessage::new(topic.as_str(), payload.as_str()))
            .collect()
    }

    /// Registers a new client session, returning its id and event stream.
    /// `None` means the attempt was scripted to stall.
    fn admit(
        &mut self,
        endpoint: &BrokerEndpoint,
    ) -> Option<Result<(u64, mpsc::UnboundedReceiver<SessionEvent>), ConnectFailure>> {
        self.connect_attempts += 1;

        match self.script.pop_front() {
            Some(Scripted::Fail(failure)) => return Some(Err(failure)),
            Some(Scripted::Stall) => return None,
            None => {}
        }

        if let Some((user, pass)) = &self.credentials
            && endpoint.credentials() != Some((user.as_str(), pass.as_str()))
        {
            return Some(Err(ConnectFailure::code(FailureCode::BadCredentials)));
        }

        if let Some(index) = self
            .clients
            .iter()
            .position(|c| c.client_id == endpoint.client_id)
        {
            let old = self.clients.swap_remove(index);
            let _ = old.sink.send(SessionEvent::Closed(
                ConnectFailure::code(FailureCode::ConnectionLost)
                    .with_description("session taken over by a new connection"),
            ));
        }

        self.next_session += 1;
        let (sink, events) = mpsc::unbounded_channel();
        self.clients.push(Client {
            session: self.next_session,
            client_id: endpoint.client_id.clone(),
            filters: BTreeSet::new(),
            sink,
            will: endpoint.last_will.clone(),
        });

        Some(Ok((self.next_session, events)))
    }

    fn client_mut(&mut self, session: u64) -> Option<&mut Client> {
        self.clients.iter_mut().find(|c| c.session == session)
    }
}

/// An in-process MQTT-like broker.
///
/// Clones share the same broker.
///
/// # Examples
///
/// ```
/// use tablethub::protocol::MemoryBroker;
///
/// let broker = MemoryBroker::new();
/// broker.inject_retained("statestream/light/kitchen/state", "on");
/// assert_eq!(broker.retained("statestream/light/kitchen/state").as_deref(), Some("on"));
/// ```
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Creates an empty broker accepting any client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires these credentials from every client.
    #[must_use]
    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.state.lock().credentials = Some((username.into(), password.into()));
        self
    }

    /// Makes the next connection attempts fail with these failures, in order.
    pub fn fail_next_connects(&self, failures: impl IntoIterator<Item = ConnectFailure>) {
        self.state
            .lock()
            .script
            .extend(failures.into_iter().map(Scripted::Fail));
    }

    /// Makes the next `count` connection attempts hang forever.
    pub fn stall_next_connects(&self, count: usize) {
        self.state
            .lock()
            .script
            .extend(std::iter::repeat_with(|| Scripted::Stall).take(count));
    }

    /// Number of connection attempts seen so far, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    /// Returns true if a session with this client id is open.
    #[must_use]
    pub fn is_client_connected(&self, client_id: &str) -> bool {
        self.state
            .lock()
            .clients
            .iter()
            .any(|c| c.client_id == client_id)
    }

    /// Every subscribe call made by `client_id`, across sessions.
    #[must_use]
    pub fn subscribe_log(&self, client_id: &str) -> Vec<String> {
        self.state
            .lock()
            .subscribe_log
            .get(client_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The most recent messages clients published, oldest first.
    ///
    /// At most [`PUBLISHED_LOG_LIMIT`] are kept; older ones are dropped.
    /// Wills and injected messages are not included.
    #[must_use]
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state.lock().published.iter().cloned().collect()
    }

    /// Logged messages clients published to `topic`, in order.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<OutboundMessage> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// The retained payload on `topic`, if any.
    #[must_use]
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.state.lock().retained.get(topic).cloned()
    }

    /// Retained topics matching `filter`.
    #[must_use]
    pub fn retained_topics(&self, filter: &str) -> Vec<String> {
        self.state
            .lock()
            .retained
            .keys()
            .filter(|topic| topic_matches(filter, topic))
            .cloned()
            .collect()
    }

    /// Publishes a non-retained message as if another client sent it.
    pub fn inject(&self, topic: &str, payload: &str) {
        self.state.lock().route(topic, payload, false);
    }

    /// Publishes a retained message as if another client sent it.
    pub fn inject_retained(&self, topic: &str, payload: &str) {
        self.state.lock().route(topic, payload, true);
    }

    /// Attaches a passive subscriber to `filter`.
    ///
    /// Matching retained messages are delivered first, like a fresh
    /// subscription on a real broker.
    #[must_use]
    pub fn observe(&self, filter: &str) -> mpsc::UnboundedReceiver<InboundMessage> {
        let (sink, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        for message in state.retained_matching(filter) {
            let _ = sink.send(message);
        }
        state.observers.push(Observer {
            filter: filter.to_string(),
            sink,
        });
        rx
    }

    /// Kills every open session as a network failure would.
    ///
    /// Clients see [`SessionEvent::Closed`] and their last wills are
    /// published.
    pub fn drop_connections(&self) {
        let mut state = self.state.lock();
        let clients = std::mem::take(&mut state.clients);
        for client in clients {
            tracing::debug!(client_id = %client.client_id, "Dropping memory session");
            let _ = client
                .sink
                .send(SessionEvent::Closed(ConnectFailure::code(FailureCode::ConnectionLost)));
            if let Some(will) = client.will {
                state.route(&will.topic, &will.payload, will.retained);
            }
        }
    }

    fn open(&self, endpoint: &BrokerEndpoint) -> Option<Result<Session, ConnectFailure>> {
        let outcome = self.state.lock().admit(endpoint)?;
        Some(outcome.map(|(session, events)| {
            tracing::debug!(client_id = %endpoint.client_id, session, "Memory session opened");
            let link = MemoryLink {
                state: Arc::clone(&self.state),
                session,
            };
            Session::new(Box::new(link), events)
        }))
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBroker")
            .field("clients", &state.clients.len())
            .field("retained", &state.retained.len())
            .field("connect_attempts", &state.connect_attempts)
            .finish_non_exhaustive()
    }
}

impl Transport for MemoryBroker {
    fn connect(
        &self,
        endpoint: &BrokerEndpoint,
    ) -> impl Future<Output = Result<Session, ConnectFailure>> + Send {
        let broker = self.clone();
        let endpoint = endpoint.clone();
        async move {
            // A real handshake never completes in the same poll.
            tokio::task::yield_now().await;
            match broker.open(&endpoint) {
                Some(outcome) => outcome,
                None => pending().await,
            }
        }
    }
}

struct MemoryLink {
    state: Arc<Mutex<BrokerState>>,
    session: u64,
}

impl Link for MemoryLink {
    fn publish(&self, message: &OutboundMessage) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        if state.client_mut(self.session).is_none() {
            return Err(ProtocolError::SessionClosed);
        }
        if state.published.len() == PUBLISHED_LOG_LIMIT {
            state.published.pop_front();
        }
        state.published.push_back(message.clone());
        state.route(&message.topic, &message.payload, message.retained);
        Ok(())
    }

    fn subscribe(&self, filter: &str, _qos: QoS) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        let retained = state.retained_matching(filter);
        let client = state
            .client_mut(self.session)
            .ok_or(ProtocolError::SessionClosed)?;

        client.filters.insert(filter.to_string());
        for message in retained {
            let _ = client.sink.send(SessionEvent::Message(message));
        }
        let client_id = client.client_id.clone();
        state
            .subscribe_log
            .entry(client_id)
            .or_default()
            .push(filter.to_string());
        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        let client = state
            .client_mut(self.session)
            .ok_or(ProtocolError::SessionClosed)?;
        client.filters.remove(filter);
        Ok(())
    }

    fn close(&self) {
        self.state.lock().clients.retain(|c| c.session != self.session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(client_id: &str) -> BrokerEndpoint {
        BrokerEndpoint::new("memory").with_client_id(client_id)
    }

    #[tokio::test]
    async fn retained_messages_are_replayed_and_deleted() {
        let broker = MemoryBroker::new();
        let session = broker.connect(&endpoint("a")).await.unwrap();
        let (link, _events) = session.into_parts();

        link.publish(&OutboundMessage::retained("x/state", "1")).unwrap();
        assert_eq!(broker.retained("x/state").as_deref(), Some("1"));

        let mut late = broker.observe("x/#");
        assert_eq!(late.recv().await.unwrap(), InboundMessage::new("x/state", "1"));

        link.publish(&OutboundMessage::retained("x/state", "")).unwrap();
        assert!(broker.retained("x/state").is_none());
        assert_eq!(late.recv().await.unwrap(), InboundMessage::new("x/state", ""));
    }

    #[tokio::test]
    async fn transient_messages_are_not_stored() {
        let broker = MemoryBroker::new();
        let (link, _events) = broker.connect(&endpoint("a")).await.unwrap().into_parts();

        link.publish(&OutboundMessage::transient("x/event", "{}")).unwrap();
        assert!(broker.retained("x/event").is_none());
        assert_eq!(broker.published_to("x/event").len(), 1);
    }

    #[tokio::test]
    async fn published_log_keeps_only_the_latest() {
        let broker = MemoryBroker::new();
        let (link, _events) = broker.connect(&endpoint("a")).await.unwrap().into_parts();

        for n in 0..PUBLISHED_LOG_LIMIT + 10 {
            link.publish(&OutboundMessage::transient("x/event", n.to_string()))
                .unwrap();
        }

        let log = broker.published();
        assert_eq!(log.len(), PUBLISHED_LOG_LIMIT);
        assert_eq!(log[0].payload, "10");
        assert_eq!(
            log.last().map(|m| m.payload.as_str()),
            Some((PUBLISHED_LOG_LIMIT + 9).to_string().as_str())
        );
    }

    #[tokio::test]
    async fn subscriber_receives_matching_messages() {
        let broker = MemoryBroker::new();
        broker.inject_retained("s/light/a/state", "on");
        let (link, mut events) = broker.connect(&endpoint("a")).await.unwrap().into_parts();

        link.subscribe("s/#", QoS::AtLeastOnce).unwrap();
        broker.inject("s/light/b/state", "off");
        broker.inject("other", "ignored");

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Message(InboundMessage::new("s/light/a/state", "on"))
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Message(InboundMessage::new("s/light/b/state", "off"))
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_session_publishes_will() {
        let broker = MemoryBroker::new();
        let ep = endpoint("a").with_last_will(OutboundMessage::retained("a/availability", "offline"));
        let (_link, mut events) = broker.connect(&ep).await.unwrap().into_parts();

        broker.drop_connections();

        assert!(matches!(events.recv().await, Some(SessionEvent::Closed(_))));
        assert_eq!(broker.retained("a/availability").as_deref(), Some("offline"));
        assert!(!broker.is_client_connected("a"));
    }

    #[tokio::test]
    async fn clean_close_skips_will() {
        let broker = MemoryBroker::new();
        let ep = endpoint("a").with_last_will(OutboundMessage::retained("a/availability", "offline"));
        let (link, _events) = broker.connect(&ep).await.unwrap().into_parts();

        link.close();

        assert!(broker.retained("a/availability").is_none());
        assert!(matches!(
            link.publish(&OutboundMessage::transient("t", "p")),
            Err(ProtocolError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn same_client_id_takes_over() {
        let broker = MemoryBroker::new();
        let (_old, mut old_events) = broker.connect(&endpoint("a")).await.unwrap().into_parts();
        let _new = broker.connect(&endpoint("a")).await.unwrap();

        assert!(matches!(old_events.recv().await, Some(SessionEvent::Closed(_))));
        assert!(broker.is_client_connected("a"));
    }

    #[tokio::test]
    async fn credentials_are_checked() {
        let broker = MemoryBroker::new().with_credentials("user", "pass");

        let failure = broker.connect(&endpoint("a")).await.unwrap_err();
        assert_eq!(failure.failure_code(), Some(FailureCode::BadCredentials));

        let ok = broker
            .connect(&endpoint("a").with_credentials("user", "pass"))
            .await;
        assert!(ok.is_ok());
        assert_eq!(broker.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects([
            ConnectFailure::code(FailureCode::BrokerUnavailable),
            ConnectFailure::described("Connection refused"),
        ]);

        let first = broker.connect(&endpoint("a")).await.unwrap_err();
        let second = broker.connect(&endpoint("a")).await.unwrap_err();
        assert_eq!(first.failure_code(), Some(FailureCode::BrokerUnavailable));
        assert_eq!(second.description(), Some("Connection refused"));
        assert!(broker.connect(&endpoint("a")).await.is_ok());
    }
}
