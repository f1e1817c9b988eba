// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker connection layer.
//!
//! The [`ConnectionManager`] owns the single broker session and is the only
//! component that touches a transport. Everything else publishes, subscribes
//! and listens through its handle.
//!
//! # Transports
//!
//! - [`MqttTransport`]: a real MQTT broker via `rumqttc` (feature `mqtt`)
//! - [`MemoryBroker`]: an in-process broker with retained-message semantics

mod classifier;
mod connection;
mod memory;
#[cfg(feature = "mqtt")]
mod mqtt;
mod topic;

pub use classifier::{Classified, ConnectFailure, FailureCode, classify};
pub use connection::{ConnectionManager, ConnectionState};
pub use memory::{MemoryBroker, PUBLISHED_LOG_LIMIT};
#[cfg(feature = "mqtt")]
pub use mqtt::MqttTransport;
pub use topic::{
    COMMAND_SUFFIX, LEGACY_MEDIA_SUFFIX, MEDIA_COMMAND_SEGMENT, PAYLOAD_OFFLINE, PAYLOAD_ONLINE,
    TOPIC_ROOT, Topics, topic_matches,
};

use std::future::Future;

use tokio::sync::mpsc;

use crate::config::BrokerEndpoint;
use crate::error::ProtocolError;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible.
    #[default]
    AtLeastOnce,
    /// Exactly-once handshake.
    ExactlyOnce,
}

#[cfg(feature = "mqtt")]
impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::AtMostOnce,
            QoS::AtLeastOnce => Self::AtLeastOnce,
            QoS::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// UTF-8 payload. An empty retained payload deletes the retained message.
    pub payload: String,
    /// Delivery guarantee.
    pub qos: QoS,
    /// Whether the broker keeps the message for future subscribers.
    pub retained: bool,
}

impl OutboundMessage {
    /// A retained message at QoS 1, used for state and announcements.
    #[must_use]
    pub fn retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retained: true,
        }
    }

    /// A non-retained message at QoS 1, used for events.
    #[must_use]
    pub fn transient(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retained: false,
        }
    }
}

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// UTF-8 payload.
    pub payload: String,
}

impl InboundMessage {
    /// Creates an inbound message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Something a live session reports back to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A message arrived on a subscribed topic.
    Message(InboundMessage),
    /// The session ended without being closed locally.
    Closed(ConnectFailure),
}

/// Outbound half of an established session.
///
/// Calls only enqueue work on the session and never wait for the broker.
pub trait Link: Send {
    /// Publishes a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot accept the request.
    fn publish(&self, message: &OutboundMessage) -> Result<(), ProtocolError>;

    /// Subscribes to a topic filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot accept the request.
    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), ProtocolError>;

    /// Removes a subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot accept the request.
    fn unsubscribe(&self, filter: &str) -> Result<(), ProtocolError>;

    /// Closes the session cleanly. No [`SessionEvent::Closed`] follows.
    fn close(&self);
}

/// An established broker session.
pub struct Session {
    link: Box<dyn Link>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Session {
    /// Bundles the outbound link and the inbound event stream.
    #[must_use]
    pub fn new(link: Box<dyn Link>, events: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        Self { link, events }
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Link>, mpsc::UnboundedReceiver<SessionEvent>) {
        (self.link, self.events)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Opens broker sessions.
///
/// The connection manager calls [`connect`](Transport::connect) once per
/// attempt and applies its own timeout and retry policy around it.
pub trait Transport: Send + Sync + 'static {
    /// Opens a session to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectFailure`] describing why the attempt failed.
    fn connect(
        &self,
        endpoint: &BrokerEndpoint,
    ) -> impl Future<Output = Result<Session, ConnectFailure>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_constructors_set_flags() {
        let state = OutboundMessage::retained("t/state", "{}");
        assert!(state.retained);
        assert_eq!(state.qos, QoS::AtLeastOnce);

        let event = OutboundMessage::transient("t/event", "{}");
        assert!(!event.retained);
        assert_eq!(event.qos, QoS::AtLeastOnce);
    }

    #[cfg(feature = "mqtt")]
    #[test]
    fn qos_maps_to_rumqttc() {
        assert_eq!(rumqttc::QoS::from(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(rumqttc::QoS::from(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }
}
