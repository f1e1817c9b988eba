// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT transport backed by `rumqttc`.
//!
//! Each [`connect`](Transport::connect) call builds a fresh client and event
//! loop, waits for the broker's `ConnAck` and hands back a [`Session`].
//! Reconnection is never left to `rumqttc`: the event loop task ends on the
//! first error and the connection manager decides what happens next.

use std::future::Future;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Outgoing, Packet,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::classifier::{ConnectFailure, FailureCode};
use super::{InboundMessage, Link, OutboundMessage, QoS, Session, SessionEvent, Transport};
use crate::config::BrokerEndpoint;
use crate::error::ProtocolError;

/// Shortest keep-alive interval handed to `rumqttc`.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Connects to a real MQTT broker over TCP or TLS.
///
/// # Examples
///
/// ```no_run
/// use tablethub::config::ReconnectionPolicy;
/// use tablethub::protocol::{ConnectionManager, MqttTransport};
///
/// # async fn example() {
/// let manager = ConnectionManager::start(MqttTransport::new(), ReconnectionPolicy::default());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MqttTransport {
    request_capacity: usize,
}

impl MqttTransport {
    /// Creates a transport with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many outgoing requests may queue per session.
    #[must_use]
    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity.max(1);
        self
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self {
            request_capacity: 64,
        }
    }
}

impl Transport for MqttTransport {
    fn connect(
        &self,
        endpoint: &BrokerEndpoint,
    ) -> impl Future<Output = Result<Session, ConnectFailure>> + Send {
        let options = mqtt_options(endpoint);
        let capacity = self.request_capacity;

        async move {
            let (client, event_loop) = AsyncClient::new(options, capacity);
            let (connack_tx, connack_rx) = oneshot::channel();
            let (events_tx, events_rx) = mpsc::unbounded_channel();

            let mut task = AbortOnDrop(Some(tokio::spawn(drive_event_loop(
                event_loop, connack_tx, events_tx,
            ))));

            match connack_rx.await {
                Ok(Ok(())) => {
                    task.disarm();
                    Ok(Session::new(Box::new(MqttLink { client }), events_rx))
                }
                Ok(Err(failure)) => Err(failure),
                Err(_) => Err(ConnectFailure::described(
                    "MQTT event loop terminated unexpectedly",
                )),
            }
        }
    }
}

fn mqtt_options(endpoint: &BrokerEndpoint) -> MqttOptions {
    let mut options = MqttOptions::new(&endpoint.client_id, &endpoint.host, endpoint.port);
    options.set_keep_alive(endpoint.keep_alive.max(MIN_KEEP_ALIVE));
    options.set_clean_session(true);

    if let Some((username, password)) = endpoint.credentials() {
        options.set_credentials(username, password);
    }

    if endpoint.use_tls {
        options.set_transport(rumqttc::Transport::tls_with_default_config());
    }

    if let Some(will) = &endpoint.last_will {
        options.set_last_will(LastWill::new(
            &will.topic,
            will.payload.clone(),
            will.qos.into(),
            will.retained,
        ));
    }

    options
}

/// Aborts the event loop task if the attempt is abandoned before `ConnAck`.
struct AbortOnDrop(Option<JoinHandle<()>>);

impl AbortOnDrop {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    connack_tx: oneshot::Sender<Result<(), ConnectFailure>>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut connack_tx = Some(connack_tx);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Ok(payload) = String::from_utf8(publish.payload.to_vec()) else {
                    tracing::warn!(topic = %publish.topic, "Ignoring non UTF-8 payload");
                    continue;
                };
                let message = InboundMessage::new(publish.topic, payload);
                if events.send(SessionEvent::Message(message)).is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker sent disconnect");
                let _ = events.send(SessionEvent::Closed(
                    ConnectFailure::code(FailureCode::ConnectionLost)
                        .with_description("broker closed the session"),
                ));
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("MQTT session closed locally");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let failure = failure_from(&e);
                match connack_tx.take() {
                    Some(tx) => {
                        tracing::debug!(error = %e, "MQTT connection attempt failed");
                        let _ = tx.send(Err(failure));
                    }
                    None => {
                        tracing::warn!(error = %e, "MQTT event loop error");
                        let _ = events.send(SessionEvent::Closed(failure));
                    }
                }
                break;
            }
        }
    }
}

fn failure_from(error: &ConnectionError) -> ConnectFailure {
    match error {
        ConnectionError::ConnectionRefused(code) => {
            let failure_code = match code {
                ConnectReturnCode::BadClientId => FailureCode::InvalidClientId,
                ConnectReturnCode::BadUserNamePassword => FailureCode::BadCredentials,
                ConnectReturnCode::NotAuthorized => FailureCode::NotAuthorized,
                ConnectReturnCode::ServiceUnavailable => FailureCode::BrokerUnavailable,
                ConnectReturnCode::RefusedProtocolVersion => FailureCode::InvalidProtocolVersion,
                _ => FailureCode::ServerConnectError,
            };
            ConnectFailure::code(failure_code).with_description(format!("{code:?}"))
        }
        ConnectionError::NetworkTimeout => {
            ConnectFailure::code(FailureCode::ClientTimeout).with_description(error.to_string())
        }
        other => ConnectFailure::described(other.to_string()),
    }
}

struct MqttLink {
    client: AsyncClient,
}

impl Link for MqttLink {
    fn publish(&self, message: &OutboundMessage) -> Result<(), ProtocolError> {
        self.client.try_publish(
            &message.topic,
            message.qos.into(),
            message.retained,
            message.payload.clone(),
        )?;
        Ok(())
    }

    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), ProtocolError> {
        self.client.try_subscribe(filter, qos.into())?;
        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), ProtocolError> {
        self.client.try_unsubscribe(filter)?;
        Ok(())
    }

    fn close(&self) {
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "MQTT disconnect request failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_codes_map_to_failure_codes() {
        let cases = [
            (ConnectReturnCode::BadClientId, FailureCode::InvalidClientId),
            (ConnectReturnCode::BadUserNamePassword, FailureCode::BadCredentials),
            (ConnectReturnCode::NotAuthorized, FailureCode::NotAuthorized),
            (ConnectReturnCode::ServiceUnavailable, FailureCode::BrokerUnavailable),
            (
                ConnectReturnCode::RefusedProtocolVersion,
                FailureCode::InvalidProtocolVersion,
            ),
        ];
        for (code, expected) in cases {
            let failure = failure_from(&ConnectionError::ConnectionRefused(code));
            assert_eq!(failure.failure_code(), Some(expected));
        }
    }

    #[test]
    fn network_timeout_maps_to_client_timeout() {
        let failure = failure_from(&ConnectionError::NetworkTimeout);
        assert_eq!(failure.failure_code(), Some(FailureCode::ClientTimeout));
    }

    #[test]
    fn io_errors_keep_their_description() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Connection refused");
        let failure = failure_from(&ConnectionError::Io(io));
        assert_eq!(failure.failure_code(), None);
        assert!(
            failure
                .description()
                .is_some_and(|d| d.contains("Connection refused"))
        );
    }

    #[test]
    fn options_follow_endpoint() {
        let endpoint = BrokerEndpoint::new("broker.local")
            .with_port(1884)
            .with_client_id("panel")
            .with_keep_alive(Duration::from_secs(45));
        let options = mqtt_options(&endpoint);

        assert_eq!(options.client_id(), "panel");
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(45));
    }

    #[test]
    fn short_keep_alive_is_raised() {
        let endpoint = BrokerEndpoint::new("b")
            .with_client_id("panel")
            .with_keep_alive(Duration::from_millis(10));
        assert_eq!(mqtt_options(&endpoint).keep_alive(), MIN_KEEP_ALIVE);
    }
}
