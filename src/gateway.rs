// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wiring of every gateway component behind one handle.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::command::{AlarmControl, Collaborators, CommandRouter};
use crate::config::GatewayConfig;
use crate::discovery::DiscoveryPublisher;
use crate::entity::EntityStateCache;
use crate::error::Result;
use crate::protocol::{
    ConnectionManager, ConnectionState, OutboundMessage, PAYLOAD_OFFLINE, PAYLOAD_ONLINE, Topics,
    Transport,
};
use crate::state::StatePublisher;

/// A running gateway.
///
/// On every transition into [`ConnectionState::Connected`] the gateway marks
/// the panel online, announces its capabilities and publishes the current
/// status snapshot, in that order.
///
/// # Examples
///
/// ```
/// # use std::sync::Arc;
/// # use tablethub::command::{AlarmControl, Collaborators, NightModeControl, ScreenControl};
/// # use tablethub::types::{Alarm, Brightness};
/// # struct Host;
/// # impl AlarmControl for Host {
/// #     fn alarms(&self) -> Vec<Alarm> { Vec::new() }
/// #     fn set_alarm_enabled(&self, _: u32, _: bool) -> bool { true }
/// #     fn trigger_alarm(&self) {}
/// #     fn dismiss_alarm(&self) {}
/// # }
/// # impl ScreenControl for Host {
/// #     fn set_screen_on(&self, _: bool) {}
/// #     fn set_brightness(&self, _: Brightness) {}
/// #     fn brightness(&self) -> Brightness { Brightness::MAX }
/// # }
/// # impl NightModeControl for Host {
/// #     fn set_manual_enabled(&self, _: bool) {}
/// # }
/// use tablethub::config::{BrokerEndpoint, DeviceIdentity, GatewayConfig};
/// use tablethub::protocol::{ConnectionState, MemoryBroker};
/// use tablethub::Gateway;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> tablethub::Result<()> {
/// let host = Arc::new(Host);
/// let collaborators = Collaborators::new(host.clone(), host.clone(), host);
/// let config = GatewayConfig::new(BrokerEndpoint::new("memory"), DeviceIdentity::new("hall"));
///
/// let gateway = Gateway::start(config, MemoryBroker::new(), collaborators)?;
/// gateway
///     .manager()
///     .watch_state()
///     .wait_for(ConnectionState::is_connected)
///     .await
///     .unwrap();
///
/// gateway.publisher().update_battery(80, true);
/// gateway.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Gateway {
    manager: ConnectionManager,
    topics: Topics,
    entities: EntityStateCache,
    publisher: StatePublisher,
    discovery: DiscoveryPublisher,
    alarms: Arc<dyn AlarmControl>,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Wires every component and starts connecting.
    ///
    /// Must be called within a Tokio runtime. Endpoint problems (such as an
    /// empty host) are not errors here: they surface as a terminal
    /// [`ConnectionState::Error`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the device id or a shortcut button id cannot
    /// be used in topics.
    pub fn start<T: Transport>(
        config: GatewayConfig,
        transport: T,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;

        let topics = Topics::new(
            config.device.id.clone(),
            config.discovery_prefix.clone(),
            config.statestream_prefix.clone(),
        );
        let endpoint = config
            .resolved_endpoint()
            .with_last_will(OutboundMessage::retained(topics.availability(), PAYLOAD_OFFLINE));

        let manager = ConnectionManager::start(transport, config.reconnection);
        let entities =
            EntityStateCache::with_tracked(topics.statestream_prefix(), config.tracked_entities);
        let publisher = StatePublisher::new(manager.clone(), topics.clone());
        let discovery = DiscoveryPublisher::new(
            manager.clone(),
            topics.clone(),
            &config.device,
            Arc::clone(&collaborators.alarms),
        );
        discovery.set_shortcut_buttons(config.shortcut_buttons);
        let alarms = Arc::clone(&collaborators.alarms);
        let router = CommandRouter::new(topics.clone(), collaborators, publisher.clone());

        let mut gateway = Self {
            manager,
            topics,
            entities,
            publisher,
            discovery,
            alarms,
            tasks: Vec::with_capacity(3),
        };
        gateway.tasks.push(gateway.entities.start(&gateway.manager));
        gateway.tasks.push(router.start(&gateway.manager));
        gateway.tasks.push(gateway.spawn_connection_watcher());

        tracing::info!(device_id = %gateway.topics.device_id(), "Gateway started");
        gateway.manager.connect(endpoint);
        Ok(gateway)
    }

    /// Marks the panel offline, disconnects and stops every background task.
    ///
    /// Capability announcements stay retained on the broker.
    pub async fn stop(self) {
        self.manager.publish_message(OutboundMessage::retained(
            self.topics.availability(),
            PAYLOAD_OFFLINE,
        ));
        self.manager.stop();
        let _ = self
            .manager
            .watch_state()
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await;
        for task in &self.tasks {
            task.abort();
        }
        tracing::info!(device_id = %self.topics.device_id(), "Gateway stopped");
    }

    /// Re-reads the alarm store, re-announces alarm capabilities and
    /// republishes the snapshot.
    ///
    /// Call after alarms are added, removed or edited locally.
    pub fn alarms_changed(&self) {
        let alarms = self.alarms.alarms();
        self.publisher.update_alarms(&alarms);
        self.discovery.publish_all();
    }

    /// The connection manager.
    #[must_use]
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// The topic layout in use.
    #[must_use]
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// The hub entity cache.
    #[must_use]
    pub fn entities(&self) -> &EntityStateCache {
        &self.entities
    }

    /// The status publisher.
    #[must_use]
    pub fn publisher(&self) -> &StatePublisher {
        &self.publisher
    }

    /// The capability announcer.
    #[must_use]
    pub fn discovery(&self) -> &DiscoveryPublisher {
        &self.discovery
    }

    fn spawn_connection_watcher(&self) -> JoinHandle<()> {
        let mut states = self.manager.watch_state();
        let announcer = Announcer {
            manager: self.manager.clone(),
            topics: self.topics.clone(),
            publisher: self.publisher.clone(),
            discovery: self.discovery.clone(),
            alarms: Arc::clone(&self.alarms),
        };

        tokio::spawn(async move {
            let mut was_connected = states.borrow_and_update().is_connected();
            loop {
                if states.changed().await.is_err() {
                    break;
                }
                let connected = states.borrow_and_update().is_connected();
                if connected && !was_connected {
                    announcer.announce();
                }
                was_connected = connected;
            }
        })
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("device_id", &self.topics.device_id())
            .field("state", &self.manager.state())
            .finish_non_exhaustive()
    }
}

/// What the watcher needs to bring a fresh session up to date.
struct Announcer {
    manager: ConnectionManager,
    topics: Topics,
    publisher: StatePublisher,
    discovery: DiscoveryPublisher,
    alarms: Arc<dyn AlarmControl>,
}

impl Announcer {
    fn announce(&self) {
        tracing::debug!(device_id = %self.topics.device_id(), "Session up, announcing");
        self.manager.publish_message(OutboundMessage::retained(
            self.topics.availability(),
            PAYLOAD_ONLINE,
        ));
        self.discovery.publish_all();
        // Refreshing the alarm map republishes the whole snapshot.
        self.publisher.update_alarms(&self.alarms.alarms());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{NightModeControl, ScreenControl};
    use crate::config::{BrokerEndpoint, DeviceIdentity, ReconnectionPolicy, ShortcutButton};
    use crate::error::{ConfigError, Error};
    use crate::protocol::MemoryBroker;
    use crate::types::{Alarm, AlarmTime, Brightness};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Host {
        alarms: Mutex<Vec<Alarm>>,
    }

    impl AlarmControl for Host {
        fn alarms(&self) -> Vec<Alarm> {
            self.alarms.lock().clone()
        }

        fn set_alarm_enabled(&self, _id: u32, _enabled: bool) -> bool {
            true
        }

        fn trigger_alarm(&self) {}

        fn dismiss_alarm(&self) {}
    }

    impl ScreenControl for Host {
        fn set_screen_on(&self, _on: bool) {}

        fn set_brightness(&self, _brightness: Brightness) {}

        fn brightness(&self) -> Brightness {
            Brightness::MAX
        }
    }

    impl NightModeControl for Host {
        fn set_manual_enabled(&self, _enabled: bool) {}
    }

    fn collaborators(host: &Arc<Host>) -> Collaborators {
        Collaborators::new(host.clone(), host.clone(), host.clone())
    }

    fn config() -> GatewayConfig {
        GatewayConfig::new(BrokerEndpoint::new("memory"), DeviceIdentity::new("hall"))
            .with_reconnection(ReconnectionPolicy::new().with_delay(Duration::from_millis(10)))
    }

    async fn wait_connected(gateway: &Gateway) {
        gateway
            .manager()
            .watch_state()
            .wait_for(ConnectionState::is_connected)
            .await
            .unwrap();
    }

    #[test]
    fn rejects_unusable_device_id() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let config = GatewayConfig::new(BrokerEndpoint::new("memory"), DeviceIdentity::new("a/b"));

        let result = Gateway::start(config, MemoryBroker::new(), collaborators(&Arc::default()));

        assert!(matches!(result, Err(Error::Config(ConfigError::InvalidDeviceId(_)))));
    }

    #[test]
    fn rejects_unusable_button_id() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let config = config().with_shortcut_button(ShortcutButton::new("movie/night", "Movie"));

        let result = Gateway::start(config, MemoryBroker::new(), collaborators(&Arc::default()));

        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::InvalidButtonId(id))) if id == "movie/night"
        ));
    }

    #[tokio::test]
    async fn connects_with_last_will_and_announces() {
        let broker = MemoryBroker::new();
        let gateway = Gateway::start(config(), broker.clone(), collaborators(&Arc::default())).unwrap();
        wait_connected(&gateway).await;

        let mut state = broker.observe("tablethub/hall/state");
        let snapshot = state.recv().await.unwrap();
        assert!(snapshot.payload.contains(r#""alarm_ringing":"OFF""#));
        assert_eq!(broker.retained("tablethub/hall/availability").as_deref(), Some("online"));
        assert!(broker.retained_topics("homeassistant/#").len() >= 9);
        assert!(broker.is_client_connected("tablethub_hall"));

        broker.drop_connections();
        assert_eq!(broker.retained("tablethub/hall/availability").as_deref(), Some("offline"));
    }

    #[tokio::test]
    async fn stop_marks_offline() {
        let broker = MemoryBroker::new();
        let gateway = Gateway::start(config(), broker.clone(), collaborators(&Arc::default())).unwrap();
        wait_connected(&gateway).await;
        let mut availability = broker.observe("tablethub/hall/availability");
        while availability.recv().await.unwrap().payload != "online" {}

        gateway.stop().await;

        assert_eq!(broker.retained("tablethub/hall/availability").as_deref(), Some("offline"));
        assert!(!broker.is_client_connected("tablethub_hall"));
        assert!(broker.retained("homeassistant/switch/hall/screen/config").is_some());
    }

    #[tokio::test]
    async fn reannounces_after_reconnect() {
        let broker = MemoryBroker::new();
        let gateway = Gateway::start(config(), broker.clone(), collaborators(&Arc::default())).unwrap();
        wait_connected(&gateway).await;
        let mut availability = broker.observe("tablethub/hall/availability");
        assert_eq!(availability.recv().await.unwrap().payload, "online");

        broker.drop_connections();
        assert_eq!(availability.recv().await.unwrap().payload, "offline");
        assert_eq!(availability.recv().await.unwrap().payload, "online");
    }

    #[tokio::test]
    async fn alarms_changed_announces_new_alarm() {
        let broker = MemoryBroker::new();
        let host = Arc::new(Host::default());
        let gateway = Gateway::start(config(), broker.clone(), collaborators(&host)).unwrap();
        wait_connected(&gateway).await;
        let mut configs = broker.observe("homeassistant/switch/hall/alarm_5/config");

        host.alarms
            .lock()
            .push(Alarm::new(5, AlarmTime::new(6, 45).unwrap(), "Gym"));
        gateway.alarms_changed();

        let announced = configs.recv().await.unwrap();
        assert!(announced.payload.contains(r#""name":"Alarm 06:45 (Gym)""#));
        assert!(gateway.publisher().snapshot().alarms.contains_key(&5));
    }
}
