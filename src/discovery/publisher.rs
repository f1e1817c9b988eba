// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::announcement::{ComponentKind, DeviceBlock, EntityConfig, TriggerConfig};
use crate::command::AlarmControl;
use crate::config::{DeviceIdentity, ShortcutButton};
use crate::error::ParseError;
use crate::protocol::{ConnectionManager, OutboundMessage, Topics};
use crate::types::Alarm;

/// Object ids of the capabilities every panel announces.
const FIXED_CAPABILITIES: [(ComponentKind, &str); 11] = [
    (ComponentKind::Sensor, "next_alarm"),
    (ComponentKind::Sensor, "alarm_countdown"),
    (ComponentKind::BinarySensor, "alarm_ringing"),
    (ComponentKind::Switch, "screen"),
    (ComponentKind::Light, "brightness"),
    (ComponentKind::Sensor, "battery"),
    (ComponentKind::BinarySensor, "charging"),
    (ComponentKind::Switch, "night_mode"),
    (ComponentKind::Button, "dismiss_alarm"),
    (ComponentKind::Button, "trigger_alarm"),
    (ComponentKind::DeviceTrigger, "pre_alarm"),
];

/// Announces the panel's capabilities to the hub.
///
/// Every announcement goes to
/// `{discovery}/{kind}/{device}/{object}/config`, retained. Object ids are
/// derived from the device id and the capability alone, so announcing again
/// after a reconnect overwrites the previous config instead of creating a
/// second entity.
#[derive(Clone)]
pub struct DiscoveryPublisher {
    inner: Arc<Inner>,
}

struct Inner {
    manager: ConnectionManager,
    topics: Topics,
    device: DeviceBlock,
    alarms: Arc<dyn AlarmControl>,
    buttons: RwLock<Vec<ShortcutButton>>,
    announced_alarms: Mutex<BTreeSet<u32>>,
}

impl DiscoveryPublisher {
    /// Creates a publisher for one device.
    #[must_use]
    pub fn new(
        manager: ConnectionManager,
        topics: Topics,
        identity: &DeviceIdentity,
        alarms: Arc<dyn AlarmControl>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                manager,
                topics,
                device: DeviceBlock::from(identity),
                alarms,
                buttons: RwLock::new(Vec::new()),
                announced_alarms: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    /// Replaces the configured shortcut buttons.
    ///
    /// Takes effect on the next [`publish_all`](Self::publish_all). Buttons
    /// whose id cannot be used as a topic level are skipped.
    pub fn set_shortcut_buttons(&self, buttons: impl IntoIterator<Item = ShortcutButton>) {
        *self.inner.buttons.write() = buttons
            .into_iter()
            .filter(|button| match button.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping shortcut button");
                    false
                }
            })
            .collect();
    }

    /// Announces every capability and returns how many configs were sent.
    ///
    /// Fixed capabilities go first, then one trigger per shortcut button,
    /// then one switch per stored alarm. Alarms announced earlier that no
    /// longer exist are retracted.
    ///
    /// Nothing is sent while disconnected, and the set of announced alarms
    /// is left untouched so the next connected call still retracts them.
    pub fn publish_all(&self) -> usize {
        if !self.inner.manager.is_connected() {
            tracing::debug!("Not connected, skipping capability announcements");
            return 0;
        }
        let mut published = 0;

        for (kind, object_id) in FIXED_CAPABILITIES {
            let result = match kind {
                ComponentKind::DeviceTrigger => {
                    self.publish_capability(kind, object_id, &self.pre_alarm_trigger())
                }
                _ => self.publish_capability(kind, object_id, &self.fixed_entity(object_id)),
            };
            published += usize::from(Self::settle(kind, object_id, result));
        }

        let buttons = self.inner.buttons.read().clone();
        for button in &buttons {
            let object_id = button_object_id(&button.id);
            let result = self.publish_capability(
                ComponentKind::DeviceTrigger,
                &object_id,
                &self.button_trigger(button),
            );
            published += usize::from(Self::settle(ComponentKind::DeviceTrigger, &object_id, result));
        }

        let alarms = self.inner.alarms.alarms();
        let current: BTreeSet<u32> = alarms.iter().map(|alarm| alarm.id).collect();
        for alarm in &alarms {
            let object_id = alarm_object_id(alarm.id);
            let result =
                self.publish_capability(ComponentKind::Switch, &object_id, &self.alarm_switch(alarm));
            published += usize::from(Self::settle(ComponentKind::Switch, &object_id, result));
        }

        let stale: Vec<u32> = {
            let mut announced = self.inner.announced_alarms.lock();
            let stale = announced.difference(&current).copied().collect();
            *announced = current;
            stale
        };
        for &id in &stale {
            tracing::debug!(alarm_id = id, "Retracting removed alarm");
            self.remove_capability(ComponentKind::Switch, &alarm_object_id(id));
        }
        if !stale.is_empty() && !self.inner.manager.is_connected() {
            // Lost the link mid-run; keep them pending for the next run.
            self.inner.announced_alarms.lock().extend(stale);
        }

        tracing::info!(
            device_id = %self.inner.topics.device_id(),
            count = published,
            "Published capability announcements"
        );
        published
    }

    /// Retracts every capability this publisher knows about.
    pub fn remove_all(&self) {
        for (kind, object_id) in FIXED_CAPABILITIES {
            self.remove_capability(kind, object_id);
        }
        let buttons = self.inner.buttons.read().clone();
        for button in &buttons {
            self.remove_capability(ComponentKind::DeviceTrigger, &button_object_id(&button.id));
        }
        let announced = std::mem::take(&mut *self.inner.announced_alarms.lock());
        for id in announced {
            self.remove_capability(ComponentKind::Switch, &alarm_object_id(id));
        }
        tracing::info!(device_id = %self.inner.topics.device_id(), "Retracted capability announcements");
    }

    /// Publishes one announcement, retained.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` cannot be serialized.
    pub fn publish_capability<C: Serialize>(
        &self,
        kind: ComponentKind,
        object_id: &str,
        config: &C,
    ) -> Result<(), ParseError> {
        let payload = serde_json::to_string(config)?;
        let topic = self.inner.topics.discovery(kind.as_str(), object_id);
        self.inner
            .manager
            .publish_message(OutboundMessage::retained(topic, payload));
        Ok(())
    }

    /// Retracts one announcement by clearing its retained config.
    pub fn remove_capability(&self, kind: ComponentKind, object_id: &str) {
        let topic = self.inner.topics.discovery(kind.as_str(), object_id);
        self.inner
            .manager
            .publish_message(OutboundMessage::retained(topic, String::new()));
    }

    fn settle(kind: ComponentKind, object_id: &str, result: Result<(), ParseError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    component = %kind,
                    object_id,
                    error = %e,
                    "Failed to serialize announcement"
                );
                false
            }
        }
    }

    fn unique_id(&self, object_id: &str) -> String {
        format!("{}_{object_id}", self.inner.topics.device_id())
    }

    fn entity(&self, name: impl Into<String>, object_id: &str) -> EntityConfig {
        EntityConfig {
            name: name.into(),
            unique_id: self.unique_id(object_id),
            object_id: self.unique_id(object_id),
            availability_topic: self.inner.topics.availability(),
            device: Some(self.inner.device.clone()),
            ..Default::default()
        }
    }

    fn state_entity(&self, name: &str, object_id: &str, template: &str) -> EntityConfig {
        EntityConfig {
            state_topic: Some(self.inner.topics.state()),
            value_template: Some(template.to_string()),
            ..self.entity(name, object_id)
        }
    }

    fn command_button(&self, name: &str, object_id: &str, command: &str) -> EntityConfig {
        EntityConfig {
            command_topic: Some(self.inner.topics.command()),
            payload_press: Some(format!(r#"{{"command":"{command}"}}"#)),
            ..self.entity(name, object_id)
        }
    }

    fn toggle_switch(&self, name: &str, object_id: &str, command: &str, icon: &'static str) -> EntityConfig {
        EntityConfig {
            command_topic: Some(self.inner.topics.command()),
            payload_on: Some(format!(r#"{{"command":"{command}","value":"ON"}}"#)),
            payload_off: Some(format!(r#"{{"command":"{command}","value":"OFF"}}"#)),
            state_on: Some("ON".to_string()),
            state_off: Some("OFF".to_string()),
            icon: Some(icon),
            ..self.state_entity(name, object_id, &format!("{{{{ value_json.{object_id} }}}}"))
        }
    }

    fn fixed_entity(&self, object_id: &str) -> EntityConfig {
        match object_id {
            "next_alarm" => EntityConfig {
                device_class: Some("timestamp"),
                icon: Some("mdi:alarm"),
                ..self.state_entity("Next Alarm", object_id, "{{ value_json.next_alarm }}")
            },
            "alarm_countdown" => EntityConfig {
                unit_of_measurement: Some("min"),
                icon: Some("mdi:timer-outline"),
                ..self.state_entity(
                    "Alarm Countdown",
                    object_id,
                    "{% if value_json.next_alarm %}\
                     {{ ((as_timestamp(value_json.next_alarm) - as_timestamp(now())) / 60) | round(0) }}\
                     {% else %}unknown{% endif %}",
                )
            },
            "alarm_ringing" => EntityConfig {
                payload_on: Some("ON".to_string()),
                payload_off: Some("OFF".to_string()),
                icon: Some("mdi:alarm-bell"),
                ..self.state_entity("Alarm Ringing", object_id, "{{ value_json.alarm_ringing }}")
            },
            "screen" => self.toggle_switch("Screen", object_id, "screen", "mdi:tablet"),
            "brightness" => EntityConfig {
                command_topic: Some(self.inner.topics.command()),
                state_topic: Some(self.inner.topics.state()),
                state_value_template: Some("{{ value_json.screen }}".to_string()),
                payload_on: Some(r#"{"command":"screen","value":"ON"}"#.to_string()),
                payload_off: Some(r#"{"command":"screen","value":"OFF"}"#.to_string()),
                brightness_state_topic: Some(self.inner.topics.state()),
                brightness_command_topic: Some(self.inner.topics.command()),
                brightness_value_template: Some("{{ value_json.screen_brightness }}".to_string()),
                brightness_command_template: Some(
                    r#"{"command":"brightness","value":{{ value }}}"#.to_string(),
                ),
                brightness_scale: Some(255),
                on_command_type: Some("brightness"),
                icon: Some("mdi:brightness-6"),
                ..self.entity("Screen Brightness", object_id)
            },
            "battery" => EntityConfig {
                device_class: Some("battery"),
                unit_of_measurement: Some("%"),
                ..self.state_entity("Battery", object_id, "{{ value_json.battery }}")
            },
            "charging" => EntityConfig {
                device_class: Some("battery_charging"),
                payload_on: Some("ON".to_string()),
                payload_off: Some("OFF".to_string()),
                ..self.state_entity("Charging", object_id, "{{ value_json.charging }}")
            },
            "night_mode" => {
                self.toggle_switch("Night Mode", object_id, "night_mode", "mdi:weather-night")
            }
            "dismiss_alarm" => EntityConfig {
                icon: Some("mdi:alarm-off"),
                ..self.command_button("Dismiss Alarm", object_id, "dismiss_alarm")
            },
            "trigger_alarm" => EntityConfig {
                icon: Some("mdi:alarm-plus"),
                ..self.command_button("Trigger Alarm", object_id, "trigger_alarm")
            },
            _ => self.entity(object_id, object_id),
        }
    }

    fn pre_alarm_trigger(&self) -> TriggerConfig {
        TriggerConfig {
            automation_type: "trigger",
            topic: self.inner.topics.event(),
            trigger_type: "pre_alarm".to_string(),
            subtype: "alarm".to_string(),
            payload: "pre_alarm".to_string(),
            value_template: Some("{{ value_json.event }}".to_string()),
            device: self.inner.device.clone(),
        }
    }

    fn button_trigger(&self, button: &ShortcutButton) -> TriggerConfig {
        TriggerConfig {
            automation_type: "trigger",
            topic: self.inner.topics.button_press(),
            trigger_type: "button_short_press".to_string(),
            subtype: button.id.clone(),
            payload: format!("{}:{}", self.inner.topics.device_id(), button.id),
            value_template: Some(
                "{{ value_json.device_id }}:{{ value_json.button_id }}".to_string(),
            ),
            device: self.inner.device.clone(),
        }
    }

    fn alarm_switch(&self, alarm: &Alarm) -> EntityConfig {
        let id = alarm.id;
        EntityConfig {
            command_topic: Some(self.inner.topics.command()),
            payload_on: Some(format!(r#"{{"command":"enable_alarm","alarm_id":{id}}}"#)),
            payload_off: Some(format!(r#"{{"command":"disable_alarm","alarm_id":{id}}}"#)),
            state_on: Some("ON".to_string()),
            state_off: Some("OFF".to_string()),
            icon: Some("mdi:alarm"),
            ..self.state_entity(
                &alarm.display_name(),
                &alarm_object_id(id),
                &format!(
                    "{{{{ 'ON' if value_json.alarms['{id}'] is defined \
                     and value_json.alarms['{id}'].enabled else 'OFF' }}}}"
                ),
            )
        }
    }
}

impl std::fmt::Debug for DiscoveryPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryPublisher")
            .field("device_id", &self.inner.topics.device_id())
            .field("buttons", &self.inner.buttons.read().len())
            .finish_non_exhaustive()
    }
}

fn button_object_id(button_id: &str) -> String {
    format!("button_{button_id}")
}

fn alarm_object_id(alarm_id: u32) -> String {
    format!("alarm_{alarm_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerEndpoint, ReconnectionPolicy};
    use crate::protocol::{ConnectionState, MemoryBroker};
    use crate::types::AlarmTime;

    #[derive(Default)]
    struct Alarms(Mutex<Vec<Alarm>>);

    impl Alarms {
        fn set(&self, alarms: Vec<Alarm>) {
            *self.0.lock() = alarms;
        }
    }

    impl AlarmControl for Alarms {
        fn alarms(&self) -> Vec<Alarm> {
            self.0.lock().clone()
        }

        fn set_alarm_enabled(&self, _id: u32, _enabled: bool) -> bool {
            true
        }

        fn trigger_alarm(&self) {}

        fn dismiss_alarm(&self) {}
    }

    async fn connected(alarms: Arc<Alarms>) -> (MemoryBroker, ConnectionManager, DiscoveryPublisher) {
        let broker = MemoryBroker::new();
        let manager = ConnectionManager::start(broker.clone(), ReconnectionPolicy::default());
        manager.connect(BrokerEndpoint::new("memory").with_client_id("panel"));
        manager
            .watch_state()
            .wait_for(ConnectionState::is_connected)
            .await
            .unwrap();
        let publisher = DiscoveryPublisher::new(
            manager.clone(),
            Topics::new("hall", "homeassistant", "statestream"),
            &DeviceIdentity::new("hall").with_name("Hall Panel"),
            alarms,
        );
        (broker, manager, publisher)
    }

    async fn flush(manager: &ConnectionManager) {
        manager.disconnect();
        manager
            .watch_state()
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
    }

    fn alarm(id: u32) -> Alarm {
        Alarm::new(id, AlarmTime::new(7, 0).unwrap(), "Wake")
    }

    #[tokio::test]
    async fn fixed_capabilities_are_retained() {
        let (broker, manager, publisher) = connected(Arc::default()).await;

        let count = publisher.publish_all();
        flush(&manager).await;

        assert_eq!(count, FIXED_CAPABILITIES.len());
        let configs = broker.retained_topics("homeassistant/#");
        assert_eq!(configs.len(), FIXED_CAPABILITIES.len());
        assert!(configs.contains(&"homeassistant/switch/hall/screen/config".to_string()));
        assert!(configs.contains(&"homeassistant/device_automation/hall/pre_alarm/config".to_string()));
        assert!(broker.published().iter().all(|m| m.retained));
    }

    #[tokio::test]
    async fn announcements_carry_device_and_availability() {
        let (broker, manager, publisher) = connected(Arc::default()).await;

        publisher.publish_all();
        flush(&manager).await;

        let screen = broker.retained("homeassistant/switch/hall/screen/config").unwrap();
        let json: serde_json::Value = serde_json::from_str(&screen).unwrap();
        assert_eq!(json["unique_id"], "hall_screen");
        assert_eq!(json["command_topic"], "tablethub/hall/command");
        assert_eq!(json["payload_on"], r#"{"command":"screen","value":"ON"}"#);
        assert_eq!(json["availability_topic"], "tablethub/hall/availability");
        assert_eq!(json["device"]["identifiers"][0], "tablethub_hall");
        assert_eq!(json["device"]["name"], "Hall Panel");

        let light = broker.retained("homeassistant/light/hall/brightness/config").unwrap();
        let json: serde_json::Value = serde_json::from_str(&light).unwrap();
        assert_eq!(json["brightness_scale"], 255);
        assert_eq!(json["on_command_type"], "brightness");
    }

    #[tokio::test]
    async fn publish_all_is_idempotent() {
        let (broker, manager, publisher) = connected(Arc::default()).await;

        publisher.publish_all();
        publisher.publish_all();
        flush(&manager).await;

        let topics: Vec<String> = broker.published().into_iter().map(|m| m.topic).collect();
        let (first, second) = topics.split_at(topics.len() / 2);
        assert_eq!(first, second);
        assert_eq!(broker.retained_topics("homeassistant/#").len(), FIXED_CAPABILITIES.len());
    }

    #[tokio::test]
    async fn shortcut_buttons_become_triggers() {
        let (broker, manager, publisher) = connected(Arc::default()).await;
        publisher.set_shortcut_buttons([ShortcutButton::new("movie", "Movie Time")]);

        publisher.publish_all();
        flush(&manager).await;

        let config = broker
            .retained("homeassistant/device_automation/hall/button_movie/config")
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&config).unwrap();
        assert_eq!(json["automation_type"], "trigger");
        assert_eq!(json["topic"], "tablethub/button/press");
        assert_eq!(json["type"], "button_short_press");
        assert_eq!(json["subtype"], "movie");
        assert_eq!(json["payload"], "hall:movie");
    }

    #[tokio::test]
    async fn removed_alarms_are_retracted() {
        let alarms = Arc::new(Alarms::default());
        alarms.set(vec![alarm(1), alarm(2)]);
        let (broker, manager, publisher) = connected(Arc::clone(&alarms)).await;

        publisher.publish_all();
        alarms.set(vec![alarm(2)]);
        publisher.publish_all();
        flush(&manager).await;

        assert!(broker.retained("homeassistant/switch/hall/alarm_1/config").is_none());
        let config = broker.retained("homeassistant/switch/hall/alarm_2/config").unwrap();
        assert!(config.contains(r#"{\"command\":\"enable_alarm\",\"alarm_id\":2}"#));
    }

    #[tokio::test]
    async fn remove_all_clears_every_config() {
        let alarms = Arc::new(Alarms::default());
        alarms.set(vec![alarm(3)]);
        let (broker, manager, publisher) = connected(alarms).await;
        publisher.set_shortcut_buttons([ShortcutButton::new("night", "Night")]);

        publisher.publish_all();
        publisher.remove_all();
        flush(&manager).await;

        assert!(broker.retained_topics("homeassistant/#").is_empty());
    }

    #[tokio::test]
    async fn nothing_is_sent_while_disconnected() {
        let broker = MemoryBroker::new();
        let manager = ConnectionManager::start(broker.clone(), ReconnectionPolicy::default());
        let publisher = DiscoveryPublisher::new(
            manager,
            Topics::new("hall", "homeassistant", "statestream"),
            &DeviceIdentity::new("hall"),
            Arc::new(Alarms::default()),
        );

        assert_eq!(publisher.publish_all(), 0);

        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn alarm_removed_while_offline_is_retracted_after_reconnect() {
        let alarms = Arc::new(Alarms::default());
        alarms.set(vec![alarm(1), alarm(2)]);
        let (broker, manager, publisher) = connected(Arc::clone(&alarms)).await;
        publisher.publish_all();
        flush(&manager).await;
        assert!(broker.retained("homeassistant/switch/hall/alarm_1/config").is_some());

        alarms.set(vec![alarm(2)]);
        assert_eq!(publisher.publish_all(), 0);

        manager.connect(BrokerEndpoint::new("memory").with_client_id("panel"));
        manager
            .watch_state()
            .wait_for(ConnectionState::is_connected)
            .await
            .unwrap();
        publisher.publish_all();
        flush(&manager).await;

        assert!(broker.retained("homeassistant/switch/hall/alarm_1/config").is_none());
        assert!(broker.retained("homeassistant/switch/hall/alarm_2/config").is_some());
    }

    #[tokio::test]
    async fn unusable_button_ids_are_never_announced() {
        let (broker, manager, publisher) = connected(Arc::default()).await;
        publisher.set_shortcut_buttons([
            ShortcutButton::new("movie/night", "Movie"),
            ShortcutButton::new("all#", "All"),
            ShortcutButton::new("+", "Plus"),
            ShortcutButton::new("", "Empty"),
            ShortcutButton::new("reading", "Reading"),
        ]);

        let count = publisher.publish_all();
        flush(&manager).await;

        assert_eq!(count, FIXED_CAPABILITIES.len() + 1);
        for message in broker.published() {
            assert_eq!(message.topic.split('/').count(), 5, "{}", message.topic);
            assert!(!message.topic.contains(['#', '+']), "{}", message.topic);
        }
        assert!(broker
            .retained("homeassistant/device_automation/hall/button_reading/config")
            .is_some());
    }
}
