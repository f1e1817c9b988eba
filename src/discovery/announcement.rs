// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability announcement payloads.
//!
//! Field names follow the hub's MQTT discovery schema.

use serde::Serialize;

use crate::config::DeviceIdentity;

/// Hub component a capability is announced as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Two-state actuator.
    Switch,
    /// Read-only value.
    Sensor,
    /// Read-only on/off value.
    BinarySensor,
    /// Dimmable light.
    Light,
    /// Stateless push button.
    Button,
    /// Automation trigger.
    DeviceTrigger,
}

impl ComponentKind {
    /// The component segment of the announcement topic.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Switch => "switch",
            Self::Sensor => "sensor",
            Self::BinarySensor => "binary_sensor",
            Self::Light => "light",
            Self::Button => "button",
            Self::DeviceTrigger => "device_automation",
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device block attached to every announcement so the hub groups all
/// capabilities under one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceBlock {
    /// Stable identifiers.
    pub identifiers: Vec<String>,
    /// Display name.
    pub name: String,
    /// Model.
    pub model: String,
    /// Manufacturer.
    pub manufacturer: String,
    /// Software version.
    pub sw_version: String,
}

impl From<&DeviceIdentity> for DeviceBlock {
    fn from(identity: &DeviceIdentity) -> Self {
        Self {
            identifiers: vec![format!("tablethub_{}", identity.id)],
            name: identity.name.clone(),
            model: identity.model.clone(),
            manufacturer: identity.manufacturer.clone(),
            sw_version: identity.sw_version.clone(),
        }
    }
}

/// Announcement of a stateful entity (switch, sensor, binary sensor, light,
/// button).
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntityConfig {
    /// Display name.
    pub name: String,
    /// Hub-wide unique id, `{device}_{object}`.
    pub unique_id: String,
    /// Suggested entity id suffix.
    pub object_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_value_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_off: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_press: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness_state_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness_command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness_value_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness_command_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness_scale: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_command_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'static str>,
    /// Online/offline topic.
    pub availability_topic: String,
    /// Owning device.
    pub device: Option<DeviceBlock>,
}

/// Announcement of an automation trigger.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerConfig {
    /// Always `trigger`.
    pub automation_type: &'static str,
    /// Topic the trigger fires on.
    pub topic: String,
    /// Trigger type shown in the hub.
    #[serde(rename = "type")]
    pub trigger_type: String,
    /// Trigger subtype shown in the hub.
    pub subtype: String,
    /// Payload (after `value_template`) that fires the trigger.
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<String>,
    /// Owning device.
    pub device: DeviceBlock,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_trigger_uses_automation_component() {
        assert_eq!(ComponentKind::DeviceTrigger.as_str(), "device_automation");
        assert_eq!(ComponentKind::BinarySensor.to_string(), "binary_sensor");
    }

    #[test]
    fn unset_fields_are_omitted() {
        let config = EntityConfig {
            name: "Battery".to_string(),
            unique_id: "hall_battery".to_string(),
            object_id: "hall_battery".to_string(),
            availability_topic: "tablethub/hall/availability".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(
            json,
            r#"{"name":"Battery","unique_id":"hall_battery","object_id":"hall_battery","availability_topic":"tablethub/hall/availability","device":null}"#
        );
    }

    #[test]
    fn device_block_from_identity() {
        let identity = DeviceIdentity::new("hall").with_name("Hall Panel");
        let block = DeviceBlock::from(&identity);
        assert_eq!(block.identifiers, vec!["tablethub_hall"]);
        assert_eq!(block.name, "Hall Panel");
    }
}
