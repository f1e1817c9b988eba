// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Gateway configuration types.
//!
//! Configuration can be assembled with the builder-style `with_*` methods or
//! deserialized from a JSON document:
//!
//! ```
//! use tablethub::config::GatewayConfig;
//!
//! let config = GatewayConfig::from_json_str(r#"{
//!     "broker": { "host": "192.168.1.50", "username": "panel", "password": "secret" },
//!     "device": { "id": "kitchen_panel", "name": "Kitchen Panel" },
//!     "tracked_entities": ["light.kitchen"]
//! }"#).unwrap();
//!
//! assert_eq!(config.broker.port, 1883);
//! assert_eq!(config.discovery_prefix, "homeassistant");
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, ParseError};
use crate::protocol::OutboundMessage;

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// Default prefix the hub listens on for capability announcements.
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";

/// Default prefix the hub broadcasts entity states under.
pub const DEFAULT_STATESTREAM_PREFIX: &str = "statestream";

/// Broker connection parameters.
///
/// Immutable once a connection attempt starts; changing any field requires
/// a new [`connect`](crate::protocol::ConnectionManager::connect) call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerEndpoint {
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional username.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional password, only sent together with a username.
    #[serde(default)]
    pub password: Option<String>,
    /// MQTT client identity. Filled from the device id when left empty.
    #[serde(default)]
    pub client_id: String,
    /// Whether to connect over TLS.
    #[serde(default)]
    pub use_tls: bool,
    /// Keep-alive interval.
    #[serde(default = "default_keep_alive", rename = "keep_alive_secs", deserialize_with = "secs")]
    pub keep_alive: Duration,
    /// Message the broker publishes on our behalf if the session dies.
    #[serde(skip)]
    pub last_will: Option<OutboundMessage>,
}

impl BrokerEndpoint {
    /// Creates an endpoint for `host` with default settings.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            client_id: String::new(),
            use_tls: false,
            keep_alive: default_keep_alive(),
            last_will: None,
        }
    }

    /// Sets the broker port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets the client identity.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Enables TLS.
    #[must_use]
    pub fn with_tls(mut self) -> Self {
        self.use_tls = true;
        self
    }

    /// Sets the keep-alive interval.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the last-will message.
    #[must_use]
    pub fn with_last_will(mut self, message: OutboundMessage) -> Self {
        self.last_will = Some(message);
        self
    }

    /// Returns `(username, password)` when a username is configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.username
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(|u| (u, self.password.as_deref().unwrap_or_default()))
    }

    /// Checks that a connection attempt can be made with this endpoint.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an empty host, port zero or an empty
    /// client identity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        Ok(())
    }
}

/// Identity block announced to the hub for this panel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceIdentity {
    /// Stable identifier used in every topic. Must not contain `/`, `+` or `#`.
    pub id: String,
    /// Human readable name.
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Hardware model.
    #[serde(default = "default_model")]
    pub model: String,
    /// Manufacturer.
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
    /// Software version reported to the hub.
    #[serde(default = "default_sw_version")]
    pub sw_version: String,
}

impl DeviceIdentity {
    /// Creates an identity with default name, model and manufacturer.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: default_device_name(),
            model: default_model(),
            manufacturer: default_manufacturer(),
            sw_version: default_sw_version(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the manufacturer.
    #[must_use]
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    /// Checks that the id is usable as a topic level.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidDeviceId` otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_topic_level(&self.id) {
            return Err(ConfigError::InvalidDeviceId(self.id.clone()));
        }
        Ok(())
    }
}

/// True if `id` can stand alone as one topic level.
fn is_topic_level(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '+', '#'])
}

/// A user-configured shortcut button shown on the panel.
///
/// Each button is announced to the hub as a device trigger; pressing it on
/// the panel publishes a press event the hub can automate on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShortcutButton {
    /// Identifier, unique per panel.
    pub id: String,
    /// Label shown on the panel.
    pub name: String,
}

impl ShortcutButton {
    /// Creates a shortcut button.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Checks that the id is usable as a topic level.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidButtonId` otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_topic_level(&self.id) {
            return Err(ConfigError::InvalidButtonId(self.id.clone()));
        }
        Ok(())
    }
}

/// Configuration for automatic reconnection.
///
/// The delay between attempts is fixed. Once `max_attempts` consecutive
/// attempts have failed the connection enters a terminal error state that
/// only an explicit `connect()` leaves.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tablethub::config::ReconnectionPolicy;
///
/// let policy = ReconnectionPolicy::new()
///     .with_max_attempts(5)
///     .with_delay(Duration::from_secs(2));
/// assert!(policy.enabled);
///
/// let policy = ReconnectionPolicy::disabled();
/// assert!(!policy.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectionPolicy {
    /// Whether automatic reconnection is enabled.
    pub enabled: bool,
    /// Maximum number of retries after the first failure.
    pub max_attempts: u32,
    /// Delay between attempts.
    #[serde(rename = "delay_secs", deserialize_with = "secs")]
    pub delay: Duration,
    /// Time allowed for one connection attempt.
    #[serde(rename = "connect_timeout_secs", deserialize_with = "secs")]
    pub connect_timeout: Duration,
}

impl ReconnectionPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayConfig {
    /// Broker endpoint.
    pub broker: BrokerEndpoint,
    /// Panel identity.
    pub device: DeviceIdentity,
    /// Prefix for capability announcements.
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,
    /// Prefix the hub broadcasts entity states under.
    #[serde(default = "default_statestream_prefix")]
    pub statestream_prefix: String,
    /// Hub entities to cache. Empty means every broadcast entity is cached.
    #[serde(default)]
    pub tracked_entities: Vec<String>,
    /// Shortcut buttons to announce.
    #[serde(default)]
    pub shortcut_buttons: Vec<ShortcutButton>,
    /// Reconnection behaviour.
    #[serde(default)]
    pub reconnection: ReconnectionPolicy,
}

impl GatewayConfig {
    /// Creates a configuration with default prefixes and policy.
    #[must_use]
    pub fn new(broker: BrokerEndpoint, device: DeviceIdentity) -> Self {
        Self {
            broker,
            device,
            discovery_prefix: default_discovery_prefix(),
            statestream_prefix: default_statestream_prefix(),
            tracked_entities: Vec::new(),
            shortcut_buttons: Vec::new(),
            reconnection: ReconnectionPolicy::default(),
        }
    }

    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Parse` if the document does not match the schema, or
    /// `Error::Config` if it fails [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> crate::error::Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(ParseError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the device id and every shortcut button id.
    ///
    /// The broker endpoint is not checked here; its problems surface as a
    /// terminal connection error instead.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device.validate()?;
        self.shortcut_buttons.iter().try_for_each(ShortcutButton::validate)
    }

    /// Sets the discovery prefix.
    #[must_use]
    pub fn with_discovery_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.discovery_prefix = prefix.into();
        self
    }

    /// Sets the statestream prefix.
    #[must_use]
    pub fn with_statestream_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.statestream_prefix = prefix.into();
        self
    }

    /// Adds a hub entity to cache.
    #[must_use]
    pub fn with_tracked_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.tracked_entities.push(entity_id.into());
        self
    }

    /// Adds a shortcut button.
    #[must_use]
    pub fn with_shortcut_button(mut self, button: ShortcutButton) -> Self {
        self.shortcut_buttons.push(button);
        self
    }

    /// Sets the reconnection policy.
    #[must_use]
    pub fn with_reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }

    /// Returns the broker endpoint with the client identity filled in from
    /// the device id when none was configured.
    #[must_use]
    pub fn resolved_endpoint(&self) -> BrokerEndpoint {
        let mut endpoint = self.broker.clone();
        if endpoint.client_id.trim().is_empty() {
            endpoint.client_id = format!("tablethub_{}", self.device.id);
        }
        endpoint
    }
}

fn secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(30)
}

fn default_device_name() -> String {
    "Tablet Panel".to_string()
}

fn default_model() -> String {
    "Wall Tablet".to_string()
}

fn default_manufacturer() -> String {
    "TabletHub".to_string()
}

fn default_sw_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_discovery_prefix() -> String {
    DEFAULT_DISCOVERY_PREFIX.to_string()
}

fn default_statestream_prefix() -> String {
    DEFAULT_STATESTREAM_PREFIX.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn endpoint_defaults() {
        let endpoint = BrokerEndpoint::new("broker.local");
        assert_eq!(endpoint.port, 1883);
        assert!(endpoint.credentials().is_none());
        assert!(!endpoint.use_tls);
        assert_eq!(endpoint.keep_alive, Duration::from_secs(30));
    }

    #[test]
    fn endpoint_validation() {
        let ok = BrokerEndpoint::new("broker").with_client_id("panel");
        assert!(ok.validate().is_ok());

        let empty = BrokerEndpoint::new("  ").with_client_id("panel");
        assert_eq!(empty.validate(), Err(ConfigError::EmptyHost));

        let no_id = BrokerEndpoint::new("broker");
        assert_eq!(no_id.validate(), Err(ConfigError::EmptyClientId));

        let zero_port = BrokerEndpoint::new("broker").with_client_id("x").with_port(0);
        assert_eq!(zero_port.validate(), Err(ConfigError::InvalidPort(0)));
    }

    #[test]
    fn credentials_require_username() {
        let mut endpoint = BrokerEndpoint::new("broker");
        endpoint.password = Some("secret".to_string());
        assert!(endpoint.credentials().is_none());

        let endpoint = endpoint.with_credentials("user", "pass");
        assert_eq!(endpoint.credentials(), Some(("user", "pass")));
    }

    #[test]
    fn device_id_validation() {
        assert!(DeviceIdentity::new("panel_1").validate().is_ok());
        assert!(DeviceIdentity::new("").validate().is_err());
        assert!(DeviceIdentity::new("a/b").validate().is_err());
        assert!(DeviceIdentity::new("a#").validate().is_err());
    }

    #[test]
    fn reconnection_policy_defaults() {
        let policy = ReconnectionPolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.delay, Duration::from_secs(5));
        assert_eq!(policy.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn resolved_endpoint_fills_client_id() {
        let config = GatewayConfig::new(
            BrokerEndpoint::new("broker"),
            DeviceIdentity::new("hall"),
        );
        assert_eq!(config.resolved_endpoint().client_id, "tablethub_hall");

        let config = GatewayConfig::new(
            BrokerEndpoint::new("broker").with_client_id("custom"),
            DeviceIdentity::new("hall"),
        );
        assert_eq!(config.resolved_endpoint().client_id, "custom");
    }

    #[test]
    fn config_from_json() {
        let config = GatewayConfig::from_json_str(
            r#"{
                "broker": { "host": "10.0.0.2", "port": 8883, "use_tls": true, "keep_alive_secs": 60 },
                "device": { "id": "bedroom" },
                "statestream_prefix": "ha_state",
                "shortcut_buttons": [{ "id": "movie", "name": "Movie time" }],
                "reconnection": { "max_attempts": 3, "delay_secs": 2 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.broker.port, 8883);
        assert!(config.broker.use_tls);
        assert_eq!(config.broker.keep_alive, Duration::from_secs(60));
        assert_eq!(config.device.name, "Tablet Panel");
        assert_eq!(config.statestream_prefix, "ha_state");
        assert_eq!(config.shortcut_buttons[0].name, "Movie time");
        assert_eq!(config.reconnection.max_attempts, 3);
        assert_eq!(config.reconnection.delay, Duration::from_secs(2));
        assert_eq!(config.reconnection.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn config_from_json_rejects_missing_broker() {
        let result = GatewayConfig::from_json_str(r#"{ "device": { "id": "x" } }"#);
        assert!(matches!(result, Err(Error::Parse(ParseError::Json(_)))));
    }

    #[test]
    fn button_id_validation() {
        assert!(ShortcutButton::new("movie_night", "Movie").validate().is_ok());
        for id in ["", "movie/night", "all#", "a+b"] {
            assert_eq!(
                ShortcutButton::new(id, "x").validate(),
                Err(ConfigError::InvalidButtonId(id.to_string()))
            );
        }
    }

    #[test]
    fn config_validation_covers_buttons() {
        let config = GatewayConfig::new(BrokerEndpoint::new("broker"), DeviceIdentity::new("hall"))
            .with_shortcut_button(ShortcutButton::new("movie", "Movie"))
            .with_shortcut_button(ShortcutButton::new("movie/night", "Movie night"));

        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidButtonId("movie/night".to_string()))
        );
    }

    #[test]
    fn config_from_json_rejects_unusable_button_id() {
        let result = GatewayConfig::from_json_str(
            r#"{
                "broker": { "host": "broker" },
                "device": { "id": "hall" },
                "shortcut_buttons": [{ "id": "all#", "name": "All" }]
            }"#,
        );
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::InvalidButtonId(id))) if id == "all#"
        ));
    }
}
