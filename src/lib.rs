// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `TabletHub` - An MQTT gateway between a wall-mounted tablet panel and a
//! home-automation hub.
//!
//! The gateway keeps one broker session alive and bridges four flows over it:
//!
//! - **Connection**: connect, classify failures, reconnect with a capped
//!   retry policy and replay subscriptions ([`protocol::ConnectionManager`])
//! - **Discovery**: announce the panel's capabilities as hub entities
//!   ([`discovery::DiscoveryPublisher`])
//! - **State**: publish the whole device status on every change
//!   ([`state::StatePublisher`])
//! - **Commands**: turn hub messages into calls on local subsystems
//!   ([`command::CommandRouter`]), and cache hub entity states
//!   ([`entity::EntityStateCache`])
//!
//! [`Gateway`] wires all of them together.
//!
//! # Quick Start
//!
//! ```no_run
//! use tablethub::command::Collaborators;
//! use tablethub::config::GatewayConfig;
//! use tablethub::protocol::MqttTransport;
//! use tablethub::Gateway;
//!
//! # fn host() -> Collaborators { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> tablethub::Result<()> {
//!     let config = GatewayConfig::from_json_str(r#"{
//!         "broker": { "host": "192.168.1.50", "username": "panel", "password": "secret" },
//!         "device": { "id": "kitchen_panel", "name": "Kitchen Panel" }
//!     }"#)?;
//!
//!     let gateway = Gateway::start(config, MqttTransport::new(), host())?;
//!
//!     // Local state changes go through the publisher.
//!     gateway.publisher().update_battery(87, false);
//!     gateway.publisher().update_alarm_ringing(true);
//!
//!     // Hub entity states are cached as they arrive.
//!     if gateway.entities().is_on("light.kitchen") {
//!         println!("kitchen light is on");
//!     }
//!
//!     gateway.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Connection State
//!
//! Connection failures are never returned as errors. They are classified and
//! exposed through [`ConnectionState`]:
//!
//! ```no_run
//! # async fn example(gateway: &tablethub::Gateway) {
//! use tablethub::ConnectionState;
//!
//! let mut states = gateway.manager().watch_state();
//! while states.changed().await.is_ok() {
//!     match &*states.borrow() {
//!         ConnectionState::Error { message, recoverable: false } => {
//!             eprintln!("reconfigure required: {message}");
//!         }
//!         ConnectionState::Reconnecting { attempt, max_attempts } => {
//!             println!("retrying ({attempt}/{max_attempts})");
//!         }
//!         state => println!("{state:?}"),
//!     }
//! }
//! # }
//! ```

pub mod command;
pub mod config;
pub mod discovery;
pub mod entity;
pub mod error;
pub mod event;
mod gateway;
pub mod protocol;
pub mod state;
pub mod types;

pub use command::{Collaborators, Command, CommandRouter};
pub use config::{BrokerEndpoint, DeviceIdentity, GatewayConfig, ReconnectionPolicy, ShortcutButton};
pub use discovery::{ComponentKind, DiscoveryPublisher};
pub use entity::{EntityStateCache, TrackedEntity};
pub use error::{ConfigError, Error, ParseError, ProtocolError, Result, ValueError};
pub use gateway::Gateway;
#[cfg(feature = "mqtt")]
pub use protocol::MqttTransport;
pub use protocol::{
    ConnectFailure, ConnectionManager, ConnectionState, FailureCode, MemoryBroker, Topics,
    Transport,
};
pub use state::{DeviceStatusSnapshot, StatePublisher};
pub use types::{Alarm, AlarmTime, Brightness, DayMask, PowerState};
