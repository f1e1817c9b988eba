// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capability announcements for hub auto-discovery.
//!
//! The panel registers its controls with the hub by publishing one retained
//! config per capability:
//!
//! ```text
//! {discovery}/sensor/{id}/next_alarm/config
//! {discovery}/switch/{id}/screen/config
//! {discovery}/light/{id}/brightness/config
//! {discovery}/device_automation/{id}/button_{button}/config
//! {discovery}/switch/{id}/alarm_{alarm}/config
//! ...
//! ```
//!
//! Publishing an empty retained payload to the same topic retracts the
//! capability.
//!
//! # Examples
//!
//! ```
//! use tablethub::discovery::ComponentKind;
//!
//! assert_eq!(ComponentKind::BinarySensor.as_str(), "binary_sensor");
//! assert_eq!(ComponentKind::DeviceTrigger.as_str(), "device_automation");
//! ```

mod announcement;
mod publisher;

pub use announcement::{ComponentKind, DeviceBlock, EntityConfig, TriggerConfig};
pub use publisher::DiscoveryPublisher;
