// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types shared by the gateway components.
//!
//! - [`PowerState`] - `ON`/`OFF` tokens for switches and binary sensors
//! - [`Brightness`] - Screen brightness on the 0-255 scale
//! - [`Alarm`], [`AlarmTime`], [`DayMask`] - Alarm store records

mod alarm;
mod brightness;
mod power;

pub use alarm::{Alarm, AlarmTime, DayMask};
pub use brightness::Brightness;
pub use power::PowerState;
