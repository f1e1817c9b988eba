// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fan-out primitive shared by the gateway components.
//!
//! The connection manager publishes every inbound broker message on an
//! [`EventBus`]; the entity cache and the command router each attach their
//! own receiver, so neither can hold the other up.

mod event_bus;

pub use event_bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
