// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device status publication.
//!
//! The [`DeviceStatusSnapshot`] is the whole publishable status of the panel.
//! The [`StatePublisher`] holds the single canonical snapshot; every mutator
//! changes one field and republishes the full snapshot as one retained
//! message on `tablethub/{id}/state`.
//!
//! # Examples
//!
//! ```
//! use tablethub::state::DeviceStatusSnapshot;
//! use tablethub::types::PowerState;
//!
//! let mut snapshot = DeviceStatusSnapshot::default();
//! snapshot.night_mode = PowerState::On;
//!
//! let json = snapshot.to_json().unwrap();
//! assert!(json.contains(r#""night_mode":"ON""#));
//! ```

mod publisher;
mod snapshot;

pub use publisher::StatePublisher;
pub use snapshot::{AlarmStatus, DeviceStatusSnapshot, MediaState, MediaStatus};
