// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cache of hub entity states.
//!
//! The hub broadcasts every entity state change on
//! `{statestream}/{domain}/{object}/state`. The [`EntityStateCache`] listens
//! on that namespace and answers point queries such as "is the kitchen light
//! on?" without a round trip to the hub.
//!
//! # Examples
//!
//! ```
//! use tablethub::entity::EntityStateCache;
//! use tablethub::protocol::InboundMessage;
//!
//! let cache = EntityStateCache::new("statestream");
//! cache.apply_message(&InboundMessage::new(
//!     "statestream/light/kitchen/state",
//!     r#"{"state":"on"}"#,
//! ));
//!
//! assert!(cache.is_on("light.kitchen"));
//! ```

mod cache;

pub use cache::{EntityStateCache, TrackedEntity, is_off_state, is_on_state};
