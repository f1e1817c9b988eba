// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound command handling.
//!
//! # Command topics
//!
//! | Topic | Payload | Example |
//! |-------|---------|---------|
//! | `tablethub/{id}/command` | command object, or bare `ON`/`OFF` | `{"command":"brightness","value":128}` |
//! | `tablethub/{id}/media_player/set` | bare media word | `pause` |
//! | `tablethub/{id}/media/cmd/{action}` | optional argument | `seek` ← `42000` |
//!
//! # Generic commands
//!
//! | Command | Value | Effect |
//! |---------|-------|--------|
//! | `screen`, `ON`, `OFF` | `ON`/`OFF` | screen power |
//! | `brightness` | 0-255, clamped | screen brightness |
//! | `night_mode` | `ON`/`OFF` | manual night mode |
//! | `trigger_alarm`, `dismiss_alarm` | - | ring / stop the alarm |
//! | `enable_alarm`, `disable_alarm` | `alarm_id` | arm / disarm one alarm |
//! | `play`, `pause`, `stop`, `next`, `previous`, `toggle`, `seek` | seek: ms | media transport |
//!
//! Side effects go to the host's [`Collaborators`].

mod collaborator;
mod parse;
mod router;

pub use collaborator::{
    AlarmControl, Collaborators, MediaControl, NightModeControl, ScreenControl,
};
pub use parse::{Command, CommandTopic, CommandValue, MediaCommand, classify_topic, parse_command};
pub use router::CommandRouter;
