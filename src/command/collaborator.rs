// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Local subsystems the gateway drives.
//!
//! The gateway never owns alarms, the screen or the media player. It talks
//! to them through these traits, implemented by the host application.

use std::sync::Arc;

use crate::types::{Alarm, Brightness};

/// The local alarm store and clock.
pub trait AlarmControl: Send + Sync {
    /// Every stored alarm.
    fn alarms(&self) -> Vec<Alarm>;

    /// Arms or disarms an alarm. Returns `false` if no alarm has this id.
    fn set_alarm_enabled(&self, id: u32, enabled: bool) -> bool;

    /// Starts ringing now.
    fn trigger_alarm(&self);

    /// Stops the ringing alarm.
    fn dismiss_alarm(&self);
}

/// The screen power and brightness control surface.
pub trait ScreenControl: Send + Sync {
    /// Turns the screen on or off.
    fn set_screen_on(&self, on: bool);

    /// Sets the brightness.
    fn set_brightness(&self, brightness: Brightness);

    /// Current brightness.
    fn brightness(&self) -> Brightness;
}

/// Night mode.
pub trait NightModeControl: Send + Sync {
    /// Forces night mode on or off.
    fn set_manual_enabled(&self, enabled: bool);
}

/// The media playback engine.
pub trait MediaControl: Send + Sync {
    /// Starts or resumes playback.
    fn play(&self);
    /// Pauses playback.
    fn pause(&self);
    /// Stops playback.
    fn stop(&self);
    /// Skips to the next track.
    fn next(&self);
    /// Goes back to the previous track.
    fn previous(&self);
    /// Toggles between playing and paused.
    fn toggle(&self);
    /// Seeks to a position in the current track.
    fn seek(&self, position_ms: u64);
    /// Current playback position.
    fn position_ms(&self) -> u64;
    /// Duration of the current track, zero if unknown.
    fn duration_ms(&self) -> u64;
}

/// The set of local subsystems commands are dispatched to.
///
/// Media control is optional; media commands are dropped without it.
#[derive(Clone)]
pub struct Collaborators {
    /// Alarm store.
    pub alarms: Arc<dyn AlarmControl>,
    /// Screen control.
    pub screen: Arc<dyn ScreenControl>,
    /// Night mode control.
    pub night_mode: Arc<dyn NightModeControl>,
    /// Media player, if any.
    pub media: Option<Arc<dyn MediaControl>>,
}

impl Collaborators {
    /// Bundles the required collaborators.
    #[must_use]
    pub fn new(
        alarms: Arc<dyn AlarmControl>,
        screen: Arc<dyn ScreenControl>,
        night_mode: Arc<dyn NightModeControl>,
    ) -> Self {
        Self {
            alarms,
            screen,
            night_mode,
            media: None,
        }
    }

    /// Adds a media player.
    #[must_use]
    pub fn with_media(mut self, media: Arc<dyn MediaControl>) -> Self {
        self.media = Some(media);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("media", &self.media.is_some())
            .finish_non_exhaustive()
    }
}
