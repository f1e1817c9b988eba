// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use super::snapshot::{DeviceStatusSnapshot, MediaStatus};
use crate::protocol::{ConnectionManager, OutboundMessage, Topics};
use crate::types::{Alarm, AlarmTime, Brightness, PowerState};

/// Owns the canonical [`DeviceStatusSnapshot`] and publishes it.
///
/// Clones share the same snapshot. Mutators serialize through one lock, so
/// snapshot publishes leave in mutation order.
#[derive(Clone)]
pub struct StatePublisher {
    inner: Arc<Inner>,
}

struct Inner {
    manager: ConnectionManager,
    topics: Topics,
    snapshot: Mutex<DeviceStatusSnapshot>,
    changes: watch::Sender<DeviceStatusSnapshot>,
}

#[derive(Serialize)]
struct PreAlarmEvent<'a> {
    event: &'static str,
    alarm_id: u32,
    time: AlarmTime,
    label: &'a str,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct ButtonPress<'a> {
    device_id: &'a str,
    button_id: &'a str,
}

impl StatePublisher {
    /// Creates a publisher with an all-default snapshot.
    #[must_use]
    pub fn new(manager: ConnectionManager, topics: Topics) -> Self {
        let (changes, _) = watch::channel(DeviceStatusSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                manager,
                topics,
                snapshot: Mutex::new(DeviceStatusSnapshot::default()),
                changes,
            }),
        }
    }

    /// Returns a copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> DeviceStatusSnapshot {
        self.inner.snapshot.lock().clone()
    }

    /// Returns a receiver that sees the current snapshot and every change.
    #[must_use]
    pub fn watch_snapshot(&self) -> watch::Receiver<DeviceStatusSnapshot> {
        self.inner.changes.subscribe()
    }

    /// Publishes the current snapshot, retained.
    pub fn publish_snapshot(&self) {
        let snapshot = self.inner.snapshot.lock();
        self.publish_locked(&snapshot);
    }

    /// Sets the next alarm time.
    pub fn update_next_alarm(&self, next_alarm: Option<DateTime<Utc>>) {
        self.update(|s| s.next_alarm = next_alarm);
    }

    /// Sets whether an alarm is ringing.
    pub fn update_alarm_ringing(&self, ringing: bool) {
        self.update(|s| s.alarm_ringing = PowerState::from(ringing));
    }

    /// Sets screen power and brightness.
    pub fn update_screen_state(&self, on: bool, brightness: Brightness) {
        self.update(|s| {
            s.screen = PowerState::from(on);
            s.screen_brightness = brightness;
        });
    }

    /// Sets battery level (clamped to 100) and charging state.
    pub fn update_battery(&self, level: u8, charging: bool) {
        self.update(|s| {
            s.battery = Some(level.min(100));
            s.charging = PowerState::from(charging);
        });
    }

    /// Replaces the per-alarm map.
    pub fn update_alarms(&self, alarms: &[Alarm]) {
        self.update(|s| s.set_alarms(alarms));
    }

    /// Sets night mode.
    pub fn update_night_mode_state(&self, enabled: bool) {
        self.update(|s| s.night_mode = PowerState::from(enabled));
    }

    /// Sets or clears the media block.
    pub fn update_media(&self, media: Option<MediaStatus>) {
        self.update(|s| s.media = media);
    }

    /// Publishes a transient pre-alarm event on the event topic.
    ///
    /// Never retained.
    pub fn publish_pre_alarm_event(&self, alarm: &Alarm) {
        let event = PreAlarmEvent {
            event: "pre_alarm",
            alarm_id: alarm.id,
            time: alarm.time,
            label: &alarm.label,
            timestamp: Utc::now(),
        };
        self.publish_transient(self.inner.topics.event(), &event);
    }

    /// Publishes a transient shortcut button press.
    pub fn publish_button_press(&self, button_id: &str) {
        let press = ButtonPress {
            device_id: self.inner.topics.device_id(),
            button_id,
        };
        self.publish_transient(self.inner.topics.button_press(), &press);
    }

    fn update(&self, apply: impl FnOnce(&mut DeviceStatusSnapshot)) {
        let mut snapshot = self.inner.snapshot.lock();
        apply(&mut snapshot);
        self.publish_locked(&snapshot);
    }

    fn publish_locked(&self, snapshot: &DeviceStatusSnapshot) {
        self.inner.changes.send_replace(snapshot.clone());
        match snapshot.to_json() {
            Ok(payload) => self
                .inner
                .manager
                .publish_message(OutboundMessage::retained(self.inner.topics.state(), payload)),
            Err(e) => tracing::error!(error = %e, "Failed to serialize status snapshot"),
        }
    }

    fn publish_transient<T: Serialize>(&self, topic: String, event: &T) {
        match serde_json::to_string(event) {
            Ok(payload) => self
                .inner
                .manager
                .publish_message(OutboundMessage::transient(topic, payload)),
            Err(e) => tracing::error!(topic = %topic, error = %e, "Failed to serialize event"),
        }
    }
}

impl std::fmt::Debug for StatePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePublisher")
            .field("topic", &self.inner.topics.state())
            .finish_non_exhaustive()
    }
}
