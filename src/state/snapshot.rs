// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ParseError;
use crate::types::{Alarm, AlarmTime, Brightness, DayMask, PowerState};

/// Publishable status of one alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmStatus {
    /// Whether the alarm is armed.
    pub enabled: bool,
    /// Ring time, `HH:MM`.
    pub time: AlarmTime,
    /// User label.
    pub label: String,
    /// Repeat days, e.g. `mon,tue`. Empty for one-shot alarms.
    pub days: DayMask,
}

impl From<&Alarm> for AlarmStatus {
    fn from(alarm: &Alarm) -> Self {
        Self {
            enabled: alarm.enabled,
            time: alarm.time,
            label: alarm.label.clone(),
            days: alarm.days,
        }
    }
}

/// Playback state of the media player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaState {
    /// Nothing loaded.
    #[default]
    Idle,
    /// Playing.
    Playing,
    /// Paused.
    Paused,
    /// Stopped with a track loaded.
    Stopped,
}

/// Publishable media player status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MediaStatus {
    /// Playback state.
    pub state: MediaState,
    /// Current track title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Current track artist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Playback position in milliseconds.
    pub position_ms: u64,
    /// Track duration in milliseconds.
    pub duration_ms: u64,
}

/// Aggregate device status, published whole on every change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DeviceStatusSnapshot {
    /// Next time an alarm rings, if any is armed.
    pub next_alarm: Option<DateTime<Utc>>,
    /// Whether an alarm is ringing right now.
    pub alarm_ringing: PowerState,
    /// Screen power.
    pub screen: PowerState,
    /// Screen brightness, 0-255.
    pub screen_brightness: Brightness,
    /// Battery level in percent, once known.
    pub battery: Option<u8>,
    /// Whether the panel is charging.
    pub charging: PowerState,
    /// Night mode.
    pub night_mode: PowerState,
    /// Every stored alarm by id.
    pub alarms: BTreeMap<u32, AlarmStatus>,
    /// Media player status, once a player reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaStatus>,
}

impl DeviceStatusSnapshot {
    /// Replaces the alarm map from the alarm store's list.
    pub fn set_alarms(&mut self, alarms: &[Alarm]) {
        self.alarms = alarms.iter().map(|a| (a.id, AlarmStatus::from(a))).collect();
    }

    /// Serializes the snapshot. Equal snapshots serialize to identical bytes.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Json` if serialization fails.
    pub fn to_json(&self) -> Result<String, ParseError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn alarm(id: u32, hour: u8, label: &str) -> Alarm {
        Alarm::new(id, AlarmTime::new(hour, 0).unwrap(), label)
    }

    #[test]
    fn default_snapshot_json() {
        let json = DeviceStatusSnapshot::default().to_json().unwrap();
        assert_eq!(
            json,
            r#"{"next_alarm":null,"alarm_ringing":"OFF","screen":"OFF","screen_brightness":0,"battery":null,"charging":"OFF","night_mode":"OFF","alarms":{}}"#
        );
    }

    #[test]
    fn alarms_are_keyed_by_id_in_order() {
        let mut snapshot = DeviceStatusSnapshot::default();
        snapshot.set_alarms(&[
            alarm(7, 9, "Late").with_days(DayMask::from_bits(0b110_0000)),
            alarm(2, 6, "Work").with_days(DayMask::WEEKDAYS),
        ]);

        let json = snapshot.to_json().unwrap();
        assert!(json.contains(
            r#""alarms":{"2":{"enabled":true,"time":"06:00","label":"Work","days":"mon,tue,wed,thu,fri"},"7":{"enabled":true,"time":"09:00","label":"Late","days":"sat,sun"}}"#
        ));
    }

    #[test]
    fn next_alarm_is_rfc3339() {
        let snapshot = DeviceStatusSnapshot {
            next_alarm: Some(Utc.with_ymd_and_hms(2026, 3, 2, 6, 30, 0).unwrap()),
            ..Default::default()
        };
        assert!(
            snapshot
                .to_json()
                .unwrap()
                .contains(r#""next_alarm":"2026-03-02T06:30:00Z""#)
        );
    }

    #[test]
    fn media_block_only_when_present() {
        let mut snapshot = DeviceStatusSnapshot::default();
        assert!(!snapshot.to_json().unwrap().contains("media"));

        snapshot.media = Some(MediaStatus {
            state: MediaState::Playing,
            title: Some("Song".to_string()),
            artist: None,
            position_ms: 1_000,
            duration_ms: 180_000,
        });
        assert!(snapshot.to_json().unwrap().contains(
            r#""media":{"state":"playing","title":"Song","position_ms":1000,"duration_ms":180000}"#
        ));
    }

    #[test]
    fn serialization_is_deterministic() {
        let mut snapshot = DeviceStatusSnapshot::default();
        snapshot.set_alarms(&[alarm(3, 7, ""), alarm(1, 8, "a"), alarm(2, 5, "b")]);
        assert_eq!(snapshot.to_json().unwrap(), snapshot.clone().to_json().unwrap());
    }
}
