// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Alarm types exposed by the local alarm store.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::ValueError;

/// Time of day an alarm rings at, minute resolution.
///
/// # Examples
///
/// ```
/// use tablethub::types::AlarmTime;
///
/// let t = AlarmTime::new(7, 5).unwrap();
/// assert_eq!(t.to_string(), "07:05");
/// assert!(AlarmTime::new(24, 0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlarmTime {
    hour: u8,
    minute: u8,
}

impl AlarmTime {
    /// Creates an alarm time.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidTime` if hour > 23 or minute > 59.
    pub fn new(hour: u8, minute: u8) -> Result<Self, ValueError> {
        if hour > 23 || minute > 59 {
            return Err(ValueError::InvalidTime { hour, minute });
        }
        Ok(Self { hour, minute })
    }

    /// Hour of day (0-23).
    #[must_use]
    pub const fn hour(&self) -> u8 {
        self.hour
    }

    /// Minute of hour (0-59).
    #[must_use]
    pub const fn minute(&self) -> u8 {
        self.minute
    }
}

impl fmt::Display for AlarmTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for AlarmTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Weekdays an alarm repeats on, one bit per day starting with Monday.
///
/// An empty mask means a one-shot alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DayMask(u8);

const DAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

impl DayMask {
    /// No repeat.
    pub const NONE: Self = Self(0);
    /// Monday to Friday.
    pub const WEEKDAYS: Self = Self(0b001_1111);
    /// Every day.
    pub const EVERY_DAY: Self = Self(0b111_1111);

    /// Creates a mask from raw bits; bits above Sunday are discarded.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b111_1111)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Returns `true` if the alarm repeats on the given day (0 = Monday).
    #[must_use]
    pub const fn contains(&self, day: u8) -> bool {
        day < 7 && self.0 & (1 << day) != 0
    }

    /// Short lowercase names of the selected days, Monday first.
    pub fn day_names(&self) -> impl Iterator<Item = &'static str> + use<> {
        let mask = *self;
        (0..7u8)
            .filter(move |day| mask.contains(*day))
            .map(|day| DAY_NAMES[usize::from(day)])
    }
}

impl fmt::Display for DayMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.day_names().collect();
        write!(f, "{}", names.join(","))
    }
}

impl Serialize for DayMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An alarm as stored by the local alarm clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alarm {
    /// Store-assigned identifier.
    pub id: u32,
    /// Ring time.
    pub time: AlarmTime,
    /// User label, may be empty.
    pub label: String,
    /// Whether the alarm is armed.
    pub enabled: bool,
    /// Repeat days.
    pub days: DayMask,
}

impl Alarm {
    /// Creates an enabled one-shot alarm.
    #[must_use]
    pub fn new(id: u32, time: AlarmTime, label: impl Into<String>) -> Self {
        Self {
            id,
            time,
            label: label.into(),
            enabled: true,
            days: DayMask::NONE,
        }
    }

    /// Sets the repeat days.
    #[must_use]
    pub fn with_days(mut self, days: DayMask) -> Self {
        self.days = days;
        self
    }

    /// Sets whether the alarm is armed.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Display name used for the alarm's hub entity.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.label.is_empty() {
            format!("Alarm {}", self.time)
        } else {
            format!("Alarm {} ({})", self.time, self.label)
        }
    }
}
