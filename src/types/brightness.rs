// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Screen brightness type.

use std::fmt;

use serde::Serialize;

use crate::error::ValueError;

/// Screen brightness on the 0-255 scale used by the panel and announced to
/// the hub as `brightness_scale`.
///
/// # Examples
///
/// ```
/// use tablethub::types::Brightness;
///
/// assert_eq!(Brightness::clamped(999).value(), 255);
/// assert_eq!(Brightness::clamped(-5).value(), 0);
/// assert!(Brightness::new(300).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Brightness(u8);

impl Brightness {
    /// Screen fully dark.
    pub const MIN: Self = Self(0);

    /// Full brightness.
    pub const MAX: Self = Self(255);

    /// Creates a brightness value.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::OutOfRange` if `value` is outside 0-255.
    pub fn new(value: i64) -> Result<Self, ValueError> {
        u8::try_from(value)
            .map(Self)
            .map_err(|_| ValueError::OutOfRange {
                min: 0,
                max: 255,
                actual: value,
            })
    }

    /// Creates a brightness value, clamping to 0-255.
    #[must_use]
    pub fn clamped(value: i64) -> Self {
        // Lossless after the clamp.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Self(value.clamp(0, 255) as u8)
    }

    /// Creates a brightness from a possibly fractional number, rounding and
    /// clamping. Non-finite input maps to [`Brightness::MIN`].
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Self::MIN;
        }
        #[allow(clippy::cast_possible_truncation)]
        Self::clamped(value.round().clamp(-1.0, 256.0) as i64)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.0
    }
}

impl From<u8> for Brightness {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for Brightness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
