// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `tablethub` gateway.
//!
//! Connection-level failures never show up here as hard errors: they are
//! classified (see [`crate::protocol::classify`]) and surfaced through the
//! observable [`ConnectionState`](crate::protocol::ConnectionState). The types
//! below cover configuration, value validation and message parsing, which are
//! either rejected up front or logged and dropped by the gateway.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred during value validation.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// Error occurred while talking to the broker.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing a message.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The gateway configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors related to value validation and constraints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A numeric value is outside the allowed range.
    #[error("value {actual} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Minimum allowed value.
        min: i64,
        /// Maximum allowed value.
        max: i64,
        /// The actual value that was provided.
        actual: i64,
    },

    /// An invalid power state string was provided.
    #[error("invalid power state: {0}")]
    InvalidPowerState(String),

    /// An invalid alarm time was provided.
    #[error("invalid alarm time {hour:02}:{minute:02}")]
    InvalidTime {
        /// Hour of day.
        hour: u8,
        /// Minute of hour.
        minute: u8,
    },
}

/// Errors raised by a live broker link.
///
/// These are logged by the connection manager and never change the
/// connection state on their own.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The MQTT client rejected the request.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// The session the request was issued on is gone.
    #[error("session closed")]
    SessionClosed,
}

/// Errors related to parsing inbound messages.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the message.
    #[error("missing field in message: {0}")]
    MissingField(String),

    /// Failed to parse a specific value.
    #[error("failed to parse {field}: {message}")]
    InvalidValue {
        /// The field that failed to parse.
        field: String,
        /// Description of the parsing failure.
        message: String,
    },

    /// The command name is not one the router understands.
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

/// Errors related to gateway configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The broker host is empty.
    #[error("broker host is required")]
    EmptyHost,

    /// The device identifier is empty or contains topic separators.
    #[error("invalid device id: {0:?}")]
    InvalidDeviceId(String),

    /// A shortcut button identifier is empty or contains topic separators.
    #[error("invalid shortcut button id: {0:?}")]
    InvalidButtonId(String),

    /// The client identity is empty.
    #[error("client id is required")]
    EmptyClientId,

    /// The broker port is zero.
    #[error("invalid broker port: {0}")]
    InvalidPort(u16),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_error_display() {
        let err = ValueError::OutOfRange {
            min: 0,
            max: 255,
            actual: 300,
        };
        assert_eq!(err.to_string(), "value 300 is out of range [0, 255]");
    }

    #[test]
    fn invalid_time_display_is_zero_padded() {
        let err = ValueError::InvalidTime { hour: 7, minute: 5 };
        assert_eq!(err.to_string(), "invalid alarm time 07:05");
    }

    #[test]
    fn error_from_config_error() {
        let err: Error = ConfigError::EmptyHost.into();
        assert!(matches!(err, Error::Config(ConfigError::EmptyHost)));
    }

    #[test]
    fn parse_error_display() {
        let err = ParseError::UnknownCommand("reboot".to_string());
        assert_eq!(err.to_string(), "unknown command: reboot");
    }
}
