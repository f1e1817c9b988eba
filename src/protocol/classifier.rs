// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Classification of broker connection failures.
//!
//! Transports report failures as a [`ConnectFailure`]: a structured
//! [`FailureCode`] when the protocol gave one, and/or the raw description of
//! the underlying error. [`classify`] turns that into the single message shown
//! to the user and the verdict that decides whether reconnection continues.

use std::fmt;

/// Protocol-level failure codes a transport can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCode {
    /// The broker rejected the client identity.
    InvalidClientId,
    /// The broker rejected the username or password.
    BadCredentials,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// The broker is up but refuses service.
    BrokerUnavailable,
    /// The broker does not speak the requested protocol version.
    InvalidProtocolVersion,
    /// No answer from the broker in time.
    ClientTimeout,
    /// Plain socket used against a TLS port or vice versa.
    SocketFactoryMismatch,
    /// TLS could not be configured locally.
    SslConfiguration,
    /// An established session dropped.
    ConnectionLost,
    /// The broker returned an unexpected connect response.
    ServerConnectError,
}

impl FailureCode {
    /// Fixed user-facing message for this code.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::InvalidClientId => "Invalid client ID",
            Self::BadCredentials => "Authentication failed - check username and password",
            Self::NotAuthorized => "Not authorized to connect",
            Self::BrokerUnavailable => "Broker unavailable",
            Self::InvalidProtocolVersion => "Broker does not support this protocol version",
            Self::ClientTimeout => "Connection timed out waiting for the broker",
            Self::SocketFactoryMismatch => "Socket type mismatch - check the TLS setting",
            Self::SslConfiguration => "TLS configuration error",
            Self::ConnectionLost => "Connection lost",
            Self::ServerConnectError => "Broker refused the connection",
        }
    }

    /// Whether retrying can succeed without the user changing configuration.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidClientId | Self::BadCredentials | Self::NotAuthorized
        )
    }
}

/// A failed connection attempt or a lost session, as reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectFailure {
    code: Option<FailureCode>,
    description: Option<String>,
}

impl ConnectFailure {
    /// Failure with a structured code.
    #[must_use]
    pub fn code(code: FailureCode) -> Self {
        Self {
            code: Some(code),
            description: None,
        }
    }

    /// Failure known only by its description.
    #[must_use]
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            code: None,
            description: Some(description.into()),
        }
    }

    /// Failure with neither code nor description.
    #[must_use]
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Attaches the raw description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The structured code, if any.
    #[must_use]
    pub fn failure_code(&self) -> Option<FailureCode> {
        self.code
    }

    /// The raw description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.description.as_deref()) {
            (Some(code), Some(desc)) => write!(f, "{code:?}: {desc}"),
            (Some(code), None) => write!(f, "{code:?}"),
            (None, Some(desc)) => f.write_str(desc),
            (None, None) => f.write_str("unknown failure"),
        }
    }
}

impl std::error::Error for ConnectFailure {}

/// Outcome of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// The only failure detail shown to the user.
    pub message: String,
    /// `false` stops the reconnection policy immediately.
    pub recoverable: bool,
}

/// Substring rules for failures that carry no code, checked in order against
/// the lowercased description.
const TRANSPORT_RULES: &[(&[&str], &str)] = &[
    (
        &[
            "unknownhost",
            "failed to lookup address",
            "name or service not known",
            "nodename nor servname",
            "no such host",
            "name resolution",
        ],
        "Cannot resolve broker host - check the address",
    ),
    (
        &["connection refused", "econnrefused"],
        "Connection refused - check host and port",
    ),
    (&["timed out", "timeout"], "Connection timed out"),
    (
        &["handshake", "certificate", "tls", "ssl"],
        "TLS handshake failed - check the TLS setting and certificates",
    ),
];

/// Maps a connection failure to a user-facing message and a recoverability
/// verdict.
///
/// Only invalid-identity, bad-credentials and not-authorized failures are
/// non-recoverable; everything else, unknown failures included, is retried.
///
/// # Examples
///
/// ```
/// use tablethub::protocol::{classify, ConnectFailure, FailureCode};
///
/// let auth = classify(&ConnectFailure::code(FailureCode::BadCredentials));
/// assert!(!auth.recoverable);
///
/// let dns = classify(&ConnectFailure::described("failed to lookup address information"));
/// assert!(dns.recoverable);
/// assert!(dns.message.starts_with("Cannot resolve"));
///
/// assert_eq!(classify(&ConnectFailure::unknown()).message, "Unknown error");
/// ```
#[must_use]
pub fn classify(failure: &ConnectFailure) -> Classified {
    if let Some(code) = failure.code {
        return Classified {
            message: code.message().to_string(),
            recoverable: code.is_recoverable(),
        };
    }

    let Some(description) = failure.description.as_deref().filter(|d| !d.trim().is_empty())
    else {
        return Classified {
            message: "Unknown error".to_string(),
            recoverable: true,
        };
    };

    let lowered = description.to_lowercase();
    let message = TRANSPORT_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lowered.contains(n)))
        .map_or_else(|| description.to_string(), |(_, msg)| (*msg).to_string());

    Classified {
        message,
        recoverable: true,
    }
}
