// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound command parsing.
//!
//! Parsing is split in two steps: [`classify_topic`] decides from the topic
//! alone how the payload must be read, then the payload is resolved into a
//! typed [`Command`]. Dynamic JSON values never reach the dispatcher.

use serde::Deserialize;

use crate::error::ParseError;
use crate::protocol::{COMMAND_SUFFIX, LEGACY_MEDIA_SUFFIX, MEDIA_COMMAND_SEGMENT};
use crate::types::{Brightness, PowerState};

/// How an inbound topic's payload must be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTopic<'a> {
    /// Payload is a bare media command word.
    LegacyMedia,
    /// Media command word is `action`; payload is an optional argument.
    Media {
        /// Final topic level.
        action: &'a str,
    },
    /// Payload is a generic command object.
    Generic,
}

/// Classifies a topic, first match wins. `None` means the message is not a
/// command.
///
/// # Examples
///
/// ```
/// use tablethub::command::{classify_topic, CommandTopic};
///
/// assert_eq!(classify_topic("tablethub/hall/command"), Some(CommandTopic::Generic));
/// assert_eq!(
///     classify_topic("tablethub/hall/media/cmd/seek"),
///     Some(CommandTopic::Media { action: "seek" })
/// );
/// assert_eq!(classify_topic("tablethub/hall/state"), None);
/// ```
#[must_use]
pub fn classify_topic(topic: &str) -> Option<CommandTopic<'_>> {
    if topic.ends_with(LEGACY_MEDIA_SUFFIX) {
        return Some(CommandTopic::LegacyMedia);
    }
    if let Some(index) = topic.find(MEDIA_COMMAND_SEGMENT) {
        let action = &topic[index + MEDIA_COMMAND_SEGMENT.len()..];
        if !action.is_empty() && !action.contains('/') {
            return Some(CommandTopic::Media { action });
        }
        return None;
    }
    if topic.ends_with(COMMAND_SUFFIX) {
        return Some(CommandTopic::Generic);
    }
    None
}

/// A JSON value that is either a number or a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CommandValue {
    /// Numeric value.
    Number(f64),
    /// Text value.
    Text(String),
}

impl CommandValue {
    /// Reads the value from a raw topic argument: numeric if it parses as a
    /// number, text otherwise.
    fn from_argument(argument: &str) -> Option<Self> {
        let argument = argument.trim();
        if argument.is_empty() {
            return None;
        }
        Some(
            argument
                .parse::<f64>()
                .map_or_else(|_| Self::Text(argument.to_string()), Self::Number),
        )
    }

    fn as_number(&self, field: &str) -> Result<f64, ParseError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(s) => s.trim().parse().map_err(|_| ParseError::InvalidValue {
                field: field.to_string(),
                message: format!("expected a number, got {s:?}"),
            }),
        }
    }

    fn as_power(&self, field: &str) -> Result<PowerState, ParseError> {
        match self {
            Self::Number(n) => Ok(PowerState::from(*n != 0.0)),
            Self::Text(s) => s.parse().map_err(|_| ParseError::InvalidValue {
                field: field.to_string(),
                message: format!("expected ON or OFF, got {s:?}"),
            }),
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn as_u64(&self, field: &str) -> Result<u64, ParseError> {
        let n = self.as_number(field)?;
        if !n.is_finite() || n < 0.0 || n.fract() != 0.0 || n > u64::MAX as f64 {
            return Err(ParseError::InvalidValue {
                field: field.to_string(),
                message: format!("expected a non-negative integer, got {n}"),
            });
        }
        Ok(n as u64)
    }
}

/// A media transport command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCommand {
    /// Start or resume.
    Play,
    /// Pause.
    Pause,
    /// Stop.
    Stop,
    /// Next track.
    Next,
    /// Previous track.
    Previous,
    /// Play/pause toggle.
    Toggle,
    /// Seek to a position in milliseconds.
    Seek(u64),
}

impl MediaCommand {
    /// Resolves a command word, case-insensitively.
    ///
    /// Returns `Ok(None)` if the word is not a media command.
    fn from_word(word: &str, argument: Option<&CommandValue>) -> Result<Option<Self>, ParseError> {
        let command = match word.trim().to_ascii_lowercase().as_str() {
            "play" => Self::Play,
            "pause" => Self::Pause,
            "stop" => Self::Stop,
            "next" | "next_track" | "skip" => Self::Next,
            "previous" | "prev" | "previous_track" => Self::Previous,
            "toggle" | "play_pause" | "playpause" => Self::Toggle,
            "seek" => {
                let position = argument
                    .ok_or_else(|| ParseError::MissingField("value".to_string()))?
                    .as_u64("value")?;
                Self::Seek(position)
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }

    /// Parses a legacy bare command word.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::UnknownCommand` for anything else.
    pub fn parse_word(word: &str) -> Result<Self, ParseError> {
        Self::from_word(word, None)?
            .ok_or_else(|| ParseError::UnknownCommand(word.trim().to_string()))
    }

    /// Parses a structured media command: the action from the topic and an
    /// optional raw argument from the payload.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for an unknown action or a bad argument.
    pub fn parse_action(action: &str, argument: &str) -> Result<Self, ParseError> {
        let argument = CommandValue::from_argument(argument);
        Self::from_word(action, argument.as_ref())?
            .ok_or_else(|| ParseError::UnknownCommand(action.to_string()))
    }
}

/// A fully resolved inbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Screen power.
    Screen(PowerState),
    /// Screen brightness, already clamped.
    Brightness(Brightness),
    /// Manual night mode.
    NightMode(PowerState),
    /// Ring the alarm now.
    TriggerAlarm,
    /// Stop the ringing alarm.
    DismissAlarm,
    /// Arm or disarm a stored alarm.
    SetAlarmEnabled {
        /// Alarm id.
        id: u32,
        /// Target state.
        enabled: bool,
    },
    /// Media transport.
    Media(MediaCommand),
}

/// Wire shape of a generic command.
#[derive(Debug, Deserialize)]
struct GenericCommand {
    command: String,
    #[serde(default)]
    value: Option<CommandValue>,
    #[serde(default, alias = "alarmId")]
    alarm_id: Option<CommandValue>,
}

impl GenericCommand {
    fn value(&self) -> Result<&CommandValue, ParseError> {
        self.value
            .as_ref()
            .ok_or_else(|| ParseError::MissingField("value".to_string()))
    }

    fn alarm_id(&self) -> Result<u32, ParseError> {
        let id = self
            .alarm_id
            .as_ref()
            .ok_or_else(|| ParseError::MissingField("alarm_id".to_string()))?
            .as_u64("alarm_id")?;
        u32::try_from(id).map_err(|_| ParseError::InvalidValue {
            field: "alarm_id".to_string(),
            message: format!("{id} is out of range"),
        })
    }

    fn resolve(&self) -> Result<Command, ParseError> {
        let name = self.command.trim().to_ascii_lowercase();
        let command = match name.as_str() {
            "screen" => Command::Screen(self.value()?.as_power("value")?),
            "on" => Command::Screen(PowerState::On),
            "off" => Command::Screen(PowerState::Off),
            "brightness" => {
                Command::Brightness(Brightness::from_f64(self.value()?.as_number("value")?))
            }
            "night_mode" => Command::NightMode(self.value()?.as_power("value")?),
            "trigger_alarm" => Command::TriggerAlarm,
            "dismiss_alarm" => Command::DismissAlarm,
            "enable_alarm" | "disable_alarm" => Command::SetAlarmEnabled {
                id: self.alarm_id()?,
                enabled: name == "enable_alarm",
            },
            other => match MediaCommand::from_word(other, self.value.as_ref())? {
                Some(media) => Command::Media(media),
                None => return Err(ParseError::UnknownCommand(self.command.clone())),
            },
        };
        Ok(command)
    }
}

/// Parses a payload received on the generic command topic.
///
/// The payload is read as a command object first. Only if that fails is it
/// read as a bare `ON`/`OFF` screen token.
///
/// # Errors
///
/// Returns a [`ParseError`] for unknown commands, missing or invalid fields,
/// and payloads that are neither a command object nor a power token.
///
/// # Examples
///
/// ```
/// use tablethub::command::{parse_command, Command};
/// use tablethub::types::{Brightness, PowerState};
///
/// assert_eq!(
///     parse_command(r#"{"command":"brightness","value":999}"#).unwrap(),
///     Command::Brightness(Brightness::MAX)
/// );
/// assert_eq!(parse_command("ON").unwrap(), Command::Screen(PowerState::On));
/// ```
pub fn parse_command(payload: &str) -> Result<Command, ParseError> {
    match serde_json::from_str::<GenericCommand>(payload) {
        Ok(generic) => generic.resolve(),
        Err(json_error) => payload
            .trim()
            .trim_matches('"')
            .parse::<PowerState>()
            .map(Command::Screen)
            .map_err(|_| ParseError::Json(json_error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_classification_order() {
        assert_eq!(
            classify_topic("tablethub/a/media_player/set"),
            Some(CommandTopic::LegacyMedia)
        );
        assert_eq!(
            classify_topic("tablethub/a/media/cmd/play"),
            Some(CommandTopic::Media { action: "play" })
        );
        assert_eq!(classify_topic("tablethub/a/media/cmd/"), None);
        assert_eq!(classify_topic("tablethub/a/command"), Some(CommandTopic::Generic));
        assert_eq!(classify_topic("tablethub/a/event"), None);
    }

    #[test]
    fn brightness_is_clamped() {
        assert_eq!(
            parse_command(r#"{"command":"brightness","value":999}"#).unwrap(),
            Command::Brightness(Brightness::MAX)
        );
        assert_eq!(
            parse_command(r#"{"command":"brightness","value":-5}"#).unwrap(),
            Command::Brightness(Brightness::MIN)
        );
        assert_eq!(
            parse_command(r#"{"command":"brightness","value":"128"}"#).unwrap(),
            Command::Brightness(Brightness::from(128))
        );
    }

    #[test]
    fn bare_token_fallback_matches_screen_command() {
        let structured = parse_command(r#"{"command":"screen","value":"ON"}"#).unwrap();
        assert_eq!(parse_command("ON").unwrap(), structured);
        assert_eq!(parse_command(" off ").unwrap(), Command::Screen(PowerState::Off));
    }

    #[test]
    fn fallback_only_on_parse_failure() {
        // Valid JSON with an unknown command must not fall back.
        assert!(matches!(
            parse_command(r#"{"command":"reboot","value":"ON"}"#),
            Err(ParseError::UnknownCommand(c)) if c == "reboot"
        ));
        assert!(matches!(parse_command("garbage"), Err(ParseError::Json(_))));
    }

    #[test]
    fn alarm_commands_need_an_id() {
        assert_eq!(
            parse_command(r#"{"command":"enable_alarm","alarm_id":3}"#).unwrap(),
            Command::SetAlarmEnabled { id: 3, enabled: true }
        );
        assert_eq!(
            parse_command(r#"{"command":"disable_alarm","alarmId":"7"}"#).unwrap(),
            Command::SetAlarmEnabled { id: 7, enabled: false }
        );
        assert!(matches!(
            parse_command(r#"{"command":"enable_alarm"}"#),
            Err(ParseError::MissingField(_))
        ));
        assert!(matches!(
            parse_command(r#"{"command":"enable_alarm","alarm_id":1.5}"#),
            Err(ParseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn simple_commands() {
        assert_eq!(
            parse_command(r#"{"command":"dismiss_alarm"}"#).unwrap(),
            Command::DismissAlarm
        );
        assert_eq!(
            parse_command(r#"{"command":"TRIGGER_ALARM"}"#).unwrap(),
            Command::TriggerAlarm
        );
        assert_eq!(
            parse_command(r#"{"command":"night_mode","value":"ON"}"#).unwrap(),
            Command::NightMode(PowerState::On)
        );
        assert_eq!(
            parse_command(r#"{"command":"next"}"#).unwrap(),
            Command::Media(MediaCommand::Next)
        );
    }

    #[test]
    fn media_words_and_actions() {
        assert_eq!(MediaCommand::parse_word("PLAY").unwrap(), MediaCommand::Play);
        assert_eq!(MediaCommand::parse_word("prev").unwrap(), MediaCommand::Previous);
        assert!(MediaCommand::parse_word("rewind").is_err());

        assert_eq!(
            MediaCommand::parse_action("seek", "42000").unwrap(),
            MediaCommand::Seek(42_000)
        );
        assert_eq!(MediaCommand::parse_action("toggle", "").unwrap(), MediaCommand::Toggle);
        assert!(matches!(
            MediaCommand::parse_action("seek", ""),
            Err(ParseError::MissingField(_))
        ));
    }
}
