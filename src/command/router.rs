// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::collaborator::Collaborators;
use super::parse::{Command, CommandTopic, MediaCommand, classify_topic, parse_command};
use crate::error::ParseError;
use crate::protocol::{ConnectionManager, InboundMessage, QoS, Topics};
use crate::state::StatePublisher;

/// Turns inbound command messages into collaborator calls.
///
/// Malformed and unknown commands are logged and dropped. After a command
/// runs, the affected snapshot field is updated right away so the hub sees
/// the change without waiting for the collaborator to report back.
#[derive(Clone)]
pub struct CommandRouter {
    inner: Arc<Inner>,
}

struct Inner {
    topics: Topics,
    collaborators: Collaborators,
    publisher: StatePublisher,
}

impl CommandRouter {
    /// Creates a router for the device described by `topics`.
    #[must_use]
    pub fn new(topics: Topics, collaborators: Collaborators, publisher: StatePublisher) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics,
                collaborators,
                publisher,
            }),
        }
    }

    /// Subscribes to the command topics and spawns the listener.
    pub fn start(&self, manager: &ConnectionManager) -> JoinHandle<()> {
        let mut rx = manager.messages();
        let topics = &self.inner.topics;
        manager.subscribe(topics.command(), QoS::AtLeastOnce);
        manager.subscribe(topics.legacy_media(), QoS::AtLeastOnce);
        manager.subscribe(topics.media_command_filter(), QoS::AtLeastOnce);

        let router = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        router.dispatch(&message);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Command router lagged, commands lost");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Command router stopped");
        })
    }

    /// Handles one inbound message. Returns `true` if a command ran.
    pub(crate) fn dispatch(&self, message: &InboundMessage) -> bool {
        let owned = message
            .topic
            .strip_prefix(&self.inner.topics.base())
            .is_some_and(|rest| rest.starts_with('/'));
        if !owned {
            return false;
        }
        let Some(kind) = classify_topic(&message.topic) else {
            return false;
        };

        let parsed = match kind {
            CommandTopic::LegacyMedia => {
                MediaCommand::parse_word(&message.payload).map(Command::Media)
            }
            CommandTopic::Media { action } => {
                MediaCommand::parse_action(action, &message.payload).map(Command::Media)
            }
            CommandTopic::Generic => parse_command(&message.payload),
        };

        match parsed {
            Ok(command) => {
                tracing::debug!(topic = %message.topic, ?command, "Executing command");
                self.execute(command);
                true
            }
            Err(ParseError::UnknownCommand(name)) => {
                tracing::debug!(topic = %message.topic, command = %name, "Ignoring unknown command");
                false
            }
            Err(e) => {
                tracing::warn!(
                    topic = %message.topic,
                    payload = %message.payload,
                    error = %e,
                    "Dropping malformed command"
                );
                false
            }
        }
    }

    fn execute(&self, command: Command) {
        let Inner {
            collaborators,
            publisher,
            ..
        } = &*self.inner;

        match command {
            Command::Screen(state) => {
                collaborators.screen.set_screen_on(state.is_on());
                publisher.update_screen_state(state.is_on(), collaborators.screen.brightness());
            }
            Command::Brightness(brightness) => {
                collaborators.screen.set_brightness(brightness);
                publisher.update_screen_state(brightness.value() > 0, brightness);
            }
            Command::NightMode(state) => {
                collaborators.night_mode.set_manual_enabled(state.is_on());
                publisher.update_night_mode_state(state.is_on());
            }
            Command::TriggerAlarm => {
                collaborators.alarms.trigger_alarm();
                publisher.update_alarm_ringing(true);
            }
            Command::DismissAlarm => {
                collaborators.alarms.dismiss_alarm();
                publisher.update_alarm_ringing(false);
            }
            Command::SetAlarmEnabled { id, enabled } => {
                if collaborators.alarms.set_alarm_enabled(id, enabled) {
                    publisher.update_alarms(&collaborators.alarms.alarms());
                } else {
                    tracing::warn!(alarm_id = id, "No alarm with this id");
                }
            }
            Command::Media(media) => self.execute_media(media),
        }
    }

    fn execute_media(&self, command: MediaCommand) {
        let Some(media) = &self.inner.collaborators.media else {
            tracing::debug!(?command, "No media player, dropping media command");
            return;
        };

        match command {
            MediaCommand::Play => media.play(),
            MediaCommand::Pause => media.pause(),
            MediaCommand::Stop => media.stop(),
            MediaCommand::Next => media.next(),
            MediaCommand::Previous => media.previous(),
            MediaCommand::Toggle => media.toggle(),
            MediaCommand::Seek(position) => {
                let duration = media.duration_ms();
                let target = if duration > 0 {
                    position.min(duration)
                } else {
                    position
                };
                media.seek(target);
            }
        }
    }
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRouter")
            .field("command_topic", &self.inner.topics.command())
            .finish_non_exhaustive()
    }
}
