// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic layout and filter matching.
//!
//! ```text
//! {discovery}/{kind}/{id}/{object}/config   capability announcements (retained)
//! tablethub/{id}/state                      status snapshot (retained)
//! tablethub/{id}/event                      transient events
//! tablethub/{id}/availability               online/offline (retained, last will)
//! tablethub/{id}/command                    generic commands (inbound)
//! tablethub/{id}/media_player/set           legacy media commands (inbound)
//! tablethub/{id}/media/cmd/{action}         structured media commands (inbound)
//! tablethub/button/press                    shortcut button presses
//! {statestream}/#                           hub entity states (inbound)
//! ```

/// Root of every topic owned by a panel.
pub const TOPIC_ROOT: &str = "tablethub";

/// Suffix of the generic command topic.
pub const COMMAND_SUFFIX: &str = "/command";

/// Suffix of the legacy media command topic.
pub const LEGACY_MEDIA_SUFFIX: &str = "/media_player/set";

/// Path segment introducing a structured media command.
pub const MEDIA_COMMAND_SEGMENT: &str = "/media/cmd/";

/// Payload published on the availability topic while connected.
pub const PAYLOAD_ONLINE: &str = "online";

/// Payload published on the availability topic once gone.
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Every topic the gateway publishes to or subscribes on, derived from the
/// device id and the hub prefixes.
///
/// # Examples
///
/// ```
/// use tablethub::protocol::Topics;
///
/// let topics = Topics::new("kitchen", "homeassistant", "statestream");
/// assert_eq!(topics.state(), "tablethub/kitchen/state");
/// assert_eq!(
///     topics.discovery("switch", "screen"),
///     "homeassistant/switch/kitchen/screen/config"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    device_id: String,
    discovery_prefix: String,
    statestream_prefix: String,
}

impl Topics {
    /// Creates the topic set for a device.
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        discovery_prefix: impl Into<String>,
        statestream_prefix: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            discovery_prefix: trim_slashes(discovery_prefix.into()),
            statestream_prefix: trim_slashes(statestream_prefix.into()),
        }
    }

    /// The device id the topics are derived from.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The statestream prefix, without trailing slash.
    #[must_use]
    pub fn statestream_prefix(&self) -> &str {
        &self.statestream_prefix
    }

    /// `tablethub/{id}`.
    #[must_use]
    pub fn base(&self) -> String {
        format!("{TOPIC_ROOT}/{}", self.device_id)
    }

    /// Canonical status snapshot topic.
    #[must_use]
    pub fn state(&self) -> String {
        format!("{}/state", self.base())
    }

    /// Transient event topic.
    #[must_use]
    pub fn event(&self) -> String {
        format!("{}/event", self.base())
    }

    /// Availability topic.
    #[must_use]
    pub fn availability(&self) -> String {
        format!("{}/availability", self.base())
    }

    /// Generic inbound command topic.
    #[must_use]
    pub fn command(&self) -> String {
        format!("{}{COMMAND_SUFFIX}", self.base())
    }

    /// Legacy inbound media command topic.
    #[must_use]
    pub fn legacy_media(&self) -> String {
        format!("{}{LEGACY_MEDIA_SUFFIX}", self.base())
    }

    /// Filter matching every structured media command.
    #[must_use]
    pub fn media_command_filter(&self) -> String {
        format!("{}{MEDIA_COMMAND_SEGMENT}+", self.base())
    }

    /// Shortcut button press topic, shared by all panels.
    #[must_use]
    pub fn button_press(&self) -> String {
        format!("{TOPIC_ROOT}/button/press")
    }

    /// Filter matching every hub entity state broadcast.
    #[must_use]
    pub fn statestream_filter(&self) -> String {
        format!("{}/#", self.statestream_prefix)
    }

    /// Announcement topic for one capability.
    #[must_use]
    pub fn discovery(&self, component: &str, object_id: &str) -> String {
        format!(
            "{}/{component}/{}/{object_id}/config",
            self.discovery_prefix, self.device_id
        )
    }
}

fn trim_slashes(prefix: String) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.len() == prefix.len() {
        prefix
    } else {
        trimmed.to_string()
    }
}

/// Returns `true` if `topic` matches the MQTT subscription `filter`.
///
/// `+` matches exactly one level, a trailing `#` matches the parent level and
/// everything below it.
///
/// # Examples
///
/// ```
/// use tablethub::protocol::topic_matches;
///
/// assert!(topic_matches("statestream/#", "statestream/light/kitchen/state"));
/// assert!(topic_matches("a/+/c", "a/b/c"));
/// assert!(!topic_matches("a/+/c", "a/b/d"));
/// ```
#[must_use]
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_derived_from_device_id() {
        let topics = Topics::new("hall", "homeassistant/", "/statestream");
        assert_eq!(topics.state(), "tablethub/hall/state");
        assert_eq!(topics.event(), "tablethub/hall/event");
        assert_eq!(topics.command(), "tablethub/hall/command");
        assert_eq!(topics.legacy_media(), "tablethub/hall/media_player/set");
        assert_eq!(topics.media_command_filter(), "tablethub/hall/media/cmd/+");
        assert_eq!(topics.availability(), "tablethub/hall/availability");
        assert_eq!(topics.button_press(), "tablethub/button/press");
        assert_eq!(topics.statestream_filter(), "statestream/#");
        assert_eq!(
            topics.discovery("binary_sensor", "alarm_ringing"),
            "homeassistant/binary_sensor/hall/alarm_ringing/config"
        );
    }

    #[test]
    fn exact_match() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }

    #[test]
    fn single_level_wildcard() {
        assert!(topic_matches("tablethub/+/command", "tablethub/x/command"));
        assert!(!topic_matches("tablethub/+/command", "tablethub/x/y/command"));
        assert!(topic_matches("+", "a"));
        assert!(!topic_matches("+", "a/b"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(topic_matches("#", "anything/at/all"));
        assert!(topic_matches("a/#", "a"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(!topic_matches("a/#", "b/c"));
        assert!(!topic_matches("a/#/c", "a/b/c"));
    }
}
