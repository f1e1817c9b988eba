// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::event::EventBus;
use crate::protocol::{ConnectionManager, InboundMessage, QoS};

const ON_STATES: &[&str] = &["on", "true", "home", "open", "playing", "unlocked"];
const OFF_STATES: &[&str] = &["off", "false", "away", "closed", "paused", "locked", "unavailable"];

/// Returns `true` if `state` reads as "on", ignoring case.
#[must_use]
pub fn is_on_state(state: &str) -> bool {
    ON_STATES.iter().any(|s| state.eq_ignore_ascii_case(s))
}

/// Returns `true` if `state` reads as "off", ignoring case.
#[must_use]
pub fn is_off_state(state: &str) -> bool {
    OFF_STATES.iter().any(|s| state.eq_ignore_ascii_case(s))
}

/// Last known state of a hub entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntity {
    /// Domain-qualified id, e.g. `light.kitchen`.
    pub entity_id: String,
    /// State token as broadcast by the hub.
    pub state: String,
    /// When the state was recorded locally.
    pub updated_at: DateTime<Utc>,
}

/// Shapes a statestream payload can take.
#[derive(Deserialize)]
#[serde(untagged)]
enum StatePayload {
    Token(String),
    Object { state: String },
}

/// Hub entity state cache.
///
/// Clones share the same cache. Only tracked entities are cached, except
/// while nothing is tracked: then every broadcast entity is accepted.
#[derive(Clone)]
pub struct EntityStateCache {
    inner: Arc<Inner>,
}

struct Inner {
    prefix: String,
    tracked: RwLock<HashSet<String>>,
    states: RwLock<HashMap<String, TrackedEntity>>,
    updates: EventBus<TrackedEntity>,
}

impl EntityStateCache {
    /// Creates an empty cache for the given statestream prefix.
    #[must_use]
    pub fn new(statestream_prefix: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                prefix: statestream_prefix.into().trim_matches('/').to_string(),
                tracked: RwLock::new(HashSet::new()),
                states: RwLock::new(HashMap::new()),
                updates: EventBus::new(),
            }),
        }
    }

    /// Creates a cache tracking the given entities.
    #[must_use]
    pub fn with_tracked<I, S>(statestream_prefix: impl Into<String>, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cache = Self::new(statestream_prefix);
        cache
            .inner
            .tracked
            .write()
            .extend(entities.into_iter().map(Into::into));
        cache
    }

    /// Subscribes to the statestream namespace and spawns the listener.
    ///
    /// The subscription is kept by the connection manager and replayed on
    /// every reconnection.
    pub fn start(&self, manager: &ConnectionManager) -> JoinHandle<()> {
        let filter = format!("{}/#", self.inner.prefix);
        let mut rx = manager.messages();
        manager.subscribe(filter.as_str(), QoS::AtLeastOnce);

        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        cache.apply_message(&message);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Entity cache lagged behind inbound messages");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!(topic = %filter, "Entity cache listener stopped");
        })
    }

    /// Starts caching `entity_id`.
    pub fn track_entity(&self, entity_id: impl Into<String>) {
        let entity_id = entity_id.into();
        tracing::debug!(entity = %entity_id, "Tracking entity");
        self.inner.tracked.write().insert(entity_id);
    }

    /// Stops caching `entity_id` and forgets its state.
    pub fn untrack_entity(&self, entity_id: &str) {
        tracing::debug!(entity = %entity_id, "Untracking entity");
        self.inner.tracked.write().remove(entity_id);
        self.inner.states.write().remove(entity_id);
    }

    /// Returns the tracked entity ids.
    #[must_use]
    pub fn tracked_entities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.tracked.read().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the last known state of `entity_id`.
    #[must_use]
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.inner
            .states
            .read()
            .get(entity_id)
            .map(|e| e.state.clone())
    }

    /// Returns the cached record of `entity_id`.
    #[must_use]
    pub fn entity(&self, entity_id: &str) -> Option<TrackedEntity> {
        self.inner.states.read().get(entity_id).cloned()
    }

    /// Returns `true` if the entity's last known state reads as "on".
    #[must_use]
    pub fn is_on(&self, entity_id: &str) -> bool {
        self.get_state(entity_id).is_some_and(|s| is_on_state(&s))
    }

    /// Returns `true` if the entity's last known state reads as "off".
    #[must_use]
    pub fn is_off(&self, entity_id: &str) -> bool {
        self.get_state(entity_id).is_some_and(|s| is_off_state(&s))
    }

    /// Records a state locally ahead of the hub's confirmation.
    ///
    /// The next broadcast for the entity overwrites it.
    pub fn set_state_optimistic(&self, entity_id: impl Into<String>, state: impl Into<String>) {
        self.record(entity_id.into(), state.into());
    }

    /// Attaches a receiver to cache updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TrackedEntity> {
        self.inner.updates.subscribe()
    }

    /// Applies one inbound message.
    ///
    /// Returns `true` if the message updated the cache. Messages outside the
    /// statestream namespace, attribute topics and untracked entities are
    /// ignored.
    pub fn apply_message(&self, message: &InboundMessage) -> bool {
        let Some(entity_id) = entity_id_from_topic(&self.inner.prefix, &message.topic) else {
            return false;
        };

        {
            let tracked = self.inner.tracked.read();
            if !tracked.is_empty() && !tracked.contains(&entity_id) {
                tracing::trace!(entity = %entity_id, "Ignoring untracked entity");
                return false;
            }
        }

        let state = parse_state(&message.payload);
        tracing::debug!(entity = %entity_id, state = %state, "Entity state updated");
        self.record(entity_id, state);
        true
    }

    fn record(&self, entity_id: String, state: String) {
        let entity = TrackedEntity {
            entity_id: entity_id.clone(),
            state,
            updated_at: Utc::now(),
        };
        self.inner.states.write().insert(entity_id, entity.clone());
        self.inner.updates.publish(entity);
    }
}

impl std::fmt::Debug for EntityStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStateCache")
            .field("prefix", &self.inner.prefix)
            .field("tracked", &self.inner.tracked.read().len())
            .field("cached", &self.inner.states.read().len())
            .finish()
    }
}

/// `{prefix}/{domain}/{object}/state` → `domain.object`.
fn entity_id_from_topic(prefix: &str, topic: &str) -> Option<String> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let mut levels = rest.split('/');
    match (levels.next(), levels.next(), levels.next(), levels.next()) {
        (Some(domain), Some(object), Some("state"), None)
            if !domain.is_empty() && !object.is_empty() =>
        {
            Some(format!("{domain}.{object}"))
        }
        _ => None,
    }
}

fn parse_state(payload: &str) -> String {
    match serde_json::from_str::<StatePayload>(payload) {
        Ok(StatePayload::Token(state) | StatePayload::Object { state }) => state,
        Err(_) => payload.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, payload: &str) -> InboundMessage {
        InboundMessage::new(topic, payload)
    }

    #[test]
    fn vocabularies_are_case_insensitive() {
        for state in ["on", "TRUE", "Home", "open", "playing", "unlocked"] {
            assert!(is_on_state(state), "{state}");
            assert!(!is_off_state(state), "{state}");
        }
        for state in ["OFF", "false", "away", "Closed", "paused", "locked", "unavailable"] {
            assert!(is_off_state(state), "{state}");
            assert!(!is_on_state(state), "{state}");
        }
        assert!(!is_on_state("heat"));
        assert!(!is_off_state("heat"));
    }

    #[test]
    fn topic_parsing() {
        assert_eq!(
            entity_id_from_topic("statestream", "statestream/light/kitchen/state").as_deref(),
            Some("light.kitchen")
        );
        assert!(entity_id_from_topic("statestream", "statestream/light/kitchen/brightness").is_none());
        assert!(entity_id_from_topic("statestream", "statestream/light/state").is_none());
        assert!(entity_id_from_topic("statestream", "other/light/kitchen/state").is_none());
        assert!(entity_id_from_topic("statestream", "statestreamx/light/kitchen/state").is_none());
    }

    #[test]
    fn payload_shapes() {
        assert_eq!(parse_state(r#""on""#), "on");
        assert_eq!(parse_state(r#"{"state":"off","brightness":10}"#), "off");
        assert_eq!(parse_state("  playing \n"), "playing");
        assert_eq!(parse_state(r#"{"state":42}"#), r#"{"state":42}"#);
        assert_eq!(parse_state("21.5"), "21.5");
    }

    #[test]
    fn empty_tracked_set_accepts_everything() {
        let cache = EntityStateCache::new("statestream");

        assert!(cache.apply_message(&message("statestream/light/kitchen/state", r#"{"state":"on"}"#)));
        assert!(cache.is_on("light.kitchen"));

        assert!(cache.apply_message(&message("statestream/lock/front/state", "locked")));
        assert!(cache.is_off("lock.front"));
    }

    #[test]
    fn tracked_set_filters_entities() {
        let cache = EntityStateCache::with_tracked("statestream", ["light.kitchen"]);

        assert!(!cache.apply_message(&message("statestream/light/hall/state", "on")));
        assert!(cache.get_state("light.hall").is_none());

        assert!(cache.apply_message(&message("statestream/light/kitchen/state", "off")));
        assert_eq!(cache.get_state("light.kitchen").as_deref(), Some("off"));
    }

    #[test]
    fn untrack_forgets_state() {
        let cache = EntityStateCache::new("statestream");
        cache.track_entity("switch.fan");
        cache.track_entity("light.kitchen");
        cache.apply_message(&message("statestream/switch/fan/state", "on"));

        cache.untrack_entity("switch.fan");
        assert!(cache.get_state("switch.fan").is_none());
        assert_eq!(cache.tracked_entities(), vec!["light.kitchen"]);
    }

    #[test]
    fn optimistic_state_is_overwritten_by_broadcast() {
        let cache = EntityStateCache::new("statestream");
        cache.set_state_optimistic("light.kitchen", "on");
        assert!(cache.is_on("light.kitchen"));

        cache.apply_message(&message("statestream/light/kitchen/state", "off"));
        assert!(cache.is_off("light.kitchen"));
    }

    #[test]
    fn unknown_state_is_neither_on_nor_off() {
        let cache = EntityStateCache::new("statestream");
        cache.apply_message(&message("statestream/climate/living/state", "heat"));
        assert!(!cache.is_on("climate.living"));
        assert!(!cache.is_off("climate.living"));
        assert!(!cache.is_on("climate.unknown"));
    }

    #[tokio::test]
    async fn updates_are_broadcast() {
        let cache = EntityStateCache::new("statestream");
        let mut rx = cache.subscribe();

        cache.apply_message(&message("statestream/cover/garage/state", "open"));

        let update = rx.recv().await.unwrap();
        assert_eq!(update.entity_id, "cover.garage");
        assert_eq!(update.state, "open");
    }

    #[tokio::test]
    async fn listens_on_connection_manager() {
        use crate::config::{BrokerEndpoint, ReconnectionPolicy};
        use crate::protocol::MemoryBroker;

        let broker = MemoryBroker::new();
        broker.inject_retained("statestream/light/kitchen/state", r#""on""#);
        let manager = ConnectionManager::start(broker.clone(), ReconnectionPolicy::default());
        let cache = EntityStateCache::new("statestream");
        let mut updates = cache.subscribe();
        let _listener = cache.start(&manager);

        manager.connect(BrokerEndpoint::new("memory").with_client_id("panel"));

        let update = updates.recv().await.unwrap();
        assert_eq!(update.entity_id, "light.kitchen");
        assert!(cache.is_on("light.kitchen"));
    }
}
