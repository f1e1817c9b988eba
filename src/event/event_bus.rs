// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broadcast bus for fanning messages out to independent consumers.

use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Single-producer, multi-consumer bus built on tokio's broadcast channel.
///
/// Each subscriber receives its own copy of every value published after it
/// subscribed, in publish order. A slow subscriber never blocks the others:
/// once it falls more than the capacity behind it receives
/// `RecvError::Lagged` and skips ahead.
///
/// # Examples
///
/// ```
/// use tablethub::event::EventBus;
///
/// let bus: EventBus<String> = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish("hello".to_string());
/// assert_eq!(rx.try_recv().unwrap(), "hello");
/// ```
#[derive(Debug)]
pub struct EventBus<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    /// Creates a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new event bus with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to values published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes a value to all subscribers.
    ///
    /// If there are no subscribers, the value is silently discarded.
    pub fn publish(&self, value: T) {
        // No subscribers is not an error here.
        let _ = self.sender.send(value);
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
