// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! User activity signals and the source that delivers them.
//!
//! The session monitor never talks to a UI event system directly. It asks an
//! [`ActivitySource`] for a subscription covering the signal kinds it cares
//! about and gives the subscription back when it is disabled.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::locks::resilient_lock;

/// Recognized user-interaction signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    PointerPress,
    KeyPress,
    Scroll,
    TouchStart,
    Click,
}

impl ActivityKind {
    /// Every recognized kind, in declaration order.
    pub const ALL: [ActivityKind; 5] = [
        ActivityKind::PointerPress,
        ActivityKind::KeyPress,
        ActivityKind::Scroll,
        ActivityKind::TouchStart,
        ActivityKind::Click,
    ];
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActivityKind::PointerPress => "pointer_press",
            ActivityKind::KeyPress => "key_press",
            ActivityKind::Scroll => "scroll",
            ActivityKind::TouchStart => "touch_start",
            ActivityKind::Click => "click",
        };
        f.write_str(name)
    }
}

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A live subscription: its id (for `unsubscribe`) and the receiving end.
pub struct ActivitySubscription {
    pub id: SubscriptionId,
    pub signals: mpsc::UnboundedReceiver<ActivityKind>,
}

/// Capability for registering and removing activity listeners.
pub trait ActivitySource: Send + Sync {
    /// Register a listener for `kinds`.
    fn subscribe(&self, kinds: &[ActivityKind]) -> ActivitySubscription;

    /// Remove a listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

struct Listener {
    kinds: HashSet<ActivityKind>,
    sender: mpsc::UnboundedSender<ActivityKind>,
}

/// In-process activity source fed by [`ActivityBus::emit`].
///
/// Hosts (a terminal front end, a test) push raw signals into the bus and
/// each subscriber receives the ones it registered for.
#[derive(Default)]
pub struct ActivityBus {
    listeners: Mutex<HashMap<SubscriptionId, Listener>>,
    next_id: AtomicU64,
}

impl ActivityBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a signal to every listener registered for its kind.
    ///
    /// Returns the number of listeners that received it. Listeners whose
    /// receiving end was dropped are pruned.
    pub fn emit(&self, kind: ActivityKind) -> usize {
        let mut listeners = resilient_lock(&self.listeners);
        let mut delivered = 0;
        listeners.retain(|_, listener| {
            if !listener.kinds.contains(&kind) {
                return !listener.sender.is_closed();
            }
            match listener.sender.send(kind) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        resilient_lock(&self.listeners).len()
    }
}

impl ActivitySource for ActivityBus {
    fn subscribe(&self, kinds: &[ActivityKind]) -> ActivitySubscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, signals) = mpsc::unbounded_channel();
        let listener = Listener {
            kinds: kinds.iter().copied().collect(),
            sender,
        };
        resilient_lock(&self.listeners).insert(id, listener);
        tracing::debug!("ACTIVITY_SUBSCRIBED | id={} kinds={}", id.0, kinds.len());
        ActivitySubscription { id, signals }
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if resilient_lock(&self.listeners).remove(&id).is_some() {
            tracing::debug!("ACTIVITY_UNSUBSCRIBED | id={}", id.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_filters_by_kind() {
        let bus = ActivityBus::new();
        let mut keys = bus.subscribe(&[ActivityKind::KeyPress]);
        let mut all = bus.subscribe(&ActivityKind::ALL);

        assert_eq!(bus.emit(ActivityKind::Scroll), 1);
        assert_eq!(bus.emit(ActivityKind::KeyPress), 2);

        assert_eq!(keys.signals.try_recv().ok(), Some(ActivityKind::KeyPress));
        assert!(keys.signals.try_recv().is_err());
        assert_eq!(all.signals.try_recv().ok(), Some(ActivityKind::Scroll));
        assert_eq!(all.signals.try_recv().ok(), Some(ActivityKind::KeyPress));
    }

    #[test]
    fn test_unsubscribe_removes_listener() {
        let bus = ActivityBus::new();
        let sub = bus.subscribe(&ActivityKind::ALL);
        assert_eq!(bus.listener_count(), 1);

        bus.unsubscribe(sub.id);
        assert_eq!(bus.listener_count(), 0);
        assert_eq!(bus.emit(ActivityKind::Click), 0);

        // Second removal is a no-op
        bus.unsubscribe(sub.id);
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let bus = ActivityBus::new();
        let sub = bus.subscribe(&[ActivityKind::Click]);
        drop(sub);

        assert_eq!(bus.emit(ActivityKind::Click), 0);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ActivityKind::TouchStart.to_string(), "touch_start");
        assert_eq!(ActivityKind::ALL.len(), 5);
    }
}
