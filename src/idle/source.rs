//! Activity subscription contract and the in-memory subscription table.

use std::collections::HashMap;
use std::hash::Hash;

/// Handle for one live activity subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Source of raw activity notifications for targets.
///
/// The registry subscribes a target when its first duration is registered and
/// unsubscribes it when the last one is removed. While subscribed, the source
/// routes each activity signal to
/// [`IdleTimerRegistry::record_activity`](super::IdleTimerRegistry::record_activity).
pub trait ActivitySource<T> {
    fn subscribe(&mut self, target: &T) -> SubscriptionId;

    fn unsubscribe(&mut self, subscription: SubscriptionId);

    fn is_subscribed(&self, target: &T) -> bool;
}

/// Subscription table used as the activity gate by the service.
#[derive(Debug)]
pub struct SubscriptionSet<T> {
    /// Subscribed target per id
    by_id: HashMap<SubscriptionId, T>,
    /// Reverse lookup
    by_target: HashMap<T, SubscriptionId>,
    /// Next id to hand out
    next_id: u64,
}

impl<T> SubscriptionSet<T> {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_target: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl<T> Default for SubscriptionSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash> ActivitySource<T> for SubscriptionSet<T> {
    fn subscribe(&mut self, target: &T) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.by_id.insert(id, target.clone());
        if let Some(stale) = self.by_target.insert(target.clone(), id) {
            self.by_id.remove(&stale);
        }
        id
    }

    fn unsubscribe(&mut self, subscription: SubscriptionId) {
        if let Some(target) = self.by_id.remove(&subscription) {
            self.by_target.remove(&target);
        }
    }

    fn is_subscribed(&self, target: &T) -> bool {
        self.by_target.contains_key(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsubscribe_is_idempotent() {
        let mut set = SubscriptionSet::new();
        let id = set.subscribe(&"document");
        assert!(set.is_subscribed(&"document"));

        set.unsubscribe(id);
        set.unsubscribe(id);
        assert!(!set.is_subscribed(&"document"));
        assert!(set.is_empty());
    }
}
