use std::sync::Arc;

use dashmap::{DashMap, Entry};

use super::error::SubscriptionAlreadyPresent;
use super::{Subscription, SubscriptionHandle};

/// The subscriptions owned by one channel, keyed by their stable [`SubscriptionHandle`].
///
/// Ordering and server-id lookup live in the channel state machine; this map only owns the
/// subscription objects so that the machine can refer to them by handle.
#[derive(Debug)]
pub struct SubscriptionMap {
    entries: DashMap<SubscriptionHandle, Arc<Subscription>, ahash::RandomState>,
}

impl SubscriptionMap {
    /// Construct a new empty [`SubscriptionMap`].
    pub fn new() -> SubscriptionMap {
        Self::default()
    }

    /// Track `subscription` under its own handle.
    pub fn insert(&self, subscription: Arc<Subscription>) -> Result<(), SubscriptionAlreadyPresent> {
        match self.entries.entry(subscription.handle()) {
            Entry::Occupied(entry) => Err(SubscriptionAlreadyPresent {
                handle: *entry.key(),
            }),

            Entry::Vacant(slot) => {
                slot.insert(subscription);
                Ok(())
            }
        }
    }

    /// Stop tracking the subscription for `handle`, returning it if present.
    pub fn remove(&self, handle: &SubscriptionHandle) -> Option<Arc<Subscription>> {
        self.entries.remove(handle).map(|(_, subscription)| subscription)
    }

    pub fn get(&self, handle: &SubscriptionHandle) -> Option<Arc<Subscription>> {
        self.entries.get(handle).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SubscriptionMap {
    fn default() -> Self {
        Self {
            entries: DashMap::default(),
        }
    }
}
