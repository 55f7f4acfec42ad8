//! Change-event accumulation
//!
//! A [`Watcher`] lives for one execution. The host calls one method per
//! change notification; events for the same object are OR-combined, and
//! [`Watcher::process_events`] hands each object's union of events to its
//! provider exactly once at the end.

mod account;
mod document;
mod term;

pub use account::*;
pub use document::*;
pub use term::*;

use crate::provider::{ObjectPolicy, Provider};
use bitflags::bitflags;
use bitflags::Flags;
use std::collections::BTreeMap;
use tracing::{debug, warn};

bitflags! {
    /// What a set of events may have invalidated for one object
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Invalidations: u32 {
        /// The object may have become (un)indexable
        const IS_INDEXABLE       = 1 << 0;
        /// The object may have moved in canonical order
        const ITEM_INDEX         = 1 << 1;
        const ITEM_URL           = 1 << 2;
        /// The object may no longer exist; all other invalidations are moot
        const OBJECT_EXISTS      = 1 << 3;
        const ITEM_LAST_MODIFIED = 1 << 4;
    }
}

/// Per-object event accumulator for one object type
#[derive(Debug)]
pub struct Watcher<E> {
    events: BTreeMap<i64, E>,
}

impl<E> Default for Watcher<E> {
    fn default() -> Self {
        Self {
            events: BTreeMap::new(),
        }
    }
}

impl<E: Flags + Copy> Watcher<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `events` for `object_id`, merging with what was seen before
    pub fn add_events(&mut self, object_id: i64, events: E) {
        if events.is_empty() {
            return;
        }
        self.events.entry(object_id).or_insert_with(E::empty).insert(events);
    }

    /// Combined events recorded for one object
    pub fn events_for(&self, object_id: i64) -> Option<E> {
        self.events.get(&object_id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Evaluate every watched object once.
    ///
    /// Failures for one object are logged and do not stop the others.
    /// Returns the number of objects evaluated.
    pub async fn process_events<P>(self, provider: &Provider<P>) -> usize
    where
        P: ObjectPolicy<Events = E>,
    {
        let count = self.events.len();
        for (object_id, events) in self.events {
            if let Err(e) = provider.process_watches(object_id, events).await {
                warn!(
                    object_type = %provider.object_type(),
                    object_id,
                    error = %e,
                    "Failed to process watched events"
                );
            }
        }
        debug!(objects = count, "Processed watched events");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_merged_per_object() {
        let mut watcher = Watcher::<DocumentEvents>::new();
        watcher.add_events(4, DocumentEvents::STATUS_UPDATED);
        watcher.add_events(4, DocumentEvents::PERMALINK_UPDATED);
        watcher.add_events(9, DocumentEvents::DELETED);
        watcher.add_events(11, DocumentEvents::empty());

        assert_eq!(watcher.len(), 2);
        assert_eq!(
            watcher.events_for(4),
            Some(DocumentEvents::STATUS_UPDATED | DocumentEvents::PERMALINK_UPDATED)
        );
        assert_eq!(watcher.events_for(11), None);
    }
}
