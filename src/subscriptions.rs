//! Fixed-capacity subscription table
//!
//! An arena of `N` slots addressed by [`SlotHandle`]. Slot selection is
//! first-fit over unused slots. Each slot owns its topic name; nothing is
//! shared between slots. The table is populated during startup, before the
//! session runner dispatches anything, and is not written afterwards.
use std::sync::Arc;

use crate::contracts::{Topic, TopicId, TopicName};
use crate::errors::{Result, TelemetryError};
use crate::gateway::{DeliveryHandler, Subscription};
use crate::NUMOFSUBS;

/// Index of an allocated slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle(usize);

impl SlotHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One entry of the table; `None` marks an unused slot
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSlot {
    entry: Option<Subscription>,
}

impl SubscriptionSlot {
    pub fn in_use(&self) -> bool {
        self.entry.is_some()
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        self.entry.as_ref()
    }
}

/// Registry of topic names and their delivery handlers
pub struct SubscriptionTable<const N: usize = NUMOFSUBS> {
    slots: [SubscriptionSlot; N],
}

impl<const N: usize> SubscriptionTable<N> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| SubscriptionSlot::default()),
        }
    }

    /// Claim the first unused slot for `topic_name`
    ///
    /// # Errors
    /// - `TopicNameTooLong` / `InvalidTopicName` if the name is rejected
    /// - `TableFull` once all `N` slots are occupied
    pub fn allocate(
        &mut self,
        topic_name: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<SlotHandle> {
        let name = TopicName::new(topic_name)?;
        let index = self
            .slots
            .iter()
            .position(|slot| !slot.in_use())
            .ok_or(TelemetryError::TableFull { capacity: N })?;

        self.slots[index].entry = Some(Subscription {
            topic: Topic::unresolved(name),
            handler,
        });
        Ok(SlotHandle(index))
    }

    /// Record the id the gateway assigned to a slot's topic
    pub fn resolve(&mut self, handle: SlotHandle, id: TopicId) -> Result<()> {
        let entry = self.entry_mut(handle)?;
        entry.topic.id = Some(id);
        Ok(())
    }

    /// Return a slot to the free pool
    pub fn release(&mut self, handle: SlotHandle) -> Option<Subscription> {
        self.slots.get_mut(handle.0).and_then(|slot| slot.entry.take())
    }

    pub fn get(&self, handle: SlotHandle) -> Option<&Subscription> {
        self.slots.get(handle.0).and_then(SubscriptionSlot::subscription)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.in_use()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Occupied slots in slot order
    pub fn iter(&self) -> impl Iterator<Item = (SlotHandle, &Subscription)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.subscription().map(|sub| (SlotHandle(i), sub)))
    }

    fn entry_mut(&mut self, handle: SlotHandle) -> Result<&mut Subscription> {
        self.slots
            .get_mut(handle.0)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or_else(|| {
                TelemetryError::InvalidState(format!("slot {} is not allocated", handle.0))
            })
    }
}

impl<const N: usize> Default for SubscriptionTable<N> {
    fn default() -> Self {
        Self::new()
    }
}
