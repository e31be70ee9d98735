//! Priority-ordered requisition queues over a fixed arena of slots.
//!
//! Requisitions live in [Slots] and are addressed by stable [SlotId]s.
//! A [RequisitionQueue] only orders ids.

use crate::requisition::{Priority, Requisition};
use slotmap::{Key, SlotMap};
use std::fmt::{self, Display};

slotmap::new_key_type! {
    /// Stable handle of a requisition slot. Handles of shredded requisitions are never reissued.
    pub struct SlotId;
}

impl Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:?}", self.data())
    }
}

/// Fixed-size arena of requisitions.
#[derive(Debug)]
pub(crate) struct Slots {
    entries: SlotMap<SlotId, Requisition>,
    limit: usize,
}

impl Slots {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            entries: SlotMap::with_key(),
            limit,
        }
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    /// Stores a requisition, or gives it back if every slot is taken.
    pub(crate) fn alloc(&mut self, requisition: Requisition) -> Result<SlotId, Requisition> {
        if self.entries.len() >= self.limit {
            return Err(requisition);
        }
        Ok(self.entries.insert(requisition))
    }

    pub(crate) fn free(&mut self, id: SlotId) -> Option<Requisition> {
        self.entries.remove(id)
    }

    pub(crate) fn get(&self, id: SlotId) -> Option<&Requisition> {
        self.entries.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: SlotId) -> Option<&mut Requisition> {
        self.entries.get_mut(id)
    }

    pub(crate) fn in_use(&self) -> usize {
        self.entries.len()
    }
}

/// Requisitions of one direction, by descending priority and first come first served.
#[derive(Debug, Default)]
pub(crate) struct RequisitionQueue {
    order: Vec<SlotId>,
}

impl RequisitionQueue {
    /// Inserts `id` right after the last entry whose priority is not lower than `priority`.
    ///
    /// Walks from the tail, so the common case of equal priorities is cheap.
    pub(crate) fn insert(&mut self, slots: &Slots, id: SlotId, priority: Priority) {
        let position = self
            .order
            .iter()
            .rposition(|&other| {
                slots
                    .get(other)
                    .is_some_and(|requisition| requisition.priority >= priority)
            })
            .map_or(0, |index| index + 1);
        self.order.insert(position, id);
    }

    /// Removes `id` from the queue, returning whether it was present.
    pub(crate) fn remove(&mut self, id: SlotId) -> bool {
        match self.order.iter().position(|&other| other == id) {
            Some(index) => {
                self.order.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.order.iter().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requisition::Space;

    fn push(slots: &mut Slots, queue: &mut RequisitionQueue, coarse: u8, fine: u8) -> SlotId {
        let priority = Priority::new(coarse, fine);
        let id = slots
            .alloc(Requisition::new(Space::ZERO, priority, None))
            .unwrap();
        queue.insert(slots, id, priority);
        id
    }

    fn priorities(slots: &Slots, queue: &RequisitionQueue) -> Vec<(u8, u8)> {
        queue
            .iter()
            .map(|id| slots.get(id).unwrap().priority)
            .map(|p| (p.coarse, p.fine))
            .collect()
    }

    #[test]
    fn sorted_descending() {
        let mut slots = Slots::new(16);
        let mut queue = RequisitionQueue::default();
        for (coarse, fine) in [(1, 0), (5, 0), (3, 2), (3, 7), (0, 9), (5, 1)] {
            push(&mut slots, &mut queue, coarse, fine);
        }
        assert_eq!(
            priorities(&slots, &queue),
            [(5, 1), (5, 0), (3, 7), (3, 2), (1, 0), (0, 9)]
        );
    }

    #[test]
    fn fifo_among_equals() {
        let mut slots = Slots::new(16);
        let mut queue = RequisitionQueue::default();
        let a = push(&mut slots, &mut queue, 2, 0);
        let high = push(&mut slots, &mut queue, 4, 0);
        let b = push(&mut slots, &mut queue, 2, 0);
        let low = push(&mut slots, &mut queue, 1, 0);
        let c = push(&mut slots, &mut queue, 2, 0);
        assert_eq!(queue.iter().collect::<Vec<_>>(), [high, a, b, c, low]);
    }

    #[test]
    fn freed_handles_stay_dead() {
        let mut slots = Slots::new(2);
        let mut queue = RequisitionQueue::default();
        let a = push(&mut slots, &mut queue, 1, 0);
        let b = push(&mut slots, &mut queue, 1, 0);
        assert!(slots
            .alloc(Requisition::new(Space::ZERO, Priority::default(), None))
            .is_err());

        assert!(queue.remove(a));
        assert!(!queue.remove(a));
        assert!(slots.free(a).is_some());
        assert!(slots.free(a).is_none());
        assert_eq!(slots.in_use(), 1);

        let c = push(&mut slots, &mut queue, 1, 0);
        assert_ne!(c, a);
        assert!(slots.get(a).is_none());
        assert!(slots.get(c).is_some());
        assert_eq!(queue.iter().collect::<Vec<_>>(), [b, c]);
        assert_eq!(queue.len(), 2);
    }
}
