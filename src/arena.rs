//! Context storage and scheduling lists.
//!
//! All contexts live in a generational [`Arena`]; the alive and blocked sets
//! are intrusive doubly-linked lists threaded through slot indices, so
//! insertion and removal are O(1) without any pointer surgery. Slot index 0
//! is reserved for the idle context: the sentinel representing the host's own
//! execution, which is always a valid target and never a member of either
//! list.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::arch::Checkpoint;
use crate::engine::Engine;
use crate::snapshot::Snapshot;

/// Entry point of a context, consumed the first time it is scheduled.
pub(crate) type Entry = Box<dyn FnOnce(&Engine) + 'static>;

pub(crate) const IDLE_INDEX: u32 = 0;

/// Opaque identity of a context.
///
/// Handles are generational: once the context finishes, every operation
/// taking its handle becomes a no-op and [`Engine::status`] reports
/// [`Status::Finished`], even if the underlying slot is later reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) const fn idle() -> Self {
        Self::new(IDLE_INDEX, 0)
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }
}

/// Externally observable state of a context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The idle sentinel: the host's own execution context.
    Idle,
    /// Member of the alive list, eligible for scheduling.
    Alive,
    /// Suspended until an external `unblock`.
    Blocked,
    /// The entry function returned (also reported for unknown handles).
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ListId {
    Alive,
    Blocked,
}

pub(crate) struct Slot {
    generation: u32,
    status: Status,
    entry: Option<Entry>,
    pub(crate) checkpoint: Checkpoint,
    pub(crate) snapshot: Snapshot,
    prev: Option<u32>,
    next: Option<u32>,
}

impl Slot {
    fn idle() -> Self {
        Self {
            generation: 0,
            status: Status::Idle,
            entry: None,
            checkpoint: Checkpoint::new(),
            snapshot: Snapshot::new(),
            prev: None,
            next: None,
        }
    }
}

pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    alive: Option<u32>,
    blocked: Option<u32>,
}

impl Arena {
    pub(crate) fn new() -> Self {
        Self {
            slots: alloc::vec![Slot::idle()],
            free: Vec::new(),
            alive: None,
            blocked: None,
        }
    }

    /// Allocate a context for `entry` and prepend it to the alive list.
    pub(crate) fn insert(&mut self, entry: Entry) -> Handle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).expect("context arena overflow");
                self.slots.push(Slot::idle());
                index
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        slot.checkpoint = Checkpoint::new();
        slot.snapshot = Snapshot::new();
        let generation = slot.generation;
        self.push_front(ListId::Alive, index);
        Handle::new(index, generation)
    }

    /// Resolve a handle, returning its slot index if it is still current.
    pub(crate) fn lookup(&self, handle: Handle) -> Option<u32> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation || slot.status == Status::Finished {
            return None;
        }
        Some(handle.index)
    }

    pub(crate) fn slot(&self, index: u32) -> &Slot {
        &self.slots[index as usize]
    }

    pub(crate) fn slot_mut(&mut self, index: u32) -> &mut Slot {
        &mut self.slots[index as usize]
    }

    pub(crate) fn status_of(&self, index: u32) -> Status {
        self.slot(index).status
    }

    pub(crate) fn handle_of(&self, index: u32) -> Handle {
        Handle::new(index, self.slot(index).generation)
    }

    pub(crate) fn head(&self, list: ListId) -> Option<u32> {
        match list {
            ListId::Alive => self.alive,
            ListId::Blocked => self.blocked,
        }
    }

    pub(crate) fn next_of(&self, index: u32) -> Option<u32> {
        self.slot(index).next
    }

    pub(crate) fn take_entry(&mut self, index: u32) -> Option<Entry> {
        self.slot_mut(index).entry.take()
    }

    /// Prepend `index` to `list` and tag its membership.
    pub(crate) fn push_front(&mut self, list: ListId, index: u32) {
        debug_assert_ne!(index, IDLE_INDEX, "the idle context joins no list");
        let head = self.head(list);
        {
            let slot = self.slot_mut(index);
            debug_assert!(slot.prev.is_none() && slot.next.is_none());
            slot.status = match list {
                ListId::Alive => Status::Alive,
                ListId::Blocked => Status::Blocked,
            };
            slot.prev = None;
            slot.next = head;
        }
        if let Some(head) = head {
            self.slot_mut(head).prev = Some(index);
        }
        match list {
            ListId::Alive => self.alive = Some(index),
            ListId::Blocked => self.blocked = Some(index),
        }
    }

    /// Unlink `index` from whichever list currently owns it.
    pub(crate) fn unlink(&mut self, index: u32) {
        let list = match self.status_of(index) {
            Status::Alive => ListId::Alive,
            Status::Blocked => ListId::Blocked,
            Status::Idle | Status::Finished => return,
        };
        let (prev, next) = {
            let slot = self.slot_mut(index);
            (slot.prev.take(), slot.next.take())
        };
        match prev {
            Some(prev) => self.slot_mut(prev).next = next,
            None => match list {
                ListId::Alive => self.alive = next,
                ListId::Blocked => self.blocked = next,
            },
        }
        if let Some(next) = next {
            self.slot_mut(next).prev = prev;
        }
    }

    /// Retire a context: unlink it, drop its entry and snapshot immediately
    /// and bump the generation so outstanding handles go stale.
    pub(crate) fn release(&mut self, index: u32) {
        debug_assert_ne!(index, IDLE_INDEX, "the idle context is never released");
        self.unlink(index);
        let slot = self.slot_mut(index);
        slot.entry = None;
        slot.snapshot = Snapshot::new();
        slot.status = Status::Finished;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }

    pub(crate) fn iter(&self, list: ListId) -> ListIter<'_> {
        ListIter {
            arena: self,
            cursor: self.head(list),
        }
    }

    pub(crate) fn len(&self, list: ListId) -> usize {
        self.iter(list).count()
    }
}

pub(crate) struct ListIter<'a> {
    arena: &'a Arena,
    cursor: Option<u32>,
}

impl Iterator for ListIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let index = self.cursor?;
        self.cursor = self.arena.next_of(index);
        Some(index)
    }
}
