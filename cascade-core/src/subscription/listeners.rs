//! Listener Collection
//!
//! An ordered multiset of callbacks stored as a doubly-linked list inside a
//! slot vector. Links are slot indices, so adding and removing are O(1) and
//! freed slots are reused. Each slot carries a generation and each collection
//! a unique ID, which makes a [`ListenerKey`] from a removed entry, or from a
//! collection that was cleared and replaced, harmless.
//!
//! A notification pass first walks the chain and captures the callbacks, then
//! invokes them. Entries added or removed by a callback therefore never change
//! the pass that is already running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::subscriber::Listener;

/// Counter for generating unique collection IDs.
static COLLECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_collection_id() -> u64 {
    COLLECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Callbacks captured for one notification pass.
pub type ListenerChain = SmallVec<[Listener; 4]>;

/// Identifies one entry in one specific collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerKey {
    collection: u64,
    index: usize,
    generation: u32,
}

struct Entry {
    callback: Listener,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
struct Slot {
    entry: Option<Entry>,
    generation: u32,
}

/// Doubly-linked list of listeners.
pub struct ListenerCollection {
    id: u64,
    slots: Vec<Slot>,
    free: Vec<usize>,
    first: Option<usize>,
    last: Option<usize>,
    len: usize,
}

impl ListenerCollection {
    pub fn new() -> Self {
        Self {
            id: next_collection_id(),
            slots: Vec::new(),
            free: Vec::new(),
            first: None,
            last: None,
            len: 0,
        }
    }

    /// Append a listener at the end of the chain.
    pub fn subscribe(&mut self, callback: Listener) -> ListenerKey {
        let entry = Entry {
            callback,
            prev: self.last,
            next: None,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    entry: Some(entry),
                    generation: 0,
                });
                self.slots.len() - 1
            }
        };

        match self.last.and_then(|last| self.slots[last].entry.as_mut()) {
            Some(tail) => tail.next = Some(index),
            None => self.first = Some(index),
        }
        self.last = Some(index);
        self.len += 1;

        ListenerKey {
            collection: self.id,
            index,
            generation: self.slots[index].generation,
        }
    }

    /// Unlink the entry for `key`. Returns `false` if it was already gone.
    pub fn remove(&mut self, key: ListenerKey) -> bool {
        if key.collection != self.id {
            return false;
        }

        let Some(slot) = self.slots.get_mut(key.index) else {
            return false;
        };
        if slot.generation != key.generation {
            return false;
        }
        let Some(entry) = slot.entry.take() else {
            return false;
        };
        slot.generation = slot.generation.wrapping_add(1);

        match entry.next {
            Some(next) => {
                if let Some(next) = self.slots[next].entry.as_mut() {
                    next.prev = entry.prev;
                }
            }
            None => self.last = entry.prev,
        }
        match entry.prev {
            Some(prev) => {
                if let Some(prev) = self.slots[prev].entry.as_mut() {
                    prev.next = entry.next;
                }
            }
            None => self.first = entry.next,
        }

        self.free.push(key.index);
        self.len -= 1;
        true
    }

    /// Drop every entry. Keys issued before the clear stop matching.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.free = (0..self.slots.len()).rev().collect();
        self.first = None;
        self.last = None;
        self.len = 0;
    }

    /// Capture the callbacks in chain order.
    pub fn chain(&self) -> ListenerChain {
        let mut chain = ListenerChain::new();
        let mut cursor = self.first;
        while let Some(index) = cursor {
            let Some(entry) = self.slots[index].entry.as_ref() else {
                break;
            };
            chain.push(Arc::clone(&entry.callback));
            cursor = entry.next;
        }
        chain
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for ListenerCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerCollection")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}

impl Default for ListenerCollection {
    fn default() -> Self {
        Self::new()
    }
}
