use std::num::NonZeroU32;

use crate::key::{EncodedKey, KeyVector, LANES};
use crate::stats::Stats;

/// Default slot count. Large relative to any realistic key cardinality, so
/// almost every lookup hits an empty or matching head slot.
pub const TABLE_SIZE: usize = 1 << 22;

/// Largest slot count a table accepts
pub const MAX_TABLE_SLOTS: usize = 1 << 30;

/// Index of a node in the table's arena. Kept non-zero so `Option<NodeId>`
/// costs four bytes per slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct NodeId(NonZeroU32);

impl NodeId {
    fn new(index: usize) -> Self {
        Self(NonZeroU32::MIN.saturating_add(index as u32))
    }

    fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

/// Statistics for one canonical key, plus the link to the next node sharing its slot.
#[derive(Clone, Debug)]
pub struct Aggregate {
    key: KeyVector,
    len: u8,
    stats: Stats,
    next: Option<NodeId>,
}

impl Aggregate {
    fn new(key: &EncodedKey) -> Self {
        Self {
            key: key.key,
            len: key.len as u8,
            stats: Stats::EMPTY,
            next: None,
        }
    }

    #[inline(always)]
    fn matches(&self, key: &EncodedKey) -> bool {
        self.key == key.key && usize::from(self.len) == key.len
    }

    pub fn key(&self) -> &[u8] {
        &self.key.as_array()[..usize::from(self.len)]
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// Open hash table owned by a single worker: a power-of-two slot array whose
/// entries head singly linked chains of nodes in an arena. Keys are verified
/// by full-width vector comparison, never trusted to the hash alone.
pub struct AggregateTable {
    slots: Box<[Option<NodeId>]>,
    nodes: Vec<Aggregate>,
    mask: usize,
    chained: usize,
}

impl AggregateTable {
    /// `slots` is clamped to `1..=MAX_TABLE_SLOTS` and rounded up to a power of two.
    pub fn with_slots(slots: usize) -> Self {
        let slots = slots.clamp(1, MAX_TABLE_SLOTS).next_power_of_two();
        Self {
            slots: vec![None; slots].into_boxed_slice(),
            nodes: Vec::with_capacity(1024),
            mask: slots - 1,
            chained: 0,
        }
    }

    /// Returns the statistics for `key`, creating an empty entry on first sight.
    #[inline(always)]
    pub fn get_or_create(&mut self, key: &EncodedKey) -> &mut Stats {
        debug_assert!(key.len <= LANES);
        let slot = key.hash as usize & self.mask;
        let head = self.slots[slot];
        let id = match head {
            None => {
                let id = self.push(key);
                self.slots[slot] = Some(id);
                id
            }
            Some(head) if self.nodes[head.index()].matches(key) => head,
            Some(head) => self.find_in_chain(head, key),
        };
        &mut self.nodes[id.index()].stats
    }

    /// Walks the chain after `head`, appending a new node at its tail if `key` is absent.
    #[cold]
    fn find_in_chain(&mut self, head: NodeId, key: &EncodedKey) -> NodeId {
        let mut tail = head;
        while let Some(next) = self.nodes[tail.index()].next {
            if self.nodes[next.index()].matches(key) {
                return next;
            }
            tail = next;
        }
        let id = self.push(key);
        self.nodes[tail.index()].next = Some(id);
        self.chained += 1;
        id
    }

    fn push(&mut self, key: &EncodedKey) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(Aggregate::new(key));
        id
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of keys stored behind another key in a collision chain
    pub fn chained(&self) -> usize {
        self.chained
    }

    /// All keys in the table, chains flattened.
    pub fn into_entries(self) -> Vec<Aggregate> {
        self.nodes
    }
}
