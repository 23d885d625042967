use common::PacketFlags;

/// Where a packet lives in the arena, and what it is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketMeta {
    pub flags: PacketFlags,
    pub pts_usec: i64,
    pub start: usize,
    pub len: usize,
}

/// Circular queue of packet metadata.
///
/// `head` is the next free slot and `tail` the oldest occupied one. One slot
/// always stays unused so that `head == tail` means empty and
/// `head + 1 == tail` means full.
pub struct PacketIndex {
    slots: Box<[PacketMeta]>,
    head: usize,
    tail: usize,
}

impl PacketIndex {
    /// # Panics
    /// Panics if `capacity < 2`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "PacketIndex capacity must be >= 2");
        Self {
            slots: vec![PacketMeta::default(); capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        let cap = self.slots.len();
        (self.head + cap - self.tail) % cap
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.head + 1) % self.slots.len() == self.tail
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Stores `meta` in the head slot and returns that slot.
    ///
    /// # Panics
    /// Panics if the index is full; callers evict first.
    pub fn push(&mut self, meta: PacketMeta) -> usize {
        assert!(!self.is_full(), "push into full PacketIndex");
        let slot = self.head;
        self.slots[slot] = meta;
        self.head = (self.head + 1) % self.slots.len();
        slot
    }

    /// Drops the oldest entry.
    pub fn pop_tail(&mut self) -> Option<PacketMeta> {
        if self.is_empty() {
            return None;
        }
        let meta = self.slots[self.tail];
        self.tail = (self.tail + 1) % self.slots.len();
        Some(meta)
    }

    pub fn oldest(&self) -> Option<&PacketMeta> {
        (!self.is_empty()).then(|| &self.slots[self.tail])
    }

    pub fn newest(&self) -> Option<&PacketMeta> {
        if self.is_empty() {
            return None;
        }
        let cap = self.slots.len();
        Some(&self.slots[(self.head + cap - 1) % cap])
    }

    /// Whether `slot` currently holds a packet.
    pub fn is_live(&self, slot: usize) -> bool {
        if slot >= self.slots.len() || self.is_empty() {
            return false;
        }
        if self.tail < self.head {
            self.tail <= slot && slot < self.head
        } else {
            slot >= self.tail || slot < self.head
        }
    }

    pub fn get(&self, slot: usize) -> Option<&PacketMeta> {
        self.is_live(slot).then(|| &self.slots[slot])
    }

    /// The slot after `slot`, or `None` once that would be `head`.
    pub fn next(&self, slot: usize) -> Option<usize> {
        let next = (slot + 1) % self.slots.len();
        (next != self.head).then_some(next)
    }

    /// Live entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &PacketMeta)> + '_ {
        let cap = self.slots.len();
        (0..self.len()).map(move |offset| {
            let slot = (self.tail + offset) % cap;
            (slot, &self.slots[slot])
        })
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}
