use std::borrow::Cow;

use common::PacketFlags;
use common::log::{debug, trace};

use crate::RingError;
use crate::arena::PacketArena;
use crate::index::{PacketIndex, PacketMeta};

/// A packet read back from the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub data: Cow<'a, [u8]>,
    pub flags: PacketFlags,
    pub pts_usec: i64,
}

/// Rolling window of the most recent encoded packets.
///
/// Payloads are packed back to back in a [`PacketArena`]; a parallel
/// [`PacketIndex`] records where each packet starts, how long it is, its flags
/// and its timestamp. Adding a packet evicts the oldest ones until the new
/// payload fits, so the ring always holds the newest contiguous run of
/// packets. Nothing is reallocated after construction.
///
/// The ring is not synchronised. It is meant to be owned by a single task.
pub struct RingBuffer {
    arena: PacketArena,
    index: PacketIndex,
}

impl RingBuffer {
    /// Sizes the ring for `span_secs` of video: `bit_rate * span_secs / 8`
    /// arena bytes and `frame_rate * span_secs * 2` index slots.
    pub fn new(bit_rate: u32, frame_rate: u32, span_secs: u32) -> Result<Self, RingError> {
        let arena_bytes = (bit_rate as u64 * span_secs as u64 / 8) as usize;
        let index_slots = frame_rate as usize * span_secs as usize * 2;
        debug!(
            "[ring] bit_rate={} frame_rate={} span={}s: arena={} bytes, index={} slots",
            bit_rate, frame_rate, span_secs, arena_bytes, index_slots
        );
        Self::with_capacity(arena_bytes, index_slots)
    }

    pub fn with_capacity(arena_bytes: usize, index_slots: usize) -> Result<Self, RingError> {
        if arena_bytes == 0 || index_slots < 2 {
            return Err(RingError::InvalidCapacity {
                arena_bytes,
                index_slots,
            });
        }
        Ok(Self {
            arena: PacketArena::new(arena_bytes),
            index: PacketIndex::new(index_slots),
        })
    }

    pub fn arena_capacity(&self) -> usize {
        self.arena.capacity()
    }

    pub fn index_capacity(&self) -> usize {
        self.index.capacity()
    }

    /// Number of live packets.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Sum of the payload sizes of the live packets.
    pub fn occupied_bytes(&self) -> usize {
        self.index.iter().map(|(_, meta)| meta.len).sum()
    }

    /// Appends a packet, evicting from the oldest end until it fits.
    ///
    /// Returns the number of packets evicted. Fails without touching the ring
    /// only when the payload is larger than the whole arena.
    pub fn add(&mut self, payload: &[u8], flags: PacketFlags, pts_usec: i64) -> Result<usize, RingError> {
        let size = payload.len();
        if size > self.arena.capacity() {
            return Err(RingError::PacketTooLarge {
                size,
                capacity: self.arena.capacity(),
            });
        }

        let evicted = self.evict_until_fits(size);

        let start = self.head_start();
        self.arena.write(start, payload);
        self.index.push(PacketMeta {
            flags,
            pts_usec,
            start,
            len: size,
        });
        trace!(
            "[ring] add size={} flags={:?} pts={} start={} evicted={}",
            size, flags, pts_usec, start, evicted
        );
        Ok(evicted)
    }

    /// Drops the oldest packets until `size` more bytes and one more index slot
    /// are available, or the ring is empty. Returns how many were dropped.
    pub fn evict_until_fits(&mut self, size: usize) -> usize {
        let mut evicted = 0;
        while !self.can_add(size) {
            if self.index.pop_tail().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    fn can_add(&self, size: usize) -> bool {
        if self.index.is_empty() {
            return true;
        }
        if self.index.is_full() {
            trace!(
                "[ring] out of metadata (head={} tail={})",
                self.index.head(),
                self.index.tail()
            );
            return false;
        }
        size <= self.free_bytes()
    }

    /// Arena offset where the next packet starts.
    fn head_start(&self) -> usize {
        match self.index.newest() {
            Some(newest) => self.arena.advance(newest.start, newest.len),
            None => 0,
        }
    }

    /// Bytes between the end of the newest packet and the start of the oldest.
    fn free_bytes(&self) -> usize {
        let Some(oldest) = self.index.oldest() else {
            return self.arena.capacity();
        };
        let cap = self.arena.capacity();
        // Live packets are packed back to back, so a non-empty ring whose head
        // has caught up with its tail is exactly full.
        (oldest.start + cap - self.head_start()) % cap
    }

    /// First slot, walking from the oldest packet, that holds a keyframe.
    pub fn find_first_playable(&self) -> Option<usize> {
        let found = self
            .index
            .iter()
            .find(|(_, meta)| meta.flags.is_key_frame())
            .map(|(slot, _)| slot);
        if found.is_none() {
            debug!("[ring] no sync frame among {} packets", self.index.len());
        }
        found
    }

    /// The slot after `slot`, or `None` past the newest packet.
    pub fn next(&self, slot: usize) -> Option<usize> {
        self.index.next(slot)
    }

    /// Payload and metadata stored in `slot`.
    pub fn read_chunk(&self, slot: usize) -> Result<Chunk<'_>, RingError> {
        let meta = self.index.get(slot).ok_or(RingError::StaleSlot(slot))?;
        Ok(Chunk {
            data: self.arena.read(meta.start, meta.len),
            flags: meta.flags,
            pts_usec: meta.pts_usec,
        })
    }

    /// Chunks from the first keyframe to the newest packet.
    pub fn playable(&self) -> Playable<'_> {
        Playable {
            ring: self,
            next: self.find_first_playable(),
        }
    }

    /// Timestamp distance between the newest and the oldest packet.
    pub fn time_span_usec(&self) -> i64 {
        match (self.index.oldest(), self.index.newest()) {
            (Some(oldest), Some(newest)) => newest.pts_usec - oldest.pts_usec,
            _ => 0,
        }
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }
}

/// Iterator returned by [`RingBuffer::playable`].
pub struct Playable<'a> {
    ring: &'a RingBuffer,
    next: Option<usize>,
}

impl<'a> Iterator for Playable<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.next?;
        self.next = self.ring.next(slot);
        self.ring.read_chunk(slot).ok()
    }
}
