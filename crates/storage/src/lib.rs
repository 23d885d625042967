//! Fixed-capacity storage for encoded video packets.
//!
//! [`RingBuffer`] holds the last few seconds of compressed output in a single
//! preallocated arena so an instant replay can be written out on demand.

pub mod arena;
pub mod index;
pub mod ring;

pub use arena::PacketArena;
pub use index::{PacketIndex, PacketMeta};
pub use ring::{Chunk, Playable, RingBuffer};

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// A single packet larger than the arena. The buffer is misconfigured for
    /// the stream it is fed; no amount of eviction can make room.
    #[error("enormous packet: {size} bytes vs. buffer {capacity}")]
    PacketTooLarge { size: usize, capacity: usize },

    #[error("invalid ring capacity: {arena_bytes} arena bytes, {index_slots} index slots")]
    InvalidCapacity { arena_bytes: usize, index_slots: usize },

    #[error("slot {0} does not hold a live packet")]
    StaleSlot(usize),
}
