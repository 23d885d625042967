use std::borrow::Cow;

/// Fixed-size byte storage addressed as a circular range.
///
/// The arena has no notion of packets; callers pass the start offset and the
/// length. A range may run past the end of the storage, in which case it
/// continues at offset zero.
pub struct PacketArena {
    data: Box<[u8]>,
}

impl PacketArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Offset `len` bytes after `start`, modulo the capacity.
    pub fn advance(&self, start: usize, len: usize) -> usize {
        (start + len) % self.data.len()
    }

    /// Whether `len` bytes at `start` run past the physical end.
    pub fn wraps(&self, start: usize, len: usize) -> bool {
        start + len > self.data.len()
    }

    /// Copies `payload` to `start`, splitting the copy in two when it wraps.
    ///
    /// # Panics
    /// Panics if `start` is outside the arena or the payload is larger than it.
    pub fn write(&mut self, start: usize, payload: &[u8]) {
        let cap = self.data.len();
        assert!(
            payload.len() <= cap && (start < cap || payload.is_empty()),
            "arena write out of range: start={} len={} capacity={}",
            start,
            payload.len(),
            cap
        );

        if !self.wraps(start, payload.len()) {
            self.data[start..start + payload.len()].copy_from_slice(payload);
        } else {
            let first = cap - start;
            self.data[start..].copy_from_slice(&payload[..first]);
            self.data[..payload.len() - first].copy_from_slice(&payload[first..]);
        }
    }

    /// Contiguous view of `len` bytes at `start`.
    ///
    /// Borrowed when the range is physically contiguous, otherwise the two
    /// halves are copied into an owned buffer.
    pub fn read(&self, start: usize, len: usize) -> Cow<'_, [u8]> {
        if !self.wraps(start, len) {
            return Cow::Borrowed(&self.data[start..start + len]);
        }

        let first = self.data.len() - start;
        let mut joined = Vec::with_capacity(len);
        joined.extend_from_slice(&self.data[start..]);
        joined.extend_from_slice(&self.data[..len - first]);
        Cow::Owned(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_write_is_borrowed_on_read() {
        let mut arena = PacketArena::new(16);
        arena.write(4, &[1, 2, 3, 4]);
        let view = arena.read(4, 4);
        assert!(matches!(view, Cow::Borrowed(_)));
        assert_eq!(&*view, &[1, 2, 3, 4]);
    }

    #[test]
    fn wrapped_write_splits_and_reads_back_joined() {
        let mut arena = PacketArena::new(8);
        arena.write(6, &[10, 11, 12, 13, 14]);

        let view = arena.read(6, 5);
        assert!(matches!(view, Cow::Owned(_)));
        assert_eq!(&*view, &[10, 11, 12, 13, 14]);

        // The tail landed at the physical start.
        assert_eq!(&*arena.read(0, 3), &[12, 13, 14]);
    }

    #[test]
    fn write_ending_exactly_at_the_boundary_does_not_wrap() {
        let mut arena = PacketArena::new(8);
        arena.write(5, &[1, 2, 3]);
        assert!(!arena.wraps(5, 3));
        assert_eq!(arena.advance(5, 3), 0);
        assert!(matches!(arena.read(5, 3), Cow::Borrowed(_)));
    }

    #[test]
    fn full_size_payload_fits() {
        let mut arena = PacketArena::new(4);
        arena.write(2, &[1, 2, 3, 4]);
        assert_eq!(&*arena.read(2, 4), &[1, 2, 3, 4]);
        assert_eq!(arena.advance(2, 4), 2);
    }

    #[test]
    #[should_panic(expected = "arena write out of range")]
    fn oversized_write_panics() {
        let mut arena = PacketArena::new(4);
        arena.write(0, &[0; 5]);
    }
}
