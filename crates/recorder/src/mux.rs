use std::path::{Path, PathBuf};

use common::log::{debug, warn};
use common::{PacketFlags, TrackFormat};
use storage::RingBuffer;

use crate::writer::{ContainerFactory, ContainerWriter, TrackId, WriterError};

/// An open container with one registered and started video track.
///
/// Finalizing (`stop` + `release`) happens exactly once: either through
/// [`MuxSession::finish`] or, on any early return, when the session is dropped.
pub struct MuxSession {
    writer: Box<dyn ContainerWriter>,
    track: TrackId,
    path: PathBuf,
    samples: u64,
    closed: bool,
}

impl MuxSession {
    pub fn open(
        factory: &dyn ContainerFactory,
        path: &Path,
        format: &TrackFormat,
    ) -> Result<Self, WriterError> {
        let writer = factory.open(path)?;
        let mut session = Self {
            writer,
            track: TrackId(0),
            path: path.to_path_buf(),
            samples: 0,
            closed: false,
        };
        // A failure from here on drops `session`, which closes the writer.
        session.track = session.writer.add_track(format)?;
        session.writer.start()?;
        debug!("[mux] started {}", path.display());
        Ok(session)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn write(&mut self, data: &[u8], flags: PacketFlags, pts_usec: i64) -> Result<(), WriterError> {
        self.writer.write_sample(self.track, data, flags, pts_usec)?;
        self.samples += 1;
        Ok(())
    }

    /// Writes `from` and every later packet in the ring, oldest first.
    pub fn write_ring(&mut self, ring: &RingBuffer, from: usize) -> Result<usize, WriterError> {
        let mut written = 0;
        let mut slot = Some(from);
        while let Some(current) = slot {
            let chunk = ring
                .read_chunk(current)
                .map_err(|e| WriterError::Muxer(e.to_string()))?;
            self.write(&chunk.data, chunk.flags, chunk.pts_usec)?;
            written += 1;
            slot = ring.next(current);
        }
        Ok(written)
    }

    /// Stops and releases the writer. Returns the number of samples written.
    pub fn finish(mut self) -> Result<u64, WriterError> {
        self.close()?;
        Ok(self.samples)
    }

    fn close(&mut self) -> Result<(), WriterError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let stopped = self.writer.stop();
        self.writer.release();
        stopped
    }
}

impl Drop for MuxSession {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("[mux] failed to finalize {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::testing::{Call, MemoryFactory};
    use common::VideoCodec;

    fn format() -> TrackFormat {
        TrackFormat {
            codec: VideoCodec::H264,
            width: 320,
            height: 240,
            frame_rate: 30,
            bit_rate: 500_000,
            codec_config: vec![0, 0, 0, 1, 0x67],
        }
    }

    fn ring_with(flags: &[PacketFlags]) -> RingBuffer {
        let mut ring = RingBuffer::with_capacity(1000, 16).unwrap();
        for (i, f) in flags.iter().enumerate() {
            ring.add(&[i as u8; 10], *f, i as i64 * 100).unwrap();
        }
        ring
    }

    #[test]
    fn calls_arrive_in_order_and_close_once() {
        let factory = MemoryFactory::new();
        let path = Path::new("/mem/a");
        let ring = ring_with(&[PacketFlags::NONE, PacketFlags::KEY_FRAME, PacketFlags::NONE]);

        let mut session = MuxSession::open(&factory, path, &format()).unwrap();
        let first = ring.find_first_playable().unwrap();
        assert_eq!(session.write_ring(&ring, first).unwrap(), 2);
        assert_eq!(session.finish().unwrap(), 2);

        let file = factory.file(path).unwrap();
        assert_eq!(
            file.calls,
            vec![
                Call::AddTrack,
                Call::Start,
                Call::Write {
                    pts_usec: 100,
                    key: true
                },
                Call::Write {
                    pts_usec: 200,
                    key: false
                },
                Call::Stop,
                Call::Release,
            ]
        );
        assert_eq!(file.format, Some(format()));
    }

    #[test]
    fn dropped_session_is_still_finalized() {
        let factory = MemoryFactory::failing_at(1);
        let path = Path::new("/mem/b");
        let ring = ring_with(&[PacketFlags::KEY_FRAME, PacketFlags::NONE, PacketFlags::NONE]);

        {
            let mut session = MuxSession::open(&factory, path, &format()).unwrap();
            assert!(session.write_ring(&ring, 0).is_err());
            assert_eq!(session.samples(), 1);
        }

        let file = factory.file(path).unwrap();
        assert_eq!(file.count(&Call::Stop), 1);
        assert_eq!(file.count(&Call::Release), 1);
        assert_eq!(file.pts(), vec![0]);
    }
}
