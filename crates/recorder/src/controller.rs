use std::path::{Path, PathBuf};

use common::log::{debug, error, info, warn};
use common::{EncodedPacket, PrerollPolicy, TrackFormat};
use storage::{RingBuffer, RingError};

use crate::mux::MuxSession;
use crate::status::SaveStatus;
use crate::writer::{ContainerFactory, WriterError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Packets go into the ring buffer.
    Buffering,
    /// Packets go straight into the open container.
    Recording,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("already recording to {}", .0.display())]
    AlreadyRecording(PathBuf),

    #[error("not recording")]
    NotRecording,

    #[error(transparent)]
    Writer(#[from] WriterError),
}

/// A finished recording segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub samples: u64,
    pub status: SaveStatus,
}

/// Where [`RecordingController::accept`] sent a packet.
#[derive(Debug)]
pub enum Routed {
    Buffered { evicted: usize },
    Written,
    /// Dropped while a recording without pre-roll waits for its first keyframe.
    Skipped,
    /// The container write failed. The recording has been finalized, the
    /// controller is back to buffering and the packet went into the ring.
    Interrupted {
        summary: RecordingSummary,
        error: WriterError,
    },
}

/// The ring rejected a packet. When a recording was interrupted by the same
/// packet, its summary is carried along so the caller can still report it.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct RouteError {
    pub interrupted: Option<RecordingSummary>,
    #[source]
    pub source: RingError,
}

impl From<RingError> for RouteError {
    fn from(source: RingError) -> Self {
        RouteError {
            interrupted: None,
            source,
        }
    }
}

struct ActiveRecording {
    session: MuxSession,
    awaiting_key_frame: bool,
    skipped: u64,
}

/// Buffering / passthrough switch for incoming packets.
///
/// While buffering, packets are added to the ring. While recording, they are
/// written to the open container and the ring is left untouched, so once
/// recording stops the ring has a gap covering the recorded interval.
pub struct RecordingController {
    policy: PrerollPolicy,
    active: Option<ActiveRecording>,
}

impl RecordingController {
    pub fn new(policy: PrerollPolicy) -> Self {
        Self {
            policy,
            active: None,
        }
    }

    pub fn mode(&self) -> Mode {
        match self.active {
            Some(_) => Mode::Recording,
            None => Mode::Buffering,
        }
    }

    pub fn policy(&self) -> PrerollPolicy {
        self.policy
    }

    pub fn active_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|active| active.session.path())
    }

    /// Opens `path` and switches to passthrough. Returns the number of
    /// pre-roll packets copied from the ring.
    pub fn start(
        &mut self,
        factory: &dyn ContainerFactory,
        path: &Path,
        format: &TrackFormat,
        ring: &RingBuffer,
    ) -> Result<usize, RecordError> {
        if let Some(active) = &self.active {
            return Err(RecordError::AlreadyRecording(active.session.path().to_path_buf()));
        }

        let mut session = MuxSession::open(factory, path, format)?;
        let mut preroll = 0;
        if self.policy == PrerollPolicy::Prepend {
            match ring.find_first_playable() {
                Some(first) => preroll = session.write_ring(ring, first)?,
                None => debug!("[controller] no sync frame buffered, recording without pre-roll"),
            }
        }

        info!(
            "[controller] recording to {} ({} pre-roll packets)",
            path.display(),
            preroll
        );
        self.active = Some(ActiveRecording {
            session,
            awaiting_key_frame: preroll == 0,
            skipped: 0,
        });
        Ok(preroll)
    }

    /// Routes one packet according to the current mode.
    pub fn accept(&mut self, packet: &EncodedPacket, ring: &mut RingBuffer) -> Result<Routed, RouteError> {
        let written = match self.active.as_mut() {
            None => {
                let evicted = ring.add(&packet.data, packet.flags, packet.pts_usec)?;
                return Ok(Routed::Buffered { evicted });
            }
            Some(active) => {
                if active.awaiting_key_frame {
                    if !packet.is_key_frame() {
                        active.skipped += 1;
                        return Ok(Routed::Skipped);
                    }
                    active.awaiting_key_frame = false;
                    if active.skipped > 0 {
                        debug!(
                            "[controller] skipped {} packets waiting for a keyframe",
                            active.skipped
                        );
                    }
                }
                active
                    .session
                    .write(&packet.data, packet.flags, packet.pts_usec)
            }
        };

        let Err(error) = written else {
            return Ok(Routed::Written);
        };

        error!("[controller] passthrough write failed: {}", error);
        let summary = self.finalize(SaveStatus::WriteError);
        if let Err(source) = ring.add(&packet.data, packet.flags, packet.pts_usec) {
            return Err(RouteError {
                interrupted: summary,
                source,
            });
        }
        match summary {
            Some(summary) => Ok(Routed::Interrupted { summary, error }),
            None => Ok(Routed::Buffered { evicted: 0 }),
        }
    }

    /// Finalizes the open container and goes back to buffering.
    pub fn stop(&mut self) -> Result<RecordingSummary, RecordError> {
        self.finalize(SaveStatus::Ok).ok_or(RecordError::NotRecording)
    }

    fn finalize(&mut self, status: SaveStatus) -> Option<RecordingSummary> {
        let active = self.active.take()?;
        let path = active.session.path().to_path_buf();
        let samples = active.session.samples();
        let status = match active.session.finish() {
            Ok(_) => status,
            Err(e) => {
                warn!("[controller] failed to finalize {}: {}", path.display(), e);
                SaveStatus::WriteError
            }
        };
        info!(
            "[controller] stopped recording {} ({} samples, {:?})",
            path.display(),
            samples,
            status
        );
        Some(RecordingSummary {
            path,
            samples,
            status,
        })
    }
}
