//! Container writer capability.
//!
//! The recorder decides which packets go into a file and in what order; the
//! writer owns the wire format. Calls always arrive as
//! `open → add_track → start → write_sample* → stop → release`, and `stop` and
//! `release` are called once for every writer that was opened, even when an
//! earlier step failed. `stop` therefore has to tolerate being called on a
//! writer that never started.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use common::log::{debug, info};
use common::{PacketFlags, TrackFormat, VideoCodec};

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown track {0}")]
    UnknownTrack(usize),

    #[error("container writer misuse: {0}")]
    State(&'static str),

    #[error("muxer error: {0}")]
    Muxer(String),
}

impl WriterError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        WriterError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(pub usize);

pub trait ContainerWriter: Send {
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackId, WriterError>;
    fn start(&mut self) -> Result<(), WriterError>;
    fn write_sample(
        &mut self,
        track: TrackId,
        data: &[u8],
        flags: PacketFlags,
        pts_usec: i64,
    ) -> Result<(), WriterError>;
    /// Flushes and finalizes the container.
    fn stop(&mut self) -> Result<(), WriterError>;
    /// Frees whatever the writer still holds. Infallible.
    fn release(&mut self);
}

/// Opens container writers; one writer per output file.
pub trait ContainerFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, WriterError>;

    /// File extension for the given codec, without the dot.
    fn extension(&self, codec: VideoCodec) -> &'static str;
}

/// Writes an Annex-B elementary stream: the codec configuration followed by
/// the packets back to back. Timestamps are not stored; players derive them
/// from the frame rate.
pub struct ElementaryStreamWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    has_track: bool,
    started: bool,
    packets_written: u64,
    bytes_written: u64,
}

impl ElementaryStreamWriter {
    pub fn create(path: &Path) -> Result<Self, WriterError> {
        let file = File::create(path).map_err(|e| WriterError::io(path, e))?;
        debug!("[writer] opened elementary stream {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::with_capacity(1024 * 1024, file)),
            has_track: false,
            started: false,
            packets_written: 0,
            bytes_written: 0,
        })
    }

    fn out(&mut self) -> Result<&mut BufWriter<File>, WriterError> {
        self.writer.as_mut().ok_or(WriterError::State("writer already released"))
    }

    fn put(&mut self, data: &[u8]) -> Result<(), WriterError> {
        let path = self.path.clone();
        self.out()?
            .write_all(data)
            .map_err(|e| WriterError::io(&path, e))?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }
}

impl ContainerWriter for ElementaryStreamWriter {
    fn add_track(&mut self, format: &TrackFormat) -> Result<TrackId, WriterError> {
        if self.has_track {
            return Err(WriterError::State("elementary stream holds a single track"));
        }
        if self.started {
            return Err(WriterError::State("add_track after start"));
        }
        self.has_track = true;
        // Parameter sets go first so a decoder can start at the first keyframe.
        self.put(&format.codec_config)?;
        Ok(TrackId(0))
    }

    fn start(&mut self) -> Result<(), WriterError> {
        if !self.has_track {
            return Err(WriterError::State("start without a track"));
        }
        self.started = true;
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: TrackId,
        data: &[u8],
        _flags: PacketFlags,
        _pts_usec: i64,
    ) -> Result<(), WriterError> {
        if !self.started {
            return Err(WriterError::State("write_sample before start"));
        }
        if track != TrackId(0) {
            return Err(WriterError::UnknownTrack(track.0));
        }
        self.put(data)?;
        self.packets_written += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), WriterError> {
        let path = self.path.clone();
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(|e| WriterError::io(&path, e))?;
        }
        if self.started {
            info!(
                "[writer] {}: {} packets, {} bytes",
                self.path.display(),
                self.packets_written,
                self.bytes_written
            );
        }
        self.started = false;
        Ok(())
    }

    fn release(&mut self) {
        self.writer = None;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ElementaryStreamFactory;

impl ContainerFactory for ElementaryStreamFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, WriterError> {
        Ok(Box::new(ElementaryStreamWriter::create(path)?))
    }

    fn extension(&self, codec: VideoCodec) -> &'static str {
        codec.elementary_extension()
    }
}
