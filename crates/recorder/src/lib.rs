use std::process::Command;
use std::sync::Arc;

use common::RecorderConfig;
use common::anyhow::{Result, bail};

pub mod capture;
pub mod controller;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_muxer;
pub mod h264;
pub mod mux;
pub mod recorder;
pub mod replay;
pub mod status;
pub mod worker;
pub mod writer;

pub use controller::{Mode, RecordError, RecordingController, RecordingSummary, RouteError, Routed};
pub use recorder::Recorder;
pub use replay::ReplayRecorder;
pub use status::{SaveStatus, StatusEvent};
pub use worker::{Command as WorkerCommand, EncoderHandle, EncoderWorker, FrameProducer, WorkerError, WorkerState};
pub use writer::{ContainerFactory, ContainerWriter, ElementaryStreamFactory, TrackId, WriterError};

pub fn check_ffmpeg_installed(ffmpeg_path: &str) -> Result<()> {
    if Command::new(ffmpeg_path).arg("-version").output().is_err() {
        bail!(
            "{} not found. Please install ffmpeg and ensure it is available in your PATH.",
            ffmpeg_path
        );
    }
    Ok(())
}

/// MP4 through libavformat when built with `ffmpeg`, a raw elementary
/// stream otherwise.
pub fn default_factory() -> Arc<dyn ContainerFactory> {
    #[cfg(feature = "ffmpeg")]
    {
        Arc::new(ffmpeg_muxer::FfmpegMuxerFactory)
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Arc::new(ElementaryStreamFactory)
    }
}

/// Factory to create the recorder for the given configuration.
pub fn create_recorder(config: RecorderConfig) -> Box<dyn Recorder> {
    Box::new(ReplayRecorder::new(config, default_factory()))
}
