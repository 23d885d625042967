use std::path::{Path, PathBuf};

use common::anyhow::Result;
use common::async_trait::async_trait;
use common::tokio::sync::mpsc::UnboundedReceiver;

use crate::status::StatusEvent;

/// An instant-replay recorder: keeps the last few seconds of video in memory,
/// writes them out on demand, and can switch to continuous recording.
///
/// `save`, `start_recording` and `stop_recording` only queue the request;
/// the outcome arrives later as a status event. Encoder output already queued
/// when a request is handled is buffered first, so it is part of the clip.
#[async_trait]
pub trait Recorder: Send {
    async fn start(&mut self) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
    async fn save(&self, final_output_path: &Path) -> Result<()>;
    async fn start_recording(&self, output_path: &Path) -> Result<()>;
    async fn stop_recording(&self) -> Result<()>;
    fn output_dir(&self) -> &Path;
    /// A fresh timestamped file name in the output directory.
    fn next_output_path(&self) -> PathBuf;
    /// Status events of the running session. Available once after `start`.
    fn take_events(&mut self) -> Option<UnboundedReceiver<StatusEvent>>;
}
