use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::anyhow::{Context, Result, anyhow};
use common::async_trait::async_trait;
use common::log::{info, warn};
use common::tokio;
use common::tokio::sync::mpsc::UnboundedReceiver;
use common::{RecorderConfig, timestamped_file_name};

use crate::capture::FfmpegCapture;
use crate::recorder::Recorder;
use crate::status::StatusEvent;
use crate::worker::{self, EncoderHandle, FrameProducer, WorkerState};
use crate::writer::ContainerFactory;

/// [`Recorder`] built from an ffmpeg screen capture feeding an encoder worker.
pub struct ReplayRecorder {
    config: RecorderConfig,
    factory: Arc<dyn ContainerFactory>,
    worker: Option<EncoderHandle>,
    capture: Option<FfmpegCapture>,
    events: Option<UnboundedReceiver<StatusEvent>>,
}

impl ReplayRecorder {
    pub fn new(config: RecorderConfig, factory: Arc<dyn ContainerFactory>) -> Self {
        Self {
            config,
            factory,
            worker: None,
            capture: None,
            events: None,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> Option<WorkerState> {
        self.worker.as_ref().map(EncoderHandle::state)
    }

    /// Starts the encoder worker without a capture source and returns the
    /// producer that feeds it.
    pub fn start_worker(&mut self) -> Result<FrameProducer> {
        if self.worker.is_some() {
            return Err(anyhow!("recorder already started"));
        }
        let (handle, producer, events) = worker::spawn(&self.config.session, self.factory.clone())
            .context("failed to start encoder worker")?;
        self.worker = Some(handle);
        self.events = Some(events);
        Ok(producer)
    }

    fn worker(&self) -> Result<&EncoderHandle> {
        self.worker
            .as_ref()
            .ok_or_else(|| anyhow!("recorder is not running"))
    }
}

#[async_trait]
impl Recorder for ReplayRecorder {
    async fn start(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create output directory {}",
                    self.config.output_dir.display()
                )
            })?;

        let producer = self.start_worker()?;
        let mut capture = FfmpegCapture::new(&self.config.session, &self.config.capture);
        if let Err(e) = capture.start(producer).await {
            if let Some(handle) = self.worker.take() {
                if let Err(join) = handle.shutdown().await {
                    warn!("[recorder] encoder worker did not shut down cleanly: {}", join);
                }
            }
            self.events = None;
            return Err(e);
        }
        self.capture = Some(capture);
        info!(
            "[recorder] buffering {}s into {}",
            self.config.session.span_secs,
            self.config.output_dir.display()
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut capture) = self.capture.take() {
            capture.stop().await;
        }
        match self.worker.take() {
            Some(handle) => handle
                .shutdown()
                .await
                .context("encoder worker did not shut down cleanly"),
            None => {
                warn!("[recorder] stop(): not running");
                Ok(())
            }
        }
    }

    async fn save(&self, final_output_path: &Path) -> Result<()> {
        info!("[recorder] saving replay buffer to {}", final_output_path.display());
        self.worker()?.save_video(final_output_path)?;
        Ok(())
    }

    async fn start_recording(&self, output_path: &Path) -> Result<()> {
        self.worker()?.start_recording(output_path)?;
        Ok(())
    }

    async fn stop_recording(&self) -> Result<()> {
        self.worker()?.stop_recording()?;
        Ok(())
    }

    fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    fn next_output_path(&self) -> PathBuf {
        let extension = self.factory.extension(self.config.session.codec);
        self.config
            .output_dir
            .join(timestamped_file_name(extension))
    }

    fn take_events(&mut self) -> Option<UnboundedReceiver<StatusEvent>> {
        self.events.take()
    }
}
