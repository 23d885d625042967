//! The encoder worker: a single blocking task that owns the ring buffer.
//!
//! Every ring access happens on the worker's own thread, one command at a
//! time, in the order the commands were sent. That is the only thing keeping
//! the ring consistent; [`RingBuffer`] itself has no locks.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::log::{debug, error, info, trace, warn};
use common::tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use common::tokio::sync::watch;
use common::tokio::task::JoinHandle;
use common::{ConfigError, EncodedPacket, EncoderOutput, SessionConfig, TrackFormat};
use storage::{RingBuffer, RingError};

use crate::controller::{Mode, RecordError, RecordingController, RecordingSummary, RouteError, Routed};
use crate::mux::MuxSession;
use crate::status::{SaveStatus, StatusEvent};
use crate::writer::{ContainerFactory, WriterError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// The encoder has queued new output.
    FrameAvailable,
    SaveVideo(PathBuf),
    StartRecording(PathBuf),
    StopRecording,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("encoder worker is no longer accepting commands")]
    Closed,

    #[error("encoder worker task failed: {0}")]
    Join(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ring(#[from] RingError),
}

pub struct EncoderWorker {
    ring: RingBuffer,
    outputs: UnboundedReceiver<EncoderOutput>,
    format: TrackFormat,
    controller: RecordingController,
    factory: Arc<dyn ContainerFactory>,
    events: UnboundedSender<StatusEvent>,
    frames: u64,
    status_interval: u64,
    state: watch::Sender<WorkerState>,
}

impl EncoderWorker {
    pub fn new(
        config: &SessionConfig,
        factory: Arc<dyn ContainerFactory>,
        outputs: UnboundedReceiver<EncoderOutput>,
        events: UnboundedSender<StatusEvent>,
    ) -> Result<Self, WorkerError> {
        config.validate()?;
        let ring = RingBuffer::new(config.bit_rate(), config.frame_rate, config.span_secs)?;
        let (state, _) = watch::channel(WorkerState::Idle);
        Ok(Self {
            ring,
            outputs,
            format: config.track_format(),
            controller: RecordingController::new(config.preroll),
            factory,
            events,
            frames: 0,
            status_interval: config.status_interval_frames.max(1) as u64,
            state,
        })
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn format(&self) -> &TrackFormat {
        &self.format
    }

    pub fn mode(&self) -> Mode {
        self.controller.mode()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Runs one command to completion. `Break` means the worker must exit.
    pub fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::FrameAvailable => return self.drain_encoder(),
            Command::SaveVideo(path) => {
                let status = self.save_video(&path);
                self.emit(StatusEvent::SaveComplete { path, status });
            }
            Command::StartRecording(path) => self.start_recording(path),
            Command::StopRecording => self.stop_recording(),
            Command::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        self.state.send_replace(WorkerState::Running);
        info!(
            "[worker] running: arena={} bytes, index={} slots",
            self.ring.arena_capacity(),
            self.ring.index_capacity()
        );

        while let Some(command) = commands.blocking_recv() {
            trace!("[worker] {:?}", command);
            if self.handle(command).is_break() {
                break;
            }
        }

        self.state.send_replace(WorkerState::ShuttingDown);
        commands.close();
        let mut discarded = 0;
        while commands.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("[worker] discarded {} commands queued after shutdown", discarded);
        }

        self.finish();
        self.state.send_replace(WorkerState::Stopped);
    }

    fn drain_encoder(&mut self) -> ControlFlow<()> {
        while let Ok(output) = self.outputs.try_recv() {
            match output {
                EncoderOutput::FormatChanged(format) => {
                    info!(
                        "[worker] output format changed: {}x{} @ {} fps",
                        format.width, format.height, format.frame_rate
                    );
                    self.format = format;
                }
                EncoderOutput::Error(message) => {
                    error!("[worker] encoder error: {}", message);
                    self.emit(StatusEvent::EncoderError(message));
                }
                EncoderOutput::Packet(packet) => {
                    if packet.flags.is_codec_config() {
                        debug!("[worker] codec config updated ({} bytes)", packet.data.len());
                        self.format.codec_config = packet.data;
                        continue;
                    }
                    let end_of_stream = packet.flags.is_end_of_stream();
                    if !packet.data.is_empty() {
                        if let Err(e) = self.route(&packet) {
                            error!("[worker] {}", e);
                            self.emit(StatusEvent::Fatal(e.to_string()));
                            return ControlFlow::Break(());
                        }
                    }
                    if end_of_stream {
                        warn!("[worker] encoder reached end of stream");
                        break;
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn route(&mut self, packet: &EncodedPacket) -> Result<(), RingError> {
        let routed = match self.controller.accept(packet, &mut self.ring) {
            Ok(routed) => routed,
            Err(RouteError {
                interrupted,
                source,
            }) => {
                if let Some(summary) = interrupted {
                    self.emit_stopped(summary);
                }
                return Err(source);
            }
        };
        match routed {
            Routed::Buffered { evicted } if evicted > 0 => {
                trace!("[worker] evicted {} packets", evicted);
            }
            Routed::Interrupted { summary, error } => {
                warn!(
                    "[worker] recording {} interrupted: {}",
                    summary.path.display(),
                    error
                );
                self.emit_stopped(summary);
            }
            _ => {}
        }

        self.frames += 1;
        if self.frames % self.status_interval == 0 {
            let span_usec = self.ring.time_span_usec();
            debug!(
                "[worker] buffered {} packets, {} bytes, {} us",
                self.ring.len(),
                self.ring.occupied_bytes(),
                span_usec
            );
            self.emit(StatusEvent::BufferStatus { span_usec });
        }
        Ok(())
    }

    fn save_video(&mut self, path: &Path) -> SaveStatus {
        let Some(first) = self.ring.find_first_playable() else {
            warn!("[worker] no sync frame buffered, nothing saved");
            return SaveStatus::NoSyncFrame;
        };

        let written = MuxSession::open(self.factory.as_ref(), path, &self.format).and_then(
            |mut session| -> Result<u64, WriterError> {
                session.write_ring(&self.ring, first)?;
                session.finish()
            },
        );
        match written {
            Ok(samples) => {
                info!("[worker] saved {} packets to {}", samples, path.display());
                SaveStatus::Ok
            }
            Err(e) => {
                error!("[worker] failed to save {}: {}", path.display(), e);
                SaveStatus::WriteError
            }
        }
    }

    fn start_recording(&mut self, path: PathBuf) {
        match self
            .controller
            .start(self.factory.as_ref(), &path, &self.format, &self.ring)
        {
            Ok(preroll_packets) => self.emit(StatusEvent::RecordingStarted {
                path,
                preroll_packets,
            }),
            Err(e) => {
                error!("[worker] cannot record to {}: {}", path.display(), e);
                self.emit(StatusEvent::RecordingFailed {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn stop_recording(&mut self) {
        match self.controller.stop() {
            Ok(summary) => self.emit_stopped(summary),
            Err(RecordError::NotRecording) => warn!("[worker] stop requested while not recording"),
            Err(e) => error!("[worker] {}", e),
        }
    }

    fn finish(&mut self) {
        if self.controller.mode() == Mode::Recording {
            if let Ok(summary) = self.controller.stop() {
                self.emit_stopped(summary);
            }
        }
        info!("[worker] stopped with {} packets buffered", self.ring.len());
    }

    fn emit_stopped(&self, summary: RecordingSummary) {
        self.emit(StatusEvent::RecordingStopped {
            path: summary.path,
            samples: summary.samples,
            status: summary.status,
        });
    }

    fn emit(&self, event: StatusEvent) {
        if self.events.send(event).is_err() {
            debug!("[worker] status receiver dropped");
        }
    }
}

/// Starts a worker on tokio's blocking pool.
///
/// Returns the command handle, the producer the encoder feeds, and the status
/// event stream. Must be called from within a tokio runtime.
pub fn spawn(
    config: &SessionConfig,
    factory: Arc<dyn ContainerFactory>,
) -> Result<(EncoderHandle, FrameProducer, UnboundedReceiver<StatusEvent>), WorkerError> {
    let (outputs_tx, outputs_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let worker = EncoderWorker::new(config, factory, outputs_rx, events_tx)?;
    let state = worker.subscribe_state();
    let task = common::tokio::task::spawn_blocking(move || worker.run(commands_rx));

    let handle = EncoderHandle {
        commands: commands_tx.clone(),
        state,
        task: Some(task),
    };
    let producer = FrameProducer {
        outputs: outputs_tx,
        commands: commands_tx,
    };
    Ok((handle, producer, events_rx))
}

/// Sends commands to a running worker.
pub struct EncoderHandle {
    commands: UnboundedSender<Command>,
    state: watch::Receiver<WorkerState>,
    task: Option<JoinHandle<()>>,
}

impl EncoderHandle {
    pub fn frame_available(&self) -> Result<(), WorkerError> {
        self.send(Command::FrameAvailable)
    }

    pub fn save_video(&self, path: impl Into<PathBuf>) -> Result<(), WorkerError> {
        self.send(Command::SaveVideo(path.into()))
    }

    pub fn start_recording(&self, path: impl Into<PathBuf>) -> Result<(), WorkerError> {
        self.send(Command::StartRecording(path.into()))
    }

    pub fn stop_recording(&self) -> Result<(), WorkerError> {
        self.send(Command::StopRecording)
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Queues `Shutdown` behind everything already sent and waits for the
    /// worker to exit.
    pub async fn shutdown(mut self) -> Result<(), WorkerError> {
        if self.send(Command::Shutdown).is_err() {
            debug!("[worker] already stopped");
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| WorkerError::Join(e.to_string()))?;
        }
        Ok(())
    }

    fn send(&self, command: Command) -> Result<(), WorkerError> {
        self.commands.send(command).map_err(|_| WorkerError::Closed)
    }
}

/// Encoder side of the worker: queues output, then wakes the worker.
#[derive(Clone)]
pub struct FrameProducer {
    outputs: UnboundedSender<EncoderOutput>,
    commands: UnboundedSender<Command>,
}

impl FrameProducer {
    pub fn submit(&self, output: EncoderOutput) -> Result<(), WorkerError> {
        self.outputs.send(output).map_err(|_| WorkerError::Closed)?;
        self.commands
            .send(Command::FrameAvailable)
            .map_err(|_| WorkerError::Closed)
    }

    pub fn submit_packet(&self, packet: EncodedPacket) -> Result<(), WorkerError> {
        self.submit(EncoderOutput::Packet(packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::testing::{Call, MemoryFactory};
    use common::{PacketFlags, PrerollPolicy, VideoCodec};

    fn config(preroll: PrerollPolicy) -> SessionConfig {
        // 4000 arena bytes, 16 index slots.
        SessionConfig {
            width: 320,
            height: 240,
            bit_rate: Some(16_000),
            frame_rate: 4,
            span_secs: 2,
            keyframe_interval_secs: 1,
            codec: VideoCodec::H264,
            preroll,
            status_interval_frames: 4,
        }
    }

    struct Harness {
        worker: EncoderWorker,
        outputs: UnboundedSender<EncoderOutput>,
        events: UnboundedReceiver<StatusEvent>,
        factory: MemoryFactory,
    }

    impl Harness {
        fn new(factory: MemoryFactory, preroll: PrerollPolicy) -> Self {
            let (outputs, outputs_rx) = mpsc::unbounded_channel();
            let (events_tx, events) = mpsc::unbounded_channel();
            let worker = EncoderWorker::new(
                &config(preroll),
                Arc::new(factory.clone()),
                outputs_rx,
                events_tx,
            )
            .unwrap();
            Self {
                worker,
                outputs,
                events,
                factory,
            }
        }

        fn output(&mut self, output: EncoderOutput) -> ControlFlow<()> {
            self.outputs.send(output).unwrap();
            self.worker.handle(Command::FrameAvailable)
        }

        fn packet(&mut self, pts_usec: i64, key: bool) {
            let flags = if key {
                PacketFlags::KEY_FRAME
            } else {
                PacketFlags::NONE
            };
            let data = vec![(pts_usec / 1000) as u8; 100];
            assert!(
                self.output(EncoderOutput::Packet(EncodedPacket::new(data, flags, pts_usec)))
                    .is_continue()
            );
        }

        fn events(&mut self) -> Vec<StatusEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let (_, outputs) = mpsc::unbounded_channel();
        let (events, _) = mpsc::unbounded_channel();
        let mut bad = config(PrerollPolicy::Prepend);
        bad.span_secs = 1;
        let result = EncoderWorker::new(&bad, Arc::new(MemoryFactory::new()), outputs, events);
        assert!(matches!(
            result,
            Err(WorkerError::Config(ConfigError::SpanTooShort { .. }))
        ));
    }

    #[test]
    fn save_before_keyframe_reports_no_sync_frame() {
        let mut h = Harness::new(MemoryFactory::new(), PrerollPolicy::Prepend);
        h.packet(0, false);
        h.packet(1000, false);

        let path = PathBuf::from("/mem/early");
        assert!(h.worker.handle(Command::SaveVideo(path.clone())).is_continue());
        assert_eq!(
            h.events(),
            vec![StatusEvent::SaveComplete {
                path,
                status: SaveStatus::NoSyncFrame
            }]
        );
        assert_eq!(h.factory.file_count(), 0);
    }

    #[test]
    fn repeated_saves_write_identical_files() {
        let mut h = Harness::new(MemoryFactory::new(), PrerollPolicy::Prepend);
        h.packet(0, false);
        h.packet(1000, true);
        h.packet(2000, false);
        h.packet(3000, false);
        h.events();

        let a = PathBuf::from("/mem/a");
        let b = PathBuf::from("/mem/b");
        let _ = h.worker.handle(Command::SaveVideo(a.clone()));
        let _ = h.worker.handle(Command::SaveVideo(b.clone()));

        let first = h.factory.file(&a).unwrap();
        let second = h.factory.file(&b).unwrap();
        assert_eq!(first.pts(), vec![1000, 2000, 3000]);
        assert_eq!(first.samples, second.samples);
        assert_eq!(first.calls, second.calls);
        assert_eq!(h.worker.ring().len(), 4);
        assert_eq!(
            h.events(),
            vec![
                StatusEvent::SaveComplete {
                    path: a,
                    status: SaveStatus::Ok
                },
                StatusEvent::SaveComplete {
                    path: b,
                    status: SaveStatus::Ok
                },
            ]
        );
    }

    #[test]
    fn failed_save_still_finalizes_and_keeps_buffer() {
        let mut h = Harness::new(MemoryFactory::failing_at(1), PrerollPolicy::Prepend);
        h.packet(0, true);
        h.packet(1000, false);
        h.packet(2000, false);

        let path = PathBuf::from("/mem/fail");
        let _ = h.worker.handle(Command::SaveVideo(path.clone()));

        let file = h.factory.file(&path).unwrap();
        assert_eq!(file.pts(), vec![0]);
        assert_eq!(file.count(&Call::Stop), 1);
        assert_eq!(file.count(&Call::Release), 1);
        assert_eq!(h.worker.ring().len(), 3);
        assert!(h.events().contains(&StatusEvent::SaveComplete {
            path,
            status: SaveStatus::WriteError
        }));
    }

    #[test]
    fn codec_config_updates_format_instead_of_ring() {
        let mut h = Harness::new(MemoryFactory::new(), PrerollPolicy::Prepend);
        let sps_pps = vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xce];
        let _ = h.output(EncoderOutput::Packet(EncodedPacket::new(
            sps_pps.clone(),
            PacketFlags::CODEC_CONFIG,
            0,
        )));
        h.packet(0, true);
        assert_eq!(h.worker.ring().len(), 1);
        assert_eq!(h.worker.format().codec_config, sps_pps);

        let path = PathBuf::from("/mem/config");
        let _ = h.worker.handle(Command::SaveVideo(path.clone()));
        let file = h.factory.file(&path).unwrap();
        assert_eq!(file.format.unwrap().codec_config, sps_pps);
        assert_eq!(file.samples.len(), 1);
    }

    #[test]
    fn format_change_and_encoder_errors() {
        let mut h = Harness::new(MemoryFactory::new(), PrerollPolicy::Prepend);
        let mut format = h.worker.format().clone();
        format.width = 640;
        format.height = 480;
        let _ = h.output(EncoderOutput::FormatChanged(format.clone()));
        assert_eq!(h.worker.format(), &format);

        let _ = h.output(EncoderOutput::Error("codec reset".into()));
        assert_eq!(
            h.events(),
            vec![StatusEvent::EncoderError("codec reset".into())]
        );
    }

    #[test]
    fn empty_payloads_are_not_buffered() {
        let mut h = Harness::new(MemoryFactory::new(), PrerollPolicy::Prepend);
        let _ = h.output(EncoderOutput::Packet(EncodedPacket::new(
            Vec::new(),
            PacketFlags::KEY_FRAME,
            0,
        )));
        assert!(h.worker.ring().is_empty());
    }

    #[test]
    fn end_of_stream_stops_the_drain() {
        let mut h = Harness::new(MemoryFactory::new(), PrerollPolicy::Prepend);
        h.outputs
            .send(EncoderOutput::Packet(EncodedPacket::new(
                vec![1; 10],
                PacketFlags::KEY_FRAME | PacketFlags::END_OF_STREAM,
                0,
            )))
            .unwrap();
        h.outputs
            .send(EncoderOutput::Packet(EncodedPacket::new(
                vec![2; 10],
                PacketFlags::NONE,
                1000,
            )))
            .unwrap();
        let _ = h.worker.handle(Command::FrameAvailable);
        assert_eq!(h.worker.ring().len(), 1);
        // The rest is picked up by the next wake-up.
        let _ = h.worker.handle(Command::FrameAvailable);
        assert_eq!(h.worker.ring().len(), 2);
    }

    #[test]
    fn reports_buffer_span_every_n_frames() {
        let mut h = Harness::new(MemoryFactory::new(), PrerollPolicy::Prepend);
        for i in 0..9 {
            h.packet(i * 250_000, i % 4 == 0);
        }
        assert_eq!(
            h.events(),
            vec![
                StatusEvent::BufferStatus { span_usec: 750_000 },
                StatusEvent::BufferStatus {
                    span_usec: 1_750_000
                },
            ]
        );
    }

    #[test]
    fn passthrough_recording_round_trip() {
        let mut h = Harness::new(MemoryFactory::new(), PrerollPolicy::Prepend);
        h.packet(0, true);
        h.packet(1000, false);

        let path = PathBuf::from("/mem/rec");
        let _ = h.worker.handle(Command::StartRecording(path.clone()));
        assert_eq!(h.worker.mode(), Mode::Recording);
        h.packet(2000, false);
        h.packet(3000, true);
        let _ = h.worker.handle(Command::StopRecording);
        assert_eq!(h.worker.mode(), Mode::Buffering);

        assert_eq!(h.worker.ring().len(), 2);
        assert_eq!(
            h.factory.file(&path).unwrap().pts(),
            vec![0, 1000, 2000, 3000]
        );
        assert_eq!(
            h.events(),
            vec![
                StatusEvent::RecordingStarted {
                    path: path.clone(),
                    preroll_packets: 2
                },
                StatusEvent::BufferStatus { span_usec: 1000 },
                StatusEvent::RecordingStopped {
                    path,
                    samples: 4,
                    status: SaveStatus::Ok
                },
            ]
        );
    }

    #[test]
    fn failed_start_reports_and_keeps_buffering() {
        let factory = MemoryFactory::failing_open();
        let mut h = Harness::new(factory, PrerollPolicy::Prepend);
        let path = PathBuf::from("/mem/ro");
        let _ = h.worker.handle(Command::StartRecording(path.clone()));
        assert_eq!(h.worker.mode(), Mode::Buffering);
        assert!(matches!(
            h.events().as_slice(),
            [StatusEvent::RecordingFailed { path: p, .. }] if *p == path
        ));
        h.packet(0, true);
        assert_eq!(h.worker.ring().len(), 1);
    }

    #[test]
    fn passthrough_write_failure_falls_back_to_buffering() {
        let mut h = Harness::new(MemoryFactory::failing_at(1), PrerollPolicy::Discard);
        let path = PathBuf::from("/mem/broken");
        let _ = h.worker.handle(Command::StartRecording(path.clone()));
        h.packet(0, true);
        h.packet(1000, false);

        assert_eq!(h.worker.mode(), Mode::Buffering);
        assert_eq!(h.worker.ring().len(), 1);
        assert!(h.events().contains(&StatusEvent::RecordingStopped {
            path,
            samples: 1,
            status: SaveStatus::WriteError
        }));
    }

    #[test]
    fn oversized_packet_is_fatal() {
        let mut h = Harness::new(MemoryFactory::new(), PrerollPolicy::Prepend);
        let flow = h.output(EncoderOutput::Packet(EncodedPacket::new(
            vec![0; 5000],
            PacketFlags::KEY_FRAME,
            0,
        )));
        assert!(flow.is_break());
        assert!(matches!(h.events().as_slice(), [StatusEvent::Fatal(_)]));
    }

    #[test]
    fn oversized_packet_while_recording_still_reports_the_stop() {
        let mut h = Harness::new(MemoryFactory::failing_at(1), PrerollPolicy::Discard);
        let path = PathBuf::from("/mem/huge");
        let _ = h.worker.handle(Command::StartRecording(path.clone()));
        h.packet(0, true);
        let flow = h.output(EncoderOutput::Packet(EncodedPacket::new(
            vec![0; 5000],
            PacketFlags::NONE,
            1000,
        )));

        assert!(flow.is_break());
        let events = h.events();
        assert!(events.contains(&StatusEvent::RecordingStopped {
            path,
            samples: 1,
            status: SaveStatus::WriteError
        }));
        assert!(matches!(events.last(), Some(StatusEvent::Fatal(_))));
    }

    #[test]
    fn shutdown_finalizes_active_recording() {
        let mut h = Harness::new(MemoryFactory::new(), PrerollPolicy::Prepend);
        h.packet(0, true);
        let path = PathBuf::from("/mem/open");
        let _ = h.worker.handle(Command::StartRecording(path.clone()));
        h.packet(1000, false);

        assert!(h.worker.handle(Command::Shutdown).is_break());
        h.worker.finish();

        let file = h.factory.file(&path).unwrap();
        assert_eq!(file.count(&Call::Stop), 1);
        assert_eq!(file.count(&Call::Release), 1);
        assert!(h.events().contains(&StatusEvent::RecordingStopped {
            path,
            samples: 2,
            status: SaveStatus::Ok
        }));
    }

    #[tokio::test]
    async fn spawned_worker_processes_commands_in_order() {
        let factory = MemoryFactory::new();
        let (handle, producer, mut events) =
            spawn(&config(PrerollPolicy::Prepend), Arc::new(factory.clone())).unwrap();
        let mut state = handle.subscribe_state();

        for i in 0..3 {
            let flags = if i == 0 {
                PacketFlags::KEY_FRAME
            } else {
                PacketFlags::NONE
            };
            producer
                .submit_packet(EncodedPacket::new(vec![i as u8; 50], flags, i * 1000))
                .unwrap();
        }
        let path = PathBuf::from("/mem/spawned");
        handle.save_video(path.clone()).unwrap();
        handle.shutdown().await.unwrap();

        assert_eq!(*state.borrow_and_update(), WorkerState::Stopped);
        assert_eq!(
            events.recv().await,
            Some(StatusEvent::SaveComplete {
                path: path.clone(),
                status: SaveStatus::Ok
            })
        );
        assert_eq!(factory.file(&path).unwrap().pts(), vec![0, 1000, 2000]);

        assert!(matches!(
            producer.submit_packet(EncodedPacket::new(vec![1], PacketFlags::NONE, 3000)),
            Err(WorkerError::Closed)
        ));
    }
}
