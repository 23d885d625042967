use std::process::Stdio;

use common::anyhow::{Context, Result, bail};
use common::log::{debug, error, info, warn};
use common::tokio;
use common::tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use common::tokio::process::{Child, ChildStdout, Command};
use common::tokio::task::JoinHandle;
use common::{CaptureConfig, EncodedPacket, PacketFlags, SessionConfig, VideoCodec};

use crate::h264::{AccessUnit, H264Parser};
use crate::worker::FrameProducer;

/// ffmpeg input format and input name for the current OS.
pub fn default_input() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("gdigrab", "desktop")
    } else if cfg!(target_os = "macos") {
        ("avfoundation", "0")
    } else {
        ("x11grab", ":0.0")
    }
}

/// Presentation time of the `frame`-th picture at `frame_rate`.
pub fn frame_pts(frame: u64, frame_rate: u32) -> i64 {
    (frame * 1_000_000 / frame_rate.max(1) as u64) as i64
}

/// Screen capture through the ffmpeg CLI.
///
/// ffmpeg grabs the screen, encodes with libx264 and writes a raw H.264
/// stream to stdout. The stream is cut into access units, stamped from the
/// frame counter and handed to the encoder worker.
pub struct FfmpegCapture {
    session: SessionConfig,
    capture: CaptureConfig,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
}

impl FfmpegCapture {
    pub fn new(session: &SessionConfig, capture: &CaptureConfig) -> Self {
        Self {
            session: session.clone(),
            capture: capture.clone(),
            child: None,
            reader: None,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let (default_format, default_input) = default_input();
        let input_format = self
            .capture
            .input_format
            .clone()
            .unwrap_or_else(|| default_format.to_string());
        let input = self
            .capture
            .input
            .clone()
            .unwrap_or_else(|| default_input.to_string());
        let frame_rate = self.session.frame_rate.to_string();
        let video_size = format!("{}x{}", self.session.width, self.session.height);
        let bit_rate = self.session.bit_rate().to_string();
        let gop = self.session.keyframe_interval_frames().to_string();

        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            input_format.as_str(),
            "-framerate",
            frame_rate.as_str(),
            "-video_size",
            video_size.as_str(),
            "-i",
            input.as_str(),
            "-c:v",
            "libx264",
            "-preset",
            self.capture.preset.as_str(),
            "-tune",
            "zerolatency",
            "-pix_fmt",
            "yuv420p",
            "-b:v",
            bit_rate.as_str(),
            "-g",
            gop.as_str(),
            "-keyint_min",
            gop.as_str(),
            "-bf",
            "0",
            "-f",
            "h264",
            "-",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub async fn start(&mut self, producer: FrameProducer) -> Result<()> {
        if self.child.is_some() {
            bail!("capture already running");
        }
        if self.session.codec != VideoCodec::H264 {
            bail!("ffmpeg capture produces H.264 only, not {:?}", self.session.codec);
        }
        crate::check_ffmpeg_installed(&self.capture.ffmpeg_path)?;

        let args = self.args();
        info!("[capture] starting {} with args: {:?}", self.capture.ffmpeg_path, args);
        let mut child = Command::new(&self.capture.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.capture.ffmpeg_path))?;

        let stdout = child.stdout.take().context("ffmpeg stdout not captured")?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("[capture] ffmpeg: {}", line);
                }
            });
        }

        let frame_rate = self.session.frame_rate;
        self.reader = Some(tokio::spawn(read_stream(stdout, producer, frame_rate)));
        self.child = Some(child);
        Ok(())
    }

    /// Asks ffmpeg to quit, kills it after a grace period, and waits for the
    /// reader to hand over the tail of the stream.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            warn!("[capture] stop(): no child to stop");
            return;
        };

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(b"q\n").await {
                Ok(_) => debug!("[capture] sent 'q' to ffmpeg"),
                Err(e) => error!("[capture] failed to send 'q': {:?}", e),
            }
            let _ = stdin.shutdown().await;
        }

        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

        match child.try_wait() {
            Ok(Some(status)) => info!("[capture] ffmpeg exited: {}", status),
            Ok(None) => {
                warn!("[capture] ffmpeg still running; killing now");
                if let Err(e) = child.kill().await {
                    error!("[capture] kill failed: {:?}", e);
                }
            }
            Err(e) => error!("[capture] try_wait() failed: {:?}", e),
        }

        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                error!("[capture] reader task failed: {}", e);
            }
        }
    }
}

async fn read_stream(mut stdout: ChildStdout, producer: FrameProducer, frame_rate: u32) {
    let mut parser = H264Parser::new();
    let mut stamper = Stamper::new(frame_rate);
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        match stdout.read(&mut buffer).await {
            Ok(0) => {
                info!("[capture] ffmpeg stream ended after {} frames", stamper.frames);
                break;
            }
            Ok(n) => {
                if !stamper.submit_all(&producer, parser.push(&buffer[..n])) {
                    warn!("[capture] worker stopped, dropping stream");
                    return;
                }
            }
            Err(e) => {
                error!("[capture] error reading from ffmpeg: {:?}", e);
                break;
            }
        }
    }

    stamper.submit_all(&producer, parser.flush());
    let end = EncodedPacket::new(Vec::new(), PacketFlags::END_OF_STREAM, stamper.next_pts());
    let _ = producer.submit_packet(end);
}

/// Assigns timestamps from the frame counter.
struct Stamper {
    frame_rate: u32,
    frames: u64,
}

impl Stamper {
    fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate,
            frames: 0,
        }
    }

    fn next_pts(&self) -> i64 {
        frame_pts(self.frames, self.frame_rate)
    }

    fn stamp(&mut self, unit: AccessUnit) -> EncodedPacket {
        let pts = self.next_pts();
        if !unit.flags.is_codec_config() {
            self.frames += 1;
        }
        EncodedPacket::new(unit.data, unit.flags, pts)
    }

    /// Returns `false` once the worker is gone.
    fn submit_all(&mut self, producer: &FrameProducer, units: Vec<AccessUnit>) -> bool {
        for unit in units {
            if producer.submit_packet(self.stamp(unit)).is_err() {
                return false;
            }
        }
        true
    }
}
