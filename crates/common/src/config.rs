use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::packet::{TrackFormat, VideoCodec};

/// Configuration rejected before a session starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("requested time span is too short: {span_secs}s vs. {}s", .keyframe_interval_secs * 2)]
    SpanTooShort {
        span_secs: u32,
        keyframe_interval_secs: u32,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// What happens to the buffered history when passthrough recording starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrerollPolicy {
    /// Write the buffered span (from its first keyframe) ahead of live packets.
    #[default]
    Prepend,
    /// Start the file at the first live keyframe.
    Discard,
}

/// Parameters fixed for the lifetime of one buffering session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    /// Bits per second. Picked from [`recommended_bit_rate`] when absent.
    #[serde(default)]
    pub bit_rate: Option<u32>,
    pub frame_rate: u32,
    pub span_secs: u32,
    #[serde(default = "default_keyframe_interval")]
    pub keyframe_interval_secs: u32,
    #[serde(default)]
    pub codec: VideoCodec,
    #[serde(default)]
    pub preroll: PrerollPolicy,
    /// Buffer status is reported every this many drained packets.
    #[serde(default = "default_status_interval")]
    pub status_interval_frames: u32,
}

fn default_keyframe_interval() -> u32 {
    1
}

fn default_status_interval() -> u32 {
    10
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            bit_rate: None,
            frame_rate: 30,
            span_secs: 30,
            keyframe_interval_secs: default_keyframe_interval(),
            codec: VideoCodec::H264,
            preroll: PrerollPolicy::Prepend,
            status_interval_frames: default_status_interval(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Zero("frame size"));
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::Zero("frame rate"));
        }
        if self.span_secs == 0 {
            return Err(ConfigError::Zero("span"));
        }
        if self.keyframe_interval_secs == 0 {
            return Err(ConfigError::Zero("keyframe interval"));
        }
        if self.bit_rate() == 0 {
            return Err(ConfigError::Zero("bit rate"));
        }
        // A span shorter than two GOPs can end up holding no complete GOP at all.
        if self.span_secs < self.keyframe_interval_secs * 2 {
            return Err(ConfigError::SpanTooShort {
                span_secs: self.span_secs,
                keyframe_interval_secs: self.keyframe_interval_secs,
            });
        }
        if self.arena_bytes() == 0 {
            return Err(ConfigError::Zero("buffer size"));
        }
        Ok(())
    }

    pub fn bit_rate(&self) -> u32 {
        self.bit_rate
            .unwrap_or_else(|| recommended_bit_rate(self.height, self.frame_rate))
    }

    /// Size of the packet arena: exactly `span_secs` of video at `bit_rate`.
    pub fn arena_bytes(&self) -> usize {
        (self.bit_rate() as u64 * self.span_secs as u64 / 8) as usize
    }

    /// Metadata slots, twice the expected packet count.
    pub fn index_slots(&self) -> usize {
        self.frame_rate as usize * self.span_secs as usize * 2
    }

    pub fn keyframe_interval_frames(&self) -> u32 {
        self.frame_rate * self.keyframe_interval_secs
    }

    /// Track format before the encoder has reported its codec configuration.
    pub fn track_format(&self) -> TrackFormat {
        TrackFormat {
            codec: self.codec,
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            bit_rate: self.bit_rate(),
            codec_config: Vec::new(),
        }
    }
}

/// Bit rate preset by vertical resolution and frame rate.
///
/// | height | 30 fps | 60 fps |
/// |--------|--------|--------|
/// | 720    | 6 M    | 10 M   |
/// | 1080   | 10 M   | 15 M   |
/// | 1440   | 20 M   | 30 M   |
/// | 2160   | 56 M   | 85 M   |
pub fn recommended_bit_rate(height: u32, frame_rate: u32) -> u32 {
    let high_fps = frame_rate > 30;
    match (height, high_fps) {
        (0..=720, false) => 6_000_000,
        (0..=720, true) => 10_000_000,
        (721..=1080, false) => 10_000_000,
        (721..=1080, true) => 15_000_000,
        (1081..=1440, false) => 20_000_000,
        (1081..=1440, true) => 30_000_000,
        (_, false) => 56_000_000,
        (_, true) => 85_000_000,
    }
}

/// How the ffmpeg capture process is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// ffmpeg input format (`x11grab`, `gdigrab`, `avfoundation`, `v4l2`...).
    /// Chosen per OS when absent.
    #[serde(default)]
    pub input_format: Option<String>,
    /// ffmpeg input name. Chosen per OS when absent.
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default = "default_preset")]
    pub preset: String,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_preset() -> String {
    "ultrafast".to_string()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            input_format: None,
            input: None,
            preset: default_preset(),
        }
    }
}

/// Top level recorder configuration, usually read from a toml file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub capture: CaptureConfig,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("recordings")
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            output_dir: default_output_dir(),
            capture: CaptureConfig::default(),
        }
    }
}

impl RecorderConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: RecorderConfig = toml::from_str(text)?;
        config.session.validate()?;
        Ok(config)
    }
}

/// `YYYYMMDD_HHMMSS.<ext>` for the current local time.
pub fn timestamped_file_name(extension: &str) -> String {
    format!(
        "{}.{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        extension
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(span_secs: u32, keyframe_interval_secs: u32) -> SessionConfig {
        SessionConfig {
            span_secs,
            keyframe_interval_secs,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn rejects_span_shorter_than_two_keyframe_intervals() {
        let err = session(1, 1).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::SpanTooShort {
                span_secs: 1,
                keyframe_interval_secs: 1
            }
        ));
        assert!(session(5, 3).validate().is_err());
    }

    #[test]
    fn accepts_span_of_exactly_two_intervals() {
        assert!(session(2, 1).validate().is_ok());
        assert!(session(30, 1).validate().is_ok());
    }

    #[test]
    fn rejects_zero_rates() {
        let mut config = SessionConfig::default();
        config.frame_rate = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Zero(_))));

        let mut config = SessionConfig::default();
        config.bit_rate = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::Zero(_))));
    }

    #[test]
    fn derives_capacities_from_rates() {
        let config = SessionConfig {
            bit_rate: Some(6_000_000),
            frame_rate: 30,
            span_secs: 30,
            ..SessionConfig::default()
        };
        assert_eq!(config.arena_bytes(), 22_500_000);
        assert_eq!(config.index_slots(), 1800);
        assert_eq!(config.keyframe_interval_frames(), 30);
    }

    #[test]
    fn bit_rate_falls_back_to_preset() {
        let config = SessionConfig {
            height: 720,
            frame_rate: 60,
            bit_rate: None,
            ..SessionConfig::default()
        };
        assert_eq!(config.bit_rate(), 10_000_000);
        assert_eq!(recommended_bit_rate(1080, 30), 10_000_000);
        assert_eq!(recommended_bit_rate(1440, 60), 30_000_000);
        assert_eq!(recommended_bit_rate(2160, 30), 56_000_000);
    }

    #[test]
    fn parses_toml_with_defaults() {
        let config = RecorderConfig::from_toml(
            r#"
            output_dir = "/tmp/replays"

            [session]
            width = 1280
            height = 720
            frame_rate = 30
            span_secs = 10
            preroll = "discard"

            [capture]
            input_format = "v4l2"
            input = "/dev/video0"
            "#,
        )
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/tmp/replays"));
        assert_eq!(config.session.keyframe_interval_secs, 1);
        assert_eq!(config.session.status_interval_frames, 10);
        assert_eq!(config.session.preroll, PrerollPolicy::Discard);
        assert_eq!(config.session.bit_rate(), 6_000_000);
        assert_eq!(config.capture.ffmpeg_path, "ffmpeg");
        assert_eq!(config.capture.input.as_deref(), Some("/dev/video0"));
    }

    #[test]
    fn invalid_session_in_file_is_rejected() {
        let err = RecorderConfig::from_toml(
            r#"
            [session]
            width = 1280
            height = 720
            frame_rate = 30
            span_secs = 1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SpanTooShort { .. }));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewind.toml");
        fs::write(&path, "output_dir = \"out\"\n").unwrap();

        let config = RecorderConfig::load(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.session, SessionConfig::default());

        let missing = RecorderConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn timestamped_names_carry_extension() {
        let name = timestamped_file_name("mp4");
        assert!(name.ends_with(".mp4"));
        assert_eq!(name.len(), "20240101_120000.mp4".len());
        assert_eq!(&name[8..9], "_");
    }
}
