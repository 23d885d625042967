pub mod config;
pub mod packet;

pub use config::{
    CaptureConfig, ConfigError, PrerollPolicy, RecorderConfig, SessionConfig, recommended_bit_rate,
    timestamped_file_name,
};
pub use packet::{EncodedPacket, EncoderOutput, PacketFlags, TrackFormat, VideoCodec};

pub use anyhow;
pub use async_trait;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_next;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg_next::sys;
pub use log;
pub use tokio;
