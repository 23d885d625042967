use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Per-packet flags reported by the encoder.
///
/// The bit values follow the usual hardware codec convention so flags coming
/// from a platform encoder can be wrapped without translation.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct PacketFlags(u32);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);
    /// Sync frame: decodable without any earlier packet.
    pub const KEY_FRAME: PacketFlags = PacketFlags(1);
    /// Codec configuration data (SPS/PPS), not a picture.
    pub const CODEC_CONFIG: PacketFlags = PacketFlags(2);
    pub const END_OF_STREAM: PacketFlags = PacketFlags(4);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_key_frame(self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub const fn is_codec_config(self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub const fn is_end_of_stream(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl BitOr for PacketFlags {
    type Output = PacketFlags;

    fn bitor(self, rhs: PacketFlags) -> PacketFlags {
        PacketFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for PacketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketFlags(0x{:x}", self.0)?;
        if self.is_key_frame() {
            f.write_str(" KEY")?;
        }
        if self.is_codec_config() {
            f.write_str(" CONFIG")?;
        }
        if self.is_end_of_stream() {
            f.write_str(" EOS")?;
        }
        f.write_str(")")
    }
}

/// A compressed packet as handed over by the encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub flags: PacketFlags,
    pub pts_usec: i64,
}

impl EncodedPacket {
    pub fn new(data: Vec<u8>, flags: PacketFlags, pts_usec: i64) -> Self {
        Self {
            data,
            flags,
            pts_usec,
        }
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags.is_key_frame()
    }
}

/// Supported video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
}

impl VideoCodec {
    /// Extension used for a bare Annex-B elementary stream.
    pub fn elementary_extension(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
        }
    }
}

/// What a container needs to know to register the video track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackFormat {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bit_rate: u32,
    /// Annex-B codec configuration (SPS/PPS), empty until the encoder emits it.
    pub codec_config: Vec<u8>,
}

/// One notification from the encoder's output side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EncoderOutput {
    Packet(EncodedPacket),
    FormatChanged(TrackFormat),
    Error(String),
}
