use std::path::PathBuf;

/// Outcome of writing a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Ok,
    /// The buffer holds no keyframe yet; nothing was written.
    NoSyncFrame,
    WriteError,
}

impl SaveStatus {
    pub fn code(self) -> i32 {
        match self {
            SaveStatus::Ok => 0,
            SaveStatus::NoSyncFrame => 1,
            SaveStatus::WriteError => 2,
        }
    }

    pub fn is_ok(self) -> bool {
        self == SaveStatus::Ok
    }
}

/// Notifications sent from the encoder worker to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Time covered by the buffered packets.
    BufferStatus { span_usec: i64 },
    SaveComplete { path: PathBuf, status: SaveStatus },
    RecordingStarted { path: PathBuf, preroll_packets: usize },
    /// The container could not be opened; the worker keeps buffering.
    RecordingFailed { path: PathBuf, reason: String },
    RecordingStopped {
        path: PathBuf,
        samples: u64,
        status: SaveStatus,
    },
    /// Error reported by the encoder; buffering continues.
    EncoderError(String),
    /// The session cannot continue and the worker is shutting down.
    Fatal(String),
}
