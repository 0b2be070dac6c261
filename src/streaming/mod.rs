//! Double-buffered track streaming
//!
//! A [`StreamReader`] owns two chunk-sized halves. The [`ReaderPool`] worker
//! thread fills whichever half is marked for writing while the [`RenderFeed`],
//! living inside the output unit's render callback, drains the other one.
//! Memory usage per track is fixed at two chunks regardless of track length.

#[cfg(feature = "streaming")]
pub mod audio_device;
pub mod feed;
pub mod pool;
pub mod reader;

#[cfg(feature = "streaming")]
pub use audio_device::AudioDevice;
pub use feed::RenderFeed;
pub use pool::ReaderPool;
pub use reader::StreamReader;

use crate::{CddaError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bytes per compact-disc audio frame (sector), the unit of the frame API
pub const CD_FRAME_BYTES: u64 = 2352;

/// CD audio sample rate (44.1 kHz)
pub const CD_SAMPLE_RATE: u32 = 44_100;

/// Bytes per sample frame: 2 channels x 16 bit
pub const CD_BYTES_PER_FRAME: u32 = 4;

/// Longest chunk a configuration may ask for
pub const MAX_CHUNK_SECONDS: f32 = 60.0;

/// Configuration for track streaming
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Seconds of audio held by one buffer half
    /// Larger chunks = fewer disc reads but more memory (two chunks per track)
    pub chunk_seconds: f32,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Bytes per sample frame (all channels)
    pub bytes_per_frame: u32,

    /// Fixed (`SCHED_FIFO`) priority for the reader thread
    /// `None` leaves the thread time-shared
    pub worker_priority: Option<i32>,
}

impl StreamConfig {
    /// About four seconds of CD audio per chunk
    /// Chunk = 705600 bytes, two chunks per playing track
    pub fn cd_audio() -> Self {
        StreamConfig {
            chunk_seconds: 4.0,
            sample_rate: CD_SAMPLE_RATE,
            bytes_per_frame: CD_BYTES_PER_FRAME,
            worker_priority: Some(62),
        }
    }

    /// One second per chunk, for many concurrent tracks
    pub fn low_memory() -> Self {
        StreamConfig {
            chunk_seconds: 1.0,
            ..Self::cd_audio()
        }
    }

    /// Size of one buffer half in bytes, a whole number of sample frames
    ///
    /// 0 when the chunk does not fit in memory; [`validate`](Self::validate)
    /// rejects such configurations.
    pub fn chunk_size(&self) -> usize {
        self.checked_chunk_size().unwrap_or(0)
    }

    fn checked_chunk_size(&self) -> Option<usize> {
        let frames = (self.chunk_seconds * self.sample_rate as f32) as usize;
        frames.checked_mul(self.bytes_per_frame as usize)
    }

    /// Duration of one chunk in milliseconds
    pub fn chunk_duration_ms(&self) -> f32 {
        let bytes_per_second = self.sample_rate as f32 * self.bytes_per_frame as f32;
        (self.chunk_size() as f32 / bytes_per_second) * 1000.0
    }

    /// Check the configuration describes a usable chunk
    pub fn validate(&self) -> Result<()> {
        if !self.chunk_seconds.is_finite() || self.chunk_seconds <= 0.0 {
            return Err(CddaError::Config(format!(
                "chunk_seconds must be positive, got {}",
                self.chunk_seconds
            )));
        }
        if self.sample_rate == 0 || self.bytes_per_frame == 0 {
            return Err(CddaError::Config(
                "sample_rate and bytes_per_frame must be non-zero".into(),
            ));
        }
        if self.chunk_seconds > MAX_CHUNK_SECONDS {
            return Err(CddaError::Config(format!(
                "chunk_seconds must be at most {}, got {}",
                MAX_CHUNK_SECONDS, self.chunk_seconds
            )));
        }
        match self.checked_chunk_size() {
            None => Err(CddaError::Config(format!(
                "chunk of {}s at {} Hz x {} bytes is too large",
                self.chunk_seconds, self.sample_rate, self.bytes_per_frame
            ))),
            Some(0) => Err(CddaError::Config(format!(
                "chunk of {}s holds no complete sample frame",
                self.chunk_seconds
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Parse a configuration from JSON, missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: StreamConfig = serde_json::from_str(json)
            .map_err(|e| CddaError::Config(format!("invalid stream config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            CddaError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        log::info!("Loaded stream config from {}", path.display());
        Self::from_json_str(&json)
    }

    /// Serialize the configuration as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CddaError::Config(format!("failed to serialize config: {}", e)))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::cd_audio()
    }
}

/// Outcome of a bounds-checked seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek {
    /// Requested position was in range and applied as-is
    Exact(u64),
    /// Requested position was out of range; `applied` was used instead
    Clamped {
        /// Position asked for
        requested: i64,
        /// Position actually set
        applied: u64,
    },
}

impl Seek {
    /// Position that took effect
    pub fn applied(&self) -> u64 {
        match *self {
            Seek::Exact(pos) => pos,
            Seek::Clamped { applied, .. } => applied,
        }
    }

    /// Whether the request had to be clamped
    pub fn is_clamped(&self) -> bool {
        matches!(self, Seek::Clamped { .. })
    }
}
