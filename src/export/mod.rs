//! Offline rendering of tracks to audio files
//!
//! Export drives a session through a [`PullOutput`](crate::PullOutput), so
//! the data takes exactly the path it would take to an audio device.

pub mod wav;

pub use wav::{export_to_wav, export_to_wav_with_config};

use std::time::Duration;

/// Export configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportConfig {
    /// Bytes pulled from the session per render cycle
    pub block_bytes: usize,
    /// Pause after a cycle that came back short (reader thread behind)
    pub underrun_backoff: Duration,
    /// Give up after this many consecutive empty cycles
    pub max_stalled_cycles: u32,
}

impl ExportConfig {
    /// Set the block size, rounded down to whole sample frames
    pub fn block_bytes(mut self, bytes: usize) -> Self {
        self.block_bytes = (bytes / 4).max(1) * 4;
        self
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            // 2 CD frames
            block_bytes: 4704,
            underrun_backoff: Duration::from_millis(1),
            max_stalled_cycles: 10_000,
        }
    }
}
