//! CD-audio track streaming
//!
//! Streams the raw PCM of compact-disc audio tracks (16-bit, 44.1 kHz, stereo,
//! stored in the SSND chunk of an AIFC file) into an audio output unit. A
//! single background worker fills one half of a per-track double buffer while
//! the real-time render callback drains the other half.
//!
//! # Features
//! - One shared reader thread per [`ReaderPool`], started on the first
//!   registered reader and joined when the last one leaves
//! - Non-blocking render path (try-lock handoff, underrun detection)
//! - Frame based seek / stop / position API (2352 bytes per CD frame)
//! - Typed playback notifications ([`PlayStatus`])
//! - WAV export through the full pipeline
//!
//! # Crate feature flags
//! - `streaming` (opt-in): rodio-backed [`streaming::AudioDevice`] output unit
//!
//! # Quick start
//! ```no_run
//! use cdda_stream::{PlaybackSession, PullOutput, ReaderPool, StreamConfig};
//!
//! let config = StreamConfig::default();
//! let pool = ReaderPool::new(&config);
//! let mut session = PlaybackSession::open("track01.aiff", &pool, &config).unwrap();
//! let output = PullOutput::new();
//! session.set_destination(Box::new(output.clone())).unwrap();
//! session.set_start_frame(75 * 60);
//! session.connect().unwrap();
//!
//! let mut block = vec![0u8; 4096];
//! output.pull(&mut block);
//! ```

#![warn(missing_docs)]

pub mod export; // WAV export
pub mod fork; // File forks and AIFC track layout
pub mod guard; // Mutex + condition variable
pub mod session; // Playback sessions and output units
pub mod streaming; // Reader pool, double-buffered reader, render feed

/// Error types for CD-audio streaming operations
#[derive(thiserror::Error, Debug)]
pub enum CddaError {
    /// Track file is not a usable AIFC file
    #[error("Format error: {0}")]
    Format(String),

    /// IO error from the file fork
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect attempted while the reader or session is already engaged
    #[error("Player is already engaged")]
    AlreadyEngaged,

    /// Connect attempted before an output unit was set
    #[error("Player is uninitialized (no destination output unit)")]
    Uninitialized,

    /// Reader thread could not be started
    #[error("Reader thread error: {0}")]
    Thread(String),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Error writing an exported audio file
    #[error("Export error: {0}")]
    Export(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for CddaError {
    /// Converts a String into `CddaError::Other`.
    ///
    /// Prefer the specific variants (`Format`, `Config`, `AudioDevice`) where
    /// the failure class is known.
    fn from(msg: String) -> Self {
        CddaError::Other(msg)
    }
}

impl From<&str> for CddaError {
    fn from(msg: &str) -> Self {
        CddaError::Other(msg.to_string())
    }
}

/// Result type for streaming operations
pub type Result<T> = std::result::Result<T, CddaError>;

// Public API exports
pub use fork::{ForkReader, TrackLayout};
pub use guard::Guard;
pub use session::{
    Notifier, OutputUnit, PlayStatus, PlaybackSession, PullOutput, RenderCallback, StreamFormat,
};
pub use streaming::{ReaderPool, RenderFeed, Seek, StreamConfig, StreamReader, CD_FRAME_BYTES};

#[cfg(feature = "streaming")]
pub use streaming::AudioDevice;
