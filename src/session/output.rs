//! Output units
//!
//! An output unit pulls audio through a [`RenderCallback`]. Sessions install
//! their render feed as that callback on connect and remove it on disconnect.

use crate::streaming::{CD_BYTES_PER_FRAME, CD_SAMPLE_RATE};
use crate::{CddaError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Render pull: fill every buffer, return the track bytes written
pub type RenderCallback = Box<dyn FnMut(&mut [&mut [u8]]) -> usize + Send>;

/// Interleaved signed linear PCM layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channels
    pub channels: u16,
    /// Bits per sample
    pub bits_per_sample: u16,
    /// Sample byte order
    pub big_endian: bool,
}

impl StreamFormat {
    /// 16-bit stereo at 44.1 kHz, the only layout a CD track carries
    pub fn cd_audio() -> Self {
        StreamFormat {
            sample_rate: CD_SAMPLE_RATE,
            channels: 2,
            bits_per_sample: 16,
            big_endian: cfg!(target_endian = "big"),
        }
    }

    /// Bytes per sample frame (all channels)
    pub fn bytes_per_frame(&self) -> u32 {
        u32::from(self.channels) * u32::from(self.bits_per_sample / 8)
    }

    /// Bytes per second of audio
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.bytes_per_frame()
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::cd_audio()
    }
}

/// Destination a session renders into
pub trait OutputUnit {
    /// Configure the unit for `format`
    fn set_stream_format(&mut self, format: &StreamFormat) -> Result<()>;

    /// Install (`Some`) or remove (`None`) the render callback
    fn set_render_callback(&mut self, callback: Option<RenderCallback>) -> Result<()>;
}

#[derive(Default)]
struct PullState {
    format: Option<StreamFormat>,
    callback: Option<RenderCallback>,
}

/// Output unit driven by the caller instead of an audio device
///
/// Clones share state: hand one clone to a session and pull from another.
#[derive(Clone, Default)]
pub struct PullOutput {
    state: Arc<Mutex<PullState>>,
}

impl PullOutput {
    /// Create an unconfigured output
    pub fn new() -> Self {
        Self::default()
    }

    /// Render into `out`; silence when no callback is installed
    pub fn pull(&self, out: &mut [u8]) -> usize {
        self.pull_buffers(&mut [out])
    }

    /// Render into several buffers in one cycle
    pub fn pull_buffers(&self, buffers: &mut [&mut [u8]]) -> usize {
        let mut state = self.state.lock();
        match state.callback.as_mut() {
            Some(render) => render(buffers),
            None => {
                for buffer in buffers.iter_mut() {
                    buffer.fill(0);
                }
                0
            }
        }
    }

    /// Whether a render callback is installed
    pub fn is_attached(&self) -> bool {
        self.state.lock().callback.is_some()
    }

    /// Format set by the session, if any
    pub fn format(&self) -> Option<StreamFormat> {
        self.state.lock().format
    }
}

impl OutputUnit for PullOutput {
    fn set_stream_format(&mut self, format: &StreamFormat) -> Result<()> {
        if format.bytes_per_frame() != CD_BYTES_PER_FRAME {
            return Err(CddaError::AudioDevice(format!(
                "unsupported stream format: {} channels x {} bits",
                format.channels, format.bits_per_sample
            )));
        }
        self.state.lock().format = Some(*format);
        Ok(())
    }

    fn set_render_callback(&mut self, callback: Option<RenderCallback>) -> Result<()> {
        let old = std::mem::replace(&mut self.state.lock().callback, callback);
        // Drop the old feed outside the lock
        drop(old);
        Ok(())
    }
}

impl std::fmt::Debug for PullOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullOutput")
            .field("format", &self.format())
            .field("attached", &self.is_attached())
            .finish()
    }
}
