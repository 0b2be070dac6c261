//! Audio device integration using rodio
//!
//! [`AudioDevice`] is an [`OutputUnit`] backed by the default system output.
//! Rodio pulls samples from a [`CallbackSource`], which in turn pulls blocks
//! of PCM bytes through whatever render callback a session has installed.

use crate::session::{OutputUnit, RenderCallback, StreamFormat};
use crate::{CddaError, Result};
use parking_lot::Mutex;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bytes pulled from the render callback per refill (1024 sample frames)
const BLOCK_BYTES: usize = 4096;

type CallbackSlot = Arc<Mutex<Option<RenderCallback>>>;

/// Audio source that pulls from the installed render callback
struct CallbackSource {
    slot: CallbackSlot,
    format: StreamFormat,
    stopped: Arc<AtomicBool>,
    /// Batch of raw PCM bytes (reduces lock traffic on the slot)
    block: Vec<u8>,
    /// Next byte to hand out from `block`
    block_pos: usize,
}

impl CallbackSource {
    fn new(slot: CallbackSlot, format: StreamFormat, stopped: Arc<AtomicBool>) -> Self {
        CallbackSource {
            slot,
            format,
            stopped,
            block: vec![0u8; BLOCK_BYTES],
            block_pos: BLOCK_BYTES, // Start by pulling a new block
        }
    }

    fn refill(&mut self) {
        let mut slot = self.slot.lock();
        match slot.as_mut() {
            Some(render) => {
                // The callback zero-fills whatever it cannot supply
                render(&mut [&mut self.block[..]]);
            }
            None => self.block.fill(0),
        }
        self.block_pos = 0;
    }
}

impl Source for CallbackSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some((self.block.len() - self.block_pos) / 2)
    }

    fn channels(&self) -> u16 {
        self.format.channels
    }

    fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for CallbackSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if self.stopped.load(Ordering::Relaxed) {
            return None;
        }
        if self.block_pos + 2 > self.block.len() {
            self.refill();
        }

        let bytes = [self.block[self.block_pos], self.block[self.block_pos + 1]];
        self.block_pos += 2;
        Some(if self.format.big_endian {
            i16::from_be_bytes(bytes)
        } else {
            i16::from_le_bytes(bytes)
        })
    }
}

/// Audio playback device using rodio
pub struct AudioDevice {
    _stream: OutputStream,
    _handle: OutputStreamHandle,
    sink: Sink,
    slot: CallbackSlot,
    stopped: Arc<AtomicBool>,
    format: StreamFormat,
}

impl AudioDevice {
    /// Open the default output device and start pulling (silence until a
    /// render callback is installed)
    pub fn new() -> Result<Self> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| CddaError::AudioDevice(format!("Failed to create audio stream: {}", e)))?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| CddaError::AudioDevice(format!("Failed to create audio sink: {}", e)))?;

        let format = StreamFormat::cd_audio();
        let slot: CallbackSlot = Arc::new(Mutex::new(None));
        let stopped = Arc::new(AtomicBool::new(false));
        sink.append(CallbackSource::new(
            Arc::clone(&slot),
            format,
            Arc::clone(&stopped),
        ));

        log::info!(
            "Audio device opened: {} Hz, {} channels",
            format.sample_rate,
            format.channels
        );
        Ok(AudioDevice {
            _stream: stream,
            _handle: handle,
            sink,
            slot,
            stopped,
            format,
        })
    }

    /// Pause playback
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume playback
    pub fn play(&self) {
        self.sink.play();
    }

    /// Whether a render callback is installed
    pub fn is_attached(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Output format
    pub fn format(&self) -> &StreamFormat {
        &self.format
    }
}

impl OutputUnit for AudioDevice {
    fn set_stream_format(&mut self, format: &StreamFormat) -> Result<()> {
        if *format != self.format {
            return Err(CddaError::AudioDevice(format!(
                "unsupported stream format: {} Hz, {} channels x {} bits",
                format.sample_rate, format.channels, format.bits_per_sample
            )));
        }
        Ok(())
    }

    fn set_render_callback(&mut self, callback: Option<RenderCallback>) -> Result<()> {
        let old = std::mem::replace(&mut *self.slot.lock(), callback);
        drop(old);
        Ok(())
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.sink.stop();
    }
}

impl std::fmt::Debug for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioDevice")
            .field("format", &self.format)
            .field("attached", &self.is_attached())
            .field("paused", &self.sink.is_paused())
            .finish()
    }
}
