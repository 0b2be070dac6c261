//! Playback sessions
//!
//! A [`PlaybackSession`] ties one track's [`StreamReader`] to an
//! [`OutputUnit`] and exposes positions in CD frames of
//! [`CD_FRAME_BYTES`] bytes.
//!
//! ```no_run
//! use cdda_stream::{PlayStatus, PlaybackSession, PullOutput, ReaderPool, StreamConfig};
//!
//! let config = StreamConfig::default();
//! let pool = ReaderPool::new(&config);
//! let mut session = PlaybackSession::open("track02.aiff", &pool, &config)?;
//! session.set_destination(Box::new(PullOutput::new()))?;
//! session.set_notifier(Some(Box::new(|status: PlayStatus| {
//!     if status == PlayStatus::Finished {
//!         println!("done");
//!     }
//! })));
//! session.connect()?;
//! # Ok::<(), cdda_stream::CddaError>(())
//! ```

pub mod notify;
pub mod output;

pub use notify::{NullSink, Notifier, PlayStatus, StatusSink};
pub use output::{OutputUnit, PullOutput, RenderCallback, StreamFormat};

use self::notify::SessionLink;
use crate::fork::{self, ForkReader, TrackLayout};
use crate::streaming::{ReaderPool, Seek, StreamConfig, StreamReader, CD_FRAME_BYTES};
use crate::{CddaError, Result};
use std::path::Path;
use std::sync::Arc;

/// One track playing (or ready to play) into an output unit
pub struct PlaybackSession {
    destination: Option<Box<dyn OutputUnit>>,
    reader: StreamReader,
    link: Arc<SessionLink>,
    format: StreamFormat,
    connected: bool,
    start_frame: u64,
}

impl PlaybackSession {
    /// Open an AIFC track file
    pub fn open<P: AsRef<Path>>(
        path: P,
        pool: &Arc<ReaderPool>,
        config: &StreamConfig,
    ) -> Result<Self> {
        let (file, layout) = fork::open_track(path)?;
        Self::from_fork(Box::new(file), layout, pool, config)
    }

    /// Build a session over an already-open fork
    pub fn from_fork(
        fork: Box<dyn ForkReader>,
        layout: TrackLayout,
        pool: &Arc<ReaderPool>,
        config: &StreamConfig,
    ) -> Result<Self> {
        config.validate()?;

        let link = Arc::new(SessionLink::default());
        let reader = StreamReader::new(pool, fork, layout, config.chunk_size(), link.clone())?;

        Ok(PlaybackSession {
            destination: None,
            reader,
            link,
            format: StreamFormat::cd_audio(),
            connected: false,
            start_frame: 0,
        })
    }

    /// Set the output unit to render into
    ///
    /// The unit is configured for CD audio before it is accepted.
    pub fn set_destination(&mut self, mut unit: Box<dyn OutputUnit>) -> Result<()> {
        self.apply_pending_disconnect();
        if self.connected {
            return Err(CddaError::AlreadyEngaged);
        }

        unit.set_stream_format(&self.format)?;
        self.destination = Some(unit);
        Ok(())
    }

    /// Current output unit
    pub fn destination(&self) -> Option<&dyn OutputUnit> {
        self.destination.as_deref()
    }

    /// Current output unit, mutably
    pub fn destination_mut(&mut self) -> Option<&mut (dyn OutputUnit + 'static)> {
        self.destination.as_deref_mut()
    }

    /// Install or clear the notification callback
    ///
    /// Without a notifier, underruns are ignored and any other status stops
    /// the session.
    pub fn set_notifier(&mut self, notifier: Option<Notifier>) {
        self.link.set_notifier(notifier);
    }

    /// Start rendering into the destination
    pub fn connect(&mut self) -> Result<()> {
        self.apply_pending_disconnect();
        if self.connected {
            return Err(CddaError::AlreadyEngaged);
        }
        let Some(unit) = self.destination.as_mut() else {
            return Err(CddaError::Uninitialized);
        };

        self.link.reset();
        let mut feed = self.reader.connect()?;
        let callback: RenderCallback =
            Box::new(move |buffers: &mut [&mut [u8]]| feed.render_buffers(buffers));

        if let Err(e) = unit.set_render_callback(Some(callback)) {
            self.reader.disconnect();
            return Err(e);
        }

        self.connected = true;
        log::info!(
            "Session connected at frame {} ({} bytes of audio)",
            self.start_frame,
            self.reader.data_length()
        );
        Ok(())
    }

    /// Stop rendering; safe to repeat
    pub fn disconnect(&mut self) {
        self.link.take_disconnect_request();
        self.teardown();
    }

    /// Carry out a disconnect requested by a notification
    ///
    /// Returns whether the session is still connected.
    pub fn poll(&mut self) -> bool {
        self.apply_pending_disconnect();
        self.connected
    }

    /// Whether the session is rendering
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Seek to `frame`
    ///
    /// An out-of-range frame restarts the track from the beginning.
    pub fn set_start_frame(&mut self, frame: u64) -> Seek {
        let seek = self.reader.set_position(frame_to_byte(frame));
        self.start_frame = seek.applied() / CD_FRAME_BYTES;
        seek
    }

    /// Frame currently being played
    ///
    /// Counts from the last start frame by bytes rendered since the session
    /// was created.
    pub fn current_frame(&self) -> u64 {
        self.start_frame + self.reader.byte_counter() / CD_FRAME_BYTES
    }

    /// Stop playback at `frame`
    ///
    /// An out-of-range frame plays to the end of the track.
    pub fn set_stop_frame(&mut self, frame: u64) -> Seek {
        self.reader.set_end_of_file(frame_to_byte(frame))
    }

    /// Whole frames in the track
    pub fn frame_count(&self) -> u64 {
        self.reader.data_length() / CD_FRAME_BYTES
    }

    /// Underlying reader
    pub fn reader(&self) -> &StreamReader {
        &self.reader
    }

    /// Stream format set on the destination
    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    fn apply_pending_disconnect(&mut self) {
        if self.link.take_disconnect_request() && self.connected {
            log::info!("Disconnecting session after stop notification");
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        if !self.connected {
            return;
        }
        if let Some(unit) = self.destination.as_mut() {
            if let Err(e) = unit.set_render_callback(None) {
                log::warn!("Failed to remove render callback: {}", e);
            }
        }
        self.reader.disconnect();
        self.connected = false;
        log::info!("Session disconnected at frame {}", self.current_frame());
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("connected", &self.connected)
            .field("has_destination", &self.destination.is_some())
            .field("start_frame", &self.start_frame)
            .field("format", &self.format)
            .field("reader", &self.reader)
            .field("link", &self.link)
            .finish()
    }
}

/// Byte offset of `frame`, saturated into the reader's signed position domain
fn frame_to_byte(frame: u64) -> i64 {
    frame
        .checked_mul(CD_FRAME_BYTES)
        .and_then(|bytes| i64::try_from(bytes).ok())
        .unwrap_or(i64::MAX)
}
