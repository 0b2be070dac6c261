//! Double-buffered track reader
//!
//! Two chunk-sized halves alternate between the reader thread (filling) and
//! the render feed (draining). Two flags say which half each side uses next:
//! - `write_to_first`: half the worker fills next, flipped after each fill
//! - `read_from_first`: half the render side drains next, flipped on take
//!
//! When both flags point at the same half, the worker has not caught up since
//! the last take and the render side reports an underrun instead of reading.

use super::feed::RenderFeed;
use super::pool::ReaderPool;
use super::Seek;
use crate::fork::{ForkReader, TrackLayout};
use crate::session::{PlayStatus, StatusSink};
use crate::{CddaError, Result};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Result of one background fill
#[derive(Debug)]
pub(crate) enum Fill {
    /// Half filled with this many bytes of track data (rest zero padded)
    Filled(usize),
    /// Nothing left before end-of-file; reader marked finished
    Finished,
    /// Request predates the reader's latest connect
    Stale,
    /// Read failed; reader state untouched
    Failed(io::Error),
}

/// Reader state shared between the owner, the worker and the render feed
pub(crate) struct ReaderCore {
    source: Mutex<Box<dyn ForkReader>>,
    data_offset: u64,
    data_length: u64,
    chunk_size: usize,
    halves: [Mutex<Box<[u8]>>; 2],

    write_to_first: AtomicBool,
    read_from_first: AtomicBool,

    /// Read cursor, relative to the start of audio data
    read_position: AtomicU64,
    /// Logical end of audio data; never read past
    end_of_file: AtomicU64,
    /// Bytes handed to the output
    byte_counter: AtomicU64,

    engaged: AtomicBool,
    epoch: AtomicU64,
    queued: AtomicBool,

    finished: AtomicBool,
    asked_since_finished: AtomicU32,
    finish_notified: AtomicBool,

    /// Last background fill failed; the next underrun asks for it again
    retry_fill: AtomicBool,
    /// Error code whose notification could not be posted yet
    error_pending: AtomicBool,
    error_code: AtomicI32,

    sink: Arc<dyn StatusSink>,
}

impl ReaderCore {
    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    /// Mark as queued; `false` if it already was
    pub(crate) fn mark_queued(&self) -> bool {
        !self.queued.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    pub(crate) fn post(&self, status: PlayStatus) -> bool {
        self.sink.post(status)
    }

    pub(crate) fn halted(&self) -> bool {
        self.sink.halted()
    }

    pub(crate) fn half(&self, index: usize) -> &Mutex<Box<[u8]>> {
        &self.halves[index]
    }

    pub(crate) fn add_delivered(&self, bytes: usize) {
        self.byte_counter.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Take the readable half, or `None` on finish or underrun
    pub(crate) fn take_readable(&self) -> Option<usize> {
        if self.finished.load(Ordering::Acquire) {
            self.asked_since_finished.fetch_add(1, Ordering::AcqRel);
            return None;
        }

        let read_first = self.read_from_first.load(Ordering::Acquire);
        let write_first = self.write_to_first.load(Ordering::Acquire);
        if read_first == write_first {
            self.post(PlayStatus::Underrun);
            return None;
        }

        self.read_from_first.store(!read_first, Ordering::Release);
        Some(if read_first { 0 } else { 1 })
    }

    /// Whether a finished notification is due
    pub(crate) fn finish_pending(&self) -> bool {
        self.asked_since_finished.load(Ordering::Acquire) > 0
            && !self.finish_notified.load(Ordering::Acquire)
    }

    pub(crate) fn set_finish_notified(&self) {
        self.finish_notified.store(true, Ordering::Release);
    }

    /// Record a failed background fill
    ///
    /// The error is posted now, or held for [`take_deferred_error`] when the
    /// sink is busy. The failed fill is re-requested on the next underrun.
    ///
    /// [`take_deferred_error`]: ReaderCore::take_deferred_error
    pub(crate) fn report_failure(&self, code: i32) {
        self.retry_fill.store(true, Ordering::Release);
        if !self.post(PlayStatus::IoError(code)) {
            self.defer_error(code);
        }
    }

    pub(crate) fn defer_error(&self, code: i32) {
        self.error_code.store(code, Ordering::Relaxed);
        self.error_pending.store(true, Ordering::Release);
    }

    pub(crate) fn take_deferred_error(&self) -> Option<i32> {
        if self.error_pending.swap(false, Ordering::AcqRel) {
            Some(self.error_code.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    /// Whether a failed fill is waiting to be re-requested; clears the mark
    pub(crate) fn take_retry(&self) -> bool {
        self.retry_fill.swap(false, Ordering::AcqRel)
    }

    /// Bytes the next read should fetch from `position`
    fn next_chunk_len(&self, position: u64) -> usize {
        let remaining = self
            .end_of_file
            .load(Ordering::Acquire)
            .saturating_sub(position);
        remaining.min(self.chunk_size as u64) as usize
    }

    /// Read up to one chunk into `half` and zero the remainder
    fn read_into(
        &self,
        source: &mut dyn ForkReader,
        half: &mut [u8],
        position: u64,
        want: usize,
    ) -> io::Result<usize> {
        let got = if want > 0 {
            source.read_at(self.data_offset + position, &mut half[..want])?
        } else {
            0
        };
        half[got..].fill(0);
        Ok(got)
    }

    /// Advance the cursor after a read of `got` out of `want` bytes
    fn advance(&self, position: u64, want: usize, got: usize) {
        if got < want {
            // Short read: the fork ended early
            let eof = self.end_of_file.load(Ordering::Acquire);
            self.read_position.store(eof, Ordering::Release);
        } else {
            self.read_position
                .store(position + got as u64, Ordering::Release);
        }
    }

    /// Synchronous first read on connect: fills the first half
    fn prime(&self) -> Result<()> {
        let mut source = self.source.lock();

        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.finished.store(false, Ordering::Release);
        self.asked_since_finished.store(0, Ordering::Release);
        self.finish_notified.store(false, Ordering::Release);
        self.queued.store(false, Ordering::Release);
        self.retry_fill.store(false, Ordering::Release);
        self.error_pending.store(false, Ordering::Release);

        let position = self.read_position.load(Ordering::Acquire);
        let want = self.next_chunk_len(position);
        {
            let mut half = self.halves[0].lock();
            let got = self.read_into(&mut **source, &mut half, position, want)?;
            self.advance(position, want, got);
        }
        if want == 0 {
            self.finished.store(true, Ordering::Release);
        }

        self.write_to_first.store(false, Ordering::Release);
        self.read_from_first.store(true, Ordering::Release);
        Ok(())
    }

    /// Background fill of the half marked for writing
    pub(crate) fn fill_next_chunk(&self, epoch: u64) -> Fill {
        let mut source = self.source.lock();
        if !self.is_engaged() || self.epoch() != epoch {
            return Fill::Stale;
        }

        let position = self.read_position.load(Ordering::Acquire);
        let want = self.next_chunk_len(position);
        if want == 0 {
            self.finished.store(true, Ordering::Release);
            return Fill::Finished;
        }

        let write_first = self.write_to_first.load(Ordering::Acquire);
        let index = if write_first { 0 } else { 1 };
        let got = {
            let mut half = self.halves[index].lock();
            match self.read_into(&mut **source, &mut half, position, want) {
                Ok(got) => got,
                Err(e) => return Fill::Failed(e),
            }
        };

        // Flip before publishing the new cursor: a reader that observes the
        // cursor also observes the flipped half.
        self.write_to_first.store(!write_first, Ordering::Release);
        self.advance(position, want, got);
        Fill::Filled(got)
    }
}

/// Double-buffered reader over one track's audio data
///
/// Owner-side handle. [`StreamReader::connect`] hands out the render-side
/// [`RenderFeed`]; the reader thread is shared through the [`ReaderPool`].
pub struct StreamReader {
    core: Arc<ReaderCore>,
    pool: Arc<ReaderPool>,
}

impl StreamReader {
    /// Create a reader over `layout` within `fork`
    ///
    /// Allocates two halves of `chunk_size` bytes each.
    pub fn new(
        pool: &Arc<ReaderPool>,
        fork: Box<dyn ForkReader>,
        layout: TrackLayout,
        chunk_size: usize,
        sink: Arc<dyn StatusSink>,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(CddaError::Config("chunk size must be non-zero".into()));
        }

        let core = ReaderCore {
            source: Mutex::new(fork),
            data_offset: layout.data_offset,
            data_length: layout.data_length,
            chunk_size,
            halves: [
                Mutex::new(vec![0u8; chunk_size].into_boxed_slice()),
                Mutex::new(vec![0u8; chunk_size].into_boxed_slice()),
            ],
            write_to_first: AtomicBool::new(false),
            read_from_first: AtomicBool::new(false),
            read_position: AtomicU64::new(0),
            end_of_file: AtomicU64::new(layout.data_length),
            byte_counter: AtomicU64::new(0),
            engaged: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            queued: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            asked_since_finished: AtomicU32::new(0),
            finish_notified: AtomicBool::new(false),
            retry_fill: AtomicBool::new(false),
            error_pending: AtomicBool::new(false),
            error_code: AtomicI32::new(0),
            sink,
        };

        Ok(StreamReader {
            core: Arc::new(core),
            pool: Arc::clone(pool),
        })
    }

    /// Prime the first half and join the reader thread
    ///
    /// Fails with [`CddaError::AlreadyEngaged`] if already connected, leaving
    /// the buffers untouched. A failed priming read leaves the reader
    /// disconnected.
    pub fn connect(&mut self) -> Result<RenderFeed> {
        if self.is_engaged() {
            return Err(CddaError::AlreadyEngaged);
        }

        self.core.prime()?;
        self.pool.register_reader()?;
        self.core.engaged.store(true, Ordering::Release);

        Ok(RenderFeed::new(
            Arc::clone(&self.core),
            Arc::clone(&self.pool),
        ))
    }

    /// Leave the reader thread; no-op when not connected
    ///
    /// Blocks until the worker has exited if this was its last reader.
    pub fn disconnect(&mut self) {
        if self.core.engaged.swap(false, Ordering::AcqRel) {
            self.pool.deregister_reader(&self.core);
        }
    }

    /// Whether the reader is connected
    pub fn is_engaged(&self) -> bool {
        self.core.is_engaged()
    }

    /// Seek within the audio data
    ///
    /// Positions outside `[0, data_length)` restart from 0.
    pub fn set_position(&self, pos: i64) -> Seek {
        let length = self.core.data_length;
        let seek = match u64::try_from(pos) {
            Ok(p) if p < length => Seek::Exact(p),
            _ => {
                log::warn!(
                    "set_position: position {} invalid for data length {}, using 0",
                    pos,
                    length
                );
                Seek::Clamped {
                    requested: pos,
                    applied: 0,
                }
            }
        };
        self.core
            .read_position
            .store(seek.applied(), Ordering::Release);
        seek
    }

    /// Stop reading at `pos`, as if the data ended there
    ///
    /// Positions outside `(0, data_length]` fall back to the real data length.
    pub fn set_end_of_file(&self, pos: i64) -> Seek {
        let length = self.core.data_length;
        let seek = match u64::try_from(pos) {
            Ok(p) if p > 0 && p <= length => Seek::Exact(p),
            _ => {
                log::warn!(
                    "set_end_of_file: position {} beyond data length {}, using {}",
                    pos,
                    length,
                    length
                );
                Seek::Clamped {
                    requested: pos,
                    applied: length,
                }
            }
        };
        self.core
            .end_of_file
            .store(seek.applied(), Ordering::Release);
        seek
    }

    /// Bytes handed to the output so far
    pub fn byte_counter(&self) -> u64 {
        self.core.byte_counter.load(Ordering::Relaxed)
    }

    /// Next byte the reader thread will fetch, relative to the audio data
    pub fn read_position(&self) -> u64 {
        self.core.read_position.load(Ordering::Acquire)
    }

    /// Current logical end of audio data
    pub fn end_of_file(&self) -> u64 {
        self.core.end_of_file.load(Ordering::Acquire)
    }

    /// Total audio bytes in the track
    pub fn data_length(&self) -> u64 {
        self.core.data_length
    }

    /// Bytes per buffer half
    pub fn chunk_size(&self) -> usize {
        self.core.chunk_size
    }

    /// Whether the reader thread has run out of data
    pub fn is_finished(&self) -> bool {
        self.core.finished.load(Ordering::Acquire)
    }

    pub(crate) fn core(&self) -> Arc<ReaderCore> {
        Arc::clone(&self.core)
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        // Leave the pool before the halves go away with the last Arc
        self.disconnect();
    }
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("engaged", &self.is_engaged())
            .field("chunk_size", &self.chunk_size())
            .field("read_position", &self.read_position())
            .field("end_of_file", &self.end_of_file())
            .field("byte_counter", &self.byte_counter())
            .field("finished", &self.is_finished())
            .finish()
    }
}
