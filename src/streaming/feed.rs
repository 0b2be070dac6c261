//! Render-side access to a connected reader
//!
//! Runs on the output unit's render thread. Nothing here blocks: the pool
//! guard and the buffer halves are only ever try-locked, and a contended lock
//! or an empty half degrades to silence for the rest of the cycle.

use super::pool::ReaderPool;
use super::reader::ReaderCore;
use crate::session::PlayStatus;
use std::sync::Arc;

/// Render-thread handle returned by [`StreamReader::connect`](super::StreamReader::connect)
///
/// Becomes inert (renders silence) once its reader disconnects or reconnects.
pub struct RenderFeed {
    core: Arc<ReaderCore>,
    pool: Arc<ReaderPool>,
    /// Reader epoch this feed was created for
    epoch: u64,
    /// Half currently being drained
    current: Option<usize>,
    offset: usize,
    size: usize,
    /// A fill request could not be queued and must be retried
    fill_pending: bool,
}

impl RenderFeed {
    pub(crate) fn new(core: Arc<ReaderCore>, pool: Arc<ReaderPool>) -> Self {
        let epoch = core.epoch();
        let size = core.chunk_size();
        RenderFeed {
            core,
            pool,
            epoch,
            current: None,
            offset: 0,
            size,
            fill_pending: false,
        }
    }

    /// Whether this feed still belongs to the reader's current connection
    pub fn is_live(&self) -> bool {
        self.core.is_engaged() && self.core.epoch() == self.epoch
    }

    /// Take the next filled half and ask the reader thread to refill the other
    ///
    /// Returns the half index, or `None` when the track has finished or the
    /// reader thread has not caught up (an underrun, reported to the sink).
    pub fn get_next_chunk(&mut self) -> Option<usize> {
        let Some(index) = self.core.take_readable() else {
            // A failed fill left nothing queued: ask again, keep the read side
            if self.core.take_retry() {
                self.request_fill();
            }
            return None;
        };
        self.current = Some(index);
        self.offset = 0;
        self.request_fill();
        Some(index)
    }

    /// End-of-cycle bookkeeping
    ///
    /// Delivers a read error the reader thread could not post, and the
    /// finished notification once.
    pub fn after_render(&mut self) {
        if let Some(code) = self.core.take_deferred_error() {
            if !self.core.post(PlayStatus::IoError(code)) {
                self.core.defer_error(code);
            }
        }

        if !self.core.finish_pending() {
            return;
        }
        // Only notify when the pool is quiet; otherwise try again next cycle
        if self.pool.try_hold() && self.core.post(PlayStatus::Finished) {
            self.core.set_finish_notified();
        }
    }

    /// Fill `out` with track data, zero-filling whatever cannot be supplied
    ///
    /// Returns the number of track bytes written.
    pub fn render(&mut self, out: &mut [u8]) -> usize {
        let written = self.fill(out);
        self.after_render();
        written
    }

    /// Fill each buffer in turn as one continuous stream
    pub fn render_buffers(&mut self, buffers: &mut [&mut [u8]]) -> usize {
        let mut written = 0;
        for buffer in buffers.iter_mut() {
            written += self.fill(buffer);
        }
        self.after_render();
        written
    }

    fn request_fill(&mut self) {
        self.fill_pending = !self.pool.try_enqueue(&self.core);
    }

    fn fill(&mut self, out: &mut [u8]) -> usize {
        if !self.is_live() || self.core.halted() {
            out.fill(0);
            return 0;
        }
        if self.fill_pending {
            self.request_fill();
        }

        let mut written = 0;
        while written < out.len() {
            let index = match (self.current, self.offset < self.size) {
                (Some(index), true) => index,
                _ => match self.get_next_chunk() {
                    Some(index) => index,
                    None => break,
                },
            };

            let Some(half) = self.core.half(index).try_lock() else {
                log::trace!("Render feed: buffer contention, rendering silence");
                break;
            };
            let n = (out.len() - written).min(self.size - self.offset);
            out[written..written + n].copy_from_slice(&half[self.offset..self.offset + n]);
            written += n;
            self.offset += n;
        }

        out[written..].fill(0);
        self.core.add_delivered(written);
        written
    }
}

impl std::fmt::Debug for RenderFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderFeed")
            .field("epoch", &self.epoch)
            .field("current", &self.current)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("live", &self.is_live())
            .finish()
    }
}
