//! Shared reader thread
//!
//! One background worker services every registered reader. It is spawned when
//! the first reader registers and torn down, synchronously, when the last one
//! leaves. Work arrives as read requests in a FIFO queue:
//! - render threads enqueue with [`ReaderPool::try_enqueue`] (never blocks)
//! - the worker pops one request at a time and performs the blocking disk read
//!   outside the lock

use super::reader::{Fill, ReaderCore};
use super::StreamConfig;
use crate::guard::Guard;
use crate::{CddaError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// Name given to the worker thread
const WORKER_THREAD_NAME: &str = "cdda-reader";

/// A reader waiting for its next chunk
struct ReadRequest {
    reader: Arc<ReaderCore>,
    /// Reader epoch at enqueue time; stale once the reader reconnects
    epoch: u64,
}

#[derive(Default)]
struct PoolState {
    /// Pending requests, serviced front to back
    pending: VecDeque<ReadRequest>,
    /// Registered readers
    readers: usize,
    should_die: bool,
    worker_running: bool,
    /// Bumped on every spawn so teardown waits for the right worker
    generation: u64,
    worker: Option<JoinHandle<()>>,
    worker_id: Option<ThreadId>,
}

/// Reader thread shared by every playback session created against it
///
/// Create one per driver context and hand it to each session. All sessions
/// sharing a pool also share its single guard.
pub struct ReaderPool {
    guard: Guard<PoolState>,
    priority: Option<i32>,
}

impl ReaderPool {
    /// Create an idle pool; no thread runs until a reader registers
    pub fn new(config: &StreamConfig) -> Arc<Self> {
        Self::with_priority(config.worker_priority)
    }

    /// Create an idle pool whose worker runs at `priority` (`None` = default policy)
    pub fn with_priority(priority: Option<i32>) -> Arc<Self> {
        Arc::new(ReaderPool {
            guard: Guard::new(PoolState::default()),
            priority,
        })
    }

    /// Number of registered readers
    pub fn reader_count(&self) -> usize {
        self.guard.lock().readers
    }

    /// Whether the worker thread is alive
    pub fn is_running(&self) -> bool {
        self.guard.lock().worker_running
    }

    /// Number of queued read requests
    pub fn pending_count(&self) -> usize {
        self.guard.lock().pending.len()
    }

    /// Register a reader, starting the worker on the first one
    pub(crate) fn register_reader(self: &Arc<Self>) -> Result<()> {
        let mut state = self.guard.lock();

        if state.readers == 0 {
            // A previous worker may still be on its way out
            while state.worker_running && state.should_die {
                self.guard.wait(&mut state);
            }

            if !state.worker_running {
                let pool = Arc::clone(self);
                let handle = thread::Builder::new()
                    .name(WORKER_THREAD_NAME.to_string())
                    .spawn(move || pool.run_worker())
                    .map_err(|e| CddaError::Thread(format!("failed to spawn reader thread: {}", e)))?;

                state.generation += 1;
                state.worker_id = Some(handle.thread().id());
                state.worker = Some(handle);
                state.worker_running = true;
                log::info!("Reader thread started (generation {})", state.generation);
            }
            state.should_die = false;
        }

        state.readers += 1;

        // One slot per reader: enqueueing from the render path never allocates
        let missing = state.readers.saturating_sub(state.pending.len());
        state.pending.reserve(missing);
        Ok(())
    }

    /// Remove a reader and any request it still has queued
    ///
    /// When the last reader leaves, blocks until the worker thread has exited
    /// and been joined.
    pub(crate) fn deregister_reader(&self, reader: &ReaderCore) {
        let (handle, generation) = {
            let mut state = self.guard.lock();
            if state.readers == 0 {
                return;
            }

            state
                .pending
                .retain(|request| !std::ptr::eq(Arc::as_ptr(&request.reader), reader));
            reader.clear_queued();

            state.readers -= 1;
            if state.readers > 0 {
                return;
            }

            state.should_die = true;
            self.guard.notify();

            if state.worker_id == Some(thread::current().id()) {
                // Called from a notification on the worker itself; it exits on
                // its next pass and cannot be joined from here.
                log::warn!("Last reader removed from the reader thread; not waiting for exit");
                return;
            }

            let handle = state.worker.take();
            let generation = state.generation;
            while state.worker_running && state.generation == generation {
                self.guard.wait(&mut state);
            }
            (handle, generation)
        };

        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Reader thread panicked during shutdown");
            }
        }
        log::info!("Reader thread stopped (generation {})", generation);
    }

    /// Queue `reader` for its next chunk without blocking
    ///
    /// Returns `false` if the guard is contended; the caller retries on a later
    /// render cycle. A reader that is already queued is not queued twice.
    pub(crate) fn try_enqueue(&self, reader: &Arc<ReaderCore>) -> bool {
        let Some(mut state) = self.guard.try_lock() else {
            log::trace!("Reader pool: lock contention, enqueue deferred");
            return false;
        };

        if reader.mark_queued() {
            state.pending.push_back(ReadRequest {
                reader: Arc::clone(reader),
                epoch: reader.epoch(),
            });
            self.guard.notify();
        }
        true
    }

    /// Whether the guard could be taken right now; it is released immediately
    pub(crate) fn try_hold(&self) -> bool {
        self.guard.try_lock().is_some()
    }

    fn next_request(&self) -> Option<ReadRequest> {
        let mut state = self.guard.lock();
        loop {
            if state.should_die {
                state.worker_running = false;
                state.worker_id = None;
                self.guard.notify();
                return None;
            }
            if let Some(request) = state.pending.pop_front() {
                request.reader.clear_queued();
                return Some(request);
            }
            self.guard.wait(&mut state);
        }
    }

    fn run_worker(&self) {
        if let Some(priority) = self.priority {
            raise_priority(priority);
        }

        while let Some(request) = self.next_request() {
            match request.reader.fill_next_chunk(request.epoch) {
                Fill::Filled(bytes) => log::trace!("Reader thread: filled {} bytes", bytes),
                Fill::Finished => log::debug!("Reader thread: track reached end-of-file"),
                Fill::Stale => log::trace!("Reader thread: dropped stale request"),
                Fill::Failed(e) => {
                    log::warn!("Reader thread: read failed: {}", e);
                    request.reader.report_failure(e.raw_os_error().unwrap_or(-1));
                }
            }
        }
    }
}

impl std::fmt::Debug for ReaderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.guard.lock();
        f.debug_struct("ReaderPool")
            .field("readers", &state.readers)
            .field("pending", &state.pending.len())
            .field("worker_running", &state.worker_running)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Switch the calling thread to fixed (non-timesharing) priority scheduling
#[cfg(unix)]
fn raise_priority(priority: i32) {
    // SAFETY: sched_param is plain data and pthread_self() is always valid
    let result = unsafe {
        let min = libc::sched_get_priority_min(libc::SCHED_FIFO);
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority.clamp(min, max);
        libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param)
    };

    if result == 0 {
        log::info!("Reader thread running at fixed priority {}", priority);
    } else {
        log::warn!(
            "Failed to set fixed priority {} for reader thread (error {}), staying time-shared",
            priority,
            result
        );
    }
}

#[cfg(not(unix))]
fn raise_priority(priority: i32) {
    log::debug!("Fixed thread priority {} not supported on this platform", priority);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fork::TrackLayout;
    use crate::session::NullSink;
    use crate::streaming::StreamReader;
    use std::io::Cursor;

    fn reader(pool: &Arc<ReaderPool>, len: usize) -> StreamReader {
        StreamReader::new(
            pool,
            Box::new(Cursor::new(vec![0u8; len])),
            TrackLayout::raw(len as u64),
            16,
            Arc::new(NullSink),
        )
        .unwrap()
    }

    #[test]
    fn test_idle_until_first_reader() {
        let pool = ReaderPool::with_priority(None);
        assert!(!pool.is_running());
        assert_eq!(pool.reader_count(), 0);

        let mut r = reader(&pool, 64);
        let _feed = r.connect().unwrap();
        assert!(pool.is_running());
        assert_eq!(pool.reader_count(), 1);

        r.disconnect();
        assert!(!pool.is_running());
        assert_eq!(pool.reader_count(), 0);
    }

    #[test]
    fn test_worker_survives_until_last_reader() {
        let pool = ReaderPool::with_priority(None);
        let mut a = reader(&pool, 64);
        let mut b = reader(&pool, 64);
        let _fa = a.connect().unwrap();
        let _fb = b.connect().unwrap();

        a.disconnect();
        assert!(pool.is_running());
        assert_eq!(pool.reader_count(), 1);

        b.disconnect();
        assert!(!pool.is_running());
    }

    #[test]
    fn test_restart_after_teardown() {
        let pool = ReaderPool::with_priority(None);
        let mut r = reader(&pool, 64);
        for _ in 0..3 {
            let _feed = r.connect().unwrap();
            assert!(pool.is_running());
            r.disconnect();
            assert!(!pool.is_running());
        }
    }

    #[test]
    fn test_deregister_without_registration_is_noop() {
        let pool = ReaderPool::with_priority(None);
        let r = reader(&pool, 64);
        pool.deregister_reader(&r.core());
        assert_eq!(pool.reader_count(), 0);
    }

    #[test]
    fn test_try_enqueue_fails_while_guard_held() {
        let pool = ReaderPool::with_priority(None);
        let r = reader(&pool, 64);
        let core = r.core();

        let held = pool.guard.lock();
        assert!(!pool.try_enqueue(&core));
        assert!(!pool.try_hold());
        drop(held);

        assert!(pool.try_hold());
    }

    #[test]
    fn test_enqueue_is_fifo_and_deduplicated() {
        // No reader registered: nothing services the queue
        let pool = ReaderPool::with_priority(None);
        let a = reader(&pool, 64);
        let b = reader(&pool, 64);

        assert!(pool.try_enqueue(&a.core()));
        assert!(pool.try_enqueue(&b.core()));
        assert!(pool.try_enqueue(&a.core()));
        assert_eq!(pool.pending_count(), 2);

        let state = pool.guard.lock();
        assert!(Arc::ptr_eq(&state.pending[0].reader, &a.core()));
        assert!(Arc::ptr_eq(&state.pending[1].reader, &b.core()));
    }
}
