//! Forks and sinks shared by the integration tests

#![allow(dead_code)]

use cdda_stream::session::StatusSink;
use cdda_stream::{Guard, PlayStatus, RenderFeed};
use parking_lot::Mutex;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deterministic, non-repeating-looking track bytes
pub fn track_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

/// Sink recording every status it receives
#[derive(Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<PlayStatus>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self, status: PlayStatus) -> usize {
        self.seen.lock().iter().filter(|&&s| s == status).count()
    }

    pub fn saw(&self, status: PlayStatus) -> bool {
        self.count(status) > 0
    }
}

impl StatusSink for RecordingSink {
    fn post(&self, status: PlayStatus) -> bool {
        self.seen.lock().push(status);
        true
    }
}

/// In-memory fork whose seeks block while the gate is closed
pub struct GatedFork {
    inner: Cursor<Vec<u8>>,
    gate: Arc<Guard<bool>>,
}

impl GatedFork {
    /// Fork plus the handle that opens (`true`) or closes (`false`) it
    pub fn new(data: Vec<u8>) -> (Self, Arc<Guard<bool>>) {
        let gate = Arc::new(Guard::new(true));
        let fork = GatedFork {
            inner: Cursor::new(data),
            gate: Arc::clone(&gate),
        };
        (fork, gate)
    }
}

pub fn set_gate(gate: &Guard<bool>, open: bool) {
    *gate.lock() = open;
    gate.notify();
}

impl Read for GatedFork {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for GatedFork {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut open = self.gate.lock();
        while !*open {
            self.gate.wait(&mut open);
        }
        drop(open);
        self.inner.seek(pos)
    }
}

/// In-memory fork whose seeks fail with `code` after the first `good` ones
pub struct FailingFork {
    inner: Cursor<Vec<u8>>,
    good: usize,
    failures: usize,
    code: i32,
}

impl FailingFork {
    /// Fails every seek after the first `good`
    pub fn new(data: Vec<u8>, good: usize, code: i32) -> Self {
        Self::transient(data, good, usize::MAX, code)
    }

    /// Fails `failures` seeks after the first `good`, then works again
    pub fn transient(data: Vec<u8>, good: usize, failures: usize, code: i32) -> Self {
        FailingFork {
            inner: Cursor::new(data),
            good,
            failures,
            code,
        }
    }
}

impl Read for FailingFork {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for FailingFork {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if self.good > 0 {
            self.good -= 1;
        } else if self.failures > 0 {
            if self.failures != usize::MAX {
                self.failures -= 1;
            }
            return Err(io::Error::from_raw_os_error(self.code));
        }
        self.inner.seek(pos)
    }
}

/// Poll `cond` until it holds or five seconds pass
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
    cond()
}

/// Render in `block`-sized cycles until `done` holds, collecting track bytes
pub fn render_until(
    feed: &mut RenderFeed,
    block: usize,
    mut done: impl FnMut() -> bool,
) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut out = Vec::new();
    let mut buf = vec![0u8; block];
    while !done() && Instant::now() < deadline {
        let n = feed.render(&mut buf);
        out.extend_from_slice(&buf[..n]);
        if n < block {
            std::thread::sleep(Duration::from_micros(100));
        }
    }
    out
}

fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(id);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
    out
}

/// Minimal AIFC file (FVER, COMM, SSND) holding `pcm`
pub fn aifc_file(pcm: &[u8]) -> Vec<u8> {
    let mut ssnd = Vec::new();
    ssnd.extend_from_slice(&0u32.to_be_bytes());
    ssnd.extend_from_slice(&0u32.to_be_bytes());
    ssnd.extend_from_slice(pcm);

    let body = [
        chunk(b"FVER", &[0xA2, 0x80, 0x51, 0x40]),
        chunk(b"COMM", &[0u8; 24]),
        chunk(b"SSND", &ssnd),
    ]
    .concat();

    let mut out = Vec::new();
    out.extend_from_slice(b"FORM");
    out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
    out.extend_from_slice(b"AIFC");
    out.extend_from_slice(&body);
    out
}
