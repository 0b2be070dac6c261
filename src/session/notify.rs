//! Playback notifications
//!
//! Statuses travel from the reader thread and the render feed to whichever
//! session owns the reader, through a [`StatusSink`].

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Status code reported for an underrun
pub const UNDERRUN_CODE: i32 = -10000;
/// Status code reported when a track has finished
pub const FINISHED_CODE: i32 = -10001;

/// Playback condition delivered to a session's notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStatus {
    /// Render side asked for data before the reader thread delivered it
    Underrun,
    /// Every byte up to end-of-file has been rendered
    Finished,
    /// Background read failed with this OS error code (`-1` if unknown)
    IoError(i32),
}

impl PlayStatus {
    /// Numeric status code
    pub fn code(&self) -> i32 {
        match *self {
            PlayStatus::Underrun => UNDERRUN_CODE,
            PlayStatus::Finished => FINISHED_CODE,
            PlayStatus::IoError(code) => code,
        }
    }

    /// Whether playback can carry on after this status
    pub fn is_transient(&self) -> bool {
        matches!(self, PlayStatus::Underrun)
    }
}

impl fmt::Display for PlayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayStatus::Underrun => write!(f, "buffer underrun"),
            PlayStatus::Finished => write!(f, "playback finished"),
            PlayStatus::IoError(code) => write!(f, "read error (code {})", code),
        }
    }
}

/// Notification callback installed on a session
///
/// Called from the reader thread or the render thread; must not block.
pub type Notifier = Box<dyn Fn(PlayStatus) + Send + Sync>;

/// Receiver of a reader's statuses
pub trait StatusSink: Send + Sync {
    /// Deliver `status`; `false` if it could not be delivered right now
    fn post(&self, status: PlayStatus) -> bool;

    /// Whether rendering should produce silence only
    fn halted(&self) -> bool {
        false
    }
}

/// Sink that accepts and drops every status
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn post(&self, _status: PlayStatus) -> bool {
        true
    }
}

/// Shared between a session and its reader
#[derive(Default)]
pub(crate) struct SessionLink {
    notifier: RwLock<Option<Notifier>>,
    halted: AtomicBool,
    disconnect_requested: AtomicBool,
}

impl SessionLink {
    pub(crate) fn set_notifier(&self, notifier: Option<Notifier>) {
        *self.notifier.write() = notifier;
    }

    pub(crate) fn has_notifier(&self) -> bool {
        self.notifier.read().is_some()
    }

    /// Clear halt and pending-disconnect state for a new connection
    pub(crate) fn reset(&self) {
        self.halted.store(false, Ordering::Release);
        self.disconnect_requested.store(false, Ordering::Release);
    }

    /// Consume a pending disconnect request
    pub(crate) fn take_disconnect_request(&self) -> bool {
        self.disconnect_requested.swap(false, Ordering::AcqRel)
    }

    /// What happens to a status nobody listens for
    fn default_policy(&self, status: PlayStatus) {
        if status.is_transient() {
            log::debug!("Playback: {}", status);
            return;
        }

        if !self.halted.swap(true, Ordering::AcqRel) {
            log::warn!("Playback stopped: {} (status {})", status, status.code());
        }
        self.disconnect_requested.store(true, Ordering::Release);
    }
}

impl StatusSink for SessionLink {
    fn post(&self, status: PlayStatus) -> bool {
        let Some(slot) = self.notifier.try_read() else {
            log::trace!("Notifier slot busy, {} deferred", status);
            return false;
        };
        match slot.as_ref() {
            Some(notify) => notify(status),
            None => self.default_policy(status),
        }
        true
    }

    fn halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SessionLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLink")
            .field("has_notifier", &self.has_notifier())
            .field("halted", &self.halted.load(Ordering::Relaxed))
            .field(
                "disconnect_requested",
                &self.disconnect_requested.load(Ordering::Relaxed),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_status_codes() {
        assert_eq!(PlayStatus::Underrun.code(), -10000);
        assert_eq!(PlayStatus::Finished.code(), -10001);
        assert_eq!(PlayStatus::IoError(5).code(), 5);
    }

    #[test]
    fn test_default_policy_ignores_underrun() {
        let link = SessionLink::default();
        assert!(link.post(PlayStatus::Underrun));
        assert!(!link.halted());
        assert!(!link.take_disconnect_request());
    }

    #[test]
    fn test_default_policy_halts_on_error() {
        let link = SessionLink::default();
        assert!(link.post(PlayStatus::IoError(-36)));
        assert!(link.halted());
        assert!(link.take_disconnect_request());
        assert!(!link.take_disconnect_request());

        link.reset();
        assert!(!link.halted());
    }

    #[test]
    fn test_notifier_replaces_default_policy() {
        let link = SessionLink::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        link.set_notifier(Some(Box::new(move |_status| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        link.post(PlayStatus::Finished);
        link.post(PlayStatus::Underrun);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(!link.halted());
    }

    #[test]
    fn test_post_deferred_while_slot_written() {
        let link = SessionLink::default();
        let held = link.notifier.write();
        assert!(!link.post(PlayStatus::Finished));
        drop(held);
        assert!(link.post(PlayStatus::Finished));
    }
}
