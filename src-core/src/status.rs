//! Session lifecycle state shared by the render thread and the encoder worker.
//!
//! The render thread (producer) is the only writer of `Started` and
//! `Stopped`; the encoder worker (consumer) is the only writer of `Finish`.
//! All accesses are sequentially consistent so a status written on one
//! thread is observed by the other without extra locking.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Capture session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    /// No session has been started yet
    NotStart,
    /// Frames are being captured and encoded
    Started,
    /// Stop requested; the worker is draining queued frames
    Stopped,
    /// The worker drained the queue and closed the encoder
    Finish,
}

impl CaptureStatus {
    fn to_u8(self) -> u8 {
        match self {
            CaptureStatus::NotStart => 0,
            CaptureStatus::Started => 1,
            CaptureStatus::Stopped => 2,
            CaptureStatus::Finish => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => CaptureStatus::Started,
            2 => CaptureStatus::Stopped,
            3 => CaptureStatus::Finish,
            _ => CaptureStatus::NotStart,
        }
    }

    /// Whether a new session may be started from this status.
    pub fn can_start(self) -> bool {
        matches!(self, CaptureStatus::NotStart | CaptureStatus::Finish)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaptureStatus::NotStart => "not started",
            CaptureStatus::Started => "started",
            CaptureStatus::Stopped => "stopped",
            CaptureStatus::Finish => "finished",
        }
    }
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, cloneable status cell.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    inner: Arc<AtomicU8>,
}

impl SessionStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(CaptureStatus::NotStart.to_u8())),
        }
    }

    pub fn get(&self) -> CaptureStatus {
        CaptureStatus::from_u8(self.inner.load(Ordering::SeqCst))
    }

    /// Producer: mark the session started.
    ///
    /// Fails with the current status unless it is `NotStart` or `Finish`.
    pub fn try_start(&self) -> Result<(), CaptureStatus> {
        let current = self.get();
        if !current.can_start() {
            return Err(current);
        }
        self.inner
            .compare_exchange(
                current.to_u8(),
                CaptureStatus::Started.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(CaptureStatus::from_u8)
    }

    /// Producer: request a stop. Only valid while `Started`.
    pub fn request_stop(&self) -> Result<(), CaptureStatus> {
        self.inner
            .compare_exchange(
                CaptureStatus::Started.to_u8(),
                CaptureStatus::Stopped.to_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(CaptureStatus::from_u8)
    }

    /// Consumer: mark the session finished.
    pub fn finish(&self) {
        self.inner
            .store(CaptureStatus::Finish.to_u8(), Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.get() == CaptureStatus::Started
    }

    pub fn is_finished(&self) -> bool {
        self.get() == CaptureStatus::Finish
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_status() {
        let status = SessionStatus::new();
        assert_eq!(status.get(), CaptureStatus::NotStart);
        assert!(!status.is_finished());
    }

    #[test]
    fn test_full_lifecycle() {
        let status = SessionStatus::new();
        assert!(status.try_start().is_ok());
        assert!(status.is_started());
        assert!(status.request_stop().is_ok());
        assert_eq!(status.get(), CaptureStatus::Stopped);
        status.finish();
        assert!(status.is_finished());

        // A finished session can be started again
        assert!(status.try_start().is_ok());
        assert!(status.is_started());
    }

    #[test]
    fn test_start_refused_while_running() {
        let status = SessionStatus::new();
        status.try_start().unwrap();
        assert_eq!(status.try_start(), Err(CaptureStatus::Started));

        status.request_stop().unwrap();
        assert_eq!(status.try_start(), Err(CaptureStatus::Stopped));
    }

    #[test]
    fn test_stop_only_from_started() {
        let status = SessionStatus::new();
        assert_eq!(status.request_stop(), Err(CaptureStatus::NotStart));

        status.try_start().unwrap();
        status.request_stop().unwrap();
        assert_eq!(status.request_stop(), Err(CaptureStatus::Stopped));
    }

    #[test]
    fn test_clones_share_state_across_threads() {
        let status = SessionStatus::new();
        status.try_start().unwrap();

        let worker_view = status.clone();
        let handle = std::thread::spawn(move || {
            while worker_view.is_started() {
                std::thread::yield_now();
            }
            worker_view.finish();
        });

        status.request_stop().unwrap();
        handle.join().unwrap();
        assert!(status.is_finished());
    }
}
