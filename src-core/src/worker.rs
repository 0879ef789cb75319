//! Encoder worker thread.
//!
//! One worker per session drains the frame queue into the encoder handle.
//! It keeps running while the session is started and, after a stop request,
//! until the queue is empty. Then it closes the handle, fires the completion
//! callback and marks the session finished.

use crate::encoder::EncoderHandle;
use crate::frame::{FrameBufferPool, FrameUnit};
use crate::queue::FrameQueue;
use crate::status::SessionStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Invoked once per session after the encoder has been closed.
pub type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

/// Shared single-slot holder for the completion callback.
pub type CallbackSlot = Arc<Mutex<Option<CompletionCallback>>>;

/// Counters shared by the producer and the worker.
#[derive(Debug, Default)]
pub struct CaptureStats {
    captured_images: AtomicU64,
    captured_frames: AtomicU64,
    encoded_images: AtomicU64,
    encoded_frames: AtomicU64,
    encode_errors: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Images read back and queued
    pub captured_images: u64,
    /// Output frames those images represent
    pub captured_frames: u64,
    pub encoded_images: u64,
    pub encoded_frames: u64,
    pub encode_errors: u64,
    /// Images discarded by the queue's drop-oldest policy
    pub dropped_images: u64,
}

impl CaptureStats {
    pub fn reset(&self) {
        for counter in [
            &self.captured_images,
            &self.captured_frames,
            &self.encoded_images,
            &self.encoded_frames,
            &self.encode_errors,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    pub fn record_capture(&self, repeat: u32) {
        self.captured_images.fetch_add(1, Ordering::SeqCst);
        self.captured_frames.fetch_add(repeat as u64, Ordering::SeqCst);
    }

    fn record_encode(&self, repeat: u32) {
        self.encoded_images.fetch_add(1, Ordering::SeqCst);
        self.encoded_frames.fetch_add(repeat as u64, Ordering::SeqCst);
    }

    fn record_error(&self) {
        self.encode_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self, dropped_images: u64) -> StatsSnapshot {
        StatsSnapshot {
            captured_images: self.captured_images.load(Ordering::SeqCst),
            captured_frames: self.captured_frames.load(Ordering::SeqCst),
            encoded_images: self.encoded_images.load(Ordering::SeqCst),
            encoded_frames: self.encoded_frames.load(Ordering::SeqCst),
            encode_errors: self.encode_errors.load(Ordering::SeqCst),
            dropped_images,
        }
    }
}

/// Everything the worker thread owns or shares.
pub struct WorkerContext {
    pub queue: FrameQueue,
    pub pool: FrameBufferPool,
    pub status: SessionStatus,
    pub encoder: EncoderHandle,
    pub idle_backoff: Duration,
    pub on_complete: CallbackSlot,
    pub stats: Arc<CaptureStats>,
}

pub struct EncoderWorker {
    handle: Option<JoinHandle<()>>,
}

impl EncoderWorker {
    /// Start the worker thread. The session must already be `Started`.
    pub fn spawn(ctx: WorkerContext) -> Result<Self, std::io::Error> {
        let handle = std::thread::Builder::new()
            .name("panorec-encoder".to_string())
            .spawn(move || run(ctx))?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the worker to exit.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Encoder worker panicked");
            }
        }
    }
}

fn encode(ctx: &mut WorkerContext, unit: FrameUnit) {
    let repeat = unit.repeat_count;
    match ctx.encoder.send_frames(&unit.pixels, repeat) {
        Ok(()) => {
            ctx.stats.record_encode(repeat);
            debug!(
                "Encoded image x{} ({} frames total, {} queued)",
                repeat,
                ctx.encoder.frames_sent(),
                ctx.queue.len()
            );
        }
        Err(e) => {
            ctx.stats.record_error();
            warn!("Failed to encode frame: {}", e);
        }
    }
    ctx.pool.checkin(unit.pixels);
}

fn run(mut ctx: WorkerContext) {
    info!("Encoder worker started");

    loop {
        // Read status before popping: every push happens before the stop
        // request, so an empty queue after a stop means nothing is left
        let running = ctx.status.is_started();
        match ctx.queue.try_pop() {
            Some(unit) => encode(&mut ctx, unit),
            None if running => {
                if let Some(unit) = ctx.queue.pop_timeout(ctx.idle_backoff) {
                    encode(&mut ctx, unit);
                }
            }
            None => break,
        }
    }

    let WorkerContext {
        encoder,
        status,
        on_complete,
        ..
    } = ctx;

    let frames = encoder.frames_sent();
    if let Err(e) = encoder.close() {
        warn!("Failed to close encoder: {}", e);
    }

    let callback = on_complete
        .lock()
        .ok()
        .and_then(|slot| slot.as_ref().map(Arc::clone));
    if let Some(callback) = callback {
        callback();
    }

    status.finish();
    info!("Encoder worker finished after {} frames", frames);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Destination, EncoderParams, ProjectionCode};
    use crate::queue::QueuePolicy;
    use crate::testing::RecordingBackend;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn context(backend: &RecordingBackend, status: &SessionStatus) -> (WorkerContext, CallbackSlot) {
        let params = EncoderParams {
            width: 2,
            height: 2,
            framerate: 30,
            bitrate_kbps: 1000,
            projection: ProjectionCode::None,
            destination: Destination::Stream("rtmp://h/a".into()),
            tool_path: None,
        };
        let slot: CallbackSlot = Arc::new(Mutex::new(None));
        let ctx = WorkerContext {
            queue: FrameQueue::new(QueuePolicy::Unbounded),
            pool: FrameBufferPool::new(2, 2, 4),
            status: status.clone(),
            encoder: EncoderHandle::open(backend, &params).unwrap(),
            idle_backoff: Duration::from_secs(1),
            on_complete: Arc::clone(&slot),
            stats: Arc::new(CaptureStats::default()),
        };
        (ctx, slot)
    }

    fn wait_finished(status: &SessionStatus) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !status.is_finished() {
            assert!(Instant::now() < deadline, "worker did not finish");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_drains_queue_before_finishing() {
        let backend = RecordingBackend::new();
        let status = SessionStatus::new();
        status.try_start().unwrap();
        let (ctx, slot) = context(&backend, &status);
        let queue = ctx.queue.clone();
        let pool = ctx.pool.clone();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        *slot.lock().unwrap() = Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        for repeat in 1..=3 {
            queue.try_push(FrameUnit::new(vec![0u8; 12], repeat));
        }
        let worker = EncoderWorker::spawn(ctx).unwrap();
        status.request_stop().unwrap();
        queue.close();
        wait_finished(&status);
        worker.join();

        let log = backend.log();
        assert_eq!(log.repeats, vec![1, 2, 3]);
        assert_eq!(log.closed, 1);
        assert_eq!(log.cleaned, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_stop_wakes_idle_worker() {
        let backend = RecordingBackend::new();
        let status = SessionStatus::new();
        status.try_start().unwrap();
        let (mut ctx, _slot) = context(&backend, &status);
        ctx.idle_backoff = Duration::from_secs(30);
        let queue = ctx.queue.clone();

        let worker = EncoderWorker::spawn(ctx).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let stopped_at = Instant::now();
        status.request_stop().unwrap();
        queue.close();
        wait_finished(&status);
        assert!(stopped_at.elapsed() < Duration::from_secs(5));
        worker.join();
    }

    #[test]
    fn test_encode_errors_keep_draining() {
        let backend = RecordingBackend::failing_sends();
        let status = SessionStatus::new();
        status.try_start().unwrap();
        let (ctx, _slot) = context(&backend, &status);
        let queue = ctx.queue.clone();
        let pool = ctx.pool.clone();
        let stats = Arc::clone(&ctx.stats);

        queue.try_push(FrameUnit::new(vec![0u8; 12], 1));
        queue.try_push(FrameUnit::new(vec![0u8; 12], 1));
        status.request_stop().unwrap();
        let worker = EncoderWorker::spawn(ctx).unwrap();
        wait_finished(&status);
        worker.join();

        assert_eq!(stats.snapshot(0).encode_errors, 2);
        assert_eq!(pool.available(), 2);
        assert!(queue.is_empty());
    }
}
