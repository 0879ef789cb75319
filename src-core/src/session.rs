//! Video capture session.
//!
//! [`VideoCapture`] is driven from the render thread: the host calls
//! [`VideoCapture::tick`] once per rendered frame and
//! [`VideoCapture::end_of_frame`] once the frame is complete. Captured images
//! are handed to a background worker that feeds the encoder.

use crate::config::{get_output_dir, AppConfig, CaptureConfig, CaptureFormat, CaptureMode, CaptureSettings};
use crate::encoder::{Destination, EncoderBackend, EncoderHandle, EncoderParams, FfmpegBackend, ProjectionCode};
use crate::error::CaptureError;
use crate::frame::{FrameBufferPool, FrameUnit};
use crate::output::generate_output_path;
use crate::pacer::FramePacer;
use crate::panorama::Reprojector;
use crate::queue::{FrameQueue, PushOutcome, QueuePolicy};
use crate::readback::{GpuReadback, RenderHost, TargetDesc, TargetId};
use crate::snapshot;
use crate::status::{CaptureStatus, SessionStatus};
use crate::worker::{CallbackSlot, CaptureStats, EncoderWorker, StatsSnapshot, WorkerContext};
use panorec_common::validate_streaming_address;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Result of a start request that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A session is already started or still draining; nothing changed
    AlreadyRunning,
    /// Live streaming without a valid rtmp address; nothing changed
    InvalidAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// No session was started; nothing changed
    NotRunning,
}

/// Producer-side state of a running session.
struct ActiveSession {
    config: CaptureConfig,
    pacer: FramePacer,
    queue: FrameQueue,
    pool: FrameBufferPool,
    readback: GpuReadback,
    /// Where normal-format frames are read from
    capture_target: TargetId,
    owns_target: bool,
    reprojector: Option<Reprojector>,
    pending_readback: bool,
}

pub struct VideoCapture<H: RenderHost> {
    host: H,
    settings: CaptureSettings,
    backend: Arc<dyn EncoderBackend>,
    output_dir: PathBuf,
    tool_path: Option<PathBuf>,
    status: SessionStatus,
    on_complete: CallbackSlot,
    stats: Arc<CaptureStats>,
    active: Option<ActiveSession>,
    worker: Option<EncoderWorker>,
    /// Queue of the latest session, kept for statistics after stop
    last_queue: Option<FrameQueue>,
    destination: Option<Destination>,
}

impl<H: RenderHost> VideoCapture<H> {
    pub fn new(host: H, settings: CaptureSettings, backend: Arc<dyn EncoderBackend>) -> Self {
        Self {
            host,
            settings,
            backend,
            output_dir: std::env::temp_dir().join("panorec"),
            tool_path: None,
            status: SessionStatus::new(),
            on_complete: Arc::new(Mutex::new(None)),
            stats: Arc::new(CaptureStats::default()),
            active: None,
            worker: None,
            last_queue: None,
            destination: None,
        }
    }

    /// Session using the persisted configuration and the ffmpeg backend.
    pub fn from_config(host: H, config: &AppConfig) -> Self {
        Self::new(host, config.capture.clone(), Arc::new(FfmpegBackend::new()))
            .with_output_dir(get_output_dir(config))
            .with_tool_path(config.output.encoder_path.as_ref().map(PathBuf::from))
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = dir;
        self
    }

    pub fn with_tool_path(mut self, tool_path: Option<PathBuf>) -> Self {
        self.tool_path = tool_path;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn status(&self) -> CaptureStatus {
        self.status.get()
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Replace the settings. Refused while a session is running.
    pub fn set_settings(&mut self, settings: CaptureSettings) -> bool {
        if !self.status.get().can_start() {
            warn!("Cannot change capture settings while capturing");
            return false;
        }
        self.settings = settings;
        true
    }

    /// Resolved geometry of the running session.
    pub fn config(&self) -> Option<&CaptureConfig> {
        self.active.as_ref().map(|a| &a.config)
    }

    /// Register the callback fired once per session after the encoder closed.
    pub fn on_complete<F>(&mut self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.on_complete.lock() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Output file of the latest session (local mode only).
    pub fn output_path(&self) -> Option<&Path> {
        self.destination.as_ref().and_then(Destination::file_path)
    }

    pub fn stats(&self) -> StatsSnapshot {
        let dropped = self
            .last_queue
            .as_ref()
            .map_or(0, FrameQueue::dropped_frames);
        self.stats.snapshot(dropped)
    }

    pub fn start_capture(&mut self) -> Result<StartOutcome, CaptureError> {
        let current = self.status.get();
        if !current.can_start() {
            warn!("Capture already {}, ignoring start request", current);
            return Ok(StartOutcome::AlreadyRunning);
        }

        let stream_address = match self.settings.mode {
            CaptureMode::LiveStreaming => {
                let address = self.settings.streaming_address.clone().unwrap_or_default();
                if let Err(e) = validate_streaming_address(&address) {
                    warn!("Cannot start live streaming: {}", e);
                    return Ok(StartOutcome::InvalidAddress);
                }
                Some(address)
            }
            CaptureMode::Local => None,
        };

        self.settings.enforce_constraints();

        let destination = match stream_address {
            Some(address) => Destination::Stream(address),
            None => Destination::File(generate_output_path(&self.output_dir, "capture", "mp4")?),
        };

        let config = self.settings.resolve(self.host.surface_size())?;

        // The previous worker has already finished; reap it
        if let Some(worker) = self.worker.take() {
            worker.join();
        }

        let (capture_target, owns_target, reprojector) = self.acquire_targets(&config)?;

        let params = EncoderParams {
            width: config.width,
            height: config.height,
            framerate: config.framerate,
            bitrate_kbps: config.bitrate_kbps,
            projection: ProjectionCode::from_projection(config.projection),
            destination: destination.clone(),
            tool_path: self.tool_path.clone(),
        };
        let encoder = match EncoderHandle::open(self.backend.as_ref(), &params) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to open encoder: {}", e);
                self.release_targets(capture_target, owns_target, reprojector);
                return Err(e.into());
            }
        };

        let pool = FrameBufferPool::new(config.width, config.height, pool_capacity(config.queue_policy));
        let queue = FrameQueue::new(config.queue_policy);

        if let Err(state) = self.status.try_start() {
            warn!("Capture state changed to {} during start", state);
            drop(encoder);
            self.release_targets(capture_target, owns_target, reprojector);
            return Ok(StartOutcome::AlreadyRunning);
        }
        self.stats.reset();

        let worker = EncoderWorker::spawn(WorkerContext {
            queue: queue.clone(),
            pool: pool.clone(),
            status: self.status.clone(),
            encoder,
            idle_backoff: config.idle_backoff,
            on_complete: Arc::clone(&self.on_complete),
            stats: Arc::clone(&self.stats),
        });
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                // The context, and with it the encoder handle, was dropped
                warn!("Failed to spawn encoder worker: {}", e);
                self.status.finish();
                self.release_targets(capture_target, owns_target, reprojector);
                return Err(CaptureError::Io(e));
            }
        };

        let pacer = if config.offline_render {
            FramePacer::offline(config.framerate)
        } else {
            FramePacer::new(config.framerate)
        };

        info!(
            "Capture started: {:?} {}x{} @ {} fps -> {:?}",
            config.format, config.width, config.height, config.framerate, destination
        );

        self.active = Some(ActiveSession {
            readback: GpuReadback::new(config.width, config.height),
            config,
            pacer,
            queue: queue.clone(),
            pool,
            capture_target,
            owns_target,
            reprojector,
            pending_readback: false,
        });
        self.worker = Some(worker);
        self.last_queue = Some(queue);
        self.destination = Some(destination);
        Ok(StartOutcome::Started)
    }

    fn acquire_targets(
        &mut self,
        config: &CaptureConfig,
    ) -> Result<(TargetId, bool, Option<Reprojector>), CaptureError> {
        match config.format {
            CaptureFormat::Panorama => {
                let reprojector = Reprojector::new(&mut self.host, config)?;
                Ok((TargetId::SURFACE, false, Some(reprojector)))
            }
            CaptureFormat::Normal if config.dedicated => {
                let target = self.host.create_target(&TargetDesc::new(
                    config.width,
                    config.height,
                    config.antialiasing,
                ))?;
                self.host.attach_capture_target(Some(target));
                Ok((target, true, None))
            }
            CaptureFormat::Normal => Ok((TargetId::SURFACE, false, None)),
        }
    }

    fn release_targets(&mut self, target: TargetId, owned: bool, reprojector: Option<Reprojector>) {
        if owned {
            self.host.attach_capture_target(None);
            self.host.release_target(target);
        }
        if let Some(mut reprojector) = reprojector {
            reprojector.release(&mut self.host);
        }
    }

    /// Request a stop. The worker drains queued frames in the background and
    /// marks the session finished; this call never blocks on it.
    pub fn stop_capture(&mut self) -> StopOutcome {
        if let Err(state) = self.status.request_stop() {
            warn!("Capture is {}, ignoring stop request", state);
            return StopOutcome::NotRunning;
        }

        if let Some(mut active) = self.active.take() {
            if active.pending_readback {
                active.pacer.cancel_capture();
            }
            active.queue.close();
            info!(
                "Capture stopped after {} frames ({:.2}s), {} images queued",
                active.pacer.captured_frame_count(),
                active.pacer.capturing_time(),
                active.queue.len()
            );
            self.release_targets(active.capture_target, active.owns_target, active.reprojector);
        }
        StopOutcome::Stopped
    }

    /// Account for one rendered frame of `delta` seconds.
    ///
    /// Normal captures are scheduled here and read back in `end_of_frame`;
    /// panoramas render their six faces immediately.
    pub fn tick(&mut self, delta: f64) -> Result<(), CaptureError> {
        if !self.status.is_started() {
            return Ok(());
        }
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if !active.pacer.advance(delta) {
            return Ok(());
        }
        active.pacer.begin_capture();

        let Some(reprojector) = active.reprojector.as_mut() else {
            active.pending_readback = true;
            return Ok(());
        };

        let mut buffer = active.pool.checkout();
        if let Err(e) = reprojector.capture(&mut self.host, &mut buffer) {
            active.pacer.cancel_capture();
            active.pool.checkin(buffer);
            return Err(e);
        }
        let repeat = active.pacer.complete_capture();
        emit(active, &self.stats, buffer, repeat);
        Ok(())
    }

    /// End-of-frame sync point: performs a scheduled readback.
    pub fn end_of_frame(&mut self) -> Result<(), CaptureError> {
        if !self.status.is_started() {
            return Ok(());
        }
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if !active.pending_readback {
            return Ok(());
        }
        active.pending_readback = false;

        let mut buffer = active.pool.checkout();
        if let Err(e) = active
            .readback
            .read(&mut self.host, active.capture_target, &mut buffer)
        {
            active.pacer.cancel_capture();
            active.pool.checkin(buffer);
            return Err(e);
        }
        let repeat = active.pacer.complete_capture();
        emit(active, &self.stats, buffer, repeat);
        Ok(())
    }

    /// Write the current capture target (or the presented surface when idle)
    /// to a PNG file.
    pub fn save_snapshot(&mut self, path: &Path) -> Result<(), CaptureError> {
        let (target, width, height) = match &self.active {
            Some(active) if active.reprojector.is_none() => {
                (active.capture_target, active.config.width, active.config.height)
            }
            _ => {
                let (w, h) = self.host.surface_size();
                (TargetId::SURFACE, w, h)
            }
        };
        let readback = GpuReadback::new(width, height);
        let mut buffer = vec![0u8; readback.frame_bytes()];
        readback.read(&mut self.host, target, &mut buffer)?;
        snapshot::save_png(path, &buffer, width, height)
    }

    /// Stop if needed and wait for the worker to finish.
    pub fn shutdown(&mut self) {
        if self.status.is_started() {
            self.stop_capture();
        }
        if let Some(worker) = self.worker.take() {
            worker.join();
        }
    }

    /// Delete the latest local output file. Refused while a session is
    /// running or draining. Returns whether a file was removed.
    pub fn cleanup(&mut self) -> Result<bool, CaptureError> {
        if !self.status.get().can_start() {
            warn!("Capture is {}, refusing to delete its output", self.status.get());
            return Ok(false);
        }
        match self.destination.as_ref().and_then(Destination::file_path) {
            Some(path) if path.exists() => {
                std::fs::remove_file(path)?;
                info!("Removed capture output {:?}", path);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl<H: RenderHost> Drop for VideoCapture<H> {
    fn drop(&mut self) {
        if self.status.is_started() {
            self.stop_capture();
        }
    }
}

fn emit(active: &mut ActiveSession, stats: &CaptureStats, buffer: Vec<u8>, repeat: u32) {
    if repeat == 0 {
        active.pool.checkin(buffer);
        return;
    }
    stats.record_capture(repeat);
    if let PushOutcome::DroppedOldest { buffer } = active.queue.try_push(FrameUnit::new(buffer, repeat)) {
        active.pool.checkin(buffer);
    }
}

fn pool_capacity(policy: QueuePolicy) -> usize {
    match policy {
        QueuePolicy::Unbounded => 8,
        QueuePolicy::DropOldest { capacity } | QueuePolicy::BlockProducer { capacity } => {
            capacity.max(1) + 2
        }
    }
}
