//! Post-capture merge of a video track with a separately recorded audio track.
//!
//! The merge runs in an external process. [`VideoMerger`] starts it, then
//! polls for the output file with a bounded number of retries.

use crate::error::CaptureError;
use crate::output::generate_output_path;
use ffmpeg_sidecar::command::FfmpegCommand;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One merge run in an external process.
pub trait MergeJob: Send {
    /// Start merging. `output` must only appear once it is complete.
    fn merge(&mut self, video: &Path, audio: &Path, output: &Path) -> Result<(), CaptureError>;

    /// Release the process and any partial output.
    fn clean(&mut self);
}

pub trait MergeBackend: Send + Sync {
    fn get(&self) -> Box<dyn MergeJob>;
}

/// How long to wait for the merged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 100,
            interval: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Total time waited before giving up.
    pub fn budget(&self) -> Duration {
        self.interval * self.attempts
    }
}

#[derive(Clone)]
pub struct VideoMerger {
    backend: Arc<dyn MergeBackend>,
    retry: RetryPolicy,
    output_dir: PathBuf,
    path: Option<PathBuf>,
}

impl VideoMerger {
    pub fn new(backend: Arc<dyn MergeBackend>, output_dir: PathBuf) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
            output_dir,
            path: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The merged file of the last successful merge.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Merge into a new file in the output directory. Blocks until the merged
    /// file appears or the retry budget is spent.
    pub fn merge(&mut self, video: &Path, audio: &Path) -> bool {
        self.path = None;
        let output = match generate_output_path(&self.output_dir, "merged", "mp4") {
            Ok(path) => path,
            Err(e) => {
                warn!("Cannot prepare merge output in {:?}: {}", self.output_dir, e);
                return false;
            }
        };
        let merged = self.merge_into(video, audio, &output);
        if merged {
            self.path = Some(output);
        }
        merged
    }

    /// Merge into `output`. Blocking.
    pub fn merge_into(&self, video: &Path, audio: &Path, output: &Path) -> bool {
        for input in [video, audio] {
            if !input.exists() {
                // May still be finalizing; the wait below decides
                warn!("Merge input {:?} does not exist yet", input);
            }
        }

        let mut job = self.backend.get();
        if let Err(e) = job.merge(video, audio, output) {
            warn!("Failed to start merge: {}", e);
            job.clean();
            return false;
        }

        for attempt in 0..self.retry.attempts {
            if output.exists() {
                info!("Merged {:?} + {:?} -> {:?}", video, audio, output);
                job.clean();
                return true;
            }
            debug!("Waiting for merge output (attempt {})", attempt + 1);
            std::thread::sleep(self.retry.interval);
        }
        if output.exists() {
            job.clean();
            return true;
        }

        warn!(
            "Merge output {:?} did not appear within {:?}",
            output,
            self.retry.budget()
        );
        job.clean();
        false
    }

    /// [`VideoMerger::merge`] on tokio's blocking pool. Returns the merged
    /// file on success.
    pub async fn merge_async(&self, video: PathBuf, audio: PathBuf) -> Option<PathBuf> {
        let mut merger = self.clone();
        tokio::task::spawn_blocking(move || {
            if merger.merge(&video, &audio) {
                merger.path
            } else {
                None
            }
        })
        .await
        .ok()
        .flatten()
    }
}

/// Merges with `ffmpeg`: video stream copied, audio encoded to AAC.
#[derive(Debug, Clone, Default)]
pub struct FfmpegMerger {
    tool_path: Option<PathBuf>,
}

impl FfmpegMerger {
    pub fn new(tool_path: Option<PathBuf>) -> Self {
        Self { tool_path }
    }
}

impl MergeBackend for FfmpegMerger {
    fn get(&self) -> Box<dyn MergeJob> {
        Box::new(FfmpegMergeJob {
            tool_path: self.tool_path.clone(),
            child: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            waiter: None,
        })
    }
}

struct FfmpegMergeJob {
    tool_path: Option<PathBuf>,
    child: Option<Arc<Mutex<Child>>>,
    cancelled: Arc<AtomicBool>,
    waiter: Option<JoinHandle<()>>,
}

/// `name.mp4` -> `name.partial.mp4`, so ffmpeg still infers the container.
fn partial_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "merged".to_string());
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "mp4".to_string());
    output.with_file_name(format!("{}.partial.{}", stem, ext))
}

impl MergeJob for FfmpegMergeJob {
    fn merge(&mut self, video: &Path, audio: &Path, output: &Path) -> Result<(), CaptureError> {
        let tool = crate::encoder::resolve_encoder_path(self.tool_path.as_deref())?;
        let partial = partial_path(output);

        let mut command = FfmpegCommand::new_with_path(&tool);
        command
            .args(["-i", video.to_string_lossy().as_ref()])
            .args(["-i", audio.to_string_lossy().as_ref()])
            .args(["-c:v", "copy"])
            .args(["-c:a", "aac"])
            .args(["-b:a", "192k"])
            .args(["-map", "0:v"])
            .args(["-map", "1:a"])
            .args(["-shortest"])
            .args(["-movflags", "+faststart"])
            .args(["-loglevel", "error"])
            .args(["-y"])
            .arg(partial.to_string_lossy().to_string());

        let inner = command.as_inner_mut();
        inner.stdin(Stdio::null());
        inner.stdout(Stdio::null());
        inner.stderr(Stdio::piped());

        let child = inner
            .spawn()
            .map_err(|e| CaptureError::Merge(format!("failed to start {:?}: {}", tool, e)))?;
        let child = Arc::new(Mutex::new(child));
        self.child = Some(Arc::clone(&child));

        let cancelled = Arc::clone(&self.cancelled);
        let output = output.to_path_buf();
        let waiter = std::thread::Builder::new()
            .name("panorec-merge".to_string())
            .spawn(move || wait_and_publish(child, cancelled, partial, output))
            .map_err(|e| CaptureError::Merge(format!("failed to spawn merge waiter: {}", e)))?;
        self.waiter = Some(waiter);
        Ok(())
    }

    fn clean(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(child) = self.child.take() {
            if let Ok(mut child) = child.lock() {
                if matches!(child.try_wait(), Ok(None)) {
                    let _ = child.kill();
                }
            }
        }
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.join();
        }
    }
}

/// Wait for ffmpeg, then rename the partial file into place unless the job
/// was cleaned meanwhile.
fn wait_and_publish(
    child: Arc<Mutex<Child>>,
    cancelled: Arc<AtomicBool>,
    partial: PathBuf,
    output: PathBuf,
) {
    let status = loop {
        let polled = match child.lock() {
            Ok(mut child) => child.try_wait(),
            Err(_) => return,
        };
        match polled {
            Ok(Some(status)) => break status,
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            Err(e) => {
                warn!("Failed to wait for merge process: {}", e);
                let _ = std::fs::remove_file(&partial);
                return;
            }
        }
    };

    if cancelled.load(Ordering::SeqCst) || !status.success() {
        if !status.success() && !cancelled.load(Ordering::SeqCst) {
            let mut message = String::new();
            if let Ok(mut child) = child.lock() {
                if let Some(mut stderr) = child.stderr.take() {
                    let _ = stderr.read_to_string(&mut message);
                }
            }
            warn!(
                "Merge process failed ({:?}): {}",
                status.code(),
                message.lines().last().unwrap_or("no output")
            );
        }
        let _ = std::fs::remove_file(&partial);
        return;
    }

    if let Err(e) = std::fs::rename(&partial, &output) {
        warn!("Failed to move merged file into place: {}", e);
        let _ = std::fs::remove_file(&partial);
    }
}
