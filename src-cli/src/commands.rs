//! Command implementations for the CLI.

use crate::colors::{self, Tone};
use crate::exit_codes::ExitCode;
use crate::RecordOptions;
use panorec_core::config::{
    get_config_path, get_output_dir, load_config, save_config, AntiAliasing, AppConfig,
    CaptureFormat, CaptureMode, CubemapSize, EncodeQuality, FrameSize, PanoramaProjection,
    TargetFramerate,
};
use panorec_core::host::PatternHost;
use panorec_core::worker::StatsSnapshot;
use panorec_core::{
    AudioCapture, CaptureError, CaptureSettings, EncoderError, FfmpegMerger, RetryPolicy,
    StartOutcome, VideoCapture, VideoMerger,
};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const TONE_SAMPLE_RATE: u32 = 48000;
const TONE_CHANNELS: u16 = 2;
const TONE_FREQUENCY: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 0.25;

/// Apply command-line overrides on top of the persisted capture settings.
fn apply_overrides(settings: &mut CaptureSettings, options: &RecordOptions) -> Result<(), String> {
    if let Some(format) = &options.format {
        settings.format = CaptureFormat::from_str(format)
            .ok_or_else(|| format!("Invalid format '{}'. Valid formats: normal, panorama", format))?;
    }
    if let Some(projection) = &options.projection {
        settings.projection = PanoramaProjection::from_str(projection).ok_or_else(|| {
            format!(
                "Invalid projection '{}'. Valid projections: cubemap, equirectangular",
                projection
            )
        })?;
    }
    if let Some(size) = &options.size {
        settings.frame_size = FrameSize::from_str(size).ok_or_else(|| {
            format!(
                "Invalid frame size '{}'. Valid sizes: 640x480, 720x480, 960x540, 1280x720, \
                 1920x1080, 2048x1080, 3840x2160, 4096x2160",
                size
            )
        })?;
    }
    if let Some(px) = options.cube_size {
        settings.cubemap_size = CubemapSize::from_pixels(px)
            .ok_or_else(|| format!("Invalid cubemap size {}. Valid sizes: 512, 1024, 2048", px))?;
    }
    if let Some(fps) = options.fps {
        settings.framerate = TargetFramerate::from_fps(fps)
            .ok_or_else(|| format!("Invalid framerate {}. Valid rates: 18, 24, 30, 45, 60", fps))?;
    }
    if let Some(quality) = &options.quality {
        settings.quality = EncodeQuality::from_str(quality)
            .ok_or_else(|| format!("Invalid quality '{}'. Valid values: low, medium, high", quality))?;
    }
    if let Some(samples) = options.antialiasing {
        settings.antialiasing = AntiAliasing::from_samples(samples)
            .ok_or_else(|| format!("Invalid anti-aliasing {}. Valid values: 1, 2, 4, 8", samples))?;
    }
    if let Some(address) = &options.stream {
        settings.mode = CaptureMode::LiveStreaming;
        settings.streaming_address = Some(address.clone());
    }
    if options.offline {
        settings.offline_render = true;
    }
    if options.shared {
        settings.dedicated = false;
    }
    settings.enforce_constraints();

    if options.render_fps == 0 {
        return Err("Render rate must be at least 1 frame per second".to_string());
    }
    if !options.duration.is_finite() || options.duration <= 0.0 {
        return Err(format!("Invalid duration {}", options.duration));
    }
    Ok(())
}

/// Interleaved sine tone, generated in step with scene time.
struct ToneGenerator {
    sample_rate: u32,
    channels: u16,
    elapsed: f64,
    position: u64,
}

impl ToneGenerator {
    fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            elapsed: 0.0,
            position: 0,
        }
    }

    /// Samples covering the next `delta` seconds.
    fn next_block(&mut self, delta: f64) -> Vec<f32> {
        self.elapsed += delta;
        let target = (self.elapsed * self.sample_rate as f64).round() as u64;
        let frames = target.saturating_sub(self.position);
        let mut block = Vec::with_capacity(frames as usize * self.channels as usize);
        for n in self.position..target {
            let t = n as f64 / self.sample_rate as f64;
            let value = (TONE_AMPLITUDE * (2.0 * std::f64::consts::PI * TONE_FREQUENCY * t).sin()) as f32;
            block.extend(std::iter::repeat(value).take(self.channels as usize));
        }
        self.position = target.max(self.position);
        block
    }
}

struct RecordFailure {
    code: ExitCode,
    message: String,
}

impl RecordFailure {
    fn new(code: ExitCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn start_failure_code(err: &CaptureError) -> ExitCode {
    match err {
        CaptureError::Encoder(EncoderError::ToolNotFound(_)) => ExitCode::EncoderNotFound,
        CaptureError::InvalidParameters(_) => ExitCode::InvalidArguments,
        _ => ExitCode::CaptureFailedToStart,
    }
}

#[derive(Debug, Serialize)]
struct RecordSummary {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    merged_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot_path: Option<PathBuf>,
    width: u32,
    height: u32,
    framerate: u32,
    captured_images: u64,
    captured_frames: u64,
    encoded_frames: u64,
    dropped_images: u64,
    encode_errors: u64,
    interrupted: bool,
}

impl RecordSummary {
    fn new(width: u32, height: u32, framerate: u32, stats: StatsSnapshot) -> Self {
        Self {
            status: "recording_stopped",
            file_path: None,
            audio_path: None,
            merged_path: None,
            snapshot_path: None,
            width,
            height,
            framerate,
            captured_images: stats.captured_images,
            captured_frames: stats.captured_frames,
            encoded_frames: stats.encoded_frames,
            dropped_images: stats.dropped_images,
            encode_errors: stats.encode_errors,
            interrupted: false,
        }
    }
}

/// Render loop on the calling thread: advance the scene, let the session
/// schedule captures, and keep wall-clock pace unless rendering offline.
fn run_capture(
    config: AppConfig,
    output_dir: PathBuf,
    options: RecordOptions,
    shutdown: Arc<AtomicBool>,
    show_progress: bool,
) -> Result<RecordSummary, RecordFailure> {
    let (surface_w, surface_h) = config.capture.frame_size.dimensions();
    let host = PatternHost::new(surface_w, surface_h);
    let mut capture = VideoCapture::from_config(host, &config).with_output_dir(output_dir.clone());

    match capture.start_capture() {
        Ok(StartOutcome::Started) => {}
        Ok(StartOutcome::AlreadyRunning) => {
            return Err(RecordFailure::new(
                ExitCode::CaptureFailedToStart,
                "A capture session is already running",
            ));
        }
        Ok(StartOutcome::InvalidAddress) => {
            return Err(RecordFailure::new(
                ExitCode::InvalidArguments,
                "Invalid streaming address. Use an rtmp:// URL",
            ));
        }
        Err(e) => return Err(RecordFailure::new(start_failure_code(&e), e.to_string())),
    }
    let Some(resolved) = capture.config().cloned() else {
        capture.shutdown();
        return Err(RecordFailure::new(
            ExitCode::CaptureFailedToStart,
            "Capture session has no configuration",
        ));
    };

    let mut audio = None;
    if options.tone {
        let mut track = AudioCapture::new(TONE_SAMPLE_RATE, TONE_CHANNELS, output_dir);
        if let Err(e) = track.start_capture() {
            capture.shutdown();
            return Err(RecordFailure::new(
                ExitCode::CaptureFailedToStart,
                format!("Failed to start audio capture: {}", e),
            ));
        }
        audio = Some(track);
    }

    let frame_time = 1.0 / options.render_fps as f64;
    let total_frames = (options.duration * options.render_fps as f64).ceil() as u64;
    let mut tone = ToneGenerator::new(TONE_SAMPLE_RATE, TONE_CHANNELS);
    let started = Instant::now();
    let mut interrupted = false;
    let mut run_error = None;
    let mut shown_second = None;

    for frame in 0..total_frames {
        if shutdown.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }

        capture.host_mut().advance(frame_time);
        if let Err(e) = capture.tick(frame_time).and_then(|()| capture.end_of_frame()) {
            run_error = Some(e);
            break;
        }
        if let Some(track) = audio.as_mut() {
            if let Err(e) = track.push_samples(&tone.next_block(frame_time)) {
                warn!("Dropping audio samples: {}", e);
            }
        }

        let scene_time = (frame + 1) as f64 * frame_time;
        if show_progress {
            let seconds = scene_time as u64;
            if shown_second != Some(seconds) {
                shown_second = Some(seconds);
                let stats = capture.stats();
                print!(
                    "\r{}",
                    colors::progress(
                        capture.status(),
                        seconds,
                        stats.captured_frames,
                        stats.dropped_images
                    )
                );
                std::io::stdout().flush().ok();
            }
        }

        if !resolved.offline_render {
            let deadline = started + Duration::from_secs_f64(scene_time);
            if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
                std::thread::sleep(wait);
            }
        }
    }
    if show_progress {
        println!();
    }

    let mut snapshot_path = None;
    if let Some(path) = &options.snapshot {
        match capture.save_snapshot(path) {
            Ok(()) => snapshot_path = Some(path.clone()),
            Err(e) => warn!("Failed to save snapshot: {}", e),
        }
    }

    capture.shutdown();
    let mut audio_path = None;
    if let Some(mut track) = audio {
        match track.stop_capture() {
            Ok(_) => audio_path = track.output_path().map(Path::to_path_buf),
            Err(e) => warn!("Failed to finish audio track: {}", e),
        }
    }

    if let Some(e) = run_error {
        return Err(RecordFailure::new(
            ExitCode::CaptureFailedDuringRun,
            format!("Capture failed: {}", e),
        ));
    }

    let stats = capture.stats();
    info!(
        "Capture finished: {} images ({} frames) captured, {} frames encoded, {} dropped",
        stats.captured_images, stats.captured_frames, stats.encoded_frames, stats.dropped_images
    );
    if stats.encode_errors > 0 {
        return Err(RecordFailure::new(
            ExitCode::CaptureFailedDuringRun,
            format!("Encoder rejected {} image(s)", stats.encode_errors),
        ));
    }

    let mut summary = RecordSummary::new(resolved.width, resolved.height, resolved.framerate, stats);
    summary.file_path = capture.output_path().map(Path::to_path_buf);
    summary.audio_path = audio_path;
    summary.snapshot_path = snapshot_path;
    summary.interrupted = interrupted;
    Ok(summary)
}

fn spawn_signal_listener(flag: Arc<AtomicBool>) {
    #[cfg(unix)]
    {
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let (Ok(mut sigint), Ok(mut sigterm)) =
                (signal(SignalKind::interrupt()), signal(SignalKind::terminate()))
            else {
                warn!("Failed to install signal handlers");
                return;
            };

            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }

            flag.store(true, Ordering::SeqCst);
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                flag.store(true, Ordering::SeqCst);
            }
        });
    }
}

fn build_merger(config: &AppConfig, output_dir: PathBuf, timeout_secs: u64) -> VideoMerger {
    let interval = RetryPolicy::default().interval;
    let attempts = (Duration::from_secs(timeout_secs).as_millis() / interval.as_millis().max(1))
        .clamp(1, u32::MAX as u128) as u32;
    let tool_path = config.output.encoder_path.as_ref().map(PathBuf::from);
    VideoMerger::new(Arc::new(FfmpegMerger::new(tool_path)), output_dir)
        .with_retry(RetryPolicy { attempts, interval })
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => eprintln!("{}", colors::error(&format!("Failed to encode output: {}", e))),
    }
}

/// Capture the test scene.
pub async fn record(options: RecordOptions, json: bool, quiet: bool) -> ExitCode {
    let mut config = load_config();
    if let Err(msg) = apply_overrides(&mut config.capture, &options) {
        if !quiet {
            eprintln!("{}", colors::error(&msg));
        }
        return ExitCode::InvalidArguments;
    }
    let output_dir = options
        .output
        .clone()
        .unwrap_or_else(|| get_output_dir(&config));

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(Arc::clone(&shutdown_flag));

    if !quiet && !json {
        println!("{}", colors::styled(Tone::Info, "Capture started..."));
    }

    let show_progress = !quiet && !json && colors::is_interactive();
    let merge_config = config.clone();
    let merge_dir = output_dir.clone();
    let joined = tokio::task::spawn_blocking(move || {
        run_capture(config, output_dir, options, shutdown_flag, show_progress)
    })
    .await;

    let mut summary = match joined {
        Ok(Ok(summary)) => summary,
        Ok(Err(failure)) => {
            if json {
                print_json(&serde_json::json!({
                    "status": "error",
                    "code": failure.code.as_i32(),
                    "message": failure.message,
                }));
            } else if !quiet {
                eprintln!("{}", colors::error(&failure.message));
            }
            return failure.code;
        }
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::error(&format!("Capture thread failed: {}", e)));
            }
            return ExitCode::CaptureFailedDuringRun;
        }
    };

    let mut exit_code = ExitCode::Success;
    if let (Some(video), Some(audio)) = (summary.file_path.clone(), summary.audio_path.clone()) {
        let merger = build_merger(&merge_config, merge_dir, 50);
        match merger.merge_async(video, audio).await {
            Some(merged) => summary.merged_path = Some(merged),
            None => {
                if !quiet && !json {
                    eprintln!(
                        "{}",
                        colors::warning("Merging the test tone failed; video and audio were kept.")
                    );
                }
                exit_code = ExitCode::MergeFailed;
            }
        }
    }

    if json {
        print_json(&summary);
    } else if !quiet {
        if summary.interrupted {
            println!("{}", colors::styled(Tone::Info, "Capture interrupted."));
        }
        match summary.merged_path.as_ref().or(summary.file_path.as_ref()) {
            Some(path) => println!(
                "{} {}",
                colors::styled(Tone::Success, "Capture saved:"),
                colors::styled(Tone::Path, &path.display().to_string())
            ),
            None => println!("{}", colors::styled(Tone::Success, "Stream ended.")),
        }
        println!(
            "  {} {}x{} @ {} fps",
            colors::styled(Tone::Label, "Video:"),
            summary.width,
            summary.height,
            summary.framerate
        );
        println!(
            "  {} {} images, {} frames encoded, {} dropped",
            colors::styled(Tone::Label, "Frames:"),
            colors::count(summary.captured_images, false),
            colors::count(summary.encoded_frames, false),
            colors::count(summary.dropped_images, true)
        );
        if let Some(path) = &summary.snapshot_path {
            println!(
                "  {} {}",
                colors::styled(Tone::Label, "Snapshot:"),
                colors::styled(Tone::Path, &path.display().to_string())
            );
        }
    }
    exit_code
}

/// Merge an audio track into a video.
pub async fn merge(
    video: PathBuf,
    audio: PathBuf,
    output: Option<PathBuf>,
    timeout: u64,
    json: bool,
    quiet: bool,
) -> ExitCode {
    for input in [&video, &audio] {
        if !input.is_file() {
            if !quiet {
                eprintln!(
                    "{}",
                    colors::error(&format!("Input file not found: {}", input.display()))
                );
            }
            return ExitCode::InvalidArguments;
        }
    }

    let config = load_config();
    let output_dir = output.unwrap_or_else(|| get_output_dir(&config));
    let merger = build_merger(&config, output_dir, timeout);

    match merger.merge_async(video, audio).await {
        Some(path) => {
            if json {
                print_json(&serde_json::json!({ "status": "merged", "file_path": path }));
            } else if !quiet {
                println!(
                    "{} {}",
                    colors::styled(Tone::Success, "Merged:"),
                    colors::styled(Tone::Path, &path.display().to_string())
                );
            }
            ExitCode::Success
        }
        None => {
            if json {
                print_json(&serde_json::json!({ "status": "error", "code": ExitCode::MergeFailed.as_i32() }));
            } else if !quiet {
                eprintln!(
                    "{}",
                    colors::error(&format!("Merge did not finish within {} seconds.", timeout))
                );
            }
            ExitCode::MergeFailed
        }
    }
}

/// Serde name of a settings value, for display.
fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => "?".to_string(),
    }
}

/// Print the current configuration.
pub fn config_show(json: bool) -> ExitCode {
    let config = load_config();
    if json {
        print_json(&config);
        return ExitCode::Success;
    }

    let capture = &config.capture;
    let encoder = config.output.encoder_path.as_deref().unwrap_or("ffmpeg (PATH)");
    let rows = [
        ("Output directory", get_output_dir(&config).display().to_string()),
        ("Encoder", encoder.to_string()),
        ("Format", label(&capture.format)),
        ("Mode", label(&capture.mode)),
        ("Projection", label(&capture.projection)),
        ("Frame size", label(&capture.frame_size)),
        ("Cubemap face", label(&capture.cubemap_size)),
        ("Quality", label(&capture.quality)),
        ("Anti-aliasing", label(&capture.antialiasing)),
        ("Framerate", label(&capture.framerate)),
        ("Dedicated surface", capture.dedicated.to_string()),
        ("Offline render", capture.offline_render.to_string()),
        ("Queue policy", label(&capture.queue_policy)),
    ];
    for (name, value) in rows {
        println!("{} {}", colors::styled(Tone::Strong, &format!("{:<18}", name)), value);
    }
    ExitCode::Success
}

/// Print the configuration file location.
pub fn config_path(json: bool) -> ExitCode {
    match get_config_path() {
        Ok(path) => {
            if json {
                print_json(&serde_json::json!({ "config_path": path }));
            } else {
                println!("{}", path.display());
            }
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{}", colors::error(&e));
            ExitCode::GeneralError
        }
    }
}

fn update_config<F>(apply: F, json: bool, quiet: bool) -> ExitCode
where
    F: FnOnce(&mut AppConfig),
{
    let mut config = load_config();
    apply(&mut config);
    match save_config(&config) {
        Ok(()) => {
            if json {
                print_json(&serde_json::json!({ "status": "saved" }));
            } else if !quiet {
                println!("{}", colors::styled(Tone::Success, "Configuration saved."));
            }
            ExitCode::Success
        }
        Err(e) => {
            if !quiet {
                eprintln!("{}", colors::error(&e));
            }
            ExitCode::GeneralError
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Set or clear the output directory.
pub fn config_set_output(directory: String, json: bool, quiet: bool) -> ExitCode {
    let directory = non_empty(directory);
    update_config(|config| config.output.directory = directory, json, quiet)
}

/// Set or clear the encoder executable.
pub fn config_set_encoder(path: String, json: bool, quiet: bool) -> ExitCode {
    let path = non_empty(path);
    if let Some(p) = &path {
        if !Path::new(p).is_file() && !quiet {
            eprintln!(
                "{}",
                colors::warning(&format!("{} does not exist yet; saving anyway.", p))
            );
        }
    }
    update_config(|config| config.output.encoder_path = path, json, quiet)
}

/// Show version information.
pub fn version(json: bool) {
    let version = env!("CARGO_PKG_VERSION");
    if json {
        print_json(&serde_json::json!({ "version": version }));
    } else {
        println!("{} {}", colors::styled(Tone::Strong, "panorec"), version);
    }
}
