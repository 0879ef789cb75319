//! Capture configuration.
//!
//! User-facing settings are expressed as discrete tiers (frame size, cubemap
//! size, quality, antialiasing, framerate) and persisted as JSON in the
//! platform config directory:
//! - Linux: `~/.config/panorec/config.json`
//! - macOS: `~/Library/Application Support/panorec/config.json`
//! - Windows: `%APPDATA%\panorec\config.json`
//!
//! At session start the tiers are resolved once into a [`CaptureConfig`] that
//! stays immutable for the lifetime of the session.

use crate::error::CaptureError;
use crate::queue::QueuePolicy;
use directories::{ProjectDirs, UserDirs};
use panorec_common::validate_frame_dimensions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Captured video format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    /// Flat 2D video
    #[default]
    Normal,
    /// 360° video built from six face renders
    Panorama,
}

impl CaptureFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "normal" | "2d" => Some(Self::Normal),
            "panorama" | "360" => Some(Self::Panorama),
            _ => None,
        }
    }
}

/// Where encoded video goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Save to a local file
    #[default]
    Local,
    /// Push to a remote rtmp endpoint
    LiveStreaming,
}

impl CaptureMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local" | "file" => Some(Self::Local),
            "live" | "live_streaming" | "stream" => Some(Self::LiveStreaming),
            _ => None,
        }
    }
}

/// Panorama projection layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PanoramaProjection {
    /// Six faces in a 3x2 grid
    #[default]
    Cubemap,
    /// Single latitude/longitude image
    Equirectangular,
}

impl PanoramaProjection {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cubemap" | "cube" => Some(Self::Cubemap),
            "equirectangular" | "equirect" => Some(Self::Equirectangular),
            _ => None,
        }
    }
}

/// Frame size tier for dedicated capture surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FrameSize {
    #[serde(rename = "640x480")]
    Sd640x480,
    #[serde(rename = "720x480")]
    Sd720x480,
    #[serde(rename = "960x540")]
    Qhd960x540,
    #[default]
    #[serde(rename = "1280x720")]
    Hd1280x720,
    #[serde(rename = "1920x1080")]
    Fhd1920x1080,
    #[serde(rename = "2048x1080")]
    Dci2048x1080,
    #[serde(rename = "3840x2160")]
    Uhd3840x2160,
    #[serde(rename = "4096x2160")]
    Dci4096x2160,
}

/// Tier to pixel dimensions lookup.
const FRAME_SIZES: [(FrameSize, u32, u32); 8] = [
    (FrameSize::Sd640x480, 640, 480),
    (FrameSize::Sd720x480, 720, 480),
    (FrameSize::Qhd960x540, 960, 540),
    (FrameSize::Hd1280x720, 1280, 720),
    (FrameSize::Fhd1920x1080, 1920, 1080),
    (FrameSize::Dci2048x1080, 2048, 1080),
    (FrameSize::Uhd3840x2160, 3840, 2160),
    (FrameSize::Dci4096x2160, 4096, 2160),
];

impl FrameSize {
    /// Pixel dimensions (width, height) of this tier.
    pub fn dimensions(self) -> (u32, u32) {
        FRAME_SIZES
            .iter()
            .find(|(size, _, _)| *size == self)
            .map(|&(_, w, h)| (w, h))
            .unwrap_or((1280, 720))
    }

    /// Parse "WIDTHxHEIGHT" into a tier.
    pub fn from_str(s: &str) -> Option<Self> {
        let (w, h) = s.to_lowercase().split_once('x').and_then(|(w, h)| {
            Some((w.trim().parse::<u32>().ok()?, h.trim().parse::<u32>().ok()?))
        })?;
        FRAME_SIZES
            .iter()
            .find(|&&(_, tw, th)| tw == w && th == h)
            .map(|&(size, _, _)| size)
    }
}

/// Cubemap face size tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CubemapSize {
    #[serde(rename = "512")]
    Face512,
    #[default]
    #[serde(rename = "1024")]
    Face1024,
    #[serde(rename = "2048")]
    Face2048,
}

impl CubemapSize {
    pub fn pixels(self) -> u32 {
        match self {
            CubemapSize::Face512 => 512,
            CubemapSize::Face1024 => 1024,
            CubemapSize::Face2048 => 2048,
        }
    }

    pub fn from_pixels(px: u32) -> Option<Self> {
        match px {
            512 => Some(Self::Face512),
            1024 => Some(Self::Face1024),
            2048 => Some(Self::Face2048),
            _ => None,
        }
    }
}

/// Encode quality tier. Lower quality decreases file size on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncodeQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl EncodeQuality {
    /// Target bitrate in kbit/s.
    pub fn bitrate_kbps(self) -> u32 {
        match self {
            EncodeQuality::Low => 1000,
            EncodeQuality::Medium => 2500,
            EncodeQuality::High => 5000,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Multisample antialiasing tier for capture render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AntiAliasing {
    #[default]
    #[serde(rename = "1")]
    X1,
    #[serde(rename = "2")]
    X2,
    #[serde(rename = "4")]
    X4,
    #[serde(rename = "8")]
    X8,
}

impl AntiAliasing {
    pub fn samples(self) -> u32 {
        match self {
            AntiAliasing::X1 => 1,
            AntiAliasing::X2 => 2,
            AntiAliasing::X4 => 4,
            AntiAliasing::X8 => 8,
        }
    }

    pub fn from_samples(samples: u32) -> Option<Self> {
        match samples {
            1 => Some(Self::X1),
            2 => Some(Self::X2),
            4 => Some(Self::X4),
            8 => Some(Self::X8),
            _ => None,
        }
    }
}

/// Output framerate tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TargetFramerate {
    #[serde(rename = "18")]
    Fps18,
    #[serde(rename = "24")]
    Fps24,
    #[default]
    #[serde(rename = "30")]
    Fps30,
    #[serde(rename = "45")]
    Fps45,
    #[serde(rename = "60")]
    Fps60,
}

impl TargetFramerate {
    pub fn fps(self) -> u32 {
        match self {
            TargetFramerate::Fps18 => 18,
            TargetFramerate::Fps24 => 24,
            TargetFramerate::Fps30 => 30,
            TargetFramerate::Fps45 => 45,
            TargetFramerate::Fps60 => 60,
        }
    }

    pub fn from_fps(fps: u32) -> Option<Self> {
        match fps {
            18 => Some(Self::Fps18),
            24 => Some(Self::Fps24),
            30 => Some(Self::Fps30),
            45 => Some(Self::Fps45),
            60 => Some(Self::Fps60),
            _ => None,
        }
    }
}

fn default_dedicated() -> bool {
    true
}

fn default_idle_backoff_ms() -> u64 {
    1000
}

/// Capture settings as chosen by the user, before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    #[serde(default)]
    pub format: CaptureFormat,
    #[serde(default)]
    pub mode: CaptureMode,
    #[serde(default)]
    pub projection: PanoramaProjection,
    #[serde(default)]
    pub frame_size: FrameSize,
    #[serde(default)]
    pub cubemap_size: CubemapSize,
    #[serde(default)]
    pub quality: EncodeQuality,
    #[serde(default)]
    pub antialiasing: AntiAliasing,
    #[serde(default)]
    pub framerate: TargetFramerate,
    /// Whether the capture surface is used only for capture. A shared surface
    /// also presents on screen, so its size follows the host viewport.
    #[serde(default = "default_dedicated")]
    pub dedicated: bool,
    /// Live streaming endpoint (rtmp://...). Required in live streaming mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming_address: Option<String>,
    /// Clamp each frame delta to one output frame interval.
    #[serde(default)]
    pub offline_render: bool,
    #[serde(default)]
    pub queue_policy: QueuePolicy,
    /// How long the encoder worker waits for frames before re-checking.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            format: CaptureFormat::default(),
            mode: CaptureMode::default(),
            projection: PanoramaProjection::default(),
            frame_size: FrameSize::default(),
            cubemap_size: CubemapSize::default(),
            quality: EncodeQuality::default(),
            antialiasing: AntiAliasing::default(),
            framerate: TargetFramerate::default(),
            dedicated: true,
            streaming_address: None,
            offline_render: false,
            queue_policy: QueuePolicy::default(),
            idle_backoff_ms: default_idle_backoff_ms(),
        }
    }
}

impl CaptureSettings {
    /// Apply the constraints that must hold before capture begins.
    ///
    /// Panorama capture always needs a dedicated surface; a shared surface is
    /// switched to dedicated with a warning. Returns true if anything changed.
    pub fn enforce_constraints(&mut self) -> bool {
        if self.format == CaptureFormat::Panorama && !self.dedicated {
            warn!("Panorama capture always requires a dedicated surface, switching to dedicated");
            self.dedicated = true;
            return true;
        }
        false
    }

    /// Resolve tiers into concrete geometry.
    ///
    /// `surface_size` is the host's current pixel size, used when the surface
    /// is shared.
    pub fn resolve(&self, surface_size: (u32, u32)) -> Result<CaptureConfig, CaptureError> {
        let panorama = self.format == CaptureFormat::Panorama;
        let dedicated = self.dedicated || panorama;
        let face_size = self.cubemap_size.pixels();

        let (width, height) = if !dedicated {
            // Odd sizes stall most encoders
            (surface_size.0 & !1, surface_size.1 & !1)
        } else if panorama && self.projection == PanoramaProjection::Cubemap {
            (face_size * 3, face_size * 2)
        } else {
            self.frame_size.dimensions()
        };

        validate_frame_dimensions(width, height)?;

        Ok(CaptureConfig {
            format: self.format,
            mode: self.mode,
            projection: panorama.then_some(self.projection),
            width,
            height,
            face_size,
            antialiasing: self.antialiasing.samples(),
            framerate: self.framerate.fps(),
            bitrate_kbps: self.quality.bitrate_kbps(),
            dedicated,
            offline_render: self.offline_render,
            queue_policy: self.queue_policy,
            idle_backoff: Duration::from_millis(self.idle_backoff_ms),
        })
    }
}

/// Resolved, immutable session geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub format: CaptureFormat,
    pub mode: CaptureMode,
    /// Set only for panorama capture
    pub projection: Option<PanoramaProjection>,
    pub width: u32,
    pub height: u32,
    pub face_size: u32,
    pub antialiasing: u32,
    pub framerate: u32,
    pub bitrate_kbps: u32,
    pub dedicated: bool,
    pub offline_render: bool,
    pub queue_policy: QueuePolicy,
    pub idle_backoff: Duration,
}

impl CaptureConfig {
    /// Size in bytes of one RGB frame.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Duration of one output frame in seconds.
    pub fn frame_interval(&self) -> f64 {
        1.0 / self.framerate as f64
    }
}

/// Output-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OutputConfig {
    /// Custom output directory. If None, uses system default (Videos folder).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    /// Custom encoder executable. If None, `ffmpeg` is resolved at runtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoder_path: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    /// Capture settings group.
    #[serde(default)]
    pub capture: CaptureSettings,
    /// Output settings group.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Get the path to the config file.
pub fn get_config_path() -> Result<PathBuf, String> {
    let proj_dirs =
        ProjectDirs::from("", "", "panorec").ok_or("Could not determine config directory")?;
    Ok(proj_dirs.config_dir().join("config.json"))
}

/// Load configuration from disk.
/// Returns default config if file doesn't exist or is invalid.
pub fn load_config() -> AppConfig {
    let config_path = match get_config_path() {
        Ok(path) => path,
        Err(e) => {
            warn!("Failed to get config path: {}", e);
            return AppConfig::default();
        }
    };

    if !config_path.exists() {
        info!("No config file found, using defaults");
        return AppConfig::default();
    }

    match fs::read_to_string(&config_path) {
        Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
            Ok(config) => {
                info!("Loaded config from {:?}", config_path);
                config
            }
            Err(e) => {
                warn!("Failed to parse config file: {}. Using defaults.", e);
                AppConfig::default()
            }
        },
        Err(e) => {
            warn!("Failed to read config file: {}. Using defaults.", e);
            AppConfig::default()
        }
    }
}

/// Save configuration to disk.
/// Creates the config directory if it doesn't exist.
pub fn save_config(config: &AppConfig) -> Result<(), String> {
    let config_path = get_config_path()?;

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    fs::write(&config_path, json).map_err(|e| format!("Failed to write config file: {}", e))?;

    info!("Saved config to {:?}", config_path);
    Ok(())
}

/// Get the default output directory (system Videos folder, then home, then temp).
pub fn get_default_output_dir() -> PathBuf {
    let Some(user_dirs) = UserDirs::new() else {
        return std::env::temp_dir().join("panorec");
    };

    user_dirs
        .video_dir()
        .map(|p| p.join("Panorec"))
        .unwrap_or_else(|| user_dirs.home_dir().join("Videos").join("Panorec"))
}

/// Get the configured output directory, falling back to default if not set.
pub fn get_output_dir(config: &AppConfig) -> PathBuf {
    match &config.output.directory {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => get_default_output_dir(),
    }
}
