//! Encoder/streamer handle abstraction and the FFmpeg backend.
//!
//! The pipeline talks to the encoder through [`EncoderBackend`] and the
//! [`EncoderSession`] it opens. [`EncoderHandle`] owns one session and
//! guarantees `close` runs at most once and `clean` always runs.

use crate::config::PanoramaProjection;
use crate::error::EncoderError;
use crate::frame::BYTES_PER_PIXEL;
use ffmpeg_sidecar::command::FfmpegCommand;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Projection tag passed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionCode {
    None = 0,
    Equirectangular = 1,
    Cubemap = 2,
}

impl ProjectionCode {
    pub fn from_projection(projection: Option<PanoramaProjection>) -> Self {
        match projection {
            None => ProjectionCode::None,
            Some(PanoramaProjection::Equirectangular) => ProjectionCode::Equirectangular,
            Some(PanoramaProjection::Cubemap) => ProjectionCode::Cubemap,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Container metadata value, if the projection has one.
    fn metadata(self) -> Option<&'static str> {
        match self {
            ProjectionCode::None => None,
            ProjectionCode::Equirectangular => Some("equirectangular"),
            ProjectionCode::Cubemap => Some("cubemap"),
        }
    }
}

/// Where the encoded video goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    File(PathBuf),
    /// rtmp:// or rtmps:// endpoint
    Stream(String),
}

impl Destination {
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Destination::File(path) => Some(path),
            Destination::Stream(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderParams {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate_kbps: u32,
    pub projection: ProjectionCode,
    pub destination: Destination,
    /// Encoder executable. `None` resolves `ffmpeg` at open time.
    pub tool_path: Option<PathBuf>,
}

impl EncoderParams {
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

/// One open encoder/streamer.
pub trait EncoderSession: Send {
    /// Submit one RGB frame (rows bottom-first) to be encoded `repeat` times.
    fn send_frames(&mut self, pixels: &[u8], repeat: u32) -> Result<(), EncoderError>;

    /// Flush and finalize the output.
    fn close(&mut self) -> Result<(), EncoderError>;

    /// Release whatever the session still holds.
    fn clean(&mut self);
}

/// Opens encoder sessions.
pub trait EncoderBackend: Send + Sync {
    fn open(&self, params: &EncoderParams) -> Result<Box<dyn EncoderSession>, EncoderError>;
}

/// Scoped owner of an encoder session.
pub struct EncoderHandle {
    session: Box<dyn EncoderSession>,
    closed: bool,
    frames_sent: u64,
}

impl EncoderHandle {
    pub fn open(backend: &dyn EncoderBackend, params: &EncoderParams) -> Result<Self, EncoderError> {
        let session = backend.open(params)?;
        Ok(Self {
            session,
            closed: false,
            frames_sent: 0,
        })
    }

    pub fn send_frames(&mut self, pixels: &[u8], repeat: u32) -> Result<(), EncoderError> {
        if self.closed {
            return Err(EncoderError::Closed);
        }
        self.session.send_frames(pixels, repeat)?;
        self.frames_sent += repeat as u64;
        Ok(())
    }

    /// Encoded output frames so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Close the session. Cleaning happens when the handle drops.
    pub fn close(mut self) -> Result<(), EncoderError> {
        self.closed = true;
        self.session.close()
    }
}

impl Drop for EncoderHandle {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.session.close() {
                warn!("Encoder close on drop failed: {}", e);
            }
        }
        self.session.clean();
    }
}

/// Locate the encoder executable: the configured path, then `ffmpeg` on
/// PATH, then the ffmpeg-sidecar download location.
pub fn resolve_encoder_path(configured: Option<&Path>) -> Result<PathBuf, EncoderError> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        // Bare names like "ffmpeg" are looked up on PATH
        return which::which(path).map_err(|_| {
            EncoderError::ToolNotFound(format!("configured encoder {:?} does not exist", path))
        });
    }

    if let Ok(path) = which::which("ffmpeg") {
        return Ok(path);
    }

    let sidecar = ffmpeg_sidecar::paths::ffmpeg_path();
    if sidecar.exists() {
        return Ok(sidecar);
    }

    Err(EncoderError::ToolNotFound(
        "ffmpeg not found on PATH; install it or set output.encoder_path".to_string(),
    ))
}

/// Detect the best available H.264 encoder.
fn detect_h264_encoder(tool: &Path) -> &'static str {
    let encoders_output = match Command::new(tool).args(["-encoders", "-hide_banner"]).output() {
        Ok(o) => String::from_utf8_lossy(&o.stdout).to_string(),
        Err(e) => {
            warn!("Failed to run ffmpeg -encoders: {}", e);
            String::new()
        }
    };

    // Software first for compatibility, then hardware encoders
    let preferences = [
        "libx264",
        "libopenh264",
        "h264_nvenc",
        "h264_qsv",
        "h264_amf",
        "h264_videotoolbox",
        "h264_vaapi",
        "h264_v4l2m2m",
    ];

    for name in preferences {
        if encoders_output
            .lines()
            .any(|l| l.split_whitespace().nth(1) == Some(name))
        {
            info!("Using H.264 encoder: {}", name);
            return name;
        }
    }

    warn!("No H.264 encoder detected in ffmpeg output, trying libx264");
    "libx264"
}

/// Build the encoder argument list after the rawvideo input.
fn output_args(encoder: &str, params: &EncoderParams) -> Vec<String> {
    let bitrate = format!("{}k", params.bitrate_kbps);
    let streaming = matches!(params.destination, Destination::Stream(_));
    let mut args: Vec<String> = Vec::new();

    // Readback rows arrive bottom-first
    args.extend(["-vf".into(), "vflip".into()]);
    args.extend(["-c:v".into(), encoder.to_string()]);

    match encoder {
        "libx264" => {
            args.extend(["-preset".into(), "veryfast".into()]);
            if streaming {
                args.extend(["-tune".into(), "zerolatency".into()]);
            }
        }
        "h264_nvenc" | "h264_amf" => {
            args.extend(["-preset".into(), "p1".into()]);
        }
        _ => {}
    }

    args.extend([
        "-b:v".into(),
        bitrate.clone(),
        "-maxrate".into(),
        bitrate,
        "-bufsize".into(),
        format!("{}k", params.bitrate_kbps * 2),
        // Keyframe every two seconds
        "-g".into(),
        (params.framerate * 2).to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
    ]);

    match &params.destination {
        Destination::File(path) => {
            args.extend(["-movflags".into(), "+faststart+use_metadata_tags".into()]);
            if let Some(projection) = params.projection.metadata() {
                args.extend(["-metadata".into(), format!("projection={}", projection)]);
            }
            args.extend(["-f".into(), "mp4".into(), "-y".into()]);
            args.push(path.to_string_lossy().to_string());
        }
        Destination::Stream(address) => {
            args.extend(["-f".into(), "flv".into()]);
            args.push(address.clone());
        }
    }
    args
}

/// Drives an `ffmpeg` child process fed through stdin.
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl EncoderBackend for FfmpegBackend {
    fn open(&self, params: &EncoderParams) -> Result<Box<dyn EncoderSession>, EncoderError> {
        let tool = resolve_encoder_path(params.tool_path.as_deref())?;
        let encoder = detect_h264_encoder(&tool);

        let mut command = FfmpegCommand::new_with_path(&tool);
        command
            .args(["-f", "rawvideo"])
            .args(["-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", params.width, params.height)])
            .args(["-r", &params.framerate.to_string()])
            .args(["-i", "-"])
            .args(output_args(encoder, params));

        let inner = command.as_inner_mut();
        inner.stdin(Stdio::piped());
        inner.stdout(Stdio::null());
        inner.stderr(Stdio::piped());

        let mut child = inner
            .spawn()
            .map_err(|e| EncoderError::Open(format!("failed to start {:?}: {}", tool, e)))?;

        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EncoderError::Open("encoder stdin unavailable".to_string()));
            }
        };

        // Forward ffmpeg's stderr and keep the last line for error reports
        let stderr_reader = child.stderr.take().and_then(|stderr| {
            std::thread::Builder::new()
                .name("panorec-ffmpeg-stderr".to_string())
                .spawn(move || {
                    let mut last = None;
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        debug!("[ffmpeg] {}", line);
                        if !line.trim().is_empty() {
                            last = Some(line);
                        }
                    }
                    last
                })
                .ok()
        });

        info!(
            "Encoder opened: {}x{} @ {} fps, {} kbit/s -> {:?}",
            params.width, params.height, params.framerate, params.bitrate_kbps, params.destination
        );

        Ok(Box::new(FfmpegSession {
            child: Some(child),
            stdin: Some(stdin),
            stderr_reader,
            frame_bytes: params.frame_bytes(),
        }))
    }
}

struct FfmpegSession {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_reader: Option<JoinHandle<Option<String>>>,
    frame_bytes: usize,
}

impl EncoderSession for FfmpegSession {
    fn send_frames(&mut self, pixels: &[u8], repeat: u32) -> Result<(), EncoderError> {
        if pixels.len() != self.frame_bytes {
            return Err(EncoderError::Write(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "frame is {} bytes, encoder expects {}",
                    pixels.len(),
                    self.frame_bytes
                ),
            )));
        }
        let stdin = self.stdin.as_mut().ok_or(EncoderError::Closed)?;
        for _ in 0..repeat {
            stdin.write_all(pixels).map_err(EncoderError::Write)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), EncoderError> {
        // End of input lets ffmpeg finalize the container
        drop(self.stdin.take());

        let Some(mut child) = self.child.take() else {
            return Err(EncoderError::Closed);
        };
        let status = child
            .wait()
            .map_err(|e| EncoderError::Process(format!("wait failed: {}", e)))?;
        let last_line = self
            .stderr_reader
            .take()
            .and_then(|reader| reader.join().ok())
            .flatten();

        if !status.success() {
            return Err(EncoderError::Process(match last_line {
                Some(line) => line,
                None => format!("exit code {:?}", status.code()),
            }));
        }
        info!("Encoder closed");
        Ok(())
    }

    fn clean(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(reader) = self.stderr_reader.take() {
            let _ = reader.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingBackend;

    fn params(destination: Destination) -> EncoderParams {
        EncoderParams {
            width: 64,
            height: 32,
            framerate: 30,
            bitrate_kbps: 2500,
            projection: ProjectionCode::None,
            destination,
            tool_path: None,
        }
    }

    #[test]
    fn test_projection_codes() {
        assert_eq!(ProjectionCode::from_projection(None).code(), 0);
        assert_eq!(
            ProjectionCode::from_projection(Some(PanoramaProjection::Equirectangular)).code(),
            1
        );
        assert_eq!(
            ProjectionCode::from_projection(Some(PanoramaProjection::Cubemap)).code(),
            2
        );
    }

    #[test]
    fn test_file_output_args() {
        let mut p = params(Destination::File(PathBuf::from("/tmp/out.mp4")));
        p.projection = ProjectionCode::Equirectangular;
        let args = output_args("libx264", &p);
        let joined = args.join(" ");
        assert!(joined.starts_with("-vf vflip -c:v libx264"));
        assert!(joined.contains("-b:v 2500k"));
        assert!(joined.contains("-metadata projection=equirectangular"));
        assert!(joined.contains("-f mp4"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
        assert!(!joined.contains("zerolatency"));
    }

    #[test]
    fn test_stream_output_args() {
        let p = params(Destination::Stream("rtmp://host/live/key".to_string()));
        let args = output_args("libx264", &p);
        let joined = args.join(" ");
        assert!(joined.contains("-tune zerolatency"));
        assert!(joined.contains("-f flv"));
        assert!(!joined.contains("projection="));
        assert_eq!(args.last().map(String::as_str), Some("rtmp://host/live/key"));
    }

    #[test]
    fn test_resolve_missing_configured_tool() {
        let missing = Path::new("/nonexistent/panorec/ffmpeg-missing");
        assert!(matches!(
            resolve_encoder_path(Some(missing)),
            Err(EncoderError::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_handle_close_then_clean_once() {
        let backend = RecordingBackend::new();
        let mut handle =
            EncoderHandle::open(&backend, &params(Destination::Stream("rtmp://h/a".into())))
                .unwrap();
        handle.send_frames(&[0u8; 64 * 32 * 3], 3).unwrap();
        assert_eq!(handle.frames_sent(), 3);
        handle.close().unwrap();

        let log = backend.log();
        assert_eq!(log.closed, 1);
        assert_eq!(log.cleaned, 1);
        assert_eq!(log.repeats, vec![3]);
    }

    #[test]
    fn test_handle_drop_closes_and_cleans() {
        let backend = RecordingBackend::new();
        {
            let _handle =
                EncoderHandle::open(&backend, &params(Destination::Stream("rtmp://h/a".into())))
                    .unwrap();
        }
        let log = backend.log();
        assert_eq!(log.closed, 1);
        assert_eq!(log.cleaned, 1);
    }

    #[test]
    fn test_open_failure_acquires_nothing() {
        let backend = RecordingBackend::failing();
        assert!(EncoderHandle::open(&backend, &params(Destination::Stream("rtmp://h/a".into())))
            .is_err());
        let log = backend.log();
        assert_eq!(log.closed, 0);
        assert_eq!(log.cleaned, 0);
    }
}
