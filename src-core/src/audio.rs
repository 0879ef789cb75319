//! Audio track capture to a 16-bit PCM WAV file.
//!
//! Follows the same start/stop rules as video capture. The WAV header is
//! written with a zero data size and patched when the capture stops.

use crate::error::CaptureError;
use crate::output::generate_output_path;
use crate::session::{StartOutcome, StopOutcome};
use crate::status::{CaptureStatus, SessionStatus};
use crate::worker::CallbackSlot;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const WAV_HEADER_LEN: u64 = 44;

/// Create a WAV file header.
fn create_wav_header(sample_rate: u32, channels: u16, data_size: u32) -> Vec<u8> {
    let block_align = channels as u32 * 2; // 16-bit samples
    let byte_rate = sample_rate * block_align;
    let file_size = 36u32.saturating_add(data_size);

    let mut header = Vec::with_capacity(WAV_HEADER_LEN as usize);

    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&file_size.to_le_bytes());
    header.extend_from_slice(b"WAVE");

    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes()); // PCM
    header.extend_from_slice(&channels.to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&(block_align as u16).to_le_bytes());
    header.extend_from_slice(&16u16.to_le_bytes());

    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_size.to_le_bytes());

    header
}

struct WavWriter {
    file: BufWriter<File>,
    sample_rate: u32,
    channels: u16,
    data_bytes: u64,
}

impl WavWriter {
    fn create(path: &Path, sample_rate: u32, channels: u16) -> Result<Self, std::io::Error> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&create_wav_header(sample_rate, channels, 0))?;
        Ok(Self {
            file,
            sample_rate,
            channels,
            data_bytes: 0,
        })
    }

    /// Samples are f32 in [-1.0, 1.0], interleaved by channel.
    fn write_samples(&mut self, samples: &[f32]) -> Result<(), std::io::Error> {
        let pcm: Vec<u8> = samples
            .iter()
            .flat_map(|&sample| ((sample.clamp(-1.0, 1.0) * 32767.0) as i16).to_le_bytes())
            .collect();
        self.file.write_all(&pcm)?;
        self.data_bytes += pcm.len() as u64;
        Ok(())
    }

    fn finish(mut self) -> Result<u64, std::io::Error> {
        let data_size = u32::try_from(self.data_bytes).unwrap_or(u32::MAX);
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .write_all(&create_wav_header(self.sample_rate, self.channels, data_size))?;
        self.file.flush()?;
        Ok(self.data_bytes)
    }
}

pub struct AudioCapture {
    sample_rate: u32,
    channels: u16,
    output_dir: PathBuf,
    status: SessionStatus,
    writer: Option<WavWriter>,
    path: Option<PathBuf>,
    on_complete: CallbackSlot,
}

impl AudioCapture {
    pub fn new(sample_rate: u32, channels: u16, output_dir: PathBuf) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            output_dir,
            status: SessionStatus::new(),
            writer: None,
            path: None,
            on_complete: Arc::new(Mutex::new(None)),
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status.get()
    }

    /// WAV file of the latest session.
    pub fn output_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn on_complete<F>(&mut self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.on_complete.lock() {
            *slot = Some(Arc::new(callback));
        }
    }

    pub fn start_capture(&mut self) -> Result<StartOutcome, CaptureError> {
        let current = self.status.get();
        if !current.can_start() {
            warn!("Audio capture already {}, ignoring start request", current);
            return Ok(StartOutcome::AlreadyRunning);
        }

        let path = generate_output_path(&self.output_dir, "audio", "wav")?;
        let writer = WavWriter::create(&path, self.sample_rate, self.channels)?;

        if let Err(state) = self.status.try_start() {
            warn!("Audio capture state changed to {} during start", state);
            drop(writer);
            let _ = std::fs::remove_file(&path);
            return Ok(StartOutcome::AlreadyRunning);
        }

        info!(
            "Audio capture started: {} Hz, {} channel(s) -> {:?}",
            self.sample_rate, self.channels, path
        );
        self.writer = Some(writer);
        self.path = Some(path);
        Ok(StartOutcome::Started)
    }

    /// Append interleaved samples. Ignored unless capturing.
    pub fn push_samples(&mut self, samples: &[f32]) -> Result<(), CaptureError> {
        if !self.status.is_started() {
            return Ok(());
        }
        match self.writer.as_mut() {
            Some(writer) => writer.write_samples(samples).map_err(CaptureError::from),
            None => Ok(()),
        }
    }

    /// Finalize the WAV file. The session is finished when this returns.
    pub fn stop_capture(&mut self) -> Result<StopOutcome, CaptureError> {
        if let Err(state) = self.status.request_stop() {
            warn!("Audio capture is {}, ignoring stop request", state);
            return Ok(StopOutcome::NotRunning);
        }

        let result = match self.writer.take() {
            Some(writer) => writer.finish().map(|bytes| {
                info!("Audio capture stopped, wrote {} bytes of samples", bytes);
            }),
            None => Ok(()),
        };

        let callback = self
            .on_complete
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(Arc::clone));
        if let Some(callback) = callback {
            callback();
        }
        self.status.finish();

        result.map(|_| StopOutcome::Stopped).map_err(CaptureError::from)
    }

    /// Delete the latest WAV file. Refused while capturing.
    pub fn cleanup(&mut self) -> Result<bool, CaptureError> {
        if !self.status.get().can_start() {
            warn!("Audio capture is running, refusing to delete its output");
            return Ok(false);
        }
        match self.path.as_deref() {
            Some(path) if path.exists() => {
                std::fs::remove_file(path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if self.status.is_started() {
            if let Err(e) = self.stop_capture() {
                warn!("Failed to finalize audio capture: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::random_suffix;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("panorec-audio-{}", random_suffix()))
    }

    #[test]
    fn test_wav_header_layout() {
        let header = create_wav_header(48000, 2, 1000);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 1036);
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(u16::from_le_bytes(header[22..24].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(header[28..32].try_into().unwrap()), 192000);
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 1000);
    }

    #[test]
    fn test_capture_writes_patched_wav() {
        let dir = temp_dir();
        let mut capture = AudioCapture::new(44100, 1, dir.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        capture.on_complete(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Ignored before start
        capture.push_samples(&[0.5; 10]).unwrap();
        assert_eq!(capture.start_capture().unwrap(), StartOutcome::Started);
        assert_eq!(capture.start_capture().unwrap(), StartOutcome::AlreadyRunning);
        capture.push_samples(&[1.0, -1.0, 2.0, 0.0]).unwrap();
        assert_eq!(capture.stop_capture().unwrap(), StopOutcome::Stopped);
        assert_eq!(capture.status(), CaptureStatus::Finish);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let bytes = std::fs::read(capture.output_path().unwrap()).unwrap();
        assert_eq!(bytes.len(), 44 + 8);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 8);
        let samples: Vec<i16> = bytes[44..]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![32767, -32767, 32767, 0]);

        assert!(capture.cleanup().unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stop_when_not_started() {
        let mut capture = AudioCapture::new(48000, 2, temp_dir());
        assert_eq!(capture.stop_capture().unwrap(), StopOutcome::NotRunning);
        assert_eq!(capture.status(), CaptureStatus::NotStart);
    }
}
