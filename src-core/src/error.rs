//! Error types for capture and encode operations.

use panorec_common::ValidationError;
use std::fmt;

/// Error type for capture operations.
#[derive(Debug)]
pub enum CaptureError {
    /// Invalid capture parameters
    InvalidParameters(String),
    /// The render host failed to allocate, render or read back a target
    Host(String),
    /// A pixel buffer did not have the size the resolved geometry requires
    BufferSize { expected: usize, actual: usize },
    /// The encoder/streamer could not be opened or failed while encoding
    Encoder(EncoderError),
    /// The merge process could not be started
    Merge(String),
    /// Filesystem error while preparing output paths
    Io(std::io::Error),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            CaptureError::Host(msg) => write!(f, "Render host error: {}", msg),
            CaptureError::BufferSize { expected, actual } => write!(
                f,
                "Pixel buffer size mismatch: expected {} bytes, got {}",
                expected, actual
            ),
            CaptureError::Encoder(err) => write!(f, "Encoder error: {}", err),
            CaptureError::Merge(msg) => write!(f, "Merge error: {}", msg),
            CaptureError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CaptureError::Encoder(err) => Some(err),
            CaptureError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EncoderError> for CaptureError {
    fn from(err: EncoderError) -> Self {
        CaptureError::Encoder(err)
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io(err)
    }
}

impl From<ValidationError> for CaptureError {
    fn from(err: ValidationError) -> Self {
        CaptureError::InvalidParameters(err.to_string())
    }
}

impl From<CaptureError> for String {
    fn from(err: CaptureError) -> Self {
        err.to_string()
    }
}

/// Error type for the external encoder/streamer handle.
#[derive(Debug)]
pub enum EncoderError {
    /// The encoder tool could not be located
    ToolNotFound(String),
    /// The encoder process could not be started (handle acquisition failed)
    Open(String),
    /// Writing frame data to the encoder failed
    Write(std::io::Error),
    /// The encoder process exited with a failure
    Process(String),
    /// The handle was used after it was closed
    Closed,
}

impl fmt::Display for EncoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderError::ToolNotFound(msg) => write!(f, "Encoder tool not found: {}", msg),
            EncoderError::Open(msg) => write!(f, "Failed to open encoder: {}", msg),
            EncoderError::Write(err) => write!(f, "Failed to write frame: {}", err),
            EncoderError::Process(msg) => write!(f, "Encoder process failed: {}", msg),
            EncoderError::Closed => write!(f, "Encoder handle already closed"),
        }
    }
}

impl std::error::Error for EncoderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EncoderError::Write(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = CaptureError::BufferSize {
            expected: 12,
            actual: 10,
        };
        assert_eq!(
            err.to_string(),
            "Pixel buffer size mismatch: expected 12 bytes, got 10"
        );

        let err: CaptureError = EncoderError::Open("no such file".into()).into();
        assert_eq!(
            err.to_string(),
            "Encoder error: Failed to open encoder: no such file"
        );
    }

    #[test]
    fn test_validation_error_converts_to_invalid_parameters() {
        let err: CaptureError = ValidationError::OddDimension {
            field: "width",
            value: 3,
        }
        .into();
        assert!(matches!(err, CaptureError::InvalidParameters(_)));
    }
}
