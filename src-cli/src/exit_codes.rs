//! Exit codes for the CLI.
//!
//! These codes enable scripting integration by providing structured
//! feedback about operation results.

/// Exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Operation completed successfully
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Invalid command-line arguments
    InvalidArguments = 2,
    /// The encoder executable could not be found
    EncoderNotFound = 3,
    /// Capture failed to start
    CaptureFailedToStart = 4,
    /// Capture failed while running
    CaptureFailedDuringRun = 5,
    /// Merging audio into the video failed (inputs preserved)
    MergeFailed = 6,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCode::Success => write!(f, "success"),
            ExitCode::GeneralError => write!(f, "general error"),
            ExitCode::InvalidArguments => write!(f, "invalid arguments"),
            ExitCode::EncoderNotFound => write!(f, "encoder not found"),
            ExitCode::CaptureFailedToStart => write!(f, "capture failed to start"),
            ExitCode::CaptureFailedDuringRun => write!(f, "capture failed during run"),
            ExitCode::MergeFailed => write!(f, "merge failed"),
        }
    }
}
