//! Frame capture, pacing and encode pipeline for real-time 3D applications.
//!
//! The host render loop drives a [`VideoCapture`] session; captured frames
//! (flat or 360°) are paced to a fixed output framerate and streamed to an
//! external encoder on a background worker.

pub mod audio;
pub mod config;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod host;
pub mod merger;
pub mod output;
pub mod pacer;
pub mod panorama;
pub mod queue;
pub mod readback;
pub mod session;
pub mod snapshot;
pub mod status;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use audio::AudioCapture;
pub use config::{AppConfig, CaptureConfig, CaptureSettings};
pub use encoder::{Destination, EncoderBackend, EncoderHandle, EncoderParams, FfmpegBackend};
pub use error::{CaptureError, EncoderError};
pub use merger::{FfmpegMerger, RetryPolicy, VideoMerger};
pub use queue::QueuePolicy;
pub use readback::{RenderHost, TargetDesc, TargetId};
pub use session::{StartOutcome, StopOutcome, VideoCapture};
pub use status::CaptureStatus;
