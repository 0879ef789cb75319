//! Panorec Common Library
//!
//! Validation rules and platform directory helpers shared by the capture core
//! and the command-line front end.

pub mod logging;
pub mod validation;

pub use validation::{validate_frame_dimensions, validate_streaming_address, ValidationError};
