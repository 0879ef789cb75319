//! Input validation for capture parameters.

use once_cell::sync::Lazy;
use regex::Regex;

/// Streaming endpoint pattern: `rtmp://` or `rtmps://`, a host with an
/// optional port, and a non-empty application/stream path.
static STREAMING_ADDRESS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rtmps?://[A-Za-z0-9.\-_]+(:[0-9]{1,5})?/[^\s]+$").unwrap()
});

/// Maximum dimension value accepted by the encoder backends.
pub const MAX_DIMENSION: u32 = 8192;

/// Maximum streaming address length in characters.
pub const MAX_ADDRESS_LENGTH: usize = 2048;

/// Validation error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Address does not start with a supported streaming protocol or is malformed
    InvalidStreamingAddress(String),
    /// Dimension (width/height) is zero or too large
    DimensionOutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
    /// Dimension is odd; encoders reject odd frame sizes
    OddDimension { field: &'static str, value: u32 },
    /// String field exceeds maximum length
    StringTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidStreamingAddress(addr) => {
                write!(f, "Invalid streaming address: {:?}", addr)
            }
            ValidationError::DimensionOutOfRange { field, value, max } => {
                write!(f, "{} out of range: {} (max {})", field, value, max)
            }
            ValidationError::OddDimension { field, value } => {
                write!(f, "{} must be even, got {}", field, value)
            }
            ValidationError::StringTooLong { field, len, max } => {
                write!(f, "{} too long: {} chars (max {})", field, len, max)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a live streaming endpoint address.
///
/// Examples: "rtmp://live.example.com/app/key", "rtmps://a.rtmp.example.com:443/live2/key"
pub fn validate_streaming_address(address: &str) -> Result<(), ValidationError> {
    if address.len() > MAX_ADDRESS_LENGTH {
        return Err(ValidationError::StringTooLong {
            field: "streaming address",
            len: address.len(),
            max: MAX_ADDRESS_LENGTH,
        });
    }
    if !STREAMING_ADDRESS_PATTERN.is_match(address) {
        return Err(ValidationError::InvalidStreamingAddress(address.to_string()));
    }
    Ok(())
}

/// Validate resolved frame dimensions.
///
/// Both must be non-zero, even, and no larger than MAX_DIMENSION.
pub fn validate_frame_dimensions(width: u32, height: u32) -> Result<(), ValidationError> {
    for (field, value) in [("width", width), ("height", height)] {
        if value == 0 || value > MAX_DIMENSION {
            return Err(ValidationError::DimensionOutOfRange {
                field,
                value,
                max: MAX_DIMENSION,
            });
        }
        if value % 2 != 0 {
            return Err(ValidationError::OddDimension { field, value });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_streaming_addresses() {
        assert!(validate_streaming_address("rtmp://localhost/live/stream").is_ok());
        assert!(validate_streaming_address("rtmp://live.example.com:1935/app/key-123").is_ok());
        assert!(validate_streaming_address("rtmps://a.rtmp.youtube.com:443/live2/abcd").is_ok());
        assert!(validate_streaming_address("rtmp://10.0.0.2/live/x?token=1").is_ok());
    }

    #[test]
    fn test_invalid_streaming_addresses() {
        assert!(validate_streaming_address("").is_err());
        assert!(validate_streaming_address("http://example.com/live").is_err());
        assert!(validate_streaming_address("rtmp://").is_err());
        assert!(validate_streaming_address("rtmp://host").is_err());
        assert!(validate_streaming_address("rtmp://host/ with space").is_err());
        assert!(validate_streaming_address("/tmp/out.mp4").is_err());

        let long = format!("rtmp://host/{}", "a".repeat(MAX_ADDRESS_LENGTH));
        assert!(matches!(
            validate_streaming_address(&long),
            Err(ValidationError::StringTooLong { .. })
        ));
    }

    #[test]
    fn test_frame_dimensions() {
        assert!(validate_frame_dimensions(1280, 720).is_ok());
        assert!(validate_frame_dimensions(2, 2).is_ok());
        assert!(validate_frame_dimensions(MAX_DIMENSION, MAX_DIMENSION).is_ok());

        assert!(validate_frame_dimensions(0, 720).is_err());
        assert!(validate_frame_dimensions(1280, MAX_DIMENSION + 2).is_err());
        assert_eq!(
            validate_frame_dimensions(1281, 720),
            Err(ValidationError::OddDimension {
                field: "width",
                value: 1281
            })
        );
    }
}
