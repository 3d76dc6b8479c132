//! Error types for every layer of the pipeline.
//!
//! None of these cross the transport → retarget boundary as a panic: the
//! producer loop converts [`ChannelError`] into a health transition, and the
//! retargeter converts [`IkError`] into an identity fallback.

use thiserror::Error;

/// Failure to decode an already-read frame body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The version word names a layout this build cannot decode.
    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u32),

    /// Fewer bytes than the layout for this header requires.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Transport-level failures reported by [`FrameDecoder::read`].
///
/// [`FrameDecoder::read`]: crate::channel::FrameDecoder::read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Not connected, a broken pipe, or a short header read. Requires a full
    /// reconnect.
    #[error("channel disconnected")]
    Disconnected,

    /// Header decoded but the version is not one we can interpret. The frame
    /// was drained; the channel stays open.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    /// The stream ended part-way through a frame body.
    #[error("malformed frame: expected {expected} body bytes, received {received}")]
    MalformedFrame { expected: usize, received: usize },
}

impl ChannelError {
    /// Whether the caller must drop the connection and reconnect.
    pub fn requires_reconnect(&self) -> bool {
        !matches!(self, ChannelError::UnsupportedVersion(_))
    }
}

/// Precondition violations for the two-bone solver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IkError {
    #[error("bone lengths must be positive (upper={upper}, fore={fore})")]
    NonPositiveLength { upper: f32, fore: f32 },
}

/// Invalid numeric configuration detected at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}
