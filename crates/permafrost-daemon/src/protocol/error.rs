//! Protocol error types.

use thiserror::Error;

/// Maximum frame size accepted on the control connection (4 MiB).
///
/// Snapshot bodies dominate frame sizes; nothing legitimate approaches
/// this. Length prefixes above the cap are rejected before allocation.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised by the framing and dispatch layers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A frame's declared or actual size exceeds [`MAX_FRAME_SIZE`].
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Declared or actual frame size.
        size: usize,
        /// The enforced maximum.
        max: usize,
    },

    /// An empty frame, an unknown tag, or an undecodable payload.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// What failed to parse.
        reason: String,
    },

    /// Underlying socket failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Builds a [`ProtocolError::MalformedFrame`].
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }
}
