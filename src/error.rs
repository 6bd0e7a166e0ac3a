use thiserror::Error;

use crate::frame::PixelFormat;

/// Library error type for compositor operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A frame's pixel buffer does not match its declared geometry.
    #[error("frame buffer holds {actual} bytes but {width}x{height} {format} needs {expected}")]
    FrameSize {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    /// An effect descriptor was built with parameters the executor cannot honour.
    #[error("invalid effect descriptor: {0}")]
    InvalidEffect(String),

    /// The rendering side of a frame handoff channel has gone away.
    #[error("frame handoff channel closed")]
    HandoffClosed,
}
