use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use super::canvas_size::CanvasSize;
use super::timestamp::PresentationTimestamp;

/// Library error crossing an infrastructure boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures that stop a build before any frame is written.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("no frames to encode")]
    NoFrames,
    #[error("failed to determine the dimensions of the first frame {source_id}")]
    DimensionsUndeterminable {
        source_id: String,
        #[source]
        cause: Option<BoxError>,
    },
    #[error("encoder failed to start: {reason}")]
    WriterInitFailed {
        reason: String,
        #[source]
        cause: Option<BoxError>,
    },
    #[error("invalid output path {path}: {reason}")]
    OutputPathInvalid { path: PathBuf, reason: String },
}

/// Failures processing a single frame. The first one aborts the build.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("failed to read {source_id}")]
    SourceUnreadable {
        source_id: String,
        #[source]
        cause: BoxError,
    },
    #[error("failed to decode {source_id}")]
    DecodeFailed {
        source_id: String,
        #[source]
        cause: BoxError,
    },
    #[error("frame is {actual} but the canvas is {expected}")]
    RasterMismatch {
        expected: CanvasSize,
        actual: RasterDimensions,
    },
    #[error("pixel buffer pool exhausted ({capacity} buffers in use)")]
    PoolExhausted { capacity: usize },
    #[error("encoder rejected the pixel buffer")]
    AppendRejected,
    #[error("failed to encode the frame")]
    EncodeFailed {
        #[source]
        cause: BoxError,
    },
}

/// Failure flushing and closing the output.
#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error("failed to finalize output: {reason}")]
    WriterFinalizeFailed {
        reason: String,
        #[source]
        cause: Option<BoxError>,
    },
    /// The encoder gave up on an accepted frame after `append` returned.
    #[error("failed to encode the frame at {timestamp}")]
    EncodeFailed {
        timestamp: PresentationTimestamp,
        #[source]
        cause: BoxError,
    },
}

/// Terminal failure of one build.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("frame {index} ({source_id})")]
    Frame {
        index: u64,
        source_id: String,
        #[source]
        error: FrameError,
    },
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
    #[error("build cancelled after {completed} frames")]
    Cancelled { completed: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StartupFailure,
    FrameFailure,
    FinalizeFailure,
    Cancelled,
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Startup(_) => ErrorKind::StartupFailure,
            BuildError::Frame { .. } => ErrorKind::FrameFailure,
            BuildError::Finalize(_) => ErrorKind::FinalizeFailure,
            BuildError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::StartupFailure => "startup failure",
            ErrorKind::FrameFailure => "frame failure",
            ErrorKind::FinalizeFailure => "finalize failure",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Width and height of a decoded raster, which may be zero-sized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterDimensions {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for RasterDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
