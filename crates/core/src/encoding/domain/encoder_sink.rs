use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::imaging::domain::pixel_buffer::{PixelBuffer, PixelBufferPool};
use crate::shared::build_error::{FinalizeError, StartupError};
use crate::shared::canvas_size::CanvasSize;
use crate::shared::timestamp::{FrameRate, PresentationTimestamp};

/// Output file container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Container {
    #[default]
    Mp4,
    Mov,
    Mkv,
}

impl Container {
    pub const ALL: &[Container] = &[Container::Mp4, Container::Mov, Container::Mkv];

    /// Muxer name understood by ffmpeg.
    pub fn format_name(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mov => "mov",
            Container::Mkv => "matroska",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mov => "mov",
            Container::Mkv => "mkv",
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Container {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(Container::Mp4),
            "mov" => Ok(Container::Mov),
            "mkv" | "matroska" => Ok(Container::Mkv),
            other => Err(format!("unknown container '{other}' (expected mp4, mov or mkv)")),
        }
    }
}

/// Video codec of the single output track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Codec {
    /// MPEG-4 Part 2; built into every ffmpeg.
    #[default]
    Mpeg4,
    /// H.264; requires an ffmpeg built with an H.264 encoder.
    H264,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Mpeg4 => f.write_str("mpeg4"),
            Codec::H264 => f.write_str("h264"),
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mpeg4" => Ok(Codec::Mpeg4),
            "h264" | "avc" => Ok(Codec::H264),
            other => Err(format!("unknown codec '{other}' (expected mpeg4 or h264)")),
        }
    }
}

/// Everything a sink needs to open a writing session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkSettings {
    pub canvas: CanvasSize,
    pub frame_rate: FrameRate,
    pub container: Container,
    pub codec: Codec,
}

/// Result of waiting on a session's readiness signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// At least one more frame can be appended.
    Ready,
    /// The session stopped accepting data and never will again.
    Closed,
}

/// Abstracts the video encoder so the pipeline can write output without
/// depending on a specific codec library.
pub trait EncoderSink: Send {
    /// Whether a session can currently be opened at all.
    fn can_start(&self) -> bool;

    /// Opens a writing session to `destination`.
    fn start(
        &mut self,
        settings: &SinkSettings,
        destination: &Path,
    ) -> Result<Box<dyn EncoderSession>, StartupError>;
}

/// One open writing session, exclusively owned by the pipeline driver.
///
/// Ordering contract: `append` is called with strictly increasing timestamps.
pub trait EncoderSession: Send {
    /// Blocks until the session can take more data or has closed.
    fn wait_until_ready(&mut self) -> Readiness;

    fn is_ready_for_more_data(&self) -> bool;

    /// Pool producing buffers in the layout this session consumes.
    fn buffer_pool(&self) -> PixelBufferPool;

    /// Takes ownership of `buffer`. Returns `false` if the encoder rejected it.
    fn append(&mut self, buffer: PixelBuffer, timestamp: PresentationTimestamp) -> bool;

    /// Flushes and closes the output, releasing the session.
    fn finish(self: Box<Self>) -> Result<(), FinalizeError>;
}
