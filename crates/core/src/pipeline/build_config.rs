use std::path::PathBuf;

use crate::encoding::domain::encoder_sink::{Codec, Container};
use crate::shared::canvas_size::CanvasSize;
use crate::shared::frame_source::FrameSourceList;
use crate::shared::timestamp::FrameRate;

/// Inputs of one time-lapse build.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildConfig {
    pub sources: FrameSourceList,
    pub frame_rate: FrameRate,
    pub container: Container,
    pub codec: Codec,
    pub destination: PathBuf,
    /// Fixed output size. When `None` the first frame's size is used.
    pub canvas: Option<CanvasSize>,
}

impl BuildConfig {
    pub fn new(sources: FrameSourceList, destination: impl Into<PathBuf>) -> Self {
        Self {
            sources,
            frame_rate: FrameRate::default(),
            container: Container::default(),
            codec: Codec::default(),
            destination: destination.into(),
            canvas: None,
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: FrameRate) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.container = container;
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_canvas(mut self, canvas: CanvasSize) -> Self {
        self.canvas = Some(canvas);
        self
    }
}
