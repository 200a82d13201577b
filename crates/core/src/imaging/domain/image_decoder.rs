use crate::shared::build_error::FrameError;
use crate::shared::frame_source::FrameDescriptor;
use crate::shared::raster_image::RasterImage;

/// Domain interface for turning a frame descriptor into pixels.
///
/// Implementations report [`FrameError::SourceUnreadable`] when the bytes
/// cannot be loaded and [`FrameError::DecodeFailed`] when they are not a
/// decodable image.
pub trait ImageDecoder: Send {
    fn decode(&self, descriptor: &FrameDescriptor) -> Result<RasterImage, FrameError>;
}
