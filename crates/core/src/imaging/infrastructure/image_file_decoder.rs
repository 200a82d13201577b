use crate::imaging::domain::image_decoder::ImageDecoder;
use crate::shared::build_error::{BoxError, FrameError};
use crate::shared::frame_source::FrameDescriptor;
use crate::shared::raster_image::RasterImage;

/// Loads a frame's bytes from the local filesystem and decodes them with
/// the `image` crate.
///
/// The container format is sniffed from the bytes, so file extensions are
/// not trusted.
pub struct ImageFileDecoder;

impl ImageFileDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageFileDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageDecoder for ImageFileDecoder {
    fn decode(&self, descriptor: &FrameDescriptor) -> Result<RasterImage, FrameError> {
        let unreadable = |cause: BoxError| FrameError::SourceUnreadable {
            source_id: descriptor.id().to_string(),
            cause,
        };

        let path = descriptor.to_path().map_err(|reason| unreadable(reason.into()))?;
        let bytes = std::fs::read(&path).map_err(|e| unreadable(Box::new(e)))?;

        let image = image::load_from_memory(&bytes).map_err(|e| FrameError::DecodeFailed {
            source_id: descriptor.id().to_string(),
            cause: Box::new(e),
        })?;

        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::debug!("Decoded {descriptor} ({width}x{height})");
        Ok(RasterImage::new(rgba.into_raw(), width, height))
    }
}
