use crate::imaging::domain::pixel_buffer::{PixelBuffer, PixelFormat};
use crate::shared::build_error::{FrameError, RasterDimensions};
use crate::shared::canvas_size::CanvasSize;
use crate::shared::raster_image::{RasterImage, RGBA_CHANNELS};

/// Draws decoded rasters into pixel buffers for a fixed canvas.
///
/// Frames must already match the canvas; nothing is scaled or cropped.
pub struct FrameRasterizer {
    canvas: CanvasSize,
}

impl FrameRasterizer {
    pub fn new(canvas: CanvasSize) -> Self {
        Self { canvas }
    }

    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    /// Copies `raster` into `buffer` in the buffer's pixel format, top row first.
    pub fn rasterize(&self, raster: &RasterImage, buffer: &mut PixelBuffer) -> Result<(), FrameError> {
        if raster.width() != self.canvas.width() || raster.height() != self.canvas.height() {
            return Err(FrameError::RasterMismatch {
                expected: self.canvas,
                actual: RasterDimensions {
                    width: raster.width(),
                    height: raster.height(),
                },
            });
        }
        if buffer.canvas() != self.canvas {
            return Err(FrameError::RasterMismatch {
                expected: self.canvas,
                actual: RasterDimensions {
                    width: buffer.canvas().width(),
                    height: buffer.canvas().height(),
                },
            });
        }

        let format = buffer.format();
        let mut lock = buffer.lock();
        for y in 0..self.canvas.height() {
            let src = raster.row(y);
            let dst = lock.row_mut(y);
            match format {
                PixelFormat::Argb32Premultiplied => rgba_to_premultiplied_argb(src, dst),
            }
        }
        Ok(())
    }
}

fn rgba_to_premultiplied_argb(src: &[u8], dst: &mut [u8]) {
    for (rgba, argb) in src
        .chunks_exact(RGBA_CHANNELS)
        .zip(dst.chunks_exact_mut(RGBA_CHANNELS))
    {
        let a = rgba[3];
        argb[0] = a;
        argb[1] = premultiply(rgba[0], a);
        argb[2] = premultiply(rgba[1], a);
        argb[3] = premultiply(rgba[2], a);
    }
}

fn premultiply(channel: u8, alpha: u8) -> u8 {
    ((channel as u16 * alpha as u16 + 127) / 255) as u8
}
