use super::canvas_size::CanvasSize;

pub const RGBA_CHANNELS: usize = 4;

/// A decoded still image: contiguous straight-alpha RGBA bytes, row-major,
/// top row first.
///
/// Conversion into the encoder's pixel layout happens in the rasterizer;
/// decoders only produce this neutral form.
#[derive(Clone, Debug)]
pub struct RasterImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl RasterImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * RGBA_CHANNELS,
            "data length must equal width * height * 4"
        );
        Self {
            data,
            width,
            height,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `None` for a degenerate zero-sized image.
    pub fn canvas_size(&self) -> Option<CanvasSize> {
        CanvasSize::new(self.width, self.height)
    }

    /// One row of RGBA pixels.
    pub fn row(&self, y: u32) -> &[u8] {
        let row_len = self.width as usize * RGBA_CHANNELS;
        let start = y as usize * row_len;
        &self.data[start..start + row_len]
    }
}
