use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::shared::build_error::FrameError;
use crate::shared::canvas_size::CanvasSize;
use crate::shared::constants::ROW_ALIGNMENT;

/// Pixel layout expected by the encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8 bits per channel, bytes ordered A R G B, colour premultiplied by alpha.
    Argb32Premultiplied,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Argb32Premultiplied => 4,
        }
    }

    /// Row length in bytes for `width` pixels, padded to [`ROW_ALIGNMENT`].
    pub fn stride_for(self, width: u32) -> usize {
        let row = width as usize * self.bytes_per_pixel();
        row.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT
    }
}

/// A canvas-sized buffer in the encoder's pixel format.
///
/// Owned by exactly one pipeline stage at a time. Dropping it hands the
/// storage back to the pool it came from, whichever stage drops it.
pub struct PixelBuffer {
    data: Vec<u8>,
    canvas: CanvasSize,
    format: PixelFormat,
    stride: usize,
    locked: bool,
    recycler: Option<Sender<Vec<u8>>>,
}

impl PixelBuffer {
    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Visible bytes of row `y`, without stride padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        let len = self.canvas.width() as usize * self.format.bytes_per_pixel();
        &self.data[start..start + len]
    }

    /// Grants exclusive write access until the returned guard is dropped.
    pub fn lock(&mut self) -> PixelBufferLock<'_> {
        self.locked = true;
        PixelBufferLock { buffer: self }
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        if let Some(recycler) = self.recycler.take() {
            // The pool may already be gone; the storage is then simply freed.
            let _ = recycler.send(std::mem::take(&mut self.data));
        }
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("canvas", &self.canvas)
            .field("format", &self.format)
            .field("stride", &self.stride)
            .field("locked", &self.locked)
            .finish()
    }
}

/// Scoped write access to a [`PixelBuffer`]'s memory. Unlocks on drop.
pub struct PixelBufferLock<'a> {
    buffer: &'a mut PixelBuffer,
}

impl PixelBufferLock<'_> {
    pub fn stride(&self) -> usize {
        self.buffer.stride
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.buffer.stride;
        let len = self.buffer.canvas.width() as usize * self.buffer.format.bytes_per_pixel();
        &mut self.buffer.data[start..start + len]
    }
}

impl Drop for PixelBufferLock<'_> {
    fn drop(&mut self) {
        self.buffer.locked = false;
    }
}

/// Bounded, recycling allocator of [`PixelBuffer`]s for one canvas and format.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct PixelBufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    canvas: CanvasSize,
    format: PixelFormat,
    stride: usize,
    capacity: usize,
    allocated: AtomicUsize,
    recycle_tx: Sender<Vec<u8>>,
    recycle_rx: Receiver<Vec<u8>>,
}

impl PixelBufferPool {
    pub fn new(canvas: CanvasSize, format: PixelFormat, capacity: usize) -> Self {
        let (recycle_tx, recycle_rx) = crossbeam_channel::unbounded();
        Self {
            inner: Arc::new(PoolInner {
                canvas,
                format,
                stride: format.stride_for(canvas.width()),
                capacity: capacity.max(1),
                allocated: AtomicUsize::new(0),
                recycle_tx,
                recycle_rx,
            }),
        }
    }

    /// Hands out a recycled buffer if one is waiting, otherwise allocates
    /// while fewer than `capacity` buffers exist.
    pub fn acquire(&self) -> Result<PixelBuffer, FrameError> {
        let inner = &self.inner;
        let data = match inner.recycle_rx.try_recv() {
            Ok(data) => data,
            Err(_) => {
                let capacity = inner.capacity;
                inner
                    .allocated
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n < capacity).then_some(n + 1)
                    })
                    .map_err(|_| FrameError::PoolExhausted { capacity })?;
                vec![0u8; inner.stride * inner.canvas.height() as usize]
            }
        };

        Ok(PixelBuffer {
            data,
            canvas: inner.canvas,
            format: inner.format,
            stride: inner.stride,
            locked: false,
            recycler: Some(inner.recycle_tx.clone()),
        })
    }

    pub fn canvas(&self) -> CanvasSize {
        self.inner.canvas
    }

    pub fn format(&self) -> PixelFormat {
        self.inner.format
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Buffers created so far, whether in use or waiting for reuse.
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::SeqCst)
    }

    /// Buffers returned and ready for reuse.
    pub fn available(&self) -> usize {
        self.inner.recycle_rx.len()
    }
}
