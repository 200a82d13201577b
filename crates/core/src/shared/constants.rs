pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Byte alignment of every pixel buffer row.
pub const ROW_ALIGNMENT: usize = 64;

/// Frames the encoder writer thread may have queued before the session
/// stops reporting readiness.
pub const ENCODER_QUEUE_CAPACITY: usize = 4;

/// Name given to the worker thread that drives a background build.
pub const WORKER_THREAD_NAME: &str = "media-input";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
