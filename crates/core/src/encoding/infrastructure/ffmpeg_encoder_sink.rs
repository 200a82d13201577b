use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::encoding::domain::encoder_sink::{
    Codec, EncoderSession, EncoderSink, Readiness, SinkSettings,
};
use crate::imaging::domain::pixel_buffer::{PixelBuffer, PixelBufferPool, PixelFormat};
use crate::shared::build_error::{BoxError, FinalizeError, StartupError};
use crate::shared::canvas_size::CanvasSize;
use crate::shared::constants::ENCODER_QUEUE_CAPACITY;
use crate::shared::timestamp::{FrameRate, PresentationTimestamp};

type QueuedFrame = (PixelBuffer, PresentationTimestamp);
/// The encoder, plus the timestamp and cause of the frame it failed on.
type WriterResult = (FfmpegEncoder, Option<(PresentationTimestamp, BoxError)>);

/// Encodes pixel buffers to a video file via ffmpeg-next.
///
/// Each session encodes on its own writer thread fed by a bounded queue.
/// The session reports readiness while the queue has room, which is the
/// backpressure the pipeline driver waits on.
pub struct FfmpegEncoderSink {
    queue_capacity: usize,
}

impl FfmpegEncoderSink {
    pub fn new() -> Self {
        Self {
            queue_capacity: ENCODER_QUEUE_CAPACITY,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

impl Default for FfmpegEncoderSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderSink for FfmpegEncoderSink {
    fn can_start(&self) -> bool {
        ffmpeg_next::init().is_ok()
    }

    fn start(
        &mut self,
        settings: &SinkSettings,
        destination: &Path,
    ) -> Result<Box<dyn EncoderSession>, StartupError> {
        let encoder =
            FfmpegEncoder::open(settings, destination).map_err(|e| StartupError::WriterInitFailed {
                reason: e.to_string(),
                cause: Some(e),
            })?;

        let capacity = self.queue_capacity;
        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<QueuedFrame>(capacity);
        let (consumed_tx, consumed_rx) = crossbeam_channel::unbounded::<()>();
        let failed = Arc::new(AtomicBool::new(false));

        let writer = spawn_writer(encoder, frame_rx, consumed_tx, failed.clone()).map_err(|e| {
            StartupError::WriterInitFailed {
                reason: format!("failed to spawn encoder thread: {e}"),
                cause: Some(Box::new(e)),
            }
        })?;

        log::info!(
            "Encoding {} {} at {} to {}",
            settings.canvas,
            settings.codec,
            settings.frame_rate,
            destination.display()
        );

        // Queued + being encoded + being rasterized.
        let pool = PixelBufferPool::new(
            settings.canvas,
            PixelFormat::Argb32Premultiplied,
            capacity + 2,
        );

        Ok(Box::new(FfmpegSession {
            frame_tx: Some(frame_tx),
            consumed_rx,
            failed,
            pool,
            writer: Some(writer),
            frame_rate: settings.frame_rate,
            destination: destination.to_path_buf(),
        }))
    }
}

fn spawn_writer(
    mut encoder: FfmpegEncoder,
    frame_rx: Receiver<QueuedFrame>,
    consumed_tx: Sender<()>,
    failed: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<WriterResult>> {
    std::thread::Builder::new()
        .name("encoder-writer".into())
        .spawn(move || {
            for (buffer, timestamp) in frame_rx {
                let result = encoder.encode(&buffer, timestamp);
                drop(buffer);
                if let Err(e) = result {
                    log::error!("Encoding frame at {timestamp} failed: {e}");
                    failed.store(true, Ordering::SeqCst);
                    return (encoder, Some((timestamp, e)));
                }
                let _ = consumed_tx.send(());
            }
            (encoder, None)
        })
}

struct FfmpegSession {
    frame_tx: Option<Sender<QueuedFrame>>,
    consumed_rx: Receiver<()>,
    failed: Arc<AtomicBool>,
    pool: PixelBufferPool,
    writer: Option<JoinHandle<WriterResult>>,
    frame_rate: FrameRate,
    destination: PathBuf,
}

impl EncoderSession for FfmpegSession {
    fn wait_until_ready(&mut self) -> Readiness {
        loop {
            if self.failed.load(Ordering::SeqCst) || self.frame_tx.is_none() {
                return Readiness::Closed;
            }
            if self.is_ready_for_more_data() {
                return Readiness::Ready;
            }
            // Woken each time the writer thread finishes a frame.
            if self.consumed_rx.recv().is_err() {
                return Readiness::Closed;
            }
        }
    }

    fn is_ready_for_more_data(&self) -> bool {
        !self.failed.load(Ordering::SeqCst)
            && self.frame_tx.as_ref().is_some_and(|tx| !tx.is_full())
    }

    fn buffer_pool(&self) -> PixelBufferPool {
        self.pool.clone()
    }

    fn append(&mut self, buffer: PixelBuffer, timestamp: PresentationTimestamp) -> bool {
        if self.failed.load(Ordering::SeqCst) {
            return false;
        }
        if timestamp.timescale() != self.frame_rate.fps() {
            log::warn!(
                "Rejecting timestamp {timestamp}: session runs at {}",
                self.frame_rate
            );
            return false;
        }
        match &self.frame_tx {
            Some(tx) => tx.send((buffer, timestamp)).is_ok(),
            None => false,
        }
    }

    fn finish(mut self: Box<Self>) -> Result<(), FinalizeError> {
        drop(self.frame_tx.take());

        let writer = self
            .writer
            .take()
            .ok_or_else(|| finalize_error("session already finished".into(), None))?;
        let (encoder, encode_failure) = writer
            .join()
            .map_err(|_| finalize_error("encoder thread panicked".into(), None))?;

        let frames = encoder.frames_written();
        let trailer = encoder.finish();

        if let Some((timestamp, cause)) = encode_failure {
            if let Err(e) = trailer {
                log::warn!("Writing the trailer after a failed frame also failed: {e}");
            }
            return Err(FinalizeError::EncodeFailed { timestamp, cause });
        }
        trailer.map_err(|e| finalize_error(e.to_string(), Some(e)))?;

        log::info!(
            "Finalized {} ({frames} frames)",
            self.destination.display()
        );
        Ok(())
    }
}

fn finalize_error(reason: String, cause: Option<BoxError>) -> FinalizeError {
    FinalizeError::WriterFinalizeFailed { reason, cause }
}

/// The ffmpeg muxer, encoder and ARGB → YUV scaler for one output file.
struct FfmpegEncoder {
    octx: ffmpeg_next::format::context::Output,
    encoder: ffmpeg_next::codec::encoder::video::Encoder,
    scaler: ffmpeg_next::software::scaling::Context,
    canvas: CanvasSize,
    time_base: ffmpeg_next::Rational,
    stream_index: usize,
    frames_written: u64,
}

// Safety: FfmpegEncoder is created on the driver thread and then moved to
// the writer thread, which is its only user from then on. The raw pointers
// inside ffmpeg types are never shared across threads.
unsafe impl Send for FfmpegEncoder {}

impl FfmpegEncoder {
    fn open(settings: &SinkSettings, destination: &Path) -> Result<Self, BoxError> {
        ffmpeg_next::init()?;

        let canvas = settings.canvas;
        let fps = settings.frame_rate.fps() as i32;
        let time_base = ffmpeg_next::Rational(1, fps);

        let mut octx =
            ffmpeg_next::format::output_as(&destination, settings.container.format_name())?;

        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg_next::format::Flags::GLOBAL_HEADER);

        let codec_id = match settings.codec {
            Codec::Mpeg4 => ffmpeg_next::codec::Id::MPEG4,
            Codec::H264 => ffmpeg_next::codec::Id::H264,
        };
        let codec = ffmpeg_next::encoder::find(codec_id)
            .ok_or_else(|| format!("{} encoder not found", settings.codec))?;

        let mut ost = octx.add_stream(Some(codec))?;
        let stream_index = ost.index();

        let mut encoder_ctx = ffmpeg_next::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;

        encoder_ctx.set_width(canvas.width());
        encoder_ctx.set_height(canvas.height());
        encoder_ctx.set_format(ffmpeg_next::format::Pixel::YUV420P);
        encoder_ctx.set_time_base(time_base);
        encoder_ctx.set_frame_rate(Some(ffmpeg_next::Rational(fps, 1)));

        if global_header {
            encoder_ctx.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder_ctx.open_with(ffmpeg_next::Dictionary::new())?;
        ost.set_parameters(&encoder);
        ost.set_time_base(time_base);

        octx.write_header()?;

        let scaler = ffmpeg_next::software::scaling::Context::get(
            ffmpeg_next::format::Pixel::ARGB,
            canvas.width(),
            canvas.height(),
            ffmpeg_next::format::Pixel::YUV420P,
            canvas.width(),
            canvas.height(),
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        Ok(Self {
            octx,
            encoder,
            scaler,
            canvas,
            time_base,
            stream_index,
            frames_written: 0,
        })
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn encode(&mut self, buffer: &PixelBuffer, timestamp: PresentationTimestamp) -> Result<(), BoxError> {
        let width = self.canvas.width();
        let height = self.canvas.height();

        let mut argb_frame = ffmpeg_next::util::frame::video::Video::new(
            ffmpeg_next::format::Pixel::ARGB,
            width,
            height,
        );

        let stride = argb_frame.stride(0);
        let row_len = width as usize * 4;
        let data = argb_frame.data_mut(0);

        // Copy pixel data, respecting both strides
        for y in 0..height {
            let dst_start = y as usize * stride;
            data[dst_start..dst_start + row_len].copy_from_slice(buffer.row(y));
        }

        let mut yuv_frame = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler.run(&argb_frame, &mut yuv_frame)?;
        yuv_frame.set_pts(Some(timestamp.value()));

        self.encoder.send_frame(&yuv_frame)?;
        self.write_pending_packets()?;

        self.frames_written += 1;
        Ok(())
    }

    fn write_pending_packets(&mut self) -> Result<(), BoxError> {
        let ost_time_base = self
            .octx
            .stream(self.stream_index)
            .ok_or("output stream missing")?
            .time_base();

        let mut encoded = ffmpeg_next::Packet::empty();
        while self.encoder.receive_packet(&mut encoded).is_ok() {
            encoded.set_stream(self.stream_index);
            // One frame per tick of the encoder time base
            encoded.set_duration(1);
            encoded.rescale_ts(self.time_base, ost_time_base);
            encoded.write_interleaved(&mut self.octx)?;
        }
        Ok(())
    }

    /// Flushes buffered packets and writes the container trailer.
    fn finish(mut self) -> Result<(), BoxError> {
        self.encoder.send_eof()?;
        self.write_pending_packets()?;
        self.octx.write_trailer()?;
        Ok(())
    }
}
