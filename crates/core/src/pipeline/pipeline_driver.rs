use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::encoding::domain::encoder_sink::{EncoderSession, EncoderSink, Readiness, SinkSettings};
use crate::imaging::domain::frame_rasterizer::FrameRasterizer;
use crate::imaging::domain::image_decoder::ImageDecoder;
use crate::imaging::domain::pixel_buffer::PixelBufferPool;
use crate::shared::build_error::{BuildError, ErrorKind, FinalizeError, FrameError, StartupError};
use crate::shared::build_outcome::BuildOutcome;
use crate::shared::canvas_size::CanvasSize;
use crate::shared::frame_source::{FrameDescriptor, FrameQueue};
use crate::shared::raster_image::RasterImage;
use crate::shared::timestamp::{FrameRate, PresentationTimestamp};

use super::build_config::BuildConfig;
use super::build_observer::{error_chain, BuildObserver};
use super::progress_reporter::ProgressReporter;

/// Lifecycle of one build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    /// Waiting on the session's readiness signal.
    Writing,
    /// Appending frames while the session keeps accepting them.
    Draining,
    Finishing,
    Succeeded,
    Failed(ErrorKind),
}

impl DriverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DriverState::Succeeded | DriverState::Failed(_))
    }
}

/// `start` was called on a driver that already ran.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("build already started (state: {state:?})")]
pub struct AlreadyStarted {
    pub state: DriverState,
}

/// Pulls frames from the source list through decode and rasterization into
/// an encoder session, honouring the session's backpressure.
///
/// A driver runs exactly one build. All observer callbacks happen on the
/// thread that calls [`PipelineDriver::start`].
pub struct PipelineDriver {
    config: BuildConfig,
    decoder: Box<dyn ImageDecoder>,
    sink: Box<dyn EncoderSink>,
    reporter: ProgressReporter,
    cancelled: Arc<AtomicBool>,
    state: DriverState,
    #[cfg(test)]
    history: Vec<DriverState>,
}

impl PipelineDriver {
    pub fn new(
        config: BuildConfig,
        decoder: Box<dyn ImageDecoder>,
        sink: Box<dyn EncoderSink>,
        observer: Box<dyn BuildObserver>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        let total = config.sources.len();
        Self {
            config,
            decoder,
            sink,
            reporter: ProgressReporter::new(observer, total),
            cancelled,
            state: DriverState::Idle,
            #[cfg(test)]
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Runs the build to completion and delivers its outcome to the observer.
    pub fn start(&mut self) -> Result<BuildOutcome, AlreadyStarted> {
        if self.state != DriverState::Idle {
            return Err(AlreadyStarted { state: self.state });
        }

        let outcome = match self.run() {
            Ok(output) => {
                log::info!(
                    "Time-lapse written to {} ({} frames)",
                    output.display(),
                    self.reporter.completed()
                );
                self.enter(DriverState::Succeeded);
                self.reporter.deliver_success(&output);
                BuildOutcome::Success(output)
            }
            Err(error) => {
                log::error!("Time-lapse build failed: {}", error_chain(&error));
                self.enter(DriverState::Failed(error.kind()));
                self.reporter.deliver_failure(&error);
                BuildOutcome::Failure(error)
            }
        };
        Ok(outcome)
    }

    fn run(&mut self) -> Result<PathBuf, BuildError> {
        let sources = std::mem::take(&mut self.config.sources);
        let ids = sources.ids().to_vec();
        let first = sources.first().ok_or(StartupError::NoFrames)?;
        let (canvas, first_raster) = self.resolve_canvas(&first)?;

        let destination = self.config.destination.clone();
        prepare_destination(&destination)?;

        if !self.sink.can_start() {
            return Err(StartupError::WriterInitFailed {
                reason: "encoder is not available".into(),
                cause: None,
            }
            .into());
        }
        let settings = SinkSettings {
            canvas,
            frame_rate: self.config.frame_rate,
            container: self.config.container,
            codec: self.config.codec,
        };
        let mut session = self.sink.start(&settings, &destination)?;
        self.enter(DriverState::Writing);
        log::info!(
            "Building {} frames at {} into {}",
            sources.len(),
            self.config.frame_rate,
            destination.display()
        );

        let written = self.write_frames(session.as_mut(), sources.into_queue(), canvas, first_raster);

        self.enter(DriverState::Finishing);
        let finished = session.finish();

        settle(written, finished, &ids, self.config.frame_rate)?;
        Ok(destination)
    }

    fn enter(&mut self, state: DriverState) {
        if self.state == state {
            return;
        }
        log::trace!("Driver {:?} -> {state:?}", self.state);
        self.state = state;
        #[cfg(test)]
        self.history.push(state);
    }

    /// Uses the configured canvas, or the first frame's size when none is
    /// configured. The decoded first frame is returned for reuse.
    fn resolve_canvas(
        &self,
        first: &FrameDescriptor,
    ) -> Result<(CanvasSize, Option<RasterImage>), StartupError> {
        if let Some(canvas) = self.config.canvas {
            return Ok((canvas, None));
        }

        let raster = self
            .decoder
            .decode(first)
            .map_err(|e| StartupError::DimensionsUndeterminable {
                source_id: first.id().to_string(),
                cause: Some(Box::new(e)),
            })?;
        let canvas = raster
            .canvas_size()
            .ok_or_else(|| StartupError::DimensionsUndeterminable {
                source_id: first.id().to_string(),
                cause: None,
            })?;
        log::debug!("Canvas {canvas} taken from {first}");
        Ok((canvas, Some(raster)))
    }

    fn write_frames(
        &mut self,
        session: &mut dyn EncoderSession,
        mut queue: FrameQueue,
        canvas: CanvasSize,
        mut first_raster: Option<RasterImage>,
    ) -> Result<(), BuildError> {
        let rasterizer = FrameRasterizer::new(canvas);
        let pool = session.buffer_pool();

        while !queue.is_empty() {
            self.check_cancelled()?;

            self.enter(DriverState::Writing);
            if session.wait_until_ready() == Readiness::Closed {
                if let Some(descriptor) = queue.pop() {
                    return Err(frame_failure(&descriptor, FrameError::AppendRejected));
                }
                break;
            }

            self.enter(DriverState::Draining);
            while session.is_ready_for_more_data() {
                self.check_cancelled()?;
                let Some(descriptor) = queue.pop() else {
                    break;
                };

                let raster = if descriptor.index() == 0 {
                    first_raster.take()
                } else {
                    None
                };
                self.append_frame(session, &pool, &rasterizer, &descriptor, raster)
                    .map_err(|e| frame_failure(&descriptor, e))?;
                self.reporter.report_progress();
            }
        }
        Ok(())
    }

    fn append_frame(
        &self,
        session: &mut dyn EncoderSession,
        pool: &PixelBufferPool,
        rasterizer: &FrameRasterizer,
        descriptor: &FrameDescriptor,
        raster: Option<RasterImage>,
    ) -> Result<(), FrameError> {
        let raster = match raster {
            Some(raster) => raster,
            None => self.decoder.decode(descriptor)?,
        };

        let mut buffer = pool.acquire()?;
        rasterizer.rasterize(&raster, &mut buffer)?;

        let timestamp = PresentationTimestamp::for_frame(descriptor.index(), self.config.frame_rate);
        if !session.append(buffer, timestamp) {
            return Err(FrameError::AppendRejected);
        }
        log::debug!("Appended {descriptor} at {timestamp}");
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), BuildError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(BuildError::Cancelled {
                completed: self.reporter.completed(),
            });
        }
        Ok(())
    }
}

fn frame_failure(descriptor: &FrameDescriptor, error: FrameError) -> BuildError {
    BuildError::Frame {
        index: descriptor.index(),
        source_id: descriptor.id().to_string(),
        error,
    }
}

/// Chooses the failure to deliver once the session is finished.
///
/// An encoder failure names the frame it happened on, which may be earlier
/// than the frame the loop stopped at. It wins unless the loop was cancelled
/// or had already failed on an earlier frame. Any other finish error only
/// counts when the loop succeeded.
fn settle(
    written: Result<(), BuildError>,
    finished: Result<(), FinalizeError>,
    ids: &[String],
    rate: FrameRate,
) -> Result<(), BuildError> {
    let (timestamp, cause) = match finished {
        Ok(()) => return written,
        Err(FinalizeError::EncodeFailed { timestamp, cause }) => (timestamp, cause),
        Err(other) => {
            written?;
            return Err(other.into());
        }
    };

    let located = timestamp.frame_index(rate).and_then(|index| {
        let source_id = ids.get(usize::try_from(index).ok()?)?;
        Some((index, source_id.clone()))
    });
    let Some((index, source_id)) = located else {
        written?;
        return Err(FinalizeError::EncodeFailed { timestamp, cause }.into());
    };

    match written {
        Err(error) if precedes(&error, index) => Err(error),
        _ => Err(BuildError::Frame {
            index,
            source_id,
            error: FrameError::EncodeFailed { cause },
        }),
    }
}

/// Whether a failure from the frame loop outranks an encoder failure on frame `index`.
fn precedes(error: &BuildError, index: u64) -> bool {
    match error {
        BuildError::Cancelled { .. } => true,
        BuildError::Frame { index: earlier, .. } => *earlier < index,
        _ => false,
    }
}

/// Validates the destination and removes any file already there.
fn prepare_destination(path: &Path) -> Result<(), StartupError> {
    if path.file_name().is_none() {
        return Err(StartupError::OutputPathInvalid {
            path: path.to_path_buf(),
            reason: "path has no file name".into(),
        });
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(StartupError::OutputPathInvalid {
            path: path.to_path_buf(),
            reason: format!("directory {} does not exist", parent.display()),
        });
    }

    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed existing {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not remove existing {}: {e}", path.display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::domain::encoder_sink::{Codec, Container};
    use crate::imaging::domain::pixel_buffer::{PixelBuffer, PixelFormat};
    use crate::pipeline::build_observer::{BuildEvent, ChannelBuildObserver};
    use crate::shared::frame_source::FrameSourceList;
    use crate::shared::progress::Progress;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    // --- Stubs ---

    /// Decodes by identifier: `bad*` fails to decode, `missing*` is
    /// unreadable, `empty` is 0x0, `wide` is 8x2, anything else is a 4x2
    /// opaque raster.
    struct StubDecoder {
        calls: Arc<AtomicUsize>,
    }

    impl StubDecoder {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ImageDecoder for StubDecoder {
        fn decode(&self, descriptor: &FrameDescriptor) -> Result<RasterImage, FrameError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let id = descriptor.id();
            if id.starts_with("bad") {
                return Err(FrameError::DecodeFailed {
                    source_id: id.to_string(),
                    cause: "not an image".into(),
                });
            }
            if id.starts_with("missing") {
                return Err(FrameError::SourceUnreadable {
                    source_id: id.to_string(),
                    cause: "no such file".into(),
                });
            }
            let (w, h) = match id {
                "empty" => (0, 0),
                "wide" => (8, 2),
                _ => (4, 2),
            };
            Ok(RasterImage::new([10, 20, 30, 255].repeat((w * h) as usize), w, h))
        }
    }

    #[derive(Default)]
    struct SinkLog {
        settings: Option<SinkSettings>,
        timestamps: Vec<PresentationTimestamp>,
        first_pixels: Vec<[u8; 4]>,
        waits: usize,
        finishes: usize,
    }

    #[derive(Clone, Copy, Default)]
    struct SessionBehavior {
        /// Frames accepted after each readiness signal.
        window: usize,
        /// Readiness reports `Closed` once this many frames were appended.
        close_after: Option<usize>,
        /// `append` returns false for the frame at this position.
        reject_at: Option<usize>,
        fail_finish: bool,
        /// `finish` reports that the encoder failed on the frame at this position.
        encode_failure_at: Option<u64>,
    }

    struct StubSink {
        log: Arc<Mutex<SinkLog>>,
        behavior: SessionBehavior,
        available: bool,
    }

    impl StubSink {
        fn new(behavior: SessionBehavior) -> Self {
            Self {
                log: Arc::new(Mutex::new(SinkLog::default())),
                behavior,
                available: true,
            }
        }
    }

    impl EncoderSink for StubSink {
        fn can_start(&self) -> bool {
            self.available
        }

        fn start(
            &mut self,
            settings: &SinkSettings,
            _destination: &Path,
        ) -> Result<Box<dyn EncoderSession>, StartupError> {
            self.log.lock().unwrap().settings = Some(*settings);
            Ok(Box::new(StubSession {
                log: self.log.clone(),
                pool: PixelBufferPool::new(settings.canvas, PixelFormat::Argb32Premultiplied, 2),
                behavior: self.behavior,
                slots: 0,
            }))
        }
    }

    struct StubSession {
        log: Arc<Mutex<SinkLog>>,
        pool: PixelBufferPool,
        behavior: SessionBehavior,
        slots: usize,
    }

    impl StubSession {
        fn closed(&self) -> bool {
            let appended = self.log.lock().unwrap().timestamps.len();
            self.behavior.close_after.is_some_and(|n| appended >= n)
        }
    }

    impl EncoderSession for StubSession {
        fn wait_until_ready(&mut self) -> Readiness {
            self.log.lock().unwrap().waits += 1;
            if self.closed() {
                return Readiness::Closed;
            }
            self.slots = self.behavior.window.max(1);
            Readiness::Ready
        }

        fn is_ready_for_more_data(&self) -> bool {
            self.slots > 0 && !self.closed()
        }

        fn buffer_pool(&self) -> PixelBufferPool {
            self.pool.clone()
        }

        fn append(&mut self, buffer: PixelBuffer, timestamp: PresentationTimestamp) -> bool {
            let mut log = self.log.lock().unwrap();
            if self.behavior.reject_at == Some(log.timestamps.len()) {
                return false;
            }
            let px = buffer.row(0);
            log.first_pixels.push([px[0], px[1], px[2], px[3]]);
            log.timestamps.push(timestamp);
            self.slots -= 1;
            true
        }

        fn finish(self: Box<Self>) -> Result<(), FinalizeError> {
            let mut log = self.log.lock().unwrap();
            log.finishes += 1;
            if let Some(index) = self.behavior.encode_failure_at {
                let rate = log.settings.unwrap().frame_rate;
                return Err(FinalizeError::EncodeFailed {
                    timestamp: PresentationTimestamp::for_frame(index, rate),
                    cause: "invalid data".into(),
                });
            }
            if self.behavior.fail_finish {
                return Err(FinalizeError::WriterFinalizeFailed {
                    reason: "trailer write failed".into(),
                    cause: None,
                });
            }
            Ok(())
        }
    }

    /// Raises the cancel flag after `after` progress events.
    struct CancelAfter {
        flag: Arc<AtomicBool>,
        after: usize,
    }

    impl BuildObserver for CancelAfter {
        fn on_progress(&mut self, progress: Progress) {
            if progress.completed >= self.after {
                self.flag.store(true, Ordering::SeqCst);
            }
        }
        fn on_success(&mut self, _output: &Path) {}
        fn on_failure(&mut self, _kind: ErrorKind, _error: &BuildError) {}
    }

    // --- Helpers ---

    struct Harness {
        driver: PipelineDriver,
        log: Arc<Mutex<SinkLog>>,
        decodes: Arc<AtomicUsize>,
        events: crossbeam_channel::Receiver<BuildEvent>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn events(&self) -> Vec<BuildEvent> {
            self.events.try_iter().collect()
        }

        fn progress(events: &[BuildEvent]) -> Vec<usize> {
            events
                .iter()
                .filter_map(|e| match e {
                    BuildEvent::Progress(p) => Some(p.completed),
                    _ => None,
                })
                .collect()
        }
    }

    fn harness(ids: &[&str], behavior: SessionBehavior) -> Harness {
        harness_with(ids, behavior, |config| config)
    }

    fn harness_with(
        ids: &[&str],
        behavior: SessionBehavior,
        configure: impl FnOnce(BuildConfig) -> BuildConfig,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = configure(BuildConfig::new(
            FrameSourceList::new(ids.iter().copied()),
            dir.path().join("out.mp4"),
        ));
        let decoder = StubDecoder::new();
        let decodes = decoder.calls.clone();
        let sink = StubSink::new(behavior);
        let log = sink.log.clone();
        let (observer, events) = ChannelBuildObserver::new();
        let driver = PipelineDriver::new(
            config,
            Box::new(decoder),
            Box::new(sink),
            Box::new(observer),
            Arc::new(AtomicBool::new(false)),
        );
        Harness {
            driver,
            log,
            decodes,
            events,
            dir,
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("frame{i:03}.png")).collect()
    }

    fn build_error(outcome: BuildOutcome) -> BuildError {
        match outcome {
            BuildOutcome::Failure(error) => error,
            BuildOutcome::Success(path) => panic!("expected failure, got {}", path.display()),
        }
    }

    // --- Tests ---

    #[test]
    fn test_successful_build_reports_every_frame() {
        let names = ids(5);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut h = harness(&refs, SessionBehavior::default());

        let outcome = h.driver.start().unwrap();

        assert!(outcome.is_success());
        assert_eq!(h.driver.state(), DriverState::Succeeded);
        let events = h.events();
        assert_eq!(Harness::progress(&events), vec![1, 2, 3, 4, 5]);
        assert!(matches!(events.last(), Some(BuildEvent::Succeeded(_))));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        let log = h.log.lock().unwrap();
        assert_eq!(log.finishes, 1);
        assert_eq!(log.timestamps.len(), 5);
        let settings = log.settings.unwrap();
        assert_eq!(settings.canvas, CanvasSize::new(4, 2).unwrap());
        assert_eq!(settings.container, Container::Mp4);
        assert_eq!(settings.codec, Codec::Mpeg4);
    }

    #[test]
    fn test_success_outcome_names_destination() {
        let mut h = harness(&["a.png"], SessionBehavior::default());
        let expected = h.dir.path().join("out.mp4");
        let path = h.driver.start().unwrap().into_result().unwrap();
        assert_eq!(path, expected);
        assert_eq!(h.events().last(), Some(&BuildEvent::Succeeded(expected)));
    }

    #[rstest]
    #[case(24)]
    #[case(25)]
    #[case(30)]
    #[case(60)]
    fn test_timestamps_are_exact_and_increasing(#[case] fps: u32) {
        let names = ids(12);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let rate = FrameRate::new(fps).unwrap();
        let mut h = harness_with(&refs, SessionBehavior::default(), |c| c.with_frame_rate(rate));

        assert!(h.driver.start().unwrap().is_success());

        let log = h.log.lock().unwrap();
        for (i, ts) in log.timestamps.iter().enumerate() {
            assert_eq!(ts.value(), i as i64);
            assert_eq!(ts.timescale(), fps);
        }
        assert!(log.timestamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_first_frame_decoded_once() {
        let mut h = harness(&["a.png", "b.png", "c.png"], SessionBehavior::default());
        assert!(h.driver.start().unwrap().is_success());
        assert_eq!(h.decodes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_buffers_hold_premultiplied_argb() {
        let mut h = harness(&["a.png", "b.png"], SessionBehavior::default());
        assert!(h.driver.start().unwrap().is_success());
        let log = h.log.lock().unwrap();
        assert_eq!(log.first_pixels, vec![[255, 10, 20, 30]; 2]);
    }

    #[test]
    fn test_empty_source_list_is_startup_failure() {
        let mut h = harness(&[], SessionBehavior::default());
        let error = build_error(h.driver.start().unwrap());
        assert!(matches!(error, BuildError::Startup(StartupError::NoFrames)));
        assert_eq!(h.log.lock().unwrap().finishes, 0);
    }

    #[rstest]
    #[case("bad.png")]
    #[case("missing.png")]
    #[case("empty")]
    fn test_unusable_first_frame_is_startup_failure(#[case] first: &str) {
        let mut h = harness(&[first, "b.png", "c.png"], SessionBehavior::default());

        let error = build_error(h.driver.start().unwrap());

        assert!(matches!(
            error,
            BuildError::Startup(StartupError::DimensionsUndeterminable { ref source_id, .. })
                if source_id == first
        ));
        let events = h.events();
        assert!(Harness::progress(&events).is_empty());
        assert_eq!(
            events,
            vec![BuildEvent::Failed {
                kind: ErrorKind::StartupFailure,
                message: crate::pipeline::build_observer::error_chain(&error),
            }]
        );
        let log = h.log.lock().unwrap();
        assert!(log.settings.is_none());
        assert_eq!(log.finishes, 0);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    fn test_invalid_frame_after_valid_ones_is_frame_failure(#[case] valid: usize) {
        let mut names = ids(valid);
        names.push("bad.png".into());
        names.push("never.png".into());
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut h = harness(&refs, SessionBehavior::default());

        let error = build_error(h.driver.start().unwrap());

        match &error {
            BuildError::Frame {
                index,
                source_id,
                error: FrameError::DecodeFailed { .. },
            } => {
                assert_eq!(*index, valid as u64);
                assert_eq!(source_id, "bad.png");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let events = h.events();
        assert_eq!(Harness::progress(&events), (1..=valid).collect::<Vec<_>>());
        assert!(matches!(
            events.last(),
            Some(BuildEvent::Failed {
                kind: ErrorKind::FrameFailure,
                ..
            })
        ));
        assert_eq!(h.driver.state(), DriverState::Failed(ErrorKind::FrameFailure));

        let log = h.log.lock().unwrap();
        assert_eq!(log.finishes, 1);
        assert_eq!(log.timestamps.len(), valid);
    }

    #[test]
    fn test_configured_canvas_rejects_mismatched_frame() {
        let mut h = harness_with(&["a.png", "wide"], SessionBehavior::default(), |c| {
            c.with_canvas(CanvasSize::new(4, 2).unwrap())
        });

        let error = build_error(h.driver.start().unwrap());

        assert!(matches!(
            error,
            BuildError::Frame {
                index: 1,
                error: FrameError::RasterMismatch { .. },
                ..
            }
        ));
        assert_eq!(Harness::progress(&h.events()), vec![1]);
    }

    #[test]
    fn test_configured_canvas_skips_first_frame_decode() {
        let mut h = harness_with(&["a.png", "b.png"], SessionBehavior::default(), |c| {
            c.with_canvas(CanvasSize::new(4, 2).unwrap())
        });
        assert!(h.driver.start().unwrap().is_success());
        assert_eq!(h.decodes.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    #[case(1, 7, 7)]
    #[case(3, 7, 3)]
    #[case(10, 7, 1)]
    fn test_drains_ready_capacity_before_waiting(
        #[case] window: usize,
        #[case] frames: usize,
        #[case] expected_waits: usize,
    ) {
        let names = ids(frames);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut h = harness(
            &refs,
            SessionBehavior {
                window,
                ..SessionBehavior::default()
            },
        );

        assert!(h.driver.start().unwrap().is_success());

        let log = h.log.lock().unwrap();
        assert_eq!(log.waits, expected_waits);
        assert_eq!(log.timestamps.len(), frames);
    }

    #[test]
    fn test_closed_session_with_frames_left_is_frame_failure() {
        let names = ids(4);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut h = harness(
            &refs,
            SessionBehavior {
                window: 1,
                close_after: Some(2),
                ..SessionBehavior::default()
            },
        );

        let error = build_error(h.driver.start().unwrap());

        assert!(matches!(
            error,
            BuildError::Frame {
                index: 2,
                error: FrameError::AppendRejected,
                ..
            }
        ));
        assert_eq!(h.log.lock().unwrap().finishes, 1);
    }

    #[test]
    fn test_rejected_append_is_frame_failure() {
        let names = ids(3);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut h = harness(
            &refs,
            SessionBehavior {
                reject_at: Some(1),
                ..SessionBehavior::default()
            },
        );

        let error = build_error(h.driver.start().unwrap());

        assert!(matches!(
            error,
            BuildError::Frame {
                index: 1,
                error: FrameError::AppendRejected,
                ..
            }
        ));
        assert_eq!(Harness::progress(&h.events()), vec![1]);
    }

    #[test]
    fn test_finish_failure_is_finalize_failure() {
        let mut h = harness(
            &["a.png", "b.png"],
            SessionBehavior {
                fail_finish: true,
                ..SessionBehavior::default()
            },
        );

        let error = build_error(h.driver.start().unwrap());

        assert_eq!(error.kind(), ErrorKind::FinalizeFailure);
        assert_eq!(Harness::progress(&h.events()), vec![1, 2]);
        assert_eq!(h.log.lock().unwrap().finishes, 1);
    }

    #[test]
    fn test_frame_failure_wins_over_finish_failure() {
        let mut h = harness(
            &["a.png", "bad.png"],
            SessionBehavior {
                fail_finish: true,
                ..SessionBehavior::default()
            },
        );

        let error = build_error(h.driver.start().unwrap());

        assert_eq!(error.kind(), ErrorKind::FrameFailure);
        let failures = h
            .events()
            .into_iter()
            .filter(BuildEvent::is_terminal)
            .count();
        assert_eq!(failures, 1);
    }

    #[test]
    fn test_encoder_failure_is_delivered_against_its_own_frame() {
        let names = ids(6);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut h = harness(
            &refs,
            SessionBehavior {
                window: 1,
                close_after: Some(3),
                encode_failure_at: Some(1),
                ..SessionBehavior::default()
            },
        );

        let error = build_error(h.driver.start().unwrap());

        match &error {
            BuildError::Frame {
                index,
                source_id,
                error: FrameError::EncodeFailed { .. },
            } => {
                assert_eq!(*index, 1);
                assert_eq!(source_id, "frame001.png");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let message = crate::pipeline::build_observer::error_chain(&error);
        assert!(message.starts_with("frame 1 (frame001.png)"), "{message}");
        assert!(message.ends_with("invalid data"), "{message}");

        let events = h.events();
        assert_eq!(Harness::progress(&events), vec![1, 2, 3]);
        assert_eq!(
            events.last(),
            Some(&BuildEvent::Failed {
                kind: ErrorKind::FrameFailure,
                message,
            })
        );
        assert_eq!(h.log.lock().unwrap().finishes, 1);
    }

    #[test]
    fn test_encoder_failure_on_last_frame_is_frame_failure() {
        let names = ids(4);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut h = harness(
            &refs,
            SessionBehavior {
                encode_failure_at: Some(3),
                ..SessionBehavior::default()
            },
        );

        let error = build_error(h.driver.start().unwrap());

        assert!(matches!(
            error,
            BuildError::Frame {
                index: 3,
                error: FrameError::EncodeFailed { .. },
                ..
            }
        ));
        assert_eq!(h.driver.state(), DriverState::Failed(ErrorKind::FrameFailure));
    }

    #[test]
    fn test_earlier_frame_failure_wins_over_later_encoder_failure() {
        let mut h = harness(
            &["a.png", "bad.png", "c.png", "d.png"],
            SessionBehavior {
                encode_failure_at: Some(3),
                ..SessionBehavior::default()
            },
        );

        let error = build_error(h.driver.start().unwrap());

        assert!(matches!(
            error,
            BuildError::Frame {
                index: 1,
                error: FrameError::DecodeFailed { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_cancellation_wins_over_encoder_failure() {
        let mut h = harness(
            &["a.png", "b.png"],
            SessionBehavior {
                encode_failure_at: Some(0),
                ..SessionBehavior::default()
            },
        );
        h.driver.cancelled.store(true, Ordering::SeqCst);

        let error = build_error(h.driver.start().unwrap());

        assert!(matches!(error, BuildError::Cancelled { completed: 0 }));
    }

    #[test]
    fn test_encoder_failure_outside_the_frame_list_is_finalize_failure() {
        let mut h = harness(
            &["a.png", "b.png"],
            SessionBehavior {
                encode_failure_at: Some(9),
                ..SessionBehavior::default()
            },
        );

        let error = build_error(h.driver.start().unwrap());

        assert!(matches!(
            error,
            BuildError::Finalize(FinalizeError::EncodeFailed { .. })
        ));
    }

    #[test]
    fn test_unavailable_sink_is_startup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = StubSink::new(SessionBehavior::default());
        sink.available = false;
        let log = sink.log.clone();
        let mut driver = PipelineDriver::new(
            BuildConfig::new(FrameSourceList::new(["a.png"]), dir.path().join("out.mp4")),
            Box::new(StubDecoder::new()),
            Box::new(sink),
            Box::new(crate::pipeline::build_observer::NullBuildObserver),
            Arc::new(AtomicBool::new(false)),
        );

        let error = build_error(driver.start().unwrap());

        assert!(matches!(
            error,
            BuildError::Startup(StartupError::WriterInitFailed { .. })
        ));
        assert!(log.lock().unwrap().settings.is_none());
    }

    #[test]
    fn test_second_start_is_rejected() {
        let mut h = harness(&["a.png"], SessionBehavior::default());
        assert!(h.driver.start().unwrap().is_success());
        let first_events = h.events();

        let again = h.driver.start();

        assert_eq!(
            again.unwrap_err(),
            AlreadyStarted {
                state: DriverState::Succeeded
            }
        );
        assert!(h.events().is_empty());
        assert_eq!(first_events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(h.log.lock().unwrap().finishes, 1);
    }

    #[test]
    fn test_cancel_before_start_still_finishes_session() {
        let mut h = harness(&["a.png", "b.png"], SessionBehavior::default());
        h.driver.cancelled.store(true, Ordering::SeqCst);

        let error = build_error(h.driver.start().unwrap());

        assert!(matches!(error, BuildError::Cancelled { completed: 0 }));
        let log = h.log.lock().unwrap();
        assert_eq!(log.finishes, 1);
        assert!(log.timestamps.is_empty());
    }

    #[test]
    fn test_cancel_mid_build_reports_completed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let names = ids(10);
        let flag = Arc::new(AtomicBool::new(false));
        let sink = StubSink::new(SessionBehavior::default());
        let log = sink.log.clone();
        let mut driver = PipelineDriver::new(
            BuildConfig::new(FrameSourceList::new(names), dir.path().join("out.mp4")),
            Box::new(StubDecoder::new()),
            Box::new(sink),
            Box::new(CancelAfter {
                flag: flag.clone(),
                after: 3,
            }),
            flag,
        );

        let error = build_error(driver.start().unwrap());

        assert!(matches!(error, BuildError::Cancelled { completed: 3 }));
        assert_eq!(driver.state(), DriverState::Failed(ErrorKind::Cancelled));
        let log = log.lock().unwrap();
        assert_eq!(log.timestamps.len(), 3);
        assert_eq!(log.finishes, 1);
    }

    #[test]
    fn test_existing_destination_is_removed() {
        let mut h = harness(&["a.png"], SessionBehavior::default());
        let destination = h.dir.path().join("out.mp4");
        std::fs::write(&destination, b"stale").unwrap();

        assert!(h.driver.start().unwrap().is_success());

        // The stub sink writes nothing, so the stale file must be gone.
        assert!(!destination.exists());
    }

    #[test]
    fn test_missing_destination_directory_is_startup_failure() {
        let mut h = harness_with(&["a.png"], SessionBehavior::default(), |mut c| {
            c.destination = PathBuf::from("/nonexistent/dir/out.mp4");
            c
        });

        let error = build_error(h.driver.start().unwrap());

        assert!(matches!(
            error,
            BuildError::Startup(StartupError::OutputPathInvalid { .. })
        ));
        assert!(h.log.lock().unwrap().settings.is_none());
    }

    #[test]
    fn test_destination_without_file_name_is_invalid() {
        assert!(matches!(
            prepare_destination(Path::new("/tmp/..")),
            Err(StartupError::OutputPathInvalid { .. })
        ));
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec!["bad.png", "b.png"])]
    fn test_startup_failure_never_enters_writing(#[case] sources: Vec<&'static str>) {
        let mut h = harness(&sources, SessionBehavior::default());

        assert!(!h.driver.start().unwrap().is_success());

        assert_eq!(
            h.driver.history,
            vec![DriverState::Failed(ErrorKind::StartupFailure)]
        );
    }

    #[test]
    fn test_invalid_destination_never_enters_writing() {
        let mut h = harness_with(&["a.png"], SessionBehavior::default(), |mut c| {
            c.destination = PathBuf::from("/nonexistent/dir/out.mp4");
            c
        });

        assert!(!h.driver.start().unwrap().is_success());

        assert_eq!(
            h.driver.history,
            vec![DriverState::Failed(ErrorKind::StartupFailure)]
        );
    }

    #[test]
    fn test_successful_build_passes_through_every_state() {
        let mut h = harness(
            &["a.png", "b.png", "c.png"],
            SessionBehavior {
                window: 2,
                ..SessionBehavior::default()
            },
        );

        assert!(h.driver.start().unwrap().is_success());

        let history = &h.driver.history;
        assert_eq!(history.first(), Some(&DriverState::Writing));
        assert!(history.contains(&DriverState::Draining));
        assert_eq!(
            &history[history.len() - 2..],
            &[DriverState::Finishing, DriverState::Succeeded]
        );
    }

    #[test]
    fn test_state_starts_idle() {
        let h = harness(&["a.png"], SessionBehavior::default());
        assert_eq!(h.driver.state(), DriverState::Idle);
        assert!(!DriverState::Idle.is_terminal());
        assert!(DriverState::Failed(ErrorKind::Cancelled).is_terminal());
    }
}
