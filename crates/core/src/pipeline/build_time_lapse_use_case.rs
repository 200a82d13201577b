use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::encoding::domain::encoder_sink::EncoderSink;
use crate::imaging::domain::image_decoder::ImageDecoder;
use crate::shared::build_error::BoxError;
use crate::shared::build_outcome::BuildOutcome;
use crate::shared::constants::WORKER_THREAD_NAME;

use super::build_config::BuildConfig;
use super::build_observer::BuildObserver;
use super::pipeline_driver::PipelineDriver;

/// Builds one time-lapse video from an ordered list of still images.
///
/// Wires the decoder, encoder sink and observer into a `PipelineDriver`.
/// This is a single-use struct: `execute` consumes the driver, so calling
/// it twice fails.
pub struct BuildTimeLapseUseCase {
    driver: Option<PipelineDriver>,
    cancelled: Arc<AtomicBool>,
}

impl BuildTimeLapseUseCase {
    pub fn new(
        config: BuildConfig,
        decoder: Box<dyn ImageDecoder>,
        sink: Box<dyn EncoderSink>,
        observer: Box<dyn BuildObserver>,
        cancelled: Option<Arc<AtomicBool>>,
    ) -> Self {
        let cancelled = cancelled.unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
        Self {
            driver: Some(PipelineDriver::new(
                config,
                decoder,
                sink,
                observer,
                cancelled.clone(),
            )),
            cancelled,
        }
    }

    /// Flag that stops the build at the next frame boundary once set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Runs the build on the calling thread.
    pub fn execute(&mut self) -> Result<BuildOutcome, BoxError> {
        let mut driver = self.driver.take().ok_or("Build already executed")?;
        Ok(driver.start()?)
    }

    /// Runs the build on a dedicated worker thread.
    pub fn spawn(mut self) -> std::io::Result<BuildHandle> {
        let cancelled = self.cancelled.clone();
        let thread = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || self.execute())?;
        Ok(BuildHandle { cancelled, thread })
    }
}

/// A build running in the background.
pub struct BuildHandle {
    cancelled: Arc<AtomicBool>,
    thread: JoinHandle<Result<BuildOutcome, BoxError>>,
}

impl BuildHandle {
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn cancel(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }

    /// Waits for the worker thread and returns the build's outcome.
    pub fn join(self) -> Result<BuildOutcome, BoxError> {
        self.thread
            .join()
            .map_err(|_| -> BoxError { "build worker panicked".into() })?
    }
}
