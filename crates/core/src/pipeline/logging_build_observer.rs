use std::path::Path;
use std::time::Instant;

use crate::shared::build_error::{BuildError, ErrorKind};
use crate::shared::progress::Progress;

use super::build_observer::{error_chain, BuildObserver};

/// Observer that reports a build through the `log` facade.
///
/// Progress output is throttled to every `throttle_frames` frames
/// to keep long sequences from flooding the log.
pub struct LoggingBuildObserver {
    throttle_frames: usize,
    start_time: Instant,
    completed: usize,
    total: usize,
    outcome: Option<String>,
}

impl LoggingBuildObserver {
    pub fn new(throttle_frames: usize) -> Self {
        Self {
            throttle_frames: throttle_frames.max(1),
            start_time: Instant::now(),
            completed: 0,
            total: 0,
            outcome: None,
        }
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Returns the formatted summary, or `None` before the build ends.
    pub fn summary_string(&self) -> Option<String> {
        let outcome = self.outcome.as_ref()?;
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let frames = self.completed;

        let mut lines = vec![format!(
            "Build summary ({frames}/{} frames, {elapsed:.1}s total): {outcome}",
            self.total
        )];
        if frames > 0 && elapsed > 0.0 {
            let fps = frames as f64 / elapsed;
            lines.push(format!("  Throughput: {fps:.1} fps"));
        }
        Some(lines.join("\n"))
    }

    fn log_summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("{text}");
        }
    }
}

impl Default for LoggingBuildObserver {
    fn default() -> Self {
        Self::new(10)
    }
}

impl BuildObserver for LoggingBuildObserver {
    fn on_progress(&mut self, progress: Progress) {
        self.completed = progress.completed;
        self.total = progress.total;
        if progress.completed % self.throttle_frames == 0 || progress.is_finished() {
            log::info!(
                "Encoding: {}/{} frames ({:.1}%)",
                progress.completed,
                progress.total,
                progress.fraction() * 100.0
            );
        }
    }

    fn on_success(&mut self, output: &Path) {
        self.outcome = Some(format!("written to {}", output.display()));
        self.log_summary();
    }

    fn on_failure(&mut self, kind: ErrorKind, error: &BuildError) {
        log::error!("Build failed ({kind}): {}", error_chain(error));
        self.outcome = Some(kind.to_string());
        self.log_summary();
    }
}
