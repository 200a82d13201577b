use std::path::Path;

use crate::shared::build_error::BuildError;
use crate::shared::progress::Progress;

use super::build_observer::BuildObserver;

/// Wraps an observer so that progress stays monotonic and the outcome is
/// delivered once.
pub struct ProgressReporter {
    observer: Box<dyn BuildObserver>,
    total: usize,
    completed: usize,
    delivered: bool,
}

impl ProgressReporter {
    pub fn new(observer: Box<dyn BuildObserver>, total: usize) -> Self {
        Self {
            observer,
            total,
            completed: 0,
            delivered: false,
        }
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Records one more appended frame. Ignored once the outcome is out.
    pub fn report_progress(&mut self) {
        if self.delivered || self.completed >= self.total {
            return;
        }
        self.completed += 1;
        self.observer
            .on_progress(Progress::new(self.completed, self.total));
    }

    pub fn deliver_success(&mut self, output: &Path) {
        if self.delivered {
            return;
        }
        self.delivered = true;
        self.observer.on_success(output);
    }

    pub fn deliver_failure(&mut self, error: &BuildError) {
        if self.delivered {
            return;
        }
        self.delivered = true;
        self.observer.on_failure(error.kind(), error);
    }
}
