use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, Sender};

use crate::shared::build_error::{BuildError, ErrorKind};
use crate::shared::progress::Progress;

/// Receives the progress and terminal outcome of one build.
///
/// Every callback runs on the build's worker thread. Observers that need
/// to act elsewhere (a UI thread, say) must hand the event over themselves;
/// [`ChannelBuildObserver`] does exactly that.
pub trait BuildObserver: Send {
    /// One more frame was appended. `completed` increases by one per call.
    fn on_progress(&mut self, progress: Progress);

    /// The build finished and the video is at `output`.
    fn on_success(&mut self, output: &Path);

    /// The build failed. Called at most once, and never together with `on_success`.
    fn on_failure(&mut self, kind: ErrorKind, error: &BuildError);
}

/// Observer that discards every event.
pub struct NullBuildObserver;

impl BuildObserver for NullBuildObserver {
    fn on_progress(&mut self, _progress: Progress) {}
    fn on_success(&mut self, _output: &Path) {}
    fn on_failure(&mut self, _kind: ErrorKind, _error: &BuildError) {}
}

/// Owned form of an observer callback.
#[derive(Clone, Debug, PartialEq)]
pub enum BuildEvent {
    Progress(Progress),
    Succeeded(PathBuf),
    Failed { kind: ErrorKind, message: String },
}

impl BuildEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BuildEvent::Progress(_))
    }
}

/// Forwards events over a channel so another thread can drain them.
pub struct ChannelBuildObserver {
    tx: Sender<BuildEvent>,
}

impl ChannelBuildObserver {
    pub fn new() -> (Self, Receiver<BuildEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl BuildObserver for ChannelBuildObserver {
    fn on_progress(&mut self, progress: Progress) {
        let _ = self.tx.send(BuildEvent::Progress(progress));
    }

    fn on_success(&mut self, output: &Path) {
        let _ = self.tx.send(BuildEvent::Succeeded(output.to_path_buf()));
    }

    fn on_failure(&mut self, kind: ErrorKind, error: &BuildError) {
        let _ = self.tx.send(BuildEvent::Failed {
            kind,
            message: error_chain(error),
        });
    }
}

/// Fans every callback out to several observers, in the order they were added.
#[derive(Default)]
pub struct CompositeBuildObserver {
    observers: Vec<Box<dyn BuildObserver>>,
}

impl CompositeBuildObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Box<dyn BuildObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl BuildObserver for CompositeBuildObserver {
    fn on_progress(&mut self, progress: Progress) {
        for observer in &mut self.observers {
            observer.on_progress(progress);
        }
    }

    fn on_success(&mut self, output: &Path) {
        for observer in &mut self.observers {
            observer.on_success(output);
        }
    }

    fn on_failure(&mut self, kind: ErrorKind, error: &BuildError) {
        for observer in &mut self.observers {
            observer.on_failure(kind, error);
        }
    }
}

/// Renders an error and all of its sources as `outer: inner: innermost`.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
