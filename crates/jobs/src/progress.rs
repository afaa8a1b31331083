// crates/jobs/src/progress.rs
//! Stage-oriented progress accumulation.
//!
//! A [`ProgressTracker`] is a pure accumulator over `stage/current/total`:
//! every mutation re-emits the full [`Progress`] snapshot to the registered
//! sink, and the sink (a job context, a console logger, ...) decides how to
//! surface it. The tracker holds no reference to any registry.

use crate::error::JobError;
use crate::types::Progress;

/// Receives every snapshot a tracker emits. Returning an error aborts the
/// emitting body; the runner's sink uses this to propagate cancellation.
pub type ProgressSink<'a> = dyn Fn(Progress) -> Result<(), JobError> + Send + Sync + 'a;

pub struct ProgressTracker<'a> {
    sink: Box<ProgressSink<'a>>,
    stage: String,
    current: u64,
    total: u64,
    message: String,
}

impl<'a> ProgressTracker<'a> {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(Progress) -> Result<(), JobError> + Send + Sync + 'a,
    {
        Self {
            sink: Box::new(sink),
            stage: String::new(),
            current: 0,
            total: 0,
            message: String::new(),
        }
    }

    /// Begin a new stage: resets `current` to zero and emits.
    pub fn start_stage(&mut self, stage: impl Into<String>, total: u64) -> Result<(), JobError> {
        self.stage = stage.into();
        self.current = 0;
        self.total = total;
        self.message.clear();
        self.emit()
    }

    /// One unit of work done; optionally records what it was.
    pub fn update_progress(&mut self, item: Option<&str>) -> Result<(), JobError> {
        self.current += 1;
        if let Some(item) = item {
            self.message = item.to_string();
        }
        self.emit()
    }

    /// Absolute counts, for sub-components whose unit of work differs from
    /// the parent stage's (e.g. the refetcher reporting per instrument).
    pub fn set_progress(
        &mut self,
        current: u64,
        total: u64,
        item: Option<&str>,
    ) -> Result<(), JobError> {
        self.current = current;
        self.total = total;
        if let Some(item) = item {
            self.message = item.to_string();
        }
        self.emit()
    }

    /// Current snapshot without emitting.
    pub fn snapshot(&self) -> Progress {
        Progress::new(
            self.stage.clone(),
            self.current,
            self.total,
            self.message.clone(),
        )
    }

    fn emit(&self) -> Result<(), JobError> {
        (self.sink)(self.snapshot())
    }
}
