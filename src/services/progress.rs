use serde::Serialize;

/// One progress update: which stage, how far along, and a display label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub stage: String,

    /// Completion in `[0.0, 1.0]`
    pub fraction: f32,

    pub label: String,
}

impl ProgressEvent {
    pub fn new(stage: impl Into<String>, fraction: f32, label: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            fraction: fraction.clamp(0.0, 1.0),
            label: label.into(),
        }
    }
}

/// Sink for progress events emitted by the pipeline.
///
/// Implementations must be cheap and non-blocking; they are called from
/// replication tasks once per copied file.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Reporter that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {}
}

/// Format `current/total` with both counters zero-padded to the digit count of `total`.
pub fn counter_label(current: usize, total: usize) -> String {
    let width = total.to_string().len();
    format!("{:0width$}/{:0width$}", current, total, width = width)
}
