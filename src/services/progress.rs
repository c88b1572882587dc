//! Progress reporting service
//!
//! This module separates progress reporting concerns from the request pipeline,
//! allowing different frontends (a dialog, a terminal, a test harness) to
//! implement their own status display.

/// Fixed checkpoints of one remote background removal call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Exporting the source drawable
    Preparing,
    /// Sending the staged image to the service
    Uploading,
    /// The model accepted the input and is running
    Processing,
    /// Fetching the result body
    Downloading,
    /// Result decoded
    Completed,
}

impl ProcessingStage {
    /// All checkpoints in the order they are reported
    pub const ALL: [ProcessingStage; 5] = [
        ProcessingStage::Preparing,
        ProcessingStage::Uploading,
        ProcessingStage::Processing,
        ProcessingStage::Downloading,
        ProcessingStage::Completed,
    ];

    /// Get a human-readable description of the stage
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            ProcessingStage::Preparing => "Preparing image for upload...",
            ProcessingStage::Uploading => "Uploading image to Replicate...",
            ProcessingStage::Processing => "Processing image...",
            ProcessingStage::Downloading => "Downloading result...",
            ProcessingStage::Completed => "Background removal complete!",
        }
    }

    /// Progress fraction reported at this checkpoint
    #[must_use]
    pub fn fraction(self) -> f32 {
        match self {
            ProcessingStage::Preparing => 0.1,
            ProcessingStage::Uploading => 0.3,
            ProcessingStage::Processing => 0.7,
            ProcessingStage::Downloading => 0.9,
            ProcessingStage::Completed => 1.0,
        }
    }
}

/// One status update for the foreground
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Status text
    pub message: String,
    /// Completed fraction in `[0, 1]`, `None` for an indeterminate update
    pub fraction: Option<f32>,
}

impl ProgressEvent {
    /// Event for a pipeline checkpoint
    #[must_use]
    pub fn stage(stage: ProcessingStage) -> Self {
        Self {
            message: stage.description().to_string(),
            fraction: Some(stage.fraction()),
        }
    }

    /// Status text without a fraction
    #[must_use]
    pub fn message<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            fraction: None,
        }
    }

    /// Status text with a fraction, clamped to `[0, 1]`
    #[must_use]
    pub fn with_fraction<S: Into<String>>(message: S, fraction: f32) -> Self {
        Self {
            message: message.into(),
            fraction: Some(fraction.clamp(0.0, 1.0)),
        }
    }
}

/// The narrow view of the dialog the orchestrator is allowed to touch
///
/// Implementations run on the interactive thread only; the orchestrator never
/// calls them from the worker.
pub trait DialogControls {
    /// Show a status message and, when present, a progress fraction
    fn update_status(&mut self, event: &ProgressEvent);

    /// Enable or disable the interactive controls while a request runs
    fn set_enabled(&mut self, enabled: bool);
}

/// Controls that discard every update
pub struct NoOpControls;

impl DialogControls for NoOpControls {
    fn update_status(&mut self, _event: &ProgressEvent) {}

    fn set_enabled(&mut self, _enabled: bool) {}
}

/// Controls that forward status updates to the tracing subscriber
pub struct LoggingControls {
    verbose: bool,
}

impl LoggingControls {
    /// Create logging controls
    ///
    /// # Arguments
    /// * `verbose` - Whether to also log enable/disable transitions
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl DialogControls for LoggingControls {
    fn update_status(&mut self, event: &ProgressEvent) {
        match event.fraction {
            Some(fraction) => {
                tracing::info!("[{:>3}%] {}", (fraction * 100.0).round() as u8, event.message);
            },
            None => tracing::info!("{}", event.message),
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        if self.verbose {
            tracing::debug!(enabled, "Dialog controls toggled");
        }
    }
}
