//! Worker orchestration
//!
//! [`RemovalOrchestrator`] runs one remote removal per request on a dedicated
//! worker thread and delivers every UI-visible effect back on the interactive
//! thread. The worker posts [`WorkerEvent`]s into a channel; the interactive
//! thread drains it with [`RemovalOrchestrator::dispatch_pending`] from its
//! event loop (or [`RemovalOrchestrator::dispatch_blocking`] when it has
//! nothing else to do).
//!
//! Lifecycle per request: `Idle -> Processing -> {Succeeded, Failed, Cancelled} -> Idle`.
//! Cancellation is cooperative and is observed at the client's checkpoints.
//! A result that arrives after cancellation was requested is discarded.

use crate::client::RemoteInferenceClient;
use crate::config::ClientConfig;
use crate::editor::{DocumentId, Drawable, Editor};
use crate::error::RemovalError;
use crate::models::ModelKey;
use crate::reconcile::{reconcile, result_layer_name, OutputTarget, ReconciledOutput};
use crate::services::{DialogControls, ProgressEvent};
use crate::settings::OutputMode;
use crate::tracing_config::spans;
use crate::transport::InferenceTransport;
use image::DynamicImage;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Name of the per-request worker thread
pub const WORKER_THREAD_NAME: &str = "bgremove-worker";

/// Status text posted when cancellation is requested
pub const CANCELLING_MESSAGE: &str = "Cancelling...";

/// Processing flags shared between the interactive thread and the worker
#[derive(Debug, Default)]
pub struct ProcessingState {
    processing: AtomicBool,
    cancel_requested: AtomicBool,
}

impl ProcessingState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Enter `Processing`; `false` when a request is already running
    fn begin(&self) -> bool {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.cancel_requested.store(false, Ordering::SeqCst);
        true
    }

    /// Flag cancellation; `false` when nothing is running
    fn request_cancel(&self) -> bool {
        if !self.is_processing() {
            return false;
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
        true
    }

    /// Return to `Idle`
    fn finish(&self) {
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.processing.store(false, Ordering::SeqCst);
    }
}

/// Terminal value of one worker run
#[derive(Debug)]
pub enum InferenceResult {
    Success(DynamicImage),
    Failure(String),
    Cancelled,
}

/// Message posted from the worker to the interactive thread
#[derive(Debug)]
pub enum WorkerEvent {
    Progress(ProgressEvent),
    /// Always the last event of a request
    Finished(InferenceResult),
}

/// Parameters of one removal request
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub api_key: String,
    pub output_mode: OutputMode,
    pub model_key: ModelKey,
}

/// Whether [`RemovalOrchestrator::start`] launched a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A request is already running; nothing changed
    AlreadyProcessing,
    /// No source drawable is bound; nothing changed
    NoSource,
    /// The worker could not be launched; controls are enabled again
    SpawnFailed(String),
}

/// Terminal state of a request as seen by the interactive thread
#[derive(Debug, Clone, PartialEq)]
pub enum RemovalOutcome {
    Succeeded {
        message: String,
        output: ReconciledOutput,
    },
    Failed {
        message: String,
    },
    Cancelled,
}

impl RemovalOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// The drawable a dialog instance operates on
#[derive(Clone)]
pub struct SourceBinding {
    pub drawable: Arc<dyn Drawable>,
    /// Document the drawable belongs to, target of layer-mode results
    pub document: Option<DocumentId>,
}

impl std::fmt::Debug for SourceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBinding")
            .field("drawable", &self.drawable.name())
            .field("document", &self.document)
            .finish()
    }
}

/// How the worker reaches the inference service
#[derive(Clone)]
pub enum Backend {
    /// Replicate HTTP API
    Replicate(ClientConfig),
    /// Caller-supplied transport
    Custom {
        transport: Arc<dyn InferenceTransport>,
        request_timeout: Duration,
    },
}

impl Backend {
    fn build_client(&self, api_key: &str) -> crate::Result<RemoteInferenceClient> {
        match self {
            Backend::Replicate(config) => RemoteInferenceClient::replicate(api_key, config),
            Backend::Custom {
                transport,
                request_timeout,
            } => Ok(RemoteInferenceClient::new(api_key, Arc::clone(transport))?
                .with_request_timeout(*request_timeout)),
        }
    }
}

struct ActiveRequest {
    events: mpsc::Receiver<WorkerEvent>,
    target: OutputTarget,
    worker: thread::JoinHandle<()>,
}

/// Runs background removals for one dialog instance
pub struct RemovalOrchestrator {
    state: Arc<ProcessingState>,
    source: Option<SourceBinding>,
    controls: Box<dyn DialogControls>,
    backend: Backend,
    staging_dir: Option<PathBuf>,
    active: Option<ActiveRequest>,
}

impl RemovalOrchestrator {
    /// Create an orchestrator using the Replicate API
    #[must_use]
    pub fn new(source: Option<SourceBinding>, controls: Box<dyn DialogControls>, config: ClientConfig) -> Self {
        Self::with_backend(source, controls, Backend::Replicate(config))
    }

    /// Create an orchestrator with an explicit backend
    #[must_use]
    pub fn with_backend(
        source: Option<SourceBinding>,
        controls: Box<dyn DialogControls>,
        backend: Backend,
    ) -> Self {
        Self {
            state: Arc::new(ProcessingState::new()),
            source,
            controls,
            backend,
            staging_dir: None,
            active: None,
        }
    }

    /// Stage uploads in `dir` instead of the system temp directory
    #[must_use]
    pub fn with_staging_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.state.is_processing()
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.state.is_cancel_requested()
    }

    #[must_use]
    pub fn source(&self) -> Option<&SourceBinding> {
        self.source.as_ref()
    }

    /// Post a status update to the controls
    pub fn update_status(&mut self, event: &ProgressEvent) {
        self.controls.update_status(event);
    }

    /// Start a removal on a new worker thread
    ///
    /// Controls are disabled before the worker starts. Rejected without any
    /// effect while a request is running or when no drawable is bound.
    pub fn start(&mut self, request: StartRequest) -> StartOutcome {
        if self.state.is_processing() {
            tracing::debug!("Start ignored, a request is already running");
            return StartOutcome::AlreadyProcessing;
        }
        let Some(source) = self.source.clone() else {
            tracing::debug!("Start ignored, no source drawable");
            return StartOutcome::NoSource;
        };
        if !self.state.begin() {
            return StartOutcome::AlreadyProcessing;
        }

        self.controls.set_enabled(false);

        let (tx, rx) = mpsc::channel();
        let target = OutputTarget::from(request.output_mode);
        let job = WorkerJob {
            request,
            drawable: Arc::clone(&source.drawable),
            backend: self.backend.clone(),
            staging_dir: self.staging_dir.clone(),
            state: Arc::clone(&self.state),
            events: tx,
        };

        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || job.run());

        match spawned {
            Ok(worker) => {
                tracing::info!(drawable = %source.drawable.name(), target = ?target, "Background removal started");
                self.active = Some(ActiveRequest {
                    events: rx,
                    target,
                    worker,
                });
                StartOutcome::Started
            },
            Err(e) => {
                let message = RemovalError::unexpected(format!("Failed to start worker thread: {}", e)).to_string();
                tracing::error!(error = %e, "Failed to spawn worker thread");
                self.state.finish();
                self.controls.set_enabled(true);
                self.controls.update_status(&ProgressEvent::message(message.clone()));
                StartOutcome::SpawnFailed(message)
            },
        }
    }

    /// Request cooperative cancellation of the running request
    ///
    /// Returns `false` when nothing is running.
    pub fn cancel(&mut self) -> bool {
        if !self.state.request_cancel() {
            return false;
        }
        tracing::info!("Cancellation requested");
        self.controls
            .update_status(&ProgressEvent::message(CANCELLING_MESSAGE));
        true
    }

    /// Deliver every event the worker has posted so far
    ///
    /// Returns the terminal outcome once the worker has finished.
    pub fn dispatch_pending(&mut self, editor: &mut dyn Editor) -> Option<RemovalOutcome> {
        loop {
            let received = match &self.active {
                Some(active) => active.events.try_recv(),
                None => return None,
            };
            match received {
                Ok(WorkerEvent::Progress(event)) => self.controls.update_status(&event),
                Ok(WorkerEvent::Finished(result)) => return Some(self.complete(result, editor)),
                Err(mpsc::TryRecvError::Empty) => return None,
                Err(mpsc::TryRecvError::Disconnected) => {
                    return Some(self.complete(worker_vanished(), editor))
                },
            }
        }
    }

    /// Block until the running request finishes, delivering events as they arrive
    ///
    /// Returns `None` when nothing is running.
    pub fn dispatch_blocking(&mut self, editor: &mut dyn Editor) -> Option<RemovalOutcome> {
        loop {
            let received = match &self.active {
                Some(active) => active.events.recv(),
                None => return None,
            };
            match received {
                Ok(WorkerEvent::Progress(event)) => self.controls.update_status(&event),
                Ok(WorkerEvent::Finished(result)) => return Some(self.complete(result, editor)),
                Err(mpsc::RecvError) => return Some(self.complete(worker_vanished(), editor)),
            }
        }
    }

    fn complete(&mut self, result: InferenceResult, editor: &mut dyn Editor) -> RemovalOutcome {
        let Some(active) = self.active.take() else {
            return RemovalOutcome::Failed {
                message: RemovalError::unexpected("No active request").to_string(),
            };
        };
        if active.worker.join().is_err() {
            tracing::warn!("Worker thread panicked after posting its result");
        }

        let outcome = if self.state.is_cancel_requested() {
            if matches!(result, InferenceResult::Success(_)) {
                tracing::info!("Discarding result that arrived after cancellation");
            }
            RemovalOutcome::Cancelled
        } else {
            match result {
                InferenceResult::Success(image) => self.apply_result(&image, active.target, editor),
                InferenceResult::Failure(message) => RemovalOutcome::Failed { message },
                InferenceResult::Cancelled => RemovalOutcome::Cancelled,
            }
        };

        match &outcome {
            RemovalOutcome::Succeeded { message, .. } => {
                self.controls
                    .update_status(&ProgressEvent::with_fraction(message.clone(), 1.0));
            },
            RemovalOutcome::Failed { message } => {
                tracing::warn!(error = %message, "Background removal failed");
                self.controls.update_status(&ProgressEvent::message(message.clone()));
            },
            RemovalOutcome::Cancelled => {
                self.controls
                    .update_status(&ProgressEvent::message(RemovalError::Cancelled.to_string()));
            },
        }

        self.state.finish();
        self.controls.set_enabled(true);
        outcome
    }

    fn apply_result(
        &mut self,
        image: &DynamicImage,
        target: OutputTarget,
        editor: &mut dyn Editor,
    ) -> RemovalOutcome {
        let (status, success) = match target {
            OutputTarget::NewStandaloneImage => (
                "Creating new image file...",
                "New image created with background removed!",
            ),
            OutputTarget::NewLayerInCurrentImage => (
                "Creating new layer...",
                "New layer created with background removed!",
            ),
        };
        self.controls.update_status(&ProgressEvent::message(status));

        let (layer_name, document) = match &self.source {
            Some(source) => (result_layer_name(source.drawable.name()), source.document),
            None => (result_layer_name(""), None),
        };

        match reconcile(editor, image, target, document, &layer_name) {
            Ok(output) => RemovalOutcome::Succeeded {
                message: success.to_string(),
                output,
            },
            Err(e) => RemovalOutcome::Failed {
                message: e.to_string(),
            },
        }
    }
}

impl Drop for RemovalOrchestrator {
    fn drop(&mut self) {
        // Let a running worker stop at its next checkpoint
        if self.active.is_some() {
            self.state.request_cancel();
        }
    }
}

fn worker_vanished() -> InferenceResult {
    InferenceResult::Failure(
        RemovalError::unexpected("Worker stopped without reporting a result").to_string(),
    )
}

/// Everything one worker run owns
struct WorkerJob {
    request: StartRequest,
    drawable: Arc<dyn Drawable>,
    backend: Backend,
    staging_dir: Option<PathBuf>,
    state: Arc<ProcessingState>,
    events: mpsc::Sender<WorkerEvent>,
}

impl WorkerJob {
    fn run(self) {
        let span = spans::worker(self.request.model_key.key());
        let _guard = span.enter();

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute()))
            .unwrap_or_else(|payload| {
                let detail = panic_message(payload.as_ref());
                tracing::error!(panic = %detail, "Worker panicked");
                InferenceResult::Failure(RemovalError::unexpected(detail).to_string())
            });

        // The receiver is gone only when the orchestrator was dropped
        let _ = self.events.send(WorkerEvent::Finished(result));
    }

    fn post(&self, event: ProgressEvent) {
        let _ = self.events.send(WorkerEvent::Progress(event));
    }

    fn execute(&self) -> InferenceResult {
        if self.state.is_cancel_requested() {
            return InferenceResult::Cancelled;
        }

        let client = match self.backend.build_client(&self.request.api_key) {
            Ok(client) => client,
            Err(e) => return InferenceResult::Failure(e.to_string()),
        };
        let client = match &self.staging_dir {
            Some(dir) => client.with_staging_dir(dir),
            None => client,
        };

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                return InferenceResult::Failure(
                    RemovalError::unexpected(format!("Failed to start async runtime: {}", e))
                        .to_string(),
                )
            },
        };

        let model = self.request.model_key.model_identifier();
        let mut on_progress = |event: &ProgressEvent| {
            if self.state.is_cancel_requested() {
                return false;
            }
            self.post(event.clone());
            true
        };

        let outcome = runtime.block_on(client.remove_background(
            self.drawable.as_ref(),
            &model,
            &mut on_progress,
        ));

        match outcome {
            Ok(image) if !self.state.is_cancel_requested() => InferenceResult::Success(image),
            Ok(_) => InferenceResult::Cancelled,
            Err(e) if e.is_cancelled() || self.state.is_cancel_requested() => {
                InferenceResult::Cancelled
            },
            Err(e) => InferenceResult::Failure(e.to_string()),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
