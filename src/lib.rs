#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Dream Background Remover
//!
//! Background removal for raster image editors, delegated to hosted models on
//! [Replicate](https://replicate.com). The library covers the full path of one
//! removal request inside a plugin host:
//!
//! - **Inference client**: exports the selected drawable, stages it, runs a
//!   prediction and decodes the streamed result, with cooperative
//!   cancellation at fixed checkpoints
//! - **Orchestrator**: runs the request on a worker thread, marshals progress
//!   back to the host's event loop and owns the single-flight processing guard
//! - **Reconciler**: inserts the result as a new layer (resampled to the
//!   canvas) or as a new standalone image
//! - **Dialog session**: headless dialog state, invocation validation and
//!   persisted settings
//!
//! The editor is abstracted behind the [`Editor`] and [`Drawable`] traits;
//! [`MemoryEditor`] is an in-memory implementation used by the CLI and tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dream_bgremove::{
//!     Backend, ClientConfig, MemoryEditor, OutputMode, RemovalDialog,
//!     RemovalOutcome, SettingsStore, LoggingControls, validate_invocation,
//! };
//!
//! # fn example() -> anyhow::Result<()> {
//! let image = image::open("photo.jpg")?;
//! let mut editor = MemoryEditor::new();
//! let (document, layer) = editor.open_image("photo", &image)?;
//! let drawable = editor.drawable(document, layer)?;
//! let source = validate_invocation(Some(document), &[drawable])
//!     .map_err(|status| anyhow::anyhow!("{:?}", status))?;
//!
//! let mut dialog = RemovalDialog::open(
//!     SettingsStore::new()?,
//!     Some(source),
//!     Box::new(LoggingControls::new(false)),
//!     Backend::Replicate(ClientConfig::from_env()?),
//! );
//! dialog.set_api_key("r8_...");
//! dialog.set_mode(OutputMode::Layer);
//! dialog.remove_background()?;
//!
//! if let Some(RemovalOutcome::Succeeded { message, .. }) = dialog.wait(&mut editor) {
//!     println!("{}", message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `replicate` (default): HTTP transport for the Replicate prediction API
//! - `cli` (default): command-line host with progress bar and structured logging
//!
//! Without `replicate`, plug in any [`InferenceTransport`] through
//! [`Backend::Custom`].

pub mod client;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod editor;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod reconcile;
#[cfg(feature = "replicate")]
pub mod replicate;
pub mod services;
pub mod session;
pub mod settings;
pub mod tracing_config;
pub mod transport;

// Public API exports
pub use client::RemoteInferenceClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use editor::{
    encode_png, Document, DocumentId, Drawable, Editor, Layer, LayerId, LayerSnapshot,
    MemoryEditor,
};
pub use error::{RemovalError, Result};
pub use models::{ModelIdentifier, ModelKey};
pub use orchestrator::{
    Backend, InferenceResult, ProcessingState, RemovalOrchestrator, RemovalOutcome,
    SourceBinding, StartOutcome, StartRequest, WorkerEvent,
};
pub use reconcile::{reconcile, OutputTarget, ReconciledOutput};
#[cfg(feature = "replicate")]
pub use replicate::ReplicateTransport;
pub use services::{
    DialogControls, LoggingControls, NoOpControls, ProcessingStage, ProgressEvent, StagedImage,
};
pub use session::{validate_invocation, CancelAction, DialogForm, PluginStatus, RemovalDialog};
pub use settings::{OutputMode, Settings, SettingsStore};
pub use tracing_config::{events, spans, TracingConfig, TracingFormat};
#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
pub use transport::{ApiKey, InferenceRequest, InferenceTransport, PredictionOutput};
