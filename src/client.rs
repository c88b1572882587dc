//! Remote inference client
//!
//! [`RemoteInferenceClient::remove_background`] performs one complete remote
//! call: export the drawable, stage it, invoke the model, collect the streamed
//! output and decode it. Progress is reported at five fixed checkpoints; the
//! progress callback returning `false` aborts the call at that checkpoint.

use crate::config::ClientConfig;
use crate::editor::Drawable;
use crate::error::{RemovalError, Result};
use crate::models::ModelIdentifier;
use crate::services::{ProcessingStage, ProgressEvent, StagedImage};
use crate::tracing_config::{events, spans};
use crate::transport::{ApiKey, InferenceRequest, InferenceTransport};
use image::DynamicImage;
use instant::Instant;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{timeout_at, Instant as Deadline};
use tracing::Instrument;

/// Client for one credential and one transport
pub struct RemoteInferenceClient {
    api_key: ApiKey,
    transport: Arc<dyn InferenceTransport>,
    request_timeout: std::time::Duration,
    staging_dir: Option<PathBuf>,
}

impl std::fmt::Debug for RemoteInferenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteInferenceClient")
            .field("api_key", &self.api_key)
            .field("transport", &self.transport.name())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl RemoteInferenceClient {
    /// Create a client over an arbitrary transport
    ///
    /// # Errors
    /// - Blank API key ("API key is required")
    pub fn new(api_key: &str, transport: Arc<dyn InferenceTransport>) -> Result<Self> {
        Ok(Self {
            api_key: ApiKey::new(api_key)?,
            transport,
            request_timeout: crate::config::DEFAULT_REQUEST_TIMEOUT,
            staging_dir: None,
        })
    }

    /// Create a client talking to the Replicate API
    ///
    /// # Errors
    /// - Blank API key
    /// - Invalid configuration or HTTP client setup failure
    #[cfg(feature = "replicate")]
    pub fn replicate(api_key: &str, config: &ClientConfig) -> Result<Self> {
        let api_key = ApiKey::new(api_key)?;
        let transport = crate::replicate::ReplicateTransport::new(config.clone())?;
        Ok(Self {
            api_key,
            transport: Arc::new(transport),
            request_timeout: config.request_timeout,
            staging_dir: None,
        })
    }

    /// Create a client talking to the Replicate API
    ///
    /// # Errors
    /// - Always: this build has no HTTP transport
    #[cfg(not(feature = "replicate"))]
    pub fn replicate(api_key: &str, _config: &ClientConfig) -> Result<Self> {
        ApiKey::new(api_key)?;
        Err(RemovalError::configuration(
            "Replicate transport not available. Rebuild with the 'replicate' feature enabled.",
        ))
    }

    /// Bound the whole remote call, upload through download
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Stage uploads in `dir` instead of the system temp directory
    #[must_use]
    pub fn with_staging_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn request_timeout(&self) -> std::time::Duration {
        self.request_timeout
    }

    /// Remove the background of `drawable` with `model`
    ///
    /// `on_progress` is called at each checkpoint; returning `false` requests
    /// cancellation and the call returns [`RemovalError::Cancelled`] without
    /// doing further work. The staging file is removed on every exit path.
    ///
    /// # Errors
    /// - [`RemovalError::Cancelled`] when a checkpoint observed cancellation
    /// - [`RemovalError::Export`] when the drawable exports no bytes
    /// - [`RemovalError::Model`], [`RemovalError::Service`] or
    ///   [`RemovalError::Transport`] when the remote call fails
    /// - [`RemovalError::Timeout`] when the call exceeds the request timeout
    /// - [`RemovalError::NoOutput`] or [`RemovalError::NoImageData`] on an empty result
    /// - [`RemovalError::Decode`] when the result is not an image
    /// - [`RemovalError::Unexpected`] for anything else
    pub async fn remove_background(
        &self,
        drawable: &dyn Drawable,
        model: &ModelIdentifier,
        on_progress: &mut dyn FnMut(&ProgressEvent) -> bool,
    ) -> Result<DynamicImage> {
        let start = Instant::now();
        let span = spans::request(drawable.name(), &model.to_string(), self.transport.name());

        let result = self
            .run_checkpoints(drawable, model, on_progress)
            .instrument(span.clone())
            .await;
        let _guard = span.enter();
        match &result {
            Ok(image) => {
                tracing::info!(
                    width = image.width(),
                    height = image.height(),
                    "Background removal completed"
                );
                events::performance_metric("remove_background", start.elapsed().as_millis() as u64);
            },
            Err(RemovalError::Cancelled) => tracing::info!("Background removal cancelled"),
            Err(e) => tracing::warn!(error = %e, "Background removal failed"),
        }
        result.map_err(RemovalError::into_request_error)
    }

    async fn run_checkpoints(
        &self,
        drawable: &dyn Drawable,
        model: &ModelIdentifier,
        on_progress: &mut dyn FnMut(&ProgressEvent) -> bool,
    ) -> Result<DynamicImage> {
        checkpoint(on_progress, ProcessingStage::Preparing)?;

        let image_bytes = drawable
            .export_png()
            .map_err(|e| RemovalError::export(e.to_string()))?;
        if image_bytes.is_empty() {
            return Err(RemovalError::export("drawable exported no bytes"));
        }

        let mut staged = match &self.staging_dir {
            Some(dir) => StagedImage::write_in(dir, &image_bytes)?,
            None => StagedImage::write(&image_bytes)?,
        };
        drop(image_bytes);

        checkpoint(on_progress, ProcessingStage::Uploading)?;

        let request = InferenceRequest {
            source_image_bytes: staged.read()?,
            model: model.clone(),
            api_key: self.api_key.clone(),
        };

        let deadline = Deadline::now() + self.request_timeout;
        let output = timeout_at(deadline, self.transport.run(&request))
            .await
            .map_err(|_| RemovalError::Timeout(self.request_timeout))??;
        drop(request);

        checkpoint(on_progress, ProcessingStage::Processing)?;

        let output = output.ok_or(RemovalError::NoOutput)?;

        checkpoint(on_progress, ProcessingStage::Downloading)?;

        let result_bytes = timeout_at(deadline, output.collect_bytes())
            .await
            .map_err(|_| RemovalError::Timeout(self.request_timeout))??;
        if result_bytes.is_empty() {
            return Err(RemovalError::NoImageData);
        }
        tracing::debug!(bytes = result_bytes.len(), "Received result image");

        let image = image::load_from_memory(&result_bytes).map_err(RemovalError::Decode)?;

        // Completion is reported but cannot cancel a finished result
        on_progress(&ProgressEvent::stage(ProcessingStage::Completed));
        drop(staged);

        Ok(image)
    }
}

fn checkpoint(
    on_progress: &mut dyn FnMut(&ProgressEvent) -> bool,
    stage: ProcessingStage,
) -> Result<()> {
    if on_progress(&ProgressEvent::stage(stage)) {
        Ok(())
    } else {
        tracing::debug!(stage = ?stage, "Cancellation observed at checkpoint");
        Err(RemovalError::Cancelled)
    }
}
