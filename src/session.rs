//! Plugin entry and dialog session
//!
//! Everything the removal dialog does apart from drawing widgets: invocation
//! checks, form state backed by the settings file, label texts, start and
//! cancel handling and the status reported back to the host.

use crate::editor::{DocumentId, Drawable, Editor};
use crate::error::{RemovalError, Result};
use crate::models::ModelKey;
use crate::orchestrator::{
    Backend, RemovalOrchestrator, RemovalOutcome, SourceBinding, StartOutcome, StartRequest,
};
use crate::services::{DialogControls, ProgressEvent};
use crate::settings::{OutputMode, Settings, SettingsStore};
use std::path::PathBuf;
use std::sync::Arc;

pub const NO_IMAGE_MESSAGE: &str = "No image available. Please open an image first.";
pub const NO_LAYER_MESSAGE: &str = "No layer selected. Please select a layer to process.";
pub const INVALID_DIMENSIONS_MESSAGE: &str =
    "Invalid layer dimensions. Please select a valid layer.";
pub const MISSING_API_KEY_MESSAGE: &str = "Please enter your Replicate API key";

/// Status returned to the host editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginStatus {
    Success,
    Cancel,
    ExecutionError(String),
}

/// Check the host's invocation arguments and bind the first drawable
///
/// # Errors
/// - [`PluginStatus::ExecutionError`] when no document is open, no drawable
///   is selected or the first drawable has a zero dimension
pub fn validate_invocation(
    document: Option<DocumentId>,
    drawables: &[Arc<dyn Drawable>],
) -> std::result::Result<SourceBinding, PluginStatus> {
    let Some(document) = document else {
        return Err(PluginStatus::ExecutionError(NO_IMAGE_MESSAGE.to_string()));
    };
    let Some(drawable) = drawables.first() else {
        return Err(PluginStatus::ExecutionError(NO_LAYER_MESSAGE.to_string()));
    };
    if drawable.width() == 0 || drawable.height() == 0 {
        return Err(PluginStatus::ExecutionError(
            INVALID_DIMENSIONS_MESSAGE.to_string(),
        ));
    }

    Ok(SourceBinding {
        drawable: Arc::clone(drawable),
        document: Some(document),
    })
}

/// What pressing the dialog's cancel button did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAction {
    /// A request was running and was asked to stop
    CancellingRequest,
    /// Nothing was running; the dialog closed
    Closed,
}

/// Current values of the dialog's inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogForm {
    pub api_key: String,
    pub mode: OutputMode,
    pub api_key_visible: bool,
    pub model: ModelKey,
}

impl From<Settings> for DialogForm {
    fn from(settings: Settings) -> Self {
        Self {
            api_key: settings.api_key,
            mode: settings.mode,
            api_key_visible: settings.api_key_visible,
            model: settings.model,
        }
    }
}

/// Headless background removal dialog
pub struct RemovalDialog {
    store: SettingsStore,
    form: DialogForm,
    orchestrator: RemovalOrchestrator,
    persist_settings: bool,
    response: Option<PluginStatus>,
}

impl RemovalDialog {
    /// Open the dialog with the form populated from stored settings
    #[must_use]
    pub fn open(
        store: SettingsStore,
        source: Option<SourceBinding>,
        controls: Box<dyn DialogControls>,
        backend: Backend,
    ) -> Self {
        let settings = store.load();
        tracing::debug!(settings = ?settings, path = %store.config_file().display(), "Loaded dialog settings");

        Self {
            store,
            form: DialogForm::from(settings),
            orchestrator: RemovalOrchestrator::with_backend(source, controls, backend),
            persist_settings: true,
            response: None,
        }
    }

    /// Stage uploads in `dir` instead of the system temp directory
    #[must_use]
    pub fn with_staging_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.orchestrator = self.orchestrator.with_staging_dir(dir);
        self
    }

    /// Whether starting a request writes the form to the settings file
    #[must_use]
    pub fn with_settings_persistence(mut self, persist: bool) -> Self {
        self.persist_settings = persist;
        self
    }

    #[must_use]
    pub fn form(&self) -> &DialogForm {
        &self.form
    }

    pub fn set_api_key(&mut self, api_key: &str) {
        self.form.api_key = api_key.to_string();
    }

    pub fn set_mode(&mut self, mode: OutputMode) {
        self.form.mode = mode;
    }

    pub fn set_model(&mut self, model: ModelKey) {
        self.form.model = model;
    }

    /// Flip the key entry between hidden and visible
    pub fn toggle_api_key_visibility(&mut self) -> bool {
        self.form.api_key_visible = !self.form.api_key_visible;
        self.form.api_key_visible
    }

    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.orchestrator.is_processing()
    }

    /// Text describing the bound drawable
    #[must_use]
    pub fn source_info(&self) -> String {
        match self.orchestrator.source() {
            Some(source) => format!(
                "Source: {} ({}×{}px)",
                source.drawable.name(),
                source.drawable.width(),
                source.drawable.height()
            ),
            None => "No image selected".to_string(),
        }
    }

    /// Description of the selected output mode
    #[must_use]
    pub fn mode_description(&self) -> String {
        let layer = self
            .orchestrator
            .source()
            .map_or("Current Layer", |source| source.drawable.name());
        match self.form.mode {
            OutputMode::Layer => format!(
                "Remove background from '{}' and create a new layer",
                layer
            ),
            OutputMode::File => format!(
                "Remove background from '{}' and create a new image file",
                layer
            ),
        }
    }

    /// Label of the start button
    #[must_use]
    pub fn action_label(&self) -> &'static str {
        match self.form.mode {
            OutputMode::Layer => "Remove Background",
            OutputMode::File => "Create New Image",
        }
    }

    /// Whether the start button is sensitive
    #[must_use]
    pub fn can_start(&self) -> bool {
        !self.form.api_key.trim().is_empty()
            && self.orchestrator.source().is_some()
            && !self.orchestrator.is_processing()
    }

    /// Handle the start button
    ///
    /// Stores the form as settings and launches the worker.
    ///
    /// # Errors
    /// - Blank API key, no bound drawable or zero-sized drawable
    pub fn remove_background(&mut self) -> Result<StartOutcome> {
        let api_key = self.form.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(RemovalError::configuration(MISSING_API_KEY_MESSAGE));
        }
        let Some(source) = self.orchestrator.source() else {
            return Err(RemovalError::configuration(NO_LAYER_MESSAGE));
        };
        if source.drawable.width() == 0 || source.drawable.height() == 0 {
            return Err(RemovalError::configuration(INVALID_DIMENSIONS_MESSAGE));
        }

        if self.orchestrator.is_processing() {
            return Ok(StartOutcome::AlreadyProcessing);
        }

        if self.persist_settings {
            self.store_current_settings();
        }
        self.orchestrator.update_status(&ProgressEvent::message(
            "Preparing image for background removal...",
        ));

        Ok(self.orchestrator.start(StartRequest {
            api_key,
            output_mode: self.form.mode,
            model_key: self.form.model,
        }))
    }

    /// Write the form to the settings file, logging failures
    pub fn store_current_settings(&self) {
        let settings = Settings {
            api_key: self.form.api_key.trim().to_string(),
            mode: self.form.mode,
            api_key_visible: self.form.api_key_visible,
            model: self.form.model,
        };
        if let Err(e) = self.store.store(&settings) {
            tracing::warn!(error = %e, "Failed to store settings");
        }
    }

    /// Handle the cancel button: stop a running request or close the dialog
    pub fn cancel(&mut self) -> CancelAction {
        if self.orchestrator.cancel() {
            CancelAction::CancellingRequest
        } else {
            self.response.get_or_insert(PluginStatus::Cancel);
            CancelAction::Closed
        }
    }

    /// Deliver pending worker events; call from the host's event loop
    pub fn poll(&mut self, editor: &mut dyn Editor) -> Option<RemovalOutcome> {
        let outcome = self.orchestrator.dispatch_pending(editor)?;
        self.record(&outcome);
        Some(outcome)
    }

    /// Block until the running request finishes
    pub fn wait(&mut self, editor: &mut dyn Editor) -> Option<RemovalOutcome> {
        let outcome = self.orchestrator.dispatch_blocking(editor)?;
        self.record(&outcome);
        Some(outcome)
    }

    fn record(&mut self, outcome: &RemovalOutcome) {
        if outcome.is_success() {
            self.response = Some(PluginStatus::Success);
        }
    }

    /// Status the dialog has settled on, if it has closed
    #[must_use]
    pub fn response(&self) -> Option<&PluginStatus> {
        self.response.as_ref()
    }

    /// Close the dialog and report its status to the host
    #[must_use]
    pub fn finish(mut self) -> PluginStatus {
        if self.orchestrator.is_processing() {
            self.orchestrator.cancel();
        }
        self.response.take().unwrap_or(PluginStatus::Cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::LayerSnapshot;
    use crate::services::NoOpControls;
    use crate::transport::{InferenceRequest, InferenceTransport, PredictionOutput};
    use async_trait::async_trait;
    use image::RgbaImage;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Unreachable;

    #[async_trait]
    impl InferenceTransport for Unreachable {
        async fn run(&self, _request: &InferenceRequest) -> Result<Option<PredictionOutput>> {
            Err(RemovalError::transport("unreachable"))
        }
    }

    fn drawable(width: u32, height: u32) -> Arc<dyn Drawable> {
        Arc::new(LayerSnapshot::new(
            "Sky",
            width,
            height,
            RgbaImage::new(width.max(1), height.max(1)),
        ))
    }

    fn backend() -> Backend {
        Backend::Custom {
            transport: Arc::new(Unreachable),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn dialog(temp_dir: &TempDir, source: Option<SourceBinding>) -> RemovalDialog {
        RemovalDialog::open(
            SettingsStore::with_config_dir(temp_dir.path()),
            source,
            Box::new(NoOpControls),
            backend(),
        )
    }

    #[test]
    fn test_validate_invocation() {
        let doc = Some(DocumentId(1));
        assert_eq!(
            validate_invocation(None, &[drawable(4, 4)]).unwrap_err(),
            PluginStatus::ExecutionError(NO_IMAGE_MESSAGE.to_string())
        );
        assert_eq!(
            validate_invocation(doc, &[]).unwrap_err(),
            PluginStatus::ExecutionError(NO_LAYER_MESSAGE.to_string())
        );
        assert_eq!(
            validate_invocation(doc, &[drawable(0, 4)]).unwrap_err(),
            PluginStatus::ExecutionError(INVALID_DIMENSIONS_MESSAGE.to_string())
        );

        let binding = validate_invocation(doc, &[drawable(4, 3), drawable(9, 9)]).unwrap();
        assert_eq!(binding.drawable.width(), 4);
        assert_eq!(binding.document, doc);
    }

    #[test]
    fn test_labels_follow_mode() {
        let temp_dir = TempDir::new().unwrap();
        let source = validate_invocation(Some(DocumentId(1)), &[drawable(640, 480)]).unwrap();
        let mut dialog = dialog(&temp_dir, Some(source));

        assert_eq!(dialog.source_info(), "Source: Sky (640×480px)");
        assert_eq!(dialog.action_label(), "Remove Background");
        assert_eq!(
            dialog.mode_description(),
            "Remove background from 'Sky' and create a new layer"
        );

        dialog.set_mode(OutputMode::File);
        assert_eq!(dialog.action_label(), "Create New Image");
        assert_eq!(
            dialog.mode_description(),
            "Remove background from 'Sky' and create a new image file"
        );
    }

    #[test]
    fn test_form_loaded_from_settings() {
        let temp_dir = TempDir::new().unwrap();
        let store = SettingsStore::with_config_dir(temp_dir.path());
        store
            .store_values("r8_saved", "file", true, "bria")
            .unwrap();

        let dialog = dialog(&temp_dir, None);
        assert_eq!(
            dialog.form(),
            &DialogForm {
                api_key: "r8_saved".to_string(),
                mode: OutputMode::File,
                api_key_visible: true,
                model: ModelKey::Bria,
            }
        );
        assert_eq!(dialog.source_info(), "No image selected");
    }

    #[test]
    fn test_start_sensitivity_and_validation() {
        let temp_dir = TempDir::new().unwrap();
        let source = validate_invocation(Some(DocumentId(1)), &[drawable(8, 8)]).unwrap();
        let mut dialog = dialog(&temp_dir, Some(source));

        assert!(!dialog.can_start());
        let err = dialog.remove_background().unwrap_err();
        assert_eq!(err.to_string(), MISSING_API_KEY_MESSAGE);
        assert!(!SettingsStore::with_config_dir(temp_dir.path())
            .config_file()
            .exists());

        dialog.set_api_key("   ");
        assert!(!dialog.can_start());
        dialog.set_api_key("r8_key");
        assert!(dialog.can_start());

        let mut unbound = self::dialog(&temp_dir, None);
        unbound.set_api_key("r8_key");
        assert!(!unbound.can_start());
        assert_eq!(
            unbound.remove_background().unwrap_err().to_string(),
            NO_LAYER_MESSAGE
        );
    }

    #[test]
    fn test_cancel_when_idle_closes_dialog() {
        let temp_dir = TempDir::new().unwrap();
        let mut dialog = dialog(&temp_dir, None);
        assert_eq!(dialog.cancel(), CancelAction::Closed);
        assert_eq!(dialog.response(), Some(&PluginStatus::Cancel));
        assert_eq!(dialog.finish(), PluginStatus::Cancel);
    }

    #[test]
    fn test_visibility_toggle() {
        let temp_dir = TempDir::new().unwrap();
        let mut dialog = dialog(&temp_dir, None);
        assert!(dialog.toggle_api_key_visibility());
        assert!(!dialog.toggle_api_key_visibility());
    }
}
