//! Background removal CLI tool
//!
//! Runs the dialog pipeline headlessly on an image file: the file is opened
//! in an in-memory editor, the selected layer goes through the remote
//! inference worker and the reconciled layer is written back out as PNG.

use super::config::{CliConfigBuilder, KeySource, RunConfig, API_TOKEN_ENV};
use crate::{
    editor::{Editor, MemoryEditor},
    models::ModelKey,
    orchestrator::{Backend, RemovalOutcome, StartOutcome},
    services::{DialogControls, ProgressEvent},
    session::{validate_invocation, CancelAction, PluginStatus, RemovalDialog},
    settings::{OutputMode, SettingsStore},
    tracing_config::{events, init_cli_tracing, spans},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Exit code reported when the user interrupted the run
const EXIT_CANCELLED: u8 = 130;

/// How often the event loop drains worker events
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Remove image backgrounds with a hosted AI model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "dream-bgremove")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image file
    #[arg(value_name = "INPUT", required_unless_present_any = ["list_models", "show_config_path"])]
    pub input: Option<PathBuf>,

    /// Output PNG file [default: <INPUT stem>-background-removed.png]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Place the result as a new layer or a new image [default: stored setting]
    #[arg(long, value_enum)]
    pub mode: Option<CliOutputMode>,

    /// Model key (see --list-models) [default: stored setting]
    #[arg(short, long, value_name = "KEY", value_parser = CliConfigBuilder::parse_model_key)]
    pub model: Option<ModelKey>,

    /// Replicate API key [default: $REPLICATE_API_TOKEN, then stored setting]
    #[arg(long, value_name = "KEY")]
    pub api_key: Option<String>,

    /// Upper bound for the remote call in seconds [default: 300]
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Store the effective key, mode and model as settings
    #[arg(long)]
    pub save_settings: bool,

    /// List available models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Show the settings file location and exit
    #[arg(long)]
    pub show_config_path: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliOutputMode {
    Layer,
    File,
}

impl From<CliOutputMode> for OutputMode {
    fn from(mode: CliOutputMode) -> Self {
        match mode {
            CliOutputMode::Layer => OutputMode::Layer,
            CliOutputMode::File => OutputMode::File,
        }
    }
}

pub fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let session_id = init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    if cli.list_models {
        list_models();
        return Ok(ExitCode::SUCCESS);
    }

    let store = SettingsStore::new().context("Failed to locate settings directory")?;

    if cli.show_config_path {
        println!("{}", store.config_file().display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = CliConfigBuilder::from_cli(&cli, store.load())?;
    let _session = spans::session(&session_id, config.settings.model.key()).entered();

    match config.key_source {
        Some(KeySource::Flag) => debug!("Using API key from --api-key"),
        Some(KeySource::Environment) => debug!("Using API key from {}", API_TOKEN_ENV),
        Some(KeySource::Settings) => debug!("Using API key from settings"),
        None => {},
    }

    run(&cli, config, store)
}

fn run(cli: &Cli, config: RunConfig, store: SettingsStore) -> Result<ExitCode> {
    let start_time = Instant::now();

    let image = image::open(&config.input)
        .with_context(|| format!("Failed to open image '{}'", config.input.display()))?;
    let layer_name = config
        .input
        .file_stem()
        .map_or_else(|| "Background".to_string(), |stem| stem.to_string_lossy().into_owned());

    let mut editor = MemoryEditor::new();
    let (document, layer) = editor
        .open_image(&layer_name, &image)
        .context("Failed to open image as document")?;
    let drawable = editor.drawable(document, layer)?;

    let source = match validate_invocation(Some(document), &[drawable]) {
        Ok(source) => source,
        Err(PluginStatus::ExecutionError(message)) => anyhow::bail!(message),
        Err(status) => anyhow::bail!("Unexpected plugin status {:?}", status),
    };

    let config_path = store.config_file();
    let progress = IndicatifControls::new(cli.verbose > 0);
    let mut dialog = RemovalDialog::open(
        store,
        Some(source),
        Box::new(progress.clone()),
        Backend::Replicate(config.client.clone()),
    )
    .with_settings_persistence(cli.save_settings);
    dialog.set_api_key(&config.settings.api_key);
    dialog.set_mode(config.settings.mode);
    dialog.set_model(config.settings.model);

    info!(
        input = %config.input.display(),
        model = %config.settings.model.display_name(),
        mode = %config.settings.mode,
        "{}",
        dialog.source_info()
    );

    match dialog.remove_background()? {
        StartOutcome::Started => {},
        StartOutcome::SpawnFailed(message) => anyhow::bail!(message),
        other => anyhow::bail!("Background removal did not start: {:?}", other),
    }
    if cli.save_settings {
        info!("Settings saved to {}", config_path.display());
    }

    let interrupted = watch_interrupt();
    let outcome = loop {
        if interrupted.swap(false, Ordering::SeqCst) && dialog.cancel() == CancelAction::CancellingRequest {
            warn!("Interrupt received, cancelling");
        }
        if let Some(outcome) = dialog.poll(&mut editor) {
            break outcome;
        }
        std::thread::sleep(POLL_INTERVAL);
    };
    progress.finish();

    let exit = match outcome {
        RemovalOutcome::Succeeded { message, output } => {
            let pixels = editor
                .document(output.document)
                .and_then(|doc| doc.layer(output.layer))
                .map(|layer| layer.pixels.clone())
                .context("Reconciled layer is missing")?;
            pixels
                .save_with_format(&config.output, ImageFormat::Png)
                .with_context(|| format!("Failed to write '{}'", config.output.display()))?;
            editor.flush_displays();

            println!("{} Saved to {}", message, config.output.display());
            ExitCode::SUCCESS
        },
        RemovalOutcome::Failed { message } => {
            events::error_with_context(&message, "background removal");
            eprintln!("Error: {}", message);
            ExitCode::FAILURE
        },
        RemovalOutcome::Cancelled => {
            eprintln!("Operation cancelled");
            ExitCode::from(EXIT_CANCELLED)
        },
    };

    let status = dialog.finish();
    events::performance_metric("cli_run", start_time.elapsed().as_millis() as u64);
    debug!(status = ?status, "Dialog closed");
    Ok(exit)
}

/// Flag raised by Ctrl-C, watched from the event loop
fn watch_interrupt() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let raised = Arc::clone(&flag);

    let spawned = std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!(error = %e, "Interrupt handling unavailable");
                    return;
                },
            };
            runtime.block_on(async {
                while tokio::signal::ctrl_c().await.is_ok() {
                    raised.store(true, Ordering::SeqCst);
                }
            });
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Interrupt handling unavailable");
    }

    flag
}

fn list_models() {
    println!("Available models");
    println!("----------------");
    for model in ModelKey::ALL {
        let marker = if model == ModelKey::default() { " (default)" } else { "" };
        println!("{:<10} {}{}", model.key(), model.identifier(), marker);
        println!("           {}", model.display_name());
    }
}

/// Dialog controls rendered as a terminal progress bar
#[derive(Clone)]
struct IndicatifControls {
    bar: ProgressBar,
    verbose: bool,
}

impl IndicatifControls {
    fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {msg}")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar, verbose }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl DialogControls for IndicatifControls {
    fn update_status(&mut self, event: &ProgressEvent) {
        if let Some(fraction) = event.fraction {
            self.bar.set_position((fraction * 100.0).round() as u64);
        }
        self.bar.set_message(event.message.clone());
        if self.verbose {
            debug!(fraction = ?event.fraction, "{}", event.message);
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.bar.disable_steady_tick();
        } else {
            self.bar.set_position(0);
            self.bar.enable_steady_tick(Duration::from_millis(120));
        }
    }
}
