//! Template Packer - command line entry point.
//!
//! # Overview
//!
//! Packages a project working tree into a `.tgz` project-template archive.
//! It initializes:
//! - Configuration loading ([`ConfigManager`]: `packer.yaml` + `TEMPLATE_PACKER_*`)
//! - Logging infrastructure (file rotation + optional console output)
//! - Tokio async runtime (replication tasks, blocking archive work)
//! - The [`Packager`] and a progress printer fed by its state events
//!
//! # Execution Flow
//!
//! 1. Parse arguments, load configuration from the config directory
//! 2. Initialize logging in the configured log directory
//! 3. Resolve the manifest (last-used values overlaid with flags) and destination
//! 4. Remember manifest and destination for the next invocation
//! 5. Start the pipeline; once the run is claimed, Ctrl-C requests cancellation
//! 6. The workspace is torn down after success; print the artifact path on stdout

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use template_packer::logging::{self, LoggingOptions};
use template_packer::{
    APP_NAME, ConfigManager, PackageManifest, Packager, PackerConfig, PipelineError, StateChange,
    StateManager, VERSION, WorkflowType,
};
use tokio::sync::{broadcast, mpsc};

#[derive(Parser, Debug)]
#[command(name = "template-packer", version, about)]
struct Cli {
    /// Directory holding packer.yaml and last-used.yaml
    #[arg(long, env = "TEMPLATE_PACKER_HOME", default_value = "template-packer")]
    config_dir: Utf8PathBuf,

    /// Project root to package (overrides packer.yaml)
    #[arg(long)]
    project: Option<Utf8PathBuf>,

    /// Directory the archive is written to (defaults to the last one used)
    #[arg(long, conflicts_with = "editor")]
    destination: Option<Utf8PathBuf>,

    /// Editor install root; the archive goes into its project-template folder
    #[arg(long)]
    editor: Option<Utf8PathBuf>,

    /// Package identifier, e.g. com.acme.template.starter
    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    display_name: Option<String>,

    #[arg(long)]
    package_version: Option<String>,

    /// Target editor version
    #[arg(long)]
    unity: Option<String>,

    #[arg(long)]
    description: Option<String>,

    /// Debug-level logging
    #[arg(long)]
    debug: bool,

    /// No console logging or progress output
    #[arg(long)]
    quiet: bool,
}

impl Cli {
    fn workflow(&self, config_manager: &ConfigManager) -> Result<WorkflowType> {
        if let Some(editor_root) = &self.editor {
            return Ok(WorkflowType::RegisterWithEditor {
                editor_root: editor_root.clone(),
            });
        }

        let destination = match &self.destination {
            Some(destination) => destination.clone(),
            None => match config_manager.load_last_used()?.destination {
                Some(previous) => {
                    tracing::info!("Using last destination {}", previous);
                    previous
                }
                None => bail!("No destination given; pass --destination or --editor"),
            },
        };

        Ok(WorkflowType::PackageOnly { destination })
    }

    /// Overlay the flags on the previous manifest
    fn manifest(&self, mut manifest: PackageManifest) -> PackageManifest {
        let overrides = [
            (&self.name, &mut manifest.name),
            (&self.display_name, &mut manifest.display_name),
            (&self.package_version, &mut manifest.version),
            (&self.unity, &mut manifest.target_platform_version),
            (&self.description, &mut manifest.description),
        ];
        for (flag, field) in overrides {
            if let Some(value) = flag {
                *field = value.clone();
            }
        }
        manifest
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let mut config = config_manager.load_packer_config()?;
    if let Some(project) = &cli.project {
        config.project_root = project.clone();
    }
    config.debug_mode |= cli.debug;

    let _guard = logging::setup_logging(&LoggingOptions {
        debug: config.debug_mode,
        console: !cli.quiet,
        ..LoggingOptions::new(config.log_dir.clone(), APP_NAME)
    })?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let workflow = cli.workflow(&config_manager)?;
    let destination = workflow.destination();
    let manifest = cli.manifest(config_manager.load_last_manifest());

    if let Err(e) = config_manager.remember_run(&manifest, &destination) {
        tracing::warn!("Could not save last-used settings: {:#}", e);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("template-packer-worker")
        .build()?;

    let result = runtime.block_on(package(config, manifest, destination, cli.quiet));

    runtime.shutdown_timeout(Duration::from_secs(5));

    let artifact = result?;
    println!("{}", artifact);
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn package(
    config: PackerConfig,
    manifest: PackageManifest,
    destination: Utf8PathBuf,
    quiet: bool,
) -> Result<Utf8PathBuf> {
    let packager = Arc::new(Packager::new(config, StateManager::new()));

    let printer = (!quiet).then(|| tokio::spawn(print_progress(packager.state().subscribe())));

    let (outcome_tx, mut outcome_rx) =
        mpsc::unbounded_channel::<Result<Utf8PathBuf, PipelineError>>();
    let failure_tx = outcome_tx.clone();
    let summary = Arc::clone(&packager);

    // Claims the run before returning, so Ctrl-C from here on cancels it
    let handle = packager.start_packaging(
        manifest,
        destination,
        move |report| {
            for warning in summary.snapshot().warnings {
                tracing::warn!("{}", warning);
            }
            tracing::info!(
                "Copied {} files ({} skipped), {} archive entries",
                report.files_copied(),
                report.files_skipped(),
                report.archive.entries
            );
            let _ = outcome_tx.send(Ok(report.artifact));
        },
        move |e| {
            let _ = failure_tx.send(Err(e));
        },
    )?;

    let canceller = {
        let packager = Arc::clone(&packager);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                packager.request_cancel();
            }
        })
    };

    let joined = handle.await;
    canceller.abort();
    if let Some(printer) = printer {
        printer.abort();
    }

    joined.context("Packaging task failed")?;
    match outcome_rx.recv().await {
        Some(Ok(artifact)) => Ok(artifact),
        Some(Err(e)) => Err(anyhow::Error::new(e).context("Packaging failed")),
        None => bail!("Packaging finished without reporting an outcome"),
    }
}

/// Print stage progress to stderr until the channel closes.
async fn print_progress(mut events: broadcast::Receiver<StateChange>) {
    loop {
        match events.recv().await {
            Ok(StateChange::Progress(event)) => {
                eprintln!(
                    "[{:>3.0}%] {}: {}",
                    event.fraction * 100.0,
                    event.stage,
                    event.label
                );
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!("Progress printer skipped {} events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
