use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use std::fs;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Where and how log output goes
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Directory for the daily rotating log files
    pub log_dir: Utf8PathBuf,

    /// File name prefix, e.g. "template-packer"
    pub prefix: String,

    /// Use debug level instead of info (`RUST_LOG` still wins when set)
    pub debug: bool,

    /// Also log to stderr with ANSI colors
    pub console: bool,

    /// Write the file log as JSON lines
    pub json: bool,
}

impl LoggingOptions {
    pub fn new(log_dir: impl Into<Utf8PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            log_dir: log_dir.into(),
            prefix: prefix.into(),
            debug: false,
            console: true,
            json: false,
        }
    }
}

/// Setup logging with a rotating file appender and optional console output.
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn setup_logging(options: &LoggingOptions) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    ensure_log_dir(&options.log_dir)?;

    let file_appender = rolling::daily(&options.log_dir, &options.prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let (json_layer, text_layer) = if options.json {
        let layer = fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_current_span(false);
        (Some(layer), None)
    } else {
        let layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false) // No ANSI codes in log files
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        (None, Some(layer))
    };

    let console_layer = options.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter(options.debug))
        .with(json_layer)
        .with(text_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        "Logging initialized: dir={}, prefix={}, debug={}, console={}",
        options.log_dir,
        options.prefix,
        options.debug,
        options.console
    );

    Ok(guard)
}

/// `RUST_LOG` if set, otherwise debug or info
fn env_filter(debug_mode: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_mode {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

fn ensure_log_dir(log_dir: &Utf8PathBuf) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }
    Ok(())
}
