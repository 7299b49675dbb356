//! Process-wide logging, set up once from `main`.
//!
//! Two sinks: short colored messages on stderr for the operator, and a
//! timestamped debug trace appended to the log file.

use anyhow::Result;
use console::style;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{Event, Level, Subscriber, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt as tracing_fmt};

/// Environment variable selecting the log file.
pub const LOG_ENV: &str = "ASSISTANT_LOG";
const DEFAULT_LOG_FILE: &str = ".assistant.log";

/// `$ASSISTANT_LOG`, else `~/.assistant.log`.
pub fn log_path() -> PathBuf {
    match std::env::var_os(LOG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => dirs::home_dir()
            .map(|home| home.join(DEFAULT_LOG_FILE))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
    }
}

/// Our own targets at `level`, dependencies only when they warn.
fn crate_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_ascii_lowercase();
    EnvFilter::new(format!("warn,term_assistant={level},assistant={level}"))
}

/// Prints only the event's fields, colored by level.
struct ConsoleFormat;

impl<S, N> FormatEvent<S, N> for ConsoleFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut message = String::new();
        ctx.format_fields(Writer::new(&mut message), event)?;
        let message = match *event.metadata().level() {
            Level::ERROR => style(message).red(),
            Level::WARN => style(message).yellow(),
            Level::INFO => style(message).blue(),
            _ => style(message).dim(),
        };
        writeln!(writer, "{}", message.for_stderr())
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Installs the global subscriber. Console output is `INFO` and above, or
/// `DEBUG` with `verbose`; the log file always gets `DEBUG`. A log file that
/// cannot be opened only costs the file sink.
pub fn init(verbose: bool) -> Result<()> {
    let console_level = if verbose { Level::DEBUG } else { Level::INFO };
    let console = tracing_fmt::layer()
        .with_writer(std::io::stderr)
        .event_format(ConsoleFormat)
        .with_filter(crate_filter(console_level));

    let path = log_path();
    let (file, open_error) = match open_log_file(&path) {
        Ok(file) => (Some(file), None),
        Err(e) => (None, Some(e)),
    };
    let file_layer = file.map(|file| {
        tracing_fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false)
            .with_filter(crate_filter(Level::DEBUG))
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()?;

    if let Some(e) = open_error {
        warn!("Cannot open log file {}: {e}", path.display());
    }
    Ok(())
}
