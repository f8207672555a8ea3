//! Process-wide `tracing` setup for the coordinator binary.
//!
//! Events go to stdout and, when the data directory is writable, to a
//! daily-rotated `frigate-ptz.log`. `RUST_LOG` overrides everything else.

use std::path::{Path, PathBuf};
use std::sync::{Once, OnceLock};

use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "FRIGATE_PTZ_LOG_LEVEL";
const LOG_FILE_PREFIX: &str = "frigate-ptz.log";
const DEFAULT_LEVEL: &str = "info";

static INIT: Once = Once::new();
// Dropping the guard stops the file writer, so it lives for the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn log_dir(base: &Path) -> PathBuf {
    base.join("frigate-ptz").join("logs")
}

/// The directive used when `RUST_LOG` is unset or invalid.
fn level_directive(env_level: Option<String>, cli_level: Option<&str>) -> String {
    env_level
        .filter(|level| !level.trim().is_empty())
        .or_else(|| cli_level.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

fn filter(cli_level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = level_directive(std::env::var(LOG_LEVEL_ENV).ok(), cli_level);
        EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
    })
}

/// Open the rotating log file. `Err` carries the directory that could not
/// be created, for reporting once the subscriber is up.
fn open_file_sink() -> Result<(NonBlocking, PathBuf), (PathBuf, std::io::Error)> {
    let dir = log_dir(&dirs::data_dir().unwrap_or_else(std::env::temp_dir));
    std::fs::create_dir_all(&dir).map_err(|err| (dir.clone(), err))?;

    let appender = RollingFileAppender::new(Rotation::DAILY, &dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    Ok((writer, dir))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(level: Option<&str>) {
    INIT.call_once(|| {
        let sink = open_file_sink();
        let file_layer = sink.as_ref().ok().map(|(writer, _)| {
            fmt::layer()
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer.clone())
        });

        tracing_subscriber::registry()
            .with(filter(level))
            .with(fmt::layer().with_timer(UtcTime::rfc_3339()))
            .with(file_layer)
            .init();

        match sink {
            Ok((_, dir)) => info!(log_dir = %dir.display(), "logging to stdout and daily log file"),
            Err((dir, err)) => warn!(log_dir = %dir.display(), error = %err, "log directory unavailable, stdout only"),
        }
    });
}
