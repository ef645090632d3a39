//! provides logging helpers

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Environment variable holding an optional log file path, e.g. `/logs/resizer.log`
pub const LOG_PATH_ENV_VAR: &str = "RESIZER_LOG_PATH";

/// Build the formatting layer.
///
/// Without a log path events go to stderr. With a path they go to a daily
/// rotated file next to it, and the returned guard must be kept alive for the
/// background writer to flush.
pub fn get_fmt_layer<S>(
    log_path: Option<String>,
) -> (Box<dyn Layer<S> + Send + Sync + 'static>, Option<WorkerGuard>)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let Some(log_path) = log_path.filter(|p| !p.is_empty()) else {
        return (stderr_layer(), None);
    };

    let path = Path::new(&log_path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("resizer.log");

    let appender = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)
    {
        Ok(appender) => appender,
        Err(e) => {
            // subscriber is not installed yet
            eprintln!("failed to create log file appender at {log_path}: {e}, logging to stderr");
            return (stderr_layer(), None);
        }
    };

    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let fmt_layer = layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();
    (fmt_layer, Some(guard))
}

fn stderr_layer<S>() -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .boxed()
}

/// initiate the global tracing subscriber
pub fn init(log_path: Option<String>) -> Option<WorkerGuard> {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let (fmt_layer, guard) = get_fmt_layer(log_path);

    registry().with(fmt_layer.with_filter(env_filter)).init();
    guard
}
