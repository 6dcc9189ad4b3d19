use tracing::Level;
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingConfig;

/// Target used by the accounting writer; see [`crate::statlog`].
pub const STAT_TARGET: &str = "freshet::stat";

/// Initialize structured logging from configuration.
///
/// Pretty output for development, JSON for production; an optional file
/// writer mirrors the stream, and an optional stat-log file receives only
/// the `freshet::stat` target (the `SESSION`/`REQUEST` accounting lines).
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.format.as_str() == "json" {
        let json_layer = fmt::layer().json().with_target(true);
        match &config.file_path {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                registry
                    .with(json_layer.with_writer(std::sync::Arc::new(file)))
                    .with(build_stat_layer(&config.stat_file_path)?)
                    .init();
            }
            None => {
                registry
                    .with(json_layer)
                    .with(build_stat_layer(&config.stat_file_path)?)
                    .init();
            }
        }
    } else {
        let pretty_layer = fmt::layer().with_target(true);
        match &config.file_path {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                registry
                    .with(pretty_layer.with_writer(std::sync::Arc::new(file)))
                    .with(build_stat_layer(&config.stat_file_path)?)
                    .init();
            }
            None => {
                registry
                    .with(pretty_layer)
                    .with(build_stat_layer(&config.stat_file_path)?)
                    .init();
            }
        }
    }

    Ok(())
}

/// Constructs the optional stat-log layer, generic over the subscriber it
/// will be attached to (each format/file-writer combination above produces
/// a distinct subscriber type).
fn build_stat_layer<S>(
    stat_file_path: &Option<String>,
) -> anyhow::Result<Option<impl Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    match stat_file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(std::sync::Arc::new(file))
                .with_filter(tracing_subscriber::filter::filter_fn(|meta| {
                    meta.target() == STAT_TARGET
                }));
            Ok(Some(layer))
        }
        None => Ok(None),
    }
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
