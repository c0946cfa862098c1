//! Logging setup.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};
use trading_core::error::{TradingError, TradingResult};

/// Base name of the daily-rolling log file.
pub const LOG_FILE_PREFIX: &str = "autotrader.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. With `file` set, events are
/// also written to a daily-rolling file in that directory; keep the returned
/// guard alive for as long as logs should be flushed.
pub fn setup_logging(level: &str, json: bool, file: Option<&Path>) -> TradingResult<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| TradingError::Config(format!("Invalid log level {:?}: {}", level, e)))?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().pretty().boxed()
    });

    let guard = file.map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        layers.push(if json { layer.json().boxed() } else { layer.boxed() });
        guard
    });

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| TradingError::Internal(format!("Logging already initialized: {}", e)))?;

    Ok(guard)
}
