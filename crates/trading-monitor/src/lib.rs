//! Logging setup and periodic position reporting.

mod logging;
mod reporter;

pub use logging::{setup_logging, LOG_FILE_PREFIX};
pub use reporter::{summarize, PositionLine, PositionReporter, ReportSummary};
