//! Shared logging setup for Lookout binaries.
//!
//! Console output by default; configuring a log directory adds daily
//! rotating files. `LOOKOUT_DEBUG_LOG=1` forces debug level regardless of
//! the environment filter.

use std::env;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSection;

/// Initialize the global subscriber. The returned guard must stay alive for
/// the life of the process when file logging is enabled.
pub fn init_logging(section: &LoggingSection) -> Option<WorkerGuard> {
    let debug_enabled = env::var("LOOKOUT_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&section.level))
    };

    match &section.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "lookout.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}
