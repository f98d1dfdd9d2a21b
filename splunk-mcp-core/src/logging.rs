//! Logging setup for the splunk-mcp binary.
//!
//! stdout carries the MCP protocol, so log output always goes to stderr or to
//! the configured log file.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;

use crate::Result;
use crate::error::SplunkMcpError;

/// Picks the effective log level.
///
/// Command-line flags win over the configured level: `quiet` forces ERROR and
/// any `-v` raises verbosity to DEBUG (one) or TRACE (two or more). Without
/// flags the configured level name is used, falling back to INFO.
pub fn resolve_level(verbose: u8, quiet: bool, configured: Option<&str>) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 1) => Level::DEBUG,
        (false, 2..) => Level::TRACE,
        (false, 0) => configured
            .and_then(|name| name.trim().parse::<Level>().ok())
            .unwrap_or(Level::INFO),
    }
}

/// Initializes structured logging at `level`.
///
/// # Arguments
/// * `level` - Maximum level to emit
/// * `log_file` - Optional file to append to instead of stderr
///
/// # Errors
/// Returns a configuration error if the log file cannot be opened or a global
/// subscriber is already installed.
///
/// # Example
/// ```rust,no_run
/// use splunk_mcp_core::logging::{init_logging, resolve_level};
///
/// init_logging(resolve_level(1, false, None), None).expect("Failed to initialize logging");
/// ```
pub fn init_logging(level: Level, log_file: Option<&Path>) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| SplunkMcpError::Io {
                    context: format!("Failed to open log file {}", path.display()),
                    source: e,
                })?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    installed.map_err(|e| {
        SplunkMcpError::configuration(format!("Failed to initialize logging: {}", e))
    })
}
