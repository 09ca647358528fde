use std::fs::File;
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Transport mode for MCP server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// stdio transport (default) - for local MCP clients
    Stdio,
    /// Streamable HTTP transport - for remote/web access
    Stream,
}

/// Initialize logging based on transport mode
///
/// # stdio mode
/// - NO stderr output (stdout carries the protocol, clients treat stderr noise as failures)
/// - File logging only when log_file is Some
///
/// # Stream mode
/// - Console (stderr) logging, plus the file when log_file is Some
///
/// `RUST_LOG` overrides the default `info` level.
pub fn init_logging(
    mode: TransportMode,
    log_file: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = log_file.map(open_log_file).transpose()?;

    match (mode, file) {
        (TransportMode::Stdio, None) => {}
        (TransportMode::Stdio, Some(file)) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .try_init()?;
        }
        (TransportMode::Stream, None) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()?;
        }
        (TransportMode::Stream, Some(file)) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
                .try_init()?;
        }
    }
    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
}

fn open_log_file(filename: &str) -> std::io::Result<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(filename)
}
