//! # Observability
//!
//! Logging setup for broker connector services.
//!
//! Library crates only emit `tracing` events. The process that hosts them
//! calls `observability::init()` once at startup and decides where the events
//! go; libraries have no knowledge of the output format or destination.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init("ingest-stage");
//!
//!     tracing::info!("service started");
//! }
//! ```
//!
//! Or with configuration:
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "ingest-stage".into(),
//!         default_level: "debug".into(),
//!         json: true,
//!         ..Default::default()
//!     });
//! }
//! ```

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Error returned when a global subscriber is already installed.
pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "ingest-stage", "connector-tests").
    /// Logged once at startup.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Emit one JSON object per line instead of compact text.
    pub json: bool,

    /// Write to stderr instead of stdout.
    pub stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            json: false,
            stderr: false,
        }
    }
}

/// Initialize logging with default settings.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_with_config(config: LogConfig) {
    if let Err(e) = try_init_with_config(config) {
        panic!("failed to install log subscriber: {}", e);
    }
}

/// Initialize logging, failing instead of panicking when a subscriber is
/// already installed. Tests call this once per test.
pub fn try_init_with_config(config: LogConfig) -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));
    let writer = if config.stderr {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true);

    if config.json {
        builder.json().try_init()?;
    } else {
        builder.compact().try_init()?;
    }

    tracing::info!(service = %config.service_name, "Logging initialized");
    Ok(())
}

/// Re-export tracing macros for convenience.
/// Services can use `observability::info!()` or `tracing::info!()`.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(!config.json);
        assert!(!config.stderr);
    }

    #[test]
    fn test_second_init_is_rejected() {
        let config = LogConfig {
            service_name: "observability-tests".into(),
            json: true,
            stderr: true,
            ..Default::default()
        };
        let _ = try_init_with_config(config.clone());
        assert!(try_init_with_config(config).is_err());
    }
}
