//! Tracing subscriber setup.

use gigledger_types::{GigledgerError, Result, ServiceConfig};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` if set and valid, otherwise the configured `log_filter`.
pub fn build_filter(config: &ServiceConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.log_filter).map_err(|e| {
        GigledgerError::Configuration(format!("log_filter {:?}: {e}", config.log_filter))
    })
}

/// Install the global subscriber: human-readable lines on stderr, or JSON
/// when `log_json` is set.
///
/// # Errors
/// `Configuration` for an invalid filter or if a subscriber is already
/// installed.
pub fn init_tracing(config: &ServiceConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if config.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| GigledgerError::Configuration(format!("tracing: {e}")))?;

    tracing::info!(
        service = gigledger_types::constants::SERVICE_NAME,
        version = gigledger_types::constants::VERSION,
        json = config.log_json,
        "Tracing initialized"
    );
    Ok(())
}
