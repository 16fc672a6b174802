//! Loading [`ServiceConfig`] from a JSON file and the environment.
//!
//! Precedence, lowest first: built-in defaults, the JSON file, environment
//! overrides.

use std::path::{Path, PathBuf};

use gigledger_types::{GigledgerError, Result, ServiceConfig};

/// Path of the JSON config file, used when no path is passed explicitly.
pub const CONFIG_PATH_ENV: &str = "GIGLEDGER_CONFIG";
/// Overrides `log_filter`.
pub const LOG_FILTER_ENV: &str = "GIGLEDGER_LOG";
/// Overrides `log_json` (`1`/`true` to enable).
pub const LOG_JSON_ENV: &str = "GIGLEDGER_LOG_JSON";
/// Overrides `auth.signing_key_hex`.
pub const SIGNING_KEY_ENV: &str = "GIGLEDGER_SIGNING_KEY";

/// Load from `path`, else from `$GIGLEDGER_CONFIG`, else defaults; then
/// apply environment overrides and validate.
pub fn load(path: Option<&Path>) -> Result<ServiceConfig> {
    load_with(path, |key| std::env::var(key).ok())
}

/// [`load`] with an injectable environment.
pub fn load_with(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ServiceConfig> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| env(CONFIG_PATH_ENV).map(PathBuf::from));

    let mut config = match &path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str::<ServiceConfig>(&text).map_err(|e| {
                GigledgerError::Configuration(format!("{}: {e}", path.display()))
            })?
        }
        None => ServiceConfig::default(),
    };
    apply_overrides(&mut config, env)?;
    config.validate()?;

    tracing::debug!(path = ?path, "Configuration loaded");
    Ok(config)
}

/// Apply `GIGLEDGER_*` overrides looked up through `env`.
pub fn apply_overrides(
    config: &mut ServiceConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(filter) = env(LOG_FILTER_ENV) {
        config.log_filter = filter;
    }
    if let Some(json) = env(LOG_JSON_ENV) {
        config.log_json = match json.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" | "" => false,
            other => {
                return Err(GigledgerError::Configuration(format!(
                    "{LOG_JSON_ENV} must be a boolean, got {other:?}"
                )));
            }
        };
    }
    if let Some(key) = env(SIGNING_KEY_ENV) {
        config.auth.signing_key_hex = Some(key);
    }
    Ok(())
}
