use std::path::{Path, PathBuf};

use conveyor_common::config::ConveyorConfig;

use super::validation;

/// Load and validate configuration from a TOML file.
///
/// Fails loudly with every offending key listed; the engine refuses to
/// start on validation failure.
pub fn load_config(path: &Path) -> Result<ConveyorConfig, ConfigError> {
    tracing::info!(path = %path.display(), "Loading configuration");

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: ConveyorConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    validation::validate(&config)?;

    tracing::info!(
        workers = config.worker.count,
        priorities = config.worker.priorities.len(),
        "Configuration loaded successfully"
    );

    Ok(config)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl From<ConfigError> for conveyor_common::ConveyorError {
    fn from(e: ConfigError) -> Self {
        conveyor_common::ConveyorError::Config(e.to_string())
    }
}
