//! Configuration Loader
//!
//! Layers an optional TOML file and `OSMLCM__…` environment variables over the
//! built-in defaults, then validates the result.

use super::error::{ConfigResult, ConfigurationError};
use super::LcmConfig;
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const ENV_PREFIX: &str = "OSMLCM";

/// Loaded, validated configuration shared across the process
#[derive(Debug)]
pub struct ConfigManager {
    config: LcmConfig,
    source_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load defaults plus environment overrides only
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_file(None::<&Path>)
    }

    /// Load from an explicit file; a missing file is an error
    pub fn load_from_file<P: AsRef<Path>>(path: Option<P>) -> ConfigResult<Arc<ConfigManager>> {
        let mut builder = Config::builder();

        let source_file = match path {
            Some(path) => {
                let path = path.as_ref();
                if !path.exists() {
                    return Err(ConfigurationError::ConfigFileNotFound(
                        path.display().to_string(),
                    ));
                }
                debug!(file = %path.display(), "Loading configuration file");
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
                Some(path.to_path_buf())
            }
            None => None,
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let source_name = source_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_string());

        let config: LcmConfig = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| ConfigurationError::invalid_source(&source_name, e))?;

        config.validate()?;

        info!(
            source = %source_name,
            worker_id = ?config.global.worker_id,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            source_file,
        }))
    }

    /// Wrap an already-built configuration, used by tests and embedders
    pub fn from_config(config: LcmConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            source_file: None,
        }))
    }

    pub fn config(&self) -> &LcmConfig {
        &self.config
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }
}
