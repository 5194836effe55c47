//! Configuration management for shipcheck

pub mod schema;

pub use schema::{
    BumpStrategy, CacheConfig, Config, ExampleConfig, PackageConfig, RegistryConfig, RunConfig,
};

use crate::error::{ShipcheckError, ShipcheckResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Name of the config file looked up from the working directory upward
pub const CONFIG_FILE_NAME: &str = "shipcheck.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a config manager for a specific file
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Discover `shipcheck.toml` in `start` or any of its ancestors
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Locate the config file, falling back to `start/shipcheck.toml`
    pub fn discover(start: &Path) -> Self {
        let path = Self::find_local_config(start).unwrap_or_else(|| start.join(CONFIG_FILE_NAME));
        debug!("Using config path {}", path.display());
        Self::with_path(path)
    }

    /// Cache directory used when none is configured and no config exists
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shipcheck")
    }

    /// Load configuration and resolve relative paths.
    ///
    /// A missing file is an error: a run without examples or a package has
    /// nothing to do.
    pub async fn load(&self) -> ShipcheckResult<Config> {
        if !self.config_path.exists() {
            return Err(ShipcheckError::ConfigNotFound(self.config_path.clone()));
        }

        let content = fs::read_to_string(&self.config_path).await.map_err(|e| {
            ShipcheckError::io(format!("reading config from {}", self.config_path.display()), e)
        })?;

        let mut config: Config =
            toml::from_str(&content).map_err(|e| ShipcheckError::ConfigInvalid {
                path: self.config_path.clone(),
                reason: e.to_string(),
            })?;

        validate(&config).map_err(|reason| ShipcheckError::ConfigInvalid {
            path: self.config_path.clone(),
            reason,
        })?;

        config.resolve_paths(self.base_dir());
        Ok(config)
    }

    /// Load the configuration, or defaults when the file does not exist
    pub async fn load_or_default(&self) -> ShipcheckResult<Config> {
        match self.load().await {
            Err(ShipcheckError::ConfigNotFound(_)) => {
                debug!("Config file not found, using defaults");
                let mut config = Config::default();
                config.cache.dir = Self::default_cache_dir();
                config.resolve_paths(self.base_dir());
                Ok(config)
            }
            other => other,
        }
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> ShipcheckResult<()> {
        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            ShipcheckError::io(format!("writing config to {}", self.config_path.display()), e)
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Directory relative paths in the config resolve against
    pub fn base_dir(&self) -> &Path {
        self.config_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

fn validate(config: &Config) -> Result<(), String> {
    if config.package.dist_tag.trim().is_empty() || config.package.dist_tag == "latest" {
        return Err(format!(
            "package.dist_tag must be a non-default tag, got {:?}",
            config.package.dist_tag
        ));
    }
    if config.registry.command.is_empty() {
        return Err("registry.command must not be empty".to_string());
    }
    for (key, command) in [
        ("run.install_command", &config.run.install_command),
        ("run.dev_command", &config.run.dev_command),
        ("run.test_command", &config.run.test_command),
        ("package.publish_command", &config.package.publish_command),
    ] {
        if command.is_empty() {
            return Err(format!("{key} must not be empty"));
        }
    }

    let mut seen = std::collections::HashSet::new();
    for example in &config.examples {
        if example.name.is_empty() || example.name.contains(['/', '\\']) || example.name.starts_with('.') {
            return Err(format!("example name {:?} must be a plain directory name", example.name));
        }
        if !seen.insert(example.name.as_str()) {
            return Err(format!("duplicate example name {:?}", example.name));
        }
    }
    Ok(())
}
