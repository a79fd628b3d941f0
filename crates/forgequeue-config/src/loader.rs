//! Generic configuration loader with layered sources.

use config::{Config, ConfigError, Environment, File};
use forgequeue_core::CoreError;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Configuration loader with runtime refresh support.
///
/// Configuration is loaded from multiple sources in order:
/// 1. `{config_dir}/default.toml` - default values
/// 2. `{config_dir}/{environment}.toml` - environment-specific overrides
/// 3. `{config_dir}/local.toml` - local overrides, not committed
/// 4. Environment variables with the given prefix (double-underscore separated)
#[derive(Clone)]
pub struct ConfigLoader<T> {
    config: Arc<RwLock<T>>,
    config_dir: String,
    env_prefix: String,
    _marker: PhantomData<T>,
}

impl<T> ConfigLoader<T>
where
    T: DeserializeOwned + serde::Serialize + Default + Clone + Send + Sync + 'static,
{
    /// Creates a new configuration loader rooted at `config_dir`, reading
    /// environment variable overrides prefixed with `env_prefix`.
    pub fn new(config_dir: impl Into<String>, env_prefix: impl Into<String>) -> Result<Self, CoreError> {
        let config_dir = config_dir.into();
        let env_prefix = env_prefix.into();
        let config = Self::load_config(&config_dir, &env_prefix)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
            env_prefix,
            _marker: PhantomData,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location(env_prefix: impl Into<String>) -> Result<Self, CoreError> {
        Self::new("./config", env_prefix)
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> T {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> Result<(), CoreError> {
        let new_config = Self::load_config(&self.config_dir, &self.env_prefix)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("configuration reloaded successfully");
        Ok(())
    }

    fn load_config(config_dir: &str, env_prefix: &str) -> Result<T, CoreError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("no .env file found or error loading it: {}", e);
        }

        let environment = std::env::var(format!("{env_prefix}_ENVIRONMENT"))
            .unwrap_or_else(|_| "development".to_string());

        info!("loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        let default_path = format!("{config_dir}/default.toml");
        if Path::new(&default_path).exists() {
            debug!("loading default config from: {}", default_path);
            builder = builder.add_source(File::with_name(&default_path).required(false));
        }

        let env_path = format!("{config_dir}/{environment}.toml");
        if Path::new(&env_path).exists() {
            debug!("loading environment config from: {}", env_path);
            builder = builder.add_source(File::with_name(&env_path).required(false));
        }

        let local_path = format!("{config_dir}/local.toml");
        if Path::new(&local_path).exists() {
            debug!("loading local config from: {}", local_path);
            builder = builder.add_source(File::with_name(&local_path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_core_error)?;

        config.try_deserialize().map_err(config_error_to_core_error)
    }

    /// Gets a specific configuration value by dotted key path.
    pub async fn get_value<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }
}

fn config_error_to_core_error(err: ConfigError) -> CoreError {
    CoreError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct SampleConfig {
        #[serde(default = "default_port")]
        port: u16,
    }

    fn default_port() -> u16 {
        7000
    }

    #[tokio::test]
    async fn loads_defaults_without_any_file() {
        let loader: ConfigLoader<SampleConfig> =
            ConfigLoader::new("./nonexistent-config-dir", "FORGEQUEUE_TEST").unwrap();
        let config = loader.get().await;
        assert_eq!(config.port, 7000);
    }

    #[tokio::test]
    async fn env_override_applies() {
        std::env::set_var("FORGEQUEUE_TEST2__PORT", "9999");
        let loader: ConfigLoader<SampleConfig> =
            ConfigLoader::new("./nonexistent-config-dir", "FORGEQUEUE_TEST2").unwrap();
        let config = loader.get().await;
        assert_eq!(config.port, 9999);
        std::env::remove_var("FORGEQUEUE_TEST2__PORT");
    }
}
