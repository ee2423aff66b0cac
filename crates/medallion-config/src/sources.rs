// Configuration source loading.
//
// Priority order:
// 1. Environment variables (MEDALLION_* prefix)
// 2. Config file path from MEDALLION_CONFIG
// 3. Inline config content from MEDALLION_CONFIG_CONTENT
// 4. Default config file (./medallion.toml)
// 5. Built-in defaults

use crate::env_overrides::{self, EnvSource, ENV_PREFIX};
use crate::RuntimeConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "./medallion.toml";

/// Load configuration using native environment/file access.
pub fn load_config() -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::default();

    if let Some(file_config) = load_from_file()? {
        config.merge(file_config);
    }

    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    config.validate()?;
    Ok(config)
}

fn load_from_file() -> Result<Option<RuntimeConfig>> {
    if let Ok(path) = env::var(format!("{}CONFIG", ENV_PREFIX)) {
        return read_toml_file(Path::new(&path)).map(Some);
    }

    if let Ok(content) = env::var(format!("{}CONFIG_CONTENT", ENV_PREFIX)) {
        let config: RuntimeConfig = toml::from_str(&content)
            .context("Failed to parse inline config from MEDALLION_CONFIG_CONTENT")?;
        return Ok(Some(config));
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        return read_toml_file(default_path).map(Some);
    }

    Ok(None)
}

fn read_toml_file(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load configuration from a specific file path (for the CLI --config flag).
///
/// Unlike `load_config()`, a missing file is an error. Environment overrides
/// still apply on top of the file.
pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::default();
    config.merge(read_toml_file(path.as_ref())?);

    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;

    config.validate()?;
    Ok(config)
}

struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }

    fn get_raw(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}
