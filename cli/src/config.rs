// Configuration management for the kanon CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/kanon/config.json
// - Linux: ~/.config/kanon/config.json
// - Windows: %APPDATA%\kanon\config.json

use anyhow::{Context, Result};
use kanon_core::KAnonConfig;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "kanon";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub engine: KAnonConfig,
    path: PathBuf,
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join(APP_DIR);

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join(APP_DIR);

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_dir()?.join("config.json"))
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            let contents = std::fs::read_to_string(&path).context("Failed to read config file")?;
            let engine: KAnonConfig =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(Self { engine, path })
        } else {
            let config = Self {
                engine: KAnonConfig::default(),
                path,
            };
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(&self.engine).context("Failed to serialize config")?;
        std::fs::write(&self.path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value by key. The result must still validate.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut fields = self.fields()?;
        let current = fields
            .get(key)
            .with_context(|| format!("Unknown config key: {}", key))?;

        let parsed = match current {
            Value::Bool(_) => Value::Bool(value.parse().context("Invalid boolean value")?),
            Value::Number(_) => Value::Number(
                value
                    .parse::<u64>()
                    .context("Invalid number")?
                    .into(),
            ),
            _ => Value::String(value.to_string()),
        };
        fields.insert(key.to_string(), parsed);

        let updated: KAnonConfig = serde_json::from_value(Value::Object(fields))
            .with_context(|| format!("Invalid value for {}: {}", key, value))?;
        updated.validate().context("Configuration rejected")?;

        self.engine = updated;
        self.save()
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.fields().ok()?.get(key).map(render)
    }

    /// List all config values, sorted by key
    pub fn list(&self) -> Vec<(String, String)> {
        self.fields()
            .map(|fields| fields.iter().map(|(k, v)| (k.clone(), render(v))).collect())
            .unwrap_or_default()
    }

    fn fields(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(&self.engine).context("Failed to serialize config")? {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("Config did not serialize to an object"),
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
