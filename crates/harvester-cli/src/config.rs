//! Configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use harvester_http::RegistryConfig;
use harvester_pipeline::HarvestConfig;
use serde::Deserialize;

/// Contents of `harvester.toml`
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub harvest: HarvestConfig,
    /// Endpoint layout; required for a run, optional for `--show-config`
    pub registry: Option<RegistryConfig>,
}

impl FileConfig {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./harvester.toml (current directory)
    /// 2. ~/.config/harvester/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("harvester.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "harvester") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: FileConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_config() {
        let config = FileConfig::default();
        assert_eq!(config.harvest.output_dir, PathBuf::from("./data"));
        assert!(config.registry.is_none());
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[harvest]
max_workers_per_stage = 4
primary_map_capacity = 5000
total_run_timeout_secs = 3600
category_filter = ["12", "13"]
output_dir = "/tmp/harvest"

[harvest.requests_per_second]
list = 2.0

[harvest.retry]
max_attempts = 6
base_delay_ms = 250

[harvest.reporting_period]
start = "2025-01-01"
end = "2025-01-31"

[registry]
base_url = "https://registry.example/api"
id_pointer = "/owner/id"

[registry.reference]
operation = "reference"
url = "{base}/codes"
combinations_pointer = "/codes/*"
category_pointer = "/category"
subtype_pointer = "/subtype"

[registry.list]
operation = "list"
url = "{base}/items?c={category}&s={subtype}&o={cursor}&n={page_size}"
items_pointer = "/items/*"
continuation_pointer = "/more"

[registry.resolve]
operation = "item"
url = "{base}/items/{key}"

[registry.item_details]
operation = "item details"
url = "{base}/items/{key}/details"

[[registry.resolved_details]]
operation = "owner"
url = "{base}/owners/{key}"

[[registry.resolved_details]]
operation = "owner activity"
url = "{base}/owners/{key}/activity?from={start}&to={end}"
"#;
        let config: FileConfig = toml::from_str(toml).unwrap();
        let harvest = &config.harvest;
        assert_eq!(harvest.max_workers_per_stage, 4);
        assert_eq!(harvest.primary_map_capacity, Some(5000));
        assert_eq!(harvest.total_run_timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(harvest.requests_per_second["list"], 2.0);
        assert_eq!(harvest.retry.max_attempts, 6);
        assert_eq!(harvest.retry.base_delay, Duration::from_millis(250));
        assert_eq!(harvest.page_size, 100);
        assert!(harvest.validate().is_ok());

        let registry = config.registry.unwrap();
        assert_eq!(registry.list.continuation_pointer.as_deref(), Some("/more"));
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvester.toml");
        std::fs::write(&path, "[harvest]\npage_size = \"many\"\n").unwrap();
        let err = FileConfig::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = FileConfig::from_file(Path::new("/nonexistent/harvester.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
