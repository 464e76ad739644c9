use crate::core::rules::WriteRules;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::debug;

/// Which backend serves the store, and where its data lives.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    Document {
        path: PathBuf,
    },
    Relational {
        /// SQLite database path, or `:memory:`.
        connection: String,
        /// Create the investments foreign key with `ON DELETE CASCADE`.
        #[serde(default)]
        cascade_on_delete: bool,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct MigrationConfig {
    /// JSON document to migrate from.
    pub source: Option<PathBuf>,
    /// SQLite database to migrate into.
    pub target: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub rules: WriteRules,
    pub data_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "fundtrack", "fundtrack")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("dev", "fundtrack", "fundtrack")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    /// Relative storage and migration paths are resolved against the data
    /// directory.
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.resolve_paths()?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    fn resolve_paths(&mut self) -> Result<()> {
        let data_dir = self.default_data_path()?;
        match &mut self.storage {
            StorageConfig::Document { path } if path.is_relative() => {
                *path = data_dir.join(&*path);
            }
            StorageConfig::Relational { connection, .. } => {
                *connection = resolve_connection(&data_dir, connection);
            }
            StorageConfig::Document { .. } => {}
        }
        if let Some(source) = &mut self.migration.source {
            if source.is_relative() {
                *source = data_dir.join(&*source);
            }
        }
        if let Some(target) = &mut self.migration.target {
            *target = resolve_connection(&data_dir, target);
        }
        Ok(())
    }
}

fn resolve_connection(data_dir: &std::path::Path, connection: &str) -> String {
    if connection == ":memory:" || std::path::Path::new(connection).is_absolute() {
        connection.to_string()
    } else {
        data_dir.join(connection).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::AumPolicy;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
storage:
  backend: relational
  connection: "/var/lib/fundtrack/funds.db"
  cascade_on_delete: true
migration:
  source: "/var/lib/fundtrack/funds.json"
rules:
  aum_policy: derived
  fund_capacity: "1000000"
  capacity_overrides:
    flagship: "5000000"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(
            config.storage,
            StorageConfig::Relational {
                connection: "/var/lib/fundtrack/funds.db".to_string(),
                cascade_on_delete: true,
            }
        );
        assert_eq!(
            config.migration.source,
            Some(PathBuf::from("/var/lib/fundtrack/funds.json"))
        );
        assert!(config.migration.target.is_none());
        assert_eq!(config.rules.aum_policy, AumPolicy::Derived);
        assert_eq!(config.rules.fund_capacity, Some(Decimal::from(1_000_000)));
        assert_eq!(
            config.rules.capacity_overrides.get("flagship"),
            Some(&Decimal::from(5_000_000))
        );
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let yaml_str = r#"
storage:
  backend: document
  path: funds.json
"#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(config.rules, WriteRules::default());
        assert_eq!(config.migration, MigrationConfig::default());
        assert!(config.data_path.is_none());
    }

    #[test]
    fn test_relative_paths_resolve_against_data_path() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.yaml");
        let data_dir = temp_dir.path().join("data");
        std::fs::write(
            &config_path,
            format!(
                "storage:\n  backend: document\n  path: funds.json\n\
                 migration:\n  target: funds.db\n\
                 data_path: {}\n",
                data_dir.display()
            ),
        )?;

        let config = AppConfig::load_from_path(&config_path)?;
        assert_eq!(
            config.storage,
            StorageConfig::Document {
                path: data_dir.join("funds.json")
            }
        );
        assert_eq!(
            config.migration.target,
            Some(data_dir.join("funds.db").display().to_string())
        );
        Ok(())
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let yaml_str = "storage:\n  backend: mongo\n  path: x\n";
        assert!(serde_yaml::from_str::<AppConfig>(yaml_str).is_err());
    }
}
