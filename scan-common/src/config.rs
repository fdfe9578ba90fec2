// SPDX-License-Identifier: Apache-2.0

//! The configuration document and its loader.
//!
//! The document is parsed once into this typed value and then threaded
//! explicitly through the orchestrator, runner, plugins, and collector.
//! Nothing here is read from a process-global singleton.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub scan_config: ScanConfig,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub report_category_order: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ScanConfig {
    pub target_ip: Option<String>,
    pub target_domain: Option<String>,
    pub target_network: Option<String>,
    #[serde(default)]
    pub clear_db: bool,
    #[serde(default)]
    pub clear_logs: bool,
    #[serde(default)]
    pub report_formats: Vec<ReportFormat>,
    pub report_theme: Option<String>,
    #[serde(default)]
    pub open_report: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Html,
    Pdf,
    Txt,
    Terminal,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginConfig {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_category")]
    pub category: String,
    pub version: Option<String>,
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub strict_dependencies: bool,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub levels: HashMap<String, serde_json::Value>,
}

fn default_category() -> String {
    "General Info".to_string()
}

fn default_level() -> String {
    "easy".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(alias = "POSTGRES_HOST")]
    pub host: String,
    #[serde(alias = "POSTGRES_PORT")]
    pub port: u16,
    #[serde(alias = "POSTGRES_USER")]
    pub user: String,
    #[serde(alias = "POSTGRES_PASSWORD")]
    pub password: String,
    #[serde(alias = "POSTGRES_DB")]
    pub dbname: String,
}

impl DatabaseConfig {
    /// Assemble a libpq-compatible connection string for `sqlx::PgPool`.
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.dbname
        )
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigUnreadable {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config =
            serde_json::from_str(&text).map_err(|source| Error::ConfigMalformed {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.scan_config.target_ip.is_none() && self.scan_config.target_domain.is_none() {
            return Err(Error::ConfigMissingTarget);
        }
        Ok(())
    }

    pub fn enabled_plugins(&self) -> impl Iterator<Item = &PluginConfig> {
        self.plugins.iter().filter(|p| p.enabled)
    }

    pub fn plugin(&self, name: &str) -> Option<&PluginConfig> {
        self.plugins.iter().find(|p| p.name == name)
    }

    pub fn category_for(&self, plugin: &str) -> String {
        self.plugin(plugin)
            .map(|p| p.category.clone())
            .unwrap_or_else(default_category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"{
            "scan_config": { "target_ip": "10.0.0.1" },
            "plugins": [
                { "name": "nmap", "enabled": true, "depends_on": [], "strict_dependencies": false }
            ],
            "database": {
                "host": "localhost", "port": 5432, "user": "u", "password": "p", "dbname": "honeyscan"
            }
        }"#
    }

    #[test]
    fn parses_minimal_document() {
        let config: Config = serde_json::from_str(sample()).unwrap();
        assert_eq!(config.scan_config.target_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.plugins[0].category, "General Info");
    }

    #[test]
    fn rejects_missing_target() {
        let mut config: Config = serde_json::from_str(sample()).unwrap();
        config.scan_config.target_ip = None;
        config.scan_config.target_domain = None;
        assert!(matches!(config.validate(), Err(Error::ConfigMissingTarget)));
    }

    #[test]
    fn connection_string_interpolates_fields() {
        let config: Config = serde_json::from_str(sample()).unwrap();
        assert_eq!(
            config.database.connection_string(),
            "postgres://u:p@localhost:5432/honeyscan"
        );
    }
}
