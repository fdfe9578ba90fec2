// SPDX-License-Identifier: Apache-2.0

//! The run manifest: the single JSON artifact a runner writes and a
//! collector reads. It records, per plugin, how long the scan took and
//! where its raw output file landed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginDuration {
    pub plugin: String,
    pub duration_secs: f64,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactEntry {
    pub plugin: String,
    pub category: String,
    /// The invocation this artifact came from (e.g. `"ip_tcp"`), when a
    /// plugin runs more than once per scan. `None` for single-invocation
    /// plugins.
    #[serde(default)]
    pub source: Option<String>,
    /// The port this artifact's invocation targeted, when applicable.
    #[serde(default)]
    pub port: Option<i32>,
    /// Path to the plugin's raw output file, relative to the manifest itself.
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Manifest {
    pub target_ip: Option<String>,
    pub target_domain: Option<String>,
    pub target_network: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub artifacts: Vec<ArtifactEntry>,
    pub durations: Vec<PluginDuration>,
}

impl Manifest {
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).map_err(|source| Error::ManifestMalformed {
            path: path.display().to_string(),
            reason: source.to_string(),
        })?;
        std::fs::write(path, text).map_err(|source| Error::ManifestMalformed {
            path: path.display().to_string(),
            reason: source.to_string(),
        })
    }

    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|_| Error::ManifestMissing {
            path: path.display().to_string(),
        })?;
        serde_json::from_str(&text).map_err(|source| Error::ManifestMalformed {
            path: path.display().to_string(),
            reason: source.to_string(),
        })
    }

    /// Resolve an artifact's output path relative to the manifest's own
    /// directory, so a manifest can be moved alongside its artifacts.
    pub fn resolve_artifact_path(&self, manifest_path: impl AsRef<Path>, entry: &ArtifactEntry) -> PathBuf {
        let base = manifest_path
            .as_ref()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        base.join(&entry.output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_manifest() -> Manifest {
        Manifest {
            target_ip: Some("10.0.0.1".to_string()),
            target_domain: None,
            target_network: None,
            started_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            finished_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).unwrap(),
            artifacts: vec![ArtifactEntry {
                plugin: "nmap".to_string(),
                category: "Network".to_string(),
                source: Some("ip_tcp".to_string()),
                port: None,
                output_path: PathBuf::from("nmap.json"),
            }],
            durations: vec![PluginDuration {
                plugin: "nmap".to_string(),
                duration_secs: 12.5,
                succeeded: true,
            }],
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = sample_manifest();
        manifest.write_to(&path).unwrap();
        let loaded = Manifest::read_from(&path).unwrap();
        assert_eq!(loaded.artifacts.len(), 1);
        assert_eq!(loaded.artifacts[0].plugin, "nmap");
    }

    #[test]
    fn missing_manifest_is_reported_by_path() {
        let err = Manifest::read_from("/nonexistent/path/manifest.json").unwrap_err();
        assert!(matches!(err, Error::ManifestMissing { .. }));
    }

    #[test]
    fn resolves_artifact_path_relative_to_manifest_directory() {
        let manifest = sample_manifest();
        let resolved =
            manifest.resolve_artifact_path("/var/scan/run-1/manifest.json", &manifest.artifacts[0]);
        assert_eq!(resolved, PathBuf::from("/var/scan/run-1/nmap.json"));
    }
}
