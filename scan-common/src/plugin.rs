// SPDX-License-Identifier: Apache-2.0

//! The plugin contract: every bundled scan tool implements [`Plugin`]
//! and is registered by name in a static table built once at startup.
//!
//! This is an in-process trait rather than an out-of-process protocol —
//! registration maps a plugin's name directly to a `Box<dyn Plugin>`, so
//! adding a plugin means adding an entry to the table, not standing up a
//! separate service.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::{config::PluginConfig, error::Result, severity::Severity};

/// The subset of `ScanConfig` a plugin needs to pick a target: resolved once
/// by the runner and passed down, so a plugin never reaches back into the
/// full configuration document for something this narrow.
#[derive(Debug, Clone, Default)]
pub struct ScanTarget {
    pub ip: Option<String>,
    pub domain: Option<String>,
    pub network: Option<String>,
}

/// A single normalized finding, ready for classification and persistence.
#[derive(Debug, Clone)]
pub struct Finding {
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub service_name: Option<String>,
    pub state: Option<String>,
    pub fields: HashMap<String, String>,
}

impl Finding {
    /// The canonical merge key: entries sharing this key across
    /// sources describe the same observed service and should be coalesced.
    pub fn merge_key(&self) -> (Option<i32>, Option<String>, Option<String>) {
        (self.port, self.protocol.clone(), self.service_name.clone())
    }

    pub fn severity(&self) -> Severity {
        crate::severity::classify_severity(&self.fields)
    }
}

/// The result of a single plugin invocation: where its raw output landed,
/// and which invocation produced it. A plugin that runs multiple times per
/// scan (e.g. nmap across protocols, nikto across ports) returns one
/// `ScanOutcome` per invocation so the collector can merge within the
/// plugin's own artifact group instead of across a single bundled file.
pub struct ScanOutcome {
    pub output_path: std::path::PathBuf,
    pub source: Option<String>,
    pub port: Option<i32>,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    /// The name this plugin is registered under; must match `PluginConfig::name`.
    fn name(&self) -> &'static str;

    /// Whether the underlying tool is present on the host.
    async fn is_installed(&self) -> bool;

    /// The shell command(s) used to install the tool when missing or
    /// version-mismatched.
    fn install_command(&self, config: &PluginConfig) -> Vec<String>;

    /// Run the underlying tool against the configured target, writing its
    /// raw output to `output_dir` and returning one outcome per invocation.
    ///
    /// `registry` is a connection to the target registry, available so a
    /// dependent plugin running with `strict_dependencies` set can read
    /// targets an earlier wave discovered (or write ones it discovers
    /// itself). It's `None` whenever a caller hasn't wired up a database
    /// (e.g. most unit tests); plugins that don't consult the registry
    /// ignore it.
    async fn scan(
        &self,
        config: &PluginConfig,
        target: &ScanTarget,
        output_dir: &std::path::Path,
        registry: Option<&sqlx::PgPool>,
    ) -> Result<Vec<ScanOutcome>>;

    /// Parse a plugin's raw output file into normalized findings.
    fn parse(&self, raw: &[u8]) -> Result<Vec<Finding>>;

    /// Fields a report should surface for this plugin's findings, in order.
    /// Defaults to an empty list, which report builders treat as "use every
    /// field present."
    fn important_fields(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Column order for a tabular report view. Defaults to empty (no
    /// preferred order).
    fn column_order(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Fields that should be rendered wide (not truncated) in a report view.
    fn wide_fields(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Whether two entries sharing a merge key should actually be merged, or
    /// kept distinct despite the key collision. Defaults to always merging.
    fn should_merge_entries(&self, _a: &Finding, _b: &Finding) -> bool {
        true
    }

    /// Merge two findings that share a merge key. The default takes
    /// the second entry's fields, falling back to the first's where absent —
    /// plugins with richer merge semantics (e.g. per-source field unions)
    /// override this.
    fn merge_entries(&self, a: &Finding, b: &Finding) -> Finding {
        let mut fields = a.fields.clone();
        for (k, v) in &b.fields {
            fields.insert(k.clone(), v.clone());
        }
        Finding {
            port: a.port.or(b.port),
            protocol: a.protocol.clone().or_else(|| b.protocol.clone()),
            service_name: a.service_name.clone().or_else(|| b.service_name.clone()),
            state: b.state.clone().or_else(|| a.state.clone()),
            fields,
        }
    }

    /// A last-chance hook to adjust a plugin's full finding set after
    /// parsing and before handoff to the collector (e.g. registering
    /// discovered web targets). Defaults to a no-op.
    fn postprocess(&self, findings: Vec<Finding>, _raw: &Value) -> Vec<Finding> {
        findings
    }
}

/// The static registration table: plugin name to implementation.
///
/// Built once in each binary's `main`, not derived from configuration —
/// configuration only decides which registered names are *enabled*.
pub type PluginTable = HashMap<&'static str, Box<dyn Plugin>>;

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyPlugin;

    #[async_trait]
    impl Plugin for DummyPlugin {
        fn name(&self) -> &'static str {
            "dummy"
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
            output_dir: &std::path::Path,
            _registry: Option<&sqlx::PgPool>,
        ) -> Result<Vec<ScanOutcome>> {
            Ok(vec![ScanOutcome {
                output_path: output_dir.join("dummy.json"),
                source: None,
                port: None,
            }])
        }

        fn parse(&self, _raw: &[u8]) -> Result<Vec<Finding>> {
            Ok(Vec::new())
        }
    }

    fn finding(port: i32, protocol: &str, service: &str) -> Finding {
        Finding {
            port: Some(port),
            protocol: Some(protocol.to_string()),
            service_name: Some(service.to_string()),
            state: Some("open".to_string()),
            fields: HashMap::new(),
        }
    }

    #[test]
    fn findings_sharing_a_key_merge_by_default() {
        let plugin = DummyPlugin;
        let a = finding(80, "tcp", "http");
        let b = finding(80, "tcp", "http");
        assert_eq!(a.merge_key(), b.merge_key());
        let merged = plugin.merge_entries(&a, &b);
        assert_eq!(merged.port, Some(80));
    }

    #[tokio::test]
    async fn default_table_entry_round_trips() {
        let mut table: PluginTable = HashMap::new();
        table.insert("dummy", Box::new(DummyPlugin));
        let plugin = table.get("dummy").unwrap();
        assert!(plugin.is_installed().await);
    }
}
