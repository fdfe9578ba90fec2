// SPDX-License-Identifier: Apache-2.0

//! The `nuclei` plugin: template-based vulnerability matching against the
//! configured domain. Unlike the port-oriented plugins, a nuclei finding
//! has no `(port, protocol)` identity — it's keyed purely on the matched
//! template and host, so it's never merged with another plugin's entries.

use std::path::Path;

use async_trait::async_trait;
use scan_common::{
    config::PluginConfig,
    error::{Error, Result},
    plugin::{Finding, Plugin, ScanOutcome, ScanTarget},
    subprocess,
};
use serde_json::Value;
use sqlx::PgPool;

pub struct NucleiPlugin;

const COLUMN_ORDER: &[&str] = &["templateID", "info.name", "info.severity", "matched-at", "type", "host"];

#[async_trait]
impl Plugin for NucleiPlugin {
    fn name(&self) -> &'static str {
        "nuclei"
    }

    async fn is_installed(&self) -> bool {
        subprocess::is_tool_installed("nuclei")
    }

    fn install_command(&self, _config: &PluginConfig) -> Vec<String> {
        vec![
            "go".to_string(),
            "install".to_string(),
            "-v".to_string(),
            "github.com/projectdiscovery/nuclei/v3/cmd/nuclei@latest".to_string(),
        ]
    }

    async fn scan(
        &self,
        _config: &PluginConfig,
        target: &ScanTarget,
        output_dir: &Path,
        _registry: Option<&PgPool>,
    ) -> Result<Vec<ScanOutcome>> {
        let target = target.domain.as_deref().ok_or(Error::ConfigMissingTarget)?;

        let argv = vec![
            "-u".to_string(),
            format!("http://{target}"),
            "-jsonl".to_string(),
            "-t".to_string(),
            "/root/nuclei-templates".to_string(),
        ];
        let output = subprocess::run_timed("nuclei", "nuclei", &argv).await?;
        if !output.success {
            return Err(Error::PluginScanFailed {
                plugin: "nuclei".to_string(),
                reason: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        std::fs::create_dir_all(output_dir).ok();
        let output_path = output_dir.join("nuclei.jsonl");
        std::fs::write(&output_path, &output.stdout).map_err(|e| Error::PluginScanFailed {
            plugin: "nuclei".to_string(),
            reason: e.to_string(),
        })?;

        Ok(vec![ScanOutcome {
            output_path,
            source: None,
            port: None,
        }])
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Finding>> {
        let text = String::from_utf8_lossy(raw);
        let mut findings = Vec::new();

        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let entry: Value = serde_json::from_str(line).map_err(|e| Error::PluginParseFailed {
                plugin: "nuclei".to_string(),
                reason: e.to_string(),
            })?;

            let mut fields = std::collections::HashMap::new();
            fields.insert(
                "templateID".to_string(),
                entry.get("templateID").and_then(Value::as_str).unwrap_or("-").to_string(),
            );
            let info = entry.get("info");
            fields.insert(
                "info.name".to_string(),
                info.and_then(|i| i.get("name")).and_then(Value::as_str).unwrap_or("-").to_string(),
            );
            fields.insert(
                "info.severity".to_string(),
                info.and_then(|i| i.get("severity")).and_then(Value::as_str).unwrap_or("-").to_string(),
            );
            fields.insert(
                "matched-at".to_string(),
                entry.get("matched-at").and_then(Value::as_str).unwrap_or("-").to_string(),
            );
            fields.insert(
                "type".to_string(),
                entry.get("type").and_then(Value::as_str).unwrap_or("-").to_string(),
            );
            let host = entry.get("host").and_then(Value::as_str).unwrap_or("-").to_string();
            fields.insert("host".to_string(), host.clone());

            findings.push(Finding {
                port: None,
                protocol: None,
                service_name: None,
                state: None,
                fields,
            });
        }

        Ok(findings)
    }

    fn column_order(&self) -> Vec<&'static str> {
        COLUMN_ORDER.to_vec()
    }

    fn should_merge_entries(&self, _a: &Finding, _b: &Finding) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_jsonl_lines_into_findings() {
        let plugin = NucleiPlugin;
        let line = serde_json::json!({
            "templateID": "exposed-panel",
            "info": {"name": "Exposed Admin Panel", "severity": "high"},
            "matched-at": "http://example.test/admin",
            "type": "http",
            "host": "example.test",
        });
        let raw = format!("{}\n", line);
        let findings = plugin.parse(raw.as_bytes()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].fields.get("info.severity").unwrap(), "high");
    }

    #[test]
    fn blank_lines_are_skipped() {
        let plugin = NucleiPlugin;
        let findings = plugin.parse(b"\n\n").unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn nuclei_entries_never_merge() {
        let plugin = NucleiPlugin;
        let f = Finding {
            port: None,
            protocol: None,
            service_name: None,
            state: None,
            fields: Default::default(),
        };
        assert!(!plugin.should_merge_entries(&f, &f));
    }
}
