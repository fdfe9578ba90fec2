// SPDX-License-Identifier: Apache-2.0

//! The `nmap` plugin: port and service discovery via `nmap`'s XML report
//! format, with the richest merge semantics of the bundled plugins — two
//! entries sharing a `(port, protocol, service_name)` key are only merged
//! when every other important field agrees; otherwise they're kept distinct
//! under an extended key so a real disagreement between runs isn't silently
//! dropped.

use std::{collections::HashMap, path::Path};

use async_trait::async_trait;
use log::info;
use scan_common::{
    config::PluginConfig,
    error::{Error, Result},
    plugin::{Finding, Plugin, ScanOutcome, ScanTarget},
    subprocess,
};
use serde_json::Value;

mod parse;
mod script_output;

pub use script_output::format_script_output;

pub struct NmapPlugin;

/// Fields the canonical merge compares for agreement, in the order the
/// original tool reported them.
const IMPORTANT_FIELDS: &[&str] = &[
    "port",
    "protocol",
    "state",
    "reason",
    "service_name",
    "product",
    "version",
    "extra",
    "cpe",
    "script_output",
];

fn is_blank(value: Option<&String>) -> bool {
    matches!(
        value.map(String::as_str),
        None | Some("-") | Some("") | Some("null") | Some("None") | Some("0")
    )
}

#[async_trait]
impl Plugin for NmapPlugin {
    fn name(&self) -> &'static str {
        "nmap"
    }

    async fn is_installed(&self) -> bool {
        subprocess::is_tool_installed("nmap")
    }

    fn install_command(&self, _config: &PluginConfig) -> Vec<String> {
        vec!["apt-get".to_string(), "install".to_string(), "-y".to_string(), "nmap".to_string()]
    }

    async fn scan(
        &self,
        config: &PluginConfig,
        target: &ScanTarget,
        output_dir: &Path,
        registry: Option<&sqlx::PgPool>,
    ) -> Result<Vec<ScanOutcome>> {
        let level_config = config
            .levels
            .get(&config.level)
            .cloned()
            .unwrap_or(Value::Null);

        std::fs::create_dir_all(output_dir).ok();
        let mut outcomes = Vec::new();

        for (target_kind, target) in [
            ("ip", target.ip.as_deref()),
            ("domain", target.domain.as_deref()),
            ("network", target.network.as_deref()),
        ] {
            let Some(target) = target else { continue };
            let Some(protocols) = level_config.get(target_kind).and_then(Value::as_object) else {
                continue;
            };
            for (proto, proto_conf) in protocols {
                if !proto_conf.get("enabled").and_then(Value::as_bool).unwrap_or(true) {
                    continue;
                }
                let Some(flags) = proto_conf.get("flags").and_then(Value::as_str) else {
                    continue;
                };
                let full_args = build_args(flags, proto_conf);
                let source = format!("{target_kind}_{proto}");
                info!(target: "nmap", "running nmap against {target}: {full_args}");

                let mut argv: Vec<String> = full_args.split_whitespace().map(str::to_string).collect();
                argv.push(target.to_string());
                let output = subprocess::run_timed("nmap", "nmap", &{
                    let mut a = vec!["-oX".to_string(), "-".to_string()];
                    a.extend(argv);
                    a
                })
                .await?;
                if !output.success {
                    return Err(Error::PluginScanFailed {
                        plugin: "nmap".to_string(),
                        reason: String::from_utf8_lossy(&output.stderr).into_owned(),
                    });
                }
                let xml = String::from_utf8_lossy(&output.stdout).into_owned();

                if let Some(pool) = registry {
                    if let Ok(entries) = parse::parse_xml(&xml, &source) {
                        for entry in &entries {
                            let is_web = entry.state.as_deref() == Some("open")
                                && entry.protocol.as_deref() == Some("tcp")
                                && matches!(
                                    entry.service_name.as_deref().map(str::to_lowercase).as_deref(),
                                    Some("http") | Some("https")
                                );
                            if is_web {
                                let _ = scan_common::registry::add_target(
                                    pool,
                                    target_kind,
                                    target,
                                    entry.port,
                                    entry.protocol.as_deref(),
                                    "nmap",
                                    &["web".to_string()],
                                    &Value::Null,
                                    "new",
                                )
                                .await;
                            }
                        }
                    }
                }

                let output_path = output_dir.join(format!("nmap-{source}.json"));
                let body = serde_json::json!({ "source": source, "xml": xml });
                std::fs::write(&output_path, serde_json::to_vec_pretty(&body).unwrap()).map_err(|e| {
                    Error::PluginScanFailed {
                        plugin: "nmap".to_string(),
                        reason: e.to_string(),
                    }
                })?;

                outcomes.push(ScanOutcome {
                    output_path,
                    source: Some(source),
                    port: None,
                });
            }
        }

        Ok(outcomes)
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Finding>> {
        let document: Value = serde_json::from_slice(raw).map_err(|e| Error::PluginParseFailed {
            plugin: "nmap".to_string(),
            reason: e.to_string(),
        })?;
        let source = document.get("source").and_then(Value::as_str).unwrap_or("unknown");
        let xml = document.get("xml").and_then(Value::as_str).unwrap_or_default();
        parse::parse_xml(xml, source).map_err(|e| Error::PluginParseFailed {
            plugin: "nmap".to_string(),
            reason: e,
        })
    }

    fn important_fields(&self) -> Vec<&'static str> {
        IMPORTANT_FIELDS.to_vec()
    }

    fn column_order(&self) -> Vec<&'static str> {
        IMPORTANT_FIELDS.to_vec()
    }

    fn wide_fields(&self) -> Vec<&'static str> {
        vec!["script_output"]
    }

    fn should_merge_entries(&self, a: &Finding, b: &Finding) -> bool {
        for field in IMPORTANT_FIELDS {
            let v1 = a.fields.get(*field);
            let v2 = b.fields.get(*field);
            if is_blank(v1) && is_blank(v2) {
                continue;
            }
            if v1 != v2 {
                return false;
            }
        }
        true
    }

    fn merge_entries(&self, a: &Finding, b: &Finding) -> Finding {
        let mut fields = a.fields.clone();

        let merged_source = match (a.fields.get("source"), b.fields.get("source")) {
            (Some(sa), Some(sb)) => Some(merge_sources(sa, sb)),
            (Some(sa), None) => Some(sa.clone()),
            (None, Some(sb)) => Some(sb.clone()),
            (None, None) => None,
        };
        if let Some(source) = merged_source {
            fields.insert("source".to_string(), source);
        }

        if let (Some(sa), Some(sb)) = (a.fields.get("script_output"), b.fields.get("script_output")) {
            if sa != sb {
                let combined = format!("{sa}\n\n{sb}");
                fields.insert("script_output".to_string(), format_script_output(&combined));
            }
        }

        Finding {
            port: a.port.or(b.port),
            protocol: a.protocol.clone().or_else(|| b.protocol.clone()),
            service_name: a.service_name.clone().or_else(|| b.service_name.clone()),
            state: a.state.clone().or_else(|| b.state.clone()),
            fields,
        }
    }
}

fn merge_sources(a: &str, b: &str) -> String {
    let mut parts: Vec<&str> = a.split('+').chain(b.split('+')).collect();
    parts.sort_unstable();
    parts.dedup();
    parts.join("+")
}

fn build_args(flags: &str, proto_conf: &Value) -> String {
    let ports: Vec<String> = proto_conf
        .get("ports")
        .and_then(Value::as_array)
        .map(|ports| ports.iter().filter_map(normalize_port).collect())
        .unwrap_or_default();
    let ports_str = if ports.is_empty() {
        String::new()
    } else {
        format!("-p {}", ports.join(","))
    };

    let mut script_names = Vec::new();
    let mut script_args = Vec::new();
    if let Some(scripts) = proto_conf.get("scripts").and_then(Value::as_array) {
        for script in scripts {
            if let Some(name) = script.as_str() {
                script_names.push(name.to_string());
            } else if let Some(obj) = script.as_object() {
                if let Some(name) = obj.get("name").and_then(Value::as_str) {
                    script_names.push(name.to_string());
                    if let Some(args) = obj.get("args").and_then(Value::as_str) {
                        if !args.is_empty() {
                            script_args.push(args.replace('"', "'"));
                        }
                    }
                }
            }
        }
    }

    let parts: Vec<String> = [
        flags.to_string(),
        ports_str,
        if script_names.is_empty() {
            String::new()
        } else {
            format!("--script {}", script_names.join(","))
        },
        if script_args.is_empty() {
            String::new()
        } else {
            format!("--script-args {}", script_args.join(","))
        },
    ]
    .into_iter()
    .filter(|p| !p.is_empty())
    .collect();

    parts.join(" ")
}

fn normalize_port(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if s.contains('-') => Some(s.clone()),
        Value::String(s) => s.parse::<i64>().ok().map(|n| n.to_string()),
        _ => None,
    }
}

/// Exposed so the collector can apply the canonical merge without going
/// through the full `Plugin` trait, when operating on entries already
/// grouped by key. Kept for parity with the per-plugin view helpers.
pub fn important_field_map(finding: &Finding) -> HashMap<&'static str, Option<&String>> {
    IMPORTANT_FIELDS
        .iter()
        .map(|f| (*f, finding.fields.get(*f)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn finding(fields: &[(&str, &str)]) -> Finding {
        Finding {
            port: Some(80),
            protocol: Some("tcp".to_string()),
            service_name: Some("http".to_string()),
            state: Some("open".to_string()),
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn identical_entries_are_mergeable() {
        let plugin = NmapPlugin;
        let a = finding(&[("product", "nginx"), ("version", "1.18")]);
        let b = finding(&[("product", "nginx"), ("version", "1.18")]);
        assert!(plugin.should_merge_entries(&a, &b));
    }

    #[test]
    fn disagreeing_entries_are_not_mergeable() {
        let plugin = NmapPlugin;
        let a = finding(&[("product", "nginx")]);
        let b = finding(&[("product", "apache")]);
        assert!(!plugin.should_merge_entries(&a, &b));
    }

    #[test]
    fn blank_on_both_sides_does_not_block_merge() {
        let plugin = NmapPlugin;
        let a = finding(&[("product", "-")]);
        let b = finding(&[("product", "")]);
        assert!(plugin.should_merge_entries(&a, &b));
    }

    #[test]
    fn merge_unions_source_labels() {
        let plugin = NmapPlugin;
        let a = finding(&[("source", "ip_tcp")]);
        let b = finding(&[("source", "domain_tcp")]);
        let merged = plugin.merge_entries(&a, &b);
        assert_eq!(merged.fields.get("source").unwrap(), "domain_tcp+ip_tcp");
    }

    #[test]
    fn normalize_port_handles_ranges_and_numbers() {
        assert_eq!(normalize_port(&Value::from(80)), Some("80".to_string()));
        assert_eq!(normalize_port(&Value::from("1-1024")), Some("1-1024".to_string()));
    }

    #[test]
    fn build_args_combines_flags_ports_and_scripts() {
        let conf = serde_json::json!({
            "enabled": true,
            "ports": [80, 443],
            "scripts": ["http-title", {"name": "ssl-cert", "args": "foo=\"bar\""}]
        });
        let args = build_args("-sV", &conf);
        assert!(args.contains("-sV"));
        assert!(args.contains("-p 80,443"));
        assert!(args.contains("--script http-title,ssl-cert"));
        assert!(args.contains("--script-args foo='bar'"));
    }

    #[test]
    fn important_field_map_covers_every_declared_field() {
        let f = finding(&[]);
        let map = important_field_map(&f);
        assert_eq!(map.len(), IMPORTANT_FIELDS.len());
    }
}
