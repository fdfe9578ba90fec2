// SPDX-License-Identifier: Apache-2.0

//! The `nikto` plugin: web-vulnerability scanning against ports nmap has
//! already identified as HTTP/HTTPS (`strict_dependencies`) or, failing
//! that, its own configured port list. Entries are never merged with each
//! other — every finding nikto reports is distinct by design.

use std::path::Path;

use async_trait::async_trait;
use log::info;
use regex::Regex;
use scan_common::{
    config::PluginConfig,
    error::{Error, Result},
    plugin::{Finding, Plugin, ScanOutcome, ScanTarget},
};
use serde_json::Value;
use sqlx::PgPool;

mod targets;

pub struct NiktoPlugin;

const IMPORTANT_FIELDS: &[&str] = &["msg"];
const COLUMN_ORDER: &[&str] = &["source", "port", "url", "method", "msg", "id", "references"];
const WIDE_FIELDS: &[&str] = &["url", "msg", "references"];

/// Nikto emits JSON with stray backslashes its own parser tolerates but a
/// strict JSON reader rejects. Escape anything that isn't already a valid
/// escape sequence, and normalize bare CR/LF the same way nikto's own
/// fixer does.
pub fn fix_invalid_json_escapes(input: &str) -> String {
    let invalid_escape = Regex::new(r#"\\([^"\\/bfnrtu])"#).expect("valid regex");
    let escaped = invalid_escape.replace_all(input, r"\\$1");
    escaped.replace('\r', "\\r").replace('\n', "\\n")
}

#[async_trait]
impl Plugin for NiktoPlugin {
    fn name(&self) -> &'static str {
        "nikto"
    }

    async fn is_installed(&self) -> bool {
        scan_common::subprocess::is_tool_installed("nikto") && Path::new("/opt/nikto/program").exists()
    }

    fn install_command(&self, _config: &PluginConfig) -> Vec<String> {
        vec!["apt-get".to_string(), "install".to_string(), "-y".to_string(), "nikto".to_string()]
    }

    async fn scan(
        &self,
        config: &PluginConfig,
        target: &ScanTarget,
        output_dir: &Path,
        registry: Option<&PgPool>,
    ) -> Result<Vec<ScanOutcome>> {
        let level_config = config.levels.get(&config.level).cloned().unwrap_or(Value::Null);

        std::fs::create_dir_all(output_dir).ok();
        let mut outcomes = Vec::new();

        for (target_type, target) in [("ip", target.ip.as_deref()), ("domain", target.domain.as_deref())] {
            let Some(target) = target else { continue };

            let port_set = if config.strict_dependencies {
                match registry {
                    Some(pool) => targets::from_registry(pool, target).await?,
                    None => Vec::new(),
                }
            } else {
                targets::from_level_config(&level_config, target_type, target)
            };

            for (tgt, port, proto) in port_set {
                let conf = targets::proto_config(&level_config, target_type, &proto);
                let Some(conf) = conf else { continue };
                if !conf.get("enabled").and_then(Value::as_bool).unwrap_or(false) {
                    info!(target: "nikto", "skipping {tgt}:{port}/{proto} — not enabled");
                    continue;
                }
                let flags = conf.get("flags").and_then(Value::as_str).unwrap_or("");
                let tuning = conf.get("tuning").and_then(Value::as_str).unwrap_or("");
                let args = targets::build_args(flags, port, tuning);
                let source = format!("{target_type}_{proto}");

                let mut argv = vec!["-h".to_string(), tgt.clone()];
                argv.extend(args.split_whitespace().map(str::to_string));
                argv.extend(["-Format".to_string(), "json".to_string(), "-o".to_string(), "-".to_string()]);

                let output = scan_common::subprocess::run_timed("nikto", "nikto", &argv).await?;
                if !output.success {
                    return Err(Error::PluginScanFailed {
                        plugin: "nikto".to_string(),
                        reason: String::from_utf8_lossy(&output.stderr).into_owned(),
                    });
                }

                let output_path = output_dir.join(format!("nikto-{source}-{port}.json"));
                let body = serde_json::json!({
                    "source": source,
                    "port": port,
                    "body": String::from_utf8_lossy(&output.stdout),
                });
                std::fs::write(&output_path, serde_json::to_vec_pretty(&body).unwrap()).map_err(|e| {
                    Error::PluginScanFailed {
                        plugin: "nikto".to_string(),
                        reason: e.to_string(),
                    }
                })?;

                outcomes.push(ScanOutcome {
                    output_path,
                    source: Some(source),
                    port: Some(port),
                });
            }
        }

        Ok(outcomes)
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Finding>> {
        let report: Value = serde_json::from_slice(raw).map_err(|e| Error::PluginParseFailed {
            plugin: "nikto".to_string(),
            reason: e.to_string(),
        })?;

        let source = report.get("source").and_then(Value::as_str).unwrap_or("unknown");
        let port = report.get("port").and_then(Value::as_i64).map(|p| p as i32);
        let body = report.get("body").and_then(Value::as_str).unwrap_or_default();

        let fixed = fix_invalid_json_escapes(body);
        let Ok(items) = serde_json::from_str::<Vec<Value>>(&fixed) else {
            return Ok(Vec::new());
        };

        let mut findings = Vec::new();
        for item in items {
            let Some(vulns) = item.get("vulnerabilities").and_then(Value::as_array) else {
                continue;
            };
            for vuln in vulns {
                let mut fields = std::collections::HashMap::new();
                for (field, key) in [("url", "url"), ("method", "method"), ("msg", "msg"), ("id", "id"), ("references", "references")] {
                    if let Some(value) = vuln.get(key).and_then(Value::as_str) {
                        fields.insert(field.to_string(), value.to_string());
                    }
                }
                fields.insert("source".to_string(), source.to_string());

                findings.push(Finding {
                    port,
                    protocol: Some("tcp".to_string()),
                    service_name: None,
                    state: Some("open".to_string()),
                    fields,
                });
            }
        }

        Ok(findings)
    }

    fn important_fields(&self) -> Vec<&'static str> {
        IMPORTANT_FIELDS.to_vec()
    }

    fn column_order(&self) -> Vec<&'static str> {
        COLUMN_ORDER.to_vec()
    }

    fn wide_fields(&self) -> Vec<&'static str> {
        WIDE_FIELDS.to_vec()
    }

    fn should_merge_entries(&self, _a: &Finding, _b: &Finding) -> bool {
        false
    }
}
