// SPDX-License-Identifier: Apache-2.0

//! The `dig` plugin: DNS record enumeration. A reverse lookup for an IP
//! target, or a forward lookup plus (at `middle` level and above) a round
//! of DNSSEC/trace/TXT/DMARC/DKIM queries for a domain target.

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

mod answer;

pub struct DigPlugin;

const EXTRA_QUERY_LEVELS: &[&str] = &["middle", "hard", "extreme"];

fn is_ip(target: &str) -> bool {
    target.parse::<std::net::IpAddr>().is_ok()
}

#[async_trait]
impl Plugin for DigPlugin {
    fn name(&self) -> &'static str {
        "dig"
    }

    async fn is_installed(&self) -> bool {
        subprocess::is_tool_installed("dig")
    }

    fn install_command(&self, _config: &PluginConfig) -> Vec<String> {
        vec!["apt-get".to_string(), "install".to_string(), "-y".to_string(), "dnsutils".to_string()]
    }

    async fn scan(
        &self,
        config: &PluginConfig,
        target: &ScanTarget,
        output_dir: &Path,
        _registry: Option<&PgPool>,
    ) -> Result<Vec<ScanOutcome>> {
        let target = target
            .domain
            .as_deref()
            .or(target.ip.as_deref())
            .ok_or(Error::ConfigMissingTarget)?;

        let level_args = config
            .levels
            .get(&config.level)
            .and_then(|l| l.get("args"))
            .and_then(Value::as_str)
            .unwrap_or("");

        let mut entries = Vec::new();

        let primary_argv: Vec<String> = if is_ip(target) {
            vec!["-x".to_string(), target.to_string()]
        } else {
            let mut argv: Vec<String> = level_args.split_whitespace().map(str::to_string).collect();
            argv.push(target.to_string());
            argv
        };
        run_and_parse(&primary_argv, "answer", &mut entries).await?;

        if EXTRA_QUERY_LEVELS.contains(&config.level.as_str()) && !is_ip(target) {
            let extra_queries: Vec<Vec<String>> = vec![
                vec!["+dnssec".to_string(), target.to_string()],
                vec!["+trace".to_string(), target.to_string()],
                vec!["TXT".to_string(), target.to_string()],
                vec!["TXT".to_string(), format!("_dmarc.{target}")],
                vec!["TXT".to_string(), format!("default._domainkey.{target}")],
            ];
            for query in extra_queries {
                run_and_parse(&query, "extra", &mut entries).await?;
            }
        }

        std::fs::create_dir_all(output_dir).ok();
        let output_path = output_dir.join("dig.json");
        std::fs::write(&output_path, serde_json::to_vec_pretty(&entries).unwrap()).map_err(|e| {
            Error::PluginScanFailed {
                plugin: "dig".to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(vec![ScanOutcome {
            output_path,
            source: None,
            port: None,
        }])
    }

    fn parse(&self, raw: &[u8]) -> Result<Vec<Finding>> {
        let entries: Vec<Value> = serde_json::from_slice(raw).map_err(|e| Error::PluginParseFailed {
            plugin: "dig".to_string(),
            reason: e.to_string(),
        })?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let mut fields = std::collections::HashMap::new();
                for (field, key) in [("section", "section"), ("name", "name"), ("type", "type"), ("data", "data")] {
                    if let Some(value) = entry.get(key).and_then(Value::as_str) {
                        fields.insert(field.to_string(), value.to_string());
                    }
                }
                if let Some(ttl) = entry.get("ttl").and_then(Value::as_i64) {
                    fields.insert("ttl".to_string(), ttl.to_string());
                }
                Finding {
                    port: None,
                    protocol: None,
                    service_name: None,
                    state: None,
                    fields,
                }
            })
            .collect())
    }

    fn column_order(&self) -> Vec<&'static str> {
        vec!["section", "name", "ttl", "type", "data"]
    }

    fn should_merge_entries(&self, _a: &Finding, _b: &Finding) -> bool {
        false
    }
}

async fn run_and_parse(argv: &[String], default_section: &str, entries: &mut Vec<Value>) -> Result<()> {
    let output = subprocess::run_timed("dig", "dig", argv).await?;
    if !output.success {
        return Err(Error::PluginScanFailed {
            plugin: "dig".to_string(),
            reason: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    entries.extend(answer::parse_dig_output(&stdout, default_section));
    Ok(())
}
