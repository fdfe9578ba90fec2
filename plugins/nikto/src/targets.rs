// SPDX-License-Identifier: Apache-2.0

//! Target selection: which `(address, port, protocol)` triples nikto should
//! point at, either read from the registry (when nmap's results are
//! trusted via `strict_dependencies`) or derived from nikto's own level
//! configuration.

use scan_common::{
    error::Result,
    registry::{self, TargetFilter},
};
use serde_json::Value;
use sqlx::PgPool;

/// Read registry entries nmap tagged as HTTP/HTTPS for this target, guessing
/// the protocol from the port when no explicit tag is present.
pub async fn from_registry(pool: &PgPool, target: &str) -> Result<Vec<(String, i32, String)>> {
    let filter = TargetFilter {
        source_plugin: Some("nmap".to_string()),
        status: Some("new".to_string()),
        protocol: Some("tcp".to_string()),
        tags: vec!["web".to_string()],
        ..Default::default()
    };
    let entries = registry::get_targets(pool, &filter).await?;

    let mut out = Vec::new();
    for entry in entries {
        if entry.address != target {
            continue;
        }
        let Some(port) = entry.port else { continue };
        let proto = if port == 443 { "https" } else { "http" };
        out.push((entry.address.clone(), port, proto.to_string()));
    }
    Ok(out)
}

/// Derive targets from nikto's own configured port lists, for the
/// non-strict (no upstream dependency trusted) case.
pub fn from_level_config(level_config: &Value, target_type: &str, target: &str) -> Vec<(String, i32, String)> {
    let mut out = Vec::new();
    for proto in ["http", "https"] {
        let Some(conf) = proto_config(level_config, target_type, proto) else {
            continue;
        };
        if !conf.get("enabled").and_then(Value::as_bool).unwrap_or(false) {
            continue;
        }
        let Some(ports) = conf.get("ports").and_then(Value::as_array) else {
            continue;
        };
        for port in ports.iter().filter_map(Value::as_i64) {
            out.push((target.to_string(), port as i32, proto.to_string()));
        }
    }
    out
}

pub fn proto_config<'a>(level_config: &'a Value, target_type: &str, proto: &str) -> Option<&'a Value> {
    level_config.get(target_type)?.get(proto)
}

pub fn build_args(flags: &str, port: i32, tuning: &str) -> String {
    let parts: Vec<String> = [
        if tuning.is_empty() {
            String::new()
        } else {
            format!("-Tuning {tuning}")
        },
        flags.to_string(),
        format!("-p {port}"),
    ]
    .into_iter()
    .filter(|p| !p.is_empty())
    .collect();
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_level_config_collects_enabled_protocols() {
        let level_config = serde_json::json!({
            "ip": {
                "http": {"enabled": true, "ports": [80, 8080]},
                "https": {"enabled": false, "ports": [443]},
            }
        });
        let targets = from_level_config(&level_config, "ip", "10.0.0.1");
        assert_eq!(targets.len(), 2);
        assert!(targets.contains(&("10.0.0.1".to_string(), 80, "http".to_string())));
    }

    #[test]
    fn build_args_includes_tuning_and_port() {
        let args = build_args("-ask no", 80, "1,2,3");
        assert!(args.contains("-Tuning 1,2,3"));
        assert!(args.contains("-p 80"));
        assert!(args.contains("-ask no"));
    }
}
