// SPDX-License-Identifier: Apache-2.0

//! The collector: reads a runner's manifest, parses each plugin's raw
//! output, merges findings that describe the same service within that
//! plugin's own artifact group, and persists the result into `hosts` /
//! `services` / `vuln` / `evidence`. Also implements purge mode, which
//! clears prior run data instead of ingesting new data, and idempotent
//! schema setup for a fresh database.

use std::collections::HashMap;

use log::{info, warn};
use scan_common::{
    error::{Error, Result},
    manifest::{ArtifactEntry, Manifest},
    plugin::{Finding, Plugin, PluginTable},
};
use sqlx::PgPool;

/// Create every table the collector writes to, if it doesn't already
/// exist. Safe to call on every startup — a fresh database gets its
/// schema, an existing one is left untouched.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hosts (
            id BIGSERIAL PRIMARY KEY,
            ip TEXT,
            fqdn TEXT,
            os TEXT,
            meta JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| db_err("hosts", e))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS services (
            id BIGSERIAL PRIMARY KEY,
            host_id BIGINT NOT NULL REFERENCES hosts(id),
            port INTEGER,
            protocol TEXT,
            service_name TEXT,
            product TEXT,
            version TEXT,
            banner TEXT,
            plugin TEXT NOT NULL,
            meta JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| db_err("services", e))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vuln (
            id BIGSERIAL PRIMARY KEY,
            service_id BIGINT REFERENCES services(id),
            host_id BIGINT NOT NULL REFERENCES hosts(id),
            plugin TEXT NOT NULL,
            source TEXT,
            category TEXT NOT NULL,
            severity TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            refs TEXT[] NOT NULL DEFAULT '{}',
            meta JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| db_err("vuln", e))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS evidence (
            id BIGSERIAL PRIMARY KEY,
            vuln_id BIGINT NOT NULL REFERENCES vuln(id),
            plugin TEXT NOT NULL,
            log_type TEXT,
            log_path TEXT,
            raw_log TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| db_err("evidence", e))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS registry (
            id BIGSERIAL PRIMARY KEY,
            target_type TEXT NOT NULL,
            address TEXT NOT NULL,
            port INTEGER,
            protocol TEXT,
            source_plugin TEXT,
            status TEXT NOT NULL DEFAULT 'new',
            tags TEXT[] NOT NULL DEFAULT '{}',
            meta JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (target_type, address, port, protocol)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| db_err("registry", e))?;

    info!(target: "scancore::collector", "schema ensured");
    Ok(())
}

/// An entry is meaningful enough to persist if it carries any field beyond
/// the bare identity triple — an empty shell entry (port open, nothing
/// else observed) is noise, not a finding.
fn is_meaningful_entry(finding: &Finding) -> bool {
    !finding.fields.is_empty() || finding.state.as_deref() == Some("open")
}

fn non_blank(value: Option<&String>) -> bool {
    !matches!(value.map(String::as_str), None | Some("-") | Some("") | Some("null") | Some("None"))
}

/// A finding only gets a `services` row when it actually identifies one —
/// port, protocol, and service_name all present and non-sentinel. Findings
/// without that (e.g. a DNS record, a host-level nuclei match) attach to
/// the host directly via a `NULL` `service_id`.
fn has_service_identity(finding: &Finding) -> bool {
    finding.port.is_some() && non_blank(finding.protocol.as_ref()) && non_blank(finding.service_name.as_ref())
}

async fn get_or_create_host(pool: &PgPool, ip: Option<&str>, fqdn: Option<&str>) -> Result<i64> {
    if let Some(row) = sqlx::query_as::<_, (i64,)>(
        "SELECT id FROM hosts WHERE ip IS NOT DISTINCT FROM $1 AND fqdn IS NOT DISTINCT FROM $2",
    )
    .bind(ip)
    .bind(fqdn)
    .fetch_optional(pool)
    .await
    .map_err(|e| db_err("hosts", e))?
    {
        return Ok(row.0);
    }

    let row: (i64,) = sqlx::query_as("INSERT INTO hosts (ip, fqdn, created_at) VALUES ($1, $2, now()) RETURNING id")
        .bind(ip)
        .bind(fqdn)
        .fetch_one(pool)
        .await
        .map_err(|e| db_err("hosts", e))?;
    Ok(row.0)
}

/// Identity is `(host_id, port, protocol, service_name, plugin)` — the same
/// port/protocol pair observed by two different plugins is two distinct
/// service rows, since each plugin owns its own view of a service.
async fn get_or_create_service(
    pool: &PgPool,
    host_id: i64,
    port: Option<i32>,
    protocol: Option<&str>,
    service_name: Option<&str>,
    plugin: &str,
) -> Result<i64> {
    if let Some(row) = sqlx::query_as::<_, (i64,)>(
        "SELECT id FROM services WHERE host_id = $1 AND port IS NOT DISTINCT FROM $2 \
         AND protocol IS NOT DISTINCT FROM $3 AND service_name IS NOT DISTINCT FROM $4 AND plugin = $5",
    )
    .bind(host_id)
    .bind(port)
    .bind(protocol)
    .bind(service_name)
    .bind(plugin)
    .fetch_optional(pool)
    .await
    .map_err(|e| db_err("services", e))?
    {
        return Ok(row.0);
    }

    let row: (i64,) = sqlx::query_as(
        "INSERT INTO services (host_id, port, protocol, service_name, plugin, created_at) \
         VALUES ($1, $2, $3, $4, $5, now()) RETURNING id",
    )
    .bind(host_id)
    .bind(port)
    .bind(protocol)
    .bind(service_name)
    .bind(plugin)
    .fetch_one(pool)
    .await
    .map_err(|e| db_err("services", e))?;
    Ok(row.0)
}

#[allow(clippy::too_many_arguments)]
async fn create_vuln(
    pool: &PgPool,
    service_id: Option<i64>,
    host_id: i64,
    plugin: &str,
    source: Option<&str>,
    category: &str,
    severity: &str,
    title: &str,
    description: &str,
    refs: &[String],
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO vuln (service_id, host_id, plugin, source, category, severity, title, description, refs, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now()) RETURNING id",
    )
    .bind(service_id)
    .bind(host_id)
    .bind(plugin)
    .bind(source)
    .bind(category)
    .bind(severity)
    .bind(title)
    .bind(description)
    .bind(refs)
    .fetch_one(pool)
    .await
    .map_err(|e| db_err("vuln", e))?;
    Ok(row.0)
}

async fn create_evidence(
    pool: &PgPool,
    vuln_id: i64,
    plugin: &str,
    log_type: &str,
    log_path: Option<&str>,
    raw_log: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO evidence (vuln_id, plugin, log_type, log_path, raw_log, created_at) VALUES ($1, $2, $3, $4, $5, now())",
    )
    .bind(vuln_id)
    .bind(plugin)
    .bind(log_type)
    .bind(log_path)
    .bind(raw_log)
    .execute(pool)
    .await
    .map_err(|e| db_err("evidence", e))?;
    Ok(())
}

fn db_err(table: &str, source: sqlx::Error) -> Error {
    Error::CollectorRowInsertFailed {
        plugin: table.to_string(),
        reason: source.to_string(),
    }
}

/// Coalesce a single plugin's own artifact groups by merge key, via that
/// plugin's `should_merge_entries`/`merge_entries` hooks. Never called
/// across two different plugins' findings — each plugin owns its own
/// `vuln` rows, so a disagreement between nmap and nikto on the same port
/// is not this function's concern.
fn merge_within_plugin(plugin: &dyn Plugin, groups: Vec<Vec<Finding>>) -> Vec<Finding> {
    type Key = (Option<i32>, Option<String>, Option<String>);
    let mut merged: HashMap<Key, Finding> = HashMap::new();
    let mut disagreements = 0usize;

    for group in groups {
        for finding in group {
            let key = finding.merge_key();
            match merged.remove(&key) {
                Some(existing) => {
                    if plugin.should_merge_entries(&existing, &finding) {
                        merged.insert(key, plugin.merge_entries(&existing, &finding));
                    } else {
                        // Disagreement: keep both under distinct extended
                        // keys so neither observation is silently dropped.
                        disagreements += 1;
                        let extended_key = (key.0, key.1.clone(), Some(format!("{}::{disagreements}", key.2.clone().unwrap_or_default())));
                        merged.insert(key, existing);
                        merged.insert(extended_key, finding);
                    }
                }
                None => {
                    merged.insert(key, finding);
                }
            }
        }
    }

    merged.into_values().collect()
}

fn group_by_plugin(artifacts: &[ArtifactEntry]) -> Vec<(String, Vec<&ArtifactEntry>)> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<&ArtifactEntry>> = HashMap::new();
    for artifact in artifacts {
        grouped.entry(artifact.plugin.clone()).or_insert_with(Vec::new).push(artifact);
        if !order.contains(&artifact.plugin) {
            order.push(artifact.plugin.clone());
        }
    }
    order.into_iter().map(|name| {
        let entries = grouped.remove(&name).unwrap_or_default();
        (name, entries)
    }).collect()
}

/// Ingest a single run's manifest: parse each plugin's artifact group,
/// merge within that group, filter, and persist. Returns the number of
/// vulnerability rows written.
pub async fn process_manifest(pool: &PgPool, table: &PluginTable, manifest: &Manifest, manifest_path: &std::path::Path) -> Result<usize> {
    if manifest.target_ip.is_none() && manifest.target_domain.is_none() {
        return Err(Error::ConfigMissingTarget);
    }
    let host_id = get_or_create_host(pool, manifest.target_ip.as_deref(), manifest.target_domain.as_deref()).await?;

    let mut written = 0usize;

    for (plugin_name, artifacts) in group_by_plugin(&manifest.artifacts) {
        let Some(plugin) = table.get(plugin_name.as_str()) else {
            warn!(target: "scancore::collector", "no registered plugin for artifact '{plugin_name}'");
            continue;
        };
        let category = artifacts.first().map(|a| a.category.clone()).unwrap_or_default();

        let mut per_artifact_findings = Vec::new();
        for artifact in &artifacts {
            let path = manifest.resolve_artifact_path(manifest_path, artifact);
            let raw = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(target: "scancore::collector", "could not read artifact '{}': {e}", path.display());
                    continue;
                }
            };
            match plugin.parse(&raw) {
                Ok(findings) => per_artifact_findings.push(findings),
                Err(e) => warn!(target: "scancore::collector", "parse failed for '{plugin_name}': {e}"),
            }
        }

        let findings: Vec<Finding> = if per_artifact_findings.len() > 1 {
            merge_within_plugin(plugin.as_ref(), per_artifact_findings)
        } else {
            per_artifact_findings.into_iter().flatten().collect()
        };

        for finding in findings {
            if !is_meaningful_entry(&finding) {
                continue;
            }

            let service_id = if has_service_identity(&finding) {
                Some(
                    get_or_create_service(
                        pool,
                        host_id,
                        finding.port,
                        finding.protocol.as_deref(),
                        finding.service_name.as_deref(),
                        &plugin_name,
                    )
                    .await?,
                )
            } else {
                None
            };

            let severity = finding.severity();
            let source = finding.fields.get("source").cloned();
            let title = finding.fields.get("msg").cloned().unwrap_or_else(|| "Finding".to_string());
            let description = finding.fields.get("script_output").cloned().unwrap_or_else(|| "-".to_string());
            let refs: Vec<String> = finding
                .fields
                .get("references")
                .or_else(|| finding.fields.get("refs"))
                .cloned()
                .map(|r| vec![r])
                .unwrap_or_default();

            let vuln_id = create_vuln(
                pool,
                service_id,
                host_id,
                &plugin_name,
                source.as_deref(),
                &category,
                &severity.to_string(),
                &title,
                &description,
                &refs,
            )
            .await?;

            if let Some(evidence_path) = finding.fields.get("evidence_path") {
                let log_type = finding
                    .fields
                    .get("evidence_type")
                    .cloned()
                    .or_else(|| source.clone())
                    .unwrap_or_else(|| plugin_name.clone());
                create_evidence(pool, vuln_id, &plugin_name, &log_type, Some(evidence_path), None).await?;
            }

            let log_type = finding.fields.get("log_type").cloned().unwrap_or_else(|| "raw".to_string());
            let log_path = finding.fields.get("log_path").cloned();
            let raw_log = finding
                .fields
                .get("evidence")
                .or_else(|| finding.fields.get("raw_log"))
                .cloned()
                .unwrap_or_else(|| serde_json::to_string(&finding.fields).unwrap_or_default());
            create_evidence(pool, vuln_id, &plugin_name, &log_type, log_path.as_deref(), Some(&raw_log)).await?;

            written += 1;
        }
    }

    let address = manifest
        .target_ip
        .as_deref()
        .or(manifest.target_domain.as_deref())
        .unwrap_or("unknown");
    info!(target: "scancore::collector", "persisted {written} finding(s) for {address}");
    Ok(written)
}

/// Purge mode: delete all prior run data. Used when `--purge-only` is
/// given instead of `--temp-file`.
pub async fn purge_all(pool: &PgPool) -> Result<()> {
    sqlx::query("TRUNCATE TABLE evidence, vuln, services, hosts, registry RESTART IDENTITY CASCADE")
        .execute(pool)
        .await
        .map_err(|e| db_err("purge", e))?;
    info!(target: "scancore::collector", "purged all prior scan data");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scan_common::config::PluginConfig;
    use scan_common::plugin::{ScanOutcome, ScanTarget};
    use std::collections::HashMap as Map;

    fn finding(port: i32, fields: &[(&str, &str)]) -> Finding {
        Finding {
            port: Some(port),
            protocol: Some("tcp".to_string()),
            service_name: Some("http".to_string()),
            state: Some("open".to_string()),
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn empty_fields_but_open_state_is_still_meaningful() {
        let f = Finding {
            port: Some(80),
            protocol: Some("tcp".to_string()),
            service_name: None,
            state: Some("open".to_string()),
            fields: Map::new(),
        };
        assert!(is_meaningful_entry(&f));
    }

    #[test]
    fn closed_with_no_fields_is_not_meaningful() {
        let f = Finding {
            port: Some(80),
            protocol: Some("tcp".to_string()),
            service_name: None,
            state: Some("closed".to_string()),
            fields: Map::new(),
        };
        assert!(!is_meaningful_entry(&f));
    }

    #[test]
    fn missing_protocol_has_no_service_identity() {
        let f = Finding {
            port: Some(53),
            protocol: None,
            service_name: None,
            state: None,
            fields: Map::new(),
        };
        assert!(!has_service_identity(&f));
    }

    #[test]
    fn full_identity_triple_has_service_identity() {
        let f = finding(80, &[]);
        assert!(has_service_identity(&f));
    }

    struct DefaultMergePlugin;

    #[async_trait]
    impl Plugin for DefaultMergePlugin {
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
            _registry: Option<&PgPool>,
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

    #[test]
    fn merge_within_plugin_coalesces_same_key_across_its_own_artifacts() {
        let plugin = DefaultMergePlugin;
        let groups = vec![
            vec![finding(80, &[("state", "open")])],
            vec![finding(80, &[("msg", "interesting header")])],
        ];
        let merged = merge_within_plugin(&plugin, groups);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].fields.contains_key("msg"));
    }

    #[test]
    fn group_by_plugin_keeps_each_plugins_artifacts_separate() {
        let artifacts = vec![
            ArtifactEntry {
                plugin: "nmap".to_string(),
                category: "Network".to_string(),
                source: Some("ip_tcp".to_string()),
                port: None,
                output_path: "nmap-ip_tcp.json".into(),
            },
            ArtifactEntry {
                plugin: "nikto".to_string(),
                category: "Web".to_string(),
                source: Some("ip_http".to_string()),
                port: Some(80),
                output_path: "nikto-ip_http-80.json".into(),
            },
            ArtifactEntry {
                plugin: "nmap".to_string(),
                category: "Network".to_string(),
                source: Some("domain_tcp".to_string()),
                port: None,
                output_path: "nmap-domain_tcp.json".into(),
            },
        ];
        let grouped = group_by_plugin(&artifacts);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, "nmap");
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[1].0, "nikto");
        assert_eq!(grouped[1].1.len(), 1);
    }
}
