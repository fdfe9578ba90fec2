// SPDX-License-Identifier: Apache-2.0

//! The target registry: a Postgres-backed table of discovered
//! scan targets, keyed by address, that plugins can both write to (when a
//! scan discovers a new target, e.g. a web service found by nmap) and read
//! from (when a plugin's dependency declares `strict_dependencies`).

use sqlx::PgPool;

use crate::error::{Error, Result};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RegistryEntry {
    pub id: i64,
    pub target_type: String,
    pub address: String,
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub source_plugin: String,
    pub status: String,
    pub tags: Vec<String>,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct TargetFilter {
    pub source_plugin: Option<String>,
    pub status: Option<String>,
    pub protocol: Option<String>,
    pub target_type: Option<String>,
    /// Matches entries whose `tags` overlap this set — any shared tag
    /// qualifies, not a subset/superset check.
    pub tags: Vec<String>,
}

/// Upsert a target by `(target_type, address, port, protocol)`, refreshing
/// its status, tags, meta, and `updated_at` when it already exists.
#[allow(clippy::too_many_arguments)]
pub async fn add_target(
    pool: &PgPool,
    target_type: &str,
    address: &str,
    port: Option<i32>,
    protocol: Option<&str>,
    source_plugin: &str,
    tags: &[String],
    meta: &serde_json::Value,
    status: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO registry (target_type, address, port, protocol, source_plugin, status, tags, meta, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
        ON CONFLICT (target_type, address, port, protocol)
        DO UPDATE SET status = excluded.status, tags = excluded.tags, meta = excluded.meta, updated_at = now()
        "#,
    )
    .bind(target_type)
    .bind(address)
    .bind(port)
    .bind(protocol)
    .bind(source_plugin)
    .bind(status)
    .bind(tags)
    .bind(meta)
    .execute(pool)
    .await
    .map_err(|source| Error::CollectorRowInsertFailed {
        plugin: source_plugin.to_string(),
        reason: source.to_string(),
    })?;
    Ok(())
}

/// Fetch registry entries matching the given filter, building the query
/// dynamically so absent filter fields impose no constraint. `filter.tags`
/// matches by set overlap via Postgres's `&&` array operator.
pub async fn get_targets(pool: &PgPool, filter: &TargetFilter) -> Result<Vec<RegistryEntry>> {
    let mut query = String::from(
        "SELECT id, target_type, address, port, protocol, source_plugin, status, tags, meta FROM registry WHERE 1 = 1",
    );
    let mut string_binds: Vec<String> = Vec::new();

    if let Some(plugin) = &filter.source_plugin {
        query.push_str(&format!(" AND source_plugin = ${}", string_binds.len() + 1));
        string_binds.push(plugin.clone());
    }
    if let Some(status) = &filter.status {
        query.push_str(&format!(" AND status = ${}", string_binds.len() + 1));
        string_binds.push(status.clone());
    }
    if let Some(protocol) = &filter.protocol {
        query.push_str(&format!(" AND protocol = ${}", string_binds.len() + 1));
        string_binds.push(protocol.clone());
    }
    if let Some(target_type) = &filter.target_type {
        query.push_str(&format!(" AND target_type = ${}", string_binds.len() + 1));
        string_binds.push(target_type.clone());
    }
    let tags_bind_index = if !filter.tags.is_empty() {
        query.push_str(&format!(" AND tags && ${}", string_binds.len() + 1));
        Some(string_binds.len() + 1)
    } else {
        None
    };

    let mut built = sqlx::query_as::<_, RegistryEntry>(&query);
    for bind in &string_binds {
        built = built.bind(bind);
    }
    if tags_bind_index.is_some() {
        built = built.bind(&filter.tags);
    }

    built
        .fetch_all(pool)
        .await
        .map_err(|source| Error::CollectorRowInsertFailed {
            plugin: filter.source_plugin.clone().unwrap_or_default(),
            reason: source.to_string(),
        })
}

pub async fn update_target_status(pool: &PgPool, id: i64, status: &str) -> Result<()> {
    sqlx::query("UPDATE registry SET status = $1, updated_at = now() WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|source| Error::CollectorRowInsertFailed {
            plugin: "registry".to_string(),
            reason: source.to_string(),
        })?;
    Ok(())
}

pub async fn delete_target(pool: &PgPool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM registry WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|source| Error::CollectorRowInsertFailed {
            plugin: "registry".to_string(),
            reason: source.to_string(),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_with_no_fields_imposes_no_constraint() {
        let filter = TargetFilter::default();
        assert!(filter.source_plugin.is_none());
        assert!(filter.status.is_none());
        assert!(filter.protocol.is_none());
        assert!(filter.target_type.is_none());
        assert!(filter.tags.is_empty());
    }
}
