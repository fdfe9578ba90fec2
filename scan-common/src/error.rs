// SPDX-License-Identifier: Apache-2.0

use std::result::Result as StdResult;

/// The error taxonomy shared by every component of the orchestrator.
///
/// Variants are split along the fatal/non-fatal line drawn in the error
/// handling design: fatal variants invalidate the whole run, the rest are
/// caught, logged, and skipped by the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("neither target_ip nor target_domain is set in scan_config")]
    ConfigMissingTarget,

    #[error("cyclic dependency detected among enabled plugins")]
    CyclicDependency,

    #[error("install of plugin '{plugin}' failed: {reason}")]
    PluginInstallFailed { plugin: String, reason: String },

    #[error("scan() failed for plugin '{plugin}': {reason}")]
    PluginScanFailed { plugin: String, reason: String },

    #[error("parse() failed for plugin '{plugin}': {reason}")]
    PluginParseFailed { plugin: String, reason: String },

    #[error("failed to connect to the database")]
    CollectorDbConnectFailed(#[source] sqlx::Error),

    #[error("failed to insert a row for plugin '{plugin}': {reason}")]
    CollectorRowInsertFailed { plugin: String, reason: String },

    #[error("manifest file not found at '{path}'")]
    ManifestMissing { path: String },

    #[error("manifest file at '{path}' is malformed: {reason}")]
    ManifestMalformed { path: String, reason: String },

    #[error("configuration file at '{path}' could not be read: {source}")]
    ConfigUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration file at '{path}' is malformed: {source}")]
    ConfigMalformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("both --temp-file and --purge-only given, or neither")]
    AmbiguousCollectorMode,
}

pub type Result<T> = StdResult<T, Error>;
