// SPDX-License-Identifier: Apache-2.0

//! Shared types, error taxonomy, and the plugin contract used by the
//! scanner's two CLI surfaces and its bundled plugins.

pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod plugin;
pub mod registry;
pub mod severity;
pub mod subprocess;

pub use error::{Error, Result};
pub use plugin::{Finding, Plugin, PluginTable, ScanOutcome, ScanTarget};
pub use severity::Severity;
