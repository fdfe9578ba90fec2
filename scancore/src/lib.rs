// SPDX-License-Identifier: Apache-2.0

//! Orchestration, execution, and collection glue shared by the two CLI
//! binaries (`scan-runner`, `scan-collector`).

pub mod collector;
pub mod orchestrator;
pub mod registration;
pub mod runner;

pub use registration::build_plugin_table;
