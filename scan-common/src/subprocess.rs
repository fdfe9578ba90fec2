// SPDX-License-Identifier: Apache-2.0

//! Helpers for invoking external scan tools as subprocesses.
//!
//! Every bundled plugin shells out to a real tool (`nmap`, `nikto`, `dig`,
//! a `nuclei` binary); these helpers centralize the parts that would
//! otherwise be copy-pasted into each plugin: locating the binary,
//! capturing output, and timing the call for the manifest.

use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::error::{Error, Result};

/// Whether `binary` resolves on `PATH`.
pub fn is_tool_installed(binary: &str) -> bool {
    which::which(binary).is_ok()
}

/// Run `binary version_flag` and return its trimmed stdout, if the tool
/// supports a version probe at all. Errors are swallowed to `None` — an
/// unparsable version string should not abort a scan.
pub async fn tool_version(binary: &str, version_flag: &str) -> Option<String> {
    let output = Command::new(binary).arg(version_flag).output().await.ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let text = if text.trim().is_empty() {
        String::from_utf8_lossy(&output.stderr).into_owned()
    } else {
        text.into_owned()
    };
    let trimmed = text.lines().next()?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Run an install command (a literal argv, e.g. `["apt-get", "install", "-y", "nmap"]`).
pub async fn run_install_command(plugin: &str, argv: &[String]) -> Result<()> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };
    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|e| Error::PluginInstallFailed {
            plugin: plugin.to_string(),
            reason: e.to_string(),
        })?;
    if !status.success() {
        return Err(Error::PluginInstallFailed {
            plugin: plugin.to_string(),
            reason: format!("install command exited with {status}"),
        });
    }
    Ok(())
}

/// The result of running a scan subprocess: its stdout/stderr bytes and the
/// wall-clock time it took, for the manifest's per-plugin duration record.
pub struct TimedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    pub success: bool,
}

/// Run `program args...` to completion, returning its captured output and
/// elapsed time regardless of exit status — a nonzero exit is not itself an
/// error here, since some tools (e.g. nmap against a filtered host) exit
/// nonzero on results a caller still wants to parse.
pub async fn run_timed(plugin: &str, program: &str, args: &[String]) -> Result<TimedOutput> {
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::PluginScanFailed {
            plugin: plugin.to_string(),
            reason: e.to_string(),
        })?;
    Ok(TimedOutput {
        stdout: output.stdout,
        stderr: output.stderr,
        duration: start.elapsed(),
        success: output.status.success(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_binary_is_not_installed() {
        assert!(!is_tool_installed("this-binary-does-not-exist-anywhere"));
    }

    #[tokio::test]
    async fn run_timed_captures_output_and_elapsed_time() {
        let result = run_timed("echo-test", "echo", &["hello".to_string()])
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(String::from_utf8_lossy(&result.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn empty_install_command_is_a_no_op() {
        run_install_command("noop", &[]).await.unwrap();
    }
}
