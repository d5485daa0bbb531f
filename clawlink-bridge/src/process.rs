// ABOUTME: Spawns and stops the helper process with piped stdin/stdout
// ABOUTME: stderr is inherited so the helper's own prompts (QR codes, warnings) reach the terminal

use crate::error::BridgeError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Absolute form of `script` against the current directory.
/// Falls back to the input if the current directory is unknown.
pub fn resolve_script(script: &Path) -> PathBuf {
    std::path::absolute(script).unwrap_or_else(|e| {
        tracing::warn!(script = %script.display(), error = %e, "Failed to resolve helper script path");
        script.to_path_buf()
    })
}

/// Directory the helper runs in (and where local installs go)
pub fn script_dir(script: &Path) -> Option<&Path> {
    script.parent().filter(|d| !d.as_os_str().is_empty())
}

/// The helper runs from its own directory, so the script is passed absolute
pub fn helper_command(node_binary: &str, script: &Path, node_path: Option<&str>) -> Command {
    let script = resolve_script(script);
    let mut cmd = Command::new(node_binary);
    cmd.arg(&script)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(dir) = script_dir(&script) {
        cmd.current_dir(dir);
    }
    if let Some(path) = node_path {
        cmd.env("NODE_PATH", path);
    }
    cmd
}

pub fn spawn_helper(
    node_binary: &str,
    script: &Path,
    node_path: Option<&str>,
) -> Result<Child, BridgeError> {
    if !script.is_file() {
        return Err(BridgeError::HelperUnavailable(format!(
            "helper script not found: {}",
            script.display()
        )));
    }

    tracing::info!(script = %script.display(), "Starting helper process");
    let child = helper_command(node_binary, script, node_path)
        .spawn()
        .map_err(|e| BridgeError::HelperUnavailable(format!("failed to spawn helper: {}", e)))?;
    tracing::debug!(pid = ?child.id(), "Helper process started");
    Ok(child)
}

/// Kill the helper if it is still running and reap it
pub async fn stop_helper(child: &mut Child) {
    if let Ok(Some(status)) = child.try_wait() {
        tracing::info!(?status, "Helper process exited");
        return;
    }

    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "Failed to signal helper process");
    }
    match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => tracing::info!(?status, "Helper process stopped"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Error waiting for helper process"),
        Err(_) => tracing::warn!("Helper process did not exit in time"),
    }
}
