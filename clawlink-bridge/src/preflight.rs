// ABOUTME: Checks the helper runtime and its node packages before the helper is spawned
// ABOUTME: Missing packages are installed globally first, then locally next to the script

use crate::error::BridgeError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Confirm the runtime binary runs; returns its reported version
pub async fn check_runtime(node_binary: &str) -> Result<String, BridgeError> {
    let output = Command::new(node_binary)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| BridgeError::HelperUnavailable(format!("{} not runnable: {}", node_binary, e)))?;

    if !output.status.success() {
        return Err(BridgeError::HelperUnavailable(format!(
            "{} --version exited with {}",
            node_binary, output.status
        )));
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    tracing::debug!(node = %node_binary, version = %version, "Helper runtime found");
    Ok(version)
}

/// `npm root -g`, if npm is available
pub async fn global_module_root(npm_binary: &str) -> Option<String> {
    let output = Command::new(npm_binary)
        .args(["root", "-g"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }
    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!root.is_empty()).then_some(root)
}

/// Prefix an existing NODE_PATH with the global module root
pub fn merge_node_path(global_root: &str, existing: Option<&str>) -> String {
    let separator = if cfg!(windows) { ';' } else { ':' };
    match existing.filter(|e| !e.is_empty()) {
        Some(existing) => format!("{}{}{}", global_root, separator, existing),
        None => global_root.to_string(),
    }
}

/// NODE_PATH value the helper and dependency checks should run with, best effort
pub async fn node_path(npm_binary: &str) -> Option<String> {
    let existing = std::env::var("NODE_PATH").ok();
    match global_module_root(npm_binary).await {
        Some(root) => Some(merge_node_path(&root, existing.as_deref())),
        None => existing,
    }
}

/// JS source that fails when `dep` cannot be resolved
pub fn require_snippet(dep: &str) -> String {
    // JSON string literals are valid JS string literals
    let literal = serde_json::Value::String(dep.to_string()).to_string();
    format!("require({})", literal)
}

async fn is_installed(node_binary: &str, dep: &str, node_path: Option<&str>) -> bool {
    let mut cmd = Command::new(node_binary);
    cmd.arg("-e")
        .arg(require_snippet(dep))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(path) = node_path {
        cmd.env("NODE_PATH", path);
    }
    matches!(cmd.status().await, Ok(status) if status.success())
}

pub async fn missing_dependencies(
    node_binary: &str,
    deps: &[String],
    node_path: Option<&str>,
) -> Vec<String> {
    let mut missing = Vec::new();
    for dep in deps {
        if !is_installed(node_binary, dep, node_path).await {
            missing.push(dep.clone());
        }
    }
    missing
}

async fn npm_install(npm_binary: &str, global: bool, deps: &[String], cwd: Option<&Path>) -> Result<(), String> {
    let mut cmd = Command::new(npm_binary);
    cmd.arg("install");
    if global {
        cmd.arg("-g");
    }
    cmd.args(deps).stdin(Stdio::null());
    if let Some(dir) = cwd.filter(|d| !d.as_os_str().is_empty()) {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await.map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

/// Check every dependency and install what is missing.
///
/// `local_dir` is where the fallback `npm install` runs (the helper script's directory).
pub async fn ensure_dependencies(
    node_binary: &str,
    npm_binary: &str,
    deps: &[String],
    local_dir: Option<&Path>,
) -> Result<(), BridgeError> {
    tracing::info!("Verifying helper dependencies");
    let node_path = node_path(npm_binary).await;
    let missing = missing_dependencies(node_binary, deps, node_path.as_deref()).await;
    if missing.is_empty() {
        return Ok(());
    }

    tracing::warn!(missing = ?missing, "Helper dependencies missing, installing");

    if let Err(global_err) = npm_install(npm_binary, true, &missing, None).await {
        tracing::warn!(error = %global_err, "Global install failed, attempting local install");
        npm_install(npm_binary, false, &missing, local_dir)
            .await
            .map_err(|reason| BridgeError::DependencyMissing {
                missing: missing.clone(),
                reason,
            })?;
    }

    tracing::info!(installed = ?missing, "Helper dependencies installed");
    Ok(())
}
