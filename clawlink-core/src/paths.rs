// ABOUTME: XDG Base Directory paths for the config file and the data directory
// ABOUTME: CLAWLINK_DATA_DIR overrides the data directory for tests and deployments

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

const QUALIFIER: &str = "dev";
const ORGANIZATION: &str = "clawlink";
const APPLICATION: &str = "clawlink";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Data directory (e.g. ~/.local/share/clawlink/), or ./data without a home
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CLAWLINK_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(expand_tilde(&dir));
        }
    }
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Config directory (e.g. ~/.config/clawlink/), or . without a home
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Expand a leading `~` to the home directory.
/// Logs a warning and returns the input unchanged if no home is known.
pub fn expand_tilde(path: &str) -> String {
    let rest = if path == "~" {
        ""
    } else if let Some(stripped) = path.strip_prefix("~/") {
        stripped
    } else {
        return path.to_string();
    };

    match BaseDirs::new() {
        Some(base) if rest.is_empty() => base.home_dir().to_string_lossy().to_string(),
        Some(base) => base.home_dir().join(rest).to_string_lossy().to_string(),
        None => {
            tracing::warn!(path = %path, "Failed to expand tilde: could not determine home directory");
            path.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("/tmp/report.pdf"), "/tmp/report.pdf");
        assert_eq!(expand_tilde("relative/x"), "relative/x");
        assert_eq!(expand_tilde("~user/x"), "~user/x");
    }

    #[test]
    fn test_expand_tilde_home() {
        if let Some(base) = BaseDirs::new() {
            let home = base.home_dir().to_string_lossy().to_string();
            assert_eq!(expand_tilde("~"), home);
            assert!(expand_tilde("~/notes.txt").starts_with(&home));
            assert!(expand_tilde("~/notes.txt").ends_with("notes.txt"));
        }
    }

    #[test]
    #[serial]
    fn test_data_dir_env_override() {
        std::env::set_var("CLAWLINK_DATA_DIR", "/tmp/clawlink-test-data");
        assert_eq!(data_dir(), PathBuf::from("/tmp/clawlink-test-data"));
        std::env::remove_var("CLAWLINK_DATA_DIR");
    }

    #[test]
    fn test_config_file_name() {
        assert!(config_file().ends_with("config.toml"));
    }
}
