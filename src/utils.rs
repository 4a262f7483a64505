//! Utility functions for directory management
//!
//! This module provides helper functions following the XDG Base Directory specification
//! for portable configuration and data storage across Linux distributions.
//!
//! # Directory Structure
//!
//! - Data: `~/.local/share/secgroup/` - Configuration and the default policy store
//! - State: `~/.local/state/secgroup/` - Runtime state (audit log, log files)
//!
//! # Example
//!
//! ```
//! use secgroup::utils::{get_data_dir, get_state_dir, ensure_dirs};
//!
//! // Ensure directories exist before use
//! ensure_dirs().expect("Failed to create directories");
//!
//! if let Some(data_path) = get_data_dir() {
//!     // Load configuration from data_path
//! }
//! ```

use directories::ProjectDirs;
use std::path::PathBuf;

/// Overrides the data directory (tests, containers)
pub const DATA_DIR_ENV: &str = "SECGROUP_DATA_DIR";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "secgroup", "secgroup")
}

pub fn get_data_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    project_dirs().map(|pd| pd.data_dir().to_path_buf())
}

/// State directory; falls back to the data directory on platforms without one.
pub fn get_state_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return Some(PathBuf::from(dir).join("state"));
    }
    project_dirs().and_then(|pd| {
        pd.state_dir()
            .map(std::path::Path::to_path_buf)
            .or_else(|| Some(pd.data_dir().to_path_buf()))
    })
}

pub fn ensure_dirs() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o700); // User read/write/execute only
        builder.recursive(true);

        if let Some(dir) = get_data_dir() {
            builder.create(dir)?;
        }
        if let Some(dir) = get_state_dir() {
            builder.create(dir)?;
        }
    }

    #[cfg(not(unix))]
    {
        if let Some(dir) = get_data_dir() {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(dir) = get_state_dir() {
            std::fs::create_dir_all(dir)?;
        }
    }

    Ok(())
}

/// Truncates a string to a maximum length and adds an ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        // Find the nearest character boundary to avoid splitting multi-byte characters
        let end = s
            .char_indices()
            .map(|(idx, _)| idx)
            .take_while(|&idx| idx <= max_len.saturating_sub(3))
            .last()
            .unwrap_or(0);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string_short_is_unchanged() {
        assert_eq!(truncate_string("ALLOW-SSH", 32), "ALLOW-SSH");
    }

    #[test]
    fn test_truncate_string_adds_ellipsis() {
        let out = truncate_string("2001:db8:aaaa:bbbb:cccc::/80", 12);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 12);
    }

    #[test]
    fn test_truncate_string_respects_char_boundaries() {
        let out = truncate_string("ééééééé", 6);
        assert!(out.ends_with("..."));
    }
}
