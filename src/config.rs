use crate::core::plan::PlanOptions;
use crate::core::policy::{Access, DefaultPolicy};
use crate::utils::get_data_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

/// Persistent defaults for the CLI; command-line flags override them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remove remote rules that the desired policy does not declare
    #[serde(default)]
    pub prune_unmanaged: bool,
    /// Refuse plans that contain redundant or shadowed rules
    #[serde(default)]
    pub strict: bool,
    /// Decision for inbound traffic no rule matches
    #[serde(default = "default_inbound")]
    pub default_inbound: Access,
    /// Decision for outbound traffic no rule matches
    #[serde(default = "default_outbound")]
    pub default_outbound: Access,
    /// Policy store directory (defaults to `<data dir>/policies`)
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
    /// Record applies in the audit log
    #[serde(default = "default_true")]
    pub audit: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            prune_unmanaged: false,
            strict: false,
            default_inbound: default_inbound(),
            default_outbound: default_outbound(),
            store_dir: None,
            audit: true,
        }
    }
}

fn default_inbound() -> Access {
    DefaultPolicy::default().inbound
}

fn default_outbound() -> Access {
    DefaultPolicy::default().outbound
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            prune_unmanaged: self.prune_unmanaged,
            strict: self.strict,
        }
    }

    pub fn default_policy(&self) -> DefaultPolicy {
        DefaultPolicy {
            inbound: self.default_inbound,
            outbound: self.default_outbound,
        }
    }
}

/// Path of the config file in the data directory
pub fn config_path() -> Option<PathBuf> {
    get_data_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Saves a config to `path` using an atomic write pattern.
/// 1. Writes to a temporary file.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
pub async fn save_config_to(path: &Path, config: &AppConfig) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(config)?;

    let mut temp_path = path.to_path_buf();
    temp_path.set_extension("json.tmp");

    #[cfg(unix)]
    {
        use tokio::fs::OpenOptions;
        use tokio::io::AsyncWriteExt;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600) // Set permissions BEFORE any data is written
            .open(&temp_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
    }

    #[cfg(not(unix))]
    {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
    }

    tokio::fs::rename(temp_path, path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e
        }
    })
}

/// Saves the config to the data directory. A no-op when there is none.
pub async fn save_config(config: &AppConfig) -> std::io::Result<()> {
    match config_path() {
        Some(path) => save_config_to(&path, config).await,
        None => Ok(()),
    }
}

/// Loads a config from `path`, or returns the default if it is missing or
/// unreadable.
pub async fn load_config_from(path: &Path) -> AppConfig {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => serde_json::from_str::<AppConfig>(&json).unwrap_or_else(|e| {
            tracing::warn!("Ignoring invalid config {}: {e}", path.display());
            AppConfig::default()
        }),
        Err(_) => AppConfig::default(),
    }
}

/// Loads the config from the data directory, or returns the default.
pub async fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_config_from(&path).await,
        None => AppConfig::default(),
    }
}
