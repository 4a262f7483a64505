//! File-backed policy store
//!
//! Each policy is a standalone JSON file in the store directory, named after
//! the policy (`<name>.json`), with a SHA-256 sidecar (`<name>.json.sha256`).
//! The default store lives in the application's data directory under
//! `policies/`.
//!
//! Every rule-level write reads the file, applies the change and writes it
//! back atomically, so a crash never leaves a half-written policy.

use crate::core::client::{ClientResult, PolicyLifecycle, ResourceClient};
use crate::core::error::ClientError;
use crate::core::policy::{MAX_RULES, SecurityPolicy, SecurityRule};
use crate::utils::get_data_dir;
use crate::validators::validate_policy_name;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

fn checksum(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn io_error(context: &str, err: &std::io::Error) -> ClientError {
    ClientError::Transient(format!("{context}: {err}"))
}

/// Directory of policy files
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    /// Serialises read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        if !tokio::fs::try_exists(&dir).await? {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Opens the store in the application's data directory.
    ///
    /// # Errors
    ///
    /// Returns `Err` if no data directory is available or it cannot be created.
    pub async fn open_default() -> std::io::Result<Self> {
        let mut path = get_data_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "Data directory not available")
        })?;
        path.push("policies");
        Self::open(path).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of a policy file.
    /// Validates the name first so it can never escape the store directory.
    fn policy_path(&self, name: &str) -> Result<PathBuf, String> {
        validate_policy_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }

    async fn load(&self, name: &str) -> ClientResult<SecurityPolicy> {
        let path = self
            .policy_path(name)
            .map_err(|e| ClientError::NotFound(format!("policy '{name}': {e}")))?;

        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClientError::NotFound(format!("policy '{name}'")));
            }
            Err(e) => return Err(io_error(&format!("reading policy '{name}'"), &e)),
        };

        // Warns but doesn't fail for hand-edited policy files
        let mut checksum_path = path.clone();
        checksum_path.set_extension("json.sha256");
        if let Ok(expected) = tokio::fs::read_to_string(&checksum_path).await {
            let actual = checksum(&json);
            if expected.trim() != actual {
                warn!(
                    "Policy '{}' checksum mismatch (expected: {}, got: {})",
                    name,
                    expected.trim(),
                    actual
                );
            }
        }

        let mut policy: SecurityPolicy = serde_json::from_str(&json)
            .map_err(|e| ClientError::Corrupted(format!("policy '{name}': {e}")))?;

        if policy.len() > MAX_RULES {
            return Err(ClientError::Corrupted(format!(
                "policy '{name}' contains {} rules (max: {MAX_RULES})",
                policy.len()
            )));
        }

        // The file name is authoritative
        policy.name = name.to_string();
        Ok(policy)
    }

    /// Writes a policy atomically (temp file + rename) with its checksum.
    async fn save(&self, policy: &SecurityPolicy) -> ClientResult<()> {
        let path = self
            .policy_path(&policy.name)
            .map_err(|e| ClientError::Conflict(format!("policy '{}': {e}", policy.name)))?;
        let json = serde_json::to_string_pretty(policy)
            .map_err(|e| ClientError::Corrupted(format!("policy '{}': {e}", policy.name)))?;

        let mut temp_path = path.clone();
        temp_path.set_extension("json.tmp");

        let context = format!("writing policy '{}'", policy.name);

        #[cfg(unix)]
        {
            use tokio::fs::OpenOptions;
            use tokio::io::AsyncWriteExt;

            // Restrictive permissions before any rule hits the disk
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .mode(0o600)
                .open(&temp_path)
                .await
                .map_err(|e| io_error(&context, &e))?;

            file.write_all(json.as_bytes())
                .await
                .map_err(|e| io_error(&context, &e))?;
            file.sync_all().await.map_err(|e| io_error(&context, &e))?;
        }

        #[cfg(not(unix))]
        {
            tokio::fs::write(&temp_path, &json)
                .await
                .map_err(|e| io_error(&context, &e))?;
        }

        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| io_error(&context, &e))?;

        let mut checksum_path = path;
        checksum_path.set_extension("json.sha256");
        tokio::fs::write(checksum_path, checksum(&json))
            .await
            .map_err(|e| io_error(&context, &e))?;

        debug!("Saved policy '{}' ({} rules)", policy.name, policy.len());
        Ok(())
    }
}

#[async_trait]
impl ResourceClient for FileStore {
    async fn fetch(&self, policy_name: &str) -> ClientResult<SecurityPolicy> {
        self.load(policy_name).await
    }

    async fn upsert_rule(&self, policy_name: &str, rule: &SecurityRule) -> ClientResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut policy = match self.load(policy_name).await {
            Ok(policy) => policy,
            Err(ClientError::NotFound(_)) => SecurityPolicy::new(policy_name),
            Err(e) => return Err(e),
        };

        if let Some(holder) = policy.rule_at(rule.direction, rule.priority)
            && holder.name != rule.name
        {
            return Err(ClientError::Conflict(format!(
                "{} priority {} in '{policy_name}' is held by '{}'",
                rule.direction, rule.priority, holder.name
            )));
        }

        if !policy.contains(&rule.name) && policy.len() >= MAX_RULES {
            return Err(ClientError::Conflict(format!(
                "policy '{policy_name}' already has {MAX_RULES} rules"
            )));
        }

        policy.put_rule(rule.clone());
        self.save(&policy).await
    }

    async fn delete_rule(&self, policy_name: &str, rule_name: &str) -> ClientResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut policy = self.load(policy_name).await?;
        if policy.take_rule(rule_name).is_none() {
            return Err(ClientError::NotFound(format!(
                "rule '{rule_name}' in '{policy_name}'"
            )));
        }
        self.save(&policy).await
    }

    async fn list_policies(&self) -> ClientResult<Vec<String>> {
        let mut policies = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error("listing policies", &e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("listing policies", &e))?
        {
            let path = entry.path();

            if path.is_file()
                && path.extension().and_then(|s| s.to_str()) == Some("json")
                && let Some(name) = path.file_stem().and_then(|s| s.to_str())
            {
                policies.push(name.to_string());
            }
        }

        policies.sort();
        Ok(policies)
    }
}

#[async_trait]
impl PolicyLifecycle for FileStore {
    async fn create_policy(&self, policy_name: &str) -> ClientResult<()> {
        let _guard = self.write_lock.lock().await;

        match self.load(policy_name).await {
            Ok(_) => Err(ClientError::Conflict(format!(
                "policy '{policy_name}' already exists"
            ))),
            Err(ClientError::NotFound(_)) => self.save(&SecurityPolicy::new(policy_name)).await,
            Err(e) => Err(e),
        }
    }

    async fn delete_policy(&self, policy_name: &str) -> ClientResult<()> {
        let _guard = self.write_lock.lock().await;

        let path = self
            .policy_path(policy_name)
            .map_err(|e| ClientError::NotFound(format!("policy '{policy_name}': {e}")))?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClientError::NotFound(format!("policy '{policy_name}'")));
            }
            Err(e) => return Err(io_error(&format!("deleting policy '{policy_name}'"), &e)),
        }

        let mut checksum_path = path;
        checksum_path.set_extension("json.sha256");
        if let Err(e) = tokio::fs::remove_file(&checksum_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Could not remove checksum for '{policy_name}': {e}");
        }
        Ok(())
    }
}
