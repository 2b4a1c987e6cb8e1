//! Drive-scoped credential storage.
//!
//! Tokens live in `${DROPDRIVE_HOME}/secrets.json` with restricted
//! permissions (0600). Tokens are never logged or displayed in full.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::paths;

/// Secret store filename.
const SECRETS_FILE: &str = "secrets.json";

/// Name of the access-token secret for a drive.
pub fn access_token_name(drive: &str) -> String {
    format!("{drive}_AccessToken")
}

/// Name of the refresh-token secret for a drive.
pub fn refresh_token_name(drive: &str) -> String {
    format!("{drive}_RefreshToken")
}

/// Named-secret storage boundary. Injected into the authorizer so tests can
/// supply in-memory doubles.
pub trait SecretStore {
    /// Reads a secret, `None` when absent.
    fn read_secret(&self, name: &str) -> Option<String>;

    /// Writes (or replaces) a secret.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be written.
    fn write_secret(&mut self, name: &str, value: &str) -> Result<()>;

    /// Removes a secret, reporting whether it existed.
    ///
    /// # Errors
    /// Returns an error if the backing store cannot be written.
    fn remove_secret(&mut self, name: &str) -> Result<bool>;
}

/// File-backed secret store (JSON name/value map).
pub struct FileSecretStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileSecretStore {
    /// Opens the store at the default `${DROPDRIVE_HOME}/secrets.json` path.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open_default() -> Result<Self> {
        Self::open(paths::dropdrive_home().join(SECRETS_FILE))
    }

    /// Opens a store at an explicit path, loading existing entries.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read secrets from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse secrets from {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes both token secrets for a drive. Returns true if either existed.
    ///
    /// # Errors
    /// Returns an error if the store cannot be persisted.
    pub fn clear_drive(&mut self, drive: &str) -> Result<bool> {
        let had_access = self.remove_secret(&access_token_name(drive))?;
        let had_refresh = self.remove_secret(&refresh_token_name(drive))?;
        Ok(had_access || had_refresh)
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents =
            serde_json::to_string_pretty(&self.entries).context("Failed to serialize secrets")?;

        // Write with restricted permissions
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)
                .with_context(|| format!("Failed to open {} for writing", self.path.display()))?;
            file.write_all(contents.as_bytes())
                .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.path, contents)
                .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        }

        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn read_secret(&self, name: &str) -> Option<String> {
        self.entries.get(name).cloned()
    }

    fn write_secret(&mut self, name: &str, value: &str) -> Result<()> {
        self.entries.insert(name.to_string(), value.to_string());
        self.save()
    }

    fn remove_secret(&mut self, name: &str) -> Result<bool> {
        let existed = self.entries.remove(name).is_some();
        if existed {
            self.save()?;
        }
        Ok(existed)
    }
}

/// Returns a masked version of a token for display (first 12 chars + ...).
pub fn mask_token(token: &str) -> String {
    if token.len() <= 16 {
        return "***".to_string();
    }
    format!("{}...", &token[..12])
}
