//! Persisted settings for dropdrive.
//!
//! Settings live in `${DROPDRIVE_HOME}/settings.toml` and mirror the fields
//! of the last successful authorization plus the API key.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::oauth::Authorization;

/// Current settings schema version.
const SCHEMA_VERSION: u32 = 1;

/// Persisted settings, loaded before each authorization attempt and written
/// after every successful exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Files that predate versioning carry no `schema_version` key; they
    /// must deserialize as 0 so `upgrade` picks them up.
    #[serde(default)]
    pub schema_version: u32,
    /// Dropbox app key (OAuth client id).
    pub api_key: Option<String>,
    /// Expiry of the last issued access token.
    pub access_token_expiration: Option<DateTime<Utc>>,
    pub uid: Option<String>,
    pub account_id: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,

    #[serde(skip)]
    path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            api_key: None,
            access_token_expiration: None,
            uid: None,
            account_id: None,
            scope: None,
            token_type: None,
            path: paths::settings_path(),
        }
    }
}

type FieldExtractor = fn(&Authorization) -> Option<String>;

/// Statically-typed mapping from setting name to the authorization field it
/// mirrors. Replaces name-based reflection over the result object.
pub const RESULT_FIELDS: &[(&str, FieldExtractor)] = &[
    ("uid", |result| result.uid.clone()),
    ("account_id", |result| result.account_id.clone()),
    ("scope", |result| result.scope.clone()),
    ("token_type", |result| result.token_type.clone()),
];

impl Settings {
    /// Loads settings from the default `${DROPDRIVE_HOME}/settings.toml`.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_default() -> Result<Self> {
        Self::load(paths::settings_path())
    }

    /// Loads settings from an explicit path; defaults when the file is absent.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                ..Self::default()
            });
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let mut settings: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))?;
        settings.path = path;
        Ok(settings)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saves the settings to disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))?;
        Ok(())
    }

    /// Re-reads the settings from disk, discarding in-memory state.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn reload(&mut self) -> Result<()> {
        *self = Self::load(self.path.clone())?;
        Ok(())
    }

    /// One-time schema migration. Currently renames the legacy `app_key`
    /// field to `api_key` and stamps the schema version.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or rewritten.
    pub fn upgrade(&mut self) -> Result<()> {
        if !self.path.exists() || self.schema_version >= SCHEMA_VERSION {
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let raw: toml::Value = contents.parse().context("Failed to parse settings for upgrade")?;

        if self.api_key.is_none()
            && let Some(legacy) = raw.get("app_key").and_then(toml::Value::as_str)
        {
            self.api_key = Some(legacy.to_string());
        }

        self.schema_version = SCHEMA_VERSION;
        self.save()
    }

    /// Copies the authorization result into the mirrored settings fields via
    /// the [`RESULT_FIELDS`] mapping table, then records the token expiry.
    pub fn apply_authorization(&mut self, result: &Authorization) {
        for (name, extract) in RESULT_FIELDS {
            if let Some(value) = extract(result) {
                self.set_field(name, value);
            }
        }
        self.access_token_expiration = Some(result.expires_at.unwrap_or_else(Utc::now));
    }

    fn set_field(&mut self, name: &str, value: String) {
        match name {
            "uid" => self.uid = Some(value),
            "account_id" => self.account_id = Some(value),
            "scope" => self.scope = Some(value),
            "token_type" => self.token_type = Some(value),
            other => debug_assert!(false, "unmapped setting field: {other}"),
        }
    }
}

pub mod paths {
    //! Path resolution for dropdrive configuration and data.
    //!
    //! DROPDRIVE_HOME resolution order:
    //! 1. DROPDRIVE_HOME environment variable (if set)
    //! 2. ~/.config/dropdrive (default)

    use std::path::PathBuf;

    /// Returns the dropdrive home directory.
    pub fn dropdrive_home() -> PathBuf {
        if let Ok(home) = std::env::var("DROPDRIVE_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("dropdrive"))
            .expect("Could not determine home directory")
    }

    /// Returns the path to the settings.toml file.
    pub fn settings_path() -> PathBuf {
        dropdrive_home().join("settings.toml")
    }
}
