//! Configuration loading and persistence.
//!
//! Handles reading and writing the presence-ipc configuration file. Values
//! missing from the file fall back to defaults, so a partial or older file
//! keeps working.

pub mod writer;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::client::ClientConfig;
use crate::constants::HANDSHAKE_TIMEOUT;
use crate::presence::PresenceTemplates;
use crate::supervisor::ReconnectPolicy;

/// Application id registered with the host service.
pub const DEFAULT_CLIENT_ID: &str = "1020683907101892709";

/// File name inside [`Config::config_dir`].
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Configuration for the presence client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Application id sent in the handshake.
    pub client_id: String,
    /// Publish presence at all. When `false` the watcher still reads player
    /// status but never connects.
    pub enabled: bool,
    /// Socket path override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipc_path: Option<PathBuf>,
    /// Delays between connection attempts.
    pub reconnect: ReconnectPolicy,
    /// Milliseconds to wait for `READY` after the handshake.
    pub handshake_timeout_ms: u64,
    /// Activity templates.
    pub presence: PresenceTemplates,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            enabled: true,
            ipc_path: None,
            reconnect: ReconnectPolicy::default(),
            handshake_timeout_ms: HANDSHAKE_TIMEOUT.as_millis() as u64,
            presence: PresenceTemplates::default(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/presence-ipc-test`
    /// 2. `PRESENCE_CONFIG_DIR` env var: explicit override
    /// 3. `PRESENCE_ENV=test`: `tmp/presence-ipc-test` (integration tests)
    /// 4. Default: platform config dir (Linux: ~/.config/presence-ipc)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/presence-ipc-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("PRESENCE_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else if crate::env::is_test_mode() {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/presence-ipc-test")
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("presence-ipc")
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Full path of the config file.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file yields defaults. A file that exists but does not parse
    /// is an error, so a typo is not silently replaced by defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read and parse a config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Apply `PRESENCE_CLIENT_ID` and `PRESENCE_IPC_PATH`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(client_id) = var("PRESENCE_CLIENT_ID").filter(|v| !v.is_empty()) {
            self.client_id = client_id;
        }

        if let Some(ipc_path) = var("PRESENCE_IPC_PATH").filter(|v| !v.is_empty()) {
            self.ipc_path = Some(PathBuf::from(ipc_path));
        }
    }

    /// Persists the current configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Write the configuration as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Set one top-level or nested key from a JSON value.
    ///
    /// `key` is a dot path (`reconnect.error_delay_ms`). `value` is parsed as
    /// JSON, falling back to a plain string. The result must still be a
    /// valid config.
    pub fn with_value(&self, key: &str, value: &str) -> Result<Self> {
        use serde_json::Value;

        let mut tree = serde_json::to_value(self)?;
        let mut slot = &mut tree;
        for part in key.split('.') {
            let object = slot
                .as_object_mut()
                .with_context(|| format!("'{key}' does not name a config field"))?;
            slot = object.entry(part.to_string()).or_insert(Value::Null);
        }

        // String fields take the raw text unless it is itself a JSON string
        let parsed = match serde_json::from_str::<Value>(value) {
            Ok(Value::String(s)) => Value::String(s),
            Ok(_) if slot.is_string() => Value::String(value.to_string()),
            Ok(other) => other,
            Err(_) => Value::String(value.to_string()),
        };
        *slot = parsed.clone();

        let config: Self =
            serde_json::from_value(tree).with_context(|| format!("Invalid value for '{key}'"))?;

        let pointer = format!("/{}", key.replace('.', "/"));
        if serde_json::to_value(&config)?.pointer(&pointer) != Some(&parsed) {
            anyhow::bail!("'{key}' does not name a config field");
        }
        Ok(config)
    }

    /// Settings for the client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            client_id: self.client_id.clone(),
            ipc_path: self.ipc_path.clone(),
            reconnect: self.reconnect,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
        }
    }
}
