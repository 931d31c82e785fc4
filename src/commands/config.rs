//! Config file commands.
//!
//! ```bash
//! presence-ipc config                      # print effective config
//! presence-ipc config path                 # print config file location
//! presence-ipc config init                 # write defaults if missing
//! presence-ipc config get reconnect        # print one key
//! presence-ipc config set reconnect.error_delay_ms 30000
//! presence-ipc socket-path                 # print the resolved socket
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::writer::{ConfigWriter, DEFAULT_DEBOUNCE};
use crate::config::Config;

/// Print the effective config (file plus env overrides).
pub fn show(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Print the config file path.
pub fn path() -> Result<()> {
    println!("{}", Config::config_path()?.display());
    Ok(())
}

/// Write a default config file.
///
/// Existing files are left alone unless `force` is set.
pub fn init(force: bool) -> Result<()> {
    let path = Config::config_path()?;
    if write_default(&path, force)? {
        println!("Wrote {}", path.display());
    } else {
        println!("{} already exists (use --force to overwrite)", path.display());
    }
    Ok(())
}

fn write_default(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    Config::default().save_to(path)?;
    Ok(true)
}

/// Print one value by dot path.
pub fn get(config: &Config, key: &str) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&lookup(config, key)?)?);
    Ok(())
}

fn lookup(config: &Config, key: &str) -> Result<serde_json::Value> {
    let tree = serde_json::to_value(config)?;
    let pointer = format!("/{}", key.replace('.', "/"));
    tree.pointer(&pointer)
        .cloned()
        .with_context(|| format!("Key '{key}' not found in config"))
}

/// Set one value by dot path and persist it.
///
/// Edits the file as stored, without env overrides, so an override is never
/// written back by accident.
pub async fn set(key: &str, value: &str) -> Result<()> {
    let path = Config::config_path()?;
    set_in(&path, key, value).await?;
    println!("Set {key} in {}", path.display());
    Ok(())
}

async fn set_in(path: &Path, key: &str, value: &str) -> Result<Config> {
    let stored = if path.exists() {
        Config::load_from(path)?
    } else {
        Config::default()
    };
    let updated = stored.with_value(key, value)?;

    let writer = ConfigWriter::spawn(PathBuf::from(path), DEFAULT_DEBOUNCE);
    writer.update(updated.clone());
    writer.shutdown().await?;
    Ok(updated)
}

/// Print the socket path the client would connect to.
pub fn socket_path(config: &Config) -> Result<()> {
    println!("{}", config.client_config().socket_path().display());
    Ok(())
}
