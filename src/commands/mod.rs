//! CLI subcommand implementations for presence-ipc.
//!
//! This module contains the business logic behind each subcommand. Commands
//! are organized into submodules by domain:
//!
//! - [`watch`] - Follow player status on stdin and keep presence in sync
//! - [`activity`] - One-shot set/clear of the activity
//! - [`config`] - Show, query and edit the config file
//!
//! # Usage
//!
//! Commands are invoked from the main CLI dispatcher:
//!
//! ```ignore
//! use presence_ipc::commands;
//!
//! commands::config::show(&config)?;
//! commands::watch::run(config, stdin).await?;
//! ```

pub mod activity;
pub mod config;
pub mod watch;

/// Crate version, for `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used functions for convenience
#[doc(inline)]
pub use activity::{clear as clear_activity, set as set_activity};
#[doc(inline)]
pub use config::socket_path;
