//! presence-ipc - rich presence client for a local IPC host service.
//!
//! This crate publishes an activity status ("Listening to ...") to a desktop
//! host service over its local socket, and keeps doing so across host
//! restarts.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! - **Framing** - `[op][len][json]` codec and stream reassembly
//! - **Transport** - socket read/write tasks
//! - **Session** - handshake state machine, one per connection attempt
//! - **Events** - named listener registry
//! - **Client** - owns all of the above and reconnects per [`supervisor`] policy
//! - **Activity** - payload types, templates and the `SET_ACTIVITY` command
//!
//! # Modules
//!
//! - [`ipc`] - Socket path, framing, transport and session
//! - [`client`] - [`PresenceClient`] and its [`ClientHandle`]
//! - [`activity`] - Activity payload and templates
//! - [`presence`] - Player status to activity mapping
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod activity;
pub mod client;
pub mod commands;
pub mod events;
pub mod ipc;
pub mod presence;
pub mod supervisor;

pub mod config;
pub mod constants;
pub mod env;

// Re-export commonly used types
pub use activity::{Activity, ActivityKind, Assets, Timestamps};
pub use client::{ClientConfig, ClientHandle, PresenceClient};
pub use config::Config;
pub use events::{IpcEvent, ListenerId};
pub use ipc::IpcError;
pub use supervisor::{ConnectionState, ReconnectPolicy};
