//! Keep presence in sync with a player.
//!
//! Reads [`PlayerStatus`] JSON lines from an input stream (stdin on the CLI)
//! and publishes the matching activity. Reports that only move the playback
//! position are skipped. After every reconnect the latest activity is sent
//! again, since the host forgets it with the old connection.
//!
//! ```bash
//! my-player --status-json | presence-ipc watch
//! ```

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::activity::Activity;
use crate::client::{ClientHandle, PresenceClient};
use crate::config::Config;
use crate::events::names;
use crate::presence::{PlayerStatus, PresenceTemplates, PresenceTracker};

/// Turns player reports into activity updates.
#[derive(Debug)]
pub struct StatusFeed {
    templates: PresenceTemplates,
    tracker: PresenceTracker,
    latest: Arc<Mutex<Option<Activity>>>,
}

impl StatusFeed {
    /// Feed using the given templates.
    pub fn new(templates: PresenceTemplates) -> Self {
        Self {
            templates,
            tracker: PresenceTracker::new(),
            latest: Arc::new(Mutex::new(None)),
        }
    }

    /// Process one input line.
    ///
    /// Returns the activity to publish, or `None` for blank lines, bad input
    /// and reports that change nothing.
    pub fn process_line(&mut self, line: &str) -> Option<Activity> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let status = match PlayerStatus::from_json(line) {
            Ok(status) => status,
            Err(e) => {
                log::warn!("[Watch] Ignoring invalid status line: {e}");
                return None;
            }
        };

        if !self.tracker.observe(&status) {
            return None;
        }

        let activity = self.templates.activity_for(&status, Utc::now());
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(activity.clone());
        }
        Some(activity)
    }

    /// Most recent activity, shared with the reconnect listener.
    pub fn latest(&self) -> Arc<Mutex<Option<Activity>>> {
        Arc::clone(&self.latest)
    }
}

/// Re-send the latest activity whenever the host becomes ready.
fn resend_on_ready(handle: &ClientHandle, latest: Arc<Mutex<Option<Activity>>>) {
    let sender = handle.clone();
    handle.on(names::READY, move |_event| {
        let activity = latest
            .lock()
            .map_err(|_| anyhow!("latest activity lock poisoned"))?
            .clone();
        if let Some(activity) = activity {
            log::info!("[Watch] Host ready, publishing current activity");
            sender.set_activity(Some(activity));
        }
        Ok(())
    });
}

/// Run until the input ends or Ctrl+C.
///
/// With `config.enabled == false` the input is still consumed and validated
/// but nothing connects to the host.
pub async fn run<R>(config: Config, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut feed = StatusFeed::new(config.presence.clone());

    let client = if config.enabled {
        let client = PresenceClient::new(config.client_config());
        log::info!("[Watch] Publishing presence via {}", client.socket_path().display());
        let handle = client.handle();
        resend_on_ready(&handle, feed.latest());
        Some((handle, client.connect()))
    } else {
        log::info!("[Watch] Presence disabled in config, not connecting");
        None
    };

    let mut lines = input.lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read player status")? else {
                    log::info!("[Watch] Input closed");
                    break;
                };
                if let Some(activity) = feed.process_line(&line) {
                    log::debug!("[Watch] Activity changed: {:?}", activity.details);
                    if let Some((handle, _)) = &client {
                        handle.set_activity(Some(activity));
                    }
                }
            }
            _ = &mut ctrl_c => {
                log::info!("[Watch] Interrupted");
                break;
            }
        }
    }

    if let Some((handle, task)) = client {
        handle.clear_activity();
        handle.stop();
        task.await.context("Presence client task failed")?;
    }

    Ok(())
}
