//! One-shot activity updates.
//!
//! Connects, waits for `READY`, sends a single `SET_ACTIVITY`, waits for the
//! host's reply to it and disconnects. Useful from scripts and for checking
//! that the host service is reachable.
//!
//! Note that the host clears the activity when the connection that set it
//! closes, so `set` is mostly a connectivity check.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::activity::{Activity, SET_ACTIVITY};
use crate::client::PresenceClient;
use crate::config::Config;
use crate::events::names;

/// Publish `activity` once.
pub async fn set(config: &Config, activity: Activity, wait: Duration) -> Result<()> {
    let reply = send_once(config, Some(activity), wait).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

/// Clear the activity once.
pub async fn clear(config: &Config, wait: Duration) -> Result<()> {
    send_once(config, None, wait).await?;
    println!("Activity cleared");
    Ok(())
}

/// Connect, send one update, and return the host's reply payload.
///
/// # Errors
///
/// Fails if the host does not answer within `wait`, or answers with an
/// `ERROR` event.
pub async fn send_once(config: &Config, activity: Option<Activity>, wait: Duration) -> Result<Value> {
    let client = PresenceClient::new(config.client_config());
    let handle = client.handle();

    let sender = handle.clone();
    handle.once(names::READY, move |_event| {
        sender.set_activity(activity.clone());
        Ok(())
    });

    let (reply_tx, reply_rx) = oneshot::channel::<Value>();
    let reply_tx = Arc::new(Mutex::new(Some(reply_tx)));
    handle.on(SET_ACTIVITY, move |event| {
        let payload = event
            .frame()
            .and_then(|frame| frame.json.clone())
            .unwrap_or(Value::Null);
        if let Some(tx) = reply_tx.lock().ok().and_then(|mut slot| slot.take()) {
            let _ = tx.send(payload);
        }
        Ok(())
    });

    let task = client.connect();
    let reply = tokio::time::timeout(wait, reply_rx).await;

    handle.stop();
    task.await.context("Presence client task failed")?;

    let payload = match reply {
        Ok(Ok(payload)) => payload,
        Ok(Err(_)) => bail!("Presence client stopped before the host replied"),
        Err(_) => bail!(
            "No reply from host within {}s (is it running? socket: {})",
            wait.as_secs(),
            config.client_config().socket_path().display()
        ),
    };

    check_reply(payload)
}

/// Turn an `evt: ERROR` reply into an error.
fn check_reply(payload: Value) -> Result<Value> {
    if payload.get("evt").and_then(Value::as_str) == Some("ERROR") {
        let message = payload
            .pointer("/data/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("Host rejected activity: {message}");
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_reply() {
        let ok = json!({"cmd": "SET_ACTIVITY", "data": {"name": "TIDAL"}, "evt": null});
        assert_eq!(check_reply(ok.clone()).unwrap(), ok);

        let err = check_reply(json!({
            "cmd": "SET_ACTIVITY",
            "evt": "ERROR",
            "data": {"code": 4000, "message": "child \"activity\" fails"}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("child \"activity\" fails"));
    }

    #[tokio::test]
    async fn test_send_once_times_out_without_host() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            ipc_path: Some(dir.path().join("no-host-ipc-0")),
            ..Config::default()
        };

        let err = send_once(&config, None, Duration::from_millis(200)).await.unwrap_err();
        assert!(err.to_string().contains("No reply from host"));
    }
}
