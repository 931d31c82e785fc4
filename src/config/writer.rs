//! Debounced config persistence.
//!
//! Config can change in bursts (a setting toggled repeatedly, several keys
//! set in a row). [`ConfigWriter`] owns the file and coalesces those bursts:
//! the first update opens a debounce window, later updates in the window
//! replace the pending value, and one write happens when the window closes.
//!
//! There is exactly one writer task per file, so writes never interleave.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::Config;

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

enum WriterCommand {
    Update(Box<Config>),
    Flush(oneshot::Sender<Result<()>>),
}

/// Handle to the writer task.
#[derive(Debug)]
pub struct ConfigWriter {
    tx: mpsc::UnboundedSender<WriterCommand>,
    handle: JoinHandle<()>,
}

impl ConfigWriter {
    /// Spawn a writer for `path`.
    pub fn spawn(path: PathBuf, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(path, debounce, rx));
        Self { tx, handle }
    }

    /// Queue a new config value.
    pub fn update(&self, config: Config) {
        if self.tx.send(WriterCommand::Update(Box::new(config))).is_err() {
            log::warn!("[Config] Writer task gone, update dropped");
        }
    }

    /// Write any pending value now.
    pub async fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(reply_tx))
            .map_err(|_| anyhow!("config writer task is not running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("config writer task stopped before flushing"))?
    }

    /// Flush and stop the task.
    pub async fn shutdown(self) -> Result<()> {
        let result = self.flush().await;
        drop(self.tx);
        let _ = self.handle.await;
        result
    }
}

async fn run_writer(
    path: PathBuf,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
) {
    let mut pending: Option<Config> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(WriterCommand::Update(config)) => {
                    pending = Some(*config);
                    deadline.get_or_insert_with(|| Instant::now() + debounce);
                }
                Some(WriterCommand::Flush(reply)) => {
                    deadline = None;
                    let _ = reply.send(write_pending(&path, pending.take()).await);
                }
                None => {
                    if let Err(e) = write_pending(&path, pending.take()).await {
                        log::error!("[Config] Final write failed: {e:#}");
                    }
                    break;
                }
            },

            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                if let Err(e) = write_pending(&path, pending.take()).await {
                    log::error!("[Config] Write failed: {e:#}");
                }
            }
        }
    }
}

/// Saves on the blocking pool.
async fn write_pending(path: &std::path::Path, pending: Option<Config>) -> Result<()> {
    let Some(config) = pending else {
        return Ok(());
    };
    log::debug!("[Config] Writing {}", path.display());
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || config.save_to(&path))
        .await
        .map_err(|e| anyhow!("config write task failed: {e}"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config_with_id(id: &str) -> Config {
        Config {
            client_id: id.to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_burst_is_coalesced_into_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let writer = ConfigWriter::spawn(path.clone(), Duration::from_millis(200));

        writer.update(config_with_id("1"));
        writer.update(config_with_id("2"));
        writer.update(config_with_id("3"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!path.exists(), "write happened inside the debounce window");

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(Config::load_from(&path).unwrap().client_id, "3");

        writer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_writes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let writer = ConfigWriter::spawn(path.clone(), Duration::from_secs(60));

        writer.update(config_with_id("flushed"));
        writer.flush().await.unwrap();
        assert_eq!(Config::load_from(&path).unwrap().client_id, "flushed");

        // Nothing pending: flush is a no-op
        std::fs::remove_file(&path).unwrap();
        writer.flush().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_shutdown_writes_pending_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let writer = ConfigWriter::spawn(path.clone(), Duration::from_secs(60));

        writer.update(config_with_id("last"));
        writer.shutdown().await.unwrap();
        assert_eq!(Config::load_from(&path).unwrap().client_id, "last");
    }

    #[tokio::test]
    async fn test_write_error_is_reported_by_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("config.json");
        let writer = ConfigWriter::spawn(path, Duration::from_secs(60));

        writer.update(Config::default());
        assert!(writer.flush().await.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_writes_leave_runtime_free() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let writer = ConfigWriter::spawn(path.clone(), Duration::from_secs(60));

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
        });

        for i in 0..20 {
            writer.update(config_with_id(&i.to_string()));
            writer.flush().await.unwrap();
        }
        ticker.abort();

        assert!(ticks.load(Ordering::SeqCst) > 0);
        assert_eq!(Config::load_from(&path).unwrap().client_id, "19");
        writer.shutdown().await.unwrap();
    }
}
