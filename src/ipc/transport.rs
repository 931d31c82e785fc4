//! Socket ownership for a single connection attempt.
//!
//! A [`Transport`] wraps one connected stream and spawns two tasks:
//!
//! - Read task: reassembles frames via [`FrameDecoder`] and forwards them as
//!   [`TransportEvent`]s, in delivery order
//! - Write task: receives encoded frames and writes them to the socket
//!
//! The session that created the transport is its only writer. Dropping the
//! transport aborts both tasks, which closes the socket.

use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::framing::{Frame, FrameDecoder};
use super::IpcError;
use crate::constants::READ_BUFFER_SIZE;

/// Byte stream the transport can run over.
pub trait IpcStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> IpcStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed stream returned by a [`Connector`].
pub type BoxedStream = Box<dyn IpcStream>;

/// Opens the local socket.
///
/// The default [`LocalConnector`] talks to the real host service; tests
/// swap in their own.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to the socket at `path`.
    async fn connect(&self, path: &Path) -> io::Result<BoxedStream>;
}

/// Connects to a Unix domain socket, or a named pipe on Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalConnector;

#[async_trait]
impl Connector for LocalConnector {
    #[cfg(unix)]
    async fn connect(&self, path: &Path) -> io::Result<BoxedStream> {
        let stream = tokio::net::UnixStream::connect(path).await?;
        Ok(Box::new(stream))
    }

    #[cfg(windows)]
    async fn connect(&self, path: &Path) -> io::Result<BoxedStream> {
        let pipe = tokio::net::windows::named_pipe::ClientOptions::new().open(path)?;
        Ok(Box::new(pipe))
    }
}

/// Something that happened on the socket.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete inbound frame.
    Frame(Frame),
    /// Peer closed the socket without error.
    Closed,
    /// Read or write failed.
    Failed(IpcError),
}

/// One live socket connection.
pub struct Transport {
    /// Sender for outgoing encoded frames.
    frame_tx: UnboundedSender<Vec<u8>>,
    /// Events from the read and write tasks.
    event_rx: UnboundedReceiver<TransportEvent>,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport {
    /// Take ownership of a connected stream and start the I/O tasks.
    pub fn start(stream: BoxedStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        let read_handle = tokio::spawn(Self::read_loop(reader, event_tx.clone()));
        let write_handle = tokio::spawn(Self::write_loop(writer, frame_rx, event_tx));

        Self {
            frame_tx,
            event_rx,
            read_handle,
            write_handle,
        }
    }

    /// Queue encoded frame bytes for the write task.
    ///
    /// Returns `false` if the write task has already stopped.
    pub fn send(&self, encoded: Vec<u8>) -> bool {
        self.frame_tx.send(encoded).is_ok()
    }

    /// Stop accepting frames and give the write task `grace` to drain what
    /// is already queued. The socket closes when the transport is dropped.
    pub async fn close(&mut self, grace: Duration) {
        let (closed_tx, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.frame_tx, closed_tx));
        if tokio::time::timeout(grace, &mut self.write_handle).await.is_err() {
            log::warn!("[Transport] Pending writes not flushed within {}ms", grace.as_millis());
        }
    }

    /// Wait for the next socket event.
    ///
    /// Once both tasks are gone this reports [`TransportEvent::Closed`].
    pub async fn next_event(&mut self) -> TransportEvent {
        self.event_rx.recv().await.unwrap_or(TransportEvent::Closed)
    }

    async fn read_loop(
        mut reader: ReadHalf<BoxedStream>,
        event_tx: UnboundedSender<TransportEvent>,
    ) {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    log::info!("[Transport] Host closed the socket");
                    let _ = event_tx.send(TransportEvent::Closed);
                    break;
                }
                Ok(n) => match decoder.feed(&buf[..n]) {
                    Ok(frames) => {
                        for frame in frames {
                            if event_tx.send(TransportEvent::Frame(frame)).is_err() {
                                return; // Session dropped
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("[Transport] Frame decode error: {e}");
                        let _ = event_tx.send(TransportEvent::Failed(IpcError::FrameTooLarge(
                            e.to_string(),
                        )));
                        break;
                    }
                },
                Err(e) => {
                    log::error!("[Transport] Read error: {e}");
                    let _ = event_tx.send(TransportEvent::Failed(IpcError::Io(e.to_string())));
                    break;
                }
            }
        }
    }

    async fn write_loop(
        mut writer: WriteHalf<BoxedStream>,
        mut frame_rx: UnboundedReceiver<Vec<u8>>,
        event_tx: UnboundedSender<TransportEvent>,
    ) {
        while let Some(data) = frame_rx.recv().await {
            if let Err(e) = writer.write_all(&data).await {
                log::error!("[Transport] Write error: {e}");
                let _ = event_tx.send(TransportEvent::Failed(IpcError::Io(e.to_string())));
                return;
            }
        }
        let _ = writer.flush().await;
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.read_handle.abort();
        self.write_handle.abort();
    }
}
