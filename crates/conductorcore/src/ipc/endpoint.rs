use crate::ConductorError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One named message crossing the process boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcMessage {
    pub channel: String,
    pub payload: serde_json::Value,
}

impl IpcMessage {
    pub fn new(channel: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }
}

/// Raw connection to one remote process.
///
/// Delivery is at-most-once: messages may be lost when the peer goes away,
/// and nothing is acknowledged.
pub trait IpcEndpoint: Send + Sync {
    fn send(&self, message: IpcMessage) -> Result<(), ConductorError>;

    /// Inbound messages from the peer
    fn subscribe(&self) -> broadcast::Receiver<IpcMessage>;

    fn is_connected(&self) -> bool;
}

const INBOUND_CAPACITY: usize = 1024;

/// Endpoint speaking newline-delimited JSON over a byte stream
/// (child process stdio, sockets, in-memory duplex pipes).
pub struct StreamEndpoint {
    outbound: mpsc::UnboundedSender<IpcMessage>,
    inbound: broadcast::Sender<IpcMessage>,
    /// Receiver created before the reader starts, so nothing read early is lost
    first_receiver: Mutex<Option<broadcast::Receiver<IpcMessage>>>,
    /// Cancelled once either direction of the stream is gone
    closed: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl StreamEndpoint {
    pub fn spawn<R, W>(reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound, first_receiver) = broadcast::channel(INBOUND_CAPACITY);
        let closed = CancellationToken::new();

        let writer_task = tokio::spawn(write_loop(writer, outbound_rx, closed.clone()));
        let reader_task = tokio::spawn(read_loop(reader, inbound.clone(), closed.clone()));

        Arc::new(Self {
            outbound,
            inbound,
            first_receiver: Mutex::new(Some(first_receiver)),
            closed,
            tasks: vec![writer_task, reader_task],
        })
    }

    /// Two endpoints wired to each other through an in-memory pipe
    pub fn duplex_pair(buffer: usize) -> (Arc<Self>, Arc<Self>) {
        let (a, b) = tokio::io::duplex(buffer);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        (Self::spawn(a_read, a_write), Self::spawn(b_read, b_write))
    }

    /// Resolves when the peer hangs up or a write fails
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

impl IpcEndpoint for StreamEndpoint {
    fn send(&self, message: IpcMessage) -> Result<(), ConductorError> {
        if !self.is_connected() {
            return Err(ConductorError::TransportUnavailable);
        }
        self.outbound
            .send(message)
            .map_err(|_| ConductorError::TransportUnavailable)
    }

    fn subscribe(&self) -> broadcast::Receiver<IpcMessage> {
        self.first_receiver
            .lock()
            .take()
            .unwrap_or_else(|| self.inbound.subscribe())
    }

    fn is_connected(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

impl Drop for StreamEndpoint {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<IpcMessage>,
    closed: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to serialize IPC message on {}: {}", message.channel, e);
                continue;
            }
        };
        line.push('\n');

        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            tracing::warn!("IPC write failed, closing endpoint: {}", e);
            break;
        }
        tracing::debug!(channel = %message.channel, "IPC message sent");
    }
    closed.cancel();
}

async fn read_loop<R>(reader: R, inbound: broadcast::Sender<IpcMessage>, closed: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                // Undecodable lines are dropped; only EOF or an IO error ends the stream
                match serde_json::from_slice::<IpcMessage>(&line) {
                    Ok(message) => {
                        tracing::debug!(channel = %message.channel, "IPC message received");
                        let _ = inbound.send(message);
                    }
                    Err(e) => tracing::warn!("Dropping malformed IPC line: {}", e),
                }
            }
            Err(e) => {
                tracing::warn!("IPC read failed: {}", e);
                break;
            }
        }
    }
    tracing::debug!("IPC peer closed");
    closed.cancel();
}
