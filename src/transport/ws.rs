//! WebSocket transport — protobuf frames over `tokio-tungstenite`.
//!
//! DESIGN
//! ======
//! Two tasks per connection. The writer drains a bounded outbound queue and
//! encodes each frame as a binary message; the reader decodes binary
//! messages and forwards them to the session's inbound channel. `send` uses
//! `try_send` so the session never waits on the socket.
//!
//! The connected flag flips to `true` after the handshake and to `false` as
//! soon as either task ends; a local `disconnect` frame is then forwarded so
//! the session can release control and degrade its status.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{CONNECT, DISCONNECT, Transport, TransportError, local_frame};
use crate::frame::Frame;

const OUTBOUND_QUEUE_CAPACITY: usize = 256;
const FLUSH_POLL: Duration = Duration::from_millis(10);

pub struct WsTransport {
    tx: mpsc::Sender<Frame>,
    connected: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WsTransport {
    /// Connect to `url` and start forwarding inbound frames to `inbound`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the handshake fails.
    pub async fn connect(url: &str, inbound: mpsc::Sender<Frame>) -> Result<Self, TransportError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(Box::new(e)))?;
        info!(%url, "room socket connected");

        // Ordered ahead of anything the reader forwards.
        inbound
            .try_send(local_frame(CONNECT))
            .map_err(|_| TransportError::Closed)?;

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));

        let writer_connected = connected.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let bytes = match frames::encode_frame(&frames::Frame::from(&frame)) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, event = %frame.event, "unencodable outbound frame dropped");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Binary(bytes.into())).await {
                    warn!(error = %e, event = %frame.event, "room socket write failed");
                    break;
                }
            }
            writer_connected.store(false, Ordering::SeqCst);
            let _ = sink.close().await;
        });

        let reader_connected = connected.clone();
        let reader_inbound = inbound.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let bytes = match message {
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "room socket read failed");
                        break;
                    }
                };
                let frame = match frames::decode_frame(&bytes).map(Frame::try_from) {
                    Ok(Ok(frame)) => frame,
                    Ok(Err(e)) => {
                        warn!(error = %e, "dropping inbound frame");
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "undecodable inbound message");
                        continue;
                    }
                };
                if reader_inbound.send(frame).await.is_err() {
                    debug!("session gone; stopping socket reader");
                    break;
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            info!("room socket disconnected");
            let _ = reader_inbound.send(local_frame(DISCONNECT)).await;
        });

        Ok(Self { tx, connected, tasks: vec![writer, reader] })
    }

    /// Wait up to `timeout` for the writer to take every queued frame.
    pub async fn flush(&self, timeout: Duration) {
        let drained = async {
            while self.is_connected() && self.tx.capacity() < self.tx.max_capacity() {
                tokio::time::sleep(FLUSH_POLL).await;
            }
        };
        if tokio::time::timeout(timeout, drained).await.is_err() {
            warn!("outbound queue not drained before close");
        }
    }
}

impl Transport for WsTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                warn!(id = %frame.id, event = %frame.event, "outbound queue full; dropping frame");
                Err(TransportError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Room socket URL for an HTTP(S) base URL.
///
/// # Errors
///
/// Returns [`TransportError::InvalidUrl`] for non-HTTP schemes.
pub fn ws_url(base_url: &str) -> Result<String, TransportError> {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/api/ws"));
    }
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/api/ws"));
    }
    Err(TransportError::InvalidUrl(base_url.to_owned()))
}
