//! DCSS transport link.
//!
//! A thin MessageChannel over one TCP connection to the sequencer. The link
//! owns two tasks: a reader that decodes fixed-size frames into typed
//! inbound messages, and a writer that drains the outbound queue one frame
//! at a time. The single connection is shared by every sender in the
//! process, and the queue keeps writes FIFO so partial frames never
//! interleave on the wire.
//!
//! The link carries no protocol state. A read error or EOF surfaces as a
//! [`LinkEvent::Disconnected`] and it is the control loop's job to reset the
//! handshake and deal with in-flight operations.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DhsResult;
use crate::protocol::{self, InboundMessage, OutboundMessage, FRAME_SIZE};

/// Sending half of the outbound queue. Cloned by every component that
/// emits protocol messages.
pub type OutboundSender = mpsc::UnboundedSender<OutboundMessage>;

/// Event delivered by the link to the control loop.
#[derive(Debug)]
pub enum LinkEvent {
    /// One decoded inbound message.
    Message(InboundMessage),
    /// The connection is gone.
    Disconnected {
        /// What ended the connection.
        reason: String,
    },
}

/// One live connection to DCSS.
pub struct DcssLink {
    events: mpsc::UnboundedReceiver<LinkEvent>,
    outbound: OutboundSender,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl DcssLink {
    /// Dial the sequencer and spawn the reader/writer tasks.
    pub async fn connect(addr: &str) -> DhsResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        info!(%addr, "connected to DCSS");
        let (read_half, write_half) = stream.into_split();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(read_half, event_tx));
        let writer = tokio::spawn(write_loop(write_half, outbound_rx));

        Ok(Self {
            events: event_rx,
            outbound: outbound_tx,
            reader,
            writer,
        })
    }

    /// A handle for queueing outbound messages.
    pub fn sender(&self) -> OutboundSender {
        self.outbound.clone()
    }

    /// Next link event; `None` after the link shut down.
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    /// Close the link, letting the writer drain queued messages first.
    ///
    /// All clones of the outbound sender must be dropped by the caller
    /// before this resolves; the writer exits when the queue closes.
    pub async fn close(self) {
        drop(self.outbound);
        if let Err(err) = self.writer.await {
            if !err.is_cancelled() {
                warn!(error = %err, "DCSS writer task failed");
            }
        }
        self.reader.abort();
        let _ = self.reader.await;
    }
}

async fn read_loop(mut read_half: OwnedReadHalf, events: mpsc::UnboundedSender<LinkEvent>) {
    let mut frame = [0u8; FRAME_SIZE];
    loop {
        match read_half.read_exact(&mut frame).await {
            Ok(_) => {
                let message = match protocol::decode_frame(&frame) {
                    Ok(text) => {
                        debug!(message = %text, "from DCSS");
                        InboundMessage::parse(&text)
                    }
                    Err(err) => Err(err),
                };
                match message {
                    Ok(message) => {
                        if events.send(LinkEvent::Message(message)).is_err() {
                            return;
                        }
                    }
                    // One bad frame is not worth dropping the connection.
                    Err(err) => warn!(error = %err, "discarding malformed frame"),
                }
            }
            Err(err) => {
                let reason = if err.kind() == std::io::ErrorKind::UnexpectedEof {
                    "connection closed by DCSS".to_string()
                } else {
                    err.to_string()
                };
                let _ = events.send(LinkEvent::Disconnected { reason });
                return;
            }
        }
    }
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
) {
    while let Some(message) = outbound.recv().await {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping unencodable outbound message");
                continue;
            }
        };
        debug!(message = %message.to_text(), "to DCSS");
        if let Err(err) = write_half.write_all(&frame).await {
            warn!(error = %err, "write to DCSS failed");
            return;
        }
    }
    let _ = write_half.shutdown().await;
}
