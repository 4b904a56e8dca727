//! Mock channels for testing.
//!
//! These are used internally by the test suite and are not part of the
//! public API.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use srpc_wire::Message;

use crate::channel::Channel;
use crate::channel::Inbound;
use crate::channel::ReplySink;
use crate::error::Result;
use crate::error::RpcError;

enum Packet {
    Post(Message),
    Request(Message, oneshot::Sender<Message>),
}

/// A duplex in-process channel built on tokio mpsc queues.
///
/// Messages sent on one endpoint are received by the other and vice versa.
/// Capability flags are configurable so downgrade behavior can be exercised.
pub struct DuplexChannel {
    tx: mpsc::UnboundedSender<Packet>,
    rx: Mutex<mpsc::UnboundedReceiver<Packet>>,
    send_async: bool,
    send_sync: bool,
}

impl DuplexChannel {
    /// Creates a pair of fully capable endpoints connected to each other.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        Self::pair_with(true, true)
    }

    /// Creates a connected pair with the given send capabilities.
    pub fn pair_with(send_async: bool, send_sync: bool) -> (Arc<Self>, Arc<Self>) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Arc::new(Self {
            tx: tx_a,
            rx: Mutex::new(rx_b),
            send_async,
            send_sync,
        });
        let b = Arc::new(Self {
            tx: tx_b,
            rx: Mutex::new(rx_a),
            send_async,
            send_sync,
        });

        (a, b)
    }
}

#[async_trait::async_trait]
impl Channel for DuplexChannel {
    fn supports_send(&self) -> bool {
        self.send_async
    }

    fn supports_send_sync(&self) -> bool {
        self.send_sync
    }

    fn supports_receive(&self) -> bool {
        true
    }

    async fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(Packet::Post(message))
            .map_err(|_| RpcError::ChannelUnavailable("send"))
    }

    async fn send_sync(&self, message: Message) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Packet::Request(message, tx))
            .map_err(|_| RpcError::ChannelUnavailable("send_sync"))?;
        rx.await.map_err(|_| RpcError::ChannelUnavailable("reply"))
    }

    async fn recv(&self) -> Result<Option<Inbound>> {
        let mut rx = self.rx.lock().await;
        let packet = rx.recv().await;
        Ok(packet.map(|p| match p {
            Packet::Post(message) => Inbound::new(message),
            Packet::Request(message, tx) => Inbound::new(message).with_reply(ReplySink::Slot(tx)),
        }))
    }
}
