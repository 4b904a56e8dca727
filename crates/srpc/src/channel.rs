//! # Message channel abstraction
//!
//! A minimal, capability-probed interface for moving protocol messages
//! between two peers. The runtime adapts to whatever subset of
//! {send, send-sync, receive} an implementation declares.
//!
//! ## Philosophy
//!
//! - **Message-Oriented**: The channel moves [`Message`] values. Byte
//!   formats, framing, and sockets are the implementation's concern.
//! - **Capability-Driven**: The runtime never assumes a capability; it probes
//!   and downgrades call styles to fit what the channel actually offers.

use std::sync::Arc;

use tokio::sync::oneshot;

use srpc_wire::Message;

use crate::error::Result;
use crate::error::RpcError;
use crate::value::Value;

/// A mechanism for exchanging protocol messages with one peer.
///
/// This trait is object-safe (`Arc<dyn Channel>`). Implementations override
/// the capabilities they support and leave the rest at their defaults, which
/// answer [`RpcError::ChannelUnavailable`].
///
/// # Invariants
///
/// - Messages are delivered in order on a given channel.
/// - `send_sync` returns the peer's reply to this message, not an arbitrary
///   next message.
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    /// True when fire-and-forget delivery is available.
    fn supports_send(&self) -> bool {
        false
    }

    /// True when blocking request/response delivery is available.
    fn supports_send_sync(&self) -> bool {
        false
    }

    /// True when this channel can be pumped for inbound messages.
    fn supports_receive(&self) -> bool {
        false
    }

    /// Queues a message for delivery and returns immediately.
    async fn send(&self, message: Message) -> Result<()> {
        let _ = message;
        Err(RpcError::ChannelUnavailable("send"))
    }

    /// Delivers a message and blocks until the peer's reply arrives.
    async fn send_sync(&self, message: Message) -> Result<Message> {
        let _ = message;
        Err(RpcError::ChannelUnavailable("send_sync"))
    }

    /// Awaits the next inbound delivery.
    ///
    /// Returns `Ok(None)` when the channel is closed.
    async fn recv(&self) -> Result<Option<Inbound>> {
        Err(RpcError::ChannelUnavailable("receive"))
    }
}

/// One inbound delivery: the message, an optional request-scoped reply path,
/// and an optional context value made visible to host code for the duration
/// of the dispatch.
pub struct Inbound {
    pub message: Message,
    /// Where replies to this message go. `None` means the bound channel.
    pub reply: Option<ReplySink>,
    pub context: Option<Value>,
}

impl Inbound {
    pub fn new(message: Message) -> Self {
        Self { message, reply: None, context: None }
    }

    pub fn with_reply(mut self, reply: ReplySink) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// A request-scoped reply path, distinct from the main channel binding.
pub enum ReplySink {
    /// Reply on another channel.
    Channel(Arc<dyn Channel>),
    /// Reply into a one-shot slot; this is how blocking `send_sync`
    /// implementations hand the reply back to the blocked sender.
    Slot(oneshot::Sender<Message>),
}

impl ReplySink {
    /// Delivers the reply. Consumes the sink; a reply path is good for
    /// exactly one message.
    pub async fn deliver(self, message: Message) -> Result<()> {
        match self {
            Self::Channel(ch) => ch.send(message).await,
            Self::Slot(tx) => tx
                .send(message)
                .map_err(|_| RpcError::ChannelUnavailable("reply")),
        }
    }
}
