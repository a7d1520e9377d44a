//! Transport contract consumed by the RPC client.
//!
//! A transport owns the socket, framing, and stream multiplexing. The client
//! only sees whole [`Message`]s: connection-level messages and the
//! disconnection notice arrive on a [`ConnectionEvent`] channel, and each
//! logical stream gets its own [`StreamEvent`] channel.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use eventstream_rpc_core::Message;
use tokio::sync::mpsc;

use crate::config::{SocketOptions, TlsOptions};

/// Errors reported by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection is closed")]
    Closed,

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Endpoint and socket settings a connector builds a transport from.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub host_name: String,
    pub port: u16,
    pub socket_options: Option<SocketOptions>,
    pub tls: Option<TlsOptions>,
}

/// Connection-level events delivered to the client.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A message not bound to any stream (connect ack, ping, ...).
    ProtocolMessage(Message),
    /// The connection is gone. `error` is `None` for a clean close.
    Disconnected { error: Option<TransportError> },
}

/// Events of one logical stream.
#[derive(Debug)]
pub enum StreamEvent {
    Message(Message),
    /// The stream ended; no further messages follow.
    Ended,
}

/// A freshly created transport and the receiving end of its connection events.
pub struct TransportParts {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

/// A freshly created stream and the receiving end of its events.
pub struct StreamParts {
    pub stream: Arc<dyn TransportStream>,
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
}

/// Builds transports. One transport is created per client.
pub trait Connector: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the transport cannot be constructed from `options`.
    fn create(&self, options: &TransportOptions) -> Result<TransportParts, TransportError>;
}

/// One multiplexed connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the underlying connection.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Sends a connection-level message.
    async fn send_protocol_message(&self, message: Message) -> Result<(), TransportError>;

    /// Opens a new, not yet activated, logical stream.
    fn new_stream(&self) -> Result<StreamParts, TransportError>;

    /// Closes the connection. Idempotent.
    fn close(&self);
}

/// One logical stream on a connection.
#[async_trait]
pub trait TransportStream: Send + Sync {
    /// Binds the stream to `operation` and sends its first message.
    async fn activate(&self, operation: &str, message: Message) -> Result<(), TransportError>;

    /// Sends a message on an activated stream.
    async fn send_message(&self, message: Message) -> Result<(), TransportError>;

    /// Releases the stream. Idempotent.
    fn close(&self);
}
