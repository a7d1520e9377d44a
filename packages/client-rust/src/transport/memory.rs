//! In-process transport whose far end is a [`PeerHandler`].
//!
//! Every client-side send is handed synchronously to the peer, which answers
//! through a [`ConnectionLink`] or [`StreamLink`]. Answers land on the same
//! unbounded channels a socket transport would feed, so the client cannot
//! tell the difference.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eventstream_rpc_core::{Message, MessageFlags};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    ConnectionEvent, Connector, StreamEvent, StreamParts, Transport, TransportError,
    TransportOptions, TransportParts, TransportStream,
};

/// Server side of an in-process connection.
pub trait PeerHandler: Send + Sync + 'static {
    /// Called when the client establishes the connection.
    ///
    /// # Errors
    ///
    /// An error here fails the client's transport connect.
    fn on_connect(&self, link: &ConnectionLink) -> Result<(), TransportError> {
        let _ = link;
        Ok(())
    }

    /// Called for every connection-level message the client sends.
    ///
    /// # Errors
    ///
    /// An error here fails the client's send.
    fn on_protocol_message(&self, message: Message, link: &ConnectionLink) -> Result<(), TransportError>;

    /// Called when the client activates a stream.
    ///
    /// # Errors
    ///
    /// An error here fails the client's activation.
    fn on_stream_activate(
        &self,
        operation: &str,
        message: Message,
        link: &StreamLink,
    ) -> Result<(), TransportError>;

    /// Called for every message the client sends on an activated stream.
    ///
    /// # Errors
    ///
    /// An error here fails the client's send.
    fn on_stream_message(&self, message: Message, link: &StreamLink) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// Links (peer -> client)
// ---------------------------------------------------------------------------

/// Peer-side handle for answering on a connection.
#[derive(Debug, Clone)]
pub struct ConnectionLink {
    events: mpsc::UnboundedSender<ConnectionEvent>,
    closed: Arc<AtomicBool>,
}

impl ConnectionLink {
    /// Delivers a connection-level message to the client.
    pub fn send(&self, message: Message) {
        if self.is_closed() {
            return;
        }
        let _ = self.events.send(ConnectionEvent::ProtocolMessage(message));
    }

    /// Drops the connection, notifying the client once.
    pub fn disconnect(&self, error: Option<TransportError>) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(ConnectionEvent::Disconnected { error });
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Peer-side handle for answering on one stream.
#[derive(Debug, Clone)]
pub struct StreamLink {
    id: u32,
    operation: Arc<Mutex<Option<String>>>,
    events: mpsc::UnboundedSender<StreamEvent>,
    ended: Arc<AtomicBool>,
}

impl StreamLink {
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Operation the stream was activated for, if any.
    #[must_use]
    pub fn operation(&self) -> Option<String> {
        self.operation.lock().clone()
    }

    /// Delivers a message to the client. A message carrying the
    /// terminate-stream flag also ends the stream.
    pub fn send(&self, message: Message) {
        if self.is_ended() {
            return;
        }
        let terminate = message.flags.contains(MessageFlags::TERMINATE_STREAM);
        let _ = self.events.send(StreamEvent::Message(message));
        if terminate {
            self.end();
        }
    }

    /// Ends the stream, notifying the client once.
    pub fn end(&self) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(StreamEvent::Ended);
        }
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Client-side transport
// ---------------------------------------------------------------------------

/// Connector producing in-process transports bound to one peer.
#[derive(Clone)]
pub struct MemoryConnector {
    peer: Arc<dyn PeerHandler>,
}

impl MemoryConnector {
    #[must_use]
    pub fn new(peer: Arc<dyn PeerHandler>) -> Self {
        Self { peer }
    }
}

impl Connector for MemoryConnector {
    fn create(&self, options: &TransportOptions) -> Result<TransportParts, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(host = %options.host_name, port = options.port, "creating memory transport");
        let transport = MemoryTransport {
            peer: Arc::clone(&self.peer),
            link: ConnectionLink {
                events: tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            next_stream_id: AtomicU32::new(1),
        };
        Ok(TransportParts {
            transport: Arc::new(transport),
            events: rx,
        })
    }
}

struct MemoryTransport {
    peer: Arc<dyn PeerHandler>,
    link: ConnectionLink,
    next_stream_id: AtomicU32,
}

impl MemoryTransport {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.link.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.peer.on_connect(&self.link)
    }

    async fn send_protocol_message(&self, message: Message) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.peer.on_protocol_message(message, &self.link)
    }

    fn new_stream(&self) -> Result<StreamParts, TransportError> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let link = StreamLink {
            id: self.next_stream_id.fetch_add(1, Ordering::Relaxed),
            operation: Arc::new(Mutex::new(None)),
            events: tx,
            ended: Arc::new(AtomicBool::new(false)),
        };
        let stream = MemoryStream {
            peer: Arc::clone(&self.peer),
            connection: self.link.clone(),
            link,
            closed: AtomicBool::new(false),
        };
        Ok(StreamParts {
            stream: Arc::new(stream),
            events: rx,
        })
    }

    fn close(&self) {
        self.link.disconnect(None);
    }
}

struct MemoryStream {
    peer: Arc<dyn PeerHandler>,
    connection: ConnectionLink,
    link: StreamLink,
    closed: AtomicBool,
}

impl MemoryStream {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) || self.connection.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransportStream for MemoryStream {
    async fn activate(&self, operation: &str, message: Message) -> Result<(), TransportError> {
        self.ensure_open()?;
        *self.link.operation.lock() = Some(operation.to_string());
        debug!(stream_id = self.link.id, operation, "memory stream activated");
        self.peer.on_stream_activate(operation, message, &self.link)
    }

    async fn send_message(&self, message: Message) -> Result<(), TransportError> {
        self.ensure_open()?;
        if self.link.is_ended() {
            // Half-closed by the peer; late sends are dropped.
            debug!(stream_id = self.link.id, "dropping send on ended stream");
            return Ok(());
        }
        self.peer.on_stream_message(message, &self.link)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use eventstream_rpc_core::MessageType;

    use super::*;

    /// Peer that answers everything by echoing it back.
    struct Mirror;

    impl PeerHandler for Mirror {
        fn on_protocol_message(&self, message: Message, link: &ConnectionLink) -> Result<(), TransportError> {
            link.send(message);
            Ok(())
        }

        fn on_stream_activate(
            &self,
            _operation: &str,
            message: Message,
            link: &StreamLink,
        ) -> Result<(), TransportError> {
            link.send(message);
            Ok(())
        }

        fn on_stream_message(&self, message: Message, link: &StreamLink) -> Result<(), TransportError> {
            link.send(message);
            Ok(())
        }
    }

    fn options() -> TransportOptions {
        TransportOptions {
            host_name: "memory".to_string(),
            port: 0,
            socket_options: None,
            tls: None,
        }
    }

    #[tokio::test]
    async fn protocol_messages_reach_peer_and_back() {
        let TransportParts { transport, mut events } =
            MemoryConnector::new(Arc::new(Mirror)).create(&options()).unwrap();
        transport.connect().await.unwrap();
        transport
            .send_protocol_message(Message::new(MessageType::Ping))
            .await
            .unwrap();

        match events.recv().await {
            Some(ConnectionEvent::ProtocolMessage(m)) => assert_eq!(m.message_type, MessageType::Ping),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_emits_single_disconnect_and_rejects_sends() {
        let TransportParts { transport, mut events } =
            MemoryConnector::new(Arc::new(Mirror)).create(&options()).unwrap();
        transport.close();
        transport.close();

        assert!(matches!(
            events.recv().await,
            Some(ConnectionEvent::Disconnected { error: None })
        ));
        assert!(events.try_recv().is_err());
        assert!(matches!(
            transport.send_protocol_message(Message::new(MessageType::Ping)).await,
            Err(TransportError::Closed)
        ));
        assert!(transport.new_stream().is_err());
    }

    #[tokio::test]
    async fn terminate_flag_ends_stream() {
        let TransportParts { transport, .. } =
            MemoryConnector::new(Arc::new(Mirror)).create(&options()).unwrap();
        let StreamParts { stream, mut events } = transport.new_stream().unwrap();

        stream
            .activate("test#Op", Message::application("{}"))
            .await
            .unwrap();
        stream.send_message(Message::terminate_stream()).await.unwrap();

        assert!(matches!(events.recv().await, Some(StreamEvent::Message(_))));
        assert!(matches!(events.recv().await, Some(StreamEvent::Message(_))));
        assert!(matches!(events.recv().await, Some(StreamEvent::Ended)));

        // Sends after the peer ended the stream are dropped, not failed
        stream.send_message(Message::application("{}")).await.unwrap();

        stream.close();
        assert!(stream.send_message(Message::application("{}")).await.is_err());
    }
}
