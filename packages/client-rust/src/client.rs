//! Connection-level RPC client.
//!
//! Owns the transport, runs the connect handshake, emits the disconnection
//! event at most once, and tracks every unclosed operation so a client close
//! can close them all.
//!
//! State machine: None -> Connecting -> Connected -> Finished -> Closed.
//! A failed handshake goes Connecting -> Finished. `close()` reaches Closed
//! from any state.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use eventstream_rpc_core::{Header, Message, MessageType, RpcError, PROTOCOL_VERSION, VERSION_HEADER};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::RpcClientConfig;
use crate::operation::base::OperationCore;
use crate::transport::{
    ConnectionEvent, Connector, StreamParts, Transport, TransportError, TransportOptions,
    TransportParts,
};

/// Lifecycle state of an [`RpcClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Constructed, `connect()` not yet called.
    None,
    /// The handshake is in flight.
    Connecting,
    /// The handshake succeeded; operations may be started.
    Connected,
    /// The connection failed or was lost; a close is scheduled.
    Finished,
    /// `close()` has run. Terminal.
    Closed,
}

/// Why the connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `close()` was called on a connected client.
    UserInitiated,
    /// The peer closed the connection cleanly.
    ConnectionClosed,
    /// The transport failed.
    Transport(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserInitiated => f.write_str("User-initiated disconnect"),
            Self::ConnectionClosed => f.write_str("connection closed by peer"),
            Self::Transport(error) => write!(f, "transport error: {error}"),
        }
    }
}

/// Emitted once when a successfully connected client loses its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectionEvent {
    pub reason: DisconnectReason,
}

/// Identifier of an operation in the client's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct OperationId(pub u64);

/// Mutable client state, guarded by one lock.
struct Bookkeeping {
    state: ClientState,
    /// Armed by a successful connect, consumed by the first close.
    emit_disconnect_on_close: bool,
    /// `None` once the client is closed.
    unclosed_operations: Option<HashMap<OperationId, Weak<OperationCore>>>,
    disconnection_reason: Option<DisconnectReason>,
}

struct ClientInner {
    config: RpcClientConfig,
    transport: Arc<dyn Transport>,
    /// Taken by the handshake, then owned by the event pump.
    pending_events: Mutex<Option<mpsc::UnboundedReceiver<ConnectionEvent>>>,
    bookkeeping: Mutex<Bookkeeping>,
    disconnections: watch::Sender<Option<DisconnectionEvent>>,
    next_operation_id: AtomicU64,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.transport.close();
    }
}

/// Handle to an RPC connection. Clones share the same connection.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("host_name", &self.inner.config.host_name)
            .field("port", &self.inner.config.port)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Validates `config` and builds the transport through `connector`.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an invalid configuration, or an
    /// `InternalError` if the transport cannot be created.
    pub fn new(config: RpcClientConfig, connector: &dyn Connector) -> Result<Self, RpcError> {
        config.validate()?;

        let options = TransportOptions {
            host_name: config.host_name.clone(),
            port: config.port,
            socket_options: config.socket_options.clone(),
            tls: config.tls.clone(),
        };
        let TransportParts { transport, events } = connector
            .create(&options)
            .map_err(|e| RpcError::internal("failed to create transport").with_source(e))?;

        let (disconnections, _) = watch::channel(None);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                pending_events: Mutex::new(Some(events)),
                bookkeeping: Mutex::new(Bookkeeping {
                    state: ClientState::None,
                    emit_disconnect_on_close: false,
                    unclosed_operations: Some(HashMap::new()),
                    disconnection_reason: None,
                }),
                disconnections,
                next_operation_id: AtomicU64::new(1),
            }),
        })
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.inner.bookkeeping.lock().state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Number of operations created on this client and not yet closed.
    #[must_use]
    pub fn unclosed_operation_count(&self) -> usize {
        self.inner
            .bookkeeping
            .lock()
            .unclosed_operations
            .as_ref()
            .map_or(0, HashMap::len)
    }

    /// Connects and performs the RPC handshake. May be called once.
    ///
    /// # Errors
    ///
    /// - `ClientStateError` if `connect()` was already called.
    /// - `NetworkError` if the transport fails, the connection drops during
    ///   the handshake, or the handshake exceeds the connect timeout.
    /// - `ProtocolError` if the peer does not accept the connection.
    /// - Whatever the connect transform fails with.
    pub async fn connect(&self) -> Result<(), RpcError> {
        {
            let mut book = self.inner.bookkeeping.lock();
            if book.state != ClientState::None {
                return Err(RpcError::client_state(
                    "RpcClient::connect() can only be called once",
                ));
            }
            book.state = ClientState::Connecting;
        }

        let timeout = self.inner.config.connect_timeout;
        info!(
            host = %self.inner.config.host_name,
            port = self.inner.config.port,
            "connecting"
        );

        let events = match tokio::time::timeout(timeout, self.handshake()).await {
            Ok(Ok(events)) => events,
            Ok(Err(err)) => {
                warn!(error = %err, "connect failed");
                self.finish_failed_connect();
                return Err(err);
            }
            Err(_elapsed) => {
                warn!(timeout_ms = timeout.as_millis(), "connect timed out");
                self.finish_failed_connect();
                return Err(RpcError::network(format!(
                    "connection attempt timed out after {}ms",
                    timeout.as_millis()
                )));
            }
        };

        {
            let mut book = self.inner.bookkeeping.lock();
            if book.state != ClientState::Connecting {
                return Err(RpcError::internal(
                    "client was closed while the connection was being established",
                ));
            }
            book.state = ClientState::Connected;
            book.emit_disconnect_on_close = true;
        }

        info!(host = %self.inner.config.host_name, "connected");
        self.spawn_event_pump(events);
        Ok(())
    }

    async fn handshake(&self) -> Result<mpsc::UnboundedReceiver<ConnectionEvent>, RpcError> {
        let mut events = self
            .inner
            .pending_events
            .lock()
            .take()
            .ok_or_else(|| RpcError::internal("connection events already consumed"))?;

        self.inner.transport.connect().await.map_err(|e| {
            RpcError::network("failed to establish connection").with_source(e)
        })?;

        let mut connect = Message::new(MessageType::Connect);
        if let Some(transform) = &self.inner.config.connect_transform {
            connect = transform(connect).await?;
        }
        connect
            .headers
            .push(Header::string(VERSION_HEADER, PROTOCOL_VERSION));

        self.inner
            .transport
            .send_protocol_message(connect)
            .await
            .map_err(|e| RpcError::network("failed to send connect message").with_source(e))?;

        let connack = match events.recv().await {
            Some(ConnectionEvent::ProtocolMessage(message)) => message,
            Some(ConnectionEvent::Disconnected { error }) => {
                let err = RpcError::network("connection closed during handshake");
                return Err(match error {
                    Some(cause) => err.with_source(cause),
                    None => err,
                });
            }
            None => return Err(RpcError::network("connection closed during handshake")),
        };

        if !connack.is_accepted_connect_ack() {
            return Err(RpcError::protocol(format!(
                "connection was not accepted (received {})",
                connack.message_type
            )));
        }

        debug!("connect acknowledged");
        Ok(events)
    }

    fn finish_failed_connect(&self) {
        {
            let mut book = self.inner.bookkeeping.lock();
            if book.state != ClientState::Connecting {
                return;
            }
            book.state = ClientState::Finished;
        }
        self.schedule_close();
    }

    fn schedule_close(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            client.close();
        });
    }

    fn spawn_event_pump(&self, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                let client = RpcClient { inner };
                match event {
                    ConnectionEvent::ProtocolMessage(message) => {
                        client.on_protocol_message(message).await;
                    }
                    ConnectionEvent::Disconnected { error } => {
                        client.on_disconnected(error);
                        break;
                    }
                }
            }
        });
    }

    async fn on_protocol_message(&self, message: Message) {
        match message.message_type {
            MessageType::Ping => {
                let pong = Message::new(MessageType::PingResponse).with_payload(message.payload);
                if let Err(err) = self.inner.transport.send_protocol_message(pong).await {
                    warn!(error = %err, "failed to answer ping");
                }
            }
            MessageType::ProtocolError | MessageType::InternalError => {
                warn!(message_type = %message.message_type, "peer reported a connection error");
            }
            other => debug!(message_type = %other, "ignoring connection-level message"),
        }
    }

    fn on_disconnected(&self, error: Option<TransportError>) {
        {
            let mut book = self.inner.bookkeeping.lock();
            if book.state == ClientState::Closed {
                return;
            }
            if book.disconnection_reason.is_none() {
                book.disconnection_reason = Some(match &error {
                    Some(err) => DisconnectReason::Transport(err.to_string()),
                    None => DisconnectReason::ConnectionClosed,
                });
            }
            book.state = ClientState::Finished;
        }
        warn!(error = ?error, "connection lost");
        self.schedule_close();
    }

    /// Closes the client: emits the owed disconnection event, closes every
    /// unclosed operation, then closes the transport. Idempotent.
    ///
    /// Operations closed here send no terminate message; the transport
    /// close ends their streams.
    pub fn close(&self) {
        let (operations, disconnect) = {
            let mut book = self.inner.bookkeeping.lock();
            if book.state == ClientState::Closed {
                return;
            }
            book.state = ClientState::Closed;
            let disconnect = std::mem::take(&mut book.emit_disconnect_on_close).then(|| {
                book.disconnection_reason
                    .take()
                    .unwrap_or(DisconnectReason::UserInitiated)
            });
            (book.unclosed_operations.take().unwrap_or_default(), disconnect)
        };

        info!(operations = operations.len(), "closing client");

        if let Some(reason) = disconnect {
            info!(%reason, "disconnected");
            self.inner
                .disconnections
                .send_replace(Some(DisconnectionEvent { reason }));
        }

        for operation in operations.into_values().filter_map(|weak| weak.upgrade()) {
            operation.close_for_shutdown();
        }

        self.inner.transport.close();
    }

    /// Subscribes to the disconnection event. The value becomes `Some` once.
    #[must_use]
    pub fn disconnections(&self) -> watch::Receiver<Option<DisconnectionEvent>> {
        self.inner.disconnections.subscribe()
    }

    /// Waits for the disconnection event.
    pub async fn disconnected(&self) -> Option<DisconnectionEvent> {
        let mut rx = self.disconnections();
        let event = rx.wait_for(Option::is_some).await.ok()?;
        (*event).clone()
    }

    // -- Operation support ---------------------------------------------------

    pub(crate) fn next_operation_id(&self) -> OperationId {
        OperationId(self.inner.next_operation_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn new_stream(&self) -> Result<StreamParts, RpcError> {
        let state = self.state();
        if state != ClientState::Connected {
            return Err(RpcError::client_state(format!(
                "cannot open a stream while the client is {state:?}"
            )));
        }
        self.inner
            .transport
            .new_stream()
            .map_err(|e| RpcError::internal("failed to create stream").with_source(e))
    }

    pub(crate) fn register_operation(
        &self,
        id: OperationId,
        operation: Weak<OperationCore>,
    ) -> Result<(), RpcError> {
        let mut book = self.inner.bookkeeping.lock();
        if book.state != ClientState::Connected {
            return Err(RpcError::client_state(format!(
                "cannot start an operation while the client is {:?}",
                book.state
            )));
        }
        let operations = book
            .unclosed_operations
            .as_mut()
            .ok_or_else(|| RpcError::client_state("client is closed"))?;
        operations.insert(id, operation);
        Ok(())
    }

    pub(crate) fn remove_operation(&self, id: OperationId) {
        if let Some(operations) = self.inner.bookkeeping.lock().unclosed_operations.as_mut() {
            operations.remove(&id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use eventstream_rpc_core::RpcErrorKind;

    use super::*;
    use crate::test_support::init_tracing;
    use crate::testkit::{EchoPeer, HandshakeBehavior};

    fn config() -> RpcClientConfig {
        RpcClientConfig::new("127.0.0.1", 8033).with_connect_timeout(Duration::from_millis(500))
    }

    fn client_for(peer: &Arc<EchoPeer>) -> RpcClient {
        RpcClient::new(config(), &peer.connector()).unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    struct FailingConnector;

    impl Connector for FailingConnector {
        fn create(&self, _options: &TransportOptions) -> Result<TransportParts, TransportError> {
            Err(TransportError::Other("no route".to_string()))
        }
    }

    #[test]
    fn construction_failure_is_internal_error() {
        let err = RpcClient::new(config(), &FailingConnector).unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::Internal);
    }

    #[test]
    fn construction_validates_config() {
        let peer = Arc::new(EchoPeer::new());
        let err = RpcClient::new(RpcClientConfig::default(), &peer.connector()).unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::Validation);
    }

    #[tokio::test]
    async fn connect_succeeds_on_accepted_ack() {
        init_tracing();
        let peer = Arc::new(EchoPeer::new());
        let client = client_for(&peer);
        assert_eq!(client.state(), ClientState::None);

        client.connect().await.unwrap();
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[tokio::test]
    async fn connect_twice_is_client_state_error() {
        let peer = Arc::new(EchoPeer::new());
        let client = client_for(&peer);
        client.connect().await.unwrap();

        let err = client.connect().await.unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::ClientState);
        assert_eq!(client.state(), ClientState::Connected);
    }

    #[tokio::test]
    async fn connect_message_carries_transform_then_version_header() {
        let peer = Arc::new(EchoPeer::new());
        let config = config().with_connect_transform(|message: Message| async move {
            Ok(message
                .with_header(Header::string("authorization", "token"))
                .with_payload(r#"{"authToken":"token"}"#))
        });
        let client = RpcClient::new(config, &peer.connector()).unwrap();
        client.connect().await.unwrap();

        let connects = peer.connect_messages();
        assert_eq!(connects.len(), 1);
        let connect = &connects[0];
        assert_eq!(connect.headers.len(), 2);
        assert_eq!(connect.headers[0].name, "authorization");
        assert_eq!(connect.headers[1].name, VERSION_HEADER);
        assert_eq!(connect.headers[1].as_str(), Some(PROTOCOL_VERSION));
        assert_eq!(&connect.payload[..], br#"{"authToken":"token"}"#);
    }

    #[tokio::test]
    async fn failing_transform_fails_connect() {
        let peer = Arc::new(EchoPeer::new());
        let config = config().with_connect_transform(|_message: Message| async move {
            Err(RpcError::internal("credentials unavailable"))
        });
        let client = RpcClient::new(config, &peer.connector()).unwrap();

        let err = client.connect().await.unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::Internal);
        assert_eq!(client.state(), ClientState::Finished);
        assert!(peer.connect_messages().is_empty());
    }

    #[tokio::test]
    async fn rejected_ack_is_protocol_error_and_closes() {
        let peer = Arc::new(EchoPeer::new().with_handshake(HandshakeBehavior::Reject));
        let client = client_for(&peer);

        let err = client.connect().await.unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::Protocol);
        assert_eq!(client.state(), ClientState::Finished);

        settle().await;
        assert_eq!(client.state(), ClientState::Closed);
        // A connection that never completed owes no disconnection event
        assert!(client.disconnections().borrow().is_none());
    }

    #[tokio::test]
    async fn missing_ack_times_out_with_network_error() {
        let peer = Arc::new(EchoPeer::new().with_handshake(HandshakeBehavior::Silent));
        let config = config().with_connect_timeout(Duration::from_millis(50));
        let client = RpcClient::new(config, &peer.connector()).unwrap();

        let err = client.connect().await.unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::Network);

        settle().await;
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn disconnect_during_handshake_is_network_error() {
        let peer = Arc::new(EchoPeer::new().with_handshake(HandshakeBehavior::Disconnect));
        let client = client_for(&peer);

        let err = client.connect().await.unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::Network);
        settle().await;
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn close_emits_exactly_one_user_initiated_disconnect() {
        let peer = Arc::new(EchoPeer::new());
        let client = client_for(&peer);
        client.connect().await.unwrap();
        let mut rx = client.disconnections();

        client.close();
        client.close();

        rx.changed().await.unwrap();
        assert_eq!(
            *rx.borrow_and_update(),
            Some(DisconnectionEvent {
                reason: DisconnectReason::UserInitiated
            })
        );
        let again = tokio::time::timeout(Duration::from_millis(50), rx.changed()).await;
        assert!(again.is_err(), "disconnection must be emitted once");
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn close_before_connect_emits_nothing() {
        let peer = Arc::new(EchoPeer::new());
        let client = client_for(&peer);
        client.close();
        assert_eq!(client.state(), ClientState::Closed);
        assert!(client.disconnections().borrow().is_none());

        let err = client.connect().await.unwrap_err();
        assert_eq!(err.kind(), RpcErrorKind::ClientState);
    }

    #[tokio::test]
    async fn peer_disconnect_finishes_then_closes() {
        let peer = Arc::new(EchoPeer::new());
        let client = client_for(&peer);
        client.connect().await.unwrap();

        peer.sever(Some(TransportError::Other("socket reset".to_string())));

        let event = client.disconnected().await.unwrap();
        assert_eq!(
            event.reason,
            DisconnectReason::Transport("socket reset".to_string())
        );
        settle().await;
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn closes_after_peer_disconnect_emit_nothing_more() {
        let peer = Arc::new(EchoPeer::new());
        let client = client_for(&peer);
        client.connect().await.unwrap();
        let mut rx = client.disconnections();

        peer.sever(Some(TransportError::Other("socket reset".to_string())));

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());
        settle().await;
        assert_eq!(client.state(), ClientState::Closed);

        client.close();
        client.close();

        let again = tokio::time::timeout(Duration::from_millis(50), rx.changed()).await;
        assert!(again.is_err(), "disconnection must be emitted once");
        assert_eq!(
            client.disconnected().await.map(|event| event.reason),
            Some(DisconnectReason::Transport("socket reset".to_string()))
        );
    }

    #[tokio::test]
    async fn clean_peer_close_reports_connection_closed() {
        let peer = Arc::new(EchoPeer::new());
        let client = client_for(&peer);
        client.connect().await.unwrap();

        peer.sever(None);

        let event = client.disconnected().await.unwrap();
        assert_eq!(event.reason, DisconnectReason::ConnectionClosed);
    }

    #[tokio::test]
    async fn ping_is_answered() {
        let peer = Arc::new(EchoPeer::new());
        let client = client_for(&peer);
        client.connect().await.unwrap();

        peer.ping(b"hb".to_vec());
        let mut answered = false;
        for _ in 0..50 {
            settle().await;
            if let Some(pong) = peer
                .received_protocol_messages()
                .into_iter()
                .find(|m| m.message_type == MessageType::PingResponse)
            {
                assert_eq!(&pong.payload[..], b"hb");
                answered = true;
                break;
            }
        }
        assert!(answered, "ping was not answered");
    }

    #[tokio::test]
    async fn streams_require_connected_client() {
        let peer = Arc::new(EchoPeer::new());
        let client = client_for(&peer);

        let err = client.new_stream().err().unwrap();
        assert_eq!(err.kind(), RpcErrorKind::ClientState);

        client.connect().await.unwrap();
        assert!(client.new_stream().is_ok());

        client.close();
        assert!(client.new_stream().is_err());
    }
}
