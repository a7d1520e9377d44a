//! In-process echo test server for exercising clients without a network.
//!
//! [`EchoPeer`] implements the echo test service on top of the memory
//! transport, plus scripted failures for the handshake and stream paths.

use std::collections::BTreeMap;
use std::sync::Arc;

use eventstream_rpc_core::echotestrpc::{
    self, CauseServiceError, CauseStreamServiceToError, Customer, GetAllCustomers,
    GetAllCustomersResponse, GetAllProducts, GetAllProductsResponse, Product, ServiceError,
};
use eventstream_rpc_core::{
    serialize_shape, Header, Message, MessageFlags, MessageType, OperationModel, ServiceModel,
    Shape, SERVICE_MODEL_TYPE_HEADER,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::transport::memory::{ConnectionLink, MemoryConnector, PeerHandler, StreamLink};
use crate::transport::TransportError;

/// How the peer answers the connect message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeBehavior {
    /// Acknowledge with the connection-accepted flag.
    #[default]
    Accept,
    /// Acknowledge without the connection-accepted flag.
    Reject,
    /// Never answer.
    Silent,
    /// Drop the connection instead of answering.
    Disconnect,
}

/// How the peer treats operation streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamBehavior {
    /// Serve the echo test service.
    #[default]
    Echo,
    /// End every stream on activation without a response.
    EndWithoutResponse,
    /// Fail every stream activation.
    RejectActivation,
    /// Serve normally, but fail every terminate-stream message.
    FailTerminate,
}

#[derive(Default)]
struct Recorded {
    protocol_messages: Vec<Message>,
    stream_messages: Vec<Message>,
    connection: Option<ConnectionLink>,
    streams: Vec<StreamLink>,
}

/// In-process implementation of the echo test service.
pub struct EchoPeer {
    model: ServiceModel,
    handshake: HandshakeBehavior,
    streams: StreamBehavior,
    recorded: Mutex<Recorded>,
}

impl Default for EchoPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoPeer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            model: echotestrpc::service_model(),
            handshake: HandshakeBehavior::Accept,
            streams: StreamBehavior::Echo,
            recorded: Mutex::new(Recorded::default()),
        }
    }

    #[must_use]
    pub fn with_handshake(mut self, behavior: HandshakeBehavior) -> Self {
        self.handshake = behavior;
        self
    }

    #[must_use]
    pub fn with_stream_behavior(mut self, behavior: StreamBehavior) -> Self {
        self.streams = behavior;
        self
    }

    /// A connector whose transports are served by this peer.
    #[must_use]
    pub fn connector(self: &Arc<Self>) -> MemoryConnector {
        MemoryConnector::new(Arc::clone(self) as Arc<dyn PeerHandler>)
    }

    /// Drops the current connection from the peer side.
    pub fn sever(&self, error: Option<TransportError>) {
        let link = self.recorded.lock().connection.clone();
        if let Some(link) = link {
            link.disconnect(error);
        }
    }

    /// Sends a ping carrying `payload` to the client.
    pub fn ping(&self, payload: Vec<u8>) {
        let link = self.recorded.lock().connection.clone();
        if let Some(link) = link {
            link.send(Message::new(MessageType::Ping).with_payload(payload));
        }
    }

    /// Ends every stream the peer has seen activated.
    pub fn end_streams(&self) {
        let streams = std::mem::take(&mut self.recorded.lock().streams);
        for stream in streams {
            stream.end();
        }
    }

    /// Every connection-level message received so far.
    #[must_use]
    pub fn received_protocol_messages(&self) -> Vec<Message> {
        self.recorded.lock().protocol_messages.clone()
    }

    /// Connect messages received so far.
    #[must_use]
    pub fn connect_messages(&self) -> Vec<Message> {
        self.recorded
            .lock()
            .protocol_messages
            .iter()
            .filter(|m| m.message_type == MessageType::Connect)
            .cloned()
            .collect()
    }

    /// Whether any stream received a terminate-stream message.
    #[must_use]
    pub fn received_terminate(&self) -> bool {
        self.recorded
            .lock()
            .stream_messages
            .iter()
            .any(|m| m.flags.contains(MessageFlags::TERMINATE_STREAM))
    }

    fn service_error() -> Result<Message, TransportError> {
        let mut message = encode(&ServiceError {
            message: Some("Intentionally thrown ServiceError".to_string()),
            value: Some("ValueOfServiceError".to_string()),
        })?;
        message.message_type = MessageType::ApplicationError;
        Ok(message)
    }

    fn canned_response(operation: &str) -> Result<Option<Message>, TransportError> {
        if operation == GetAllProducts::OPERATION_NAME {
            let products = BTreeMap::from([
                (
                    "apple".to_string(),
                    Product {
                        name: Some("Apple".to_string()),
                        price: Some(1.25),
                    },
                ),
                (
                    "pineapple".to_string(),
                    Product {
                        name: Some("Pineapple".to_string()),
                        price: Some(3.5),
                    },
                ),
            ]);
            return encode(&GetAllProductsResponse {
                products: Some(products),
            })
            .map(Some);
        }

        if operation == GetAllCustomers::OPERATION_NAME {
            let customers = vec![Customer {
                id: Some(1),
                first_name: Some("Ada".to_string()),
                last_name: Some("Lovelace".to_string()),
            }];
            return encode(&GetAllCustomersResponse {
                customers: Some(customers),
            })
            .map(Some);
        }

        Ok(None)
    }
}

fn encode<T: Shape>(value: &T) -> Result<Message, TransportError> {
    serialize_shape(value).map_err(|e| TransportError::Other(e.to_string()))
}

/// Re-tags `payload` with `shape`, the way the echo service answers.
fn echo(payload: &bytes::Bytes, shape: &str) -> Message {
    Message::application(payload.clone()).with_header(Header::string(SERVICE_MODEL_TYPE_HEADER, shape))
}

impl PeerHandler for EchoPeer {
    fn on_connect(&self, link: &ConnectionLink) -> Result<(), TransportError> {
        self.recorded.lock().connection = Some(link.clone());
        Ok(())
    }

    fn on_protocol_message(&self, message: Message, link: &ConnectionLink) -> Result<(), TransportError> {
        let is_connect = message.message_type == MessageType::Connect;
        self.recorded.lock().protocol_messages.push(message);
        if !is_connect {
            return Ok(());
        }

        debug!(behavior = ?self.handshake, "echo peer received connect");
        match self.handshake {
            HandshakeBehavior::Accept => link.send(
                Message::new(MessageType::ConnectAck).with_flags(MessageFlags::CONNECTION_ACCEPTED),
            ),
            HandshakeBehavior::Reject => link.send(Message::new(MessageType::ConnectAck)),
            HandshakeBehavior::Silent => {}
            HandshakeBehavior::Disconnect => {
                link.disconnect(Some(TransportError::Refused("handshake refused".to_string())));
            }
        }
        Ok(())
    }

    fn on_stream_activate(
        &self,
        operation: &str,
        message: Message,
        link: &StreamLink,
    ) -> Result<(), TransportError> {
        match self.streams {
            StreamBehavior::RejectActivation => {
                return Err(TransportError::Other("activation rejected".to_string()));
            }
            StreamBehavior::EndWithoutResponse => {
                link.end();
                return Ok(());
            }
            StreamBehavior::Echo | StreamBehavior::FailTerminate => {}
        }

        let Ok(descriptor) = self.model.operation(operation) else {
            link.send(
                Message::new(MessageType::InternalError).with_flags(MessageFlags::TERMINATE_STREAM),
            );
            return Ok(());
        };

        if operation == CauseServiceError::OPERATION_NAME {
            link.send(Self::service_error()?.with_flags(MessageFlags::TERMINATE_STREAM));
            return Ok(());
        }

        if let Some(response) = Self::canned_response(operation)? {
            link.send(response.with_flags(MessageFlags::TERMINATE_STREAM));
            return Ok(());
        }

        if descriptor.is_streaming() {
            self.recorded.lock().streams.push(link.clone());
            link.send(echo(&bytes::Bytes::from_static(b"{}"), descriptor.response_shape));
        } else {
            link.send(
                echo(&message.payload, descriptor.response_shape)
                    .with_flags(MessageFlags::TERMINATE_STREAM),
            );
        }
        Ok(())
    }

    fn on_stream_message(&self, message: Message, link: &StreamLink) -> Result<(), TransportError> {
        let terminate = message.flags.contains(MessageFlags::TERMINATE_STREAM);
        self.recorded.lock().stream_messages.push(message.clone());

        if terminate {
            if self.streams == StreamBehavior::FailTerminate {
                return Err(TransportError::Other("terminate rejected".to_string()));
            }
            link.end();
            return Ok(());
        }

        let operation = link.operation().unwrap_or_default();
        if operation == CauseStreamServiceToError::OPERATION_NAME {
            link.send(Self::service_error()?);
            return Ok(());
        }

        let shape = self
            .model
            .operation(&operation)
            .ok()
            .and_then(|descriptor| descriptor.inbound_message_shape)
            .ok_or_else(|| TransportError::Other(format!("'{operation}' is not a streaming operation")))?;
        link.send(echo(&message.payload, shape));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use eventstream_rpc_core::echotestrpc::{EchoMessage, EchoMessageRequest, MessageData};

    use super::*;
    use crate::transport::{Connector, StreamEvent, StreamParts, TransportOptions, TransportParts};

    fn options() -> TransportOptions {
        TransportOptions {
            host_name: "memory".to_string(),
            port: 0,
            socket_options: None,
            tls: None,
        }
    }

    #[tokio::test]
    async fn echo_operation_answers_with_response_shape() {
        let peer = Arc::new(EchoPeer::new());
        let TransportParts { transport, .. } = peer.connector().create(&options()).unwrap();
        transport.connect().await.unwrap();
        let StreamParts { stream, mut events } = transport.new_stream().unwrap();

        let request = serialize_shape(&EchoMessageRequest {
            message: Some(MessageData {
                string_message: Some("hi".to_string()),
                ..MessageData::default()
            }),
        })
        .unwrap();
        stream
            .activate(EchoMessage::OPERATION_NAME, request.clone())
            .await
            .unwrap();

        let Some(StreamEvent::Message(response)) = events.recv().await else {
            panic!("expected a response");
        };
        assert_eq!(
            response.service_model_type().unwrap(),
            "awstest#EchoMessageResponse"
        );
        assert_eq!(response.payload, request.payload);
        assert!(matches!(events.recv().await, Some(StreamEvent::Ended)));
    }

    #[tokio::test]
    async fn unknown_operation_gets_internal_error_message() {
        let peer = Arc::new(EchoPeer::new());
        let TransportParts { transport, .. } = peer.connector().create(&options()).unwrap();
        let StreamParts { stream, mut events } = transport.new_stream().unwrap();

        stream
            .activate("awstest#Nope", Message::application("{}"))
            .await
            .unwrap();

        let Some(StreamEvent::Message(reply)) = events.recv().await else {
            panic!("expected a reply");
        };
        assert_eq!(reply.message_type, MessageType::InternalError);
        assert!(matches!(events.recv().await, Some(StreamEvent::Ended)));
    }
}
