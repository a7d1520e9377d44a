//! Operations that send one request and receive one response.

use std::marker::PhantomData;
use std::sync::Arc;

use eventstream_rpc_core::{Message, OperationError, OperationModel, RpcError, ServiceModel};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::base::{OperationCore, OperationEnded, StreamListener};
use super::{decode_inbound, encode_outbound, OperationOptions};
use crate::client::RpcClient;

/// Forwards the first inbound message; dropping the sender on end reports
/// an interrupted stream.
struct ResponseListener {
    response: Mutex<Option<oneshot::Sender<Message>>>,
}

impl StreamListener for ResponseListener {
    fn on_message(&self, message: Message) {
        match self.response.lock().take() {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => debug!("ignoring message after response"),
        }
    }

    fn on_error(&self, error: RpcError) {
        debug!(error = %error, "request-response stream error");
    }

    fn on_ended(&self, _event: OperationEnded) {
        self.response.lock().take();
    }
}

/// A request-response call of operation `O`.
pub struct RequestResponseOperation<O: OperationModel> {
    client: RpcClient,
    model: Arc<ServiceModel>,
    options: OperationOptions,
    _operation: PhantomData<fn() -> O>,
}

impl<O: OperationModel> RequestResponseOperation<O> {
    /// # Errors
    ///
    /// Returns an `InternalError` if `model` does not define the operation.
    pub fn new(
        client: RpcClient,
        model: Arc<ServiceModel>,
        options: OperationOptions,
    ) -> Result<Self, RpcError> {
        model.operation(O::OPERATION_NAME)?;
        Ok(Self {
            client,
            model,
            options,
            _operation: PhantomData,
        })
    }

    /// Sends `request` and waits for the response.
    ///
    /// The operation's stream is always closed before this returns.
    ///
    /// # Errors
    ///
    /// - `OperationError::Service` if the peer answers with a declared error.
    /// - `ValidationError` / `SerializationError` for a bad request.
    /// - `ClientStateError` if the client is not connected.
    /// - `InternalError` if activation fails.
    /// - `InterruptionError` if the stream ends before a response.
    /// - `DeserializationError` / `ValidationError` for a bad response.
    pub async fn execute(&self, request: O::Request) -> Result<O::Response, OperationError<O::Error>> {
        let (tx, rx) = oneshot::channel();
        let listener = Arc::new(ResponseListener {
            response: Mutex::new(Some(tx)),
        });
        let operation = OperationCore::new(&self.client, O::OPERATION_NAME, listener)?;

        let result = self.run(&operation, &request, rx).await;
        operation.close();
        result
    }

    async fn run(
        &self,
        operation: &Arc<OperationCore>,
        request: &O::Request,
        response: oneshot::Receiver<Message>,
    ) -> Result<O::Response, OperationError<O::Error>> {
        let message = encode_outbound(request, self.options)?;
        operation.activate(message).await?;

        let message = response.await.map_err(|_| {
            RpcError::interruption(format!(
                "stream of operation '{}' ended before a response was received",
                operation.name()
            ))
        })?;

        decode_inbound::<O, O::Response>(&self.model, &message)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use eventstream_rpc_core::echotestrpc::{
        self, CauseServiceError, CauseServiceErrorRequest, EchoMessage, EchoMessageRequest,
        EchoTestRpcError, GetAllProducts, GetAllProductsRequest, MessageData,
    };
    use eventstream_rpc_core::RpcErrorKind;

    use super::*;
    use crate::config::RpcClientConfig;
    use crate::test_support::init_tracing;
    use crate::testkit::{EchoPeer, StreamBehavior};

    async fn connected(peer: &Arc<EchoPeer>) -> RpcClient {
        let config = RpcClientConfig::new("127.0.0.1", 8033).with_connect_timeout(Duration::from_millis(500));
        let client = RpcClient::new(config, &peer.connector()).unwrap();
        client.connect().await.unwrap();
        client
    }

    fn model() -> Arc<ServiceModel> {
        Arc::new(echotestrpc::service_model())
    }

    #[tokio::test]
    async fn echo_round_trip_deep_equals_request() {
        init_tracing();
        let peer = Arc::new(EchoPeer::new());
        let client = connected(&peer).await;
        let operation =
            RequestResponseOperation::<EchoMessage>::new(client.clone(), model(), OperationOptions::default())
                .unwrap();

        let request = EchoMessageRequest {
            message: Some(MessageData {
                string_message: Some("Test!".to_string()),
                ..MessageData::default()
            }),
        };
        let response = operation.execute(request.clone()).await.unwrap();
        assert_eq!(response.message, request.message);
        assert_eq!(client.unclosed_operation_count(), 0);
    }

    #[tokio::test]
    async fn declared_service_error_is_typed() {
        let peer = Arc::new(EchoPeer::new());
        let client = connected(&peer).await;
        let operation = RequestResponseOperation::<CauseServiceError>::new(
            client,
            model(),
            OperationOptions::default(),
        )
        .unwrap();

        let err = operation
            .execute(CauseServiceErrorRequest::default())
            .await
            .unwrap_err();
        match err {
            OperationError::Service(EchoTestRpcError::ServiceError(service_error)) => {
                assert_eq!(
                    service_error.message.as_deref(),
                    Some("Intentionally thrown ServiceError")
                );
            }
            other => panic!("expected a service error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn canned_listing_decodes() {
        let peer = Arc::new(EchoPeer::new());
        let client = connected(&peer).await;
        let operation =
            RequestResponseOperation::<GetAllProducts>::new(client, model(), OperationOptions::default())
                .unwrap();

        let response = operation.execute(GetAllProductsRequest::default()).await.unwrap();
        let products = response.products.unwrap();
        assert!(!products.is_empty());
    }

    #[tokio::test]
    async fn stream_ending_without_response_is_interruption() {
        let peer = Arc::new(EchoPeer::new().with_stream_behavior(StreamBehavior::EndWithoutResponse));
        let client = connected(&peer).await;
        let operation =
            RequestResponseOperation::<EchoMessage>::new(client.clone(), model(), OperationOptions::default())
                .unwrap();

        let err = operation
            .execute(EchoMessageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(RpcErrorKind::Interruption));
        assert_eq!(client.unclosed_operation_count(), 0);
    }

    #[tokio::test]
    async fn activation_failure_is_internal_error() {
        let peer = Arc::new(EchoPeer::new().with_stream_behavior(StreamBehavior::RejectActivation));
        let client = connected(&peer).await;
        let operation =
            RequestResponseOperation::<EchoMessage>::new(client.clone(), model(), OperationOptions::default())
                .unwrap();

        let err = operation
            .execute(EchoMessageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(RpcErrorKind::Internal));
        assert_eq!(client.unclosed_operation_count(), 0);
    }

    #[tokio::test]
    async fn undefined_operation_is_internal_error() {
        let peer = Arc::new(EchoPeer::new());
        let client = connected(&peer).await;
        let empty = Arc::new(ServiceModel::new());

        let err = RequestResponseOperation::<EchoMessage>::new(client, empty, OperationOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), RpcErrorKind::Internal);
    }

    #[tokio::test]
    async fn execute_on_unconnected_client_is_client_state_error() {
        let peer = Arc::new(EchoPeer::new());
        let client = RpcClient::new(RpcClientConfig::new("127.0.0.1", 8033), &peer.connector()).unwrap();
        let operation =
            RequestResponseOperation::<EchoMessage>::new(client, model(), OperationOptions::default())
                .unwrap();

        let err = operation
            .execute(EchoMessageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(RpcErrorKind::ClientState));
    }
}
