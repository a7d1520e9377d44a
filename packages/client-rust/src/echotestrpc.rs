//! Typed client for the echo test service.

use std::sync::Arc;

use eventstream_rpc_core::echotestrpc::{
    self, CauseServiceError, CauseServiceErrorRequest, CauseServiceErrorResponse,
    CauseStreamServiceToError, EchoMessage, EchoMessageRequest, EchoMessageResponse,
    EchoStreamMessages, EchoStreamingRequest, EchoTestRpcError, GetAllCustomers,
    GetAllCustomersRequest, GetAllCustomersResponse, GetAllProducts, GetAllProductsRequest,
    GetAllProductsResponse,
};
use eventstream_rpc_core::{NoServiceError, OperationError, OperationModel, RpcError, ServiceModel};
use tokio::sync::watch;

use crate::client::{DisconnectionEvent, RpcClient};
use crate::config::RpcClientConfig;
use crate::operation::{OperationOptions, RequestResponseOperation, StreamingOperation};
use crate::transport::Connector;

/// One method per echo test operation, over a single [`RpcClient`].
#[derive(Debug, Clone)]
pub struct EchoTestRpcClient {
    client: RpcClient,
    model: Arc<ServiceModel>,
}

impl EchoTestRpcClient {
    /// # Errors
    ///
    /// See [`RpcClient::new`].
    pub fn new(config: RpcClientConfig, connector: &dyn Connector) -> Result<Self, RpcError> {
        Ok(Self::from_client(RpcClient::new(config, connector)?))
    }

    /// Wraps an existing connection.
    #[must_use]
    pub fn from_client(client: RpcClient) -> Self {
        Self {
            client,
            model: Arc::new(echotestrpc::service_model()),
        }
    }

    #[must_use]
    pub fn rpc_client(&self) -> &RpcClient {
        &self.client
    }

    /// # Errors
    ///
    /// See [`RpcClient::connect`].
    pub async fn connect(&self) -> Result<(), RpcError> {
        self.client.connect().await
    }

    pub fn close(&self) {
        self.client.close();
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    #[must_use]
    pub fn disconnections(&self) -> watch::Receiver<Option<DisconnectionEvent>> {
        self.client.disconnections()
    }

    // -- Request-response ----------------------------------------------------

    async fn execute<O: OperationModel>(
        &self,
        request: O::Request,
        options: Option<OperationOptions>,
    ) -> Result<O::Response, OperationError<O::Error>> {
        let operation = RequestResponseOperation::<O>::new(
            self.client.clone(),
            Arc::clone(&self.model),
            options.unwrap_or_default(),
        )?;
        operation.execute(request).await
    }

    /// # Errors
    ///
    /// See [`RequestResponseOperation::execute`].
    pub async fn echo_message(
        &self,
        request: EchoMessageRequest,
        options: Option<OperationOptions>,
    ) -> Result<EchoMessageResponse, OperationError<NoServiceError>> {
        self.execute::<EchoMessage>(request, options).await
    }

    /// # Errors
    ///
    /// See [`RequestResponseOperation::execute`].
    pub async fn get_all_products(
        &self,
        request: GetAllProductsRequest,
        options: Option<OperationOptions>,
    ) -> Result<GetAllProductsResponse, OperationError<EchoTestRpcError>> {
        self.execute::<GetAllProducts>(request, options).await
    }

    /// # Errors
    ///
    /// See [`RequestResponseOperation::execute`].
    pub async fn get_all_customers(
        &self,
        request: GetAllCustomersRequest,
        options: Option<OperationOptions>,
    ) -> Result<GetAllCustomersResponse, OperationError<EchoTestRpcError>> {
        self.execute::<GetAllCustomers>(request, options).await
    }

    /// # Errors
    ///
    /// Always fails against a conforming server, with
    /// [`EchoTestRpcError::ServiceError`].
    pub async fn cause_service_error(
        &self,
        request: CauseServiceErrorRequest,
        options: Option<OperationOptions>,
    ) -> Result<CauseServiceErrorResponse, OperationError<EchoTestRpcError>> {
        self.execute::<CauseServiceError>(request, options).await
    }

    // -- Streaming -----------------------------------------------------------

    /// Creates an inactive echo stream; call `activate()` to start it.
    ///
    /// # Errors
    ///
    /// See [`StreamingOperation::new`].
    pub fn echo_stream_messages(
        &self,
        request: EchoStreamingRequest,
        options: Option<OperationOptions>,
    ) -> Result<StreamingOperation<EchoStreamMessages>, RpcError> {
        StreamingOperation::new(
            &self.client,
            Arc::clone(&self.model),
            request,
            options.unwrap_or_default(),
        )
    }

    /// Creates an inactive stream that answers every message with a
    /// service error.
    ///
    /// # Errors
    ///
    /// See [`StreamingOperation::new`].
    pub fn cause_stream_service_to_error(
        &self,
        request: EchoStreamingRequest,
        options: Option<OperationOptions>,
    ) -> Result<StreamingOperation<CauseStreamServiceToError>, RpcError> {
        StreamingOperation::new(
            &self.client,
            Arc::clone(&self.model),
            request,
            options.unwrap_or_default(),
        )
    }
}
