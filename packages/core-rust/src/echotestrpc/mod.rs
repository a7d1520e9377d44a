//! Model of the echo test service used to exercise the client end to end.
//!
//! Six operations: two plain echoes (one request-response, one streaming),
//! two canned listings, and two that raise the modeled `ServiceError`.

pub mod model;

use crate::error::RpcError;
use crate::message::Message;
use crate::model::{
    deserialize_shape, ErrorShapes, NoServiceError, OperationModel, ServiceModel, Shape,
    StreamingOperationModel,
};

pub use self::model::*;

/// Service errors declared by the echo test operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EchoTestRpcError {
    #[error("{0}")]
    ServiceError(ServiceError),
}

impl ErrorShapes for EchoTestRpcError {
    fn shape_names() -> &'static [&'static str] {
        &[ServiceError::SHAPE_NAME]
    }

    fn from_message(shape_name: &str, message: &Message) -> Result<Self, RpcError> {
        if shape_name == ServiceError::SHAPE_NAME {
            return Ok(Self::ServiceError(deserialize_shape(message)?));
        }
        Err(RpcError::deserialization(format!(
            "undeclared error shape '{shape_name}'"
        )))
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Echoes the request's message back in the response.
pub struct EchoMessage;

impl OperationModel for EchoMessage {
    const OPERATION_NAME: &'static str = "awstest#EchoMessage";
    type Request = EchoMessageRequest;
    type Response = EchoMessageResponse;
    type Error = NoServiceError;
}

/// Opens a stream on which every sent message is echoed back.
pub struct EchoStreamMessages;

impl OperationModel for EchoStreamMessages {
    const OPERATION_NAME: &'static str = "awstest#EchoStreamMessages";
    type Request = EchoStreamingRequest;
    type Response = EchoStreamingResponse;
    type Error = NoServiceError;
}

impl StreamingOperationModel for EchoStreamMessages {
    type OutboundMessage = EchoStreamingMessage;
    type InboundMessage = EchoStreamingMessage;
}

/// Always fails with a `ServiceError`.
pub struct CauseServiceError;

impl OperationModel for CauseServiceError {
    const OPERATION_NAME: &'static str = "awstest#CauseServiceError";
    type Request = CauseServiceErrorRequest;
    type Response = CauseServiceErrorResponse;
    type Error = EchoTestRpcError;
}

/// Accepts the stream, then answers each sent message with a `ServiceError`.
pub struct CauseStreamServiceToError;

impl OperationModel for CauseStreamServiceToError {
    const OPERATION_NAME: &'static str = "awstest#CauseStreamServiceToError";
    type Request = EchoStreamingRequest;
    type Response = EchoStreamingResponse;
    type Error = EchoTestRpcError;
}

impl StreamingOperationModel for CauseStreamServiceToError {
    type OutboundMessage = EchoStreamingMessage;
    type InboundMessage = EchoStreamingMessage;
}

pub struct GetAllProducts;

impl OperationModel for GetAllProducts {
    const OPERATION_NAME: &'static str = "awstest#GetAllProducts";
    type Request = GetAllProductsRequest;
    type Response = GetAllProductsResponse;
    type Error = EchoTestRpcError;
}

pub struct GetAllCustomers;

impl OperationModel for GetAllCustomers {
    const OPERATION_NAME: &'static str = "awstest#GetAllCustomers";
    type Request = GetAllCustomersRequest;
    type Response = GetAllCustomersResponse;
    type Error = EchoTestRpcError;
}

/// Builds the service model of the echo test service.
#[must_use]
pub fn service_model() -> ServiceModel {
    ServiceModel::new()
        .with_operation::<EchoMessage>()
        .with_streaming_operation::<EchoStreamMessages>()
        .with_operation::<CauseServiceError>()
        .with_streaming_operation::<CauseStreamServiceToError>()
        .with_operation::<GetAllProducts>()
        .with_operation::<GetAllCustomers>()
        .with_shape::<ServiceError>()
        .with_shape::<MessageData>()
        .with_shape::<Pair>()
        .with_shape::<Product>()
        .with_shape::<Customer>()
}
