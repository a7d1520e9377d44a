//! Operations: one logical stream each, bound to a modeled operation.

pub(crate) mod base;
pub mod request_response;
pub mod streaming;

use eventstream_rpc_core::{
    deserialize_shape, ErrorShapes, Message, MessageType, OperationError, OperationModel,
    RpcError, ServiceModel, Shape,
};

pub use base::{EndReason, OperationEnded, OperationState};
pub use request_response::RequestResponseOperation;
pub use streaming::{StreamingEvent, StreamingOperation};

/// Per-call options for an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationOptions {
    /// Skip client-side validation of outbound values.
    pub disable_validation: bool,
}

/// Decodes an inbound message as shape `T`, or as one of the operation's
/// declared errors when the message is an application error.
pub(crate) fn decode_inbound<O: OperationModel, T: Shape>(
    model: &ServiceModel,
    message: &Message,
) -> Result<T, OperationError<O::Error>> {
    match message.message_type {
        MessageType::ApplicationMessage => {
            let value: T = deserialize_shape(message)?;
            value.validate()?;
            Ok(value)
        }
        MessageType::ApplicationError => Err(decode_service_error::<O>(model, message)),
        other => Err(RpcError::protocol(format!(
            "unexpected {other} message on operation '{}'",
            O::OPERATION_NAME
        ))
        .into()),
    }
}

fn decode_service_error<O: OperationModel>(
    model: &ServiceModel,
    message: &Message,
) -> OperationError<O::Error> {
    let shape = match message.service_model_type() {
        Ok(shape) => shape,
        Err(err) => return err.into(),
    };

    let declared = match model.operation(O::OPERATION_NAME) {
        Ok(descriptor) => descriptor.declares_error(shape),
        Err(err) => return err.into(),
    };
    if !declared {
        return RpcError::deserialization(format!(
            "operation '{}' does not declare error shape '{shape}'",
            O::OPERATION_NAME
        ))
        .into();
    }

    match O::Error::from_message(shape, message) {
        Ok(service_error) => OperationError::Service(service_error),
        Err(err) => err.into(),
    }
}

/// Validates (unless disabled) and serializes an outbound value.
pub(crate) fn encode_outbound<T: Shape>(
    value: &T,
    options: OperationOptions,
) -> Result<Message, RpcError> {
    if !options.disable_validation {
        value.validate()?;
    }
    eventstream_rpc_core::serialize_shape(value)
}
