//! Shape contract and service model registry.
//!
//! A *shape* is a named, serde-modeled value type. An *operation* binds a
//! request shape, a response shape, optional streaming message shapes, and
//! a set of declared error shapes. A [`ServiceModel`] collects the
//! operations and shapes of one service so they can be looked up by name at
//! runtime.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::RpcError;
use crate::message::{Header, Message, SERVICE_MODEL_TYPE_HEADER};

// ---------------------------------------------------------------------------
// Shape traits
// ---------------------------------------------------------------------------

/// A named value type that can travel as a message payload.
///
/// Structural constraints (required members, member types, enum values) are
/// enforced by the serde model. [`Shape::validate`] covers constraints serde
/// cannot express.
pub trait Shape: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Fully qualified shape name, e.g. `awstest#Pair`.
    const SHAPE_NAME: &'static str;

    /// Checks constraints beyond the serde model.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` describing the first violated constraint.
    fn validate(&self) -> Result<(), RpcError> {
        Ok(())
    }
}

/// The set of service errors an operation declares.
///
/// Implemented by an enum with one variant per declared error shape.
pub trait ErrorShapes: fmt::Debug + fmt::Display + Send + Sync + Sized + 'static {
    /// Shape names of every declared error.
    fn shape_names() -> &'static [&'static str];

    /// Builds the error for `shape_name` from an application error message.
    ///
    /// # Errors
    ///
    /// Returns a `DeserializationError` if the shape is not declared or its
    /// payload cannot be decoded.
    fn from_message(shape_name: &str, message: &Message) -> Result<Self, RpcError>;
}

/// Error set of an operation that declares no service errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoServiceError {}

impl fmt::Display for NoServiceError {
    fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}

impl std::error::Error for NoServiceError {}

impl ErrorShapes for NoServiceError {
    fn shape_names() -> &'static [&'static str] {
        &[]
    }

    fn from_message(shape_name: &str, _message: &Message) -> Result<Self, RpcError> {
        Err(RpcError::deserialization(format!(
            "no service errors are declared, got '{shape_name}'"
        )))
    }
}

/// Static description of a request-response operation.
pub trait OperationModel: Send + Sync + 'static {
    /// Fully qualified operation name, e.g. `awstest#EchoMessage`.
    const OPERATION_NAME: &'static str;

    type Request: Shape;
    type Response: Shape;
    type Error: ErrorShapes;
}

/// An operation that keeps its stream open after the initial response.
pub trait StreamingOperationModel: OperationModel {
    type OutboundMessage: Shape;
    type InboundMessage: Shape;
}

// ---------------------------------------------------------------------------
// Shape (de)serialization
// ---------------------------------------------------------------------------

/// Serializes `value` into an application message tagged with its shape name.
///
/// # Errors
///
/// Returns a `SerializationError` if the value cannot be encoded as JSON.
pub fn serialize_shape<T: Shape>(value: &T) -> Result<Message, RpcError> {
    let payload = serde_json::to_vec(value).map_err(|e| {
        RpcError::serialization(format!("failed to serialize shape '{}'", T::SHAPE_NAME))
            .with_source(e)
    })?;

    Ok(Message::application(payload)
        .with_header(Header::string(SERVICE_MODEL_TYPE_HEADER, T::SHAPE_NAME)))
}

/// Decodes the payload of `message` as shape `T`.
///
/// An empty payload decodes as an empty JSON object.
///
/// # Errors
///
/// Returns a `DeserializationError` if the payload does not decode as `T`.
pub fn deserialize_shape<T: Shape>(message: &Message) -> Result<T, RpcError> {
    let payload: &[u8] = if message.payload.is_empty() {
        b"{}"
    } else {
        &message.payload
    };

    serde_json::from_slice(payload).map_err(|e| {
        debug!(shape = T::SHAPE_NAME, error = %e, "payload does not decode as shape");
        RpcError::deserialization(format!("failed to deserialize shape '{}'", T::SHAPE_NAME))
            .with_source(e)
    })
}

// ---------------------------------------------------------------------------
// ServiceModel
// ---------------------------------------------------------------------------

/// Shape names bound to one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub name: &'static str,
    pub request_shape: &'static str,
    pub response_shape: &'static str,
    pub outbound_message_shape: Option<&'static str>,
    pub inbound_message_shape: Option<&'static str>,
    pub error_shapes: BTreeSet<&'static str>,
}

impl OperationDescriptor {
    #[must_use]
    pub fn of<O: OperationModel>() -> Self {
        Self {
            name: O::OPERATION_NAME,
            request_shape: <O::Request as Shape>::SHAPE_NAME,
            response_shape: <O::Response as Shape>::SHAPE_NAME,
            outbound_message_shape: None,
            inbound_message_shape: None,
            error_shapes: <O::Error as ErrorShapes>::shape_names()
                .iter()
                .copied()
                .collect(),
        }
    }

    #[must_use]
    pub fn streaming<O: StreamingOperationModel>() -> Self {
        Self {
            outbound_message_shape: Some(<O::OutboundMessage as Shape>::SHAPE_NAME),
            inbound_message_shape: Some(<O::InboundMessage as Shape>::SHAPE_NAME),
            ..Self::of::<O>()
        }
    }

    #[must_use]
    pub fn declares_error(&self, shape_name: &str) -> bool {
        self.error_shapes.contains(shape_name)
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.inbound_message_shape.is_some() || self.outbound_message_shape.is_some()
    }
}

/// Type-erased validation and normalization for one registered shape.
#[derive(Debug, Clone, Copy)]
pub struct ShapeCodec {
    name: &'static str,
    validate: fn(&serde_json::Value) -> Result<(), RpcError>,
    normalize: fn(&serde_json::Value) -> Result<serde_json::Value, RpcError>,
}

impl ShapeCodec {
    #[must_use]
    pub fn of<T: Shape>() -> Self {
        Self {
            name: T::SHAPE_NAME,
            validate: validate_json::<T>,
            normalize: normalize_json::<T>,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

fn decode_json<T: Shape>(value: &serde_json::Value) -> Result<T, RpcError> {
    serde::Deserialize::deserialize(value).map_err(|e: serde_json::Error| {
        debug!(shape = T::SHAPE_NAME, error = %e, "value does not conform to shape");
        RpcError::validation(format!("value does not conform to shape '{}'", T::SHAPE_NAME))
            .with_source(e)
    })
}

fn validate_json<T: Shape>(value: &serde_json::Value) -> Result<(), RpcError> {
    decode_json::<T>(value)?.validate()
}

fn normalize_json<T: Shape>(value: &serde_json::Value) -> Result<serde_json::Value, RpcError> {
    let typed = decode_json::<T>(value)?;
    serde_json::to_value(&typed).map_err(|e| {
        RpcError::serialization(format!("failed to normalize shape '{}'", T::SHAPE_NAME))
            .with_source(e)
    })
}

/// Registry of the operations and shapes of one service.
#[derive(Debug, Default)]
pub struct ServiceModel {
    operations: HashMap<&'static str, OperationDescriptor>,
    shapes: HashMap<&'static str, ShapeCodec>,
}

impl ServiceModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a standalone shape, typically a declared error shape.
    #[must_use]
    pub fn with_shape<T: Shape>(mut self) -> Self {
        self.shapes.insert(T::SHAPE_NAME, ShapeCodec::of::<T>());
        self
    }

    /// Registers a request-response operation and its request/response shapes.
    #[must_use]
    pub fn with_operation<O: OperationModel>(self) -> Self {
        self.insert_operation(OperationDescriptor::of::<O>())
            .with_shape::<O::Request>()
            .with_shape::<O::Response>()
    }

    /// Registers a streaming operation and all of its shapes.
    #[must_use]
    pub fn with_streaming_operation<O: StreamingOperationModel>(self) -> Self {
        self.insert_operation(OperationDescriptor::streaming::<O>())
            .with_shape::<O::Request>()
            .with_shape::<O::Response>()
            .with_shape::<O::OutboundMessage>()
            .with_shape::<O::InboundMessage>()
    }

    fn insert_operation(mut self, descriptor: OperationDescriptor) -> Self {
        self.operations.insert(descriptor.name, descriptor);
        self
    }

    /// Looks up an operation by name.
    ///
    /// # Errors
    ///
    /// Returns an `InternalError` if the service does not define the operation.
    pub fn operation(&self, name: &str) -> Result<&OperationDescriptor, RpcError> {
        self.operations.get(name).ok_or_else(|| {
            debug!(operation = name, "operation lookup missed");
            RpcError::internal(format!("service model does not define operation '{name}'"))
        })
    }

    /// Looks up a shape codec by name.
    ///
    /// # Errors
    ///
    /// Returns an `InternalError` if the shape is not registered.
    pub fn shape(&self, name: &str) -> Result<&ShapeCodec, RpcError> {
        self.shapes.get(name).ok_or_else(|| {
            RpcError::internal(format!("service model does not define shape '{name}'"))
        })
    }

    /// Checks a JSON value against the named shape.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if the value does not conform, or an
    /// `InternalError` if the shape is unknown.
    pub fn validate_value(&self, shape: &str, value: &serde_json::Value) -> Result<(), RpcError> {
        (self.shape(shape)?.validate)(value)
    }

    /// Produces the canonical JSON of `value` as the named shape, dropping
    /// members the shape does not define.
    ///
    /// # Errors
    ///
    /// Same as [`ServiceModel::validate_value`].
    pub fn normalize_value(
        &self,
        shape: &str,
        value: &serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        (self.shape(shape)?.normalize)(value)
    }

    pub fn operation_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.operations.keys().copied()
    }
}
