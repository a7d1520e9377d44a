//! Error taxonomy shared by every layer of the RPC client.
//!
//! Every failure surfaces as an [`RpcError`] tagged with an [`RpcErrorKind`].
//! Operations additionally surface modeled service errors through
//! [`OperationError::Service`].

use std::fmt;

/// Boxed source error carried by an [`RpcError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of an [`RpcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorKind {
    /// A value could not be serialized into a message payload.
    Serialization,
    /// A message payload could not be turned back into a modeled value.
    Deserialization,
    /// The peer violated the protocol, e.g. an invalid connect acknowledgement.
    Protocol,
    /// An invariant inside the client or the transport was violated.
    Internal,
    /// A value did not satisfy its shape's constraints.
    Validation,
    /// A call was made in a lifecycle state that does not permit it.
    ClientState,
    /// The connection failed, timed out, or was lost.
    Network,
    /// A stream ended before the awaited message arrived.
    Interruption,
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Serialization => "SerializationError",
            Self::Deserialization => "DeserializationError",
            Self::Protocol => "ProtocolError",
            Self::Internal => "InternalError",
            Self::Validation => "ValidationError",
            Self::ClientState => "ClientStateError",
            Self::Network => "NetworkError",
            Self::Interruption => "InterruptionError",
        };
        f.write_str(name)
    }
}

/// Error raised by the RPC client and its operations.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {description}")]
pub struct RpcError {
    kind: RpcErrorKind,
    description: String,
    #[source]
    source: Option<BoxError>,
}

impl RpcError {
    #[must_use]
    pub fn new(kind: RpcErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            source: None,
        }
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> RpcErrorKind {
        self.kind
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn serialization(description: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Serialization, description)
    }

    #[must_use]
    pub fn deserialization(description: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Deserialization, description)
    }

    #[must_use]
    pub fn protocol(description: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Protocol, description)
    }

    #[must_use]
    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Internal, description)
    }

    #[must_use]
    pub fn validation(description: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Validation, description)
    }

    #[must_use]
    pub fn client_state(description: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::ClientState, description)
    }

    #[must_use]
    pub fn network(description: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Network, description)
    }

    #[must_use]
    pub fn interruption(description: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Interruption, description)
    }
}

/// Failure of a modeled operation: either an RPC-level error or one of the
/// service errors the operation declares.
#[derive(Debug, thiserror::Error)]
pub enum OperationError<E> {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("ServiceError: {0}")]
    Service(E),
}

impl<E> OperationError<E> {
    /// The RPC error kind, or `None` for a modeled service error.
    #[must_use]
    pub fn kind(&self) -> Option<RpcErrorKind> {
        match self {
            Self::Rpc(err) => Some(err.kind()),
            Self::Service(_) => None,
        }
    }

    #[must_use]
    pub fn as_service(&self) -> Option<&E> {
        match self {
            Self::Rpc(_) => None,
            Self::Service(err) => Some(err),
        }
    }

    /// Returns the service error, or the RPC error if this is not one.
    ///
    /// # Errors
    ///
    /// Returns the wrapped [`RpcError`] when this is not a service error.
    pub fn into_service(self) -> Result<E, RpcError> {
        match self {
            Self::Rpc(err) => Err(err),
            Self::Service(err) => Ok(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn display_includes_kind_and_description() {
        let err = RpcError::network("connection refused");
        assert_eq!(err.to_string(), "NetworkError: connection refused");
        assert_eq!(err.kind(), RpcErrorKind::Network);
        assert_eq!(err.description(), "connection refused");
    }

    #[test]
    fn source_is_exposed_through_error_trait() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = RpcError::internal("send failed").with_source(io);
        let source = err.source().expect("source attached");
        assert_eq!(source.to_string(), "pipe closed");
    }

    #[test]
    fn operation_error_from_rpc_error() {
        let err: OperationError<String> = RpcError::validation("bad value").into();
        assert_eq!(err.kind(), Some(RpcErrorKind::Validation));
        assert!(err.as_service().is_none());
        assert_eq!(
            err.into_service().unwrap_err().kind(),
            RpcErrorKind::Validation
        );
    }

    #[test]
    fn operation_error_service_variant() {
        let err: OperationError<String> = OperationError::Service("boom".to_string());
        assert_eq!(err.kind(), None);
        assert_eq!(err.to_string(), "ServiceError: boom");
        assert_eq!(err.into_service().unwrap(), "boom");
    }
}
