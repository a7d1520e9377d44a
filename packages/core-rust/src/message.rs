//! Protocol message model exchanged with the eventstream transport.
//!
//! The transport owns the wire framing; this module only describes the
//! already-parsed messages it hands to the RPC layer and accepts from it:
//! a message type, a flag word, typed headers, and an opaque payload.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use bytes::Bytes;

use crate::error::RpcError;

/// Header carrying the shape name of an application message payload.
pub const SERVICE_MODEL_TYPE_HEADER: &str = "service-model-type";

/// Header carrying the RPC protocol version on the connect message.
pub const VERSION_HEADER: &str = ":version";

/// Protocol version advertised during the connect handshake.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// Kind of a protocol message.
///
/// `Connect`/`ConnectAck`/`Ping`/`PingResponse` are connection-level;
/// `ApplicationMessage`/`ApplicationError` travel on operation streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ApplicationMessage,
    ApplicationError,
    Ping,
    PingResponse,
    Connect,
    ConnectAck,
    ProtocolError,
    InternalError,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ApplicationMessage => "application-message",
            Self::ApplicationError => "application-error",
            Self::Ping => "ping",
            Self::PingResponse => "ping-response",
            Self::Connect => "connect",
            Self::ConnectAck => "connect-ack",
            Self::ProtocolError => "protocol-error",
            Self::InternalError => "internal-error",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// MessageFlags
// ---------------------------------------------------------------------------

/// Bit set of protocol message flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageFlags(u32);

impl MessageFlags {
    pub const NONE: Self = Self(0);
    /// Set by the server on a `ConnectAck` that accepts the connection.
    pub const CONNECTION_ACCEPTED: Self = Self(0x1);
    /// Ends the logical stream the message travels on.
    pub const TERMINATE_STREAM: Self = Self(0x2);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for MessageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MessageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Typed header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    ByteBuf(Bytes),
    String(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Uuid([u8; 16]),
}

/// A named header attached to a protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: HeaderValue,
}

impl Header {
    #[must_use]
    pub fn new(name: impl Into<String>, value: HeaderValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Shorthand for a string-valued header.
    #[must_use]
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, HeaderValue::String(value.into()))
    }

    /// Returns the value if this is a string header.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A parsed protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub flags: MessageFlags,
    pub headers: Vec<Header>,
    pub payload: Bytes,
}

impl Message {
    /// Creates a message of the given type with no flags, headers, or payload.
    #[must_use]
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            flags: MessageFlags::NONE,
            headers: Vec::new(),
            payload: Bytes::new(),
        }
    }

    /// Creates an `ApplicationMessage` carrying `payload`.
    #[must_use]
    pub fn application(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageType::ApplicationMessage).with_payload(payload)
    }

    /// The empty application message that asks the peer to end a stream.
    #[must_use]
    pub fn terminate_stream() -> Self {
        Self::new(MessageType::ApplicationMessage).with_flags(MessageFlags::TERMINATE_STREAM)
    }

    #[must_use]
    pub fn with_flags(mut self, flags: MessageFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Returns the first header named `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&Header> {
        self.headers.iter().find(|h| h.name == name)
    }

    /// Returns the shape name an application message declares for its payload.
    ///
    /// # Errors
    ///
    /// Returns an `InternalError` if the message is not an application
    /// message or error, or if the `service-model-type` header is missing or
    /// not a string.
    pub fn service_model_type(&self) -> Result<&str, RpcError> {
        if !matches!(
            self.message_type,
            MessageType::ApplicationMessage | MessageType::ApplicationError
        ) {
            return Err(RpcError::internal(format!(
                "expected an application message, got {}",
                self.message_type
            )));
        }

        let header = self.header(SERVICE_MODEL_TYPE_HEADER).ok_or_else(|| {
            RpcError::internal("message did not contain a service-model-type header")
        })?;

        header.as_str().ok_or_else(|| {
            RpcError::internal("service-model-type header was not a string value")
        })
    }

    /// Returns `true` if this is a `ConnectAck` that accepts the connection.
    #[must_use]
    pub fn is_accepted_connect_ack(&self) -> bool {
        self.message_type == MessageType::ConnectAck
            && self.flags.contains(MessageFlags::CONNECTION_ACCEPTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcErrorKind;

    #[test]
    fn flags_contains_requires_all_bits() {
        let both = MessageFlags::CONNECTION_ACCEPTED | MessageFlags::TERMINATE_STREAM;
        assert!(both.contains(MessageFlags::TERMINATE_STREAM));
        assert!(both.contains(MessageFlags::CONNECTION_ACCEPTED));
        assert!(!MessageFlags::NONE.contains(MessageFlags::TERMINATE_STREAM));
        // The empty set is never reported as "contained"
        assert!(!both.contains(MessageFlags::NONE));
    }

    #[test]
    fn accepted_connack_requires_type_and_flag() {
        let accepted =
            Message::new(MessageType::ConnectAck).with_flags(MessageFlags::CONNECTION_ACCEPTED);
        assert!(accepted.is_accepted_connect_ack());

        let rejected = Message::new(MessageType::ConnectAck);
        assert!(!rejected.is_accepted_connect_ack());

        let wrong_type =
            Message::new(MessageType::Ping).with_flags(MessageFlags::CONNECTION_ACCEPTED);
        assert!(!wrong_type.is_accepted_connect_ack());
    }

    #[test]
    fn service_model_type_reads_string_header() {
        let message = Message::application("{}")
            .with_header(Header::string(SERVICE_MODEL_TYPE_HEADER, "awstest#Pair"));
        assert_eq!(message.service_model_type().unwrap(), "awstest#Pair");
    }

    #[test]
    fn service_model_type_rejects_missing_or_non_string_header() {
        let missing = Message::application("{}");
        assert_eq!(
            missing.service_model_type().unwrap_err().kind(),
            RpcErrorKind::Internal
        );

        let not_string = Message::application("{}").with_header(Header::new(
            SERVICE_MODEL_TYPE_HEADER,
            HeaderValue::Int32(7),
        ));
        assert!(not_string.service_model_type().is_err());

        let not_application = Message::new(MessageType::Ping)
            .with_header(Header::string(SERVICE_MODEL_TYPE_HEADER, "awstest#Pair"));
        assert!(not_application.service_model_type().is_err());
    }

    #[test]
    fn terminate_stream_message_shape() {
        let message = Message::terminate_stream();
        assert_eq!(message.message_type, MessageType::ApplicationMessage);
        assert!(message.flags.contains(MessageFlags::TERMINATE_STREAM));
        assert!(message.payload.is_empty());
    }
}
