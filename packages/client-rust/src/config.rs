//! Client configuration: endpoint, socket and TLS options, connect transform.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eventstream_rpc_core::{Message, RpcError};
use futures_util::future::{BoxFuture, FutureExt};

/// Environment variable holding the host name (or domain socket path).
pub const HOST_ENV: &str = "EVENTSTREAM_RPC_HOST";
/// Environment variable holding the port.
pub const PORT_ENV: &str = "EVENTSTREAM_RPC_PORT";
/// Environment variable holding the connect timeout in milliseconds.
pub const CONNECT_TIMEOUT_ENV: &str = "EVENTSTREAM_RPC_CONNECT_TIMEOUT_MS";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Async hook that rewrites the connect message before it is sent, e.g. to
/// attach authentication.
pub type ConnectTransform =
    Arc<dyn Fn(Message) -> BoxFuture<'static, Result<Message, RpcError>> + Send + Sync>;

/// Configuration for an [`RpcClient`](crate::RpcClient).
#[derive(Clone)]
pub struct RpcClientConfig {
    /// Host name, or the socket path for local-domain sockets.
    pub host_name: String,
    /// Port to connect to. Ignored for local-domain sockets.
    pub port: u16,
    /// Optional socket-level settings passed through to the transport.
    pub socket_options: Option<SocketOptions>,
    /// Optional TLS settings passed through to the transport.
    pub tls: Option<TlsOptions>,
    /// Applied to the connect message before the version header is added.
    pub connect_transform: Option<ConnectTransform>,
    /// Upper bound on the whole connect handshake.
    pub connect_timeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            host_name: String::new(),
            port: 0,
            socket_options: None,
            tls: None,
            connect_transform: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl fmt::Debug for RpcClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClientConfig")
            .field("host_name", &self.host_name)
            .field("port", &self.port)
            .field("socket_options", &self.socket_options)
            .field("tls", &self.tls)
            .field("connect_transform", &self.connect_transform.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl RpcClientConfig {
    #[must_use]
    pub fn new(host_name: impl Into<String>, port: u16) -> Self {
        Self {
            host_name: host_name.into(),
            port,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = Some(options);
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Installs an async connect transform.
    #[must_use]
    pub fn with_connect_transform<F, Fut>(mut self, transform: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message, RpcError>> + Send + 'static,
    {
        self.connect_transform = Some(Arc::new(move |message| transform(message).boxed()));
        self
    }

    /// Builds a configuration from `EVENTSTREAM_RPC_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if the host is missing or a numeric
    /// variable does not parse.
    pub fn from_env() -> Result<Self, RpcError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RpcError> {
        let host_name = lookup(HOST_ENV)
            .ok_or_else(|| RpcError::validation(format!("{HOST_ENV} is not set")))?;

        let port = match lookup(PORT_ENV) {
            Some(raw) => raw.parse::<u16>().map_err(|e| {
                RpcError::validation(format!("{PORT_ENV} is not a valid port: {raw}")).with_source(e)
            })?,
            None => 0,
        };

        let connect_timeout = match lookup(CONNECT_TIMEOUT_ENV) {
            Some(raw) => Duration::from_millis(raw.parse::<u64>().map_err(|e| {
                RpcError::validation(format!("{CONNECT_TIMEOUT_ENV} is not a number: {raw}"))
                    .with_source(e)
            })?),
            None => DEFAULT_CONNECT_TIMEOUT,
        };

        let config = Self {
            host_name,
            port,
            connect_timeout,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration before a client is built from it.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an empty host name or a zero timeout.
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.host_name.is_empty() {
            return Err(RpcError::validation("host name must not be empty"));
        }
        if self.connect_timeout.is_zero() {
            return Err(RpcError::validation("connect timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Address family of the underlying socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketDomain {
    #[default]
    Ipv4,
    Ipv6,
    /// Unix domain socket / named pipe; `host_name` is the path.
    Local,
}

/// Socket-level settings, passed through to the transport unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    pub domain: SocketDomain,
    /// Time allowed for the socket connect itself.
    pub connect_timeout: Duration,
    pub keep_alive: bool,
    pub keep_alive_interval: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            domain: SocketDomain::Ipv4,
            connect_timeout: Duration::from_secs(5),
            keep_alive: false,
            keep_alive_interval: None,
        }
    }
}

/// TLS settings, passed through to the transport unchanged.
///
/// No `Default` impl because a TLS connection always needs a server name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// Name to verify the server certificate against.
    pub server_name: String,
    /// Optional CA bundle replacing the platform trust store.
    pub ca_path: Option<PathBuf>,
    /// Optional client certificate for mutual TLS.
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub alpn: Vec<String>,
}

/// Returns a connect transform that places `{"authToken": token}` in the
/// connect payload.
#[must_use]
pub fn auth_token_transform(token: impl Into<String>) -> ConnectTransform {
    let token: Arc<str> = Arc::from(token.into());
    Arc::new(move |message: Message| {
        let token = Arc::clone(&token);
        async move {
            let payload = serde_json::to_vec(&serde_json::json!({ "authToken": &*token }))
                .map_err(|e| {
                    RpcError::serialization("failed to encode auth token payload").with_source(e)
                })?;
            Ok::<_, RpcError>(message.with_payload(payload))
        }
        .boxed()
    })
}
