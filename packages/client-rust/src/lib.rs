//! Eventstream RPC client: connection lifecycle, operation streams, and a
//! typed client for the echo test service.

pub mod client;
pub mod config;
pub mod echotestrpc;
pub mod operation;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
pub mod transport;

pub use client::{ClientState, DisconnectReason, DisconnectionEvent, RpcClient};
pub use config::{auth_token_transform, RpcClientConfig, SocketOptions, TlsOptions};
pub use echotestrpc::EchoTestRpcClient;
pub use operation::{
    OperationOptions, RequestResponseOperation, StreamingEvent, StreamingOperation,
};
pub use transport::{Connector, Transport, TransportError, TransportStream};

#[cfg(test)]
pub(crate) mod test_support {
    use tracing_subscriber::EnvFilter;

    /// Installs a test-writer subscriber honoring `RUST_LOG`. Safe to call
    /// from every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}
