//! Shared lifecycle of one operation's stream.
//!
//! State machine: None -> Activating -> Activated -> Ended -> Closed.
//! Any state may jump to Closed. The ended event fires at most once, and
//! only for operations whose activation succeeded.

use std::sync::{Arc, Weak};

use eventstream_rpc_core::{Message, RpcError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{OperationId, RpcClient};
use crate::transport::{StreamEvent, StreamParts, TransportStream};

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Created, not yet activated.
    None,
    /// The first message is being sent.
    Activating,
    /// The stream is bound to the operation and accepts messages.
    Activated,
    /// The peer ended the stream; cleanup is in progress.
    Ended,
    /// Closed locally or by cleanup. Terminal.
    Closed,
}

/// Why an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The operation was closed locally.
    Closed,
    /// The peer ended the stream.
    StreamEnded,
}

/// Fired once when an activated operation ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationEnded {
    pub reason: EndReason,
}

/// Receives the events of an operation's stream.
pub(crate) trait StreamListener: Send + Sync + 'static {
    fn on_message(&self, message: Message);
    fn on_error(&self, error: RpcError);
    fn on_ended(&self, event: OperationEnded);
}

struct Lifecycle {
    state: OperationState,
    /// Armed by a successful activation, consumed by the first close.
    emit_ended_on_close: bool,
    /// The stream ended while activation was still in flight.
    ended_while_activating: bool,
}

pub(crate) struct OperationCore {
    id: OperationId,
    name: &'static str,
    client: RpcClient,
    stream: Arc<dyn TransportStream>,
    stream_events: Mutex<Option<mpsc::UnboundedReceiver<StreamEvent>>>,
    listener: Arc<dyn StreamListener>,
    lifecycle: Mutex<Lifecycle>,
    cancel: CancellationToken,
}

impl OperationCore {
    /// Opens a stream for `name` and registers the operation with the client.
    pub(crate) fn new(
        client: &RpcClient,
        name: &'static str,
        listener: Arc<dyn StreamListener>,
    ) -> Result<Arc<Self>, RpcError> {
        let StreamParts { stream, events } = client.new_stream()?;

        let core = Arc::new(Self {
            id: client.next_operation_id(),
            name,
            client: client.clone(),
            stream,
            stream_events: Mutex::new(Some(events)),
            listener,
            lifecycle: Mutex::new(Lifecycle {
                state: OperationState::None,
                emit_ended_on_close: false,
                ended_while_activating: false,
            }),
            cancel: CancellationToken::new(),
        });

        if let Err(err) = client.register_operation(core.id, Arc::downgrade(&core)) {
            core.lifecycle.lock().state = OperationState::Closed;
            core.stream.close();
            return Err(err);
        }

        debug!(operation = name, id = core.id.0, "operation created");
        Ok(core)
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn state(&self) -> OperationState {
        self.lifecycle.lock().state
    }

    /// Sends the first message and binds the stream to the operation.
    pub(crate) async fn activate(self: &Arc<Self>, message: Message) -> Result<(), RpcError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != OperationState::None {
                return Err(RpcError::client_state(
                    "operations may only be activated once",
                ));
            }
            lifecycle.state = OperationState::Activating;
        }

        let events = self.stream_events.lock().take();
        if let Some(events) = events {
            self.spawn_event_pump(events);
        }

        if let Err(err) = self.stream.activate(self.name, message).await {
            warn!(operation = self.name, error = %err, "stream activation failed");
            self.close();
            return Err(RpcError::internal("failed to activate operation stream").with_source(err));
        }

        let ended_early = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != OperationState::Activating {
                return Err(RpcError::internal(
                    "operation was closed while it was being activated",
                ));
            }
            lifecycle.state = OperationState::Activated;
            lifecycle.emit_ended_on_close = true;
            lifecycle.ended_while_activating
        };

        debug!(operation = self.name, id = self.id.0, "operation activated");
        if ended_early {
            self.on_stream_ended();
        }
        Ok(())
    }

    /// Sends a message on the activated stream.
    pub(crate) async fn send_message(&self, message: Message) -> Result<(), RpcError> {
        let state = self.state();
        if state != OperationState::Activated {
            return Err(RpcError::client_state(format!(
                "cannot send on an operation that is {state:?}"
            )));
        }
        self.stream
            .send_message(message)
            .await
            .map_err(|e| RpcError::internal("failed to send stream message").with_source(e))
    }

    fn spawn_event_pump(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<StreamEvent>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(core) = weak.upgrade() else { break };
                if core.state() == OperationState::Closed {
                    break;
                }
                match event {
                    Some(StreamEvent::Message(message)) => core.listener.on_message(message),
                    Some(StreamEvent::Ended) | None => {
                        core.on_stream_ended();
                        break;
                    }
                }
            }
        });
    }

    fn on_stream_ended(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                OperationState::Activating => {
                    lifecycle.ended_while_activating = true;
                    return;
                }
                OperationState::Closed => return,
                _ => lifecycle.state = OperationState::Ended,
            }
        }
        debug!(operation = self.name, id = self.id.0, "stream ended by peer");
        self.close_with(EndReason::StreamEnded, true);
    }

    /// Closes the operation. Idempotent.
    ///
    /// Deregisters from the client at once; the terminate message, the ended
    /// event, and the stream release happen on a spawned task.
    pub(crate) fn close(&self) {
        self.close_with(EndReason::Closed, true);
    }

    /// Closes the operation as part of its connection closing. No terminate
    /// message is sent since the connection is going away with the stream.
    pub(crate) fn close_for_shutdown(&self) {
        self.close_with(EndReason::Closed, false);
    }

    fn close_with(&self, reason: EndReason, graceful: bool) {
        let (send_terminate, emit_ended) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == OperationState::Closed {
                return;
            }
            let send_terminate = graceful && lifecycle.state == OperationState::Activated;
            lifecycle.state = OperationState::Closed;
            (send_terminate, std::mem::take(&mut lifecycle.emit_ended_on_close))
        };

        self.client.remove_operation(self.id);
        self.cancel.cancel();
        debug!(operation = self.name, id = self.id.0, ?reason, "operation closed");

        let stream = Arc::clone(&self.stream);
        let listener = Arc::clone(&self.listener);
        let name = self.name;

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Outside a runtime the terminate message cannot be sent
            if emit_ended {
                listener.on_ended(OperationEnded { reason });
            }
            stream.close();
            return;
        };

        handle.spawn(async move {
            if send_terminate {
                if let Err(err) = stream.send_message(Message::terminate_stream()).await {
                    warn!(operation = name, error = %err, "failed to terminate stream");
                    listener.on_error(
                        RpcError::internal("failed to send stream terminate message").with_source(err),
                    );
                }
            }
            if emit_ended {
                listener.on_ended(OperationEnded { reason });
            }
            stream.close();
        });
    }
}

impl Drop for OperationCore {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        if lifecycle.state == OperationState::Closed {
            return;
        }
        lifecycle.state = OperationState::Closed;
        let emit_ended = std::mem::take(&mut lifecycle.emit_ended_on_close);

        self.client.remove_operation(self.id);
        self.cancel.cancel();
        if emit_ended {
            self.listener.on_ended(OperationEnded {
                reason: EndReason::Closed,
            });
        }
        self.stream.close();
    }
}
