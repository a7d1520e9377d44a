//! Operations that keep their stream open after the initial response.

use std::sync::Arc;

use eventstream_rpc_core::{
    Message, OperationError, OperationModel, RpcError, ServiceModel, StreamingOperationModel,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::base::{OperationCore, OperationEnded, OperationState, StreamListener};
use super::{decode_inbound, encode_outbound, OperationOptions};
use crate::client::RpcClient;

/// Event delivered on a streaming operation's event channel.
#[derive(Debug)]
pub enum StreamingEvent<M, E> {
    /// An inbound stream message.
    Message(M),
    /// A non-terminal error: a declared service error, an undecodable
    /// message, or a failed graceful terminate.
    StreamError(OperationError<E>),
    /// The operation ended. Delivered exactly once, and last.
    Ended(OperationEnded),
}

type EventSender<O> = mpsc::UnboundedSender<
    StreamingEvent<<O as StreamingOperationModel>::InboundMessage, <O as OperationModel>::Error>,
>;

/// Receiving end of a streaming operation's events.
pub type StreamingEvents<O> = mpsc::UnboundedReceiver<
    StreamingEvent<<O as StreamingOperationModel>::InboundMessage, <O as OperationModel>::Error>,
>;

struct StreamingListener<O: StreamingOperationModel> {
    model: Arc<ServiceModel>,
    /// Receives the first inbound message, the initial response.
    response: Mutex<Option<oneshot::Sender<Message>>>,
    events: EventSender<O>,
}

impl<O: StreamingOperationModel> StreamListener for StreamingListener<O> {
    fn on_message(&self, message: Message) {
        if let Some(tx) = self.response.lock().take() {
            let _ = tx.send(message);
            return;
        }

        let event = match decode_inbound::<O, O::InboundMessage>(&self.model, &message) {
            Ok(inbound) => StreamingEvent::Message(inbound),
            Err(err) => StreamingEvent::StreamError(err),
        };
        let _ = self.events.send(event);
    }

    fn on_error(&self, error: RpcError) {
        let _ = self.events.send(StreamingEvent::StreamError(error.into()));
    }

    fn on_ended(&self, event: OperationEnded) {
        self.response.lock().take();
        let _ = self.events.send(StreamingEvent::Ended(event));
    }
}

/// A streaming call of operation `O`.
///
/// Created inactive; [`activate`](Self::activate) sends the request and
/// returns the initial response. Inbound messages then arrive on the channel
/// returned by [`take_events`](Self::take_events).
pub struct StreamingOperation<O: StreamingOperationModel> {
    core: Arc<OperationCore>,
    model: Arc<ServiceModel>,
    options: OperationOptions,
    request: Mutex<Option<O::Request>>,
    response: Mutex<Option<oneshot::Receiver<Message>>>,
    events: Mutex<Option<StreamingEvents<O>>>,
}

impl<O: StreamingOperationModel> StreamingOperation<O> {
    /// Opens the operation's stream and registers it with the client.
    ///
    /// # Errors
    ///
    /// Returns an `InternalError` if `model` does not define the operation,
    /// or a `ClientStateError` if the client is not connected.
    pub fn new(
        client: &RpcClient,
        model: Arc<ServiceModel>,
        request: O::Request,
        options: OperationOptions,
    ) -> Result<Self, RpcError> {
        model.operation(O::OPERATION_NAME)?;

        let (response_tx, response_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let listener = Arc::new(StreamingListener::<O> {
            model: Arc::clone(&model),
            response: Mutex::new(Some(response_tx)),
            events: events_tx,
        });
        let core = OperationCore::new(client, O::OPERATION_NAME, listener)?;

        Ok(Self {
            core,
            model,
            options,
            request: Mutex::new(Some(request)),
            response: Mutex::new(Some(response_rx)),
            events: Mutex::new(Some(events_rx)),
        })
    }

    /// Sends the request and waits for the initial response.
    ///
    /// # Errors
    ///
    /// - `ClientStateError` if called more than once.
    /// - `ValidationError` / `SerializationError` for a bad request.
    /// - `InternalError` if activation fails.
    /// - `InterruptionError` if the stream ends before the response.
    /// - `OperationError::Service` if the peer answers with a declared error.
    pub async fn activate(&self) -> Result<O::Response, OperationError<O::Error>> {
        let message = {
            let request = self.request.lock();
            let request = request.as_ref().ok_or_else(|| {
                RpcError::client_state("streaming operations may only be activated once")
            })?;
            encode_outbound(request, self.options)?
        };

        self.request.lock().take();
        self.core.activate(message).await?;

        let response = self
            .response
            .lock()
            .take()
            .ok_or_else(|| RpcError::internal("initial response already consumed"))?;
        let message = response.await.map_err(|_| {
            RpcError::interruption(format!(
                "stream of operation '{}' ended before the initial response",
                O::OPERATION_NAME
            ))
        })?;

        decode_inbound::<O, O::Response>(&self.model, &message)
    }

    /// Sends one message on the activated stream.
    ///
    /// # Errors
    ///
    /// `ClientStateError` unless the operation is active, `ValidationError`
    /// or `SerializationError` for a bad message, `InternalError` if the
    /// transport send fails.
    pub async fn send_message(&self, message: O::OutboundMessage) -> Result<(), RpcError> {
        if !self.is_active() {
            return Err(RpcError::client_state(
                "streaming operation is not active",
            ));
        }
        let message = encode_outbound(&message, self.options)?;
        self.core.send_message(message).await
    }

    /// Closes the operation. Idempotent; the `Ended` event follows if the
    /// operation was activated.
    pub fn close(&self) {
        self.core.close();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.core.state() == OperationState::Activated
    }

    #[must_use]
    pub fn state(&self) -> OperationState {
        self.core.state()
    }

    /// Takes the event channel. Returns `None` after the first call.
    #[must_use]
    pub fn take_events(&self) -> Option<StreamingEvents<O>> {
        self.events.lock().take()
    }
}
