//! The user-supplied message handler.

use std::future::Future;

use async_trait::async_trait;

use crate::request::InboundRequest;
use crate::response::SendResponse;

/// Receives every message a listener accepts, one call per message.
///
/// Handlers run as their own tasks: a slow handler delays its own
/// acknowledgement, never the socket reads behind it. The response sink
/// stays valid after the listener closes; sending through it then is a
/// quiet no-op.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn handle(&self, request: InboundRequest, response: SendResponse);
}

/// Adapts a closure into an [`InboundHandler`].
///
/// ```no_run
/// use hl7_mllp_server::{handler_fn, AckCode};
///
/// let handler = handler_fn(|request, mut response| async move {
///     println!("received {:?}", request.message().control_id());
///     let _ = response.send_response(AckCode::AA).await;
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(InboundRequest, SendResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    HandlerFn(f)
}

/// See [`handler_fn`].
pub struct HandlerFn<F>(F);

#[async_trait]
impl<F, Fut> InboundHandler for HandlerFn<F>
where
    F: Fn(InboundRequest, SendResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, request: InboundRequest, response: SendResponse) {
        (self.0)(request, response).await
    }
}
