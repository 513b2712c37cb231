//! Listener lifecycle and data events, delivered over a broadcast channel.
//!
//! Subscribers are optional observers. Events are emitted without
//! backpressure: a subscriber that falls behind misses old events rather
//! than slowing the accept or read loops down, and having no subscriber at
//! all costs nothing.

use std::net::SocketAddr;

use tokio::sync::broadcast;

use crate::error::DataError;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything a listener reports about itself and its connections.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// The socket is bound and accepting connections.
    Listen,
    /// A client connected (after the TLS handshake, when TLS is on).
    ClientConnect { peer: SocketAddr },
    /// A client connection ended. `had_error` is true when it ended on a
    /// transport error rather than an orderly close.
    ClientClose { peer: SocketAddr, had_error: bool },
    /// A transport-level problem on one client connection.
    ClientError { peer: SocketAddr, error: String },
    /// A frame payload was received and decoded to text.
    DataRaw { text: String },
    /// A frame payload or one message inside it could not be used. The
    /// connection carries on.
    DataError(DataError),
    /// An acknowledgement was written to the wire.
    ResponseSent,
    /// A listener-level failure, such as the socket failing to bind.
    Error { error: String },
}

/// Fan-out point for [`InboundEvent`]s.
#[derive(Debug, Clone)]
pub(crate) struct EventHub {
    tx: broadcast::Sender<InboundEvent>,
}

impl EventHub {
    pub fn new() -> EventHub {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventHub { tx }
    }

    /// Delivers to current subscribers, dropping the event when there are
    /// none.
    pub fn emit(&self, event: InboundEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_every_subscriber() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.emit(InboundEvent::Listen);

        assert!(matches!(a.recv().await, Ok(InboundEvent::Listen)));
        assert!(matches!(b.recv().await, Ok(InboundEvent::Listen)));
    }

    #[test]
    fn emitting_without_subscribers_is_a_no_op() {
        let hub = EventHub::new();
        hub.emit(InboundEvent::ResponseSent);
    }

    #[tokio::test]
    async fn subscribers_only_see_events_after_they_join() {
        let hub = EventHub::new();
        hub.emit(InboundEvent::Listen);

        let mut late = hub.subscribe();
        hub.emit(InboundEvent::ResponseSent);

        assert!(matches!(late.recv().await, Ok(InboundEvent::ResponseSent)));
    }
}
