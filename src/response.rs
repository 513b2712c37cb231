//! The outbound half of a handler invocation: the acknowledgement sink
//! for one received message.

use std::sync::Arc;

use bytes::BytesMut;
use log::trace;
use tokio::sync::mpsc;

use crate::ack::{self, AckCode, AckRecord};
use crate::config::MshOverride;
use crate::error::ListenerError;
use crate::hl7::Message;

/// Sends at most one acknowledgement for one received message.
///
/// The acknowledgement is derived from the message this sink was created
/// for, so a handler juggling several requests can answer them in any
/// order.
#[derive(Debug)]
pub struct SendResponse {
    outbound: mpsc::Sender<BytesMut>,
    message: Message,
    overrides: Arc<[MshOverride]>,
    sent: Option<AckRecord>,
}

impl SendResponse {
    pub(crate) fn new(
        outbound: mpsc::Sender<BytesMut>,
        message: Message,
        overrides: Arc<[MshOverride]>,
    ) -> SendResponse {
        SendResponse {
            outbound,
            message,
            overrides,
            sent: None,
        }
    }

    /// Builds the acknowledgement for this message and queues it for the
    /// wire.
    ///
    /// A second call returns [`ListenerError::ResponseAlreadySent`]. When
    /// the connection is already gone the acknowledgement is built but
    /// goes nowhere; that is not an error, late handlers are expected
    /// after a client disconnects or a listener closes.
    pub async fn send_response(&mut self, code: AckCode) -> Result<(), ListenerError> {
        if self.sent.is_some() {
            return Err(ListenerError::ResponseAlreadySent);
        }
        let record = ack::build(&self.message, code, &self.overrides);
        let payload = BytesMut::from(record.message.encode().as_str());
        self.sent = Some(record);
        if self.outbound.send(payload).await.is_err() {
            trace!("response dropped, the connection is already closed");
        }
        Ok(())
    }

    /// The acknowledgement that was built, `None` until
    /// [`send_response`](Self::send_response) has been called.
    pub fn ack_message(&self) -> Option<&Message> {
        self.sent.as_ref().map(|r| &r.message)
    }

    /// The code that actually went out. This can differ from the requested
    /// one: a message whose header cannot be mirrored is answered with an
    /// Application Error.
    pub fn ack_code(&self) -> Option<AckCode> {
        self.sent.as_ref().map(|r| r.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INBOUND: &str = "MSH|^~\\&|A|B|C|D|E||ADT^A01|MSG001|P|2.3";

    fn response_pair() -> (SendResponse, mpsc::Receiver<BytesMut>) {
        let (tx, rx) = mpsc::channel(4);
        let message = Message::parse(INBOUND).unwrap();
        (SendResponse::new(tx, message, Vec::new().into()), rx)
    }

    #[tokio::test]
    async fn sending_queues_an_encoded_ack() {
        let (mut response, mut rx) = response_pair();

        response.send_response(AckCode::AA).await.unwrap();

        let payload = rx.recv().await.unwrap();
        let ack = Message::parse(std::str::from_utf8(&payload).unwrap()).unwrap();
        assert_eq!(ack.get("MSA.1"), Some("AA"));
        assert_eq!(ack.get("MSA.2"), Some("MSG001"));
    }

    #[tokio::test]
    async fn only_one_response_per_message() {
        let (mut response, _rx) = response_pair();

        response.send_response(AckCode::AA).await.unwrap();
        assert!(matches!(
            response.send_response(AckCode::AE).await,
            Err(ListenerError::ResponseAlreadySent)
        ));
    }

    #[tokio::test]
    async fn the_built_ack_is_kept_for_introspection() {
        let (mut response, _rx) = response_pair();
        assert!(response.ack_message().is_none());
        assert!(response.ack_code().is_none());

        response.send_response(AckCode::AR).await.unwrap();

        assert_eq!(response.ack_code(), Some(AckCode::AR));
        let ack = response.ack_message().unwrap();
        assert_eq!(ack.get("MSA.1"), Some("AR"));
    }

    #[tokio::test]
    async fn sending_after_the_connection_is_gone_is_a_quiet_no_op() {
        let (mut response, rx) = response_pair();
        drop(rx);

        response.send_response(AckCode::AA).await.unwrap();
        assert_eq!(response.ack_code(), Some(AckCode::AA));
    }

    #[tokio::test]
    async fn a_damaged_header_surfaces_as_a_degraded_code() {
        let (tx, _rx) = mpsc::channel(4);
        let message = Message::parse("MSH|^~\\&|A|B|||E||ADT|MSG001|P|2.3").unwrap();
        let mut response = SendResponse::new(tx, message, Vec::new().into());

        response.send_response(AckCode::AA).await.unwrap();
        assert_eq!(response.ack_code(), Some(AckCode::AE));
    }
}
