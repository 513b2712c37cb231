//! Per-connection driver: reads frames, fans messages out to the handler
//! and writes acknowledgements back.
//!
//! The connection splits into a read half and a writer task joined by a
//! response queue. Handlers run as their own tasks and push encoded acks
//! into the queue in whatever order they finish, so one slow message never
//! blocks the reads or the acks behind it.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::codec::MllpCodec;
use crate::config::{MshOverride, TextEncoding};
use crate::dispatch;
use crate::events::{EventHub, InboundEvent};
use crate::handler::InboundHandler;
use crate::inbound::Stats;
use crate::request::InboundRequest;
use crate::response::SendResponse;

const RESPONSE_QUEUE_DEPTH: usize = 32;

/// The listener-wide pieces every connection shares.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub name: Arc<str>,
    pub handler: Arc<dyn InboundHandler>,
    pub encoding: TextEncoding,
    pub overrides: Arc<[MshOverride]>,
    pub events: EventHub,
    pub stats: Arc<Stats>,
    pub shutdown: CancellationToken,
}

/// Drives one client connection to completion: until the peer disconnects,
/// the transport fails or the listener shuts down.
pub(crate) async fn run<S>(stream: S, peer: SocketAddr, ctx: ConnectionContext)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    debug!("[{}] client {} connected", ctx.name, peer);

    let stop = ctx.shutdown.child_token();
    let (sink, mut frames) = Framed::new(stream, MllpCodec::new()).split();
    let (response_tx, response_rx) = mpsc::channel(RESPONSE_QUEUE_DEPTH);

    let writer = tokio::spawn(write_responses(
        sink,
        response_rx,
        stop.clone(),
        ctx.events.clone(),
        peer,
    ));

    let mut had_error = false;
    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => {
                trace!("[{}] dropping client {} for shutdown", ctx.name, peer);
                break;
            }
            frame = frames.next() => match frame {
                Some(Ok(frame)) => handle_frame(frame, &response_tx, &ctx),
                Some(Err(e)) => {
                    warn!("[{}] read error from {}: {}", ctx.name, peer, e);
                    ctx.events.emit(InboundEvent::ClientError {
                        peer,
                        error: e.to_string(),
                    });
                    had_error = true;
                    break;
                }
                None => {
                    trace!("[{}] client {} closed the connection", ctx.name, peer);
                    break;
                }
            }
        }
    }

    // Stop the writer and wait for it so the socket is fully released
    // before the close event goes out. Responses still held by running
    // handlers quietly go nowhere from here on.
    stop.cancel();
    drop(response_tx);
    let had_error = had_error || writer.await.unwrap_or(false);

    ctx.events.emit(InboundEvent::ClientClose { peer, had_error });
    debug!(
        "[{}] client {} disconnected{}",
        ctx.name,
        peer,
        if had_error { " after an error" } else { "" }
    );
}

/// Counts, decodes and fans one frame payload out to the handler.
fn handle_frame(frame: BytesMut, response_tx: &mpsc::Sender<BytesMut>, ctx: &ConnectionContext) {
    ctx.stats.record_frame();

    let text = match ctx.encoding.decode(&frame) {
        Ok(text) => text,
        Err(e) => {
            warn!("[{}] undecodable frame payload: {}", ctx.name, e);
            ctx.events.emit(InboundEvent::DataError(e));
            return;
        }
    };
    ctx.events.emit(InboundEvent::DataRaw { text: text.clone() });

    let dispatch = dispatch::expand(&text);
    for error in dispatch.errors {
        warn!("[{}] discarding unparseable message: {}", ctx.name, error);
        ctx.events.emit(InboundEvent::DataError(error.into()));
    }
    for dispatched in dispatch.messages {
        ctx.stats.record_message();
        let request = InboundRequest::new(
            dispatched.message.clone(),
            dispatched.raw,
            dispatched.origin,
        );
        let response = SendResponse::new(
            response_tx.clone(),
            dispatched.message,
            Arc::clone(&ctx.overrides),
        );
        let handler = Arc::clone(&ctx.handler);
        tokio::spawn(async move {
            handler.handle(request, response).await;
        });
    }
}

/// Owns the write half. Everything queued at the moment a write becomes
/// possible goes out in a single flush, so acks for a burst of messages
/// share their syscalls. Returns whether the writer died on an error.
async fn write_responses<S>(
    mut sink: SplitSink<Framed<S, MllpCodec>, BytesMut>,
    mut queue: mpsc::Receiver<BytesMut>,
    stop: CancellationToken,
    events: EventHub,
    peer: SocketAddr,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let first = tokio::select! {
            biased;
            () = stop.cancelled() => return false,
            item = queue.recv() => match item {
                Some(payload) => payload,
                None => return false,
            },
        };

        let mut pending = 1usize;
        if let Err(e) = sink.feed(first).await {
            return write_failed(&events, &stop, peer, e);
        }
        while let Ok(next) = queue.try_recv() {
            if let Err(e) = sink.feed(next).await {
                return write_failed(&events, &stop, peer, e);
            }
            pending += 1;
        }
        if let Err(e) = sink.flush().await {
            return write_failed(&events, &stop, peer, e);
        }

        trace!("wrote {} response(s) to {}", pending, peer);
        for _ in 0..pending {
            events.emit(InboundEvent::ResponseSent);
        }
    }
}

fn write_failed(
    events: &EventHub,
    stop: &CancellationToken,
    peer: SocketAddr,
    error: std::io::Error,
) -> bool {
    warn!("write error to {}: {}", peer, error);
    events.emit(InboundEvent::ClientError {
        peer,
        error: error.to_string(),
    });
    stop.cancel();
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::time::timeout;

    use crate::ack::AckCode;
    use crate::handler::handler_fn;
    use crate::hl7::Message;
    use crate::request::MessageOrigin;

    const FRAME: &[u8] =
        b"\x0BMSH|^~\\&|HIS|RIH|LIS|RIH|202401020304||ADT^A01|MSG001|P|2.3\x1C\x0D";

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn context(handler: Arc<dyn InboundHandler>) -> ConnectionContext {
        ConnectionContext {
            name: Arc::from("test"),
            handler,
            encoding: TextEncoding::Utf8,
            overrides: Vec::new().into(),
            events: EventHub::new(),
            stats: Arc::new(Stats::default()),
            shutdown: CancellationToken::new(),
        }
    }

    fn accepting_handler() -> Arc<dyn InboundHandler> {
        Arc::new(handler_fn(|_request, mut response| async move {
            let _ = response.send_response(AckCode::AA).await;
        }))
    }

    async fn read_frame(client: &mut DuplexStream) -> Vec<u8> {
        let mut frame = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            client.read_exact(&mut byte).await.unwrap();
            frame.push(byte[0]);
            if frame.ends_with(&[0x1C, 0x0D]) {
                return frame;
            }
        }
    }

    fn unwrap_frame(frame: &[u8]) -> Message {
        assert_eq!(frame[0], 0x0B);
        assert_eq!(&frame[frame.len() - 2..], [0x1C, 0x0D]);
        let inner = std::str::from_utf8(&frame[1..frame.len() - 2]).unwrap();
        Message::parse(inner).unwrap()
    }

    #[tokio::test]
    async fn a_message_is_answered_with_a_framed_ack() {
        let ctx = context(accepting_handler());
        let (server_end, mut client) = duplex(4096);
        let connection = tokio::spawn(run(server_end, peer(), ctx));

        client.write_all(FRAME).await.unwrap();
        let ack = timeout(Duration::from_secs(5), read_frame(&mut client))
            .await
            .unwrap();

        let ack = unwrap_frame(&ack);
        assert_eq!(ack.get("MSA.1"), Some("AA"));
        assert_eq!(ack.get("MSA.2"), Some("MSG001"));

        drop(client);
        connection.await.unwrap();
    }

    #[tokio::test]
    async fn the_handler_sees_message_and_provenance() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let handler: Arc<dyn InboundHandler> =
            Arc::new(handler_fn(move |request: InboundRequest, _response| {
                let seen_tx = seen_tx.clone();
                async move {
                    let _ = seen_tx.send((
                        request.message().control_id().map(str::to_string),
                        request.origin(),
                    ));
                }
            }));
        let ctx = context(handler);
        let (server_end, mut client) = duplex(4096);
        let connection = tokio::spawn(run(server_end, peer(), ctx));

        client.write_all(FRAME).await.unwrap();
        let (id, origin) = timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id.as_deref(), Some("MSG001"));
        assert_eq!(origin, MessageOrigin::Single);

        drop(client);
        connection.await.unwrap();
    }

    #[tokio::test]
    async fn an_undecodable_frame_does_not_end_the_connection() {
        let ctx = context(accepting_handler());
        let mut events = ctx.events.subscribe();
        let (server_end, mut client) = duplex(4096);
        let connection = tokio::spawn(run(server_end, peer(), ctx));

        // invalid utf-8 payload, then a healthy frame on the same connection
        client.write_all(b"\x0B\xFF\xFE\x1C\x0D").await.unwrap();
        client.write_all(FRAME).await.unwrap();

        let ack = timeout(Duration::from_secs(5), read_frame(&mut client))
            .await
            .unwrap();
        assert_eq!(unwrap_frame(&ack).get("MSA.1"), Some("AA"));

        let mut saw_data_error = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, InboundEvent::DataError(_)) {
                saw_data_error = true;
            }
        }
        assert!(saw_data_error, "expected a data error event");

        drop(client);
        connection.await.unwrap();
    }

    #[tokio::test]
    async fn frames_and_messages_are_counted() {
        let ctx = context(accepting_handler());
        let stats = Arc::clone(&ctx.stats);
        let (server_end, mut client) = duplex(4096);
        let connection = tokio::spawn(run(server_end, peer(), ctx));

        client.write_all(FRAME).await.unwrap();
        let _ack = timeout(Duration::from_secs(5), read_frame(&mut client))
            .await
            .unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 1);
        assert_eq!(snapshot.total_message, 1);

        drop(client);
        connection.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_drops_the_connection_and_reports_a_clean_close() {
        let ctx = context(accepting_handler());
        let mut events = ctx.events.subscribe();
        let shutdown = ctx.shutdown.clone();
        let (server_end, _client) = duplex(4096);
        let connection = tokio::spawn(run(server_end, peer(), ctx));

        shutdown.cancel();
        timeout(Duration::from_secs(5), connection)
            .await
            .unwrap()
            .unwrap();

        loop {
            match timeout(Duration::from_secs(5), events.recv()).await.unwrap() {
                Ok(InboundEvent::ClientClose { had_error, .. }) => {
                    assert!(!had_error);
                    break;
                }
                Ok(_) => {}
                Err(e) => panic!("close event never arrived: {e}"),
            }
        }
    }
}
