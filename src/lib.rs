/*!
# A tokio server for receiving HL7 messages over the MLLP network protocol.

HL7's MLLP is a simple, single-byte-text based protocol for framing HL7 messages over a TCP (or similar) transport.
The full specification is available at [the HL7 site](https://www.hl7.org/documentcenter/private/standards/v3/V3_TRMLLP_R2_R2019.zip) (Note that they place the standards behind a free membership/login form).

This crate provides the receiving side of that exchange: a server that listens on one or more
ports (plain TCP or TLS), unwraps MLLP frames, parses the content as single messages, `BHS`
batches or `FHS` files, hands every message to your handler, and writes the ACK/NACK
acknowledgements back. The [`MllpCodec`] doing the framing is public too, so a publisher can be
built from the same crate.

Connections are long lived and failures are contained: an unparseable message becomes a
[data error event](InboundEvent::DataError) while the connection and its neighbours carry on.
Lifecycle and data events are broadcast to any number of subscribers through
[`Inbound::subscribe`], and nothing is lost by not subscribing at all.

## Example

### Listener
```no_run
use hl7_mllp_server::{handler_fn, AckCode, Hl7Server, ListenerOptions, ServerOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = Hl7Server::new(ServerOptions::default())?;

    // One listener per port; create_inbound can be called again for more.
    let inbound = server.create_inbound(
        ListenerOptions::new(2575),
        handler_fn(|request, mut response| async move {
            println!(
                "received {:?} ({:?})",
                request.message().control_id(),
                request.origin()
            );
            let _ = response.send_response(AckCode::AA).await;
        }),
    )?;

    inbound.wait_listening().await;
    tokio::signal::ctrl_c().await?;
    inbound.close().await;
    Ok(())
}
```
*/

pub mod hl7;

mod ack;
mod codec;
mod config;
mod connection;
mod dispatch;
mod error;
mod events;
mod handler;
mod inbound;
mod request;
mod response;
mod server;

pub use ack::AckCode;
pub use codec::MllpCodec;
pub use config::{ListenerOptions, ServerOptions, TextEncoding, TlsOptions};
pub use error::{DataError, ListenerError, ServerError};
pub use events::InboundEvent;
pub use handler::{handler_fn, HandlerFn, InboundHandler};
pub use inbound::{Inbound, StatsSnapshot};
pub use request::{InboundRequest, MessageOrigin};
pub use response::SendResponse;
pub use server::Hl7Server;
