//! This is an example of a HL7 listener service, accepting inbound HL7
//! messages over MLLP on 127.0.0.1:2575 and acknowledging every one with
//! an Application Accept.
//!
//! Use the publisher example or any other tool (netcat?) to punch data
//! wrapped in MLLP bytes to this process, and the messages are printed to
//! the console.

use std::error::Error;

use hl7_mllp_server::{
    handler_fn, AckCode, Hl7Server, InboundEvent, ListenerOptions, ServerOptions,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let server = Hl7Server::new(ServerOptions {
        bind_address: "127.0.0.1".to_string(),
        ..Default::default()
    })?;

    let mut options = ListenerOptions::new(2575);
    options.name = Some("demo".to_string());

    let inbound = server.create_inbound(
        options,
        handler_fn(|request, mut response| async move {
            println!(
                "Got message {:?} ({:?})",
                request.message().control_id(),
                request.origin()
            );

            match response.send_response(AckCode::AA).await {
                Ok(()) => println!("  ACK sent..."),
                Err(e) => println!("  Could not respond: {e}"),
            }
        }),
    )?;

    let mut events = inbound.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                InboundEvent::ClientConnect { peer } => println!("Connection opened by {peer}..."),
                InboundEvent::ClientClose { peer, .. } => println!("Connection closed by {peer}..."),
                InboundEvent::DataError(e) => println!("Bad data: {e}"),
                _ => {}
            }
        }
    });

    match inbound.wait_listening().await {
        Some(addr) => println!("Listening on {addr}"),
        None => return Err("listener failed to bind".into()),
    }

    tokio::signal::ctrl_c().await?;
    let stats = inbound.stats();
    println!(
        "Shutting down after {} frame(s) / {} message(s)...",
        stats.received, stats.total_message
    );
    inbound.close().await;
    Ok(())
}
