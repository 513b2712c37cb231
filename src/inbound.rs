//! One MLLP listener: a bound socket, its accept loop and the connections
//! it spawns.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ListenerConfig;
use crate::connection::{self, ConnectionContext};
use crate::events::{EventHub, InboundEvent};
use crate::handler::InboundHandler;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Live frame and message counters for one listener.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    received: AtomicU64,
    total_message: AtomicU64,
}

impl Stats {
    pub fn record_frame(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message(&self) {
        self.total_message.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            total_message: self.total_message.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of a listener's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Complete MLLP frames received, across all of the listener's
    /// connections.
    pub received: u64,
    /// Messages delivered to the handler, counting batch and file members
    /// individually.
    pub total_message: u64,
}

/// How the accept socket is created, inherited from the server.
pub(crate) struct BindOptions {
    pub address: String,
    pub ipv6_only: bool,
    pub tls: Option<TlsAcceptor>,
}

/// A running listener, created by
/// [`Hl7Server::create_inbound`](crate::Hl7Server::create_inbound).
///
/// The listener starts accepting as soon as it is created and keeps going
/// until [`close`](Inbound::close) is called or it is dropped. Dropping
/// without closing stops the accept loop and its connections too, just
/// without waiting for them to finish.
pub struct Inbound {
    name: String,
    port: u16,
    events: EventHub,
    stats: Arc<Stats>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    local_addr: watch::Receiver<Option<SocketAddr>>,
}

impl Inbound {
    /// Spawns the accept loop. Must be called from within a Tokio runtime.
    pub(crate) fn start(
        bind: BindOptions,
        config: ListenerConfig,
        handler: Arc<dyn InboundHandler>,
    ) -> Inbound {
        let events = EventHub::new();
        let stats = Arc::new(Stats::default());
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (addr_tx, addr_rx) = watch::channel(None);

        let accept = AcceptLoop {
            bind,
            port: config.port,
            tracker: tracker.clone(),
            addr_tx,
            ctx: ConnectionContext {
                name: Arc::from(config.name.as_str()),
                handler,
                encoding: config.encoding,
                overrides: config.overrides,
                events: events.clone(),
                stats: Arc::clone(&stats),
                shutdown: shutdown.clone(),
            },
        };
        tracker.spawn(accept.run());

        Inbound {
            name: config.name,
            port: config.port,
            events,
            stats,
            shutdown,
            tracker,
            local_addr: addr_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The port that was asked for; 0 means an ephemeral one. See
    /// [`local_addr`](Inbound::local_addr) for the port actually bound.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// A fresh subscription to this listener's events. Each subscriber
    /// sees every event from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The bound address, `None` until the socket is up (or when binding
    /// failed).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.borrow()
    }

    /// Waits for the socket to come up and returns its address, or `None`
    /// when binding failed. Useful with port 0.
    pub async fn wait_listening(&self) -> Option<SocketAddr> {
        let mut rx = self.local_addr.clone();
        loop {
            if let Some(addr) = *rx.borrow_and_update() {
                return Some(addr);
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    /// Stops accepting, drops every open connection and waits for them to
    /// finish. Handlers already running are not waited for; their late
    /// responses quietly go nowhere.
    pub async fn close(&self) {
        debug!("[{}] closing listener", self.name);
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("[{}] listener closed", self.name);
    }
}

impl Drop for Inbound {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct AcceptLoop {
    bind: BindOptions,
    port: u16,
    tracker: TaskTracker,
    addr_tx: watch::Sender<Option<SocketAddr>>,
    ctx: ConnectionContext,
}

impl AcceptLoop {
    async fn run(self) {
        let listener = match bind_socket(&self.bind.address, self.port, self.bind.ipv6_only).await
        {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "[{}] failed to bind {}:{}: {}",
                    self.ctx.name, self.bind.address, self.port, e
                );
                self.ctx.events.emit(InboundEvent::Error {
                    error: format!("bind {}:{} failed: {}", self.bind.address, self.port, e),
                });
                return;
            }
        };

        let local = listener.local_addr().ok();
        let _ = self.addr_tx.send(local);
        debug!("[{}] listening on {}:{}", self.ctx.name, self.bind.address, self.port);
        self.ctx.events.emit(InboundEvent::Listen);

        loop {
            tokio::select! {
                biased;
                () = self.ctx.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        // usually transient, fd exhaustion and the like
                        warn!("[{}] accept error: {}", self.ctx.name, e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
        }
        debug!("[{}] accept loop stopped", self.ctx.name);
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("[{}] could not set nodelay for {}: {}", self.ctx.name, peer, e);
        }
        let ctx = self.ctx.clone();
        let tls = self.bind.tls.clone();
        self.tracker.spawn(async move {
            match tls {
                None => {
                    ctx.events.emit(InboundEvent::ClientConnect { peer });
                    connection::run(stream, peer, ctx).await;
                }
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => {
                        ctx.events.emit(InboundEvent::ClientConnect { peer });
                        connection::run(stream, peer, ctx).await;
                    }
                    Err(e) => {
                        warn!("[{}] tls handshake with {} failed: {}", ctx.name, peer, e);
                        ctx.events.emit(InboundEvent::ClientError {
                            peer,
                            error: e.to_string(),
                        });
                    }
                },
            }
        });
    }
}

async fn bind_socket(address: &str, port: u16, ipv6_only: bool) -> std::io::Result<TcpListener> {
    if !ipv6_only {
        return TcpListener::bind((address, port)).await;
    }
    // IPV6_V6ONLY has to be set before the bind, which means building the
    // socket by hand.
    let addr = tokio::net::lookup_host((address, port))
        .await?
        .find(|a| a.is_ipv6())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("{address} has no IPv6 address"),
            )
        })?;
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_only_v6(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}
