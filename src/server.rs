//! Transport front end.
//!
//! In stdio mode the process itself is the peer: stdin is read for
//! frames and stdout carries replies. In tcp mode every accepted
//! connection gets its own peer, all sharing one router.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::{Config, TransportMode};
use p2pjson::{Limits, Mux, Peer};

/// Listen backlog for the tcp transport
const LISTEN_BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    config: Config,
    mux: Arc<Mux>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, mux: Mux) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));
        Server {
            config,
            mux: Arc::new(mux),
            connection_limit,
        }
    }

    /// Serve until the transport is exhausted
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        info!(routes = ?self.mux.routes(), "Routes registered");
        match self.config.transport {
            TransportMode::Stdio => {
                self.serve_stdio().await;
                Ok(())
            }
            TransportMode::Tcp => self.serve_tcp().await,
        }
    }

    /// Serve one peer over stdin/stdout until EXIT or end of input
    async fn serve_stdio(&self) {
        info!("Serving on stdio");
        let (peer, stdin) = Peer::stdio(self.config.limits());
        peer.listen(stdin, &*self.mux).await;
        log_stats("stdio", &peer);
    }

    /// Accept tcp connections, one peer per connection
    async fn serve_tcp(&self) -> Result<(), Box<dyn std::error::Error>> {
        let addr: SocketAddr = self.config.listen.parse()?;
        let listener = TcpListener::from_std(create_listener(addr)?)?;
        info!(address = %addr, "Server listening");

        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match listener.accept().await {
                Ok((stream, remote)) => {
                    debug!(peer = %remote, "New connection");

                    let mux = Arc::clone(&self.mux);
                    let limits = self.config.limits();

                    tokio::spawn(async move {
                        handle_connection(stream, remote, mux, limits).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Serve a single tcp connection as a peer
async fn handle_connection(stream: TcpStream, remote: SocketAddr, mux: Arc<Mux>, limits: Limits) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let (peer, reader) = Peer::split(stream, limits);
    peer.listen(reader, &*mux).await;
    log_stats(&remote.to_string(), &peer);
}

fn log_stats(name: &str, peer: &Peer) {
    let stats = peer.stats();
    info!(
        peer = name,
        served = stats.requests_served,
        sent = stats.requests_sent,
        delivered = stats.responses_delivered,
        dropped = stats.responses_dropped,
        framing_errors = stats.framing_errors,
        "Peer finished"
    );
}

/// Create a TCP listener with SO_REUSEADDR so restarts can rebind at once.
fn create_listener(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
