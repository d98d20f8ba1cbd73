//! TCP server for throughput sessions.
//!
//! Accepts connections under a fixed admission limit, runs each one through
//! the session handler on its own task, and drains in-flight sessions on
//! shutdown. Shutdown only stops the accept loop; every session still runs to
//! its own deadline.
//!
//! Listening -> Accepting -> Draining (on cancellation) -> Closed

use crate::auth::CredentialTable;
use crate::config::Config;
use crate::format::byte_size;
use crate::session::{self, SessionError};
use crate::stream::Context;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Extra time a connection gets on top of the transfer timeout, covering the
/// handshake.
const HANDSHAKE_GRACE: Duration = Duration::from_secs(1);

/// Listen backlog
const BACKLOG: i32 = 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {0}")]
    Bind(String, #[source] io::Error),

    #[error("failed to accept connection")]
    Accept(#[source] io::Error),

    #[error("admission semaphore closed")]
    Closed,
}

/// Server instance
pub struct Server {
    address: String,
    timeout: Duration,
    accept_timeout: Duration,
    max_clients: usize,
    credentials: Arc<CredentialTable>,
    connection_limit: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
}

/// Admission slot owned by one accepted connection until its task ends.
struct SessionSlot {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl SessionSlot {
    fn new(permit: OwnedSemaphorePermit, active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            _permit: permit,
            active: Arc::clone(active),
        }
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Server {
    /// Create a new server instance
    pub fn new(config: &Config, credentials: CredentialTable) -> Self {
        Server {
            address: config.address(),
            timeout: config.timeout,
            accept_timeout: config.accept_timeout,
            max_clients: config.max_clients,
            credentials: Arc::new(credentials),
            connection_limit: Arc::new(Semaphore::new(config.max_clients)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind the configured address and serve until `ctx` is cancelled.
    pub async fn run(&self, ctx: Context) -> Result<(), ServerError> {
        let listener = bind(&self.address).await?;
        self.serve(listener, ctx).await
    }

    /// Serve connections from `listener` until `ctx` is cancelled or the
    /// listener fails. In-flight sessions are drained before returning.
    pub async fn serve(&self, listener: TcpListener, ctx: Context) -> Result<(), ServerError> {
        info!(
            address = %listener.local_addr().map_err(ServerError::Accept)?,
            pid = std::process::id(),
            timeout = ?self.timeout,
            max_clients = self.max_clients,
            clients = self.credentials.len(),
            "Server listening"
        );

        let mut sessions = JoinSet::new();
        let result = self.accept_loop(&listener, &ctx, &mut sessions).await;

        drop(listener);
        if !sessions.is_empty() {
            info!(in_flight = sessions.len(), "Draining sessions");
        }
        while let Some(joined) = sessions.join_next().await {
            report_join(joined);
        }

        match &result {
            Ok(()) => info!("Server stopped"),
            Err(e) => error!(error = %e, "Server stopped on listener failure"),
        }
        result
    }

    async fn accept_loop(
        &self,
        listener: &TcpListener,
        ctx: &Context,
        sessions: &mut JoinSet<()>,
    ) -> Result<(), ServerError> {
        loop {
            while let Some(joined) = sessions.try_join_next() {
                report_join(joined);
            }

            // Wait for a connection slot before accepting.
            let permit = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Ok(()),
                permit = self.connection_limit.clone().acquire_owned() => {
                    permit.map_err(|_| ServerError::Closed)?
                }
            };

            let accepted = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Ok(()),
                accepted = tokio::time::timeout(self.accept_timeout, listener.accept()) => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(Ok(conn)) => conn,
                // Rotating deadline: hand the slot back and look around.
                Err(_elapsed) => continue,
                Ok(Err(e)) if is_transient(&e) => {
                    debug!(error = %e, "Transient accept error");
                    continue;
                }
                Ok(Err(e)) => return Err(ServerError::Accept(e)),
            };

            if let Err(e) = stream.set_nodelay(true) {
                warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let slot = SessionSlot::new(permit, &self.active);
            debug!(peer = %peer, active = self.active_sessions(), "New connection");

            let credentials = Arc::clone(&self.credentials);
            // Deadline only: cancelling `ctx` must not cut a running transfer.
            let conn_ctx = Context::background().with_timeout(self.timeout + HANDSHAKE_GRACE);
            let timeout = self.timeout;

            sessions.spawn(async move {
                let _slot = slot;
                handle_connection(stream, peer, &credentials, &conn_ctx, timeout).await;
            });
        }
    }

    /// Accepted connections whose session task has not finished yet.
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    credentials: &CredentialTable,
    ctx: &Context,
    timeout: Duration,
) {
    match session::run(stream, peer, credentials, ctx, timeout).await {
        Ok(session) => info!(
            peer = %session.peer,
            client = session.client_id(),
            direction = %session.direction(),
            bytes = session.bytes,
            size = %byte_size(session.bytes),
            duration = ?session.elapsed(),
            "Session done"
        ),
        Err(SessionError::Handshake(e)) => {
            debug!(peer = %peer, reason = %e, "Handshake rejected")
        }
        Err(e) => warn!(peer = %peer, error = ?e, "Session failed"),
    }
}

fn report_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Session task panicked");
        }
    }
}

/// Accept errors that concern a single connection, not the listener.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Resolve `address` and bind the first usable result with SO_REUSEADDR.
pub async fn bind(address: &str) -> Result<TcpListener, ServerError> {
    let bind_err = |e| ServerError::Bind(address.to_string(), e);

    let mut last_err = None;
    for addr in tokio::net::lookup_host(address).await.map_err(bind_err)? {
        match create_listener(addr) {
            Ok(listener) => return TcpListener::from_std(listener).map_err(bind_err),
            Err(e) => last_err = Some(e),
        }
    }

    Err(bind_err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved")
    })))
}

fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
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
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
