//! Measurement client.
//!
//! Runs a download then an upload against one server, each on a fresh
//! connection with a freshly signed token, and reports the observed speeds.

mod progress;

use progress::Progress;

use crate::auth::{self, AuthError, Credential, Direction, SignatureScheme, Token};
use crate::config::Config;
use crate::format::{self, byte_size};
use crate::stream::Context;
use crate::transfer::{self, TransferError};
use std::io::{self, Write};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

const PROGRESS_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection to {address} failed")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Handshake(#[from] AuthError),

    #[error("{direction} transfer failed")]
    Transfer {
        direction: Direction,
        #[source]
        source: TransferError,
    },

    #[error("failed to write report")]
    Report(#[source] io::Error),
}

/// Outcome of one timed transfer.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub server_ip: IpAddr,
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Measurement {
    pub fn speed(&self) -> String {
        format::speed(self.elapsed, self.bytes)
    }
}

pub struct Client {
    address: String,
    timeout: Duration,
    scheme: SignatureScheme,
    credential: Credential,
    dot: bool,
}

impl Client {
    /// The client waits twice the transfer timeout so the server always
    /// ends the transfer first.
    pub fn new(config: &Config, credential: Credential) -> Self {
        Self {
            address: config.address(),
            timeout: config.timeout * 2,
            scheme: config.signature,
            credential,
            dot: config.dot,
        }
    }

    /// Measure download then upload speed and write the report to `out`.
    pub async fn run<W: Write>(&self, ctx: &Context, out: &mut W) -> Result<(), ClientError> {
        let newline = if self.dot { "\n" } else { "" };

        let download = self.measure(ctx, Direction::Download).await?;
        writeln!(out, "{newline}IP address:     {}", download.server_ip)
            .and_then(|_| writeln!(out, "{newline}Download speed: {}", download.speed()))
            .map_err(ClientError::Report)?;

        let upload = self.measure(ctx, Direction::Upload).await?;
        writeln!(out, "{newline}Upload speed:   {}", upload.speed()).map_err(ClientError::Report)
    }

    /// One timed transfer in `direction`.
    pub async fn measure(
        &self,
        ctx: &Context,
        direction: Direction,
    ) -> Result<Measurement, ClientError> {
        let progress = self
            .dot
            .then(|| Progress::start(io::stdout(), PROGRESS_PERIOD));

        let result = self.transfer(ctx, direction).await;

        if let Some(progress) = progress {
            progress.stop().await;
        }
        result
    }

    async fn transfer(
        &self,
        ctx: &Context,
        direction: Direction,
    ) -> Result<Measurement, ClientError> {
        let ctx = ctx.with_timeout(self.timeout);
        let connect_err = |source| ClientError::Connect {
            address: self.address.clone(),
            source,
        };

        let mut stream = tokio::select! {
            biased;
            done = ctx.done() => Err(io::Error::from(done)),
            result = TcpStream::connect(self.address.as_str()) => result,
        }
        .map_err(connect_err)?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let server_ip = stream.peer_addr().map_err(connect_err)?.ip();

        let mut token = Token::new(self.credential.clone(), self.scheme, direction, server_ip);
        let reply = tokio::select! {
            biased;
            done = ctx.done() => Err(AuthError::handshake(io::Error::from(done))),
            result = auth::handshake(&mut stream, &mut token) => result,
        }?;

        debug!(
            address = %self.address,
            client = reply.client_id(),
            direction = %direction,
            "Connected"
        );

        let started = Instant::now();
        let bytes = match direction {
            Direction::Download => transfer::receive(&ctx, &mut stream).await,
            Direction::Upload => transfer::send_random(&ctx, &mut stream).await,
        }
        .map_err(|source| ClientError::Transfer { direction, source })?;
        let elapsed = started.elapsed();

        debug!(
            direction = %direction,
            ip = %server_ip,
            size = %byte_size(bytes),
            duration = ?elapsed,
            "Transfer done"
        );

        Ok(Measurement {
            server_ip,
            bytes,
            elapsed,
        })
    }
}
