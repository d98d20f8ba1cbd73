//! Runs one accepted connection end to end.
//!
//! handshake -> transfer in the token's direction -> close. A rejected token
//! is answered only by closing the connection.

use crate::auth::{self, AuthError, CredentialTable, Direction, Token};
use crate::stream::Context;
use crate::transfer::{self, TransferError};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::trace;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake rejected")]
    Handshake(#[from] AuthError),

    #[error("transfer failed")]
    Transfer(#[from] TransferError),
}

/// State of one authenticated connection, owned by its task.
#[derive(Debug)]
pub struct Session {
    pub peer: SocketAddr,
    pub token: Token,
    pub started: Instant,
    pub bytes: u64,
}

impl Session {
    pub fn direction(&self) -> Direction {
        self.token.direction()
    }

    pub fn client_id(&self) -> u16 {
        self.token.client_id()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Handle `stream` from `peer`.
///
/// `ctx` bounds the whole connection; the transfer phase is further limited
/// to `transfer_timeout`.
pub async fn run<S>(
    mut stream: S,
    peer: SocketAddr,
    credentials: &CredentialTable,
    ctx: &Context,
    transfer_timeout: Duration,
) -> Result<Session, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let token = auth::accept(&mut stream, credentials, ctx).await?;
    trace!(%peer, client = token.client_id(), direction = %token.direction(), "Handshake complete");

    let mut session = Session {
        peer,
        token,
        started: Instant::now(),
        bytes: 0,
    };

    let transfer_ctx = ctx.with_timeout(transfer_timeout);
    session.bytes = match session.direction() {
        Direction::Download => transfer::send_random(&transfer_ctx, &mut stream).await?,
        Direction::Upload => transfer::receive(&transfer_ctx, &mut stream).await?,
    };

    // best effort; the peer may already be gone
    let _ = stream.shutdown().await;

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, SignatureScheme};
    use crate::stream::StreamError;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::AsyncReadExt;

    fn credential() -> Credential {
        Credential::new(1, vec![0x33, 0x12, 0xa1, 0x8b])
    }

    fn table() -> CredentialTable {
        CredentialTable::from_credentials([credential()], SignatureScheme::Sha512)
    }

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000)
    }

    fn token(direction: Direction) -> Token {
        Token::new(
            credential(),
            SignatureScheme::Sha512,
            direction,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        )
    }

    #[tokio::test]
    async fn test_download_session() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let ctx = Context::background().with_timeout(Duration::from_secs(5));

        let task = tokio::spawn(async move {
            run(server, peer(), &table(), &ctx, Duration::from_millis(50)).await
        });

        let mut token = token(Direction::Download);
        auth::handshake(&mut client, &mut token).await.unwrap();

        let mut received = 0u64;
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            match client.read(&mut buf).await.unwrap() {
                0 => break,
                n => received += n as u64,
            }
        }

        let session = task.await.unwrap().unwrap();
        assert_eq!(session.direction(), Direction::Download);
        assert_eq!(session.client_id(), 1);
        assert!(session.bytes > 0);
        assert!(received >= session.bytes);
    }

    #[tokio::test]
    async fn test_upload_session() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let ctx = Context::background().with_timeout(Duration::from_secs(5));

        let task = tokio::spawn(async move {
            run(server, peer(), &table(), &ctx, Duration::from_secs(5)).await
        });

        let mut token = token(Direction::Upload);
        auth::handshake(&mut client, &mut token).await.unwrap();
        client.write_all(&[7u8; 1000]).await.unwrap();
        client.shutdown().await.unwrap();

        let session = task.await.unwrap().unwrap();
        assert_eq!(session.direction(), Direction::Upload);
        assert_eq!(session.bytes, 1000);
    }

    #[tokio::test]
    async fn test_bad_token_closes_silently() {
        let (mut client, server) = tokio::io::duplex(1024);
        let ctx = Context::background().with_timeout(Duration::from_secs(5));

        let task = tokio::spawn(async move {
            run(server, peer(), &table(), &ctx, Duration::from_secs(1)).await
        });

        client.write_all(&[0u8; auth::TOKEN_LEN]).await.unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SessionError::Handshake(AuthError::UnknownClient(0))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_transfer_is_an_error() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let (root, handle) = Context::with_cancel();
        let ctx = root.with_timeout(Duration::from_secs(5));

        let task = tokio::spawn(async move {
            run(server, peer(), &table(), &ctx, Duration::from_secs(5)).await
        });

        let mut token = token(Direction::Upload);
        auth::handshake(&mut client, &mut token).await.unwrap();
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SessionError::Transfer(TransferError::Stream(StreamError::Cancelled))
        ));
    }
}
