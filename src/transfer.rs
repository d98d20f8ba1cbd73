//! Bulk payload phase shared by the server and the client.
//!
//! - `send_random`: pump a `RandomReader` into a connection
//! - `receive`: drain a connection into a `DiscardWriter`
//!
//! Both run until the context deadline or until the peer goes away, and
//! return the byte count. Only true cancellation and unexpected I/O errors
//! are failures.

use crate::stream::{Context, DiscardWriter, Done, RandomReader, StreamError, CHUNK_SIZE};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("transfer i/o error")]
    Io(#[from] io::Error),
}

/// Errors that mean the peer ended a timed transfer early.
pub fn is_benign(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
    )
}

/// Write pseudorandom bytes to `conn` until `ctx` finishes or the peer closes.
///
/// Returns the number of bytes fully written. A chunk cut off by the
/// deadline or by the peer does not count.
pub async fn send_random<W>(ctx: &Context, conn: &mut W) -> Result<u64, TransferError>
where
    W: AsyncWrite + Unpin,
{
    let mut reader = RandomReader::new(ctx.clone());
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(reader.total());
        }

        let written = tokio::select! {
            biased;
            done = ctx.done() => Err(done),
            result = conn.write_all(&buf[..n]) => Ok(result),
        };

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) if is_benign(&e) => return Ok(reader.total() - n as u64),
            Ok(Err(e)) => return Err(e.into()),
            Err(Done::DeadlineExceeded) => return Ok(reader.total() - n as u64),
            Err(Done::Cancelled) => return Err(StreamError::Cancelled.into()),
        }
    }
}

/// Read from `conn` into a discarding sink until `ctx` finishes or EOF.
///
/// Returns the number of bytes accepted by the sink.
pub async fn receive<R>(ctx: &Context, conn: &mut R) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut sink = DiscardWriter::new(ctx.clone());
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let read = tokio::select! {
            biased;
            done = ctx.done() => Err(done),
            result = conn.read(&mut buf) => Ok(result),
        };

        let n = match read {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) if is_benign(&e) => break,
            Ok(Err(e)) => return Err(e.into()),
            Err(Done::DeadlineExceeded) => break,
            Err(Done::Cancelled) => return Err(StreamError::Cancelled.into()),
        };

        if sink.write(&buf[..n]).await? == 0 {
            break;
        }
    }

    Ok(sink.total())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_is_benign() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::TimedOut,
            io::ErrorKind::UnexpectedEof,
        ] {
            assert!(is_benign(&io::Error::new(kind, "x")), "{kind:?}");
        }
        assert!(!is_benign(&io::Error::new(io::ErrorKind::PermissionDenied, "x")));
        assert!(!is_benign(&io::Error::other("x")));
    }

    #[tokio::test]
    async fn test_send_then_receive() {
        let (mut tx, mut rx) = tokio::io::duplex(64 * 1024);
        let ctx = Context::background().with_timeout(Duration::from_millis(50));

        let sender_ctx = ctx.clone();
        let sender = tokio::spawn(async move {
            let sent = send_random(&sender_ctx, &mut tx).await;
            drop(tx);
            sent
        });

        let received = receive(&ctx, &mut rx).await.unwrap();
        let sent = sender.await.unwrap().unwrap();
        assert!(sent > 0);
        assert!(received > 0);
    }

    #[tokio::test]
    async fn test_receive_stops_at_eof() {
        let mut conn = tokio_test::io::Builder::new()
            .read(b"hello")
            .read(b" world")
            .build();
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        assert_eq!(receive(&ctx, &mut conn).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn test_send_stops_on_broken_pipe() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        drop(rx);
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        assert_eq!(send_random(&ctx, &mut tx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_send_counts_only_written_chunks() {
        // Room for two chunks; the third blocks until the deadline.
        let (mut tx, _rx) = tokio::io::duplex(2 * CHUNK_SIZE);
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let sent = send_random(&ctx, &mut tx).await.unwrap();
        assert_eq!(sent, 2 * CHUNK_SIZE as u64);
    }

    #[tokio::test]
    async fn test_unexpected_error_surfaces() {
        let mut conn = tokio_test::io::Builder::new()
            .read_error(io::Error::new(io::ErrorKind::PermissionDenied, "nope"))
            .build();
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        assert!(matches!(
            receive(&ctx, &mut conn).await,
            Err(TransferError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_surfaces() {
        let (mut tx, _rx) = tokio::io::duplex(1024);
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();
        assert!(matches!(
            send_random(&ctx, &mut tx).await,
            Err(TransferError::Stream(StreamError::Cancelled))
        ));
    }
}
