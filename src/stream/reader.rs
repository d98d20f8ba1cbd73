//! Pseudorandom byte source bounded by a context.

use super::{finish, Context, Done, StreamError, CHUNK_SIZE};
use bytes::{Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Yields freshly generated pseudorandom bytes until its context finishes.
///
/// A background task owns the generator and prepares chunks ahead of the
/// consumer; `read` waits on either the next chunk or the context, whichever
/// comes first. Each reader seeds its own generator, so nothing is shared
/// between sessions.
pub struct RandomReader {
    ctx: Context,
    chunks: mpsc::Receiver<Bytes>,
    pending: Bytes,
    count: u64,
    producer: JoinHandle<()>,
}

impl RandomReader {
    pub fn new(ctx: Context) -> Self {
        Self::with_chunk_size(ctx, CHUNK_SIZE)
    }

    pub fn with_chunk_size(ctx: Context, chunk_size: usize) -> Self {
        let (tx, chunks) = mpsc::channel(1);
        let producer = tokio::spawn(produce(ctx.clone(), tx, chunk_size.max(1)));

        Self {
            ctx,
            chunks,
            pending: Bytes::new(),
            count: 0,
            producer,
        }
    }

    /// Fill up to `buf.len()` bytes.
    ///
    /// Returns `Ok(0)` once the deadline has elapsed and
    /// `Err(StreamError::Cancelled)` if the context was cancelled.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if let Some(done) = self.ctx.state() {
            return finish(done);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pending.is_empty() {
            let next = tokio::select! {
                biased;
                done = self.ctx.done() => Err(done),
                chunk = self.chunks.recv() => Ok(chunk),
            };

            match next {
                Err(done) => return finish(done),
                Ok(Some(chunk)) => self.pending = chunk,
                // The producer only stops once the context is done.
                Ok(None) => {
                    return finish(self.ctx.state().unwrap_or(Done::DeadlineExceeded));
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        self.count += n as u64;
        Ok(n)
    }

    /// Total bytes handed out so far.
    pub fn total(&self) -> u64 {
        self.count
    }
}

impl Drop for RandomReader {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

async fn produce(ctx: Context, tx: mpsc::Sender<Bytes>, chunk_size: usize) {
    let mut rng = StdRng::from_entropy();

    loop {
        let permit = tokio::select! {
            biased;
            _ = ctx.done() => return,
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                // reader dropped
                Err(_) => return,
            },
        };

        let mut chunk = BytesMut::zeroed(chunk_size);
        rng.fill_bytes(&mut chunk);
        permit.send(chunk.freeze());
    }
}
