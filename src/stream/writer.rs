//! Counting sink bounded by a context.

use super::{finish, Context, Done, StreamError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Accepts and discards bytes until its context finishes.
///
/// Writes are handed to a background drain task through a one-slot channel,
/// so a write waits only for the drain or the context, never indefinitely.
pub struct DiscardWriter {
    ctx: Context,
    sink: mpsc::Sender<usize>,
    count: u64,
    drain: JoinHandle<()>,
}

impl DiscardWriter {
    pub fn new(ctx: Context) -> Self {
        let (sink, rx) = mpsc::channel(1);
        let drain = tokio::spawn(drain(ctx.clone(), rx));

        Self {
            ctx,
            sink,
            count: 0,
            drain,
        }
    }

    /// Accept `buf`, returning its length.
    ///
    /// Returns `Ok(0)` once the deadline has elapsed (the sink is closed) and
    /// `Err(StreamError::Cancelled)` if the context was cancelled.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        if let Some(done) = self.ctx.state() {
            return finish(done);
        }

        let sent = tokio::select! {
            biased;
            done = self.ctx.done() => Err(done),
            result = self.sink.send(buf.len()) => Ok(result.is_ok()),
        };

        match sent {
            Err(done) => finish(done),
            Ok(true) => {
                self.count += buf.len() as u64;
                Ok(buf.len())
            }
            // The drain only stops once the context is done.
            Ok(false) => finish(self.ctx.state().unwrap_or(Done::DeadlineExceeded)),
        }
    }

    /// Total bytes accepted so far.
    pub fn total(&self) -> u64 {
        self.count
    }
}

impl Drop for DiscardWriter {
    fn drop(&mut self) {
        self.drain.abort();
    }
}

async fn drain(ctx: Context, mut rx: mpsc::Receiver<usize>) {
    let mut discarded = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.done() => None,
            n = rx.recv() => n,
        };

        match next {
            Some(n) => discarded += n as u64,
            None => break,
        }
    }

    trace!(discarded, "Sink drained");
}
