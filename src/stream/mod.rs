//! Cancellable payload primitives.
//!
//! Both primitives decouple the byte source/sink from the caller through a
//! background task and a bounded hand-off channel, so every call races
//! "data ready" against the governing [`Context`]:
//! - `RandomReader`: yields pseudorandom bytes until the deadline
//! - `DiscardWriter`: counts and drops bytes until the deadline
//!
//! An elapsed deadline is a graceful end (`Ok(0)`); true cancellation is
//! reported as [`StreamError::Cancelled`].

mod context;
mod reader;
mod writer;

pub use context::{CancelHandle, Context, Done};
pub use reader::RandomReader;
pub use writer::DiscardWriter;

use thiserror::Error;

/// Default size of generated chunks and transfer buffers.
pub const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// The governing context was cancelled before its deadline.
    #[error("transfer cancelled")]
    Cancelled,
}

/// Map a finished context onto the stream result convention.
fn finish(done: Done) -> Result<usize, StreamError> {
    match done {
        Done::DeadlineExceeded => Ok(0),
        Done::Cancelled => Err(StreamError::Cancelled),
    }
}
