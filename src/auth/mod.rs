//! Per-connection authentication.
//!
//! Every connection opens with a fixed-size signed token:
//!
//! ```text
//! +-----------+----------+---------+------+-----------+-----------+
//! | direction | clientID | peer IP | salt | timestamp | signature |
//! +-----------+----------+---------+------+-----------+-----------+
//! |     1     |    2     |   16    |  32  |     8     |    64     |
//! +-----------+----------+---------+------+-----------+-----------+
//! ```
//!
//! Integers are big-endian and the IP is stored in IPv6-mapped form. The
//! signature covers the first 59 bytes plus a secret that is shared
//! out-of-band and never sent. The server answers a valid token with a freshly
//! salted one; any rejection is signalled only by closing the connection.

mod credentials;
mod handshake;
mod signature;
mod token;

pub use credentials::{Credential, CredentialTable};
pub use handshake::{accept, handshake};
pub use signature::{SignatureScheme, SIGNATURE_LEN};
pub use token::{Direction, Token, REPLAY_WINDOW_SECS, TOKEN_LEN};

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Authentication failures, one variant per rejection kind.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed token buffer.
    #[error("invalid token format: {0}")]
    Format(String),

    #[error("unknown client: {0}")]
    UnknownClient(u16),

    /// Timestamp outside the replay window; `skew` is `now - timestamp`.
    #[error("replay window exceeded: clock skew {skew}s, limit {}s", REPLAY_WINDOW_SECS)]
    ReplayWindowExceeded { skew: i64 },

    #[error("invalid token signature")]
    SignatureMismatch,

    /// Transport failure or rejected reply during the handshake.
    #[error("handshake failed")]
    HandshakeFailed(#[source] BoxError),

    #[error("random source failure")]
    Random(#[from] rand::Error),

    /// A `clientID:hexsecret` credential could not be parsed.
    #[error("invalid credential: {0}")]
    CredentialFormat(String),
}

impl AuthError {
    pub(crate) fn handshake(cause: impl Into<BoxError>) -> Self {
        AuthError::HandshakeFailed(cause.into())
    }
}
