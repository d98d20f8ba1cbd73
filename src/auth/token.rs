//! Token wire format, signing and verification.

use super::{AuthError, Credential, CredentialTable, SignatureScheme, SIGNATURE_LEN};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

const LEN_DIRECTION: usize = 1;
const LEN_CLIENT_ID: usize = 2;
const LEN_IP: usize = 16;
const LEN_SALT: usize = 32;
const LEN_TIMESTAMP: usize = 8;

const END_CLIENT_ID: usize = LEN_DIRECTION + LEN_CLIENT_ID;
const END_IP: usize = END_CLIENT_ID + LEN_IP;
const END_SALT: usize = END_IP + LEN_SALT;
const END_TIMESTAMP: usize = END_SALT + LEN_TIMESTAMP;

/// Size of an encoded token.
pub const TOKEN_LEN: usize = END_TIMESTAMP + SIGNATURE_LEN;

/// Maximum accepted `|now - timestamp|`, in seconds.
pub const REPLAY_WINDOW_SECS: i64 = 30;

/// Which side sends the bulk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Server sends.
    Download,
    /// Server receives.
    Upload,
}

impl Direction {
    fn to_byte(self) -> u8 {
        match self {
            Direction::Download => 0,
            Direction::Upload => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, AuthError> {
        match byte {
            0 => Ok(Direction::Download),
            1 => Ok(Direction::Upload),
            other => Err(AuthError::Format(format!("unknown direction {other}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Download => "download",
            Direction::Upload => "upload",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-connection credential.
///
/// The stored signature is only ever produced by [`Token::sign`]; incoming
/// signatures are checked by recomputing, never trusted.
#[derive(Clone)]
pub struct Token {
    credential: Credential,
    scheme: SignatureScheme,
    direction: Direction,
    peer_ip: Ipv6Addr,
    salt: [u8; LEN_SALT],
    timestamp: i64,
    signature: [u8; SIGNATURE_LEN],
}

impl Token {
    /// An unsigned token. Call [`Token::refresh`] before the first `sign`.
    pub fn new(
        credential: Credential,
        scheme: SignatureScheme,
        direction: Direction,
        peer_ip: IpAddr,
    ) -> Self {
        Self {
            credential,
            scheme,
            direction,
            peer_ip: to_mapped(peer_ip),
            salt: [0; LEN_SALT],
            timestamp: 0,
            signature: [0; SIGNATURE_LEN],
        }
    }

    /// Draw a fresh salt and stamp the current time.
    pub fn refresh(&mut self) -> Result<(), AuthError> {
        OsRng.try_fill_bytes(&mut self.salt)?;
        self.timestamp = now();
        Ok(())
    }

    /// Encode every field and sign, keeping the signature on the token.
    pub fn sign(&mut self) -> [u8; TOKEN_LEN] {
        let mut buf = self.encode_prefix();
        self.signature = self
            .scheme
            .sign(&buf[..END_TIMESTAMP], self.credential.secret());
        buf[END_TIMESTAMP..].copy_from_slice(&self.signature);
        buf
    }

    /// Recompute the signature over the current fields and compare it to
    /// `candidate` in constant time.
    pub fn verify(&self, candidate: &[u8]) -> bool {
        let buf = self.encode_prefix();
        self.scheme
            .verify(&buf[..END_TIMESTAMP], self.credential.secret(), candidate)
    }

    /// Parse and authenticate a token against `table` at the current time.
    pub fn decode(buf: &[u8], table: &CredentialTable) -> Result<Self, AuthError> {
        Self::decode_at(buf, table, now())
    }

    /// Parse and authenticate a token as if the clock read `now`.
    ///
    /// Checks run in order: format, known client, replay window, signature.
    /// The returned token carries the table's secret.
    pub fn decode_at(buf: &[u8], table: &CredentialTable, now: i64) -> Result<Self, AuthError> {
        if buf.len() != TOKEN_LEN {
            return Err(AuthError::Format(format!(
                "length {} instead of {TOKEN_LEN}",
                buf.len()
            )));
        }

        let direction = Direction::from_byte(buf[0])?;
        let client_id = u16::from_be_bytes([buf[LEN_DIRECTION], buf[LEN_DIRECTION + 1]]);

        let credential = table
            .get(client_id)
            .ok_or(AuthError::UnknownClient(client_id))?;

        let mut timestamp = [0u8; LEN_TIMESTAMP];
        timestamp.copy_from_slice(&buf[END_SALT..END_TIMESTAMP]);
        let timestamp = i64::from_be_bytes(timestamp);

        let skew = now.saturating_sub(timestamp);
        if !(-REPLAY_WINDOW_SECS..=REPLAY_WINDOW_SECS).contains(&skew) {
            return Err(AuthError::ReplayWindowExceeded { skew });
        }

        let mut ip = [0u8; LEN_IP];
        ip.copy_from_slice(&buf[END_CLIENT_ID..END_IP]);
        let mut salt = [0u8; LEN_SALT];
        salt.copy_from_slice(&buf[END_IP..END_SALT]);

        let mut token = Token {
            credential: credential.clone(),
            scheme: table.scheme(),
            direction,
            peer_ip: Ipv6Addr::from(ip),
            salt,
            timestamp,
            signature: [0; SIGNATURE_LEN],
        };

        let candidate = &buf[END_TIMESTAMP..];
        if !token.verify(candidate) {
            return Err(AuthError::SignatureMismatch);
        }
        token.signature.copy_from_slice(candidate);

        Ok(token)
    }

    pub fn client_id(&self) -> u16 {
        self.credential.client_id()
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The signed peer address, unmapped back to IPv4 where applicable.
    pub fn peer_ip(&self) -> IpAddr {
        self.peer_ip.to_canonical()
    }

    #[cfg(test)]
    pub(crate) fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[cfg(test)]
    pub(crate) fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    #[cfg(test)]
    pub(crate) fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    #[cfg(test)]
    pub(crate) fn set_peer_ip(&mut self, ip: IpAddr) {
        self.peer_ip = to_mapped(ip);
    }

    #[cfg(test)]
    pub(crate) fn signature(&self) -> &[u8; SIGNATURE_LEN] {
        &self.signature
    }

    fn encode_prefix(&self) -> [u8; TOKEN_LEN] {
        let mut buf = [0u8; TOKEN_LEN];
        buf[0] = self.direction.to_byte();
        buf[LEN_DIRECTION..END_CLIENT_ID].copy_from_slice(&self.client_id().to_be_bytes());
        buf[END_CLIENT_ID..END_IP].copy_from_slice(&self.peer_ip.octets());
        buf[END_IP..END_SALT].copy_from_slice(&self.salt);
        buf[END_SALT..END_TIMESTAMP].copy_from_slice(&self.timestamp.to_be_bytes());
        buf
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("client_id", &self.client_id())
            .field("direction", &self.direction)
            .field("peer_ip", &self.peer_ip())
            .field("timestamp", &self.timestamp)
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

fn to_mapped(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
