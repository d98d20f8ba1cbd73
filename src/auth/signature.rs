//! Token signature schemes.
//!
//! Both schemes produce a 64-byte digest over the token prefix and the shared
//! secret, so they share one wire layout. Peers must agree on the scheme.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha512};

/// Size of a signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureScheme {
    /// `SHA-512(prefix || secret)`, compatible with existing deployments.
    #[default]
    Sha512,
    /// `HMAC-SHA-512(key = secret, message = prefix)`.
    HmacSha512,
}

impl SignatureScheme {
    pub fn sign(self, prefix: &[u8], secret: &[u8]) -> [u8; SIGNATURE_LEN] {
        let digest = match self {
            SignatureScheme::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(prefix);
                hasher.update(secret);
                hasher.finalize()
            }
            SignatureScheme::HmacSha512 => {
                let mut mac = HmacSha512::new_from_slice(secret)
                    .expect("HMAC-SHA512 accepts keys of any length");
                mac.update(prefix);
                mac.finalize().into_bytes()
            }
        };

        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&digest);
        signature
    }

    /// Recompute the signature and compare it in constant time.
    pub fn verify(self, prefix: &[u8], secret: &[u8], candidate: &[u8]) -> bool {
        match self {
            SignatureScheme::Sha512 => constant_time_eq(&self.sign(prefix, secret), candidate),
            SignatureScheme::HmacSha512 => {
                let mut mac = HmacSha512::new_from_slice(secret)
                    .expect("HMAC-SHA512 accepts keys of any length");
                mac.update(prefix);
                mac.verify_slice(candidate).is_ok()
            }
        }
    }
}

/// Compare two byte slices without an early exit on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha512_matches_plain_digest() {
        let digest = Sha512::digest(b"prefixsecret");
        assert_eq!(
            SignatureScheme::Sha512.sign(b"prefix", b"secret")[..],
            digest[..]
        );
    }

    #[test]
    fn test_schemes_differ() {
        let plain = SignatureScheme::Sha512.sign(b"prefix", b"secret");
        let hmac = SignatureScheme::HmacSha512.sign(b"prefix", b"secret");
        assert_ne!(plain, hmac);
    }

    #[test]
    fn test_verify_roundtrip() {
        for scheme in [SignatureScheme::Sha512, SignatureScheme::HmacSha512] {
            let sig = scheme.sign(b"prefix", b"secret");
            assert!(scheme.verify(b"prefix", b"secret", &sig));
            assert!(!scheme.verify(b"prefix", b"secreT", &sig));
            assert!(!scheme.verify(b"prefix", b"secret", &sig[..63]));
        }
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2]));
    }

    #[test]
    fn test_scheme_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            signature: SignatureScheme,
        }
        let w: Wrapper = toml::from_str(r#"signature = "hmac-sha512""#).unwrap();
        assert_eq!(w.signature, SignatureScheme::HmacSha512);
        let w: Wrapper = toml::from_str(r#"signature = "sha512""#).unwrap();
        assert_eq!(w.signature, SignatureScheme::Sha512);
    }
}
