//! Shared-secret credentials and the server's credential table.

use super::{AuthError, SignatureScheme};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A client identifier with its shared secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    client_id: u16,
    secret: Vec<u8>,
}

impl Credential {
    pub fn new(client_id: u16, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            client_id,
            secret: secret.into(),
        }
    }

    /// Parse `clientID:hexsecret`, e.g. `1:3312a18b`.
    pub fn parse(pair: &str) -> Result<Self, AuthError> {
        let (id, secret) = pair
            .trim()
            .split_once(':')
            .ok_or_else(|| AuthError::CredentialFormat(format!("missing ':' in {pair:?}")))?;

        let client_id = id
            .trim()
            .parse::<u16>()
            .map_err(|e| AuthError::CredentialFormat(format!("client id {id:?}: {e}")))?;

        let secret = hex::decode(secret.trim())
            .map_err(|e| AuthError::CredentialFormat(format!("secret for client {client_id}: {e}")))?;
        if secret.is_empty() {
            return Err(AuthError::CredentialFormat(format!(
                "empty secret for client {client_id}"
            )));
        }

        Ok(Self::new(client_id, secret))
    }

    /// Parse a comma-separated list of pairs, skipping empty entries.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, AuthError> {
        list.split(',')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(Credential::parse)
            .collect()
    }

    pub fn client_id(&self) -> u16 {
        self.client_id
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl FromStr for Credential {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Credential::parse(s)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Read-only `clientID -> secret` mapping consulted during verification.
#[derive(Debug, Clone, Default)]
pub struct CredentialTable {
    entries: HashMap<u16, Credential>,
    scheme: SignatureScheme,
}

impl CredentialTable {
    pub fn new(scheme: SignatureScheme) -> Self {
        Self {
            entries: HashMap::new(),
            scheme,
        }
    }

    /// Build a table; a repeated client id keeps the last credential.
    pub fn from_credentials(
        credentials: impl IntoIterator<Item = Credential>,
        scheme: SignatureScheme,
    ) -> Self {
        let mut table = Self::new(scheme);
        for credential in credentials {
            table.insert(credential);
        }
        table
    }

    pub fn insert(&mut self, credential: Credential) {
        self.entries.insert(credential.client_id, credential);
    }

    pub fn get(&self, client_id: u16) -> Option<&Credential> {
        self.entries.get(&client_id)
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credential() {
        let credential = Credential::parse("1:3312a18b").unwrap();
        assert_eq!(credential.client_id(), 1);
        assert_eq!(credential.secret(), &[0x33, 0x12, 0xa1, 0x8b]);

        let credential: Credential = " 65535 : ff ".parse().unwrap();
        assert_eq!(credential.client_id(), 65535);
    }

    #[test]
    fn test_parse_credential_errors() {
        for input in ["", "1", "1:2:3", "x:aa", "65536:aa", "1:zz", "1:abc", "1:", "-1:aa"] {
            assert!(
                matches!(Credential::parse(input), Err(AuthError::CredentialFormat(_))),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credential = Credential::new(7, b"topsecret".to_vec());
        let debug = format!("{credential:?}");
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("topsecret"));
    }

    #[test]
    fn test_parse_list() {
        let parsed = Credential::parse_list("1:aa, 2:bbbb,,").unwrap();
        let table = CredentialTable::from_credentials(parsed, SignatureScheme::Sha512);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(2).unwrap().secret(), &[0xbb, 0xbb]);
        assert!(table.get(3).is_none());

        assert!(Credential::parse_list(" , ").unwrap().is_empty());
        assert!(Credential::parse_list("1:aa,bad").is_err());
    }

    #[test]
    fn test_duplicate_client_keeps_last() {
        let parsed = Credential::parse_list("1:aa,1:cc").unwrap();
        let table = CredentialTable::from_credentials(parsed, SignatureScheme::HmacSha512);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1).unwrap().secret(), &[0xcc]);
    }
}
