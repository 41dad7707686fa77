use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Com,
    Cn,
}

impl Domain {
    pub fn as_str(&self) -> &str {
        match self {
            Domain::Com => "com",
            Domain::Cn => "cn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Stable key for one logical account.
///
/// Keys the in-memory session map as well as the persisted cookie and
/// account stores, so it must not change across process restarts. An empty
/// identity cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserIdentity(String);

impl UserIdentity {
    /// Derive the identity from the login credentials: hex SHA-256 of
    /// `username || password`.
    pub fn from_credentials(username: &str, password: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(username.as_bytes());
        hasher.update(password.as_bytes());
        Self(hex_lower(&hasher.finalize()))
    }

    pub fn parse(raw: &str) -> Result<Self, Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::EmptyIdentity);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentity {
    /// Only a prefix is shown; the full key is derived from a password.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.len().min(8);
        write!(f, "{}", &self.0[..end])
    }
}

impl TryFrom<String> for UserIdentity {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserIdentity> for String {
    fn from(id: UserIdentity) -> Self {
        id.0
    }
}

/// Lowercase hex encoding of a byte slice.
pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_stable() {
        let a = UserIdentity::from_credentials("alice", "pw");
        let b = UserIdentity::from_credentials("alice", "pw");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_identity_differs_per_credentials() {
        let a = UserIdentity::from_credentials("alice", "pw");
        let b = UserIdentity::from_credentials("alice", "pw2");
        let c = UserIdentity::from_credentials("bob", "pw");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_identity_matches_known_digest() {
        // sha256("abc")
        let id = UserIdentity::from_credentials("a", "bc");
        assert_eq!(
            id.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_identity_rejected() {
        assert!(matches!(UserIdentity::parse(""), Err(Error::EmptyIdentity)));
        assert!(matches!(UserIdentity::parse("   "), Err(Error::EmptyIdentity)));
    }

    #[test]
    fn test_identity_serde_rejects_empty() {
        let result: Result<UserIdentity, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
        let id: UserIdentity = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.as_str(), "abc");
    }

    #[test]
    fn test_display_is_truncated() {
        let id = UserIdentity::from_credentials("alice", "pw");
        assert_eq!(id.to_string().len(), 8);
    }

    #[test]
    fn test_hex_lower() {
        assert_eq!(hex_lower(&[0x00, 0xab, 0x10]), "00ab10");
    }
}
