//! Identity types for the duet relay.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypeError;

/// Byte length of an Ed25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Byte length of the entropy behind a relay token.
pub const RELAY_TOKEN_LEN: usize = 32;

/// A user's public key: the only account identifier the relay knows.
///
/// Stored and transported as URL-safe base64 of the 32 raw Ed25519 key
/// bytes. The relay never interprets the key beyond signature checks.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(String);

impl PublicKey {
    /// Parse a public key from its printable form.
    ///
    /// The string must decode to exactly [`PUBLIC_KEY_LEN`] bytes.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| TypeError::InvalidPublicKey(format!("base64 decode: {e}")))?;
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(TypeError::InvalidPublicKey(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_LEN,
                bytes.len()
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Decode the raw key bytes.
    pub fn key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        let mut arr = [0u8; PUBLIC_KEY_LEN];
        // Parse validated the length; storage round-trips the same string.
        let bytes = URL_SAFE_NO_PAD.decode(&self.0).unwrap_or_default();
        if bytes.len() == PUBLIC_KEY_LEN {
            arr.copy_from_slice(&bytes);
        }
        arr
    }

    /// Encode raw key bytes into the printable form.
    pub fn from_key_bytes(bytes: &[u8; PUBLIC_KEY_LEN]) -> Self {
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// The printable form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.0[..self.0.len().min(8)])
    }
}

/// A unique identifier for a pair (the two-user container).
///
/// UUID v4, minted by the relay on initiate.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairId(String);

impl PairId {
    /// Mint a fresh pair id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an id previously minted by the relay.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// The printable form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PairId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairId({})", &self.0[..self.0.len().min(8)])
    }
}

/// A unique identifier for a stored entry.
///
/// UUID v4, minted by the relay on upload.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(String);

impl EntryId {
    /// Mint a fresh entry id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an id previously minted by the relay.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// The printable form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", &self.0[..self.0.len().min(8)])
    }
}

/// A single-use onboarding credential bridging initiator and follower.
///
/// 32 random bytes encoded URL-safe, so 256 bits of entropy.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayToken(String);

impl RelayToken {
    /// Generate a fresh token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; RELAY_TOKEN_LEN];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap a token string received from a client.
    ///
    /// The token is only ever compared against stored rows, so no
    /// decode validation happens here; an unknown token is a lookup miss.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// The printable form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for RelayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelayToken({}..)", &self.0[..self.0.len().min(6)])
    }
}
