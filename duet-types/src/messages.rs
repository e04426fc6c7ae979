//! Handoff channel frames.
//!
//! The handoff channel is a WebSocket carrying JSON text frames. A
//! client authenticates with exactly one `auth` (watcher) or
//! `collect_auth` (collector) frame; the server answers with `ready`,
//! `paired`, `bundle`, or `error` frames.

use serde::{Deserialize, Serialize};

use crate::TypeError;

/// All frames exchanged on the handoff channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelFrame {
    /// Watcher authentication (signed over `WATCH\n{publicKey}\n{timestamp}`)
    #[serde(rename_all = "camelCase")]
    Auth {
        /// The authenticating user's public key
        public_key: String,
        /// ISO-8601 timestamp covered by the signature
        timestamp: String,
        /// Base64 Ed25519 signature
        signature: String,
    },
    /// Collector authentication (signed over `COLLECT\n{publicKey}\n{timestamp}`)
    #[serde(rename_all = "camelCase")]
    CollectAuth {
        /// The authenticating user's public key
        public_key: String,
        /// ISO-8601 timestamp covered by the signature
        timestamp: String,
        /// Base64 Ed25519 signature
        signature: String,
    },
    /// Server acknowledgement that the channel is registered
    Ready,
    /// Server notification that the pair completed
    #[serde(rename_all = "camelCase")]
    Paired {
        /// The public key of the user who joined
        partner_public_key: String,
    },
    /// History bundle, relayed opaque in both directions
    Bundle {
        /// Opaque payload; the relay never inspects it
        payload: String,
    },
    /// Terminal error frame; the channel closes after sending it
    Error {
        /// Human-readable reason
        message: String,
    },
}

impl ChannelFrame {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("channel frame serialization should not fail")
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(s: &str) -> Result<Self, TypeError> {
        serde_json::from_str(s).map_err(|e| TypeError::InvalidFrame(e.to_string()))
    }
}
