//! Error types for duet-types.

use thiserror::Error;

/// Errors that can occur when parsing duet identity types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// Public key is not a decodable string of the expected length
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Relay token is not a decodable string of the expected length
    #[error("invalid relay token: {0}")]
    InvalidRelayToken(String),

    /// Day id does not match the YYYY-MM-DD grammar
    #[error("invalid day id: {0}")]
    InvalidDayId(String),

    /// Channel frame could not be decoded
    #[error("invalid channel frame: {0}")]
    InvalidFrame(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypeError::InvalidDayId("26-01-01".to_string());
        assert_eq!(err.to_string(), "invalid day id: 26-01-01");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypeError>();
    }
}
