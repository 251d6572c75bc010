//! 协议层错误类型定义

use thiserror::Error;

/// 协议编解码错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Buffer too short: expected {expected}, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Invalid handle sentinel: 0x{0:02X}")]
    InvalidSentinel(u8),

    #[error("Invalid handle type tag: 0x{0:02X}")]
    InvalidTag(u8),

    #[error("Invalid message type: 0x{0:02X}")]
    InvalidMessageType(u8),

    #[error("Unsupported frame version: {0}")]
    UnsupportedVersion(u8),

    #[error("Frame length mismatch: header says {declared}, payload has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Too many arguments: {0} (max: 2)")]
    TooManyArguments(usize),

    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("Payload codec error: {0}")]
    Codec(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::ProtocolError;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::TooShort {
            expected: 10,
            actual: 4,
        };
        assert_eq!(format!("{}", err), "Buffer too short: expected 10, got 4");

        let err = ProtocolError::InvalidSentinel(0x41);
        assert_eq!(format!("{}", err), "Invalid handle sentinel: 0x41");

        let err = ProtocolError::InvalidTag(b'x');
        assert!(format!("{}", err).contains("0x78"));

        let err = ProtocolError::TooManyArguments(3);
        assert!(format!("{}", err).contains("max: 2"));
    }
}
