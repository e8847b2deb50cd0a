use std::io;

use thiserror::Error;

use crate::pdu::ErrorCode;

/// Reasons a byte sequence is not a valid PDU.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed pdu: {0}")]
    MalformedPdu(String),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown pdu type {0}")]
    UnknownType(u8),
}

impl DecodeError {
    /// Error Report code sent back to the router for this failure.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DecodeError::MalformedPdu(_) => ErrorCode::CorruptData,
            DecodeError::UnsupportedVersion(_) => ErrorCode::UnsupportedProtocolVersion,
            DecodeError::UnknownType(_) => ErrorCode::UnsupportedPduType,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DecodeError::MalformedPdu(reason.into())
    }
}

/// Failures while reading a PDU from a byte stream.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream delivered bytes that do not form a valid PDU. `raw` holds
    /// what was read for it so it can be echoed in an Error Report.
    #[error("{error}")]
    Decode { error: DecodeError, raw: Vec<u8> },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The peer closed the stream on a PDU boundary.
    #[error("connection closed")]
    Closed,
}
