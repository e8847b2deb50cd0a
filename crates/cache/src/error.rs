use rtr::Serial;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("invalid asn: {0}")]
    InvalidAsn(String),
    #[error("invalid prefix: {0}")]
    InvalidPrefix(String),
    #[error("prefix length {len} exceeds address width {width}")]
    InvalidPrefixLength { len: u8, width: u8 },
    #[error("max length {max_len} invalid for {prefix}")]
    InvalidMaxLength { prefix: String, max_len: u8 },
}

/// The requested serial is outside the retained history. Callers fall back
/// to a full snapshot transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("serial {0} is not in the retained history")]
pub struct SerialUnknown(pub Serial);
