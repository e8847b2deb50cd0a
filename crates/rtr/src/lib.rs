//! Wire layer of the RPKI-to-Router protocol (RFC 6810, RFC 8210).
//!
//! The crate is transport agnostic: [`encode`] and [`decode`] operate on
//! byte slices while [`read_frame`] and [`write_pdus`] adapt them to any
//! tokio byte stream.

mod codec;
mod error;
mod pdu;
mod serial;

pub use codec::{decode, encode, encode_into, read_frame, write_pdu, write_pdus};
pub use error::{DecodeError, FrameError};
pub use pdu::{
    CacheReset, CacheResponse, EndOfData, ErrorCode, ErrorReport, Flag, HEADER_LEN, Ipv4Prefix,
    Ipv6Prefix, Pdu, PduType, ProtocolVersion, ResetQuery, RouterKey, SKI_LEN, SerialNotify,
    SerialQuery, Timing,
};
pub use serial::Serial;
