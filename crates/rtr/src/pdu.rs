use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::DecodeError;
use crate::serial::Serial;

/// Length of the fixed header shared by every PDU.
pub const HEADER_LEN: usize = 8;
/// Length of a subject key identifier carried in Router Key PDUs.
pub const SKI_LEN: usize = 20;

/// Protocol versions understood by the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolVersion {
    /// RFC 6810.
    V0 = 0,
    /// RFC 8210, adds Router Key PDUs and timing in End of Data.
    V1 = 1,
}

impl ProtocolVersion {
    pub const LATEST: ProtocolVersion = ProtocolVersion::V1;

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn supports_router_keys(self) -> bool {
        self >= ProtocolVersion::V1
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProtocolVersion::V0),
            1 => Ok(ProtocolVersion::V1),
            other => Err(DecodeError::UnsupportedVersion(other)),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

/// Numeric PDU type codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PduType {
    SerialNotify = 0,
    SerialQuery = 1,
    ResetQuery = 2,
    CacheResponse = 3,
    Ipv4Prefix = 4,
    Ipv6Prefix = 6,
    EndOfData = 7,
    CacheReset = 8,
    RouterKey = 9,
    ErrorReport = 10,
}

impl PduType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PduType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => PduType::SerialNotify,
            1 => PduType::SerialQuery,
            2 => PduType::ResetQuery,
            3 => PduType::CacheResponse,
            4 => PduType::Ipv4Prefix,
            6 => PduType::Ipv6Prefix,
            7 => PduType::EndOfData,
            8 => PduType::CacheReset,
            9 => PduType::RouterKey,
            10 => PduType::ErrorReport,
            other => return Err(DecodeError::UnknownType(other)),
        })
    }
}

impl fmt::Display for PduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PduType::SerialNotify => "Serial Notify",
            PduType::SerialQuery => "Serial Query",
            PduType::ResetQuery => "Reset Query",
            PduType::CacheResponse => "Cache Response",
            PduType::Ipv4Prefix => "IPv4 Prefix",
            PduType::Ipv6Prefix => "IPv6 Prefix",
            PduType::EndOfData => "End of Data",
            PduType::CacheReset => "Cache Reset",
            PduType::RouterKey => "Router Key",
            PduType::ErrorReport => "Error Report",
        };
        f.write_str(name)
    }
}

/// Announce/withdraw bit carried by prefix and router key PDUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Flag {
    Withdraw,
    Announce,
}

impl Flag {
    pub fn bits(self) -> u8 {
        match self {
            Flag::Withdraw => 0,
            Flag::Announce => 1,
        }
    }

    /// Only the low bit is defined; the rest are ignored on receipt.
    pub fn from_bits(bits: u8) -> Self {
        if bits & 1 == 1 {
            Flag::Announce
        } else {
            Flag::Withdraw
        }
    }
}

/// Refresh, retry and expire intervals in seconds, echoed in version 1 End of Data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timing {
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            refresh: 3600,
            retry: 600,
            expire: 7200,
        }
    }
}

/// Error Report codes (RFC 8210 section 12).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    CorruptData = 0,
    InternalError = 1,
    NoDataAvailable = 2,
    InvalidRequest = 3,
    UnsupportedProtocolVersion = 4,
    UnsupportedPduType = 5,
    WithdrawalOfUnknownRecord = 6,
    DuplicateAnnouncementReceived = 7,
    UnexpectedProtocolVersion = 8,
}

impl ErrorCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Every code except `NoDataAvailable` terminates the session.
    pub fn is_fatal(self) -> bool {
        self != ErrorCode::NoDataAvailable
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ErrorCode::CorruptData,
            1 => ErrorCode::InternalError,
            2 => ErrorCode::NoDataAvailable,
            3 => ErrorCode::InvalidRequest,
            4 => ErrorCode::UnsupportedProtocolVersion,
            5 => ErrorCode::UnsupportedPduType,
            6 => ErrorCode::WithdrawalOfUnknownRecord,
            7 => ErrorCode::DuplicateAnnouncementReceived,
            8 => ErrorCode::UnexpectedProtocolVersion,
            other => {
                return Err(DecodeError::MalformedPdu(format!(
                    "unknown error code {other}"
                )));
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialNotify {
    pub version: ProtocolVersion,
    pub session_id: u16,
    pub serial: Serial,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialQuery {
    pub version: ProtocolVersion,
    pub session_id: u16,
    pub serial: Serial,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResetQuery {
    pub version: ProtocolVersion,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheResponse {
    pub version: ProtocolVersion,
    pub session_id: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Prefix {
    pub version: ProtocolVersion,
    pub flag: Flag,
    pub prefix: Ipv4Addr,
    pub prefix_len: u8,
    pub max_len: u8,
    pub asn: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv6Prefix {
    pub version: ProtocolVersion,
    pub flag: Flag,
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    pub max_len: u8,
    pub asn: u32,
}

/// Closes a response. Only version 1 carries timing intervals, so the
/// version follows from `timing`: `None` is a version 0 PDU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndOfData {
    pub session_id: u16,
    pub serial: Serial,
    pub timing: Option<Timing>,
}

impl EndOfData {
    pub fn new(version: ProtocolVersion, session_id: u16, serial: Serial, timing: Timing) -> Self {
        let timing = match version {
            ProtocolVersion::V0 => None,
            ProtocolVersion::V1 => Some(timing),
        };
        EndOfData {
            session_id,
            serial,
            timing,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        match self.timing {
            Some(_) => ProtocolVersion::V1,
            None => ProtocolVersion::V0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheReset {
    pub version: ProtocolVersion,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterKey {
    pub version: ProtocolVersion,
    pub flag: Flag,
    pub ski: [u8; SKI_LEN],
    pub asn: u32,
    pub spki: Vec<u8>,
}

/// Error Report carrying the offending PDU bytes and a diagnostic text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorReport {
    pub version: ProtocolVersion,
    pub code: ErrorCode,
    pub pdu: Vec<u8>,
    pub text: String,
}

/// Every PDU of the RPKI-to-Router protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pdu {
    SerialNotify(SerialNotify),
    SerialQuery(SerialQuery),
    ResetQuery(ResetQuery),
    CacheResponse(CacheResponse),
    Ipv4Prefix(Ipv4Prefix),
    Ipv6Prefix(Ipv6Prefix),
    EndOfData(EndOfData),
    CacheReset(CacheReset),
    RouterKey(RouterKey),
    ErrorReport(ErrorReport),
}

impl Pdu {
    pub fn version(&self) -> ProtocolVersion {
        match self {
            Pdu::SerialNotify(pdu) => pdu.version,
            Pdu::SerialQuery(pdu) => pdu.version,
            Pdu::ResetQuery(pdu) => pdu.version,
            Pdu::CacheResponse(pdu) => pdu.version,
            Pdu::Ipv4Prefix(pdu) => pdu.version,
            Pdu::Ipv6Prefix(pdu) => pdu.version,
            Pdu::EndOfData(pdu) => pdu.version(),
            Pdu::CacheReset(pdu) => pdu.version,
            Pdu::RouterKey(pdu) => pdu.version,
            Pdu::ErrorReport(pdu) => pdu.version,
        }
    }

    pub fn pdu_type(&self) -> PduType {
        match self {
            Pdu::SerialNotify(_) => PduType::SerialNotify,
            Pdu::SerialQuery(_) => PduType::SerialQuery,
            Pdu::ResetQuery(_) => PduType::ResetQuery,
            Pdu::CacheResponse(_) => PduType::CacheResponse,
            Pdu::Ipv4Prefix(_) => PduType::Ipv4Prefix,
            Pdu::Ipv6Prefix(_) => PduType::Ipv6Prefix,
            Pdu::EndOfData(_) => PduType::EndOfData,
            Pdu::CacheReset(_) => PduType::CacheReset,
            Pdu::RouterKey(_) => PduType::RouterKey,
            Pdu::ErrorReport(_) => PduType::ErrorReport,
        }
    }

    /// Total encoded size including the header.
    pub fn encoded_len(&self) -> usize {
        match self {
            Pdu::SerialNotify(_) | Pdu::SerialQuery(_) => HEADER_LEN + 4,
            Pdu::ResetQuery(_) | Pdu::CacheResponse(_) | Pdu::CacheReset(_) => HEADER_LEN,
            Pdu::Ipv4Prefix(_) => HEADER_LEN + 12,
            Pdu::Ipv6Prefix(_) => HEADER_LEN + 24,
            Pdu::EndOfData(pdu) => match pdu.timing {
                None => HEADER_LEN + 4,
                Some(_) => HEADER_LEN + 16,
            },
            Pdu::RouterKey(pdu) => HEADER_LEN + SKI_LEN + 4 + pdu.spki.len(),
            Pdu::ErrorReport(pdu) => HEADER_LEN + 4 + pdu.pdu.len() + 4 + pdu.text.len(),
        }
    }

    /// Whether a router is allowed to send this PDU to a cache.
    pub fn is_client_pdu(&self) -> bool {
        matches!(
            self,
            Pdu::SerialQuery(_) | Pdu::ResetQuery(_) | Pdu::ErrorReport(_)
        )
    }
}
