//! Bit-exact PDU encoding and decoding plus stream framing.
//!
//! Every PDU starts with the same eight byte header: protocol version,
//! PDU type, a 16-bit type-specific field and the 32-bit total length.
//! All numeric fields are big-endian.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DecodeError, FrameError};
use crate::pdu::{
    CacheReset, CacheResponse, EndOfData, ErrorCode, ErrorReport, Flag, HEADER_LEN, Ipv4Prefix,
    Ipv6Prefix, Pdu, PduType, ProtocolVersion, ResetQuery, RouterKey, SKI_LEN, SerialNotify,
    SerialQuery, Timing,
};
use crate::serial::Serial;

/// Encode a PDU into a freshly allocated buffer.
pub fn encode(pdu: &Pdu) -> Bytes {
    let mut buf = BytesMut::with_capacity(pdu.encoded_len());
    encode_into(pdu, &mut buf);
    buf.freeze()
}

/// Append the encoding of `pdu` to `buf`.
pub fn encode_into(pdu: &Pdu, buf: &mut BytesMut) {
    let header_field = match pdu {
        Pdu::SerialNotify(p) => p.session_id,
        Pdu::SerialQuery(p) => p.session_id,
        Pdu::CacheResponse(p) => p.session_id,
        Pdu::EndOfData(p) => p.session_id,
        Pdu::RouterKey(p) => u16::from(p.flag.bits()) << 8,
        Pdu::ErrorReport(p) => p.code.code(),
        Pdu::ResetQuery(_) | Pdu::CacheReset(_) | Pdu::Ipv4Prefix(_) | Pdu::Ipv6Prefix(_) => 0,
    };
    buf.reserve(pdu.encoded_len());
    buf.put_u8(pdu.version().as_u8());
    buf.put_u8(pdu.pdu_type().code());
    buf.put_u16(header_field);
    buf.put_u32(pdu.encoded_len() as u32);

    match pdu {
        Pdu::SerialNotify(p) => buf.put_u32(p.serial.value()),
        Pdu::SerialQuery(p) => buf.put_u32(p.serial.value()),
        Pdu::ResetQuery(_) | Pdu::CacheResponse(_) | Pdu::CacheReset(_) => {}
        Pdu::Ipv4Prefix(p) => {
            buf.put_u8(p.flag.bits());
            buf.put_u8(p.prefix_len);
            buf.put_u8(p.max_len);
            buf.put_u8(0);
            buf.put_u32(mask_v4(p.prefix, p.prefix_len));
            buf.put_u32(p.asn);
        }
        Pdu::Ipv6Prefix(p) => {
            buf.put_u8(p.flag.bits());
            buf.put_u8(p.prefix_len);
            buf.put_u8(p.max_len);
            buf.put_u8(0);
            buf.put_u128(mask_v6(p.prefix, p.prefix_len));
            buf.put_u32(p.asn);
        }
        Pdu::EndOfData(p) => {
            buf.put_u32(p.serial.value());
            if let Some(timing) = p.timing {
                buf.put_u32(timing.refresh);
                buf.put_u32(timing.retry);
                buf.put_u32(timing.expire);
            }
        }
        Pdu::RouterKey(p) => {
            buf.put_slice(&p.ski);
            buf.put_u32(p.asn);
            buf.put_slice(&p.spki);
        }
        Pdu::ErrorReport(p) => {
            buf.put_u32(p.pdu.len() as u32);
            buf.put_slice(&p.pdu);
            buf.put_u32(p.text.len() as u32);
            buf.put_slice(p.text.as_bytes());
        }
    }
}

/// Decode exactly one PDU from `bytes`.
///
/// The declared length must match `bytes.len()` and the size required by
/// the PDU type. Host bits beyond a prefix length are ignored.
pub fn decode(bytes: &[u8]) -> Result<Pdu, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::malformed(format!(
            "{} bytes is shorter than the pdu header",
            bytes.len()
        )));
    }
    let version = ProtocolVersion::try_from(bytes[0])?;
    let pdu_type = PduType::try_from(bytes[1])?;

    let mut header = &bytes[2..HEADER_LEN];
    let header_field = header.get_u16();
    let length = header.get_u32() as usize;
    if length != bytes.len() {
        return Err(DecodeError::malformed(format!(
            "declared length {length} does not match {} received bytes",
            bytes.len()
        )));
    }

    let mut body = &bytes[HEADER_LEN..];
    let pdu = match pdu_type {
        PduType::SerialNotify => {
            expect_len(pdu_type, length, HEADER_LEN + 4)?;
            Pdu::SerialNotify(SerialNotify {
                version,
                session_id: header_field,
                serial: Serial(body.get_u32()),
            })
        }
        PduType::SerialQuery => {
            expect_len(pdu_type, length, HEADER_LEN + 4)?;
            Pdu::SerialQuery(SerialQuery {
                version,
                session_id: header_field,
                serial: Serial(body.get_u32()),
            })
        }
        PduType::ResetQuery => {
            expect_len(pdu_type, length, HEADER_LEN)?;
            Pdu::ResetQuery(ResetQuery { version })
        }
        PduType::CacheResponse => {
            expect_len(pdu_type, length, HEADER_LEN)?;
            Pdu::CacheResponse(CacheResponse {
                version,
                session_id: header_field,
            })
        }
        PduType::Ipv4Prefix => {
            expect_len(pdu_type, length, HEADER_LEN + 12)?;
            let flag = Flag::from_bits(body.get_u8());
            let prefix_len = body.get_u8();
            let max_len = body.get_u8();
            body.advance(1);
            check_prefix_lengths(prefix_len, max_len, 32)?;
            let prefix = Ipv4Addr::from(mask_v4(Ipv4Addr::from(body.get_u32()), prefix_len));
            Pdu::Ipv4Prefix(Ipv4Prefix {
                version,
                flag,
                prefix,
                prefix_len,
                max_len,
                asn: body.get_u32(),
            })
        }
        PduType::Ipv6Prefix => {
            expect_len(pdu_type, length, HEADER_LEN + 24)?;
            let flag = Flag::from_bits(body.get_u8());
            let prefix_len = body.get_u8();
            let max_len = body.get_u8();
            body.advance(1);
            check_prefix_lengths(prefix_len, max_len, 128)?;
            let prefix = Ipv6Addr::from(mask_v6(Ipv6Addr::from(body.get_u128()), prefix_len));
            Pdu::Ipv6Prefix(Ipv6Prefix {
                version,
                flag,
                prefix,
                prefix_len,
                max_len,
                asn: body.get_u32(),
            })
        }
        PduType::EndOfData => match version {
            ProtocolVersion::V0 => {
                expect_len(pdu_type, length, HEADER_LEN + 4)?;
                Pdu::EndOfData(EndOfData {
                    session_id: header_field,
                    serial: Serial(body.get_u32()),
                    timing: None,
                })
            }
            ProtocolVersion::V1 => {
                expect_len(pdu_type, length, HEADER_LEN + 16)?;
                let serial = Serial(body.get_u32());
                let timing = Timing {
                    refresh: body.get_u32(),
                    retry: body.get_u32(),
                    expire: body.get_u32(),
                };
                Pdu::EndOfData(EndOfData {
                    session_id: header_field,
                    serial,
                    timing: Some(timing),
                })
            }
        },
        PduType::CacheReset => {
            expect_len(pdu_type, length, HEADER_LEN)?;
            Pdu::CacheReset(CacheReset { version })
        }
        PduType::RouterKey => {
            if version == ProtocolVersion::V0 {
                return Err(DecodeError::UnknownType(pdu_type.code()));
            }
            if length < HEADER_LEN + SKI_LEN + 4 {
                return Err(DecodeError::malformed(format!(
                    "{pdu_type} of {length} bytes is too short"
                )));
            }
            let flag = Flag::from_bits((header_field >> 8) as u8);
            let mut ski = [0u8; SKI_LEN];
            body.copy_to_slice(&mut ski);
            let asn = body.get_u32();
            Pdu::RouterKey(RouterKey {
                version,
                flag,
                ski,
                asn,
                spki: body.to_vec(),
            })
        }
        PduType::ErrorReport => {
            let code = ErrorCode::try_from(header_field)?;
            let pdu = take_length_prefixed(&mut body, "encapsulated pdu")?;
            let text = take_length_prefixed(&mut body, "error text")?;
            if body.has_remaining() {
                return Err(DecodeError::malformed(format!(
                    "{} trailing bytes after error text",
                    body.remaining()
                )));
            }
            let text = String::from_utf8(text)
                .map_err(|_| DecodeError::malformed("error text is not valid UTF-8"))?;
            Pdu::ErrorReport(ErrorReport {
                version,
                code,
                pdu,
                text,
            })
        }
    };
    Ok(pdu)
}

/// Read one PDU from a byte stream.
///
/// Returns [`FrameError::Closed`] when the stream ends before the first
/// header byte. Declared lengths shorter than the header or longer than
/// `max_len` are rejected without reading a body. Any other failure,
/// including an unsupported version, carries the whole frame as `raw`.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Pdu, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let first = reader.read(&mut header).await?;
    if first == 0 {
        return Err(FrameError::Closed);
    }
    reader.read_exact(&mut header[first..]).await?;

    let version = ProtocolVersion::try_from(header[0]);
    let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if length < HEADER_LEN || length > max_len {
        let error = match version {
            Err(error) => error,
            Ok(_) => DecodeError::malformed(format!(
                "declared length {length} outside {HEADER_LEN}..={max_len}"
            )),
        };
        return Err(FrameError::Decode {
            error,
            raw: header.to_vec(),
        });
    }

    let mut raw = vec![0u8; length];
    raw[..HEADER_LEN].copy_from_slice(&header);
    reader.read_exact(&mut raw[HEADER_LEN..]).await?;
    decode(&raw).map_err(|error| FrameError::Decode { error, raw })
}

/// Write a batch of PDUs and flush once.
pub async fn write_pdus<W>(writer: &mut W, pdus: &[Pdu]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(pdus.iter().map(Pdu::encoded_len).sum());
    for pdu in pdus {
        encode_into(pdu, &mut buf);
    }
    writer.write_all(&buf).await?;
    writer.flush().await
}

pub async fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_pdus(writer, std::slice::from_ref(pdu)).await
}

fn expect_len(pdu_type: PduType, length: usize, expected: usize) -> Result<(), DecodeError> {
    if length == expected {
        Ok(())
    } else {
        Err(DecodeError::malformed(format!(
            "{pdu_type} must be {expected} bytes, got {length}"
        )))
    }
}

fn check_prefix_lengths(prefix_len: u8, max_len: u8, width: u8) -> Result<(), DecodeError> {
    if prefix_len > width || max_len > width || max_len < prefix_len {
        return Err(DecodeError::malformed(format!(
            "invalid prefix length {prefix_len} with max length {max_len}"
        )));
    }
    Ok(())
}

fn take_length_prefixed(body: &mut &[u8], what: &str) -> Result<Vec<u8>, DecodeError> {
    if body.remaining() < 4 {
        return Err(DecodeError::malformed(format!("missing {what} length")));
    }
    let len = body.get_u32() as usize;
    if body.remaining() < len {
        return Err(DecodeError::malformed(format!(
            "{what} length {len} exceeds remaining {} bytes",
            body.remaining()
        )));
    }
    let value = body[..len].to_vec();
    body.advance(len);
    Ok(value)
}

fn mask_v4(addr: Ipv4Addr, prefix_len: u8) -> u32 {
    let bits = u32::from(addr);
    match prefix_len {
        0 => 0,
        len if len >= 32 => bits,
        len => bits & (u32::MAX << (32 - u32::from(len))),
    }
}

fn mask_v6(addr: Ipv6Addr, prefix_len: u8) -> u128 {
    let bits = u128::from(addr);
    match prefix_len {
        0 => 0,
        len if len >= 128 => bits,
        len => bits & (u128::MAX << (128 - u32::from(len))),
    }
}
