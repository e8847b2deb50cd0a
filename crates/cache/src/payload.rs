use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use rtr::SKI_LEN;
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

/// Autonomous system number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Asn(pub u32);

impl fmt::Display for Asn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AS{}", self.0)
    }
}

impl FromStr for Asn {
    type Err = PayloadError;

    /// Accepts `AS64496`, `as64496` and `64496`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("AS")
            .or_else(|| trimmed.strip_prefix("as"))
            .unwrap_or(trimmed);
        digits
            .parse::<u32>()
            .map(Asn)
            .map_err(|_| PayloadError::InvalidAsn(s.to_string()))
    }
}

/// IP prefix with host bits cleared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Prefix {
    addr: IpAddr,
    len: u8,
}

impl Prefix {
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, PayloadError> {
        let width = address_width(&addr);
        if len > width {
            return Err(PayloadError::InvalidPrefixLength { len, width });
        }
        let addr = match addr {
            IpAddr::V4(v4) => {
                let mask = if len == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(len))
                };
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
            }
            IpAddr::V6(v6) => {
                let mask = if len == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(len))
                };
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
            }
        };
        Ok(Self { addr, len })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn length(&self) -> u8 {
        self.len
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// 32 for IPv4, 128 for IPv6.
    pub fn width(&self) -> u8 {
        address_width(&self.addr)
    }

    /// Whether `other` lies within this prefix (a prefix covers itself).
    pub fn covers(&self, other: &Prefix) -> bool {
        if self.is_ipv4() != other.is_ipv4() || other.len < self.len {
            return false;
        }
        Prefix::new(other.addr, self.len)
            .map(|truncated| truncated.addr == self.addr)
            .unwrap_or(false)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

impl FromStr for Prefix {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| PayloadError::InvalidPrefix(s.to_string()))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| PayloadError::InvalidPrefix(s.to_string()))?;
        let len: u8 = len
            .parse()
            .map_err(|_| PayloadError::InvalidPrefix(s.to_string()))?;
        Prefix::new(addr, len)
    }
}

fn address_width(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// A validated ROA entry: `asn` may originate `prefix` and its more
/// specifics up to `max_len`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteOrigin {
    pub prefix: Prefix,
    pub max_len: u8,
    pub asn: Asn,
}

impl RouteOrigin {
    pub fn new(asn: Asn, prefix: Prefix, max_len: u8) -> Result<Self, PayloadError> {
        if max_len < prefix.length() || max_len > prefix.width() {
            return Err(PayloadError::InvalidMaxLength {
                prefix: prefix.to_string(),
                max_len,
            });
        }
        Ok(Self {
            prefix,
            max_len,
            asn,
        })
    }
}

impl fmt::Display for RouteOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{}", self.asn, self.prefix, self.max_len)
    }
}

/// One router key: a BGPsec router certificate bound to a single ASN.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouterKey {
    pub ski: [u8; SKI_LEN],
    pub asn: Asn,
    pub spki: Vec<u8>,
}

impl fmt::Display for RouterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ski {}", self.asn, hex::encode(self.ski))
    }
}

/// Validated router certificate as produced by the validation pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RouterCertificate {
    pub asns: Vec<Asn>,
    pub ski: [u8; SKI_LEN],
    pub spki: Vec<u8>,
}

impl RouterCertificate {
    /// One router key per ASN listed in the certificate.
    pub fn router_keys(&self) -> impl Iterator<Item = RouterKey> + '_ {
        self.asns.iter().map(move |asn| RouterKey {
            ski: self.ski,
            asn: *asn,
            spki: self.spki.clone(),
        })
    }
}

/// Announcement as seen by routers. Identity excludes the trust anchor, so
/// equal entries contributed by different trust anchors collapse into one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Payload {
    RouteOrigin(RouteOrigin),
    RouterKey(RouterKey),
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::RouteOrigin(origin) => fmt::Display::fmt(origin, f),
            Payload::RouterKey(key) => fmt::Display::fmt(key, f),
        }
    }
}

impl From<RouteOrigin> for Payload {
    fn from(origin: RouteOrigin) -> Self {
        Payload::RouteOrigin(origin)
    }
}

impl From<RouterKey> for Payload {
    fn from(key: RouterKey) -> Self {
        Payload::RouterKey(key)
    }
}

/// Name of the trust anchor an announcement was validated under.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrustAnchorId(String);

impl TrustAnchorId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrustAnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrustAnchorId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_asn_notations() {
        assert_eq!("AS64496".parse::<Asn>().expect("asn"), Asn(64496));
        assert_eq!("as64496".parse::<Asn>().expect("asn"), Asn(64496));
        assert_eq!("64496".parse::<Asn>().expect("asn"), Asn(64496));
        assert!("ASX".parse::<Asn>().is_err());
        assert_eq!(Asn(64496).to_string(), "AS64496");
    }

    #[test]
    fn prefix_clears_host_bits() {
        let prefix: Prefix = "192.0.2.77/24".parse().expect("prefix");
        assert_eq!(prefix.to_string(), "192.0.2.0/24");
        let v6: Prefix = "2001:db8::1/32".parse().expect("prefix");
        assert_eq!(v6.to_string(), "2001:db8::/32");
    }

    #[test]
    fn prefix_rejects_oversized_length() {
        assert!("192.0.2.0/33".parse::<Prefix>().is_err());
        assert!("192.0.2.0".parse::<Prefix>().is_err());
    }

    #[test]
    fn covers_more_specifics_only() {
        let wide: Prefix = "10.0.0.0/8".parse().expect("prefix");
        let narrow: Prefix = "10.1.0.0/16".parse().expect("prefix");
        let other: Prefix = "11.0.0.0/16".parse().expect("prefix");
        assert!(wide.covers(&narrow));
        assert!(wide.covers(&wide));
        assert!(!narrow.covers(&wide));
        assert!(!wide.covers(&other));
    }

    #[test]
    fn route_origin_validates_max_length() {
        let prefix: Prefix = "192.0.2.0/24".parse().expect("prefix");
        assert!(RouteOrigin::new(Asn(1), prefix, 23).is_err());
        assert!(RouteOrigin::new(Asn(1), prefix, 33).is_err());
        assert!(RouteOrigin::new(Asn(1), prefix, 28).is_ok());
    }

    #[test]
    fn router_certificate_expands_per_asn() {
        let cert = RouterCertificate {
            asns: vec![Asn(1), Asn(2)],
            ski: [7; SKI_LEN],
            spki: vec![9, 9],
        };
        let keys: Vec<RouterKey> = cert.router_keys().collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].asn, Asn(1));
        assert_eq!(keys[1].asn, Asn(2));
        assert!(keys.iter().all(|key| key.ski == [7; SKI_LEN]));
    }
}
