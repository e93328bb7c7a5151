//! Client key derivation from connection metadata.
//!
//! The key is the first usable value of:
//!
//! 1. the internal trusted proxy header (ignored when shorter than 3 bytes or
//!    inside `10.0.0.0/8`, which marks a hop inside our own network)
//! 2. the CDN client-IP header
//! 3. the first entry of `X-Forwarded-For`
//! 4. the transport peer address
//! 5. a configured fallback address
//!
//! IPv6 addresses are grouped to their /48 prefix, so a whole allocation block
//! counts as one actor, and flagged so the connection joins the group that does
//! not receive full snapshots. IPv4-mapped IPv6 addresses count as IPv4.

use std::net::IpAddr;
use std::net::Ipv6Addr;
use std::net::SocketAddr;

use http::HeaderMap;
use http::HeaderName;
use snafu::ResultExt;
use snafu::Snafu;

/// CDN-supplied client address header.
pub const CDN_CLIENT_IP_HEADER: &str = "cf-connecting-ip";

/// Standard proxy chain header.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Default internal trusted proxy header.
pub const DEFAULT_TRUSTED_PROXY_HEADER: &str = "nolen-ip";

/// Default key when nothing else resolves.
pub const DEFAULT_FALLBACK_CLIENT_ADDR: &str = "10.0.0.1";

/// Prefix bits kept when grouping IPv6 addresses.
pub const IPV6_GROUP_PREFIX_BITS: u32 = 48;

/// Errors building a classifier.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClassifierError {
    /// The trusted proxy header name is not a valid HTTP header name.
    #[snafu(display("invalid trusted proxy header '{name}': {source}"))]
    InvalidHeaderName {
        /// Offending name.
        name: String,
        /// Parse error.
        source: http::header::InvalidHeaderName,
    },
}

/// Who a connection belongs to, for admission and broadcast grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    /// Normalized client key.
    pub key: String,
    /// True when the key is a grouped IPv6 prefix.
    pub is_ipv6: bool,
}

/// Derives [`ClientIdentity`] values from request headers and peer addresses.
#[derive(Debug, Clone)]
pub struct ConnectionClassifier {
    trusted_header: HeaderName,
    fallback: String,
}

impl ConnectionClassifier {
    /// Classifier trusting `trusted_header` and falling back to `fallback`.
    pub fn new(trusted_header: &str, fallback: impl Into<String>) -> Result<Self, ClassifierError> {
        let trusted_header = HeaderName::from_bytes(trusted_header.to_ascii_lowercase().as_bytes())
            .context(InvalidHeaderNameSnafu { name: trusted_header })?;
        Ok(Self {
            trusted_header,
            fallback: fallback.into(),
        })
    }

    /// Resolve and normalize the client key.
    pub fn classify(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientIdentity {
        group_address(&self.resolve(headers, peer))
    }

    fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let trusted = header_str(headers, self.trusted_header.as_str())
            .filter(|value| value.len() >= 3 && !value.starts_with("10."));
        if let Some(value) = trusted {
            return value.to_string();
        }
        if let Some(value) = header_str(headers, CDN_CLIENT_IP_HEADER) {
            return value.to_string();
        }
        if let Some(first) = header_str(headers, FORWARDED_FOR_HEADER)
            .and_then(|chain| chain.split(',').map(str::trim).find(|hop| !hop.is_empty()))
        {
            return first.to_string();
        }
        match peer {
            Some(addr) => addr.ip().to_string(),
            None => self.fallback.clone(),
        }
    }
}

impl Default for ConnectionClassifier {
    fn default() -> Self {
        Self {
            trusted_header: HeaderName::from_static(DEFAULT_TRUSTED_PROXY_HEADER),
            fallback: DEFAULT_FALLBACK_CLIENT_ADDR.to_string(),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
}

/// Normalize a raw address string into a client identity.
///
/// Native IPv6 addresses keep only their leading 48 bits. Anything else
/// (IPv4, IPv4-mapped IPv6, unparseable strings) is used verbatim.
pub fn group_address(raw: &str) -> ClientIdentity {
    match raw.parse::<IpAddr>() {
        Ok(IpAddr::V6(addr)) if addr.to_ipv4_mapped().is_none() => ClientIdentity {
            key: ipv6_prefix(addr).to_string(),
            is_ipv6: true,
        },
        _ => ClientIdentity {
            key: raw.to_string(),
            is_ipv6: false,
        },
    }
}

fn ipv6_prefix(addr: Ipv6Addr) -> Ipv6Addr {
    let mask = u128::MAX << (128 - IPV6_GROUP_PREFIX_BITS);
    Ipv6Addr::from(u128::from(addr) & mask)
}
