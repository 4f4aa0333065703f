//! Client address resolution behind reverse proxies.
//!
//! Forwarding headers are only believed when the TCP peer is a trusted
//! proxy. A client talking to the service directly cannot pick its own rate
//! limit bucket by sending `X-Forwarded-For`.

use std::net::IpAddr;

use axum::http::HeaderMap;
use ipnetwork::IpNetwork;

use crate::config::ConfigError;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Networks trusted without configuration: loopback, RFC 1918, link-local
/// and IPv6 unique-local.
const DEFAULT_TRUSTED: &[&str] = &[
    "127.0.0.0/8",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
];

/// Resolves the address a request should be attributed to.
#[derive(Debug, Clone)]
pub struct ClientAddressResolver {
    trusted: Vec<IpNetwork>,
}

impl ClientAddressResolver {
    /// Builds a resolver trusting the default private ranges plus `extra`.
    ///
    /// Entries may be CIDR blocks or bare addresses.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an entry that does not parse.
    pub fn new<S: AsRef<str>>(extra: &[S]) -> Result<Self, ConfigError> {
        let trusted = DEFAULT_TRUSTED
            .iter()
            .copied()
            .chain(extra.iter().map(AsRef::as_ref))
            .map(|entry| {
                entry.trim().parse::<IpNetwork>().map_err(|e| {
                    ConfigError::InvalidValue(format!("trusted proxy '{}': {}", entry, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { trusted })
    }

    /// Returns `true` if `addr` is a trusted proxy.
    #[must_use]
    pub fn is_trusted(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        self.trusted.iter().any(|net| net.contains(addr))
    }

    /// Resolves the client address for a request from `peer`.
    ///
    /// For a trusted peer: the right-most `X-Forwarded-For` hop that is not
    /// itself a trusted proxy, else `X-Real-IP`, else the peer. For any other
    /// peer the forwarding headers are ignored.
    #[must_use]
    pub fn resolve(&self, peer: IpAddr, headers: &HeaderMap) -> IpAddr {
        let peer = peer.to_canonical();
        if !self.is_trusted(peer) {
            return peer;
        }

        if let Some(forwarded) = self.from_forwarded_for(headers) {
            return forwarded;
        }

        headers
            .get(X_REAL_IP)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
            .map_or(peer, |addr| addr.to_canonical())
    }

    fn from_forwarded_for(&self, headers: &HeaderMap) -> Option<IpAddr> {
        let mut hops = Vec::new();
        for value in headers.get_all(X_FORWARDED_FOR) {
            let value = value.to_str().ok()?;
            for hop in value.split(',') {
                hops.push(hop.trim().parse::<IpAddr>().ok()?.to_canonical());
            }
        }

        // every hop trusted: the request originated inside the perimeter
        hops.iter()
            .rev()
            .find(|hop| !self.is_trusted(**hop))
            .or_else(|| hops.first())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn resolver() -> ClientAddressResolver {
        ClientAddressResolver::new(&["198.51.100.7"]).unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_untrusted_peer_cannot_spoof() {
        let h = headers(&[
            ("x-forwarded-for", "1.2.3.4"),
            ("x-real-ip", "5.6.7.8"),
        ]);
        assert_eq!(resolver().resolve(ip("203.0.113.50"), &h), ip("203.0.113.50"));
    }

    #[test]
    fn test_trusted_peer_right_most_untrusted_hop() {
        // client-supplied left part is ignored, the proxy chain is skipped
        let h = headers(&[("x-forwarded-for", "6.6.6.6, 203.0.113.9, 10.0.0.3")]);
        assert_eq!(resolver().resolve(ip("10.0.0.2"), &h), ip("203.0.113.9"));
    }

    #[test]
    fn test_configured_proxy_is_trusted() {
        let h = headers(&[("x-forwarded-for", "203.0.113.20")]);
        assert_eq!(resolver().resolve(ip("198.51.100.7"), &h), ip("203.0.113.20"));
        assert!(!resolver().is_trusted(ip("198.51.100.8")));
    }

    #[test]
    fn test_multiple_forwarded_headers_are_joined() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.30"),
            ("x-forwarded-for", "10.1.1.1"),
        ]);
        assert_eq!(resolver().resolve(ip("127.0.0.1"), &h), ip("203.0.113.30"));
    }

    #[test]
    fn test_real_ip_fallback() {
        let h = headers(&[("x-real-ip", "203.0.113.40")]);
        assert_eq!(resolver().resolve(ip("192.168.1.1"), &h), ip("203.0.113.40"));
    }

    #[test]
    fn test_garbage_forwarded_falls_back() {
        let h = headers(&[("x-forwarded-for", "not-an-ip")]);
        assert_eq!(resolver().resolve(ip("10.0.0.1"), &h), ip("10.0.0.1"));
    }

    #[test]
    fn test_all_trusted_chain_uses_origin() {
        let h = headers(&[("x-forwarded-for", "10.9.9.9, 10.0.0.3")]);
        assert_eq!(resolver().resolve(ip("10.0.0.2"), &h), ip("10.9.9.9"));
    }

    #[test]
    fn test_ipv6_and_mapped_addresses() {
        let h = headers(&[("x-forwarded-for", "2001:db8::5")]);
        assert_eq!(resolver().resolve(ip("::1"), &h), ip("2001:db8::5"));

        // IPv4-mapped loopback peer is treated as loopback
        let h = headers(&[("x-forwarded-for", "203.0.113.60")]);
        assert_eq!(
            resolver().resolve(ip("::ffff:127.0.0.1"), &h),
            ip("203.0.113.60")
        );
    }

    #[test]
    fn test_no_headers_returns_peer() {
        assert_eq!(
            resolver().resolve(ip("10.0.0.1"), &HeaderMap::new()),
            ip("10.0.0.1")
        );
    }

    #[test]
    fn test_invalid_configured_proxy() {
        let err = ClientAddressResolver::new(&["not/a/cidr"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }
}
