//! Canonical IP address forms for range bans
//!
//! Range bans are stored in a lexicographically ordered keyring, so every
//! address is reduced to a fixed-width, zero-padded string whose byte order
//! equals numeric order. IPv4 addresses are widened to their IPv6-mapped form
//! so both families share one keyspace.

use std::net::IpAddr;

use crate::{NewsError, Result};

/// Zero-padded canonical string form of an address
///
/// Always the full 8-group IPv6 hex expansion, e.g.
/// `0000:0000:0000:0000:0000:ffff:c0a8:0101` for `192.168.1.1`.
#[must_use]
pub fn canonical_ip_string(addr: IpAddr) -> String {
    let v6 = match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    };
    let seg = v6.segments();
    format!(
        "{:04x}:{:04x}:{:04x}:{:04x}:{:04x}:{:04x}:{:04x}:{:04x}",
        seg[0], seg[1], seg[2], seg[3], seg[4], seg[5], seg[6], seg[7]
    )
}

/// Does this address spec denote a subnet rather than a single host?
#[must_use]
pub fn is_subnet(spec: &str) -> bool {
    spec.contains('/')
}

/// Canonical `(min, max)` endpoints for an address or CIDR spec
///
/// For a single address both endpoints are the address itself. For a subnet
/// the endpoints are the first and last address covered by the prefix.
pub fn range_endpoints(spec: &str) -> Result<(String, String)> {
    match spec.split_once('/') {
        None => {
            let addr: IpAddr = spec
                .parse()
                .map_err(|_| NewsError::Parse(format!("invalid address: {}", spec)))?;
            let s = canonical_ip_string(addr);
            Ok((s.clone(), s))
        }
        Some((addr_part, prefix_part)) => {
            let addr: IpAddr = addr_part
                .parse()
                .map_err(|_| NewsError::Parse(format!("invalid address: {}", addr_part)))?;
            let prefix: u32 = prefix_part
                .parse()
                .map_err(|_| NewsError::Parse(format!("invalid prefix: {}", prefix_part)))?;
            // widen a v4 prefix into the mapped-v6 space
            let (bits, prefix) = match addr {
                IpAddr::V4(v4) => {
                    if prefix > 32 {
                        return Err(NewsError::Parse(format!("prefix too long: /{}", prefix)));
                    }
                    (u128::from(v4.to_ipv6_mapped()), prefix + 96)
                }
                IpAddr::V6(v6) => {
                    if prefix > 128 {
                        return Err(NewsError::Parse(format!("prefix too long: /{}", prefix)));
                    }
                    (u128::from(v6), prefix)
                }
            };
            let mask: u128 = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
            let min = bits & mask;
            let max = min | !mask;
            Ok((
                canonical_ip_string(IpAddr::V6(min.into())),
                canonical_ip_string(IpAddr::V6(max.into())),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_v4() {
        let addr: IpAddr = "192.168.1.1".parse().unwrap();
        assert_eq!(
            canonical_ip_string(addr),
            "0000:0000:0000:0000:0000:ffff:c0a8:0101"
        );
    }

    #[test]
    fn test_canonical_v6() {
        let addr: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(
            canonical_ip_string(addr),
            "2001:0db8:0000:0000:0000:0000:0000:0001"
        );
    }

    #[test]
    fn test_canonical_order_matches_numeric_order() {
        let low: IpAddr = "10.0.0.1".parse().unwrap();
        let high: IpAddr = "10.0.1.0".parse().unwrap();
        assert!(canonical_ip_string(low) < canonical_ip_string(high));
    }

    #[test]
    fn test_single_address_endpoints() {
        let (min, max) = range_endpoints("192.168.1.1").unwrap();
        assert_eq!(min, max);
    }

    #[test]
    fn test_subnet_endpoints() {
        let (min, max) = range_endpoints("10.1.0.0/16").unwrap();
        assert_eq!(min, "0000:0000:0000:0000:0000:ffff:0a01:0000");
        assert_eq!(max, "0000:0000:0000:0000:0000:ffff:0a01:ffff");
    }

    #[test]
    fn test_v6_subnet_endpoints() {
        let (min, max) = range_endpoints("2001:db8::/32").unwrap();
        assert_eq!(min, "2001:0db8:0000:0000:0000:0000:0000:0000");
        assert_eq!(max, "2001:0db8:ffff:ffff:ffff:ffff:ffff:ffff");
    }

    #[test]
    fn test_contained_address_sorts_within_endpoints() {
        let (min, max) = range_endpoints("10.1.0.0/16").unwrap();
        let inside = canonical_ip_string("10.1.2.3".parse().unwrap());
        assert!(min <= inside && inside <= max);
        let outside = canonical_ip_string("10.2.0.0".parse().unwrap());
        assert!(outside > max);
    }

    #[test]
    fn test_invalid_specs() {
        assert!(range_endpoints("not-an-ip").is_err());
        assert!(range_endpoints("10.0.0.0/33").is_err());
        assert!(range_endpoints("2001:db8::/129").is_err());
        assert!(range_endpoints("10.0.0.0/x").is_err());
    }

    #[test]
    fn test_is_subnet() {
        assert!(is_subnet("10.0.0.0/8"));
        assert!(!is_subnet("10.0.0.1"));
    }
}
