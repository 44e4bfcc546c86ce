// ABOUTME: IP allowlist matching with real CIDR containment
// ABOUTME: Masks both candidate and network address by prefix length before comparing

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::warn;

/// Check a presented IP against an allowlist of exact IPs and CIDR ranges.
///
/// An empty list means unrestricted. Unparseable entries and unparseable
/// presented addresses never match (fail closed).
pub fn ip_allowed(ip: &str, restrictions: &[String]) -> bool {
    if restrictions.is_empty() {
        return true;
    }

    let Ok(addr) = ip.parse::<IpAddr>() else {
        warn!("Rejecting unparseable presented IP: {}", ip);
        return false;
    };

    restrictions.iter().any(|entry| entry_matches(entry, &addr))
}

fn entry_matches(entry: &str, addr: &IpAddr) -> bool {
    if let Ok(exact) = entry.parse::<IpAddr>() {
        return exact == *addr;
    }
    if let Some((network, prefix)) = entry.split_once('/') {
        return cidr_contains(network, prefix, addr);
    }
    warn!("Ignoring unparseable IP restriction entry: {}", entry);
    false
}

fn cidr_contains(network: &str, prefix: &str, addr: &IpAddr) -> bool {
    let Ok(prefix_len) = prefix.parse::<u8>() else {
        return false;
    };

    match (network.parse::<IpAddr>(), addr) {
        (Ok(IpAddr::V4(net)), IpAddr::V4(ip)) => v4_contains(net, prefix_len, *ip),
        (Ok(IpAddr::V6(net)), IpAddr::V6(ip)) => v6_contains(net, prefix_len, *ip),
        _ => false,
    }
}

fn v4_contains(network: Ipv4Addr, prefix_len: u8, ip: Ipv4Addr) -> bool {
    if prefix_len > 32 {
        return false;
    }
    let mask = match prefix_len {
        0 => 0,
        n => u32::MAX << (32 - u32::from(n)),
    };
    (u32::from(network) & mask) == (u32::from(ip) & mask)
}

fn v6_contains(network: Ipv6Addr, prefix_len: u8, ip: Ipv6Addr) -> bool {
    if prefix_len > 128 {
        return false;
    }
    let mask = match prefix_len {
        0 => 0,
        n => u128::MAX << (128 - u32::from(n)),
    };
    (u128::from(network) & mask) == (u128::from(ip) & mask)
}
