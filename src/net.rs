//! Private-network classification used to keep probes off internal hosts.

use std::net::{Ipv4Addr, Ipv6Addr};

const PRIVATE_SUFFIXES: [&str; 3] = [".local", ".lan", ".intranet"];

/// RFC 1918, loopback and link-local.
pub fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    addr.is_private() || addr.is_loopback() || addr.is_link_local()
}

/// `0/8`, `255/8` and shared address space `100.64/10`.
pub fn is_special_ipv4(addr: Ipv4Addr) -> bool {
    let [a, b, ..] = addr.octets();
    a == 0 || a == 255 || (a == 100 && (64..128).contains(&b))
}

/// Unique local `fc00::/7`, link-local `fe80::/10` and loopback.
pub fn is_private_ipv6(addr: Ipv6Addr) -> bool {
    let first = addr.segments()[0];
    addr.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

/// Names under suffixes that never resolve publicly.
pub fn is_private_name(domain: &str) -> bool {
    let name = domain.trim_end_matches('.').to_ascii_lowercase();
    PRIVATE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Whether an `A` or `AAAA` answer points into a private range.
///
/// Data that does not parse as an address is treated as public.
pub fn is_private_answer(record_type: &str, data: &str) -> bool {
    if record_type.eq_ignore_ascii_case("A") {
        data.trim()
            .parse::<Ipv4Addr>()
            .is_ok_and(|addr| is_private_ipv4(addr) || is_special_ipv4(addr))
    } else if record_type.eq_ignore_ascii_case("AAAA") {
        data.trim().parse::<Ipv6Addr>().is_ok_and(is_private_ipv6)
    } else {
        false
    }
}
