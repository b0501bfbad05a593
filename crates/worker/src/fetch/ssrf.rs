//! Private and reserved address checks for foreign fetch targets.
//!
//! The std predicates cover loopback, RFC 1918, link-local, multicast and
//! unspecified addresses. The remaining special-purpose ranges are listed
//! in [`RESERVED_NETS`].

use std::net::IpAddr;
use std::sync::LazyLock;

use ipnet::IpNet;

use harbor_core::Error;

/// Special-purpose ranges without a stable std predicate.
pub static RESERVED_NETS: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    [
        "100.64.0.0/10",  // shared address space (CGNAT)
        "192.0.0.0/24",   // IETF protocol assignments
        "198.18.0.0/15",  // benchmarking
        "240.0.0.0/4",    // reserved
        "fc00::/7",       // unique local
        "fe80::/10",      // link-local
        "64:ff9b:1::/48", // local-use NAT64
    ]
    .iter()
    .filter_map(|net| net.parse().ok())
    .collect()
});

/// Whether `ip` must never be fetched on behalf of a client.
pub fn is_private_or_reserved(ip: IpAddr) -> bool {
    let special = match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.octets()[0] == 0
        }
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => return is_private_or_reserved(IpAddr::V4(v4)),
            None => v6.is_loopback() || v6.is_multicast() || v6.is_unspecified(),
        },
    };
    special || RESERVED_NETS.iter().any(|net| net.contains(&ip))
}

pub fn validate_ip(ip: IpAddr) -> Result<(), Error> {
    if is_private_or_reserved(ip) {
        Err(Error::SsrfBlocked(format!("{ip} is a private or reserved address")))
    } else {
        Ok(())
    }
}
