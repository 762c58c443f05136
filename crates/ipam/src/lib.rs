//! IP Allocator: deterministic assignment of overlay addresses from pools
//! and sub-ranges within them.
//!
//! This crate is pure and synchronous — it knows nothing about a database.
//! The `store` crate is responsible for taking the per-pool exclusive lease
//! (a `SELECT ... FOR UPDATE` on the pool row) before calling [`allocate`]
//! and for persisting the result inside the same transaction, so two
//! concurrent allocations on the same pool can never observe each other's
//! uncommitted state.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("requested address {0} is not available")]
    AddressUnavailable(IpAddr),
    #[error("pool has no remaining addresses")]
    PoolExhausted,
    #[error("ip-group range {0}-{1} is not contained in pool {2}")]
    IpGroupOutsidePool(IpAddr, IpAddr, IpNet),
}

/// Picks an address for a client.
///
/// `assigned` is the set of addresses already allocated in `pool` (across
/// all ip-groups, since addresses are unique per-pool, not per-ip-group).
/// When `requested_ip` is `Some`, it must land in the candidate set or the
/// call fails with [`Error::AddressUnavailable`] — no fallback is chosen on
/// the caller's behalf. When `None`, the numerically smallest candidate is
/// returned, which keeps allocations deterministic and debuggable (the same
/// sequence of allocate calls against the same starting state always
/// produces the same addresses).
pub fn allocate(
    pool: IpNet,
    ip_group_range: Option<(IpAddr, IpAddr)>,
    assigned: &HashSet<IpAddr>,
    requested_ip: Option<IpAddr>,
) -> Result<IpAddr, Error> {
    if let Some((start, end)) = ip_group_range {
        if !pool.contains(&start) || !pool.contains(&end) {
            return Err(Error::IpGroupOutsidePool(start, end, pool));
        }
    }

    if let Some(requested) = requested_ip {
        return if is_candidate(pool, ip_group_range, assigned, requested) {
            Ok(requested)
        } else {
            Err(Error::AddressUnavailable(requested))
        };
    }

    candidates(pool, ip_group_range)
        .find(|addr| !assigned.contains(addr))
        .ok_or(Error::PoolExhausted)
}

fn is_candidate(
    pool: IpNet,
    ip_group_range: Option<(IpAddr, IpAddr)>,
    assigned: &HashSet<IpAddr>,
    addr: IpAddr,
) -> bool {
    if assigned.contains(&addr) || !usable_host(pool, addr) {
        return false;
    }
    match ip_group_range {
        Some((start, end)) => in_range(start, end, addr),
        None => true,
    }
}

/// The pool's usable host addresses (network and, for IPv4, broadcast
/// excluded), intersected with `ip_group_range` when given, in ascending
/// numeric order.
fn candidates(pool: IpNet, ip_group_range: Option<(IpAddr, IpAddr)>) -> impl Iterator<Item = IpAddr> {
    let all: Vec<IpAddr> = match pool {
        IpNet::V4(net) => net.hosts().map(IpAddr::V4).collect(),
        IpNet::V6(net) => {
            // ipnet's Ipv6Net has no broadcast concept; only the network
            // (subnet-router anycast) address is excluded.
            let network = IpAddr::V6(net.network());
            net.hosts()
                .map(IpAddr::V6)
                .filter(move |addr| *addr != network)
                .collect()
        }
    };

    all.into_iter().filter(move |addr| match ip_group_range {
        Some((start, end)) => in_range(start, end, *addr),
        None => true,
    })
}

fn usable_host(pool: IpNet, addr: IpAddr) -> bool {
    match (pool, addr) {
        (IpNet::V4(net), IpAddr::V4(a)) => {
            net.contains(&a) && a != net.network() && a != net.broadcast()
        }
        (IpNet::V6(net), IpAddr::V6(a)) => net.contains(&a) && a != net.network(),
        _ => false,
    }
}

fn in_range(start: IpAddr, end: IpAddr, addr: IpAddr) -> bool {
    match (start, end, addr) {
        (IpAddr::V4(s), IpAddr::V4(e), IpAddr::V4(a)) => {
            u32::from(a) >= u32::from(s) && u32::from(a) <= u32::from(e)
        }
        (IpAddr::V6(s), IpAddr::V6(e), IpAddr::V6(a)) => {
            u128::from(a) >= u128::from(s) && u128::from(a) <= u128::from(e)
        }
        _ => false,
    }
}

/// Helper re-exported for callers that need to format an assigned address
/// with the pool's prefix length for embedding in a certificate SAN or
/// config (e.g. `10.100.0.1/16`).
pub fn with_prefix(pool: IpNet, addr: IpAddr) -> String {
    format!("{addr}/{}", pool.prefix_len())
}

#[allow(dead_code)]
fn unspecified_v4() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}
#[allow(dead_code)]
fn unspecified_v6() -> Ipv6Addr {
    Ipv6Addr::UNSPECIFIED
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> IpNet {
        "10.100.0.0/24".parse().unwrap()
    }

    #[test]
    fn allocates_smallest_unassigned_address() {
        let assigned = HashSet::new();
        let addr = allocate(pool(), None, &assigned, None).unwrap();
        assert_eq!(addr, "10.100.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn skips_already_assigned_addresses() {
        let mut assigned = HashSet::new();
        assigned.insert("10.100.0.1".parse().unwrap());
        assigned.insert("10.100.0.2".parse().unwrap());
        let addr = allocate(pool(), None, &assigned, None).unwrap();
        assert_eq!(addr, "10.100.0.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn excludes_network_and_broadcast() {
        let assigned = HashSet::new();
        for _ in 0..253 {
            // drain nothing; just confirm neither endpoint is ever offered
        }
        let all: Vec<IpAddr> = candidates(pool(), None).collect();
        assert!(!all.contains(&"10.100.0.0".parse::<IpAddr>().unwrap()));
        assert!(!all.contains(&"10.100.0.255".parse::<IpAddr>().unwrap()));
        let _ = assigned;
    }

    #[test]
    fn honors_requested_ip_when_available() {
        let assigned = HashSet::new();
        let requested = "10.100.0.42".parse().unwrap();
        let addr = allocate(pool(), None, &assigned, Some(requested)).unwrap();
        assert_eq!(addr, requested);
    }

    #[test]
    fn rejects_requested_ip_already_assigned() {
        let mut assigned = HashSet::new();
        let requested: IpAddr = "10.100.0.42".parse().unwrap();
        assigned.insert(requested);
        let err = allocate(pool(), None, &assigned, Some(requested)).unwrap_err();
        assert_eq!(err, Error::AddressUnavailable(requested));
    }

    #[test]
    fn rejects_requested_ip_outside_pool() {
        let assigned = HashSet::new();
        let requested: IpAddr = "10.200.0.1".parse().unwrap();
        let err = allocate(pool(), None, &assigned, Some(requested)).unwrap_err();
        assert_eq!(err, Error::AddressUnavailable(requested));
    }

    #[test]
    fn restricts_to_ip_group_sub_range() {
        let assigned = HashSet::new();
        let range = (
            "10.100.0.100".parse().unwrap(),
            "10.100.0.110".parse().unwrap(),
        );
        let addr = allocate(pool(), Some(range), &assigned, None).unwrap();
        assert_eq!(addr, "10.100.0.100".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn ip_group_outside_pool_is_rejected_up_front() {
        let assigned = HashSet::new();
        let bad_range = (
            "192.168.0.1".parse().unwrap(),
            "192.168.0.10".parse().unwrap(),
        );
        let err = allocate(pool(), Some(bad_range), &assigned, None).unwrap_err();
        assert!(matches!(err, Error::IpGroupOutsidePool(_, _, _)));
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let net: IpNet = "10.100.0.0/30".parse().unwrap();
        let mut assigned = HashSet::new();
        assigned.insert("10.100.0.1".parse().unwrap());
        assigned.insert("10.100.0.2".parse().unwrap());
        let err = allocate(net, None, &assigned, None).unwrap_err();
        assert_eq!(err, Error::PoolExhausted);
    }
}
