use std::net::SocketAddr;

use crate::consts::{MAC_BYTES, MAX_CONNECT_TOKEN_ENTRIES};

#[derive(Debug, Clone, Copy)]
struct ConnectTokenEntry {
    time: f64,
    address: Option<SocketAddr>,
    mac: [u8; MAC_BYTES],
}

impl ConnectTokenEntry {
    const EMPTY: Self = Self {
        time: 0.0,
        address: None,
        mac: [0; MAC_BYTES],
    };
}

/// Bounded table mapping connect-token MACs to the address that first used them,
/// so a token replayed from a different address can be refused.
pub(crate) struct ConnectTokenCache {
    entries: [ConnectTokenEntry; MAX_CONNECT_TOKEN_ENTRIES],
}

impl ConnectTokenCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: [ConnectTokenEntry::EMPTY; MAX_CONNECT_TOKEN_ENTRIES],
        }
    }

    /// Returns true if the (mac, address) pair may proceed. Always scans the whole
    /// table: the matching entry and the eviction victim are tracked in one pass,
    /// with no early exit on the mac compare.
    pub(crate) fn find_or_add(
        &mut self,
        address: SocketAddr,
        mac: &[u8; MAC_BYTES],
        time: f64,
    ) -> bool {
        let mut matching = None;
        let mut oldest = 0;
        let mut oldest_time = f64::INFINITY;
        for (i, entry) in self.entries.iter().enumerate() {
            if &entry.mac == mac {
                matching = Some(i);
            }
            if entry.time < oldest_time {
                oldest_time = entry.time;
                oldest = i;
            }
        }

        match matching {
            None => {
                self.entries[oldest] = ConnectTokenEntry {
                    time,
                    address: Some(address),
                    mac: *mac,
                };
                true
            }
            Some(i) => self.entries[i].address == Some(address),
        }
    }
}

#[cfg(test)]
fn mac(byte: u8) -> [u8; MAC_BYTES] {
    [byte; MAC_BYTES]
}

#[test]
fn fresh_mac_is_accepted_and_bound_to_its_address() {
    let mut cache = ConnectTokenCache::new();
    let addr = SocketAddr::from(([127, 0, 0, 1], 40000));

    assert!(cache.find_or_add(addr, &mac(1), 1.0));
    assert!(cache.find_or_add(addr, &mac(1), 2.0));
}

#[test]
fn same_mac_from_other_address_is_rejected() {
    let mut cache = ConnectTokenCache::new();
    let addr = SocketAddr::from(([127, 0, 0, 1], 40000));
    let attacker = SocketAddr::from(([127, 0, 0, 1], 50000));

    assert!(cache.find_or_add(addr, &mac(1), 1.0));
    assert!(!cache.find_or_add(attacker, &mac(1), 2.0));
    // and the original binding survives the attempt
    assert!(cache.find_or_add(addr, &mac(1), 3.0));
}

#[cfg(test)]
fn indexed_mac(i: usize) -> [u8; MAC_BYTES] {
    let mut m = [0xff; MAC_BYTES];
    m[0] = i as u8;
    m[1] = (i >> 8) as u8;
    m
}

#[test]
fn full_cache_evicts_the_oldest_entry() {
    let mut cache = ConnectTokenCache::new();
    let addr = SocketAddr::from(([127, 0, 0, 1], 40000));
    let attacker = SocketAddr::from(([127, 0, 0, 1], 50000));

    for i in 0..MAX_CONNECT_TOKEN_ENTRIES {
        assert!(cache.find_or_add(addr, &indexed_mac(i), 1.0 + i as f64));
    }

    // a fresh mac lands in the seat of the first-seen (oldest) entry
    assert!(cache.find_or_add(addr, &mac(0xee), 10_000.0));

    // the evicted mac is forgotten, so even another address may now claim it
    assert!(cache.find_or_add(attacker, &indexed_mac(0), 10_001.0));

    // a retained entry still rejects third parties
    assert!(!cache.find_or_add(attacker, &indexed_mac(100), 10_002.0));
}
