//! Host configuration: the constants spec.md §6 says the host supplies
//! to `net_init`, collected into one struct passed to
//! [`crate::net::NetStack::new`].

use crate::{IpV4Addr, MacAddr};
use core::time::Duration;

/// Minimum Ethernet payload; frames shorter than this are padded on
/// transmit.
pub const ETHERNET_MIN_TRANSPORT_UNIT: usize = 46;

/// Maximum Ethernet payload (the MTU fragmentation sizes against).
pub const ETHERNET_MAX_TRANSPORT_UNIT: usize = 1500;

/// Default IPv4 time-to-live stamped on every outbound datagram.
pub const IP_DEFAULT_TTL: u8 = 64;

/// How long a reassembly queue entry survives with no new fragment
/// before it is reaped, per SPEC_FULL.md §9's resolution of spec.md's
/// open question.
pub const IP_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a stashed ICMP echo-reply survives in `icmp_buf` before the
/// ping driver gives up on ever reading it.
pub const ICMP_REPLY_STASH_TIMEOUT: Duration = Duration::from_secs(4);

/// Minimum interval between successive pings in one ping session.
pub const ICMP_PING_INTERVAL: Duration = Duration::from_secs(1);

/// How long the ping driver waits for a reply before declaring a
/// timeout and moving on to the next request.
pub const ICMP_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Host-supplied addressing and timing configuration for one
/// [`crate::net::NetStack`] instance.
#[derive(Clone, Copy, Debug)]
pub struct NetConfig {
    /// This interface's IPv4 address.
    pub if_ip: IpV4Addr,
    /// This interface's MAC address.
    pub if_mac: MacAddr,
    /// ARP resolver table entry lifetime.
    pub arp_timeout: Duration,
    /// ARP pending-send entry lifetime; also the minimum spacing between
    /// successive ARP requests for the same destination.
    pub arp_min_interval: Duration,
}

impl NetConfig {
    /// Build a config with the suggested ARP timeouts from spec.md §3
    /// (60s table entries, 1s pending-send/retry spacing).
    pub fn new(if_ip: IpV4Addr, if_mac: MacAddr) -> Self {
        NetConfig {
            if_ip,
            if_mac,
            arp_timeout: Duration::from_secs(60),
            arp_min_interval: Duration::from_secs(1),
        }
    }
}
