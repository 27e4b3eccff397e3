//! The stack itself: owns the driver, the clock, and every protocol
//! layer's state, and exposes the one cooperative entry point,
//! [`NetStack::poll`].

use crate::clock::Clock;
use crate::config::NetConfig;
use crate::driver::NetDriver;
use crate::enet::{EtherType, EthernetHandler};
use crate::icmp::{IcmpEchoRecord, PingSession};
use crate::ip::{IpHandler, ReassemblyQueue};
use crate::timed_map::TimedMap;
use crate::udp::UdpHandler;
use crate::{Buf, IpV4Addr, MacAddr, Protocol};

use alloc::vec::Vec;
use core::time::Duration;

/// A running instance of the protocol engine, generic over the link
/// driver and the clock so it can be exercised with a
/// [`crate::driver::LoopbackDriver`]/[`crate::clock::FakeClock`] pair in
/// tests as readily as with real hardware and a wall clock.
pub struct NetStack<D: NetDriver, C: Clock> {
    pub(crate) driver: D,
    pub(crate) clock: C,
    pub(crate) config: NetConfig,

    pub(crate) arp_table: TimedMap<IpV4Addr, MacAddr>,
    pub(crate) arp_pending: TimedMap<IpV4Addr, Buf>,
    pub(crate) reassembly: TimedMap<u16, ReassemblyQueue>,
    pub(crate) icmp_buf: TimedMap<u16, IcmpEchoRecord>,
    pub(crate) udp_ports: Vec<(u16, UdpHandler)>,
    pub(crate) ping_sessions: Vec<PingSession>,

    pub(crate) ethertype_registry: Vec<(EtherType, EthernetHandler<D, C>)>,
    pub(crate) protocol_registry: Vec<(Protocol, IpHandler<D, C>)>,

    pub(crate) next_ip_id: u16,
    pub(crate) next_icmp_id: u16,
}

impl<D: NetDriver, C: Clock> NetStack<D, C> {
    /// Build a stack and run spec.md §6's `net_init`: open the driver
    /// and broadcast the self-ARP announce. Wires both halves of the
    /// net dispatcher from spec.md §4.6: the ethertype registry
    /// (IPv4 → `ip_in`, ARP → `arp_in`), populated by Ethernet, and the
    /// IP protocol registry (ICMP → `icmp_in`, UDP → `udp_in`),
    /// populated by IPv4.
    pub fn new(mut driver: D, clock: C, config: NetConfig) -> Self {
        if !driver.open() {
            log::warn!("NetStack::new: driver reported failure to open");
        }

        let mut stack = NetStack {
            driver,
            clock,
            config,
            arp_table: TimedMap::new(config.arp_timeout),
            arp_pending: TimedMap::new(config.arp_min_interval),
            reassembly: TimedMap::new(crate::config::IP_REASSEMBLY_TIMEOUT),
            icmp_buf: TimedMap::new(crate::config::ICMP_REPLY_STASH_TIMEOUT),
            udp_ports: Vec::new(),
            ping_sessions: Vec::new(),
            ethertype_registry: Vec::new(),
            protocol_registry: Vec::new(),
            next_ip_id: 0,
            next_icmp_id: 0,
        };

        stack.ethertype_registry.push((EtherType::Ipv4, NetStack::ip_in));
        stack.ethertype_registry.push((EtherType::Arp, NetStack::arp_in));

        stack.protocol_registry.push((Protocol::Icmp, NetStack::icmp_in));
        stack.protocol_registry.push((Protocol::Udp, NetStack::udp_in));

        stack.arp_announce();
        stack
    }

    /// One cooperative poll tick: drain at most one frame from the
    /// driver and run it to completion. Does not drive ping sessions —
    /// those are advanced explicitly by the host calling
    /// [`crate::icmp::NetStack::icmp_ping_test`] (spec.md §6 lists it as
    /// a separate entry point, not something `poll` invokes itself).
    pub fn poll(&mut self) {
        self.ethernet_poll();
    }

    /// Close the underlying driver.
    pub fn close(&mut self) {
        self.driver.close();
    }

    /// Current reading of this stack's clock.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// The MAC address this stack currently has resolved for `ip`, if
    /// any. Exposed so a host can observe ARP resolution without poking
    /// at internals — e.g. to decide whether a send is likely to go out
    /// immediately or queue behind a request.
    pub fn arp_resolved(&self, ip: IpV4Addr) -> Option<MacAddr> {
        self.arp_table.get(&ip, self.clock.now())
    }
}

#[cfg(all(test, feature = "std"))]
mod test {
    use super::*;
    use crate::clock::FakeClock;
    use crate::driver::LoopbackDriver;
    use crate::{IpV4Addr, MacAddr};
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    fn host(ip: [u8; 4], mac: [u8; 6], driver: LoopbackDriver) -> NetStack<LoopbackDriver, FakeClock> {
        let config = NetConfig::new(IpV4Addr::new(ip), MacAddr::new(mac));
        NetStack::new(driver, FakeClock::new(), config)
    }

    #[test]
    fn init_broadcasts_a_self_announce_that_the_peer_learns_from() {
        let (a, b) = LoopbackDriver::pair();
        let _alice = host([10, 0, 0, 1], [2, 0, 0, 0, 0, 1], a);
        let mut bob = host([10, 0, 0, 2], [2, 0, 0, 0, 0, 2], b);

        bob.poll();

        let now = bob.clock.now();
        assert_eq!(
            bob.arp_table.get(&IpV4Addr::new([10, 0, 0, 1]), now),
            Some(MacAddr::new([2, 0, 0, 0, 0, 1]))
        );
    }

    #[test]
    fn udp_round_trip_between_two_stacks() {
        let (a, b) = LoopbackDriver::pair();
        let mut alice = host([10, 0, 0, 1], [2, 0, 0, 0, 0, 1], a);
        let mut bob = host([10, 0, 0, 2], [2, 0, 0, 0, 0, 2], b);

        let received: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        bob.udp_open(
            9000,
            alloc::boxed::Box::new(move |data, _src_ip, _src_port| {
                received_clone.borrow_mut().extend_from_slice(data);
            }),
        )
        .unwrap();

        for _ in 0..4 {
            alice.poll();
            bob.poll();
        }

        alice.udp_send(b"hello", 5000, IpV4Addr::new([10, 0, 0, 2]), 9000);

        for _ in 0..8 {
            alice.poll();
            bob.poll();
        }

        assert_eq!(received.borrow().as_slice(), b"hello");
    }

    /// spec.md §8 scenario 5: a send to an unresolved destination is
    /// parked rather than dropped, and the ARP reply that resolves the
    /// destination flushes it onward (`src/arp.rs:168-169`).
    #[test]
    fn arp_gated_send_is_held_until_the_reply_flushes_it() {
        let (a, b) = LoopbackDriver::pair();
        let mut alice = host([10, 0, 0, 1], [2, 0, 0, 0, 0, 1], a);
        let mut bob = host([10, 0, 0, 2], [2, 0, 0, 0, 0, 2], b);

        let received: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        bob.udp_open(
            9001,
            alloc::boxed::Box::new(move |data, _src_ip, _src_port| {
                received_clone.borrow_mut().extend_from_slice(data);
            }),
        )
        .unwrap();

        // Neither side has resolved the other yet, and alice sends before
        // any ARP exchange has happened: the frame must be parked, not
        // dropped.
        alice.udp_send(b"pending", 5001, IpV4Addr::new([10, 0, 0, 2]), 9001);
        assert_eq!(alice.arp_resolved(IpV4Addr::new([10, 0, 0, 2])), None);
        assert!(received.borrow().is_empty());

        for _ in 0..10 {
            alice.poll();
            bob.poll();
        }

        assert_eq!(received.borrow().as_slice(), b"pending");
        assert_eq!(
            alice.arp_resolved(IpV4Addr::new([10, 0, 0, 2])),
            Some(MacAddr::new([2, 0, 0, 0, 0, 2]))
        );
    }
}
