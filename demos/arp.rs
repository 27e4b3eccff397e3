//! Bring up two loopback-connected stacks and watch the self-announce
//! ARP request resolve into a table entry, with no explicit send
//! required to trigger it.

fn main() {
    use netpoll::clock::FakeClock;
    use netpoll::config::NetConfig;
    use netpoll::driver::LoopbackDriver;
    use netpoll::net::NetStack;
    use netpoll::{IpV4Addr, MacAddr};

    let (driver_a, driver_b) = LoopbackDriver::pair();

    let alice_config = NetConfig::new(IpV4Addr::new([10, 0, 0, 1]), MacAddr::new([2, 0, 0, 0, 0, 1]));
    let bob_config = NetConfig::new(IpV4Addr::new([10, 0, 0, 2]), MacAddr::new([2, 0, 0, 0, 0, 2]));

    // NetStack::new already issues the self-announce broadcast.
    let _alice = NetStack::new(driver_a, FakeClock::new(), alice_config);
    let mut bob = NetStack::new(driver_b, FakeClock::new(), bob_config);

    // One poll is enough for bob to receive alice's announce and learn
    // her MAC address.
    bob.poll();

    let learned = bob.arp_resolved(IpV4Addr::new([10, 0, 0, 1]));
    assert_eq!(learned, Some(MacAddr::new([2, 0, 0, 0, 0, 1])));
    println!("bob resolved alice at {:?}", learned.unwrap());
}
