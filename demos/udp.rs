//! Send a UDP datagram large enough to need IPv4 fragmentation between
//! two loopback-connected stacks and confirm it arrives whole.

fn main() {
    use netpoll::clock::FakeClock;
    use netpoll::config::NetConfig;
    use netpoll::driver::LoopbackDriver;
    use netpoll::net::NetStack;
    use netpoll::IpV4Addr;
    use netpoll::MacAddr;

    use std::cell::RefCell;
    use std::rc::Rc;

    let (driver_a, driver_b) = LoopbackDriver::pair();

    let alice_config = NetConfig::new(IpV4Addr::new([10, 0, 0, 1]), MacAddr::new([2, 0, 0, 0, 0, 1]));
    let bob_config = NetConfig::new(IpV4Addr::new([10, 0, 0, 2]), MacAddr::new([2, 0, 0, 0, 0, 2]));

    let mut alice = NetStack::new(driver_a, FakeClock::new(), alice_config);
    let mut bob = NetStack::new(driver_b, FakeClock::new(), bob_config);

    let received: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let received_clone = received.clone();
    bob.udp_open(
        9000,
        Box::new(move |data: &[u8], _src_ip, _src_port| {
            received_clone.borrow_mut().extend_from_slice(data);
        }),
    )
    .expect("port 9000 is free");

    // Let the self-announce ARPs land before sending real traffic.
    for _ in 0..4 {
        alice.poll();
        bob.poll();
    }

    // A 2000-byte UDP datagram (8-byte header + payload) forces ip_out
    // to emit two fragments: 1480 bytes, then the remaining 520.
    let payload = vec![0x5A_u8; 2000 - 8];
    alice.udp_send(&payload, 5000, IpV4Addr::new([10, 0, 0, 2]), 9000);

    for _ in 0..8 {
        alice.poll();
        bob.poll();
    }

    assert_eq!(received.borrow().len(), payload.len());
    assert!(received.borrow().iter().all(|&b| b == 0x5A));
    println!("bob received {} fragmented bytes intact", received.borrow().len());
}
