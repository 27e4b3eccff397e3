//! Transport layer: UDP pseudo-header checksumming and per-port
//! dispatch.

use crate::clock::Clock;
use crate::driver::NetDriver;
use crate::icmp::IcmpCode;
use crate::ip::IpV4Header;
use crate::net::NetStack;
use crate::{Buf, IpV4Addr, NetError, Protocol};

use alloc::boxed::Box;
use alloc::vec::Vec;
use byte_struct::*;

/// UDP header: source port, destination port, total length (header +
/// payload), checksum.
#[derive(ByteStruct, Clone, Copy, Debug)]
#[byte_struct_be]
pub struct UdpHeader {
    /// Source port.
    pub src_port: u16,
    /// Destination port.
    pub dst_port: u16,
    /// Total length including this header.
    pub length: u16,
    /// Checksum over the pseudo-header + header + payload.
    pub checksum: u16,
}

impl UdpHeader {
    fn to_bytes(&self) -> [u8; UdpHeader::BYTE_LEN] {
        let mut bytes = [0_u8; UdpHeader::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

/// An application's UDP receive callback: `(payload, src_ip, src_port)`.
pub type UdpHandler = Box<dyn FnMut(&[u8], IpV4Addr, u16)>;

/// Compute the UDP checksum over `buf` (positioned at the UDP header)
/// using the 12-byte pseudo-header described in spec.md §4.5, without
/// permanently disturbing whatever precedes `buf` in its backing
/// storage — the IP header a port-unreachable reply needs is sitting
/// right there and must come back unchanged.
fn udp_checksum(buf: &mut Buf, src_ip: IpV4Addr, dst_ip: IpV4Addr) -> u16 {
    buf.add_header(12);
    let mut backup = [0_u8; 12];
    backup.copy_from_slice(&buf.as_slice()[0..12]);

    let udp_length = (buf.len() - 12) as u16;
    let pseudo = buf.as_mut_slice();
    pseudo[0..4].copy_from_slice(&src_ip.to_be_bytes());
    pseudo[4..8].copy_from_slice(&dst_ip.to_be_bytes());
    pseudo[8] = 0;
    pseudo[9] = 17;
    pseudo[10..12].copy_from_slice(&udp_length.to_be_bytes());

    let padded = buf.len() % 2 != 0;
    if padded {
        buf.add_padding(1);
    }
    let sum = crate::checksum16(buf.as_slice());
    if padded {
        buf.remove_padding(1);
    }

    buf.as_mut_slice()[0..12].copy_from_slice(&backup);
    buf.remove_header(12);
    sum
}

impl<D: NetDriver, C: Clock> NetStack<D, C> {
    /// Handle one received UDP datagram. `buf` is positioned at the UDP
    /// header, with the 20-byte IP header still intact immediately
    /// before it in the backing buffer.
    pub(crate) fn udp_in(&mut self, mut buf: Buf, src_ip: IpV4Addr) {
        if buf.len() < UdpHeader::BYTE_LEN {
            log::debug!("udp_in: datagram too short ({} bytes), dropping", buf.len());
            return;
        }
        let header = UdpHeader::read_bytes(buf.as_slice());
        if buf.len() < header.length as usize {
            log::debug!("udp_in: length field exceeds received bytes, dropping");
            return;
        }

        let original_checksum = header.checksum;
        buf.as_mut_slice()[6..8].copy_from_slice(&[0, 0]);
        let computed = udp_checksum(&mut buf, src_ip, self.config.if_ip);
        buf.as_mut_slice()[6..8].copy_from_slice(&original_checksum.to_be_bytes());
        if computed != original_checksum {
            log::debug!("udp_in: checksum mismatch, dropping");
            return;
        }

        let dst_port = header.dst_port;
        let src_port = header.src_port;
        match self.udp_ports.iter().position(|(port, _)| *port == dst_port) {
            Some(pos) => {
                buf.remove_header(UdpHeader::BYTE_LEN);
                let payload: Vec<u8> = buf.as_slice().to_vec();
                let (_, handler) = &mut self.udp_ports[pos];
                handler(&payload, src_ip, src_port);
            }
            None => {
                buf.add_header(IpV4Header::BYTE_LEN);
                let n = (IpV4Header::BYTE_LEN + 8).min(buf.len());
                let body = buf.as_slice()[0..n].to_vec();
                self.icmp_unreachable(&body, src_ip, IcmpCode::PortUnreach);
            }
        }
    }

    /// Register a receive handler for `port`. Errors if a handler is
    /// already registered there.
    pub fn udp_open(&mut self, port: u16, handler: UdpHandler) -> Result<(), NetError> {
        if self.udp_ports.iter().any(|(p, _)| *p == port) {
            return Err(NetError::PortInUse);
        }
        self.udp_ports.push((port, handler));
        Ok(())
    }

    /// Unregister the handler for `port`. Errors if none is registered.
    pub fn udp_close(&mut self, port: u16) -> Result<(), NetError> {
        match self.udp_ports.iter().position(|(p, _)| *p == port) {
            Some(pos) => {
                self.udp_ports.remove(pos);
                Ok(())
            }
            None => Err(NetError::PortNotOpen),
        }
    }

    /// Send `data` from `src_port` to `dst_ip:dst_port`, fragmenting at
    /// the IP layer if needed.
    pub fn udp_send(&mut self, data: &[u8], src_port: u16, dst_ip: IpV4Addr, dst_port: u16) {
        let mut buf = Buf::new(UdpHeader::BYTE_LEN + data.len());
        buf.as_mut_slice()[UdpHeader::BYTE_LEN..].copy_from_slice(data);
        let header = UdpHeader {
            src_port,
            dst_port,
            length: buf.len() as u16,
            checksum: 0,
        };
        buf.as_mut_slice()[0..UdpHeader::BYTE_LEN].copy_from_slice(&header.to_bytes());

        let if_ip = self.config.if_ip;
        let checksum = udp_checksum(&mut buf, if_ip, dst_ip);
        buf.as_mut_slice()[6..8].copy_from_slice(&checksum.to_be_bytes());

        self.ip_out(buf, dst_ip, Protocol::Udp);
    }
}

#[cfg(all(test, feature = "std"))]
mod test {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::NetConfig;
    use crate::driver::{LoopbackDriver, NetDriver};
    use crate::enet::EthernetHeader;
    use crate::icmp::{IcmpCode, IcmpHeader, IcmpType};
    use crate::ip::{Fragmentation, IpV4Header, VersionAndHeaderLength};
    use crate::net::NetStack;
    use crate::MacAddr;

    fn stack_with_probe() -> (NetStack<LoopbackDriver, FakeClock>, LoopbackDriver) {
        let (dut, probe) = LoopbackDriver::pair();
        let config = NetConfig::new(IpV4Addr::new([10, 0, 0, 1]), MacAddr::new([1, 0, 0, 0, 0, 1]));
        (NetStack::new(dut, FakeClock::new(), config), probe)
    }

    /// Build a complete, checksummed IPv4 datagram carrying a UDP segment,
    /// as it would arrive off the wire (minus the Ethernet header, which
    /// `ip_in` expects already stripped).
    fn build_ipv4_udp_datagram(
        src_ip: IpV4Addr,
        dst_ip: IpV4Addr,
        src_port: u16,
        dst_port: u16,
        payload: &[u8],
    ) -> Buf {
        let udp_len = UdpHeader::BYTE_LEN + payload.len();
        let mut buf = Buf::new(udp_len);
        buf.as_mut_slice()[UdpHeader::BYTE_LEN..].copy_from_slice(payload);
        let udp_header = UdpHeader {
            src_port,
            dst_port,
            length: udp_len as u16,
            checksum: 0,
        };
        buf.as_mut_slice()[0..UdpHeader::BYTE_LEN].copy_from_slice(&udp_header.to_bytes());
        let udp_checksum_value = udp_checksum(&mut buf, src_ip, dst_ip);
        buf.as_mut_slice()[6..8].copy_from_slice(&udp_checksum_value.to_be_bytes());

        buf.add_header(IpV4Header::BYTE_LEN);
        let ip_header = IpV4Header {
            version_and_length: VersionAndHeaderLength::new(4, 5),
            tos: 0,
            total_length: buf.len() as u16,
            identification: 0,
            fragmentation: Fragmentation::new(false, false, 0),
            time_to_live: 64,
            protocol: Protocol::Udp,
            checksum: 0,
            src_ipaddr: src_ip,
            dst_ipaddr: dst_ip,
        };
        let mut ip_bytes = [0_u8; IpV4Header::BYTE_LEN];
        ip_header.write_bytes(&mut ip_bytes);
        buf.as_mut_slice()[0..IpV4Header::BYTE_LEN].copy_from_slice(&ip_bytes);
        let ip_checksum = crate::checksum16(&buf.as_slice()[0..IpV4Header::BYTE_LEN]);
        buf.as_mut_slice()[10..12].copy_from_slice(&ip_checksum.to_be_bytes());
        buf
    }

    /// spec.md §8 scenario 4: a UDP datagram to a port with no open
    /// handler produces an ICMP port-unreachable carrying the original IP
    /// header plus the first 8 payload bytes (the UDP header here).
    #[test]
    fn udp_to_closed_port_emits_port_unreachable() {
        let (mut stack, mut probe) = stack_with_probe();
        let src_ip = IpV4Addr::new([10, 0, 0, 9]);
        let src_mac = MacAddr::new([9_u8; 6]);
        let dst_ip = IpV4Addr::new([10, 0, 0, 1]);
        let now = stack.now();
        stack.arp_table.set(src_ip, src_mac, now);

        let datagram = build_ipv4_udp_datagram(src_ip, dst_ip, 4000, 7000, b"hello");
        let ip_header_bytes = datagram.as_slice()[0..IpV4Header::BYTE_LEN].to_vec();
        let udp_header_bytes = datagram.as_slice()[IpV4Header::BYTE_LEN..IpV4Header::BYTE_LEN + 8].to_vec();

        stack.ip_in(datagram, src_mac);

        let mut frame = Buf::new_raw(1514);
        let n = probe.recv(&mut frame);
        assert!(n > 0, "expected an outbound port-unreachable frame");
        frame.truncate(n as usize);
        frame.remove_header(EthernetHeader::BYTE_LEN + IpV4Header::BYTE_LEN);

        let header = IcmpHeader::read_bytes(frame.as_slice());
        assert_eq!(header.icmp_type, IcmpType::DestUnreachable);
        assert_eq!(header.code, IcmpCode::PortUnreach);

        let body = &frame.as_slice()[IcmpHeader::BYTE_LEN..];
        assert_eq!(body.len(), IpV4Header::BYTE_LEN + 8);
        assert_eq!(&body[0..IpV4Header::BYTE_LEN], ip_header_bytes.as_slice());
        assert_eq!(&body[IpV4Header::BYTE_LEN..], udp_header_bytes.as_slice());
        assert_eq!(crate::checksum16(frame.as_slice()), 0);
    }
}
