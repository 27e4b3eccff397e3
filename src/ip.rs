//! Internet layer: header (de)serialization, input validation,
//! fragmentation on transmit, and reassembly on receive.

use crate::clock::Clock;
use crate::config::{ETHERNET_MAX_TRANSPORT_UNIT, IP_DEFAULT_TTL, IP_REASSEMBLY_TIMEOUT};
use crate::driver::NetDriver;
use crate::icmp::IcmpCode;
use crate::net::NetStack;
use crate::{verify_checksum16, Buf, IpV4Addr, Protocol};

use alloc::vec;
use alloc::vec::Vec;
use byte_struct::*;

/// Version (high nibble) and header length in 32-bit words (low nibble).
/// This implementation only ever emits and accepts `header_length == 5`
/// (a bare 20-byte header, no options): datagrams carrying IP options are
/// rejected outright in `ip_in` rather than parsed or skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionAndHeaderLength(u8);

impl VersionAndHeaderLength {
    /// Pack a version and a header length in 32-bit words.
    pub fn new(version: u8, header_length_words: u8) -> Self {
        VersionAndHeaderLength((version << 4) | (header_length_words & 0x0F))
    }

    /// IP version (should be 4).
    pub fn version(&self) -> u8 {
        self.0 >> 4
    }

    /// Header length in 32-bit words.
    pub fn header_length_words(&self) -> u8 {
        self.0 & 0x0F
    }
}

impl ByteStructLen for VersionAndHeaderLength {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for VersionAndHeaderLength {
    fn read_bytes(bytes: &[u8]) -> Self {
        VersionAndHeaderLength(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = self.0;
    }
}

/// IPv4 flags + fragment offset, packed per RFC 791 as 3 flag bits
/// (reserved, don't-fragment, more-fragments) followed by a 13-bit
/// offset in 8-byte units — 16 bits total.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fragmentation(u16);

impl Fragmentation {
    const DF_BIT: u16 = 1 << 14;
    const MF_BIT: u16 = 1 << 13;
    const OFFSET_MASK: u16 = 0x1FFF;

    /// Pack the don't-fragment flag, more-fragments flag, and offset (in
    /// 8-byte units) into one 16-bit field.
    pub fn new(do_not_fragment: bool, more_fragments: bool, offset: u16) -> Self {
        let mut raw = offset & Self::OFFSET_MASK;
        if do_not_fragment {
            raw |= Self::DF_BIT;
        }
        if more_fragments {
            raw |= Self::MF_BIT;
        }
        Fragmentation(raw)
    }

    /// Don't-fragment flag.
    pub fn do_not_fragment(&self) -> bool {
        self.0 & Self::DF_BIT != 0
    }

    /// More-fragments flag.
    pub fn more_fragments(&self) -> bool {
        self.0 & Self::MF_BIT != 0
    }

    /// Fragment offset in 8-byte units.
    pub fn offset(&self) -> u16 {
        self.0 & Self::OFFSET_MASK
    }
}

impl ByteStructLen for Fragmentation {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for Fragmentation {
    fn read_bytes(bytes: &[u8]) -> Self {
        Fragmentation(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.0.to_be_bytes());
    }
}

/// IPv4 header, 20 bytes, no options. See
/// <https://en.wikipedia.org/wiki/IPv4> and RFC 791.
#[derive(ByteStruct, Clone, Copy, Debug)]
#[byte_struct_be]
pub struct IpV4Header {
    /// Version (4) and header length in words (5).
    pub version_and_length: VersionAndHeaderLength,
    /// Type-of-service byte. Never interpreted by this stack.
    pub tos: u8,
    /// Total datagram length (header + payload), in bytes.
    pub total_length: u16,
    /// Datagram identification, used to correlate fragments.
    pub identification: u16,
    /// Flags and fragment offset.
    pub fragmentation: Fragmentation,
    /// Time-to-live.
    pub time_to_live: u8,
    /// Next-layer protocol.
    pub protocol: Protocol,
    /// Header checksum.
    pub checksum: u16,
    /// Source address.
    pub src_ipaddr: IpV4Addr,
    /// Destination address.
    pub dst_ipaddr: IpV4Addr,
}

impl IpV4Header {
    /// Fragment size used on transmit: Ethernet MTU minus this header.
    pub const FRAGMENT_SIZE: usize = ETHERNET_MAX_TRANSPORT_UNIT - IpV4Header::BYTE_LEN;

    fn to_bytes(&self) -> [u8; IpV4Header::BYTE_LEN] {
        let mut bytes = [0_u8; IpV4Header::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

/// Fn-pointer dispatch table keyed by IP protocol number, the IPv4-side
/// counterpart to [`crate::enet::EthernetHandler`]: spec.md §4.6 has
/// IPv4 populate this registry with ICMP and UDP at init, the same way
/// Ethernet populates its own with ARP and IPv4.
pub(crate) type IpHandler<D, C> = fn(&mut NetStack<D, C>, Buf, IpV4Addr);

struct Fragment {
    offset: usize,
    data: Vec<u8>,
    more_fragments: bool,
}

pub(crate) struct ReassemblyQueue {
    src_ip: IpV4Addr,
    protocol: Protocol,
    fragments: Vec<Fragment>,
}

impl ReassemblyQueue {
    /// First fragment starts at 0, every subsequent one picks up exactly
    /// where the previous left off, and the last carries MF=0 — the
    /// completeness check from `original_source/src/ip.c`'s
    /// `is_defrag_over`.
    fn is_complete(&self) -> bool {
        if self.fragments.is_empty() || self.fragments[0].offset != 0 {
            return false;
        }
        for pair in self.fragments.windows(2) {
            if pair[1].offset != pair[0].offset + pair[0].data.len() {
                return false;
            }
        }
        !self.fragments.last().unwrap().more_fragments
    }

    fn assemble(&self) -> Vec<u8> {
        let total = self
            .fragments
            .last()
            .map(|f| f.offset + f.data.len())
            .unwrap_or(0);
        let mut out = vec![0_u8; total];
        for frag in &self.fragments {
            out[frag.offset..frag.offset + frag.data.len()].copy_from_slice(&frag.data);
        }
        out
    }
}

impl Clone for ReassemblyQueue {
    fn clone(&self) -> Self {
        ReassemblyQueue {
            src_ip: self.src_ip,
            protocol: self.protocol,
            fragments: self
                .fragments
                .iter()
                .map(|f| Fragment {
                    offset: f.offset,
                    data: f.data.clone(),
                    more_fragments: f.more_fragments,
                })
                .collect(),
        }
    }
}

impl<D: NetDriver, C: Clock> NetStack<D, C> {
    /// Handle one received, Ethernet-stripped IPv4 datagram.
    pub(crate) fn ip_in(&mut self, mut buf: Buf, _src_mac: crate::MacAddr) {
        if buf.len() < IpV4Header::BYTE_LEN {
            log::debug!("ip_in: datagram too short ({} bytes), dropping", buf.len());
            return;
        }
        let header = IpV4Header::read_bytes(buf.as_slice());
        if header.version_and_length.version() != 4 || header.version_and_length.header_length_words() != 5 {
            log::debug!("ip_in: unsupported version/IHL, dropping");
            return;
        }
        let total_length = header.total_length as usize;
        if total_length > buf.len() {
            log::debug!("ip_in: total_length exceeds received bytes, dropping");
            return;
        }
        if !verify_checksum16(&mut buf.as_mut_slice()[0..IpV4Header::BYTE_LEN], 10) {
            log::debug!("ip_in: header checksum mismatch, dropping");
            return;
        }
        if header.dst_ipaddr != self.config.if_ip {
            return;
        }
        if buf.len() > total_length {
            buf.remove_padding(buf.len() - total_length);
        }

        if !matches!(header.protocol, Protocol::Icmp | Protocol::Tcp | Protocol::Udp) {
            let mut orig = [0_u8; IpV4Header::BYTE_LEN + 8];
            let n = orig.len().min(buf.len());
            orig[0..n].copy_from_slice(&buf.as_slice()[0..n]);
            self.icmp_unreachable(&orig[0..n], header.src_ipaddr, IcmpCode::ProtocolUnreach);
            return;
        }

        buf.remove_header(IpV4Header::BYTE_LEN);

        if header.fragmentation.more_fragments() || header.fragmentation.offset() > 0 {
            self.ip_reassemble(buf, &header);
        } else {
            self.ip_dispatch(buf, header.protocol, header.src_ipaddr);
        }
    }

    fn ip_dispatch(&mut self, buf: Buf, protocol: Protocol, src_ip: IpV4Addr) {
        let handler = self
            .protocol_registry
            .iter()
            .find(|(p, _)| *p == protocol)
            .map(|(_, handler)| *handler);

        match handler {
            Some(handler) => handler(self, buf, src_ip),
            None => log::trace!(
                "ip_dispatch: no handler registered for protocol {:?}, dropping segment from {:?}",
                protocol,
                src_ip
            ),
        }
    }

    fn ip_reassemble(&mut self, buf: Buf, header: &IpV4Header) {
        let now = self.clock.now();
        let id = header.identification;
        let mut queue = self.reassembly.delete(&id, now).unwrap_or(ReassemblyQueue {
            src_ip: header.src_ipaddr,
            protocol: header.protocol,
            fragments: Vec::new(),
        });

        let offset = header.fragmentation.offset() as usize * 8;
        let data = buf.as_slice().to_vec();
        let pos = queue
            .fragments
            .iter()
            .position(|f| f.offset >= offset)
            .unwrap_or(queue.fragments.len());
        queue.fragments.insert(
            pos,
            Fragment {
                offset,
                data,
                more_fragments: header.fragmentation.more_fragments(),
            },
        );

        if queue.is_complete() {
            let complete = Buf::from_slice(&queue.assemble());
            self.ip_dispatch(complete, queue.protocol, queue.src_ip);
        } else {
            self.reassembly.set(id, queue, now);
        }
    }

    /// Fragment and transmit `payload` (header + payload of the upper
    /// layer, e.g. a rendered UDP datagram) to `dst_ip` under the next
    /// sequential datagram id.
    pub(crate) fn ip_out(&mut self, payload: Buf, dst_ip: IpV4Addr, protocol: Protocol) {
        let id = self.next_ip_id;
        self.next_ip_id = self.next_ip_id.wrapping_add(1);

        let total = payload.len();
        let mut offset = 0usize;
        loop {
            let remaining = total - offset;
            let more_fragments = remaining > IpV4Header::FRAGMENT_SIZE;
            let chunk_len = if more_fragments {
                IpV4Header::FRAGMENT_SIZE
            } else {
                remaining
            };

            let mut chunk = Buf::from_slice(&payload.as_slice()[offset..offset + chunk_len]);
            let header = IpV4Header {
                version_and_length: VersionAndHeaderLength::new(4, 5),
                tos: 0,
                total_length: (IpV4Header::BYTE_LEN + chunk_len) as u16,
                identification: id,
                fragmentation: Fragmentation::new(false, more_fragments, (offset / 8) as u16),
                time_to_live: IP_DEFAULT_TTL,
                protocol,
                checksum: 0,
                src_ipaddr: self.config.if_ip,
                dst_ipaddr: dst_ip,
            };
            chunk.add_header(IpV4Header::BYTE_LEN);
            let header_bytes = header.to_bytes();
            chunk.as_mut_slice()[0..IpV4Header::BYTE_LEN].copy_from_slice(&header_bytes);
            let checksum = crate::checksum16(&chunk.as_slice()[0..IpV4Header::BYTE_LEN]);
            chunk.as_mut_slice()[10..12].copy_from_slice(&checksum.to_be_bytes());

            self.arp_out(chunk, dst_ip);

            offset += chunk_len;
            if !more_fragments {
                break;
            }
        }
    }

    pub(crate) fn reassembly_timeout() -> core::time::Duration {
        IP_REASSEMBLY_TIMEOUT
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn version_and_header_length_round_trip() {
        let v = VersionAndHeaderLength::new(4, 5);
        assert_eq!(v.version(), 4);
        assert_eq!(v.header_length_words(), 5);
    }

    #[test]
    fn fragmentation_bits_fit_in_sixteen_bits() {
        let f = Fragmentation::new(true, true, 8191);
        assert!(f.do_not_fragment());
        assert!(f.more_fragments());
        assert_eq!(f.offset(), 8191);
    }

    #[test]
    fn reassembly_completeness_requires_contiguous_offsets() {
        let queue = ReassemblyQueue {
            src_ip: IpV4Addr::new([1, 2, 3, 4]),
            protocol: Protocol::Udp,
            fragments: vec![
                Fragment { offset: 0, data: vec![0; 1480], more_fragments: true },
                Fragment { offset: 1480, data: vec![0; 100], more_fragments: false },
            ],
        };
        assert!(queue.is_complete());
    }

    #[test]
    fn reassembly_with_a_gap_is_incomplete() {
        let queue = ReassemblyQueue {
            src_ip: IpV4Addr::new([1, 2, 3, 4]),
            protocol: Protocol::Udp,
            fragments: vec![
                Fragment { offset: 0, data: vec![0; 1000], more_fragments: true },
                Fragment { offset: 1480, data: vec![0; 100], more_fragments: false },
            ],
        };
        assert!(!queue.is_complete());
    }
}
