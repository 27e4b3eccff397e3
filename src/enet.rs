//! Link layer: Ethernet II framing, MTU padding, and ethertype demux.
//!
//! Diagram at https://en.wikipedia.org/wiki/Ethernet_frame#Ethernet_II

use crate::clock::Clock;
use crate::config::{ETHERNET_MAX_TRANSPORT_UNIT, ETHERNET_MIN_TRANSPORT_UNIT};
use crate::driver::NetDriver;
use crate::enum_with_unknown;
use crate::net::NetStack;
use crate::{Buf, MacAddr};

use byte_struct::*;

/// Header for an Ethernet II frame: 6-byte destination MAC, 6-byte
/// source MAC, 2-byte big-endian ethertype.
#[derive(ByteStruct, Clone, Copy, Debug)]
#[byte_struct_be]
pub struct EthernetHeader {
    /// Destination MAC address.
    pub dst_macaddr: MacAddr,
    /// Source MAC address.
    pub src_macaddr: MacAddr,
    /// Next-layer protocol, in wire order.
    pub ethertype: EtherType,
}

enum_with_unknown! {
    /// EtherType tag values this stack recognizes.
    ///
    /// See <https://en.wikipedia.org/wiki/EtherType>.
    pub enum EtherType(u16) {
        /// Internet Protocol version 4
        Ipv4 = 0x0800,
        /// Address Resolution Protocol
        Arp = 0x0806,
    }
}

impl ByteStructLen for EtherType {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for EtherType {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut raw = [0_u8; 2];
        raw.copy_from_slice(&bytes[0..2]);
        EtherType::from(u16::from_be_bytes(raw))
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&u16::from(*self).to_be_bytes());
    }
}

/// Fn-pointer dispatch table keyed by ethertype, populated once in
/// [`NetStack::new`]. A `Vec` rather than a match so a future ethertype
/// can be wired in without touching `ethernet_in` itself.
pub(crate) type EthernetHandler<D, C> = fn(&mut NetStack<D, C>, Buf, MacAddr);

impl<D: NetDriver, C: Clock> NetStack<D, C> {
    /// Strip the Ethernet header from `frame` and dispatch by ethertype.
    /// Drops frames shorter than the header.
    pub(crate) fn ethernet_in(&mut self, mut frame: Buf) {
        if frame.len() < EthernetHeader::BYTE_LEN {
            log::debug!("ethernet_in: frame too short ({} bytes), dropping", frame.len());
            return;
        }
        let header = EthernetHeader::read_bytes(frame.as_slice());
        frame.remove_header(EthernetHeader::BYTE_LEN);

        let handler = self
            .ethertype_registry
            .iter()
            .find(|(ethertype, _)| *ethertype == header.ethertype)
            .map(|(_, handler)| *handler);

        match handler {
            Some(handler) => handler(self, frame, header.src_macaddr),
            None => log::trace!("ethernet_in: no handler for ethertype {:?}", header.ethertype),
        }
    }

    /// Pad `payload` to [`ETHERNET_MIN_TRANSPORT_UNIT`] if short, prepend
    /// the 14-byte header addressed to `dst_mac` with the given
    /// ethertype, and hand the frame to the driver.
    pub(crate) fn ethernet_out(&mut self, mut payload: Buf, dst_mac: MacAddr, ethertype: EtherType) {
        if payload.len() < ETHERNET_MIN_TRANSPORT_UNIT {
            payload.add_padding(ETHERNET_MIN_TRANSPORT_UNIT - payload.len());
        }
        payload.add_header(EthernetHeader::BYTE_LEN);
        let header = EthernetHeader {
            dst_macaddr: dst_mac,
            src_macaddr: self.config.if_mac,
            ethertype,
        };
        header.write_bytes(&mut payload.as_mut_slice()[0..EthernetHeader::BYTE_LEN]);
        if self.driver.send(&payload) < 0 {
            log::warn!("ethernet_out: driver rejected frame to {:?}", dst_mac);
        }
    }

    /// Drain at most one frame from the driver and run it to completion.
    /// A driver reporting no frame available makes this a no-op.
    pub(crate) fn ethernet_poll(&mut self) {
        let mut rxbuf = Buf::new_raw(EthernetHeader::BYTE_LEN + ETHERNET_MAX_TRANSPORT_UNIT);
        let n = self.driver.recv(&mut rxbuf);
        if n > 0 {
            rxbuf.truncate(n as usize);
            self.ethernet_in(rxbuf);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ethertype_round_trips_known_values() {
        assert_eq!(EtherType::from(0x0800u16), EtherType::Ipv4);
        assert_eq!(EtherType::from(0x0806u16), EtherType::Arp);
        assert_eq!(u16::from(EtherType::Ipv4), 0x0800);
    }

    #[test]
    fn unknown_ethertype_round_trips_its_wire_value() {
        let t = EtherType::from(0x86DDu16);
        assert_eq!(t, EtherType::Unknown(0x86DD));
        assert_eq!(u16::from(t), 0x86DD);
    }
}
