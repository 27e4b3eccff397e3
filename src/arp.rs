//! Address Resolution Protocol: IPv4→MAC resolution table, pending-send
//! queue, and request/reply handling.
//!
//! ARP is not a distinct layer in the upward data flow — it sits beside
//! IPv4 output, gating every `ip_out` on a resolved destination MAC —
//! but it owns its own timed tables and its own wire format, so it gets
//! its own module.

use crate::clock::Clock;
use crate::driver::NetDriver;
use crate::enet::EtherType;
use crate::enum_with_unknown;
use crate::net::NetStack;
use crate::{Buf, IpV4Addr, MacAddr};

use byte_struct::*;
use static_assertions::const_assert;
use ufmt::derive::uDebug;

const_assert!(ArpPayload::BYTE_LEN == 28);

/// An ARP request or response for IPv4-over-Ethernet. See
/// <https://en.wikipedia.org/wiki/Address_Resolution_Protocol>.
#[derive(ByteStruct, Clone, Copy, uDebug, Debug, PartialEq, Eq)]
#[byte_struct_be]
pub struct ArpPayload {
    /// Hardware type (1 for Ethernet).
    pub htype: u16,
    /// Protocol type (same values as Ethernet's ethertype field).
    pub ptype: EtherType,
    /// Hardware address length (6 for standard MAC).
    pub hlen: u8,
    /// Protocol address length (4 for IPv4).
    pub plen: u8,
    /// Request or reply.
    pub operation: ArpOperation,
    /// Sender MAC address.
    pub src_mac: MacAddr,
    /// Sender IPv4 address.
    pub src_ipaddr: IpV4Addr,
    /// Target MAC address (all-zero on a request).
    pub dst_mac: MacAddr,
    /// Target IPv4 address.
    pub dst_ipaddr: IpV4Addr,
}

impl ArpPayload {
    fn new(
        operation: ArpOperation,
        src_mac: MacAddr,
        src_ipaddr: IpV4Addr,
        dst_mac: MacAddr,
        dst_ipaddr: IpV4Addr,
    ) -> Self {
        ArpPayload {
            htype: 1,
            ptype: EtherType::Ipv4,
            hlen: 6,
            plen: 4,
            operation,
            src_mac,
            src_ipaddr,
            dst_mac,
            dst_ipaddr,
        }
    }

    fn is_valid(&self) -> bool {
        self.htype == 1
            && self.ptype == EtherType::Ipv4
            && self.hlen == 6
            && self.plen == 4
            && matches!(self.operation, ArpOperation::Request | ArpOperation::Response)
    }
}

enum_with_unknown! {
    /// ARP opcode.
    pub enum ArpOperation(u16) {
        /// Request: "who has this IP?"
        Request = 1,
        /// Response: "I have this IP, here is my MAC."
        Response = 2,
    }
}

impl ByteStructLen for ArpOperation {
    const BYTE_LEN: usize = 2;
}

impl ByteStruct for ArpOperation {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut raw = [0_u8; 2];
        raw.copy_from_slice(&bytes[0..2]);
        ArpOperation::from(u16::from_be_bytes(raw))
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&u16::from(*self).to_be_bytes());
    }
}

impl<D: NetDriver, C: Clock> NetStack<D, C> {
    /// Resolve `dst_ip` and send `ip_packet` (a rendered IPv4 datagram,
    /// no Ethernet header yet) to it. If the table already has a MAC,
    /// the frame goes out immediately. Otherwise, if no resolution is
    /// already in flight, `ip_packet` is parked in the pending map and a
    /// broadcast request is issued; if one is already in flight, the
    /// frame is dropped — the stack holds at most one pending frame per
    /// destination.
    pub(crate) fn arp_out(&mut self, ip_packet: Buf, dst_ip: IpV4Addr) {
        let now = self.clock.now();
        if let Some(mac) = self.arp_table.get(&dst_ip, now) {
            self.ethernet_out(ip_packet, mac, EtherType::Ipv4);
            return;
        }
        if self.arp_pending.get(&dst_ip, now).is_some() {
            log::trace!("arp_out: resolution for {:?} already in flight, dropping frame", dst_ip);
            return;
        }
        self.arp_pending.set(dst_ip, ip_packet, now);
        self.arp_request(dst_ip);
    }

    /// Broadcast a request for `target_ip`.
    pub(crate) fn arp_request(&mut self, target_ip: IpV4Addr) {
        let payload = ArpPayload::new(
            ArpOperation::Request,
            self.config.if_mac,
            self.config.if_ip,
            MacAddr::ANY,
            target_ip,
        );
        let buf = Buf::from_slice(&payload.to_bytes());
        self.ethernet_out(buf, MacAddr::BROADCAST, EtherType::Arp);
    }

    fn arp_reply(&mut self, target_mac: MacAddr, target_ip: IpV4Addr) {
        let payload = ArpPayload::new(
            ArpOperation::Response,
            self.config.if_mac,
            self.config.if_ip,
            target_mac,
            target_ip,
        );
        let buf = Buf::from_slice(&payload.to_bytes());
        self.ethernet_out(buf, target_mac, EtherType::Arp);
    }

    /// Handle one received ARP message. Validates the fixed header
    /// fields, unconditionally refreshes the resolver table, flushes a
    /// pending frame if one was waiting on this sender, and otherwise
    /// replies to a request targeting us.
    pub(crate) fn arp_in(&mut self, buf: Buf, _src_mac: MacAddr) {
        if buf.len() < ArpPayload::BYTE_LEN {
            log::debug!("arp_in: payload too short ({} bytes), dropping", buf.len());
            return;
        }
        let payload = ArpPayload::read_bytes(buf.as_slice());
        if !payload.is_valid() {
            log::debug!("arp_in: invalid header fields, dropping");
            return;
        }

        let now = self.clock.now();
        self.arp_table.set(payload.src_ipaddr, payload.src_mac, now);

        if let Some(pending) = self.arp_pending.delete(&payload.src_ipaddr, now) {
            self.ethernet_out(pending, payload.src_mac, EtherType::Ipv4);
        } else if payload.operation == ArpOperation::Request
            && payload.dst_ipaddr == self.config.if_ip
        {
            self.arp_reply(payload.src_mac, payload.src_ipaddr);
        }
    }

    /// Broadcast a self-announce request (who-has our own IP), as spec'd
    /// for stack initialization.
    pub(crate) fn arp_announce(&mut self) {
        let if_ip = self.config.if_ip;
        self.arp_request(if_ip);
    }

    /// Emit one log line per resolved entry in the ARP table, oldest
    /// insertion first. Grounded on `original_source/src/arp.c`'s
    /// `arp_table_print`/`arp_entry_print`, which walk the table the
    /// same way via `map_foreach` for console diagnostics.
    pub fn log_arp_table(&self) {
        let now = self.clock.now();
        log::info!("arp table:");
        self.arp_table.for_each(now, |ip, mac, inserted_at| {
            log::info!("  {:?} -> {:?} (age {:?})", ip, mac, now.saturating_sub(inserted_at));
        });
    }
}

impl ArpPayload {
    fn to_bytes(&self) -> [u8; ArpPayload::BYTE_LEN] {
        let mut bytes = [0_u8; ArpPayload::BYTE_LEN];
        self.write_bytes(&mut bytes);
        bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serialization_round_trips() {
        let msg = ArpPayload::new(
            ArpOperation::Request,
            MacAddr::new([7_u8; 6]),
            IpV4Addr::new([8_u8; 4]),
            MacAddr::new([9_u8; 6]),
            IpV4Addr::new([10_u8; 4]),
        );
        let bytes = msg.to_bytes();
        let parsed = ArpPayload::read_bytes(&bytes);
        assert_eq!(msg, parsed);
        assert!(parsed.is_valid());
    }

    #[test]
    fn garbage_operation_fails_validation() {
        let mut msg = ArpPayload::new(
            ArpOperation::Request,
            MacAddr::new([1_u8; 6]),
            IpV4Addr::new([1_u8; 4]),
            MacAddr::new([1_u8; 6]),
            IpV4Addr::new([1_u8; 4]),
        );
        msg.operation = ArpOperation::Unknown(99);
        assert!(!msg.is_valid());
    }
}
