//! A user-space network stack sitting directly atop a single Ethernet-class
//! link driver: frame demultiplexing, ARP resolution, IPv4 input/output with
//! fragmentation and reassembly, ICMPv4 echo/unreachable, and UDP port
//! demultiplexing, driven by a cooperative, single-threaded `poll` loop.
//!
//! `no_std` + `alloc`: the protocol engine itself never touches a
//! filesystem, a clock, or a socket directly — those come in through the
//! [`NetDriver`] and [`Clock`] traits the host supplies. The `std` feature
//! adds a loopback driver and a wall-clock `Clock` impl for tests and demos.

#![no_std]
#![allow(dead_code)]
#![deny(missing_docs)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub use byte_struct::{ByteStruct, ByteStructLen};
pub use ufmt::{derive::uDebug, uDebug, uDisplay, uWrite};

pub mod buf;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod timed_map;

pub mod arp;
pub mod enet;
pub mod icmp;
pub mod ip;
pub mod net;
pub mod udp;

pub use arp::*;
pub use buf::Buf;
pub use clock::Clock;
pub use config::NetConfig;
pub use driver::NetDriver;
pub use enet::*;
pub use error::NetError;
pub use icmp::*;
pub use ip::*;
pub use net::NetStack;
pub use udp::*;

/// Standard 6-byte MAC address, split 24/24 Block ID | Device ID.
/// Locally-administered addresses are `[0x02, ...]`, `[0x06, ...]`,
/// `[0x0A, ...]`, `[0x0E, ...]`.
pub type MacAddr = ByteArray<6>;

impl MacAddr {
    /// New from bytes
    pub fn new(v: [u8; 6]) -> Self {
        ByteArray(v)
    }

    /// Broadcast address (all ones)
    pub const BROADCAST: MacAddr = ByteArray([0xFF_u8; 6]);

    /// Any address (all zeroes)
    pub const ANY: MacAddr = ByteArray([0x0_u8; 6]);
}

/// IPv4 address as bytes
pub type IpV4Addr = ByteArray<4>;

impl IpV4Addr {
    /// New from bytes
    pub fn new(v: [u8; 4]) -> Self {
        ByteArray(v)
    }

    /// Broadcast address (all ones)
    pub const BROADCAST: IpV4Addr = ByteArray([0xFF_u8; 4]);

    /// Any address (all zeroes)
    pub const ANY: IpV4Addr = ByteArray([0x0_u8; 4]);
}

/// Derive To/From with an added `Unknown` variant for converting from
/// numerical values that do not match a valid variant, so unrecognized
/// wire values round-trip instead of requiring a panic or a `Result`.
///
/// Yoinked (with modification) from smoltcp, by way of `catnip`.
#[macro_export]
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, uDebug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Catch-all for values that do not match a known variant
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

enum_with_unknown! {
    /// IP protocol number. See
    /// <https://en.wikipedia.org/wiki/List_of_IP_protocol_numbers>.
    pub enum Protocol(u8) {
        /// Internet Control Message Protocol
        Icmp = 1,
        /// Transmission Control Protocol. There is no TCP layer in this
        /// stack; the number still needs recognizing so a TCP segment is
        /// silently dropped rather than ICMP protocol-unreachable'd.
        Tcp = 6,
        /// User Datagram Protocol
        Udp = 17,
    }
}

impl ByteStructLen for Protocol {
    const BYTE_LEN: usize = 1;
}

impl ByteStruct for Protocol {
    fn read_bytes(bytes: &[u8]) -> Self {
        Protocol::from(bytes[0])
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0] = u8::from(*self);
    }
}

/// Newtype for `[u8; N]` in order to implement foreign traits on arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ByteArray<const N: usize>(pub [u8; N]);

impl<const N: usize> ByteStructLen for ByteArray<N> {
    const BYTE_LEN: usize = N;
}

impl<const N: usize> ByteStruct for ByteArray<N> {
    fn read_bytes(bytes: &[u8]) -> Self {
        let mut out = [0_u8; N];
        out.copy_from_slice(&bytes[0..N]);
        ByteArray(out)
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        bytes[0..N].copy_from_slice(&self.0);
    }
}

impl<const N: usize> ByteArray<N> {
    /// Convert to a big-endian byte array
    pub fn to_be_bytes(&self) -> [u8; N] {
        self.0
    }
}

impl uDebug for ByteArray<4> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        <[u8; 4] as uDebug>::fmt(&self.0, f)
    }
}

impl uDebug for ByteArray<6> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        <[u8; 6] as uDebug>::fmt(&self.0, f)
    }
}

/// Calculate a one's-complement 16-bit internet checksum per RFC 1071
/// section 4.1, over a byte slice whose checksum field has already been
/// zeroed by the caller.
pub fn checksum16(data: &[u8]) -> u16 {
    checksum16_finalize(checksum16_partial(data))
}

/// Fold a 32-bit accumulator into 16 bits and take the one's complement.
pub fn checksum16_finalize(sum: u32) -> u16 {
    let mut sum = sum;
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Accumulate a checksum over a byte slice without folding or
/// complementing, so several regions (e.g. a pseudo-header and a payload)
/// can be summed independently and combined later.
pub fn checksum16_partial(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    sum
}

/// Zero the 2-byte checksum field at `offset`, compute [`checksum16`]
/// over the whole slice, restore the original field, and report whether
/// the computed value matched it. Used by every layer that verifies an
/// inbound checksum in place (IP header, ICMP, UDP).
pub fn verify_checksum16(data: &mut [u8], offset: usize) -> bool {
    let original = [data[offset], data[offset + 1]];
    data[offset] = 0;
    data[offset + 1] = 0;
    let computed = checksum16(data);
    data[offset] = original[0];
    data[offset + 1] = original[1];
    computed == u16::from_be_bytes(original)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_of_complemented_data_is_zero() {
        let mut data = [
            0x45u8, 0x00, 0x00, 0x3c, 0x1c, 0x46, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, 0xac, 0x10,
            0x0a, 0x63, 0xac, 0x10, 0x0a, 0x0c,
        ];
        let sum = checksum16(&data);
        data[10] = (sum >> 8) as u8;
        data[11] = (sum & 0xff) as u8;
        assert_eq!(checksum16(&data), 0);
    }

    #[test]
    fn checksum_is_deterministic_for_odd_length() {
        let data = [0x01u8, 0x02, 0x03];
        assert_eq!(checksum16_partial(&data), checksum16_partial(&data));
    }
}
