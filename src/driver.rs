//! The link-driver contract [`crate::net::NetStack`] is built on top of.
//! Matches spec.md §6's `driver_open/close/send/recv` exactly, reshaped
//! as a trait so the stack is generic over whatever NIC the host plugs
//! in.

use crate::Buf;

/// A non-blocking Ethernet-class link driver.
pub trait NetDriver {
    /// Open the underlying device. Returns `false` on failure.
    fn open(&mut self) -> bool;

    /// Close the underlying device.
    fn close(&mut self);

    /// Enqueue one Ethernet frame for transmission. `frame`'s visible
    /// bytes are the full wire size (header + payload, already padded).
    /// Returns the number of bytes accepted, or a negative value on
    /// failure.
    fn send(&mut self, frame: &Buf) -> i32;

    /// Try to dequeue one Ethernet frame into `frame`, which the caller
    /// has already sized to the driver's maximum frame length. Returns
    /// the number of bytes written (after which the caller truncates the
    /// buffer to that length), or 0/negative if nothing is available.
    /// Must never block.
    fn recv(&mut self, frame: &mut Buf) -> i32;
}

#[cfg(feature = "std")]
mod loopback {
    use super::NetDriver;
    use crate::Buf;
    use alloc::collections::VecDeque;
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    type Queue = Rc<RefCell<VecDeque<Vec<u8>>>>;

    /// An in-memory link between two [`crate::net::NetStack`]s, for
    /// integration tests and the demo binaries: frames sent on one end
    /// of a pair arrive as receives on the other.
    pub struct LoopbackDriver {
        outbound: Queue,
        inbound: Queue,
        open: bool,
    }

    impl LoopbackDriver {
        /// Build a connected pair of drivers: `a`'s sends arrive at `b`'s
        /// receives and vice versa.
        pub fn pair() -> (LoopbackDriver, LoopbackDriver) {
            let left = Rc::new(RefCell::new(VecDeque::new()));
            let right = Rc::new(RefCell::new(VecDeque::new()));
            (
                LoopbackDriver {
                    outbound: left.clone(),
                    inbound: right.clone(),
                    open: false,
                },
                LoopbackDriver {
                    outbound: right,
                    inbound: left,
                    open: false,
                },
            )
        }
    }

    impl NetDriver for LoopbackDriver {
        fn open(&mut self) -> bool {
            self.open = true;
            true
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn send(&mut self, frame: &Buf) -> i32 {
            if !self.open {
                return -1;
            }
            self.outbound.borrow_mut().push_back(frame.as_slice().to_vec());
            frame.len() as i32
        }

        fn recv(&mut self, frame: &mut Buf) -> i32 {
            if !self.open {
                return -1;
            }
            match self.inbound.borrow_mut().pop_front() {
                Some(bytes) => {
                    let n = bytes.len().min(frame.len());
                    frame.as_mut_slice()[0..n].copy_from_slice(&bytes[0..n]);
                    n as i32
                }
                None => 0,
            }
        }
    }
}

#[cfg(feature = "std")]
pub use loopback::LoopbackDriver;
