//! The handful of synchronously-returned errors this stack has. Almost
//! everything else (malformed frames, checksum failures, unknown
//! destinations) is a silent drop per spec.md §7 — this enum only covers
//! the application-facing calls that can meaningfully fail.

use ufmt::derive::uDebug;

/// Application-facing errors from [`crate::net::NetStack`] methods.
#[derive(Debug, uDebug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// `udp_open` was called with a port that already has a handler
    /// registered.
    PortInUse,
    /// `udp_close` was called with a port that has no handler registered.
    PortNotOpen,
}
