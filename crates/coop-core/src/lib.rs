//! # coop-core
//!
//! Shared library for the LAN cooperation daemon containing the wire protocol
//! codec and the device domain types.
//!
//! This crate is used by the daemon and by any tooling that needs to speak
//! the protocol.  It has zero dependencies on OS APIs, UI frameworks, or
//! network sockets.
//!
//! # Architecture overview
//!
//! Cooperation links two machines on the same LAN so that one keyboard and
//! mouse, one clipboard, and simple file drops work across both.  Peers find
//! each other with broadcast datagrams on a well-known port, then negotiate a
//! single paired TCP session per device class over which all input, clipboard,
//! and file-transfer traffic flows.
//!
//! This crate defines:
//!
//! - **`protocol`** – how bytes travel over the network.  Every message is a
//!   fixed header (magic marker + body size) followed by a tag-discriminated
//!   binary body, identical for datagram and stream transports.
//!
//! - **`domain`** – the device model: operating system identifiers, the
//!   PC-vs-Android device class split that drives the pairing invariant, and
//!   the immutable [`DeviceInfo`] snapshot announced during discovery.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `coop_core::CoopMessage` instead of `coop_core::protocol::messages::CoopMessage`.
pub use domain::device::{DeviceClass, DeviceInfo, DeviceOs};
pub use protocol::codec::{
    decode_body, decode_datagram, decode_header, encode_message, split_frame, FrameHeader,
    ProtocolError,
};
pub use protocol::messages::{CoopMessage, FlowDirection, HEADER_MAGIC, HEADER_SIZE, SCAN_KEY};
