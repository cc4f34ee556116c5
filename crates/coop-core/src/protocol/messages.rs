//! All cooperation protocol message types.
//!
//! Datagram and stream transports share one framing: an 8-byte header
//! ([`HEADER_MAGIC`] + body size) followed by a body whose first byte is the
//! [`PayloadCase`] tag.  Discovery and pairing payloads additionally carry the
//! shared [`SCAN_KEY`]; a mismatched key marks foreign or incompatible
//! traffic and is dropped outright.

use crate::domain::device::DeviceInfo;
use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Legality marker at the start of every frame header.
pub const HEADER_MAGIC: u32 = 0x4C43_4F50;

/// Total size of the frame header in bytes: magic (4) + body size (4).
pub const HEADER_SIZE: usize = 8;

/// Pre-shared key carried by every discovery/pairing message.
///
/// This is a compatibility fence against cross-version and foreign-app
/// traffic on the unauthenticated discovery port, not authentication.
pub const SCAN_KEY: &str = "lancoop-v1";

// ── Payload tags ──────────────────────────────────────────────────────────────

/// Body tag identifying the payload type, the first byte of every body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PayloadCase {
    // Discovery (0x01–0x0F)
    ScanRequest = 0x01,
    ScanResponse = 0x02,
    ServiceStopped = 0x03,
    // Pairing (0x10–0x1F)
    PairRequest = 0x11,
    PairResponse = 0x12,
    // Session (0x20–0x2F)
    Ping = 0x20,
    Pong = 0x21,
    ServiceStatus = 0x22,
    DeviceSharingStart = 0x23,
    DeviceSharingStop = 0x24,
    InputFlow = 0x25,
    // Clipboard (0x30–0x3F)
    ClipboardTargetsChanged = 0x30,
    ReadClipboardContent = 0x31,
    ClipboardContent = 0x32,
    // File transfer control (0x40–0x4F)
    FileTransferRequest = 0x40,
    FileTransferResponse = 0x41,
}

impl TryFrom<u8> for PayloadCase {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(PayloadCase::ScanRequest),
            0x02 => Ok(PayloadCase::ScanResponse),
            0x03 => Ok(PayloadCase::ServiceStopped),
            0x11 => Ok(PayloadCase::PairRequest),
            0x12 => Ok(PayloadCase::PairResponse),
            0x20 => Ok(PayloadCase::Ping),
            0x21 => Ok(PayloadCase::Pong),
            0x22 => Ok(PayloadCase::ServiceStatus),
            0x23 => Ok(PayloadCase::DeviceSharingStart),
            0x24 => Ok(PayloadCase::DeviceSharingStop),
            0x25 => Ok(PayloadCase::InputFlow),
            0x30 => Ok(PayloadCase::ClipboardTargetsChanged),
            0x31 => Ok(PayloadCase::ReadClipboardContent),
            0x32 => Ok(PayloadCase::ClipboardContent),
            0x40 => Ok(PayloadCase::FileTransferRequest),
            0x41 => Ok(PayloadCase::FileTransferResponse),
            _ => Err(()),
        }
    }
}

// ── Flow direction ────────────────────────────────────────────────────────────

/// Screen edge whose crossing routes input to/from a paired machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FlowDirection {
    Top = 0x00,
    Bottom = 0x01,
    Left = 0x02,
    Right = 0x03,
}

impl FlowDirection {
    /// The mirror edge: input leaving our right edge enters the peer's left.
    pub fn opposite(self) -> Self {
        match self {
            FlowDirection::Top => FlowDirection::Bottom,
            FlowDirection::Bottom => FlowDirection::Top,
            FlowDirection::Left => FlowDirection::Right,
            FlowDirection::Right => FlowDirection::Left,
        }
    }
}

impl TryFrom<u8> for FlowDirection {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(FlowDirection::Top),
            0x01 => Ok(FlowDirection::Bottom),
            0x02 => Ok(FlowDirection::Left),
            0x03 => Ok(FlowDirection::Right),
            _ => Err(()),
        }
    }
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// SCAN_REQUEST (0x01): presence announcement, broadcast on the discovery
/// port or unicast as a directed re-probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequestMessage {
    /// Shared key; must equal [`SCAN_KEY`] to be honored.
    pub key: String,
    /// Snapshot of the announcing device.
    pub device: DeviceInfo,
    /// TCP port the announcer's pairing listener is bound to.
    pub pair_port: u16,
}

/// SCAN_RESPONSE (0x02): unicast reply to a scan request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponseMessage {
    /// Shared key; must equal [`SCAN_KEY`] to be honored.
    pub key: String,
    /// Snapshot of the responding device.
    pub device: DeviceInfo,
    /// TCP port the responder's pairing listener is bound to.
    pub pair_port: u16,
}

/// PAIR_REQUEST (0x11): first frame on a freshly opened pairing stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRequestMessage {
    /// Shared key; must equal [`SCAN_KEY`] or the stream is closed.
    pub key: String,
    /// Snapshot of the initiating device.
    pub device: DeviceInfo,
}

/// Why a pair request was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PairRejectReason {
    /// Not rejected (paired with `accepted = true`).
    None = 0x00,
    /// The target already has a connected peer of the initiator's class.
    DeviceBusy = 0x01,
    /// The initiator was never discovered by the target.
    UnknownDevice = 0x02,
    /// The shared key did not match.
    KeyMismatch = 0x03,
}

impl TryFrom<u8> for PairRejectReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x00 => Ok(PairRejectReason::None),
            0x01 => Ok(PairRejectReason::DeviceBusy),
            0x02 => Ok(PairRejectReason::UnknownDevice),
            0x03 => Ok(PairRejectReason::KeyMismatch),
            _ => Err(()),
        }
    }
}

/// PAIR_RESPONSE (0x12): accept/reject verdict sent back on the stream
/// before it is either adopted by a session or closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairResponseMessage {
    pub accepted: bool,
    /// [`PairRejectReason::None`] when accepted.
    pub reject_reason: PairRejectReason,
}

/// SERVICE_STATUS (0x22): this host's sharing switches changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatusMessage {
    pub shared_clipboard: bool,
    pub shared_devices: bool,
}

/// INPUT_FLOW (0x25): one redirected input coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFlowMessage {
    /// Edge this event is flowing across.
    pub direction: FlowDirection,
    pub x: u16,
    pub y: u16,
}

/// CLIPBOARD_CONTENT (0x32): data for one clipboard target type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardContentMessage {
    /// MIME type of the content (e.g. `text/plain`).
    pub target: String,
    pub data: Vec<u8>,
}

/// FILE_TRANSFER_REQUEST (0x40): offer a set of files to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferRequestMessage {
    /// Correlates the peer's response with this offer.
    pub request_id: u32,
    /// Absolute paths on the sending machine.
    pub paths: Vec<String>,
}

/// FILE_TRANSFER_RESPONSE (0x41): accept/decline a file offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransferResponseMessage {
    pub request_id: u32,
    pub accepted: bool,
}

// ── The message union ─────────────────────────────────────────────────────────

/// Discriminated union over every protocol payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoopMessage {
    ScanRequest(ScanRequestMessage),
    ScanResponse(ScanResponseMessage),
    /// The named peer's cooperation service shut down; forget it.
    ServiceStopped { device_uuid: String },
    PairRequest(PairRequestMessage),
    PairResponse(PairResponseMessage),
    Ping,
    Pong,
    ServiceStatus(ServiceStatusMessage),
    /// Peer started device sharing toward the given edge.
    DeviceSharingStart { direction: FlowDirection },
    DeviceSharingStop,
    InputFlow(InputFlowMessage),
    /// The sender now owns clipboard content of the given MIME types.
    ClipboardTargetsChanged { targets: Vec<String> },
    /// Ask the current clipboard owner to transmit one target type.
    ReadClipboardContent { target: String },
    ClipboardContent(ClipboardContentMessage),
    FileTransferRequest(FileTransferRequestMessage),
    FileTransferResponse(FileTransferResponseMessage),
}

impl CoopMessage {
    /// Returns the wire tag for this payload.
    pub fn payload_case(&self) -> PayloadCase {
        match self {
            CoopMessage::ScanRequest(_) => PayloadCase::ScanRequest,
            CoopMessage::ScanResponse(_) => PayloadCase::ScanResponse,
            CoopMessage::ServiceStopped { .. } => PayloadCase::ServiceStopped,
            CoopMessage::PairRequest(_) => PayloadCase::PairRequest,
            CoopMessage::PairResponse(_) => PayloadCase::PairResponse,
            CoopMessage::Ping => PayloadCase::Ping,
            CoopMessage::Pong => PayloadCase::Pong,
            CoopMessage::ServiceStatus(_) => PayloadCase::ServiceStatus,
            CoopMessage::DeviceSharingStart { .. } => PayloadCase::DeviceSharingStart,
            CoopMessage::DeviceSharingStop => PayloadCase::DeviceSharingStop,
            CoopMessage::InputFlow(_) => PayloadCase::InputFlow,
            CoopMessage::ClipboardTargetsChanged { .. } => PayloadCase::ClipboardTargetsChanged,
            CoopMessage::ReadClipboardContent { .. } => PayloadCase::ReadClipboardContent,
            CoopMessage::ClipboardContent(_) => PayloadCase::ClipboardContent,
            CoopMessage::FileTransferRequest(_) => PayloadCase::FileTransferRequest,
            CoopMessage::FileTransferResponse(_) => PayloadCase::FileTransferResponse,
        }
    }
}
