//! Binary codec for encoding and decoding cooperation protocol messages.
//!
//! Wire format:
//! ```text
//! [magic:4][body_size:4][payload_case:1][payload:N-1]
//! ```
//! Header size: 8 bytes, `body_size` counts everything after the header
//! (tag byte included).  All multi-byte integers are big-endian.
//!
//! The codec is a pure transform: encoding never touches sockets, and
//! decoding never consumes more than the declared frame.  Stream callers use
//! [`split_frame`] which treats a partial frame as a normal, non-error
//! condition and simply waits for more bytes.

use crate::domain::device::{DeviceInfo, DeviceOs};
use crate::protocol::messages::{
    ClipboardContentMessage, CoopMessage, FileTransferRequestMessage, FileTransferResponseMessage,
    FlowDirection, InputFlowMessage, PairRejectReason, PairRequestMessage, PairResponseMessage,
    PayloadCase, ScanRequestMessage, ScanResponseMessage, ServiceStatusMessage, HEADER_MAGIC,
    HEADER_SIZE,
};
use thiserror::Error;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// Fewer bytes than a full header; not an error for stream callers,
    /// which simply wait for the next readiness notification.
    #[error("incomplete frame: need at least {needed} bytes, got {available}")]
    Incomplete { needed: usize, available: usize },

    /// The magic marker in the header does not match [`HEADER_MAGIC`].
    #[error("illegal header marker: 0x{0:08X}")]
    IllegalHeader(u32),

    /// The payload tag byte is not a recognized [`PayloadCase`].
    #[error("unknown payload case: 0x{0:02X}")]
    UnknownPayloadCase(u8),

    /// The body length does not match what the header declared.
    #[error("body length mismatch: header says {declared}, got {available}")]
    BodyLengthMismatch { declared: usize, available: usize },

    /// The payload could not be parsed (field out of range, UTF-8 error, …).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Body length in bytes (tag byte included).
    pub body_size: u32,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`CoopMessage`] into a byte vector including the 8-byte header.
pub fn encode_message(msg: &CoopMessage) -> Vec<u8> {
    let mut body = Vec::with_capacity(64);
    body.push(msg.payload_case() as u8);
    encode_payload(&mut body, msg);

    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&HEADER_MAGIC.to_be_bytes());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    buf
}

/// Decodes the fixed-size frame header from the start of `bytes`.
///
/// # Errors
///
/// [`ProtocolError::Incomplete`] if fewer than [`HEADER_SIZE`] bytes are
/// available (never reads out of bounds), [`ProtocolError::IllegalHeader`]
/// if the magic marker is absent or corrupt.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::Incomplete {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != HEADER_MAGIC {
        return Err(ProtocolError::IllegalHeader(magic));
    }

    let body_size = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Ok(FrameHeader { body_size })
}

/// Decodes one message body (tag byte + payload) previously measured by a
/// [`FrameHeader`].
///
/// # Errors
///
/// Returns [`ProtocolError`] if the body is empty, carries an unknown tag,
/// or cannot be structurally parsed.
pub fn decode_body(body: &[u8]) -> Result<CoopMessage, ProtocolError> {
    let Some((&tag, payload)) = body.split_first() else {
        return Err(ProtocolError::Incomplete {
            needed: 1,
            available: 0,
        });
    };

    let case = PayloadCase::try_from(tag).map_err(|_| ProtocolError::UnknownPayloadCase(tag))?;
    decode_payload(case, payload)
}

/// Decodes one whole datagram: header plus exactly one body.
///
/// # Errors
///
/// In addition to header/body errors, fails with
/// [`ProtocolError::BodyLengthMismatch`] if the datagram length disagrees
/// with the header's declared size.
pub fn decode_datagram(bytes: &[u8]) -> Result<CoopMessage, ProtocolError> {
    let header = decode_header(bytes)?;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != header.body_size as usize {
        return Err(ProtocolError::BodyLengthMismatch {
            declared: header.body_size as usize,
            available: body.len(),
        });
    }
    decode_body(body)
}

/// Extracts the next complete frame from a stream buffer, draining the
/// consumed bytes.
///
/// Returns `Ok(None)` while the buffer holds less than a full frame — the
/// caller keeps appending and retries on the next readiness notification.
///
/// # Errors
///
/// An illegal header or malformed body is fatal for a stream: framing can
/// no longer be trusted, so the caller must close the connection.
pub fn split_frame(buf: &mut Vec<u8>) -> Result<Option<CoopMessage>, ProtocolError> {
    let header = match decode_header(buf) {
        Ok(h) => h,
        Err(ProtocolError::Incomplete { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };

    let total = HEADER_SIZE + header.body_size as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let msg = decode_body(&buf[HEADER_SIZE..total])?;
    buf.drain(..total);
    Ok(Some(msg))
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(buf: &mut Vec<u8>, msg: &CoopMessage) {
    match msg {
        CoopMessage::ScanRequest(m) => encode_scan(buf, &m.key, &m.device, m.pair_port),
        CoopMessage::ScanResponse(m) => encode_scan(buf, &m.key, &m.device, m.pair_port),
        CoopMessage::ServiceStopped { device_uuid } => write_string(buf, device_uuid),
        CoopMessage::PairRequest(m) => {
            write_string(buf, &m.key);
            encode_device_info(buf, &m.device);
        }
        CoopMessage::PairResponse(m) => {
            buf.push(m.accepted as u8);
            buf.push(m.reject_reason as u8);
        }
        CoopMessage::Ping | CoopMessage::Pong | CoopMessage::DeviceSharingStop => {}
        CoopMessage::ServiceStatus(m) => {
            buf.push(m.shared_clipboard as u8);
            buf.push(m.shared_devices as u8);
        }
        CoopMessage::DeviceSharingStart { direction } => buf.push(*direction as u8),
        CoopMessage::InputFlow(m) => {
            buf.push(m.direction as u8);
            buf.extend_from_slice(&m.x.to_be_bytes());
            buf.extend_from_slice(&m.y.to_be_bytes());
        }
        CoopMessage::ClipboardTargetsChanged { targets } => write_string_list(buf, targets),
        CoopMessage::ReadClipboardContent { target } => write_string(buf, target),
        CoopMessage::ClipboardContent(m) => {
            write_string(buf, &m.target);
            buf.extend_from_slice(&(m.data.len() as u32).to_be_bytes());
            buf.extend_from_slice(&m.data);
        }
        CoopMessage::FileTransferRequest(m) => {
            buf.extend_from_slice(&m.request_id.to_be_bytes());
            write_string_list(buf, &m.paths);
        }
        CoopMessage::FileTransferResponse(m) => {
            buf.extend_from_slice(&m.request_id.to_be_bytes());
            buf.push(m.accepted as u8);
        }
    }
}

fn encode_scan(buf: &mut Vec<u8>, key: &str, device: &DeviceInfo, pair_port: u16) {
    write_string(buf, key);
    encode_device_info(buf, device);
    buf.extend_from_slice(&pair_port.to_be_bytes());
}

fn encode_device_info(buf: &mut Vec<u8>, device: &DeviceInfo) {
    write_string(buf, &device.uuid);
    write_string(buf, &device.name);
    buf.push(device.os as u8);
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(case: PayloadCase, p: &[u8]) -> Result<CoopMessage, ProtocolError> {
    match case {
        PayloadCase::ScanRequest => {
            let (key, device, pair_port) = decode_scan(p)?;
            Ok(CoopMessage::ScanRequest(ScanRequestMessage {
                key,
                device,
                pair_port,
            }))
        }
        PayloadCase::ScanResponse => {
            let (key, device, pair_port) = decode_scan(p)?;
            Ok(CoopMessage::ScanResponse(ScanResponseMessage {
                key,
                device,
                pair_port,
            }))
        }
        PayloadCase::ServiceStopped => {
            let (device_uuid, _) = read_string(p, 0)?;
            Ok(CoopMessage::ServiceStopped { device_uuid })
        }
        PayloadCase::PairRequest => {
            let (key, off) = read_string(p, 0)?;
            let (device, _) = decode_device_info(p, off)?;
            Ok(CoopMessage::PairRequest(PairRequestMessage { key, device }))
        }
        PayloadCase::PairResponse => {
            require_len(p, 2, "PairResponse")?;
            let reject_reason = PairRejectReason::try_from(p[1]).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown reject reason: {}", p[1]))
            })?;
            Ok(CoopMessage::PairResponse(PairResponseMessage {
                accepted: p[0] != 0,
                reject_reason,
            }))
        }
        PayloadCase::Ping => Ok(CoopMessage::Ping),
        PayloadCase::Pong => Ok(CoopMessage::Pong),
        PayloadCase::ServiceStatus => {
            require_len(p, 2, "ServiceStatus")?;
            Ok(CoopMessage::ServiceStatus(ServiceStatusMessage {
                shared_clipboard: p[0] != 0,
                shared_devices: p[1] != 0,
            }))
        }
        PayloadCase::DeviceSharingStart => {
            require_len(p, 1, "DeviceSharingStart")?;
            Ok(CoopMessage::DeviceSharingStart {
                direction: read_direction(p[0])?,
            })
        }
        PayloadCase::DeviceSharingStop => Ok(CoopMessage::DeviceSharingStop),
        PayloadCase::InputFlow => {
            require_len(p, 5, "InputFlow")?;
            Ok(CoopMessage::InputFlow(InputFlowMessage {
                direction: read_direction(p[0])?,
                x: u16::from_be_bytes([p[1], p[2]]),
                y: u16::from_be_bytes([p[3], p[4]]),
            }))
        }
        PayloadCase::ClipboardTargetsChanged => {
            let (targets, _) = read_string_list(p, 0)?;
            Ok(CoopMessage::ClipboardTargetsChanged { targets })
        }
        PayloadCase::ReadClipboardContent => {
            let (target, _) = read_string(p, 0)?;
            Ok(CoopMessage::ReadClipboardContent { target })
        }
        PayloadCase::ClipboardContent => {
            let (target, off) = read_string(p, 0)?;
            require_len(p, off + 4, "ClipboardContent.len")?;
            let data_len =
                u32::from_be_bytes([p[off], p[off + 1], p[off + 2], p[off + 3]]) as usize;
            require_len(p, off + 4 + data_len, "ClipboardContent.data")?;
            let data = p[off + 4..off + 4 + data_len].to_vec();
            Ok(CoopMessage::ClipboardContent(ClipboardContentMessage {
                target,
                data,
            }))
        }
        PayloadCase::FileTransferRequest => {
            require_len(p, 4, "FileTransferRequest")?;
            let request_id = u32::from_be_bytes([p[0], p[1], p[2], p[3]]);
            let (paths, _) = read_string_list(p, 4)?;
            Ok(CoopMessage::FileTransferRequest(FileTransferRequestMessage {
                request_id,
                paths,
            }))
        }
        PayloadCase::FileTransferResponse => {
            require_len(p, 5, "FileTransferResponse")?;
            Ok(CoopMessage::FileTransferResponse(
                FileTransferResponseMessage {
                    request_id: u32::from_be_bytes([p[0], p[1], p[2], p[3]]),
                    accepted: p[4] != 0,
                },
            ))
        }
    }
}

fn decode_scan(p: &[u8]) -> Result<(String, DeviceInfo, u16), ProtocolError> {
    let (key, off) = read_string(p, 0)?;
    let (device, off) = decode_device_info(p, off)?;
    require_len(p, off + 2, "scan.pair_port")?;
    let pair_port = u16::from_be_bytes([p[off], p[off + 1]]);
    Ok((key, device, pair_port))
}

fn decode_device_info(p: &[u8], offset: usize) -> Result<(DeviceInfo, usize), ProtocolError> {
    let (uuid, off) = read_string(p, offset)?;
    let (name, off) = read_string(p, off)?;
    require_len(p, off + 1, "DeviceInfo.os")?;
    let os = DeviceOs::try_from(p[off])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown device os: {}", p[off])))?;
    Ok((DeviceInfo { uuid, name, os }, off + 1))
}

fn read_direction(byte: u8) -> Result<FlowDirection, ProtocolError> {
    FlowDirection::try_from(byte)
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown flow direction: {byte}")))
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize) as u16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&bytes[..len as usize]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

/// Writes a 2-byte count followed by that many length-prefixed strings.
fn write_string_list(buf: &mut Vec<u8>, items: &[String]) {
    let count = items.len().min(u16::MAX as usize) as u16;
    buf.extend_from_slice(&count.to_be_bytes());
    for item in &items[..count as usize] {
        write_string(buf, item);
    }
}

/// Reads a 2-byte count and then that many length-prefixed strings.
fn read_string_list(buf: &[u8], offset: usize) -> Result<(Vec<String>, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for list count at offset {offset}"
        )));
    }
    let count = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let mut items = Vec::with_capacity(count);
    let mut off = offset + 2;
    for _ in 0..count {
        let (item, next) = read_string(buf, off)?;
        items.push(item);
        off = next;
    }
    Ok((items, off))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
