//! TCP pairing: the handshake that turns a discovered machine into a
//! connected one.
//!
//! The listener binds an OS-assigned port, advertised to peers through the
//! discovery scan messages.  An inbound connection must open with exactly one
//! `PairRequest` frame; the request is validated in a fixed order — shared
//! key, then known-uuid, then class-busy — and the verdict goes back as a
//! `PairResponse` before the stream is either adopted as a session or
//! closed.  Validation itself ([`validate_pair_request`]) is a pure function
//! over the registry, so the single-pairing-per-class invariant is testable
//! without sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use coop_core::protocol::messages::{
    PairRejectReason, PairRequestMessage, PairResponseMessage,
};
use coop_core::{encode_message, split_frame, CoopMessage, DeviceInfo, ProtocolError, SCAN_KEY};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::application::registry::MachineRegistry;

/// An inbound connection that never completes its first frame is cut off.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for pairing operations.
#[derive(Debug, Error)]
pub enum PairError {
    /// The TCP listener could not be bound.
    #[error("failed to bind pairing listener on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// Could not reach the peer's pairing listener.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// Stream I/O failed mid-handshake.
    #[error("pairing I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer sent bytes that do not frame or decode.
    #[error("pairing protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The peer closed before completing the handshake.
    #[error("connection closed before handshake completed")]
    ClosedEarly,
    /// The handshake did not complete within [`HANDSHAKE_TIMEOUT`].
    #[error("handshake timed out")]
    Timeout,
    /// The peer sent something other than the expected handshake frame.
    #[error("unexpected handshake message")]
    UnexpectedMessage,
    /// The peer turned the pair request down.
    #[error("pairing rejected: {0:?}")]
    Rejected(PairRejectReason),
    /// Asked to pair with a uuid that was never discovered.
    #[error("machine {0} is not known")]
    UnknownMachine(String),
}

/// Why an inbound pair request was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairRejection {
    /// The shared key did not match.
    KeyMismatch,
    /// The initiator was never discovered here.
    UnknownDevice,
    /// A machine of the initiator's class is already connected.
    DeviceBusy,
}

impl PairRejection {
    pub fn reason(self) -> PairRejectReason {
        match self {
            PairRejection::KeyMismatch => PairRejectReason::KeyMismatch,
            PairRejection::UnknownDevice => PairRejectReason::UnknownDevice,
            PairRejection::DeviceBusy => PairRejectReason::DeviceBusy,
        }
    }
}

/// Validates an inbound pair request against the registry.
///
/// Check order is fixed: key, known-uuid, class-busy.  On success returns
/// the uuid of the registry machine the stream belongs to.
///
/// # Errors
///
/// Returns the [`PairRejection`] to send back before closing.
pub fn validate_pair_request(
    registry: &MachineRegistry,
    key: &str,
    device: &DeviceInfo,
) -> Result<String, PairRejection> {
    if key != SCAN_KEY {
        return Err(PairRejection::KeyMismatch);
    }
    if registry.get(&device.uuid).is_none() {
        return Err(PairRejection::UnknownDevice);
    }
    if registry.has_connected_of_class(device.os.device_class()) {
        return Err(PairRejection::DeviceBusy);
    }
    Ok(device.uuid.clone())
}

/// The pairing listener, bound to an OS-assigned port.
pub struct PairListener {
    listener: TcpListener,
}

impl PairListener {
    /// Binds on port 0 and returns the listener plus the assigned port,
    /// which discovery advertises to peers.
    ///
    /// # Errors
    ///
    /// Returns [`PairError::BindFailed`]; the daemon cannot run without the
    /// listener.
    pub async fn bind() -> Result<(Self, u16), PairError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| PairError::BindFailed { addr, source })?;
        let port = listener
            .local_addr()
            .map_err(|source| PairError::BindFailed { addr, source })?
            .port();
        info!("pairing listener on TCP port {port}");
        Ok((Self { listener }, port))
    }

    /// Accepts one inbound connection.
    pub async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }
}

/// Reads the opening `PairRequest` from a fresh inbound stream.
///
/// Buffers until one full frame is available; a partial frame just waits
/// for more bytes, bounded by [`HANDSHAKE_TIMEOUT`].
///
/// # Errors
///
/// Fails on timeout, early close, framing corruption, or a first frame
/// that is not a `PairRequest`.
pub async fn read_pair_request(stream: &mut TcpStream) -> Result<PairRequestMessage, PairError> {
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_one_frame(stream)).await {
        Ok(Ok(CoopMessage::PairRequest(request))) => Ok(request),
        Ok(Ok(_)) => Err(PairError::UnexpectedMessage),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(PairError::Timeout),
    }
}

/// Writes the accept/reject verdict back to the initiator.
pub async fn write_pair_response(
    stream: &mut TcpStream,
    accepted: bool,
    reject_reason: PairRejectReason,
) -> Result<(), PairError> {
    let bytes = encode_message(&CoopMessage::PairResponse(PairResponseMessage {
        accepted,
        reject_reason,
    }));
    stream.write_all(&bytes).await?;
    Ok(())
}

/// Outbound pairing: connects to a peer's listener and runs the handshake.
///
/// On acceptance the raw stream is returned for session adoption.
///
/// # Errors
///
/// [`PairError::Rejected`] carries the peer's reason; connection and
/// protocol failures map to their respective variants.
pub async fn request_pairing(
    addr: SocketAddr,
    identity: &DeviceInfo,
) -> Result<TcpStream, PairError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|source| PairError::ConnectFailed { addr, source })?;

    let request = encode_message(&CoopMessage::PairRequest(PairRequestMessage {
        key: SCAN_KEY.to_string(),
        device: identity.clone(),
    }));
    stream.write_all(&request).await?;

    let response = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_one_frame(&mut stream)).await
    {
        Ok(Ok(CoopMessage::PairResponse(response))) => response,
        Ok(Ok(_)) => return Err(PairError::UnexpectedMessage),
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(PairError::Timeout),
    };

    if !response.accepted {
        debug!("pairing with {addr} rejected: {:?}", response.reject_reason);
        return Err(PairError::Rejected(response.reject_reason));
    }
    Ok(stream)
}

/// Accumulates bytes until exactly one frame decodes.
async fn read_one_frame(stream: &mut TcpStream) -> Result<CoopMessage, PairError> {
    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(message) = split_frame(&mut buf)? {
            return Ok(message);
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(PairError::ClosedEarly);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::session::SessionHandle;
    use coop_core::DeviceOs;
    use uuid::Uuid;

    fn device(os: DeviceOs) -> DeviceInfo {
        DeviceInfo::new(Uuid::new_v4().to_string(), "peer", os)
    }

    fn registry_with(devices: &[&DeviceInfo]) -> MachineRegistry {
        let mut registry = MachineRegistry::new();
        for dev in devices {
            registry.upsert("192.168.1.20".parse().unwrap(), 4000, dev);
        }
        registry
    }

    #[test]
    fn test_validate_accepts_discovered_machine() {
        let dev = device(DeviceOs::Linux);
        let registry = registry_with(&[&dev]);
        assert_eq!(
            validate_pair_request(&registry, SCAN_KEY, &dev),
            Ok(dev.uuid.clone())
        );
    }

    #[test]
    fn test_validate_checks_key_before_anything_else() {
        // Even a known machine with a busy class fails on the key first.
        let dev = device(DeviceOs::Linux);
        let registry = registry_with(&[&dev]);
        assert_eq!(
            validate_pair_request(&registry, "bad-key", &dev),
            Err(PairRejection::KeyMismatch)
        );
    }

    #[test]
    fn test_validate_rejects_undiscovered_machine() {
        let registry = MachineRegistry::new();
        assert_eq!(
            validate_pair_request(&registry, SCAN_KEY, &device(DeviceOs::Linux)),
            Err(PairRejection::UnknownDevice)
        );
    }

    #[test]
    fn test_validate_rejects_second_machine_of_same_class() {
        let first = device(DeviceOs::Linux);
        let second = device(DeviceOs::Windows); // same Pc class
        let mut registry = registry_with(&[&first, &second]);
        let (handle, _rx) = SessionHandle::detached();
        registry.get_mut(&first.uuid).unwrap().on_pair(handle);

        assert_eq!(
            validate_pair_request(&registry, SCAN_KEY, &second),
            Err(PairRejection::DeviceBusy)
        );
        // The existing pairing is untouched.
        assert!(registry.get(&first.uuid).unwrap().is_connected());
    }

    #[test]
    fn test_validate_allows_other_class_while_one_is_busy() {
        let pc = device(DeviceOs::Linux);
        let phone = device(DeviceOs::Android);
        let mut registry = registry_with(&[&pc, &phone]);
        let (handle, _rx) = SessionHandle::detached();
        registry.get_mut(&pc.uuid).unwrap().on_pair(handle);

        assert_eq!(
            validate_pair_request(&registry, SCAN_KEY, &phone),
            Ok(phone.uuid.clone())
        );
    }

    #[test]
    fn test_rejection_maps_to_wire_reason() {
        assert_eq!(
            PairRejection::KeyMismatch.reason(),
            PairRejectReason::KeyMismatch
        );
        assert_eq!(
            PairRejection::UnknownDevice.reason(),
            PairRejectReason::UnknownDevice
        );
        assert_eq!(
            PairRejection::DeviceBusy.reason(),
            PairRejectReason::DeviceBusy
        );
    }

    #[tokio::test]
    async fn test_bind_returns_usable_port() {
        let (_listener, port) = PairListener::bind().await.unwrap();
        assert_ne!(port, 0);
    }

    #[tokio::test]
    async fn test_handshake_accepted_over_real_sockets() {
        let (listener, port) = PairListener::bind().await.unwrap();
        let initiator = device(DeviceOs::Linux);
        let initiator_clone = initiator.clone();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_pair_request(&mut stream).await.unwrap();
            assert_eq!(request.key, SCAN_KEY);
            assert_eq!(request.device.uuid, initiator_clone.uuid);
            write_pair_response(&mut stream, true, PairRejectReason::None)
                .await
                .unwrap();
        });

        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let stream = request_pairing(addr, &initiator).await;
        assert!(stream.is_ok());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_rejection_surfaces_reason() {
        let (listener, port) = PairListener::bind().await.unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_pair_request(&mut stream).await.unwrap();
            write_pair_response(&mut stream, false, PairRejectReason::DeviceBusy)
                .await
                .unwrap();
        });

        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let result = request_pairing(addr, &device(DeviceOs::Linux)).await;
        assert!(matches!(
            result,
            Err(PairError::Rejected(PairRejectReason::DeviceBusy))
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_handshake_first_frame_is_rejected() {
        let (listener, port) = PairListener::bind().await.unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_pair_request(&mut stream).await
        });

        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&encode_message(&CoopMessage::Ping))
            .await
            .unwrap();

        let result = server.await.unwrap();
        assert!(matches!(result, Err(PairError::UnexpectedMessage)));
    }

    #[tokio::test]
    async fn test_early_close_is_reported() {
        let (listener, port) = PairListener::bind().await.unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_pair_request(&mut stream).await
        });

        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        drop(stream);

        let result = server.await.unwrap();
        assert!(matches!(result, Err(PairError::ClosedEarly)));
    }
}
