//! UDP broadcast-based machine discovery.
//!
//! Every daemon binds the well-known scan port and both broadcasts its own
//! presence and answers the broadcasts of others.  A discovery datagram is a
//! complete protocol frame; anything that fails the header check, the shared
//! key check, or uuid validation is dropped without touching the registry —
//! the port is open to the whole LAN and unauthenticated, so hostile or
//! foreign traffic must be inert.
//!
//! The datagram handler itself is a pure function over the registry
//! ([`handle_datagram`]); the [`DiscoveryEngine`] only owns the socket and
//! the encode/send side.  This keeps the entire validation path unit-testable
//! without a network.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use coop_core::protocol::messages::{ScanRequestMessage, ScanResponseMessage};
use coop_core::{decode_datagram, encode_message, CoopMessage, DeviceInfo, SCAN_KEY};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::application::registry::MachineRegistry;

/// Well-known UDP port for discovery traffic.
pub const SCAN_PORT: u16 = 51595;

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// A datagram could not be sent.
    #[error("discovery send to {addr} failed: {source}")]
    SendFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// What a processed datagram did.
#[derive(Debug, PartialEq)]
pub enum DatagramOutcome {
    /// Dropped without effect (foreign, invalid, or self-originated).
    Ignored,
    /// The registry was updated; `reply` goes back to the source if set.
    Updated { reply: Option<CoopMessage> },
    /// A known peer announced shutdown.  The caller tears it down, so any
    /// sharing state tied to the machine is released with it.
    Stopped { uuid: String },
}

/// Processes one discovery datagram against the registry.
///
/// Validation order: frame decode, shared key, self-suppression, uuid
/// format.  A failure at any step drops the datagram; nothing here can fail
/// the engine.
pub fn handle_datagram(
    identity: &DeviceInfo,
    pair_port: u16,
    registry: &mut MachineRegistry,
    src: SocketAddr,
    bytes: &[u8],
) -> DatagramOutcome {
    let message = match decode_datagram(bytes) {
        Ok(message) => message,
        Err(e) => {
            debug!("dropping undecodable datagram from {src}: {e}");
            return DatagramOutcome::Ignored;
        }
    };

    match message {
        CoopMessage::ScanRequest(m) => {
            if !accept_scan(identity, &m.key, &m.device, src) {
                return DatagramOutcome::Ignored;
            }
            registry.upsert(src.ip(), m.pair_port, &m.device);
            let reply = CoopMessage::ScanResponse(ScanResponseMessage {
                key: SCAN_KEY.to_string(),
                device: identity.clone(),
                pair_port,
            });
            DatagramOutcome::Updated { reply: Some(reply) }
        }
        CoopMessage::ScanResponse(m) => {
            if !accept_scan(identity, &m.key, &m.device, src) {
                return DatagramOutcome::Ignored;
            }
            registry.upsert(src.ip(), m.pair_port, &m.device);
            DatagramOutcome::Updated { reply: None }
        }
        CoopMessage::ServiceStopped { device_uuid } => {
            if device_uuid == identity.uuid {
                return DatagramOutcome::Ignored;
            }
            match registry.get(&device_uuid) {
                Some(machine) => {
                    info!("{} ({}) stopped its service", machine.name, device_uuid);
                    DatagramOutcome::Stopped { uuid: device_uuid }
                }
                // Unknown uuid is a no-op, not an error.
                None => DatagramOutcome::Ignored,
            }
        }
        other => {
            warn!(
                "unexpected message on discovery port from {src}: {:?}",
                std::mem::discriminant(&other)
            );
            DatagramOutcome::Ignored
        }
    }
}

/// Shared validation for scan requests and responses.
fn accept_scan(identity: &DeviceInfo, key: &str, device: &DeviceInfo, src: SocketAddr) -> bool {
    if key != SCAN_KEY {
        debug!("dropping scan from {src}: key mismatch");
        return false;
    }
    if device.uuid == identity.uuid {
        // Our own broadcast looped back.
        return false;
    }
    if !device.has_valid_uuid() {
        warn!("dropping scan from {src}: invalid uuid {:?}", device.uuid);
        return false;
    }
    true
}

/// Owns the discovery socket and the outbound side of the protocol.
///
/// Cloning shares the underlying socket, so the daemon's receive task and
/// the cooperation service can hold the same engine.
#[derive(Clone)]
pub struct DiscoveryEngine {
    socket: Arc<UdpSocket>,
    identity: DeviceInfo,
    pair_port: u16,
}

impl DiscoveryEngine {
    /// Binds the well-known scan port with broadcast enabled.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::BindFailed`] if the port is taken or
    /// broadcast cannot be enabled; the daemon cannot run without it.
    pub async fn bind(identity: DeviceInfo, pair_port: u16) -> Result<Self, DiscoveryError> {
        Self::bind_on(SCAN_PORT, identity, pair_port).await
    }

    /// Binds an arbitrary UDP port; port 0 asks the OS for a free one.
    ///
    /// Tests use this to run many engines side by side.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::BindFailed`] on bind failure.
    pub async fn bind_on(
        port: u16,
        identity: DeviceInfo,
        pair_port: u16,
    ) -> Result<Self, DiscoveryError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        socket
            .set_broadcast(true)
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        info!("discovery listening on UDP {addr}");
        Ok(Self {
            socket: Arc::new(socket),
            identity,
            pair_port,
        })
    }

    /// Broadcasts a presence announcement to the whole LAN.
    pub async fn announce(&self) -> Result<(), DiscoveryError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), SCAN_PORT);
        self.send(addr, &self.scan_request()).await
    }

    /// Directed re-probe of one known machine at its advertised scan port.
    pub async fn ping(&self, ip: IpAddr, port: u16) -> Result<(), DiscoveryError> {
        let addr = SocketAddr::new(ip, port);
        self.send(addr, &self.scan_request()).await
    }

    /// Broadcasts that this daemon is shutting down, so peers forget it.
    pub async fn send_service_stopped(&self) -> Result<(), DiscoveryError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), SCAN_PORT);
        let msg = CoopMessage::ServiceStopped {
            device_uuid: self.identity.uuid.clone(),
        };
        self.send(addr, &msg).await
    }

    /// Unicasts `message` back to a datagram source.
    pub async fn reply(&self, to: SocketAddr, message: &CoopMessage) -> Result<(), DiscoveryError> {
        self.send(to, message).await
    }

    /// Receives one datagram; used by the daemon's receive task.
    pub async fn recv(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    /// The address the engine's socket actually bound.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn scan_request(&self) -> CoopMessage {
        CoopMessage::ScanRequest(ScanRequestMessage {
            key: SCAN_KEY.to_string(),
            device: self.identity.clone(),
            pair_port: self.pair_port,
        })
    }

    async fn send(&self, addr: SocketAddr, message: &CoopMessage) -> Result<(), DiscoveryError> {
        let bytes = encode_message(message);
        self.socket
            .send_to(&bytes, addr)
            .await
            .map(|_| ())
            .map_err(|source| DiscoveryError::SendFailed { addr, source })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use coop_core::DeviceOs;
    use uuid::Uuid;

    fn identity() -> DeviceInfo {
        DeviceInfo::new(Uuid::new_v4().to_string(), "local", DeviceOs::Linux)
    }

    fn peer() -> DeviceInfo {
        DeviceInfo::new(Uuid::new_v4().to_string(), "peer", DeviceOs::Linux)
    }

    fn src() -> SocketAddr {
        "192.168.1.20:51595".parse().unwrap()
    }

    fn scan_request(key: &str, device: &DeviceInfo, pair_port: u16) -> Vec<u8> {
        encode_message(&CoopMessage::ScanRequest(ScanRequestMessage {
            key: key.to_string(),
            device: device.clone(),
            pair_port,
        }))
    }

    #[test]
    fn test_scan_request_registers_peer_and_replies() {
        let me = identity();
        let other = peer();
        let mut registry = MachineRegistry::new();

        let outcome = handle_datagram(
            &me,
            40001,
            &mut registry,
            src(),
            &scan_request(SCAN_KEY, &other, 40002),
        );

        match outcome {
            DatagramOutcome::Updated { reply: Some(CoopMessage::ScanResponse(r)) } => {
                assert_eq!(r.device.uuid, me.uuid);
                assert_eq!(r.pair_port, 40001);
            }
            other => panic!("expected reply, got {other:?}"),
        }
        let machine = registry.get(&other.uuid).unwrap();
        assert_eq!(machine.ip, src().ip());
        assert_eq!(machine.pair_port, 40002);
    }

    #[test]
    fn test_key_mismatch_never_mutates_registry() {
        let me = identity();
        let mut registry = MachineRegistry::new();

        let outcome = handle_datagram(
            &me,
            40001,
            &mut registry,
            src(),
            &scan_request("wrong-key", &peer(), 40002),
        );

        assert_eq!(outcome, DatagramOutcome::Ignored);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_own_broadcast_is_suppressed() {
        let me = identity();
        let mut registry = MachineRegistry::new();

        let outcome = handle_datagram(
            &me,
            40001,
            &mut registry,
            src(),
            &scan_request(SCAN_KEY, &me, 40001),
        );

        assert_eq!(outcome, DatagramOutcome::Ignored);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_uuid_is_rejected() {
        let me = identity();
        let bogus = DeviceInfo::new("not-a-uuid", "evil", DeviceOs::Linux);
        let mut registry = MachineRegistry::new();

        let outcome = handle_datagram(
            &me,
            40001,
            &mut registry,
            src(),
            &scan_request(SCAN_KEY, &bogus, 40002),
        );

        assert_eq!(outcome, DatagramOutcome::Ignored);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_garbage_datagram_is_ignored() {
        let me = identity();
        let mut registry = MachineRegistry::new();

        let outcome = handle_datagram(&me, 40001, &mut registry, src(), b"not a frame");

        assert_eq!(outcome, DatagramOutcome::Ignored);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_scan_response_registers_without_reply() {
        let me = identity();
        let other = peer();
        let mut registry = MachineRegistry::new();
        let bytes = encode_message(&CoopMessage::ScanResponse(ScanResponseMessage {
            key: SCAN_KEY.to_string(),
            device: other.clone(),
            pair_port: 40002,
        }));

        let outcome = handle_datagram(&me, 40001, &mut registry, src(), &bytes);

        assert_eq!(outcome, DatagramOutcome::Updated { reply: None });
        assert!(registry.get(&other.uuid).is_some());
    }

    #[test]
    fn test_service_stopped_reports_known_peer_for_teardown() {
        let me = identity();
        let other = peer();
        let mut registry = MachineRegistry::new();
        registry.upsert(src().ip(), 40002, &other);

        let bytes = encode_message(&CoopMessage::ServiceStopped {
            device_uuid: other.uuid.clone(),
        });
        let outcome = handle_datagram(&me, 40001, &mut registry, src(), &bytes);

        assert_eq!(outcome, DatagramOutcome::Stopped { uuid: other.uuid.clone() });
        // Teardown is the caller's job; the handler leaves the entry alone.
        assert!(registry.get(&other.uuid).is_some());
    }

    #[test]
    fn test_service_stopped_for_unknown_uuid_is_noop() {
        let me = identity();
        let other = peer();
        let mut registry = MachineRegistry::new();
        registry.upsert(src().ip(), 40002, &other);

        let bytes = encode_message(&CoopMessage::ServiceStopped {
            device_uuid: Uuid::new_v4().to_string(),
        });
        let outcome = handle_datagram(&me, 40001, &mut registry, src(), &bytes);

        assert_eq!(outcome, DatagramOutcome::Ignored);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_ping_targets_the_given_port() {
        let me = identity();
        let probed = peer();
        let prober = DiscoveryEngine::bind_on(0, me.clone(), 40001).await.unwrap();
        let target = DiscoveryEngine::bind_on(0, probed, 40002).await.unwrap();
        let port = target.local_addr().unwrap().port();

        prober
            .ping("127.0.0.1".parse().unwrap(), port)
            .await
            .unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            target.recv(&mut buf).await
        })
        .await
        .expect("ping must arrive on the target's own port")
        .unwrap();
        match coop_core::decode_datagram(&buf[..n]).unwrap() {
            CoopMessage::ScanRequest(m) => assert_eq!(m.device.uuid, me.uuid),
            other => panic!("expected scan request, got {other:?}"),
        }
    }

    #[test]
    fn test_session_message_on_discovery_port_is_ignored() {
        let me = identity();
        let mut registry = MachineRegistry::new();
        let bytes = encode_message(&CoopMessage::Ping);

        let outcome = handle_datagram(&me, 40001, &mut registry, src(), &bytes);

        assert_eq!(outcome, DatagramOutcome::Ignored);
    }
}
