//! The Machine entity: everything the daemon knows about one peer.
//!
//! A machine is born from discovery traffic and lives in the
//! [`MachineRegistry`](crate::application::registry::MachineRegistry).  Its
//! connection progresses through [`SessionState`]:
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//! ```
//!
//! - `Disconnected`: discovered; no pairing stream.
//! - `Connecting`: an outbound pair request is in flight (drops back to
//!   `Disconnected` when the handshake fails).
//! - `Connected`: a paired session is open and traffic flows.
//!
//! A connected machine that goes offline is removed from the registry
//! outright; the next discovery announcement re-registers it.
//!
//! The per-process `index` is assigned once at first sight and survives
//! re-announcements, so the exported object path stays stable for external
//! observers even as the peer's address changes.

use std::net::IpAddr;
use std::time::Instant;

use coop_core::{DeviceClass, DeviceInfo, DeviceOs, FlowDirection};

use crate::infrastructure::network::session::SessionHandle;

/// Connection lifecycle state of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Runtime state for one discovered peer.
#[derive(Debug)]
pub struct Machine {
    /// Globally unique identifier announced by the peer.
    pub uuid: String,
    /// Display name announced by the peer.
    pub name: String,
    pub os: DeviceOs,
    /// Address the last discovery datagram arrived from.
    pub ip: IpAddr,
    /// TCP port the peer's pairing listener is bound to.
    pub pair_port: u16,
    /// Stable per-process index used to build the object path.
    pub index: u32,
    pub state: SessionState,
    /// Edge this machine sits on while device sharing is active.
    pub direction: Option<FlowDirection>,
    /// Whether device sharing is currently running with this machine.
    pub device_sharing: bool,
    /// The peer's advertised sharing switches.
    pub peer_shared_clipboard: bool,
    pub peer_shared_devices: bool,
    /// Stamped on every valid inbound frame or discovery refresh.
    pub last_active: Instant,
    /// Owned connection handle once paired.
    pub session: Option<SessionHandle>,
}

impl Machine {
    pub fn new(index: u32, ip: IpAddr, pair_port: u16, device: &DeviceInfo) -> Self {
        Self {
            uuid: device.uuid.clone(),
            name: device.name.clone(),
            os: device.os,
            ip,
            pair_port,
            index,
            state: SessionState::Disconnected,
            direction: None,
            device_sharing: false,
            peer_shared_clipboard: false,
            peer_shared_devices: false,
            last_active: Instant::now(),
            session: None,
        }
    }

    /// Object path exported over the status bridge, stable per process.
    pub fn object_path(&self) -> String {
        format!("/org/lancoop/Machine{}", self.index)
    }

    /// Pairing class this machine competes for.
    pub fn device_class(&self) -> DeviceClass {
        self.os.device_class()
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Refreshes the liveness stamp.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Adopts a paired session: the machine is now connected.
    pub fn on_pair(&mut self, session: SessionHandle) {
        self.session = Some(session);
        self.state = SessionState::Connected;
        self.touch();
    }

    /// Queues a message on the paired session.  Returns `false` when there
    /// is no live session.
    pub fn send(&self, message: coop_core::CoopMessage) -> bool {
        match &self.session {
            Some(session) => session.send(message),
            None => false,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
