//! The cooperation service: the daemon's single decision point.
//!
//! Every stimulus converges here — discovery datagrams, pairing verdicts,
//! session frames, edge crossings, and control-surface calls — and every
//! state mutation happens here, on one event loop behind the daemon's mutex.
//! The network and peripheral layers below stay mechanism-only; the service
//! owns the policy: who may pair, where input flows, who holds the
//! clipboard, and what gets persisted.
//!
//! The clipboard owner is tracked weakly, by uuid.  It is re-validated
//! against the registry on every content request, so a vanished owner can
//! never wedge the clipboard — the request just fails cleanly and the stale
//! owner is forgotten.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use coop_core::protocol::messages::{
    ClipboardContentMessage, FileTransferRequestMessage, FileTransferResponseMessage,
    PairRejectReason, PairRequestMessage, ServiceStatusMessage,
};
use coop_core::{CoopMessage, DeviceClass, DeviceInfo, FlowDirection};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::flow_router::InputFlowRouter;
use crate::application::machine::SessionState;
use crate::application::registry::MachineRegistry;
use crate::infrastructure::input_capture::LocalClipboard;
use crate::infrastructure::network::discovery::{
    handle_datagram, DatagramOutcome, DiscoveryEngine, DiscoveryError, SCAN_PORT,
};
use crate::infrastructure::network::pairing::{
    request_pairing, validate_pair_request, write_pair_response, PairError,
};
use crate::infrastructure::network::session::{spawn_session, SessionEvent, SESSION_TIMEOUT};
use crate::infrastructure::storage::settings::{Settings, SettingsStore};

/// Push-side of the daemon's externally visible state.
///
/// The service calls these whenever the machine list or a switch changes;
/// the bridge decides how to fan the updates out.
pub trait StateNotifier: Send + Sync {
    fn update_machines(&self, object_paths: &[String]);
    fn update_cooperated_machines(&self, ids: &[String]);
    fn update_device_sharing_switch(&self, enabled: bool);
    fn update_shared_clipboard(&self, enabled: bool);
    fn update_shared_devices(&self, enabled: bool);
    fn update_file_storage_path(&self, path: &Path);
}

/// Owns all cooperation state and policy.
pub struct CooperationService {
    identity: DeviceInfo,
    pair_port: u16,
    settings: Settings,
    store: Arc<dyn SettingsStore>,
    registry: MachineRegistry,
    flow_router: InputFlowRouter,
    clipboard: Arc<dyn LocalClipboard>,
    notifier: Arc<dyn StateNotifier>,
    discovery: DiscoveryEngine,
    session_events: mpsc::Sender<SessionEvent>,
    /// Master switch: while off, the daemon is invisible on the LAN.
    device_sharing_switch: bool,
    /// Uuid of the machine (or us) currently owning clipboard content.
    clipboard_owner: Option<String>,
    next_request_id: u32,
}

impl CooperationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: DeviceInfo,
        pair_port: u16,
        settings: Settings,
        store: Arc<dyn SettingsStore>,
        flow_router: InputFlowRouter,
        clipboard: Arc<dyn LocalClipboard>,
        notifier: Arc<dyn StateNotifier>,
        discovery: DiscoveryEngine,
        session_events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            identity,
            pair_port,
            settings,
            store,
            registry: MachineRegistry::new(),
            flow_router,
            clipboard,
            notifier,
            discovery,
            session_events,
            device_sharing_switch: true,
            clipboard_owner: None,
            next_request_id: 0,
        }
    }

    pub fn identity(&self) -> &DeviceInfo {
        &self.identity
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &MachineRegistry {
        &self.registry
    }

    pub fn device_sharing_switch(&self) -> bool {
        self.device_sharing_switch
    }

    /// Object paths of every known machine, ordered by index.
    pub fn get_machine_paths(&self) -> Vec<String> {
        self.registry.object_paths()
    }

    /// Pushes the complete current state through the notifier, for bridge
    /// startup.
    pub fn publish_state(&self) {
        self.notifier.update_machines(&self.registry.object_paths());
        self.notifier
            .update_cooperated_machines(&self.settings.cooperated_machine_ids);
        self.notifier
            .update_device_sharing_switch(self.device_sharing_switch);
        self.notifier
            .update_shared_clipboard(self.settings.shared_clipboard);
        self.notifier
            .update_shared_devices(self.settings.shared_devices);
        self.notifier
            .update_file_storage_path(&self.settings.files_storage_path);
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    /// Broadcasts a presence announcement.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the datagram cannot be sent.
    pub async fn scan(&self) -> Result<(), DiscoveryError> {
        self.discovery.announce().await
    }

    /// Directed re-probe of one known machine.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the datagram cannot be sent.
    pub async fn ping_machine(&self, uuid: &str) -> Result<(), DiscoveryError> {
        if let Some(machine) = self.registry.get(uuid) {
            self.discovery.ping(machine.ip, SCAN_PORT).await?;
        }
        Ok(())
    }

    /// Feeds one received discovery datagram through the handler.
    ///
    /// While the device-sharing switch is off the daemon ignores the
    /// discovery port entirely: no registration, no replies.
    pub async fn handle_discovery_datagram(&mut self, src: SocketAddr, bytes: &[u8]) {
        if !self.device_sharing_switch {
            return;
        }
        match handle_datagram(&self.identity, self.pair_port, &mut self.registry, src, bytes) {
            DatagramOutcome::Ignored => {}
            DatagramOutcome::Updated { reply } => {
                if let Some(reply) = reply {
                    if let Err(e) = self.discovery.reply(src, &reply).await {
                        warn!("scan reply to {src} failed: {e}");
                    }
                }
                self.notifier.update_machines(&self.registry.object_paths());
            }
            DatagramOutcome::Stopped { uuid } => {
                // Same teardown as a dead session: sharing state tied to the
                // machine must go with it.
                self.machine_offline(&uuid, "service stopped");
            }
        }
    }

    // ── Pairing ───────────────────────────────────────────────────────────────

    /// Initiates pairing with a discovered machine.
    ///
    /// On acceptance the stream becomes a session and the machine is
    /// recorded as cooperated.  On failure the machine drops back to
    /// `Disconnected` and stays discovered.
    ///
    /// # Errors
    ///
    /// Returns [`PairError`] from the handshake, or
    /// [`PairError::UnknownMachine`] if the uuid was never discovered.
    pub async fn connect_machine(&mut self, uuid: &str) -> Result<(), PairError> {
        let addr = {
            let Some(machine) = self.registry.get_mut(uuid) else {
                return Err(PairError::UnknownMachine(uuid.to_string()));
            };
            machine.state = SessionState::Connecting;
            SocketAddr::new(machine.ip, machine.pair_port)
        };

        match request_pairing(addr, &self.identity).await {
            Ok(stream) => {
                let handle = spawn_session(uuid.to_string(), stream, self.session_events.clone());
                if let Some(machine) = self.registry.get_mut(uuid) {
                    machine.on_pair(handle);
                    info!("paired with {} at {addr}", machine.name);
                }
                self.machine_cooperated(uuid);
                self.notifier.update_machines(&self.registry.object_paths());
                Ok(())
            }
            Err(e) => {
                if let Some(machine) = self.registry.get_mut(uuid) {
                    machine.state = SessionState::Disconnected;
                }
                Err(e)
            }
        }
    }

    /// Decides on an inbound pair request whose first frame was already read.
    ///
    /// The verdict is written back on the stream; an accepted stream is
    /// adopted as the machine's session, a rejected one is dropped.
    pub async fn handle_inbound_pairing(
        &mut self,
        mut stream: TcpStream,
        src: SocketAddr,
        request: PairRequestMessage,
    ) {
        match validate_pair_request(&self.registry, &request.key, &request.device) {
            Ok(uuid) => {
                if let Err(e) = write_pair_response(&mut stream, true, PairRejectReason::None).await
                {
                    warn!("pair accept to {src} failed: {e}");
                    return;
                }
                let handle = spawn_session(uuid.clone(), stream, self.session_events.clone());
                if let Some(machine) = self.registry.get_mut(&uuid) {
                    machine.on_pair(handle);
                    info!("accepted pairing from {} at {src}", machine.name);
                }
                self.machine_cooperated(&uuid);
                self.notifier.update_machines(&self.registry.object_paths());
            }
            Err(rejection) => {
                debug!("rejecting pair request from {src}: {rejection:?}");
                let _ = write_pair_response(&mut stream, false, rejection.reason()).await;
            }
        }
    }

    /// Closes the pairing with a machine; it stays discovered.
    pub fn disconnect_machine(&mut self, uuid: &str) {
        self.machine_offline(uuid, "disconnected locally");
    }

    // ── Device sharing and input flow ─────────────────────────────────────────

    /// Starts sharing input devices with a connected machine sitting on
    /// `direction` of the local screen.  Returns `false` when the machine
    /// is unknown or not connected.
    pub fn start_device_sharing(&mut self, uuid: &str, direction: FlowDirection) -> bool {
        let Some(machine) = self.registry.get_mut(uuid) else {
            return false;
        };
        if !machine.is_connected() {
            return false;
        }
        let starting = !machine.device_sharing;
        machine.device_sharing = true;
        machine.direction = Some(direction);
        // The peer claims the mirror edge of ours.
        machine.send(CoopMessage::DeviceSharingStart {
            direction: direction.opposite(),
        });
        info!("device sharing started with {} on {direction:?}", machine.name);
        if starting {
            self.flow_router.on_start_device_sharing();
        }
        true
    }

    /// Stops sharing input devices with a machine.
    pub fn stop_device_sharing(&mut self, uuid: &str) -> bool {
        let Some(machine) = self.registry.get_mut(uuid) else {
            return false;
        };
        if !machine.device_sharing {
            return false;
        }
        machine.device_sharing = false;
        machine.direction = None;
        machine.send(CoopMessage::DeviceSharingStop);
        self.flow_router.on_stop_device_sharing();
        true
    }

    /// The local cursor crossed a screen edge.  Returns `true` when the
    /// crossing was routed to a sharing machine.
    pub fn edge_crossed(&mut self, direction: FlowDirection, x: u16, y: u16) -> bool {
        self.flow_router.try_flow_out(
            &self.registry,
            direction,
            x,
            y,
            false,
            self.settings.shared_devices,
        )
    }

    // ── Clipboard ─────────────────────────────────────────────────────────────

    /// The local clipboard took new content; we are the owner now.
    pub fn local_clipboard_changed(&mut self, targets: Vec<String>) {
        self.clipboard_owner = Some(self.identity.uuid.clone());
        if !self.settings.shared_clipboard {
            return;
        }
        let msg = CoopMessage::ClipboardTargetsChanged { targets };
        for machine in self.registry.iter().filter(|m| m.is_connected()) {
            machine.send(msg.clone());
        }
    }

    /// Asks the current remote owner to transmit one clipboard target.
    ///
    /// Returns `false` when there is no remote owner, or the recorded owner
    /// is no longer connected — in which case the stale owner is dropped.
    pub fn request_clipboard_content(&mut self, target: &str) -> bool {
        let Some(owner) = self.clipboard_owner.clone() else {
            return false;
        };
        if owner == self.identity.uuid {
            // Local content needs no network fetch.
            return false;
        }
        match self.registry.get(&owner) {
            Some(machine) if machine.is_connected() => machine.send(
                CoopMessage::ReadClipboardContent {
                    target: target.to_string(),
                },
            ),
            _ => {
                debug!("clipboard owner {owner} vanished; dropping it");
                self.clipboard_owner = None;
                false
            }
        }
    }

    // ── File transfer ─────────────────────────────────────────────────────────

    /// Offers files to the connected machine of `class`.  Returns `false`
    /// when no such machine is connected.
    pub fn send_file(&mut self, paths: Vec<String>, class: DeviceClass) -> bool {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        match self.registry.find_connected_of_class(class) {
            Some(machine) => machine.send(CoopMessage::FileTransferRequest(
                FileTransferRequestMessage { request_id, paths },
            )),
            None => {
                debug!("no connected {class:?} machine to send files to");
                false
            }
        }
    }

    // ── Control surface ───────────────────────────────────────────────────────

    /// Flips the master device-sharing switch.
    ///
    /// Turning it off makes the daemon invisible: every connected machine
    /// gets one stop notification, the registry is cleared, and discovery
    /// traffic is ignored until the switch comes back on, at which point a
    /// fresh scan goes out.
    pub async fn set_device_sharing_switch(&mut self, enabled: bool) {
        if self.device_sharing_switch == enabled {
            return;
        }
        self.device_sharing_switch = enabled;

        if enabled {
            self.notifier.update_device_sharing_switch(true);
            if let Err(e) = self.discovery.announce().await {
                warn!("discovery announce failed: {e}");
            }
            return;
        }

        let machines = self.registry.drain();
        for machine in &machines {
            if machine.is_connected() {
                machine.send(CoopMessage::ServiceStopped {
                    device_uuid: self.identity.uuid.clone(),
                });
            }
            if machine.device_sharing {
                self.flow_router.on_stop_device_sharing();
            }
        }
        self.clipboard_owner = None;
        info!("device sharing switched off; {} machine(s) dropped", machines.len());
        self.notifier.update_device_sharing_switch(false);
        self.notifier.update_machines(&self.registry.object_paths());
    }

    /// Flips the clipboard-sharing switch, persists it, and tells peers.
    pub fn set_shared_clipboard(&mut self, enabled: bool) {
        if self.settings.shared_clipboard == enabled {
            return;
        }
        self.settings.shared_clipboard = enabled;
        self.persist();
        self.broadcast_service_status();
        self.notifier.update_shared_clipboard(enabled);
    }

    /// Flips the device-sharing switch for input flow, persists it, and
    /// tells peers.
    pub fn set_shared_devices(&mut self, enabled: bool) {
        if self.settings.shared_devices == enabled {
            return;
        }
        self.settings.shared_devices = enabled;
        self.persist();
        self.broadcast_service_status();
        self.notifier.update_shared_devices(enabled);
    }

    /// Points accepted file transfers at a new storage directory.
    pub fn set_file_storage_path(&mut self, path: PathBuf) {
        if self.settings.files_storage_path == path {
            return;
        }
        self.settings.files_storage_path = path;
        self.persist();
        self.notifier
            .update_file_storage_path(&self.settings.files_storage_path);
    }

    // ── Session events ────────────────────────────────────────────────────────

    /// Dispatches one event from a session's reader task.
    pub async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Frame { uuid, message } => self.handle_frame(&uuid, message).await,
            SessionEvent::Closed { uuid } => self.machine_offline(&uuid, "connection closed"),
            SessionEvent::Corrupt { uuid, error } => {
                warn!("session with {uuid} corrupted: {error}");
                self.machine_offline(&uuid, "stream corrupted");
            }
        }
    }

    /// Periodic maintenance: keep-alives out, silent sessions torn down.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let mut dead = Vec::new();
        for machine in self.registry.iter() {
            if !machine.is_connected() {
                continue;
            }
            if now.duration_since(machine.last_active) > SESSION_TIMEOUT {
                dead.push(machine.uuid.clone());
            } else {
                machine.send(CoopMessage::Ping);
            }
        }
        for uuid in dead {
            self.machine_offline(&uuid, "session timed out");
        }
    }

    /// Announces shutdown to peers before the process exits.
    pub async fn shutdown(&mut self) {
        for machine in self.registry.iter().filter(|m| m.is_connected()) {
            machine.send(CoopMessage::ServiceStopped {
                device_uuid: self.identity.uuid.clone(),
            });
        }
        if let Err(e) = self.discovery.send_service_stopped().await {
            warn!("shutdown broadcast failed: {e}");
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn handle_frame(&mut self, uuid: &str, message: CoopMessage) {
        {
            let Some(machine) = self.registry.get_mut(uuid) else {
                debug!("frame from unknown session {uuid}");
                return;
            };
            machine.touch();
        }

        match message {
            CoopMessage::Ping => {
                if let Some(machine) = self.registry.get(uuid) {
                    machine.send(CoopMessage::Pong);
                }
            }
            CoopMessage::Pong => {}
            CoopMessage::ServiceStatus(status) => {
                if let Some(machine) = self.registry.get_mut(uuid) {
                    machine.peer_shared_clipboard = status.shared_clipboard;
                    machine.peer_shared_devices = status.shared_devices;
                    debug!(
                        "{} now shares clipboard={} devices={}",
                        machine.name, status.shared_clipboard, status.shared_devices
                    );
                }
            }
            CoopMessage::DeviceSharingStart { direction } => {
                let Some(machine) = self.registry.get_mut(uuid) else {
                    return;
                };
                let starting = !machine.device_sharing;
                machine.device_sharing = true;
                machine.direction = Some(direction);
                info!("{} started device sharing on our {direction:?} edge", machine.name);
                if starting {
                    self.flow_router.on_start_device_sharing();
                }
            }
            CoopMessage::DeviceSharingStop => {
                let Some(machine) = self.registry.get_mut(uuid) else {
                    return;
                };
                let stopping = machine.device_sharing;
                machine.device_sharing = false;
                machine.direction = None;
                info!("{} stopped device sharing", machine.name);
                if stopping {
                    self.flow_router.on_stop_device_sharing();
                }
            }
            CoopMessage::InputFlow(m) => {
                if self.flow_router.is_flowing_out() {
                    // The peer returned control to us.
                    self.flow_router.on_flow_back(m.x, m.y);
                } else {
                    // The peer's cursor entered through the claimed edge;
                    // relay the event to the machine sitting there.
                    self.flow_router.try_flow_out(
                        &self.registry,
                        m.direction,
                        m.x,
                        m.y,
                        true,
                        self.settings.shared_devices,
                    );
                }
            }
            CoopMessage::ClipboardTargetsChanged { targets } => {
                self.clipboard_owner = Some(uuid.to_string());
                self.clipboard.announce_owner_targets(uuid, &targets).await;
            }
            CoopMessage::ReadClipboardContent { target } => {
                match self.clipboard.read_target(&target).await {
                    Some(data) => {
                        if let Some(machine) = self.registry.get(uuid) {
                            machine.send(CoopMessage::ClipboardContent(ClipboardContentMessage {
                                target,
                                data,
                            }));
                        }
                    }
                    None => debug!("no local clipboard content for target {target:?}"),
                }
            }
            CoopMessage::ClipboardContent(m) => {
                self.clipboard.write_target(&m.target, m.data).await;
            }
            CoopMessage::FileTransferRequest(m) => {
                info!(
                    "accepting {} file(s) from {uuid} into {}",
                    m.paths.len(),
                    self.settings.files_storage_path.display()
                );
                if let Some(machine) = self.registry.get(uuid) {
                    machine.send(CoopMessage::FileTransferResponse(
                        FileTransferResponseMessage {
                            request_id: m.request_id,
                            accepted: true,
                        },
                    ));
                }
            }
            CoopMessage::FileTransferResponse(m) => {
                info!(
                    "file offer {} was {} by {uuid}",
                    m.request_id,
                    if m.accepted { "accepted" } else { "declined" }
                );
            }
            other => {
                warn!(
                    "unexpected session message from {uuid}: {:?}",
                    std::mem::discriminant(&other)
                );
            }
        }
    }

    /// Shared teardown for closed, corrupted, and timed-out sessions.
    ///
    /// The machine is removed from the registry; a later discovery
    /// announcement re-registers it.  Any grabbing tied to it stops first.
    fn machine_offline(&mut self, uuid: &str, reason: &str) {
        let Some(machine) = self.registry.remove(uuid) else {
            return;
        };
        info!("{} went offline: {reason}", machine.name);
        if machine.device_sharing {
            self.flow_router.on_stop_device_sharing();
        }
        if self.clipboard_owner.as_deref() == Some(uuid) {
            self.clipboard_owner = None;
        }
        self.notifier.update_machines(&self.registry.object_paths());
    }

    fn machine_cooperated(&mut self, uuid: &str) {
        self.settings.record_cooperated(uuid);
        self.persist();
        self.notifier
            .update_cooperated_machines(&self.settings.cooperated_machine_ids);
    }

    fn broadcast_service_status(&self) {
        let msg = CoopMessage::ServiceStatus(ServiceStatusMessage {
            shared_clipboard: self.settings.shared_clipboard,
            shared_devices: self.settings.shared_devices,
        });
        for machine in self.registry.iter().filter(|m| m.is_connected()) {
            machine.send(msg.clone());
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.settings) {
            warn!("failed to persist settings: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
