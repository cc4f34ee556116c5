//! Status bridge: read-only snapshots of daemon state for external
//! observers, plus the notifier that publishes changes.
//!
//! The daemon exports each machine under a stable object path
//! (`/org/lancoop/MachineN`).  A control surface holds a [`DaemonState`] and
//! asks it for snapshots; the [`LoggingNotifier`] is the default push side,
//! writing every state change to the structured log so `journalctl` shows
//! the same history a richer bridge would publish.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::application::cooperation::{CooperationService, StateNotifier};
use crate::application::machine::{Machine, SessionState};

/// Shared handle to the daemon's single service instance.
#[derive(Clone)]
pub struct DaemonState {
    service: Arc<Mutex<CooperationService>>,
}

/// Wire-friendly snapshot of one machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineDto {
    pub uuid: String,
    pub name: String,
    pub os: String,
    pub ip: String,
    pub state: String,
    pub direction: Option<String>,
    pub device_sharing: bool,
    pub object_path: String,
}

impl From<&Machine> for MachineDto {
    fn from(machine: &Machine) -> Self {
        let state = match machine.state {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        };
        Self {
            uuid: machine.uuid.clone(),
            name: machine.name.clone(),
            os: format!("{:?}", machine.os),
            ip: machine.ip.to_string(),
            state: state.to_string(),
            direction: machine.direction.map(|d| format!("{d:?}")),
            device_sharing: machine.device_sharing,
            object_path: machine.object_path(),
        }
    }
}

/// Snapshot of the daemon's switches and storage path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDto {
    pub machine_id: String,
    pub device_sharing_switch: bool,
    pub shared_clipboard: bool,
    pub shared_devices: bool,
    pub files_storage_path: String,
    pub cooperated_machine_ids: Vec<String>,
}

impl DaemonState {
    pub fn new(service: Arc<Mutex<CooperationService>>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<Mutex<CooperationService>> {
        &self.service
    }

    /// Snapshot of every known machine, ordered by index.
    pub async fn machines(&self) -> Vec<MachineDto> {
        let service = self.service.lock().await;
        let mut machines: Vec<&Machine> = service.registry().iter().collect();
        machines.sort_by_key(|m| m.index);
        machines.into_iter().map(MachineDto::from).collect()
    }

    /// Snapshot of the switches and settings.
    pub async fn status(&self) -> StatusDto {
        let service = self.service.lock().await;
        let settings = service.settings();
        StatusDto {
            machine_id: service.identity().uuid.clone(),
            device_sharing_switch: service.device_sharing_switch(),
            shared_clipboard: settings.shared_clipboard,
            shared_devices: settings.shared_devices,
            files_storage_path: settings.files_storage_path.display().to_string(),
            cooperated_machine_ids: settings.cooperated_machine_ids.clone(),
        }
    }
}

/// Notifier that publishes state changes to the structured log.
#[derive(Default)]
pub struct LoggingNotifier;

impl StateNotifier for LoggingNotifier {
    fn update_machines(&self, object_paths: &[String]) {
        info!("machines changed: {object_paths:?}");
    }

    fn update_cooperated_machines(&self, ids: &[String]) {
        info!("cooperated machines: {ids:?}");
    }

    fn update_device_sharing_switch(&self, enabled: bool) {
        info!("device sharing switch: {enabled}");
    }

    fn update_shared_clipboard(&self, enabled: bool) {
        info!("shared clipboard: {enabled}");
    }

    fn update_shared_devices(&self, enabled: bool) {
        info!("shared devices: {enabled}");
    }

    fn update_file_storage_path(&self, path: &Path) {
        info!("file storage path: {}", path.display());
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
