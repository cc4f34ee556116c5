//! The machine registry: the daemon's in-memory database of every peer it
//! has discovered, keyed by announced uuid.
//!
//! Re-announcements are idempotent: `upsert` refreshes the address, name,
//! and liveness of an existing entry but never disturbs its index or
//! connection state.  At most one machine per device class may be connected
//! at a time; the class queries here are what the pairing engine consults to
//! enforce that.

use std::collections::HashMap;
use std::net::IpAddr;

use coop_core::{DeviceClass, DeviceInfo};

use crate::application::machine::Machine;

/// In-memory registry of all known machines.
///
/// Lives behind the cooperation service's mutex; every mutation happens on
/// the service's event loop, so no interior locking is needed here.
#[derive(Default)]
pub struct MachineRegistry {
    machines: HashMap<String, Machine>,
    next_index: u32,
}

impl MachineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly discovered machine or refreshes an existing one.
    ///
    /// A new entry gets the next per-process index.  A refresh updates only
    /// the address, pairing port, name, and liveness stamp — index and
    /// connection state are preserved so a re-announcement can never knock
    /// a paired machine offline.
    pub fn upsert(&mut self, ip: IpAddr, pair_port: u16, device: &DeviceInfo) -> &mut Machine {
        match self.machines.entry(device.uuid.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                let machine = entry.into_mut();
                machine.ip = ip;
                machine.pair_port = pair_port;
                machine.name = device.name.clone();
                machine.os = device.os;
                machine.touch();
                machine
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                let index = self.next_index;
                self.next_index += 1;
                entry.insert(Machine::new(index, ip, pair_port, device))
            }
        }
    }

    pub fn get(&self, uuid: &str) -> Option<&Machine> {
        self.machines.get(uuid)
    }

    pub fn get_mut(&mut self, uuid: &str) -> Option<&mut Machine> {
        self.machines.get_mut(uuid)
    }

    /// Removes a machine, returning it if it existed.
    pub fn remove(&mut self, uuid: &str) -> Option<Machine> {
        self.machines.remove(uuid)
    }

    /// Whether any machine of the given class is currently connected.
    pub fn has_connected_of_class(&self, class: DeviceClass) -> bool {
        self.machines
            .values()
            .any(|m| m.is_connected() && m.device_class() == class)
    }

    /// Returns the connected machine of the given class, if any.
    ///
    /// The single-pairing-per-class invariant means there is at most one;
    /// the first match is returned.
    pub fn find_connected_of_class(&self, class: DeviceClass) -> Option<&Machine> {
        debug_assert!(
            self.machines
                .values()
                .filter(|m| m.is_connected() && m.device_class() == class)
                .count()
                <= 1,
            "more than one connected machine of class {class:?}"
        );
        self.machines
            .values()
            .find(|m| m.is_connected() && m.device_class() == class)
    }

    pub fn find_connected_of_class_mut(&mut self, class: DeviceClass) -> Option<&mut Machine> {
        self.machines
            .values_mut()
            .find(|m| m.is_connected() && m.device_class() == class)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Machine> {
        self.machines.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Machine> {
        self.machines.values_mut()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Removes every machine, returning them for teardown notifications.
    pub fn drain(&mut self) -> Vec<Machine> {
        self.machines.drain().map(|(_, m)| m).collect()
    }

    /// Snapshot of object paths for the status bridge, ordered by index.
    pub fn object_paths(&self) -> Vec<String> {
        let mut machines: Vec<&Machine> = self.machines.values().collect();
        machines.sort_by_key(|m| m.index);
        machines.iter().map(|m| m.object_path()).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
