//! Device domain types shared by discovery, pairing, and the registry.

pub mod device;

pub use device::{DeviceClass, DeviceInfo, DeviceOs};
