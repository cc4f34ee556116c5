//! Infrastructure layer: sockets, peripheral ports, settings persistence,
//! and the external status bridge.

pub mod input_capture;
pub mod ipc_bridge;
pub mod network;
pub mod storage;
