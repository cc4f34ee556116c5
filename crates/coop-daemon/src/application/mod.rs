//! Application layer: machine registry, cooperation service, and input flow
//! routing.
//!
//! This layer owns the daemon's state and every state transition.  It depends
//! only on `coop-core` types and on the ports declared at the infrastructure
//! seams; sockets, files, and OS peripherals never appear here directly.

pub mod cooperation;
pub mod flow_router;
pub mod machine;
pub mod registry;
