//! Network infrastructure: UDP discovery, TCP pairing, and paired sessions.

pub mod discovery;
pub mod pairing;
pub mod session;
