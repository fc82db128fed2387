//! WebSocket fan-out
//!
//! Every authenticated connection joins one group. Anything a member sends is
//! relayed to every member:
//! - the gate turns the first frame into an identity;
//! - the hub owns membership and fans payloads out to per-client queues;
//! - the pump moves frames between a queue and the socket, with heartbeats.

pub mod frame;
mod gate;
mod handler;
pub mod hub;
mod pump;

#[cfg(test)]
mod e2e_tests;

pub use frame::split_socket;
pub use handler::{ConnectionContext, ConnectionOutcome, handle_connection};
pub use hub::{Hub, HubHandle};
