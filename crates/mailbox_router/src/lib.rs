//! Device mailboxes and the routing fabric that makes them addressable from
//! any node in the fleet.
//!
//! A device's mailbox lives on whichever node holds its connection. The
//! fleet-wide [`RoutingTable`] records that ownership under a lease, the
//! [`FabricTransport`] carries requests between nodes, the [`Outbox`] is the
//! send side and the [`RoutingServer`] is the receive side of each node.

mod config;
mod error;
mod fabric;
mod mailbox;
mod nats;
mod node;
mod outbox;
mod registry;
mod router;
mod routing_table;
mod server;

pub use config::*;
pub use error::*;
pub use fabric::*;
pub use mailbox::*;
pub use nats::*;
pub use node::*;
pub use outbox::*;
pub use registry::*;
pub use router::*;
pub use routing_table::*;
pub use server::*;
