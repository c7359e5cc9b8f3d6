//! The Cadence time-management engine.
//!
//! Everything in this crate is deterministic and transport-free: the
//! [`kernel::FederateKernel`] is the federate-side core (directory replica,
//! inbound queues, LBTS observation and the advance-grant state machine), the
//! [`coordinator::Coordinator`] is the server-side core (authoritative
//! directory, routing, membership handshakes). The tokio shell in
//! `cadence_rti` moves [`proto`] messages between them.
#![deny(clippy::all)]

pub mod catalog;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod events;
pub mod kernel;
pub mod lbts;
pub mod proto;
pub mod queue;
pub mod timeline;

pub use catalog::{InteractionClassDef, ObjectClassDef, ObjectModel};
pub use coordinator::Coordinator;
pub use error::FedError;
pub use events::{FedCallback, ReceiveInfo};
pub use kernel::FederateKernel;
pub use proto::{
    DownstreamMsg, JoinSnapshot, MessageBody, OrderType, ResignAction, UpstreamMsg,
};

#[cfg(test)]
mod tests;
