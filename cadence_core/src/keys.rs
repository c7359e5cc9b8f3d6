//! Handle types for the entities a federation keeps in its arena tables.

use serde::{Deserialize, Serialize};

use crate::handle_type;

handle_type! {
    /// A joined federate. Stable across the federate's lifetime.
    pub FederateHandle
}

handle_type! {
    /// An object class from the federation's object model.
    pub ObjectClassHandle
}

handle_type! {
    /// An attribute of an object class.
    pub AttributeHandle
}

handle_type! {
    /// An interaction class from the federation's object model.
    pub InteractionClassHandle
}

handle_type! {
    /// A parameter of an interaction class.
    pub ParameterHandle
}

/// A registered object instance.
///
/// Minted by the registering federate from its own serial space, so
/// registration never waits on the network for a handle assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectInstanceHandle {
    pub registrant: FederateHandle,
    pub serial: u64,
}

impl std::fmt::Display for ObjectInstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.registrant, self.serial)
    }
}

/// Names one specific in-flight timestamped message; unique per sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RetractionHandle {
    pub federate: FederateHandle,
    pub serial: u64,
}

impl std::fmt::Display for RetractionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.federate, self.serial)
    }
}
