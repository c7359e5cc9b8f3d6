//! The top-level wire message: federation lifecycle plus the in-federation
//! vocabulary from `cadence_federation::proto`.

use serde::{Deserialize, Serialize};

use cadence_core::TimeKind;
use cadence_federation::{
    proto::{DownstreamMsg, JoinSnapshot, UpstreamMsg},
    FedError, ObjectModel,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RtiMsg {
    // -- lifecycle, client to server --
    CreateFederation {
        federation: String,
        model: ObjectModel,
        time_kind: TimeKind,
    },
    DestroyFederation {
        federation: String,
    },
    ListFederations,
    Join {
        federation: String,
        federate_type: String,
        federate_name: Option<String>,
    },

    // -- lifecycle replies --
    Ack,
    FederationList(Vec<String>),
    Joined(Box<JoinSnapshot>),
    Error(FedError),

    // -- in-federation traffic --
    Up(UpstreamMsg),
    Down(DownstreamMsg),
}
