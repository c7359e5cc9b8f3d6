//! The in-federation wire vocabulary spoken between a federate kernel and the
//! federation server.
//!
//! Logical times travel as [`TimeBytes`] (the algebra's little-endian codec)
//! so one message enum serves both time kinds; each endpoint decodes with the
//! kind its federation was created with.

use serde::{Deserialize, Serialize};

use cadence_core::{
    AttributeHandle, FederateHandle, InteractionClassHandle, ObjectClassHandle,
    ObjectInstanceHandle, ParameterHandle, RetractionHandle, TimeBytes, TimePosition,
};

use crate::catalog::ObjectModel;

/// An opaque user-supplied tag, passed through to receivers untouched.
pub type UserTag = Vec<u8>;

/// Delivery-order classification, used both for the order a message was sent
/// with and the order it was actually received in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Receive,
    TimeStamp,
}

/// What a routed message does at its recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    UpdateAttributes {
        object: ObjectInstanceHandle,
        values: Vec<(AttributeHandle, Vec<u8>)>,
    },
    Interaction {
        class: InteractionClassHandle,
        parameters: Vec<(ParameterHandle, Vec<u8>)>,
    },
    DeleteObject {
        object: ObjectInstanceHandle,
    },
}

/// One routed message. `timestamp` is present iff `sent_order` is
/// [`OrderType::TimeStamp`]; `sent_serial` is the sender's monotone send
/// counter, the final tie-break of TSO delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub sender: FederateHandle,
    pub body: MessageBody,
    pub tag: UserTag,
    pub sent_order: OrderType,
    pub timestamp: Option<TimeBytes>,
    pub retraction: Option<RetractionHandle>,
    pub sent_serial: u64,
}

/// A federate's replicated time-management state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederateStatus {
    pub regulating: bool,
    pub constrained: bool,
    pub committed: TimeBytes,
    pub lookahead: Option<TimeBytes>,
    /// The outbound bound: this federate's LBTS contribution. `Some` iff
    /// regulating.
    pub bound: Option<TimePosition<TimeBytes>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederateInfo {
    pub handle: FederateHandle,
    pub name: String,
    pub federate_type: String,
    pub status: FederateStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub object: ObjectInstanceHandle,
    pub class: ObjectClassHandle,
    pub name: String,
    pub owner: FederateHandle,
}

/// What a resigning federate asks the federation to do with its obligations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResignAction {
    UnconditionallyDivestAttributes,
    DeleteObjects,
    CancelPendingOwnershipAcquisitions,
    DeleteObjectsThenDivest,
    CancelThenDeleteThenDivest,
    NoAction,
}

impl ResignAction {
    pub fn deletes_objects(&self) -> bool {
        matches!(
            self,
            ResignAction::DeleteObjects
                | ResignAction::DeleteObjectsThenDivest
                | ResignAction::CancelThenDeleteThenDivest
        )
    }
}

/// Everything a joining federate needs to seed its replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSnapshot {
    pub handle: FederateHandle,
    pub federation: String,
    /// The joined federate's name (server-assigned when none was supplied).
    pub federate_name: String,
    pub federate_type: String,
    pub model: ObjectModel,
    /// The other currently joined federates.
    pub federates: Vec<FederateInfo>,
    /// Already-registered object instances (for discovery on subscribe).
    pub objects: Vec<ObjectInfo>,
}

/// Federate → server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpstreamMsg {
    /// Start the two-phase time-regulation enable.
    RequestRegulation { lookahead: TimeBytes },
    /// Acknowledge another federate's pending regulation enable.
    AckRegulation { subject: FederateHandle },
    /// Publish this federate's full time-management status (commits, flag
    /// changes, bound raises, regulation withdrawal).
    CommitStatus { status: FederateStatus },
    PublishObjectClass {
        class: ObjectClassHandle,
        attributes: Vec<AttributeHandle>,
    },
    UnpublishObjectClass { class: ObjectClassHandle },
    SubscribeObjectClass {
        class: ObjectClassHandle,
        attributes: Vec<AttributeHandle>,
    },
    UnsubscribeObjectClass { class: ObjectClassHandle },
    PublishInteraction { class: InteractionClassHandle },
    UnpublishInteraction { class: InteractionClassHandle },
    SubscribeInteraction { class: InteractionClassHandle },
    UnsubscribeInteraction { class: InteractionClassHandle },
    RegisterObject {
        object: ObjectInstanceHandle,
        class: ObjectClassHandle,
        name: String,
    },
    RequestUpdate {
        object: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
        tag: UserTag,
    },
    Message(MessageEnvelope),
    Retract(RetractionHandle),
    Resign { action: ResignAction },
}

/// Server → federate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownstreamMsg {
    FederateJoined(FederateInfo),
    FederateResigned { federate: FederateHandle },
    StatusChanged {
        federate: FederateHandle,
        status: FederateStatus,
    },
    /// Another federate wants to become regulating; install its provisional
    /// contribution and acknowledge.
    RegulationProposed {
        subject: FederateHandle,
        info: FederateInfo,
    },
    /// This federate's own regulation enable completed at `time`.
    RegulationGranted { time: TimeBytes },
    Discover {
        object: ObjectInstanceHandle,
        class: ObjectClassHandle,
        name: String,
    },
    ProvideUpdate {
        object: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
        tag: UserTag,
    },
    Message(MessageEnvelope),
    Retract(RetractionHandle),
    ResignAccepted,
}
