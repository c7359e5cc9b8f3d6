//! The closed failure taxonomy of the federate-facing API.
//!
//! Every API call returns `Result<_, FedError>`; no panic ever crosses the
//! boundary. Errors raised by application callbacks are caught and logged at
//! the ambassador boundary and never become a `FedError`.

use serde::{Deserialize, Serialize};

use cadence_core::TimeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FedError {
    // -- state preconditions --
    #[error("federate is not an execution member")]
    FederateNotExecutionMember,
    #[error("save in progress")]
    SaveInProgress,
    #[error("restore in progress")]
    RestoreInProgress,
    #[error("time regulation is already enabled")]
    TimeRegulationAlreadyEnabled,
    #[error("time regulation is not enabled")]
    TimeRegulationIsNotEnabled,
    #[error("time constrained is already enabled")]
    TimeConstrainedAlreadyEnabled,
    #[error("time constrained is not enabled")]
    TimeConstrainedIsNotEnabled,
    #[error("a request to enable time regulation is pending")]
    RequestForTimeRegulationPending,
    #[error("a request to enable time constrained is pending")]
    RequestForTimeConstrainedPending,
    #[error("no request to enable time regulation was pending")]
    NoRequestToEnableTimeRegulationWasPending,
    #[error("no request to enable time constrained was pending")]
    NoRequestToEnableTimeConstrainedWasPending,
    #[error("federate is in a time advancing state")]
    InTimeAdvancingState,
    #[error("joined federate is not in a time advancing state")]
    JoinedFederateIsNotInTimeAdvancingState,

    // -- argument validation --
    #[error("invalid logical time")]
    InvalidLogicalTime,
    #[error("invalid logical time interval")]
    InvalidLogicalTimeInterval,
    #[error("invalid lookahead")]
    InvalidLookahead,
    #[error("logical time has already passed")]
    LogicalTimeAlreadyPassed,
    #[error("invalid message retraction handle")]
    InvalidMessageRetractionHandle,
    #[error("message can no longer be retracted")]
    MessageCanNoLongerBeRetracted,
    #[error("illegal time arithmetic")]
    IllegalTimeArithmetic,
    #[error("could not decode")]
    CouldNotDecode,
    #[error("could not create logical time factory: {0}")]
    CouldNotCreateLogicalTimeFactory(String),

    // -- object model --
    #[error("object class not defined")]
    ObjectClassNotDefined,
    #[error("object class not published")]
    ObjectClassNotPublished,
    #[error("attribute not defined")]
    AttributeNotDefined,
    #[error("attribute not published")]
    AttributeNotPublished,
    #[error("object instance not known")]
    ObjectInstanceNotKnown,
    #[error("interaction class not defined")]
    InteractionClassNotDefined,
    #[error("interaction class not published")]
    InteractionClassNotPublished,
    #[error("interaction class not subscribed")]
    InteractionClassNotSubscribed,
    #[error("interaction parameter not defined")]
    InteractionParameterNotDefined,
    #[error("name already in use: {0}")]
    NameAlreadyInUse(String),

    // -- federation lifecycle --
    #[error("federation execution already exists: {0}")]
    FederationExecutionAlreadyExists(String),
    #[error("federation not found: {0}")]
    FederationNotFound(String),
    #[error("federates currently joined")]
    FederatesCurrentlyJoined,

    // -- transport / internal --
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("call not allowed from within a callback")]
    CallNotAllowedFromWithinCallback,
    #[error("RTI internal error: {0}")]
    RtiInternalError(String),
}

impl From<TimeError> for FedError {
    fn from(err: TimeError) -> Self {
        match err {
            TimeError::IllegalTimeArithmetic => FedError::IllegalTimeArithmetic,
            TimeError::CouldNotDecode => FedError::CouldNotDecode,
        }
    }
}
