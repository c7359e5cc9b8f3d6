//! Callbacks the kernel hands to the ambassador for delivery to the
//! application, in exactly the order they must be delivered in.

use cadence_core::{
    AttributeHandle, FederateHandle, InteractionClassHandle, LogicalTime, ObjectClassHandle,
    ObjectInstanceHandle, ParameterHandle, RetractionHandle,
};

use crate::proto::{OrderType, UserTag};

/// Supplemental delivery information of a reflect/receive/remove callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveInfo<T: LogicalTime> {
    pub sender: FederateHandle,
    pub sent_order: OrderType,
    pub received_order: OrderType,
    pub time: Option<T>,
    pub retraction: Option<RetractionHandle>,
}

/// One callback, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FedCallback<T: LogicalTime> {
    TimeRegulationEnabled(T),
    TimeConstrainedEnabled(T),
    TimeAdvanceGrant(T),
    ReflectAttributes {
        object: ObjectInstanceHandle,
        values: Vec<(AttributeHandle, Vec<u8>)>,
        tag: UserTag,
        info: ReceiveInfo<T>,
    },
    ReceiveInteraction {
        class: InteractionClassHandle,
        parameters: Vec<(ParameterHandle, Vec<u8>)>,
        tag: UserTag,
        info: ReceiveInfo<T>,
    },
    RemoveObject {
        object: ObjectInstanceHandle,
        tag: UserTag,
        info: ReceiveInfo<T>,
    },
    DiscoverObject {
        object: ObjectInstanceHandle,
        class: ObjectClassHandle,
        name: String,
    },
    ProvideUpdate {
        object: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
        tag: UserTag,
    },
}

impl<T: LogicalTime> FedCallback<T> {
    /// The retraction handle this callback carries, if any.
    pub fn retraction(&self) -> Option<RetractionHandle> {
        match self {
            FedCallback::ReflectAttributes { info, .. }
            | FedCallback::ReceiveInteraction { info, .. }
            | FedCallback::RemoveObject { info, .. } => info.retraction,
            _ => None,
        }
    }

    /// The timestamp this callback carries, if any.
    pub fn time(&self) -> Option<T> {
        match self {
            FedCallback::TimeRegulationEnabled(t)
            | FedCallback::TimeConstrainedEnabled(t)
            | FedCallback::TimeAdvanceGrant(t) => Some(*t),
            FedCallback::ReflectAttributes { info, .. }
            | FedCallback::ReceiveInteraction { info, .. }
            | FedCallback::RemoveObject { info, .. } => info.time,
            FedCallback::DiscoverObject { .. } | FedCallback::ProvideUpdate { .. } => None,
        }
    }
}
