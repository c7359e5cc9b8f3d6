//! The callback interface a federate application implements.
//!
//! Every method has a no-op default, so a federate only implements what it
//! subscribes to. Errors returned from callbacks are caught and logged at the
//! ambassador boundary; they never poison the core.

use cadence_core::{
    AttributeHandle, InteractionClassHandle, LogicalTime, ObjectClassHandle, ObjectInstanceHandle,
    ParameterHandle,
};
use cadence_federation::ReceiveInfo;

pub trait FederateAmbassador<T: LogicalTime>: Send {
    fn time_regulation_enabled(&mut self, time: T) -> anyhow::Result<()> {
        let _ = time;
        Ok(())
    }

    fn time_constrained_enabled(&mut self, time: T) -> anyhow::Result<()> {
        let _ = time;
        Ok(())
    }

    fn time_advance_grant(&mut self, time: T) -> anyhow::Result<()> {
        let _ = time;
        Ok(())
    }

    fn discover_object_instance(
        &mut self,
        object: ObjectInstanceHandle,
        class: ObjectClassHandle,
        name: &str,
    ) -> anyhow::Result<()> {
        let _ = (object, class, name);
        Ok(())
    }

    fn reflect_attribute_values(
        &mut self,
        object: ObjectInstanceHandle,
        values: &[(AttributeHandle, Vec<u8>)],
        tag: &[u8],
        info: &ReceiveInfo<T>,
    ) -> anyhow::Result<()> {
        let _ = (object, values, tag, info);
        Ok(())
    }

    fn receive_interaction(
        &mut self,
        class: InteractionClassHandle,
        parameters: &[(ParameterHandle, Vec<u8>)],
        tag: &[u8],
        info: &ReceiveInfo<T>,
    ) -> anyhow::Result<()> {
        let _ = (class, parameters, tag, info);
        Ok(())
    }

    fn remove_object_instance(
        &mut self,
        object: ObjectInstanceHandle,
        tag: &[u8],
        info: &ReceiveInfo<T>,
    ) -> anyhow::Result<()> {
        let _ = (object, tag, info);
        Ok(())
    }

    fn provide_attribute_value_update(
        &mut self,
        object: ObjectInstanceHandle,
        attributes: &[AttributeHandle],
        tag: &[u8],
    ) -> anyhow::Result<()> {
        let _ = (object, attributes, tag);
        Ok(())
    }
}
