//! The object/interaction catalog: class tables built from the federation's
//! object model, plus per-federate publication/subscription interests.
//!
//! The FOM XML itself is opaque to the core; a federation is created with an
//! already-parsed [`ObjectModel`] value. Both the server and every replica
//! build their class tables from the same model in the same order, so handle
//! assignment is deterministic across the federation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use cadence_core::{
    AttributeHandle, FederateHandle, HandleArena, InteractionClassHandle, ObjectClassHandle,
    ObjectInstanceHandle, ParameterHandle,
};

use crate::error::FedError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectClassDef {
    pub name: String,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionClassDef {
    pub name: String,
    pub parameters: Vec<String>,
}

/// The parsed object model a federation is created with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectModel {
    pub object_classes: Vec<ObjectClassDef>,
    pub interaction_classes: Vec<InteractionClassDef>,
}

#[derive(Debug, Clone)]
pub struct ObjectClassEntry {
    pub name: String,
    pub attributes: HandleArena<AttributeHandle, String>,
}

#[derive(Debug, Clone)]
pub struct InteractionClassEntry {
    pub name: String,
    pub parameters: HandleArena<ParameterHandle, String>,
}

/// Class tables with name lookup.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    object_classes: HandleArena<ObjectClassHandle, ObjectClassEntry>,
    interaction_classes: HandleArena<InteractionClassHandle, InteractionClassEntry>,
}

impl Catalog {
    pub fn from_model(model: &ObjectModel) -> Self {
        let mut catalog = Catalog::default();
        for class in &model.object_classes {
            let mut attributes = HandleArena::new();
            for attribute in &class.attributes {
                attributes.insert(attribute.clone());
            }
            catalog.object_classes.insert(ObjectClassEntry {
                name: class.name.clone(),
                attributes,
            });
        }
        for class in &model.interaction_classes {
            let mut parameters = HandleArena::new();
            for parameter in &class.parameters {
                parameters.insert(parameter.clone());
            }
            catalog.interaction_classes.insert(InteractionClassEntry {
                name: class.name.clone(),
                parameters,
            });
        }
        catalog
    }

    pub fn object_class(&self, class: ObjectClassHandle) -> Result<&ObjectClassEntry, FedError> {
        self.object_classes
            .get(class)
            .ok_or(FedError::ObjectClassNotDefined)
    }

    pub fn interaction_class(
        &self,
        class: InteractionClassHandle,
    ) -> Result<&InteractionClassEntry, FedError> {
        self.interaction_classes
            .get(class)
            .ok_or(FedError::InteractionClassNotDefined)
    }

    pub fn object_class_by_name(&self, name: &str) -> Result<ObjectClassHandle, FedError> {
        self.object_classes
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(handle, _)| handle)
            .ok_or(FedError::ObjectClassNotDefined)
    }

    pub fn attribute_by_name(
        &self,
        class: ObjectClassHandle,
        name: &str,
    ) -> Result<AttributeHandle, FedError> {
        self.object_class(class)?
            .attributes
            .iter()
            .find(|(_, attribute)| *attribute == name)
            .map(|(handle, _)| handle)
            .ok_or(FedError::AttributeNotDefined)
    }

    pub fn interaction_class_by_name(
        &self,
        name: &str,
    ) -> Result<InteractionClassHandle, FedError> {
        self.interaction_classes
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(handle, _)| handle)
            .ok_or(FedError::InteractionClassNotDefined)
    }

    pub fn parameter_by_name(
        &self,
        class: InteractionClassHandle,
        name: &str,
    ) -> Result<ParameterHandle, FedError> {
        self.interaction_class(class)?
            .parameters
            .iter()
            .find(|(_, parameter)| *parameter == name)
            .map(|(handle, _)| handle)
            .ok_or(FedError::InteractionParameterNotDefined)
    }

    /// Validate that every attribute handle belongs to the class.
    pub fn check_attributes(
        &self,
        class: ObjectClassHandle,
        attributes: &[AttributeHandle],
    ) -> Result<(), FedError> {
        let entry = self.object_class(class)?;
        for attribute in attributes {
            if !entry.attributes.contains(*attribute) {
                return Err(FedError::AttributeNotDefined);
            }
        }
        Ok(())
    }

    /// Validate that every parameter handle belongs to the class.
    pub fn check_parameters(
        &self,
        class: InteractionClassHandle,
        parameters: &[ParameterHandle],
    ) -> Result<(), FedError> {
        let entry = self.interaction_class(class)?;
        for parameter in parameters {
            if !entry.parameters.contains(*parameter) {
                return Err(FedError::InteractionParameterNotDefined);
            }
        }
        Ok(())
    }
}

/// One federate's declaration-management state.
#[derive(Debug, Clone, Default)]
pub struct Interests {
    pub published_attributes: BTreeMap<ObjectClassHandle, BTreeSet<AttributeHandle>>,
    pub subscribed_attributes: BTreeMap<ObjectClassHandle, BTreeSet<AttributeHandle>>,
    pub published_interactions: BTreeSet<InteractionClassHandle>,
    pub subscribed_interactions: BTreeSet<InteractionClassHandle>,
}

impl Interests {
    pub fn publishes_class(&self, class: ObjectClassHandle) -> bool {
        self.published_attributes
            .get(&class)
            .is_some_and(|attrs| !attrs.is_empty())
    }

    pub fn publishes_attribute(&self, class: ObjectClassHandle, attr: AttributeHandle) -> bool {
        self.published_attributes
            .get(&class)
            .is_some_and(|attrs| attrs.contains(&attr))
    }

    pub fn subscribes_class(&self, class: ObjectClassHandle) -> bool {
        self.subscribed_attributes
            .get(&class)
            .is_some_and(|attrs| !attrs.is_empty())
    }

    /// The subset of `attributes` this federate subscribes to.
    pub fn subscribed_subset(
        &self,
        class: ObjectClassHandle,
        values: &[(AttributeHandle, Vec<u8>)],
    ) -> Vec<(AttributeHandle, Vec<u8>)> {
        match self.subscribed_attributes.get(&class) {
            Some(attrs) => values
                .iter()
                .filter(|(handle, _)| attrs.contains(handle))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}

/// A registered object instance as both sides track it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub class: ObjectClassHandle,
    pub name: String,
    pub owner: FederateHandle,
}

pub type ObjectTable = BTreeMap<ObjectInstanceHandle, ObjectRecord>;

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> ObjectModel {
        ObjectModel {
            object_classes: vec![ObjectClassDef {
                name: "Vehicle".into(),
                attributes: vec!["position".into(), "velocity".into()],
            }],
            interaction_classes: vec![InteractionClassDef {
                name: "Collision".into(),
                parameters: vec!["severity".into()],
            }],
        }
    }

    #[test]
    fn lookups_resolve_names_and_reject_unknowns() {
        let catalog = Catalog::from_model(&model());
        let vehicle = catalog.object_class_by_name("Vehicle").unwrap();
        let position = catalog.attribute_by_name(vehicle, "position").unwrap();
        assert!(catalog.check_attributes(vehicle, &[position]).is_ok());

        assert_eq!(
            catalog.object_class_by_name("Aircraft"),
            Err(FedError::ObjectClassNotDefined)
        );
        assert_eq!(
            catalog.attribute_by_name(vehicle, "altitude"),
            Err(FedError::AttributeNotDefined)
        );
        let collision = catalog.interaction_class_by_name("Collision").unwrap();
        assert_eq!(
            catalog.parameter_by_name(collision, "angle"),
            Err(FedError::InteractionParameterNotDefined)
        );
    }

    #[test]
    fn replicas_assign_identical_handles() {
        let a = Catalog::from_model(&model());
        let b = Catalog::from_model(&model());
        assert_eq!(
            a.object_class_by_name("Vehicle").unwrap(),
            b.object_class_by_name("Vehicle").unwrap()
        );
        let class = a.object_class_by_name("Vehicle").unwrap();
        assert_eq!(
            a.attribute_by_name(class, "velocity").unwrap(),
            b.attribute_by_name(class, "velocity").unwrap()
        );
    }
}
