//! The federation server's deterministic core: authoritative directory,
//! routing fan-out, the two-phase regulation enable and resign handling.
//!
//! The transport shell feeds it one upstream message at a time (per
//! federation, serialized) and sends out whatever it returns; it owns no
//! sockets and spawns nothing.

use std::collections::{BTreeMap, BTreeSet};

use cadence_core::{FederateHandle, LogicalTime, TimeBytes};

use crate::{
    catalog::{Interests, ObjectModel, ObjectRecord, ObjectTable},
    directory::{Directory, FederateRecord, Liveness},
    error::FedError,
    lbts::idle_bound,
    proto::{
        DownstreamMsg, FederateInfo, JoinSnapshot, MessageBody, MessageEnvelope, ObjectInfo,
        OrderType, ResignAction, UpstreamMsg,
    },
};

/// Messages to deliver, in order, as a result of one input.
pub type Routed = Vec<(FederateHandle, DownstreamMsg)>;

#[derive(Debug)]
struct RegulationGate<T: LogicalTime> {
    waiting: BTreeSet<FederateHandle>,
    time: T,
}

pub struct Coordinator<T: LogicalTime> {
    federation: String,
    model: ObjectModel,
    directory: Directory<T>,
    interests: BTreeMap<FederateHandle, Interests>,
    objects: ObjectTable,
    gates: BTreeMap<FederateHandle, RegulationGate<T>>,
    joined_total: u64,
}

impl<T: LogicalTime> Coordinator<T> {
    pub fn new(federation: &str, model: ObjectModel) -> Self {
        Self {
            federation: federation.to_owned(),
            model,
            directory: Directory::new(),
            interests: BTreeMap::new(),
            objects: ObjectTable::new(),
            gates: BTreeMap::new(),
            joined_total: 0,
        }
    }

    pub fn federation(&self) -> &str {
        &self.federation
    }

    pub fn federate_count(&self) -> usize {
        self.directory.len()
    }

    pub fn contains(&self, federate: FederateHandle) -> bool {
        self.directory.contains(federate)
    }

    /// Admit a federate and tell everyone else.
    pub fn join(
        &mut self,
        federate_type: &str,
        name: Option<&str>,
    ) -> Result<(JoinSnapshot, Routed), FedError> {
        let name = match name {
            Some(name) => name.to_owned(),
            None => format!("{federate_type}-{}", self.joined_total),
        };
        let record = FederateRecord::<T>::new(name, federate_type.to_owned());
        let handle = self.directory.admit(record)?;
        self.joined_total += 1;
        self.interests.insert(handle, Interests::default());

        let federates = self
            .directory
            .alive()
            .filter(|(other, _)| *other != handle)
            .map(|(other, record)| FederateInfo {
                handle: other,
                name: record.name.clone(),
                federate_type: record.federate_type.clone(),
                status: record.status(),
            })
            .collect();
        let objects = self
            .objects
            .iter()
            .map(|(object, record)| ObjectInfo {
                object: *object,
                class: record.class,
                name: record.name.clone(),
                owner: record.owner,
            })
            .collect();
        let snapshot = JoinSnapshot {
            handle,
            federation: self.federation.clone(),
            federate_name: self
                .directory
                .get(handle)
                .expect("just admitted")
                .name
                .clone(),
            federate_type: federate_type.to_owned(),
            model: self.model.clone(),
            federates,
            objects,
        };

        let info = self.federate_info(handle);
        let routed = self
            .others(handle)
            .map(|other| (other, DownstreamMsg::FederateJoined(info.clone())))
            .collect();
        Ok((snapshot, routed))
    }

    /// Process one message from a joined federate.
    pub fn handle(&mut self, from: FederateHandle, msg: UpstreamMsg) -> Result<Routed, FedError> {
        if !self.directory.contains(from) {
            return Err(FedError::FederateNotExecutionMember);
        }
        match msg {
            UpstreamMsg::CommitStatus { status } => {
                let gated = self.gates.contains_key(&from);
                let record = self
                    .directory
                    .get_mut(from)
                    .ok_or(FedError::FederateNotExecutionMember)?;
                if gated {
                    // Regulation enable in flight: the provisional
                    // contribution must survive until the grant, so only the
                    // constrained flag and the committed floor may move.
                    record.constrained = status.constrained;
                    let committed: T = status.committed.to_time()?;
                    record.committed = record.committed.max(committed);
                } else {
                    record.apply_status(&status)?;
                }
                let status = self.directory.get(from).expect("just updated").status();
                Ok(self
                    .others(from)
                    .map(|other| {
                        (
                            other,
                            DownstreamMsg::StatusChanged {
                                federate: from,
                                status: status.clone(),
                            },
                        )
                    })
                    .collect())
            }
            UpstreamMsg::RequestRegulation { lookahead } => {
                self.start_regulation(from, lookahead)
            }
            UpstreamMsg::AckRegulation { subject } => Ok(self.ack_regulation(from, subject)),
            UpstreamMsg::Message(envelope) => Ok(self.route(from, envelope)),
            UpstreamMsg::Retract(handle) => Ok(self
                .others(from)
                .map(|other| (other, DownstreamMsg::Retract(handle)))
                .collect()),
            UpstreamMsg::RegisterObject {
                object,
                class,
                name,
            } => {
                self.objects.insert(
                    object,
                    ObjectRecord {
                        class,
                        name: name.clone(),
                        owner: from,
                    },
                );
                Ok(self
                    .subscribers_of_class(class, from)
                    .into_iter()
                    .map(|other| {
                        (
                            other,
                            DownstreamMsg::Discover {
                                object,
                                class,
                                name: name.clone(),
                            },
                        )
                    })
                    .collect())
            }
            UpstreamMsg::RequestUpdate {
                object,
                attributes,
                tag,
            } => {
                let owner = self
                    .objects
                    .get(&object)
                    .map(|record| record.owner)
                    .ok_or(FedError::ObjectInstanceNotKnown)?;
                Ok(vec![(
                    owner,
                    DownstreamMsg::ProvideUpdate {
                        object,
                        attributes,
                        tag,
                    },
                )])
            }
            UpstreamMsg::PublishObjectClass { class, attributes } => {
                let interests = self.interests.entry(from).or_default();
                interests
                    .published_attributes
                    .entry(class)
                    .or_default()
                    .extend(attributes);
                Ok(Vec::new())
            }
            UpstreamMsg::UnpublishObjectClass { class } => {
                self.interests
                    .entry(from)
                    .or_default()
                    .published_attributes
                    .remove(&class);
                Ok(Vec::new())
            }
            UpstreamMsg::SubscribeObjectClass { class, attributes } => {
                let interests = self.interests.entry(from).or_default();
                interests
                    .subscribed_attributes
                    .entry(class)
                    .or_default()
                    .extend(attributes);
                // Late subscribers discover what already exists.
                Ok(self
                    .objects
                    .iter()
                    .filter(|(_, record)| record.class == class && record.owner != from)
                    .map(|(object, record)| {
                        (
                            from,
                            DownstreamMsg::Discover {
                                object: *object,
                                class,
                                name: record.name.clone(),
                            },
                        )
                    })
                    .collect())
            }
            UpstreamMsg::UnsubscribeObjectClass { class } => {
                self.interests
                    .entry(from)
                    .or_default()
                    .subscribed_attributes
                    .remove(&class);
                Ok(Vec::new())
            }
            UpstreamMsg::PublishInteraction { class } => {
                self.interests
                    .entry(from)
                    .or_default()
                    .published_interactions
                    .insert(class);
                Ok(Vec::new())
            }
            UpstreamMsg::UnpublishInteraction { class } => {
                self.interests
                    .entry(from)
                    .or_default()
                    .published_interactions
                    .remove(&class);
                Ok(Vec::new())
            }
            UpstreamMsg::SubscribeInteraction { class } => {
                self.interests
                    .entry(from)
                    .or_default()
                    .subscribed_interactions
                    .insert(class);
                Ok(Vec::new())
            }
            UpstreamMsg::UnsubscribeInteraction { class } => {
                self.interests
                    .entry(from)
                    .or_default()
                    .subscribed_interactions
                    .remove(&class);
                Ok(Vec::new())
            }
            UpstreamMsg::Resign { action } => {
                let mut routed = self.resign(from, action);
                routed.push((from, DownstreamMsg::ResignAccepted));
                Ok(routed)
            }
        }
    }

    /// A federate's transport died: treat as the harshest resign.
    pub fn disconnect(&mut self, from: FederateHandle) -> Routed {
        if !self.directory.contains(from) {
            return Vec::new();
        }
        tracing::warn!(federate = %from, "Federate vanished; resigning it.");
        self.resign(from, ResignAction::CancelThenDeleteThenDivest)
    }

    fn start_regulation(
        &mut self,
        from: FederateHandle,
        lookahead: TimeBytes,
    ) -> Result<Routed, FedError> {
        let lookahead = lookahead.to_interval::<T>()?;
        let others_regulate = self.directory.has_contributors_excluding(from);
        let lbts = self.directory.lbts_excluding(from);
        let record = self
            .directory
            .get_mut(from)
            .ok_or(FedError::FederateNotExecutionMember)?;

        // The newcomer starts at a time no constrained federate could have
        // passed yet.
        let time = if others_regulate {
            record.committed.max(lbts.time)
        } else {
            record.committed
        };
        record.regulating = true;
        record.committed = time;
        record.lookahead = Some(lookahead);
        record.bound = Some(idle_bound(time, lookahead));

        let waiting: BTreeSet<_> = self.others(from).collect();
        if waiting.is_empty() {
            return Ok(vec![(
                from,
                DownstreamMsg::RegulationGranted {
                    time: TimeBytes::of(time),
                },
            )]);
        }
        let info = self.federate_info(from);
        self.gates.insert(from, RegulationGate { waiting, time });
        Ok(self
            .others(from)
            .map(|other| {
                (
                    other,
                    DownstreamMsg::RegulationProposed {
                        subject: from,
                        info: info.clone(),
                    },
                )
            })
            .collect())
    }

    fn ack_regulation(&mut self, from: FederateHandle, subject: FederateHandle) -> Routed {
        let Some(gate) = self.gates.get_mut(&subject) else {
            return Vec::new();
        };
        gate.waiting.remove(&from);
        if !gate.waiting.is_empty() {
            return Vec::new();
        }
        let gate = self.gates.remove(&subject).expect("gate present");
        vec![(
            subject,
            DownstreamMsg::RegulationGranted {
                time: TimeBytes::of(gate.time),
            },
        )]
    }

    fn route(&mut self, from: FederateHandle, envelope: MessageEnvelope) -> Routed {
        match &envelope.body {
            MessageBody::UpdateAttributes { object, values } => {
                let Some(class) = self.objects.get(object).map(|record| record.class) else {
                    tracing::debug!(%object, "Update for unknown object dropped.");
                    return Vec::new();
                };
                self.others(from)
                    .filter_map(|other| {
                        let interests = self.interests.get(&other)?;
                        let subset = interests.subscribed_subset(class, values);
                        if subset.is_empty() {
                            return None;
                        }
                        let mut routed = envelope.clone();
                        routed.body = MessageBody::UpdateAttributes {
                            object: *object,
                            values: subset,
                        };
                        Some((other, DownstreamMsg::Message(routed)))
                    })
                    .collect()
            }
            MessageBody::Interaction { class, .. } => {
                let class = *class;
                self.others(from)
                    .filter(|other| {
                        self.interests
                            .get(other)
                            .is_some_and(|i| i.subscribed_interactions.contains(&class))
                    })
                    .map(|other| (other, DownstreamMsg::Message(envelope.clone())))
                    .collect()
            }
            MessageBody::DeleteObject { object } => {
                let object = *object;
                let Some(record) = self.objects.remove(&object) else {
                    return Vec::new();
                };
                self.subscribers_of_class(record.class, from)
                    .into_iter()
                    .map(|other| (other, DownstreamMsg::Message(envelope.clone())))
                    .collect()
            }
        }
    }

    fn resign(&mut self, from: FederateHandle, action: ResignAction) -> Routed {
        if let Some(record) = self.directory.get_mut(from) {
            record.liveness = Liveness::Resigning;
        }
        let mut routed = Vec::new();

        if action.deletes_objects() {
            let owned: Vec<_> = self
                .objects
                .iter()
                .filter(|(_, record)| record.owner == from)
                .map(|(object, _)| *object)
                .collect();
            for (serial, object) in owned.into_iter().enumerate() {
                let envelope = MessageEnvelope {
                    sender: from,
                    body: MessageBody::DeleteObject { object },
                    tag: Vec::new(),
                    sent_order: OrderType::Receive,
                    timestamp: None,
                    retraction: None,
                    sent_serial: serial as u64,
                };
                routed.extend(self.route(from, envelope));
            }
        } else {
            // Orphaned instances stay known to their subscribers.
            self.objects.retain(|_, record| record.owner != from);
        }

        // The contribution vanishes immediately; everyone re-evaluates.
        self.directory.remove(from);
        self.interests.remove(&from);
        self.gates.remove(&from);
        routed.extend(
            self.others(from)
                .map(|other| (other, DownstreamMsg::FederateResigned { federate: from })),
        );

        // A gate no longer waits on the departed.
        let completed: Vec<_> = self
            .gates
            .iter_mut()
            .filter_map(|(subject, gate)| {
                gate.waiting.remove(&from);
                gate.waiting.is_empty().then_some(*subject)
            })
            .collect();
        for subject in completed {
            let gate = self.gates.remove(&subject).expect("gate present");
            routed.push((
                subject,
                DownstreamMsg::RegulationGranted {
                    time: TimeBytes::of(gate.time),
                },
            ));
        }
        routed
    }

    fn federate_info(&self, handle: FederateHandle) -> FederateInfo {
        let record = self.directory.get(handle).expect("federate present");
        FederateInfo {
            handle,
            name: record.name.clone(),
            federate_type: record.federate_type.clone(),
            status: record.status(),
        }
    }

    fn others(&self, from: FederateHandle) -> impl Iterator<Item = FederateHandle> + '_ {
        self.directory
            .alive()
            .map(|(handle, _)| handle)
            .filter(move |handle| *handle != from)
    }

    fn subscribers_of_class(
        &self,
        class: cadence_core::ObjectClassHandle,
        from: FederateHandle,
    ) -> Vec<FederateHandle> {
        self.others(from)
            .filter(|other| {
                self.interests
                    .get(other)
                    .is_some_and(|i| i.subscribes_class(class))
            })
            .collect()
    }
}
