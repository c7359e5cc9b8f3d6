//! The federate kernel: the deterministic, transport-free core of one
//! federate's time management.
//!
//! API calls and server events come in; wire messages ([`UpstreamMsg`]) and
//! callbacks ([`FedCallback`]) come out. All state mutation happens on the
//! caller's thread; the tokio shell owns the sockets and drives this.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use cadence_core::{
    AttributeHandle, FederateHandle, InteractionClassHandle, LogicalTime, ObjectClassHandle,
    ObjectInstanceHandle, ParameterHandle, RetractionHandle, TimeBytes, TimePosition,
};

use crate::{
    catalog::{Catalog, Interests, ObjectRecord, ObjectTable},
    directory::{Directory, FederateRecord, Liveness},
    error::FedError,
    events::{FedCallback, ReceiveInfo},
    lbts::{advance_bound, idle_bound, next_message_floor},
    proto::{
        DownstreamMsg, FederateStatus, JoinSnapshot, MessageBody, MessageEnvelope, OrderType,
        ResignAction, UpstreamMsg, UserTag,
    },
    queue::{InboundQueues, TsoEntry},
    timeline::{AdvanceMode, AdvanceTrack, ConstrainedTrack, RegulationTrack, Timeline},
};

pub struct FederateKernel<T: LogicalTime> {
    handle: FederateHandle,
    federation: String,
    directory: Directory<T>,
    catalog: Catalog,
    interests: Interests,
    objects: ObjectTable,
    queues: InboundQueues<T>,
    timeline: Timeline<T>,

    committed: T,
    lookahead: Option<T::Interval>,
    /// Last bound published to the federation; only ever raised.
    published_bound: Option<TimePosition<T>>,
    async_delivery: bool,

    next_sent_serial: u64,
    next_object_serial: u64,
    next_retraction_serial: u64,
    /// Sent timestamped messages still inside their retraction window.
    retractables: BTreeMap<RetractionHandle, T>,
    /// Handles whose window has closed; retracting them is a distinct error
    /// from never having existed.
    expired_retractions: BTreeSet<RetractionHandle>,

    callbacks: VecDeque<FedCallback<T>>,
    outbox: Vec<UpstreamMsg>,
}

impl<T: LogicalTime> FederateKernel<T> {
    pub fn new(snapshot: JoinSnapshot) -> Result<Self, FedError> {
        let mut directory = Directory::new();
        for info in &snapshot.federates {
            directory.install(info.handle, FederateRecord::try_from(info)?);
        }
        let mut own = FederateRecord::new(
            snapshot.federate_name.clone(),
            snapshot.federate_type.clone(),
        );
        own.liveness = Liveness::Alive;
        directory.install(snapshot.handle, own);

        let objects = snapshot
            .objects
            .iter()
            .map(|info| {
                (
                    info.object,
                    ObjectRecord {
                        class: info.class,
                        name: info.name.clone(),
                        owner: info.owner,
                    },
                )
            })
            .collect();

        Ok(Self {
            handle: snapshot.handle,
            federation: snapshot.federation.clone(),
            directory,
            catalog: Catalog::from_model(&snapshot.model),
            interests: Interests::default(),
            objects,
            queues: InboundQueues::new(),
            timeline: Timeline::new(),
            committed: T::INITIAL,
            lookahead: None,
            published_bound: None,
            async_delivery: false,
            next_sent_serial: 0,
            next_object_serial: 0,
            next_retraction_serial: 0,
            retractables: BTreeMap::new(),
            expired_retractions: BTreeSet::new(),
            callbacks: VecDeque::new(),
            outbox: Vec::new(),
        })
    }

    pub fn handle(&self) -> FederateHandle {
        self.handle
    }

    pub fn federation(&self) -> &str {
        &self.federation
    }

    /// Wire messages produced since the last drain, in send order.
    pub fn drain_outbox(&mut self) -> Vec<UpstreamMsg> {
        std::mem::take(&mut self.outbox)
    }

    /// The next callback ready for delivery, if any.
    pub fn next_callback(&mut self) -> Option<FedCallback<T>> {
        self.flush_receive_order();
        self.callbacks.pop_front()
    }

    pub fn callbacks_pending(&mut self) -> bool {
        self.flush_receive_order();
        !self.callbacks.is_empty()
    }

    // --- name lookups (delegated to the catalog) ---

    pub fn object_class_handle(&self, name: &str) -> Result<ObjectClassHandle, FedError> {
        self.catalog.object_class_by_name(name)
    }

    pub fn attribute_handle(
        &self,
        class: ObjectClassHandle,
        name: &str,
    ) -> Result<AttributeHandle, FedError> {
        self.catalog.attribute_by_name(class, name)
    }

    pub fn interaction_class_handle(&self, name: &str) -> Result<InteractionClassHandle, FedError> {
        self.catalog.interaction_class_by_name(name)
    }

    pub fn parameter_handle(
        &self,
        class: InteractionClassHandle,
        name: &str,
    ) -> Result<ParameterHandle, FedError> {
        self.catalog.parameter_by_name(class, name)
    }

    // --- declaration management ---

    pub fn publish_object_class_attributes(
        &mut self,
        class: ObjectClassHandle,
        attributes: &[AttributeHandle],
    ) -> Result<(), FedError> {
        self.catalog.check_attributes(class, attributes)?;
        self.interests
            .published_attributes
            .entry(class)
            .or_default()
            .extend(attributes.iter().copied());
        self.outbox.push(UpstreamMsg::PublishObjectClass {
            class,
            attributes: attributes.to_vec(),
        });
        Ok(())
    }

    pub fn unpublish_object_class(&mut self, class: ObjectClassHandle) -> Result<(), FedError> {
        self.catalog.object_class(class)?;
        self.interests.published_attributes.remove(&class);
        self.outbox
            .push(UpstreamMsg::UnpublishObjectClass { class });
        Ok(())
    }

    pub fn subscribe_object_class_attributes(
        &mut self,
        class: ObjectClassHandle,
        attributes: &[AttributeHandle],
    ) -> Result<(), FedError> {
        self.catalog.check_attributes(class, attributes)?;
        self.interests
            .subscribed_attributes
            .entry(class)
            .or_default()
            .extend(attributes.iter().copied());
        self.outbox.push(UpstreamMsg::SubscribeObjectClass {
            class,
            attributes: attributes.to_vec(),
        });
        Ok(())
    }

    pub fn unsubscribe_object_class(&mut self, class: ObjectClassHandle) -> Result<(), FedError> {
        self.catalog.object_class(class)?;
        self.interests.subscribed_attributes.remove(&class);
        // Queued events for instances of the class lose their recipient.
        let objects = &self.objects;
        self.queues.purge_where(|envelope| match &envelope.body {
            MessageBody::UpdateAttributes { object, .. } | MessageBody::DeleteObject { object } => {
                objects.get(object).is_some_and(|r| r.class == class)
            }
            MessageBody::Interaction { .. } => false,
        });
        self.outbox
            .push(UpstreamMsg::UnsubscribeObjectClass { class });
        self.reevaluate();
        Ok(())
    }

    pub fn publish_interaction_class(
        &mut self,
        class: InteractionClassHandle,
    ) -> Result<(), FedError> {
        self.catalog.interaction_class(class)?;
        self.interests.published_interactions.insert(class);
        self.outbox.push(UpstreamMsg::PublishInteraction { class });
        Ok(())
    }

    pub fn unpublish_interaction_class(
        &mut self,
        class: InteractionClassHandle,
    ) -> Result<(), FedError> {
        self.catalog.interaction_class(class)?;
        self.interests.published_interactions.remove(&class);
        self.outbox
            .push(UpstreamMsg::UnpublishInteraction { class });
        Ok(())
    }

    pub fn subscribe_interaction_class(
        &mut self,
        class: InteractionClassHandle,
    ) -> Result<(), FedError> {
        self.catalog.interaction_class(class)?;
        self.interests.subscribed_interactions.insert(class);
        self.outbox.push(UpstreamMsg::SubscribeInteraction { class });
        Ok(())
    }

    pub fn unsubscribe_interaction_class(
        &mut self,
        class: InteractionClassHandle,
    ) -> Result<(), FedError> {
        self.catalog.interaction_class(class)?;
        self.interests.subscribed_interactions.remove(&class);
        self.queues.purge_where(|envelope| {
            matches!(&envelope.body, MessageBody::Interaction { class: c, .. } if *c == class)
        });
        self.outbox
            .push(UpstreamMsg::UnsubscribeInteraction { class });
        self.reevaluate();
        Ok(())
    }

    // --- object management ---

    pub fn register_object_instance(
        &mut self,
        class: ObjectClassHandle,
        name: Option<&str>,
    ) -> Result<ObjectInstanceHandle, FedError> {
        self.catalog.object_class(class)?;
        if !self.interests.publishes_class(class) {
            return Err(FedError::ObjectClassNotPublished);
        }
        let serial = self.next_object_serial;
        let name = match name {
            Some(name) => {
                if self.objects.values().any(|record| record.name == name) {
                    return Err(FedError::NameAlreadyInUse(name.to_owned()));
                }
                name.to_owned()
            }
            None => format!("HLA-{}-{}", self.handle, serial),
        };
        self.next_object_serial += 1;
        let object = ObjectInstanceHandle {
            registrant: self.handle,
            serial,
        };
        self.objects.insert(
            object,
            ObjectRecord {
                class,
                name: name.clone(),
                owner: self.handle,
            },
        );
        self.outbox.push(UpstreamMsg::RegisterObject {
            object,
            class,
            name,
        });
        Ok(object)
    }

    pub fn update_attribute_values(
        &mut self,
        object: ObjectInstanceHandle,
        values: Vec<(AttributeHandle, Vec<u8>)>,
        tag: UserTag,
        time: Option<T>,
    ) -> Result<Option<RetractionHandle>, FedError> {
        let record = self
            .objects
            .get(&object)
            .ok_or(FedError::ObjectInstanceNotKnown)?;
        if record.owner != self.handle {
            return Err(FedError::ObjectInstanceNotKnown);
        }
        let class = record.class;
        let attributes: Vec<_> = values.iter().map(|(handle, _)| *handle).collect();
        self.catalog.check_attributes(class, &attributes)?;
        for attribute in &attributes {
            if !self.interests.publishes_attribute(class, *attribute) {
                return Err(FedError::AttributeNotPublished);
            }
        }
        self.send_message(MessageBody::UpdateAttributes { object, values }, tag, time)
    }

    pub fn send_interaction(
        &mut self,
        class: InteractionClassHandle,
        parameters: Vec<(ParameterHandle, Vec<u8>)>,
        tag: UserTag,
        time: Option<T>,
    ) -> Result<Option<RetractionHandle>, FedError> {
        let handles: Vec<_> = parameters.iter().map(|(handle, _)| *handle).collect();
        self.catalog.check_parameters(class, &handles)?;
        if !self.interests.published_interactions.contains(&class) {
            return Err(FedError::InteractionClassNotPublished);
        }
        self.send_message(MessageBody::Interaction { class, parameters }, tag, time)
    }

    pub fn delete_object_instance(
        &mut self,
        object: ObjectInstanceHandle,
        tag: UserTag,
        time: Option<T>,
    ) -> Result<Option<RetractionHandle>, FedError> {
        let record = self
            .objects
            .get(&object)
            .ok_or(FedError::ObjectInstanceNotKnown)?;
        if record.owner != self.handle {
            return Err(FedError::ObjectInstanceNotKnown);
        }
        let result = self.send_message(MessageBody::DeleteObject { object }, tag, time)?;
        self.objects.remove(&object);
        Ok(result)
    }

    pub fn request_attribute_value_update(
        &mut self,
        object: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
        tag: UserTag,
    ) -> Result<(), FedError> {
        let record = self
            .objects
            .get(&object)
            .ok_or(FedError::ObjectInstanceNotKnown)?;
        self.catalog.check_attributes(record.class, &attributes)?;
        self.outbox.push(UpstreamMsg::RequestUpdate {
            object,
            attributes,
            tag,
        });
        Ok(())
    }

    fn send_message(
        &mut self,
        body: MessageBody,
        tag: UserTag,
        time: Option<T>,
    ) -> Result<Option<RetractionHandle>, FedError> {
        let regulating = self.timeline.regulation.is_enabled();
        if let Some(t) = time {
            if !t.is_admissible() {
                return Err(FedError::InvalidLogicalTime);
            }
            if regulating {
                // The published bound is a promise; a send below it would
                // break every constrained federate that trusted it.
                if let Some(bound) = self.published_bound {
                    if TimePosition::closed(t) < bound {
                        return Err(FedError::InvalidLogicalTime);
                    }
                }
            }
        }

        let timestamped = regulating && time.is_some();
        let sent_order = if timestamped {
            OrderType::TimeStamp
        } else {
            OrderType::Receive
        };
        let retraction = timestamped.then(|| {
            let handle = RetractionHandle {
                federate: self.handle,
                serial: self.next_retraction_serial,
            };
            self.next_retraction_serial += 1;
            // Retractable until our own time passes the message's timestamp.
            self.retractables.insert(handle, time.unwrap());
            handle
        });

        let envelope = MessageEnvelope {
            sender: self.handle,
            body,
            tag,
            sent_order,
            timestamp: time.map(TimeBytes::of),
            retraction,
            sent_serial: self.next_sent_serial,
        };
        self.next_sent_serial += 1;
        self.outbox.push(UpstreamMsg::Message(envelope));
        Ok(retraction)
    }

    pub fn retract(&mut self, handle: RetractionHandle) -> Result<(), FedError> {
        if self.expired_retractions.contains(&handle) {
            return Err(FedError::MessageCanNoLongerBeRetracted);
        }
        let timestamp = *self
            .retractables
            .get(&handle)
            .ok_or(FedError::InvalidMessageRetractionHandle)?;
        if timestamp <= self.committed {
            self.retractables.remove(&handle);
            self.expired_retractions.insert(handle);
            return Err(FedError::MessageCanNoLongerBeRetracted);
        }
        self.retractables.remove(&handle);
        self.outbox.push(UpstreamMsg::Retract(handle));
        Ok(())
    }

    // --- time management: regulation and constraint ---

    pub fn enable_time_regulation(&mut self, lookahead: T::Interval) -> Result<(), FedError> {
        match self.timeline.regulation {
            RegulationTrack::Enabled => return Err(FedError::TimeRegulationAlreadyEnabled),
            RegulationTrack::EnablingPending { .. } => {
                return Err(FedError::RequestForTimeRegulationPending)
            }
            RegulationTrack::Disabled => {}
        }
        if self.timeline.advance.is_pending() {
            return Err(FedError::InTimeAdvancingState);
        }
        if !T::interval_is_admissible(&lookahead) {
            return Err(FedError::InvalidLookahead);
        }
        self.timeline.regulation = RegulationTrack::EnablingPending { lookahead };
        self.outbox.push(UpstreamMsg::RequestRegulation {
            lookahead: TimeBytes::of_interval::<T>(lookahead),
        });
        Ok(())
    }

    pub fn disable_time_regulation(&mut self) -> Result<(), FedError> {
        if !self.timeline.regulation.is_enabled() {
            return Err(FedError::TimeRegulationIsNotEnabled);
        }
        self.timeline.regulation = RegulationTrack::Disabled;
        self.lookahead = None;
        self.published_bound = None;
        self.sync_own_record();
        self.push_status();
        Ok(())
    }

    pub fn enable_time_constrained(&mut self) -> Result<(), FedError> {
        if self.timeline.constrained.is_enabled() {
            return Err(FedError::TimeConstrainedAlreadyEnabled);
        }
        if self.timeline.advance.is_pending() {
            return Err(FedError::InTimeAdvancingState);
        }
        self.timeline.constrained = ConstrainedTrack::Enabled;
        // Anything timestamped at or before the current time arrived while
        // the constraint was not yet active.
        self.queues.drop_tso_at_or_before(self.committed);
        self.sync_own_record();
        self.push_status();
        self.callbacks
            .push_back(FedCallback::TimeConstrainedEnabled(self.committed));
        Ok(())
    }

    pub fn disable_time_constrained(&mut self) -> Result<(), FedError> {
        if !self.timeline.constrained.is_enabled() {
            return Err(FedError::TimeConstrainedIsNotEnabled);
        }
        self.timeline.constrained = ConstrainedTrack::Disabled;
        // Remaining timestamped events degrade to receive order.
        for entry in self.queues.drain_tso() {
            let callback = envelope_callback(entry.envelope, OrderType::Receive, entry.timestamp);
            self.queues.push_ro(callback);
        }
        self.sync_own_record();
        self.push_status();
        Ok(())
    }

    pub fn modify_lookahead(&mut self, lookahead: T::Interval) -> Result<(), FedError> {
        if !self.timeline.regulation.is_enabled() {
            return Err(FedError::TimeRegulationIsNotEnabled);
        }
        if self.timeline.advance.is_pending() {
            return Err(FedError::InTimeAdvancingState);
        }
        if !T::interval_is_admissible(&lookahead) {
            return Err(FedError::InvalidLookahead);
        }
        self.lookahead = Some(lookahead);
        // A lookahead change never lowers an already-published bound.
        self.raise_bound(idle_bound(self.committed, lookahead));
        self.sync_own_record();
        self.push_status();
        Ok(())
    }

    pub fn enable_asynchronous_delivery(&mut self) {
        self.async_delivery = true;
    }

    pub fn disable_asynchronous_delivery(&mut self) {
        self.async_delivery = false;
    }

    // --- time management: queries ---

    pub fn query_logical_time(&self) -> T {
        self.committed
    }

    pub fn query_lookahead(&self) -> Result<T::Interval, FedError> {
        self.lookahead.ok_or(FedError::TimeRegulationIsNotEnabled)
    }

    /// GALT: the LBTS this federate observes, absent when no other federate
    /// currently regulates.
    pub fn query_galt(&self) -> Option<T> {
        self.directory
            .has_contributors_excluding(self.handle)
            .then(|| self.directory.lbts_excluding(self.handle).time)
    }

    /// LITS: the timestamp of the next TSO event this federate could be
    /// handed, the earlier of the queue head and GALT.
    pub fn query_lits(&mut self) -> Option<T> {
        let galt = self.query_galt();
        let head = self.queues.min_tso_position().map(|p| p.time);
        match (galt, head) {
            (Some(g), Some(h)) => Some(g.min(h)),
            (Some(g), None) => Some(g),
            (None, head) => head,
        }
    }

    // --- time management: the five advance primitives ---

    pub fn time_advance_request(&mut self, target: T) -> Result<(), FedError> {
        self.request_advance(AdvanceMode::TimeAdvanceRequest, target)
    }

    pub fn time_advance_request_available(&mut self, target: T) -> Result<(), FedError> {
        self.request_advance(AdvanceMode::TimeAdvanceRequestAvailable, target)
    }

    pub fn next_message_request(&mut self, target: T) -> Result<(), FedError> {
        self.request_advance(AdvanceMode::NextMessageRequest, target)
    }

    pub fn next_message_request_available(&mut self, target: T) -> Result<(), FedError> {
        self.request_advance(AdvanceMode::NextMessageRequestAvailable, target)
    }

    pub fn flush_queue_request(&mut self, target: T) -> Result<(), FedError> {
        self.request_advance(AdvanceMode::FlushQueueRequest, target)
    }

    fn request_advance(&mut self, mode: AdvanceMode, target: T) -> Result<(), FedError> {
        if self.timeline.advance.is_pending() {
            return Err(FedError::InTimeAdvancingState);
        }
        if self.timeline.regulation.is_pending() {
            return Err(FedError::RequestForTimeRegulationPending);
        }
        if !target.is_admissible() {
            return Err(FedError::InvalidLogicalTime);
        }
        if target < self.committed {
            return Err(FedError::LogicalTimeAlreadyPassed);
        }

        if mode == AdvanceMode::FlushQueueRequest {
            self.timeline.advance = AdvanceTrack::Pending { mode, target };
            if self.timeline.constrained.is_enabled() {
                // Flush grants immediately from whatever is already queued,
                // without consulting LBTS.
                let delivered = self.deliver_tso(TimePosition::closed(target), None);
                let grant = delivered.map_or(self.committed, |t| t.max(self.committed));
                self.complete_advance(grant);
            } else {
                // Unconstrained federates advance unhindered.
                self.complete_advance(target);
            }
            return Ok(());
        }

        self.timeline.advance = AdvanceTrack::Pending { mode, target };
        if matches!(
            mode,
            AdvanceMode::TimeAdvanceRequest | AdvanceMode::TimeAdvanceRequestAvailable
        ) {
            if let Some(lookahead) = self.lookahead {
                // Nothing will be sent below the target once granted.
                if self.raise_bound(advance_bound(mode, target, lookahead)) {
                    self.sync_own_record();
                    self.push_status();
                }
            }
        }
        self.reevaluate();
        Ok(())
    }

    // --- server events ---

    pub fn handle_event(&mut self, msg: DownstreamMsg) -> Result<(), FedError> {
        match msg {
            DownstreamMsg::FederateJoined(info) => {
                let record = FederateRecord::try_from(&info)?;
                self.directory.install(info.handle, record);
                self.reevaluate();
            }
            DownstreamMsg::FederateResigned { federate } => {
                self.directory.remove(federate);
                self.reevaluate();
            }
            DownstreamMsg::StatusChanged { federate, status } => {
                if let Some(record) = self.directory.get_mut(federate) {
                    record.apply_status(&status)?;
                } else {
                    tracing::warn!(%federate, "Status change for unknown federate.");
                }
                self.reevaluate();
            }
            DownstreamMsg::RegulationProposed { subject, info } => {
                let record = FederateRecord::try_from(&info)?;
                self.directory.install(subject, record);
                self.outbox.push(UpstreamMsg::AckRegulation { subject });
                self.reevaluate();
            }
            DownstreamMsg::RegulationGranted { time } => {
                let granted: T = time.to_time()?;
                let RegulationTrack::EnablingPending { lookahead } = self.timeline.regulation
                else {
                    return Err(FedError::NoRequestToEnableTimeRegulationWasPending);
                };
                self.timeline.regulation = RegulationTrack::Enabled;
                self.lookahead = Some(lookahead);
                self.committed = self.committed.max(granted);
                self.published_bound = Some(idle_bound(self.committed, lookahead));
                self.sync_own_record();
                self.callbacks
                    .push_back(FedCallback::TimeRegulationEnabled(self.committed));
                self.reevaluate();
            }
            DownstreamMsg::Message(envelope) => {
                self.enqueue(envelope)?;
                self.reevaluate();
            }
            DownstreamMsg::Retract(handle) => {
                self.queues.retract(handle);
                self.reevaluate();
            }
            DownstreamMsg::Discover {
                object,
                class,
                name,
            } => {
                self.objects.insert(
                    object,
                    ObjectRecord {
                        class,
                        name: name.clone(),
                        owner: object.registrant,
                    },
                );
                self.queues.push_ro(FedCallback::DiscoverObject {
                    object,
                    class,
                    name,
                });
            }
            DownstreamMsg::ProvideUpdate {
                object,
                attributes,
                tag,
            } => {
                self.queues.push_ro(FedCallback::ProvideUpdate {
                    object,
                    attributes,
                    tag,
                });
            }
            DownstreamMsg::ResignAccepted => {}
        }
        Ok(())
    }

    fn enqueue(&mut self, envelope: MessageEnvelope) -> Result<(), FedError> {
        let timestamp = envelope
            .timestamp
            .as_ref()
            .map(|t| t.to_time::<T>())
            .transpose()?;

        let timestamped = envelope.sent_order == OrderType::TimeStamp && timestamp.is_some();
        if timestamped && self.timeline.constrained.is_enabled() {
            let timestamp = timestamp.unwrap();
            self.queues.push_tso(TsoEntry {
                position: TimePosition::closed(timestamp),
                sender: envelope.sender,
                sent_serial: envelope.sent_serial,
                timestamp,
                envelope,
            });
        } else {
            // Not constrained: even timestamped messages degenerate to
            // receive order, timestamp passed through.
            let callback = match timestamp {
                Some(t) => envelope_callback(envelope, OrderType::Receive, t),
                None => envelope_callback_untimed(envelope),
            };
            self.queues.push_ro(callback);
        }
        Ok(())
    }

    // --- the grant machinery ---

    /// Re-run delivery and the grant predicate. Called after every event
    /// that can move LBTS, the queue or the timeline.
    fn reevaluate(&mut self) {
        self.flush_receive_order();
        let AdvanceTrack::Pending { mode, target } = self.timeline.advance else {
            return;
        };
        if !self.timeline.constrained.is_enabled() {
            // Unconstrained federates advance unhindered.
            self.complete_advance(target);
            return;
        }
        let lbts = self.directory.lbts_excluding(self.handle);
        match mode {
            AdvanceMode::TimeAdvanceRequest | AdvanceMode::TimeAdvanceRequestAvailable => {
                let window = TimePosition::closed(target);
                self.deliver_tso(window, Some(lbts));
                let granted = match mode {
                    AdvanceMode::TimeAdvanceRequest => lbts >= window,
                    _ => lbts >= TimePosition::open(target),
                };
                let drained = self
                    .queues
                    .min_tso_position()
                    .map_or(true, |head| !(head <= window && head < lbts));
                if granted && drained {
                    self.complete_advance(target);
                }
            }
            AdvanceMode::NextMessageRequest | AdvanceMode::NextMessageRequestAvailable => {
                self.reevaluate_next_message(mode, target, lbts);
            }
            AdvanceMode::FlushQueueRequest => {
                // Flush completes inside the request; never pending here.
            }
        }
    }

    fn reevaluate_next_message(&mut self, mode: AdvanceMode, target: T, lbts: TimePosition<T>) {
        // Publish the conditional bound: the grant cannot happen below the
        // floor, so nothing will be sent below floor + lookahead. Raised
        // monotonically as LBTS and the queue evolve.
        if let Some(lookahead) = self.lookahead {
            let head = self.queues.min_tso_position().map(|p| p.time);
            let floor = next_message_floor(target, head, lbts);
            if self.raise_bound(advance_bound(mode, floor, lookahead)) {
                self.sync_own_record();
                self.push_status();
            }
        }

        let window = TimePosition::closed(target);
        match self.queues.min_tso_position() {
            Some(head) if head <= window => {
                let reachable = match mode {
                    AdvanceMode::NextMessageRequest => lbts > head,
                    _ => lbts >= head,
                };
                if reachable {
                    let grant = head.time;
                    // Deliver every message carrying exactly the grant
                    // timestamp; later arrivals at the same time fall into
                    // the next cycle (available flavor) or cannot happen
                    // (complete flavor).
                    self.deliver_tso(TimePosition::closed(grant), None);
                    self.complete_advance(grant);
                }
            }
            _ => {
                if lbts >= window {
                    self.complete_advance(target);
                }
            }
        }
    }

    /// Deliver queued TSO events with position `<= limit` (and strictly below
    /// `horizon` when given), in `(timestamp, sender, serial)` order.
    /// Returns the highest timestamp delivered.
    fn deliver_tso(&mut self, limit: TimePosition<T>, horizon: Option<TimePosition<T>>) -> Option<T> {
        let mut last = None;
        while let Some(entry) = self.queues.pop_tso_within(limit, horizon) {
            last = Some(entry.timestamp);
            if let MessageBody::DeleteObject { object } = &entry.envelope.body {
                let object = *object;
                self.objects.remove(&object);
                self.queues.purge_where(|envelope| match &envelope.body {
                    MessageBody::UpdateAttributes { object: o, .. } => *o == object,
                    _ => false,
                });
            }
            let callback = envelope_callback(entry.envelope, OrderType::TimeStamp, entry.timestamp);
            self.callbacks.push_back(callback);
        }
        last
    }

    fn complete_advance(&mut self, grant: T) {
        self.flush_receive_order();
        self.timeline.advance = AdvanceTrack::Idle;
        self.committed = self.committed.max(grant);

        // Close the retraction window of everything now in the past.
        let expired: Vec<_> = self
            .retractables
            .iter()
            .filter(|(_, ts)| **ts <= self.committed)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in expired {
            self.retractables.remove(&handle);
            self.expired_retractions.insert(handle);
        }

        if let Some(lookahead) = self.lookahead {
            self.raise_bound(idle_bound(self.committed, lookahead));
        }
        self.sync_own_record();
        self.push_status();
        // The grant is always the last callback of its cycle.
        self.callbacks.push_back(FedCallback::TimeAdvanceGrant(grant));
    }

    /// Move receive-order events to the callback queue whenever RO delivery
    /// is permitted: asynchronous delivery enabled, not time constrained, or
    /// an advance in flight.
    fn flush_receive_order(&mut self) {
        let permitted = self.async_delivery
            || !self.timeline.constrained.is_enabled()
            || self.timeline.advance.is_pending();
        if !permitted {
            return;
        }
        while let Some(callback) = self.queues.pop_ro() {
            if let Some(handle) = callback.retraction() {
                if self.queues.is_retracted(&handle) {
                    continue;
                }
            }
            if let FedCallback::RemoveObject { object, .. } = &callback {
                self.objects.remove(object);
            }
            self.callbacks.push_back(callback);
        }
    }

    fn raise_bound(&mut self, candidate: TimePosition<T>) -> bool {
        if !self.timeline.regulation.is_enabled() {
            return false;
        }
        match self.published_bound {
            Some(current) if current >= candidate => false,
            _ => {
                self.published_bound = Some(candidate);
                true
            }
        }
    }

    fn sync_own_record(&mut self) {
        let regulating = self.timeline.regulation.is_enabled();
        let constrained = self.timeline.constrained.is_enabled();
        let committed = self.committed;
        let lookahead = self.lookahead;
        let bound = self.published_bound;
        if let Some(record) = self.directory.get_mut(self.handle) {
            record.regulating = regulating;
            record.constrained = constrained;
            record.committed = committed;
            record.lookahead = lookahead;
            record.bound = bound;
        }
    }

    fn push_status(&mut self) {
        let status = self.my_status();
        self.outbox.push(UpstreamMsg::CommitStatus { status });
    }

    fn my_status(&self) -> FederateStatus {
        FederateStatus {
            regulating: self.timeline.regulation.is_enabled(),
            constrained: self.timeline.constrained.is_enabled(),
            committed: TimeBytes::of(self.committed),
            lookahead: self.lookahead.map(TimeBytes::of_interval::<T>),
            bound: self.published_bound.map(|b| b.map_time(TimeBytes::of)),
        }
    }

    pub fn prepare_resign(&mut self, action: ResignAction) {
        self.outbox.push(UpstreamMsg::Resign { action });
    }
}

fn envelope_callback<T: LogicalTime>(
    envelope: MessageEnvelope,
    received_order: OrderType,
    time: T,
) -> FedCallback<T> {
    let info = ReceiveInfo {
        sender: envelope.sender,
        sent_order: envelope.sent_order,
        received_order,
        time: Some(time),
        retraction: envelope.retraction,
    };
    body_callback(envelope.body, envelope.tag, info)
}

fn envelope_callback_untimed<T: LogicalTime>(envelope: MessageEnvelope) -> FedCallback<T> {
    let info = ReceiveInfo {
        sender: envelope.sender,
        sent_order: envelope.sent_order,
        received_order: OrderType::Receive,
        time: None,
        retraction: envelope.retraction,
    };
    body_callback(envelope.body, envelope.tag, info)
}

fn body_callback<T: LogicalTime>(
    body: MessageBody,
    tag: UserTag,
    info: ReceiveInfo<T>,
) -> FedCallback<T> {
    match body {
        MessageBody::UpdateAttributes { object, values } => FedCallback::ReflectAttributes {
            object,
            values,
            tag,
            info,
        },
        MessageBody::Interaction { class, parameters } => FedCallback::ReceiveInteraction {
            class,
            parameters,
            tag,
            info,
        },
        MessageBody::DeleteObject { object } => FedCallback::RemoveObject { object, tag, info },
    }
}
