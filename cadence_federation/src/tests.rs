//! End-to-end scenarios driven through an in-memory federation: N kernels,
//! one coordinator, messages shuttled synchronously until quiescent.

use std::collections::{BTreeMap, VecDeque};

use cadence_core::{FederateHandle, HlaInteger64Interval, HlaInteger64Time};

use crate::{
    catalog::{InteractionClassDef, ObjectClassDef, ObjectModel},
    coordinator::Coordinator,
    error::FedError,
    events::FedCallback,
    kernel::FederateKernel,
    proto::{DownstreamMsg, OrderType, ResignAction},
};

type T = HlaInteger64Time;

fn t(value: i64) -> T {
    HlaInteger64Time::new(value)
}

fn la(value: i64) -> HlaInteger64Interval {
    HlaInteger64Interval::new(value)
}

fn test_model() -> ObjectModel {
    ObjectModel {
        object_classes: vec![ObjectClassDef {
            name: "ObjectClass0".into(),
            attributes: vec!["attribute0".into(), "attribute1".into()],
        }],
        interaction_classes: vec![InteractionClassDef {
            name: "InteractionClass0".into(),
            parameters: vec!["parameter0".into()],
        }],
    }
}

/// In-memory federation: kernels wired straight to the coordinator.
struct Harness {
    coordinator: Coordinator<T>,
    kernels: BTreeMap<FederateHandle, FederateKernel<T>>,
    inboxes: BTreeMap<FederateHandle, VecDeque<DownstreamMsg>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            coordinator: Coordinator::new("test", test_model()),
            kernels: BTreeMap::new(),
            inboxes: BTreeMap::new(),
        }
    }

    fn join(&mut self, name: &str) -> FederateHandle {
        let (snapshot, routed) = self.coordinator.join("test-federate", Some(name)).unwrap();
        let handle = snapshot.handle;
        let kernel = FederateKernel::new(snapshot).unwrap();
        self.kernels.insert(handle, kernel);
        self.inboxes.insert(handle, VecDeque::new());
        self.dispatch(routed);
        self.settle();
        handle
    }

    fn kernel(&mut self, handle: FederateHandle) -> &mut FederateKernel<T> {
        self.kernels.get_mut(&handle).unwrap()
    }

    fn dispatch(&mut self, routed: Vec<(FederateHandle, DownstreamMsg)>) {
        for (to, msg) in routed {
            if let Some(inbox) = self.inboxes.get_mut(&to) {
                inbox.push_back(msg);
            }
        }
    }

    /// Shuttle messages until every outbox and inbox is empty.
    fn settle(&mut self) {
        loop {
            let mut moved = false;
            let handles: Vec<_> = self.kernels.keys().copied().collect();
            for from in &handles {
                let msgs = self.kernels.get_mut(from).unwrap().drain_outbox();
                for msg in msgs {
                    moved = true;
                    let routed = self.coordinator.handle(*from, msg).unwrap();
                    self.dispatch(routed);
                }
            }
            for to in &handles {
                while let Some(msg) = self.inboxes.get_mut(to).and_then(|i| i.pop_front()) {
                    moved = true;
                    self.kernels.get_mut(to).unwrap().handle_event(msg).unwrap();
                }
            }
            if !moved {
                break;
            }
        }
    }

    fn resign(&mut self, handle: FederateHandle, action: ResignAction) {
        self.kernel(handle).prepare_resign(action);
        self.settle();
        self.kernels.remove(&handle);
        self.inboxes.remove(&handle);
        self.settle();
    }

    fn callbacks(&mut self, handle: FederateHandle) -> Vec<FedCallback<T>> {
        let kernel = self.kernel(handle);
        let mut callbacks = Vec::new();
        while let Some(callback) = kernel.next_callback() {
            callbacks.push(callback);
        }
        callbacks
    }

    /// Enable regulation and constraint, settle, and swallow the enabling
    /// callbacks; returns the time regulation was enabled at.
    fn make_regulating(&mut self, handle: FederateHandle, lookahead: i64) -> T {
        self.kernel(handle).enable_time_regulation(la(lookahead)).unwrap();
        self.settle();
        let callbacks = self.callbacks(handle);
        match callbacks.as_slice() {
            [FedCallback::TimeRegulationEnabled(time)] => *time,
            other => panic!("expected TimeRegulationEnabled, got {other:?}"),
        }
    }

    fn make_constrained(&mut self, handle: FederateHandle) -> T {
        self.kernel(handle).enable_time_constrained().unwrap();
        self.settle();
        let callbacks = self.callbacks(handle);
        match callbacks.as_slice() {
            [FedCallback::TimeConstrainedEnabled(time)] => *time,
            other => panic!("expected TimeConstrainedEnabled, got {other:?}"),
        }
    }

    fn subscribe_interactions(&mut self, handle: FederateHandle) {
        let kernel = self.kernel(handle);
        let class = kernel.interaction_class_handle("InteractionClass0").unwrap();
        kernel.subscribe_interaction_class(class).unwrap();
        self.settle();
    }

    fn send_interaction_at(&mut self, handle: FederateHandle, time: i64) {
        let kernel = self.kernel(handle);
        let class = kernel.interaction_class_handle("InteractionClass0").unwrap();
        kernel
            .send_interaction(class, vec![], vec![], Some(t(time)))
            .expect("send rejected");
        self.settle();
    }

    fn publish_interactions(&mut self, handle: FederateHandle) {
        let kernel = self.kernel(handle);
        let class = kernel.interaction_class_handle("InteractionClass0").unwrap();
        kernel.publish_interaction_class(class).unwrap();
        self.settle();
    }
}

fn grant_times(callbacks: &[FedCallback<T>]) -> Vec<i64> {
    callbacks
        .iter()
        .filter_map(|cb| match cb {
            FedCallback::TimeAdvanceGrant(time) => Some(time.value()),
            _ => None,
        })
        .collect()
}

fn interaction_times(callbacks: &[FedCallback<T>]) -> Vec<i64> {
    callbacks
        .iter()
        .filter_map(|cb| match cb {
            FedCallback::ReceiveInteraction { info, .. } => Some(info.time.unwrap().value()),
            _ => None,
        })
        .collect()
}

#[test_log::test]
fn s1_two_federates_tar_with_lookahead() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    assert_eq!(h.make_regulating(a, 1).value(), 0);
    // B joins regulation at the LBTS A already contributes.
    assert_eq!(h.make_regulating(b, 1).value(), 1);
    h.make_constrained(a);
    h.make_constrained(b);

    h.kernel(a).time_advance_request(t(10)).unwrap();
    h.settle();
    h.kernel(b).time_advance_request(t(5)).unwrap();
    h.settle();

    // B is granted 5 while A still waits: A's pending request promises
    // nothing below 10 + lookahead.
    assert_eq!(grant_times(&h.callbacks(b)), vec![5]);
    assert_eq!(grant_times(&h.callbacks(a)), vec![]);

    // A's grant fires once B's contribution passes (10, closed).
    h.kernel(b).time_advance_request(t(9)).unwrap();
    h.settle();
    assert_eq!(grant_times(&h.callbacks(b)), vec![9]);
    assert_eq!(grant_times(&h.callbacks(a)), vec![10]);
    assert_eq!(h.kernel(a).query_logical_time(), t(10));
}

#[test_log::test]
fn s2_zero_lookahead_delivers_at_the_exact_instant() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    h.publish_interactions(a);
    h.subscribe_interactions(b);
    h.make_regulating(a, 0);
    h.make_regulating(b, 0);
    h.make_constrained(b);

    h.send_interaction_at(a, 3);
    h.kernel(a).time_advance_request(t(3)).unwrap();
    h.settle();
    h.kernel(b).time_advance_request(t(3)).unwrap();
    h.settle();

    // The interaction at exactly t=3 arrives before the grant at 3.
    let callbacks = h.callbacks(b);
    assert_eq!(interaction_times(&callbacks), vec![3]);
    assert_eq!(grant_times(&callbacks), vec![3]);
    let last = callbacks.last().unwrap();
    assert!(matches!(last, FedCallback::TimeAdvanceGrant(time) if time.value() == 3));
}

#[test_log::test]
fn s3_retracted_message_is_never_delivered() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    h.publish_interactions(a);
    h.subscribe_interactions(b);
    h.make_regulating(a, 1);
    h.make_constrained(b);

    let class = h.kernel(a).interaction_class_handle("InteractionClass0").unwrap();
    let handle = h
        .kernel(a)
        .send_interaction(class, vec![], vec![], Some(t(10)))
        .unwrap()
        .expect("timestamped send yields a retraction handle");
    h.settle();
    h.kernel(a).retract(handle).unwrap();
    h.settle();

    // Let A pass far beyond 10 so B could receive it if it still existed.
    h.kernel(a).time_advance_request(t(15)).unwrap();
    h.settle();
    h.kernel(b).time_advance_request(t(12)).unwrap();
    h.settle();
    let callbacks = h.callbacks(b);
    assert_eq!(interaction_times(&callbacks), vec![]);
    assert_eq!(grant_times(&callbacks), vec![12]);
    h.callbacks(a);

    // Retracting twice: the handle no longer exists.
    assert_eq!(
        h.kernel(a).retract(handle),
        Err(FedError::InvalidMessageRetractionHandle)
    );

    // A message whose timestamp the sender has already passed can no longer
    // be retracted.
    let handle = h
        .kernel(a)
        .send_interaction(class, vec![], vec![], Some(t(17)))
        .unwrap()
        .unwrap();
    h.settle();
    h.kernel(a).time_advance_request(t(18)).unwrap();
    h.settle();
    h.callbacks(a);
    assert_eq!(
        h.kernel(a).retract(handle),
        Err(FedError::MessageCanNoLongerBeRetracted)
    );
}

#[test_log::test]
fn s4_next_message_request_grants_at_the_message() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    h.publish_interactions(a);
    h.subscribe_interactions(b);
    h.make_regulating(a, 1);
    h.make_constrained(b);

    h.send_interaction_at(a, 7);
    h.kernel(a).time_advance_request(t(10)).unwrap();
    h.settle();

    h.kernel(b).next_message_request(t(100)).unwrap();
    h.settle();

    let callbacks = h.callbacks(b);
    assert_eq!(interaction_times(&callbacks), vec![7]);
    assert_eq!(grant_times(&callbacks), vec![7]);
}

#[test_log::test]
fn s5_flush_queue_drains_without_waiting_for_lbts() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    h.publish_interactions(a);
    h.subscribe_interactions(b);
    h.make_regulating(a, 1);
    h.make_constrained(b);

    h.send_interaction_at(a, 2);
    h.send_interaction_at(a, 3);
    h.send_interaction_at(a, 4);

    h.kernel(b).flush_queue_request(t(100)).unwrap();
    h.settle();

    let callbacks = h.callbacks(b);
    assert_eq!(interaction_times(&callbacks), vec![2, 3, 4]);
    assert_eq!(grant_times(&callbacks), vec![4]);

    // TSO monotonicity across the whole cycle.
    let times: Vec<_> = callbacks.iter().filter_map(|cb| cb.time()).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}

#[test_log::test]
fn flush_queue_on_an_unconstrained_federate_grants_the_target() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    // B regulates; A is neither constrained nor regulating, so nothing may
    // hold its flush back.
    h.make_regulating(b, 1);

    h.kernel(a).flush_queue_request(t(50)).unwrap();
    h.settle();
    assert_eq!(grant_times(&h.callbacks(a)), vec![50]);
    assert_eq!(h.kernel(a).query_logical_time(), t(50));
}

#[test_log::test]
fn s6_resign_drops_the_contribution_immediately() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");
    let c = h.join("C");

    h.make_regulating(a, 1);
    h.make_regulating(c, 1);
    h.make_constrained(b);

    h.kernel(b).time_advance_request(t(10)).unwrap();
    h.settle();
    assert_eq!(grant_times(&h.callbacks(b)), vec![]);

    h.resign(c, ResignAction::CancelThenDeleteThenDivest);

    // Only A holds B back now.
    h.kernel(a).time_advance_request(t(9)).unwrap();
    h.settle();
    assert_eq!(grant_times(&h.callbacks(b)), vec![10]);
}

#[test_log::test]
fn mutual_next_message_requests_converge_without_messages() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    h.make_regulating(a, 1);
    h.make_regulating(b, 1);
    h.make_constrained(a);
    h.make_constrained(b);

    // Neither has anything queued; the conditional bounds must climb to the
    // targets instead of deadlocking.
    h.kernel(a).next_message_request(t(10)).unwrap();
    h.settle();
    h.kernel(b).next_message_request(t(10)).unwrap();
    h.settle();

    assert_eq!(grant_times(&h.callbacks(a)), vec![10]);
    assert_eq!(grant_times(&h.callbacks(b)), vec![10]);
}

#[test_log::test]
fn unconstrained_receiver_gets_timestamped_messages_in_receive_order() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    h.publish_interactions(a);
    h.subscribe_interactions(b);
    h.make_regulating(a, 1);
    // B stays unconstrained.

    h.send_interaction_at(a, 5);

    let callbacks = h.callbacks(b);
    match callbacks.as_slice() {
        [FedCallback::ReceiveInteraction { info, .. }] => {
            assert_eq!(info.sent_order, OrderType::TimeStamp);
            assert_eq!(info.received_order, OrderType::Receive);
            // The timestamp is passed through even though delivery degraded.
            assert_eq!(info.time, Some(t(5)));
        }
        other => panic!("expected one degraded interaction, got {other:?}"),
    }
}

#[test_log::test]
fn receive_order_waits_for_asynchronous_delivery_when_constrained() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    h.publish_interactions(a);
    h.subscribe_interactions(b);
    h.make_constrained(b);

    // A is not regulating, so its sends are receive-ordered.
    let class = h.kernel(a).interaction_class_handle("InteractionClass0").unwrap();
    h.kernel(a)
        .send_interaction(class, vec![], vec![], None)
        .unwrap();
    h.settle();

    // Constrained, idle, asynchronous delivery disabled: held back.
    assert!(h.callbacks(b).is_empty());

    h.kernel(b).enable_asynchronous_delivery();
    let callbacks = h.callbacks(b);
    assert_eq!(callbacks.len(), 1);
    assert!(matches!(
        callbacks[0],
        FedCallback::ReceiveInteraction { ref info, .. } if info.received_order == OrderType::Receive
    ));
}

#[test_log::test]
fn advance_request_state_errors() {
    let mut h = Harness::new();
    let a = h.join("A");
    h.make_constrained(a);
    h.make_regulating(a, 1);

    // A second enable is refused either way.
    assert_eq!(
        h.kernel(a).enable_time_constrained(),
        Err(FedError::TimeConstrainedAlreadyEnabled)
    );
    assert_eq!(
        h.kernel(a).enable_time_regulation(la(1)),
        Err(FedError::TimeRegulationAlreadyEnabled)
    );
    assert_eq!(
        h.kernel(a).enable_time_regulation(la(-3)),
        Err(FedError::TimeRegulationAlreadyEnabled)
    );

    // Join a second federate so grants are not immediate.
    let b = h.join("B");
    h.make_regulating(b, 1);

    h.kernel(a).time_advance_request(t(50)).unwrap();
    h.settle();
    assert_eq!(
        h.kernel(a).time_advance_request(t(60)),
        Err(FedError::InTimeAdvancingState)
    );
    assert_eq!(
        h.kernel(a).modify_lookahead(la(2)),
        Err(FedError::InTimeAdvancingState)
    );

    // Unblock A.
    h.kernel(b).time_advance_request(t(100)).unwrap();
    h.settle();
    assert_eq!(grant_times(&h.callbacks(a)), vec![50]);
    assert_eq!(
        h.kernel(a).time_advance_request(t(20)),
        Err(FedError::LogicalTimeAlreadyPassed)
    );
}

#[test_log::test]
fn lookahead_errors_and_queries() {
    let mut h = Harness::new();
    let a = h.join("A");

    assert_eq!(
        h.kernel(a).enable_time_regulation(la(-1)),
        Err(FedError::InvalidLookahead)
    );
    assert_eq!(
        h.kernel(a).query_lookahead(),
        Err(FedError::TimeRegulationIsNotEnabled)
    );
    assert_eq!(h.kernel(a).query_galt(), None);

    h.make_regulating(a, 3);
    assert_eq!(h.kernel(a).query_lookahead(), Ok(la(3)));

    let b = h.join("B");
    // B observes A's contribution: committed 0 + lookahead 3.
    assert_eq!(h.kernel(b).query_galt(), Some(t(3)));
    assert_eq!(h.kernel(b).query_lits(), Some(t(3)));
    // A has no contributors besides itself.
    assert_eq!(h.kernel(a).query_galt(), None);
}

#[test_log::test]
fn tar_grant_waits_for_queue_drainage() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    h.publish_interactions(a);
    h.subscribe_interactions(b);
    h.make_regulating(a, 1);
    h.make_constrained(b);

    h.send_interaction_at(a, 2);
    h.send_interaction_at(a, 6);
    h.kernel(a).time_advance_request(t(20)).unwrap();
    h.settle();

    h.kernel(b).time_advance_request(t(6)).unwrap();
    h.settle();

    // Both messages precede the grant; delivery in timestamp order; grant
    // last.
    let callbacks = h.callbacks(b);
    assert_eq!(interaction_times(&callbacks), vec![2, 6]);
    assert_eq!(grant_times(&callbacks), vec![6]);
    assert!(matches!(callbacks.last(), Some(FedCallback::TimeAdvanceGrant(_))));
}

#[test_log::test]
fn delivery_tie_break_is_sender_then_serial() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");
    let c = h.join("C");

    h.publish_interactions(a);
    h.publish_interactions(c);
    h.subscribe_interactions(b);
    h.make_regulating(a, 1);
    h.make_regulating(c, 1);
    h.make_constrained(b);

    // Same timestamp from two senders; C sends first but A has the lower
    // handle.
    h.send_interaction_at(c, 5);
    h.send_interaction_at(a, 5);
    h.kernel(a).time_advance_request(t(20)).unwrap();
    h.kernel(c).time_advance_request(t(20)).unwrap();
    h.settle();

    h.kernel(b).time_advance_request(t(5)).unwrap();
    h.settle();

    let callbacks = h.callbacks(b);
    let senders: Vec<_> = callbacks
        .iter()
        .filter_map(|cb| match cb {
            FedCallback::ReceiveInteraction { info, .. } => Some(info.sender),
            _ => None,
        })
        .collect();
    assert_eq!(senders, vec![a, c]);
}

#[test_log::test]
fn object_lifecycle_discover_update_delete() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    let (class, attrs) = {
        let kernel = h.kernel(a);
        let class = kernel.object_class_handle("ObjectClass0").unwrap();
        let attr0 = kernel.attribute_handle(class, "attribute0").unwrap();
        let attr1 = kernel.attribute_handle(class, "attribute1").unwrap();
        (class, vec![attr0, attr1])
    };
    h.kernel(a)
        .publish_object_class_attributes(class, &attrs)
        .unwrap();
    h.kernel(b)
        .subscribe_object_class_attributes(class, &attrs[..1])
        .unwrap();
    h.settle();

    // Registration without publication is refused.
    assert_eq!(
        h.kernel(b).register_object_instance(class, None),
        Err(FedError::ObjectClassNotPublished)
    );

    let object = h
        .kernel(a)
        .register_object_instance(class, Some("obj-0"))
        .unwrap();
    h.settle();
    let callbacks = h.callbacks(b);
    assert!(matches!(
        callbacks.as_slice(),
        [FedCallback::DiscoverObject { name, .. }] if name == "obj-0"
    ));

    // Updates are filtered to the subscribed attribute subset.
    h.kernel(a)
        .update_attribute_values(
            object,
            vec![(attrs[0], vec![1]), (attrs[1], vec![2])],
            vec![],
            None,
        )
        .unwrap();
    h.settle();
    let callbacks = h.callbacks(b);
    match callbacks.as_slice() {
        [FedCallback::ReflectAttributes { values, .. }] => {
            assert_eq!(values.len(), 1);
            assert_eq!(values[0], (attrs[0], vec![1]));
        }
        other => panic!("expected one reflect, got {other:?}"),
    }

    // Duplicate explicit names are refused.
    assert_eq!(
        h.kernel(a).register_object_instance(class, Some("obj-0")),
        Err(FedError::NameAlreadyInUse("obj-0".into()))
    );

    h.kernel(a).delete_object_instance(object, vec![], None).unwrap();
    h.settle();
    let callbacks = h.callbacks(b);
    assert!(matches!(
        callbacks.as_slice(),
        [FedCallback::RemoveObject { object: o, .. }] if *o == object
    ));
    // B no longer knows the instance.
    assert_eq!(
        h.kernel(b).request_attribute_value_update(object, attrs.clone(), vec![]),
        Err(FedError::ObjectInstanceNotKnown)
    );
}

#[test_log::test]
fn request_update_reaches_the_owner() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    let (class, attr) = {
        let kernel = h.kernel(a);
        let class = kernel.object_class_handle("ObjectClass0").unwrap();
        let attr = kernel.attribute_handle(class, "attribute0").unwrap();
        (class, attr)
    };
    h.kernel(a)
        .publish_object_class_attributes(class, &[attr])
        .unwrap();
    h.kernel(b)
        .subscribe_object_class_attributes(class, &[attr])
        .unwrap();
    h.settle();
    let object = h.kernel(a).register_object_instance(class, None).unwrap();
    h.settle();
    h.callbacks(b);

    h.kernel(b)
        .request_attribute_value_update(object, vec![attr], vec![7])
        .unwrap();
    h.settle();
    let callbacks = h.callbacks(a);
    assert!(matches!(
        callbacks.as_slice(),
        [FedCallback::ProvideUpdate { object: o, tag, .. }] if *o == object && tag == &vec![7]
    ));
}

#[test_log::test]
fn send_below_the_published_bound_is_rejected() {
    let mut h = Harness::new();
    let a = h.join("A");
    h.publish_interactions(a);
    h.make_regulating(a, 2);

    let class = h.kernel(a).interaction_class_handle("InteractionClass0").unwrap();
    // Bound is (committed 0 + lookahead 2, closed): t=1 violates it.
    assert_eq!(
        h.kernel(a).send_interaction(class, vec![], vec![], Some(t(1))),
        Err(FedError::InvalidLogicalTime)
    );
    assert!(h
        .kernel(a)
        .send_interaction(class, vec![], vec![], Some(t(2)))
        .is_ok());
}

#[test_log::test]
fn lbts_safety_no_future_delivery() {
    let mut h = Harness::new();
    let a = h.join("A");
    let b = h.join("B");

    h.publish_interactions(a);
    h.subscribe_interactions(b);
    h.make_regulating(a, 1);
    h.make_constrained(b);

    h.send_interaction_at(a, 8);
    // A stays at 0: its contribution is (1, closed), so the message at 8
    // must not be deliverable no matter what B requests.
    h.kernel(b).time_advance_request(t(8)).unwrap();
    h.settle();
    assert!(h.callbacks(b).is_empty());

    h.kernel(a).time_advance_request(t(8)).unwrap();
    h.settle();
    // Now A's pending bound is (9, closed) and everything resolves.
    let callbacks = h.callbacks(b);
    assert_eq!(interaction_times(&callbacks), vec![8]);
    assert_eq!(grant_times(&callbacks), vec![8]);
}
