//! End-to-end federation tests over real sockets: an in-process `rtinode`,
//! two federates, time regulation and constrained advances.

use std::net::SocketAddr;
use std::time::Duration;

use cadence::{
    core::{HlaFloat64Time, HlaInteger64Interval, HlaInteger64Time, TimeKind},
    federation::ObjectModel,
    ConnectSettings, Connection, FedError, FederateAmbassador, RtiAmbassador,
};

type T = HlaInteger64Time;

fn iv(value: i64) -> HlaInteger64Interval {
    HlaInteger64Interval::new(value)
}

fn t(value: i64) -> T {
    HlaInteger64Time::new(value)
}

async fn start_node() -> SocketAddr {
    let listener = cadence::rti::create_listener("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(cadence::rti::serve(listener));
    addr
}

fn settings_for(addr: SocketAddr) -> ConnectSettings {
    ConnectSettings {
        rti_node: addr.to_string(),
        ..Default::default()
    }
}

#[derive(Default)]
struct Recorder {
    regulation_enabled_at: Option<i64>,
    constrained_enabled_at: Option<i64>,
    grants: Vec<i64>,
}

impl FederateAmbassador<T> for Recorder {
    fn time_regulation_enabled(&mut self, time: T) -> anyhow::Result<()> {
        self.regulation_enabled_at = Some(time.value());
        Ok(())
    }

    fn time_constrained_enabled(&mut self, time: T) -> anyhow::Result<()> {
        self.constrained_enabled_at = Some(time.value());
        Ok(())
    }

    fn time_advance_grant(&mut self, time: T) -> anyhow::Result<()> {
        self.grants.push(time.value());
        Ok(())
    }
}

/// Pump both federates until `pred` holds on the pair of recorders.
async fn pump_until(
    a: (&RtiAmbassador<T>, &mut Recorder),
    b: (&RtiAmbassador<T>, &mut Recorder),
    pred: impl Fn(&Recorder, &Recorder) -> bool,
) {
    for _ in 0..400 {
        if pred(a.1, b.1) {
            return;
        }
        let _ = a.0.evoke_callback(a.1, Duration::from_millis(10)).await;
        let _ = b.0.evoke_callback(b.1, Duration::from_millis(10)).await;
    }
    panic!("federation did not settle");
}

#[test_log::test(tokio::test)]
async fn two_federates_advance_in_lockstep() {
    let addr = start_node().await;
    let mut connection = Connection::connect(settings_for(addr)).await.unwrap();
    connection
        .create_federation_execution("lockstep", ObjectModel::default())
        .await
        .unwrap();

    let amb_a = connection
        .join_federation_execution::<T>("lockstep", "demo", Some("A"))
        .await
        .unwrap();
    let amb_b = connection
        .join_federation_execution::<T>("lockstep", "demo", Some("B"))
        .await
        .unwrap();

    let mut fed_a = Recorder::default();
    let mut fed_b = Recorder::default();

    amb_a.enable_time_regulation(iv(1)).unwrap();
    pump_until((&amb_a, &mut fed_a), (&amb_b, &mut fed_b), |a, _| {
        a.regulation_enabled_at.is_some()
    })
    .await;
    assert_eq!(fed_a.regulation_enabled_at, Some(0));

    amb_b.enable_time_regulation(iv(1)).unwrap();
    pump_until((&amb_a, &mut fed_a), (&amb_b, &mut fed_b), |_, b| {
        b.regulation_enabled_at.is_some()
    })
    .await;
    // B joins regulation at the LBTS A already contributes.
    assert_eq!(fed_b.regulation_enabled_at, Some(1));

    amb_a.enable_time_constrained().unwrap();
    amb_b.enable_time_constrained().unwrap();
    pump_until((&amb_a, &mut fed_a), (&amb_b, &mut fed_b), |a, b| {
        a.constrained_enabled_at.is_some() && b.constrained_enabled_at.is_some()
    })
    .await;

    // A asks for 10, B for 5: B is granted first, A waits for B's
    // contribution to pass (10, closed).
    amb_a.time_advance_request(t(10)).unwrap();
    amb_b.time_advance_request(t(5)).unwrap();
    pump_until((&amb_a, &mut fed_a), (&amb_b, &mut fed_b), |_, b| {
        !b.grants.is_empty()
    })
    .await;
    assert_eq!(fed_b.grants, vec![5]);
    assert!(fed_a.grants.is_empty());

    amb_b.time_advance_request(t(9)).unwrap();
    pump_until((&amb_a, &mut fed_a), (&amb_b, &mut fed_b), |a, b| {
        !a.grants.is_empty() && b.grants.len() == 2
    })
    .await;
    assert_eq!(fed_a.grants, vec![10]);
    assert_eq!(fed_b.grants, vec![5, 9]);
    assert_eq!(amb_a.query_logical_time().unwrap(), t(10));

    amb_b
        .resign_federation_execution(cadence::ResignAction::NoAction)
        .await
        .unwrap();
    assert_eq!(
        amb_b.time_advance_request(t(20)),
        Err(FedError::FederateNotExecutionMember)
    );
}

struct ReentryProbe {
    ambassador: RtiAmbassador<T>,
    observed: Option<Result<(), FedError>>,
}

impl FederateAmbassador<T> for ReentryProbe {
    fn time_constrained_enabled(&mut self, _time: T) -> anyhow::Result<()> {
        // Calling back into the ambassador from within a callback is
        // forbidden; record what the guard says.
        self.observed = Some(self.ambassador.time_advance_request(t(1)));
        Ok(())
    }
}

#[test_log::test(tokio::test)]
async fn reentry_from_callback_is_rejected() {
    let addr = start_node().await;
    let mut connection = Connection::connect(settings_for(addr)).await.unwrap();
    connection
        .create_federation_execution("reentry", ObjectModel::default())
        .await
        .unwrap();
    let ambassador = connection
        .join_federation_execution::<T>("reentry", "demo", None)
        .await
        .unwrap();

    let mut probe = ReentryProbe {
        ambassador: ambassador.clone(),
        observed: None,
    };
    ambassador.enable_time_constrained().unwrap();
    for _ in 0..100 {
        ambassador
            .evoke_callback(&mut probe, Duration::from_millis(10))
            .await
            .unwrap();
        if probe.observed.is_some() {
            break;
        }
    }
    assert_eq!(
        probe.observed,
        Some(Err(FedError::CallNotAllowedFromWithinCallback))
    );
}

#[test_log::test(tokio::test)]
async fn time_kind_must_match_the_connection() {
    let addr = start_node().await;
    let mut connection = Connection::connect(settings_for(addr)).await.unwrap();
    connection
        .create_federation_execution("kinds", ObjectModel::default())
        .await
        .unwrap();
    assert_eq!(connection.settings().time_kind, TimeKind::HlaInteger64Time);

    let err = connection
        .join_federation_execution::<HlaFloat64Time>("kinds", "demo", None)
        .await
        .unwrap_err();
    assert!(matches!(err, FedError::CouldNotCreateLogicalTimeFactory(_)));
}

#[test_log::test(tokio::test)]
async fn unconstrained_federate_advances_immediately() {
    let addr = start_node().await;
    let mut connection = Connection::connect(settings_for(addr)).await.unwrap();
    connection
        .create_federation_execution("solo", ObjectModel::default())
        .await
        .unwrap();
    let ambassador = connection
        .join_federation_execution::<T>("solo", "demo", None)
        .await
        .unwrap();

    let mut recorder = Recorder::default();
    ambassador.time_advance_request(t(42)).unwrap();
    for _ in 0..100 {
        ambassador
            .evoke_callback(&mut recorder, Duration::from_millis(10))
            .await
            .unwrap();
        if !recorder.grants.is_empty() {
            break;
        }
    }
    assert_eq!(recorder.grants, vec![42]);
    assert_eq!(ambassador.query_galt().unwrap(), None);
}
