//! RTI transport for Cadence: the wire codec, the federation server, and the
//! federate-side client connection.
#![deny(clippy::all)]

pub mod client;
pub mod codec;
pub mod msg;
pub mod server;

pub use client::{connect, ClientError, RtiClient, RtiSender};
pub use msg::RtiMsg;
pub use server::{create_listener, serve, ServerError};

#[cfg(test)]
mod tests {
    use cadence_core::TimeKind;
    use cadence_federation::{proto::UpstreamMsg, FedError, ObjectModel, ResignAction};

    use crate::{client, server};

    async fn start_server() -> std::net::SocketAddr {
        let listener = server::create_listener("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server::serve(listener));
        addr
    }

    #[test_log::test(tokio::test)]
    async fn create_join_and_resign() {
        let addr = start_server().await;

        let mut client = client::connect(addr).await.unwrap();
        client
            .create_federation("fed", ObjectModel::default(), TimeKind::HlaInteger64Time)
            .await
            .unwrap();

        // Creating the same execution twice fails.
        let err = client
            .create_federation("fed", ObjectModel::default(), TimeKind::HlaInteger64Time)
            .await
            .unwrap_err();
        assert!(matches!(
            FedError::from(err),
            FedError::FederationExecutionAlreadyExists(_)
        ));

        let snapshot = client.join("fed", "demo", Some("alpha")).await.unwrap();
        assert!(snapshot.federates.is_empty());

        // A second federate with the same name is rejected.
        let mut second = client::connect(addr).await.unwrap();
        let err = second.join("fed", "demo", Some("alpha")).await.unwrap_err();
        assert!(matches!(
            FedError::from(err),
            FedError::NameAlreadyInUse(_)
        ));

        // A second federate with a fresh name sees the first.
        let snapshot2 = second.join("fed", "demo", Some("beta")).await.unwrap();
        assert_eq!(snapshot2.federates.len(), 1);
        assert_eq!(snapshot2.federates[0].name, "alpha");

        client
            .send(UpstreamMsg::Resign {
                action: ResignAction::NoAction,
            })
            .unwrap();
        // The resigner gets its acknowledgement...
        let msg = client.recv().await.unwrap();
        assert!(matches!(
            msg,
            cadence_federation::proto::DownstreamMsg::ResignAccepted
        ));
        // ...and the peer sees the departure (after the join broadcast).
        loop {
            match second.recv().await.unwrap() {
                cadence_federation::proto::DownstreamMsg::FederateResigned { .. } => break,
                _ => continue,
            }
        }
    }

    #[test_log::test(tokio::test)]
    async fn join_unknown_federation_is_rejected() {
        let addr = start_server().await;
        let mut client = client::connect(addr).await.unwrap();
        let err = client.join("nope", "demo", None).await.unwrap_err();
        assert!(matches!(
            FedError::from(err),
            FedError::FederationNotFound(_)
        ));
    }

    #[test_log::test(tokio::test)]
    async fn destroy_refuses_while_joined() {
        let addr = start_server().await;
        let mut admin = client::connect(addr).await.unwrap();
        admin
            .create_federation("fed", ObjectModel::default(), TimeKind::HlaFloat64Time)
            .await
            .unwrap();

        let mut member = client::connect(addr).await.unwrap();
        member.join("fed", "demo", None).await.unwrap();

        let err = admin.destroy_federation("fed").await.unwrap_err();
        assert!(matches!(
            FedError::from(err),
            FedError::FederatesCurrentlyJoined
        ));

        member
            .send(UpstreamMsg::Resign {
                action: ResignAction::NoAction,
            })
            .unwrap();
        member.recv().await.unwrap();

        admin.destroy_federation("fed").await.unwrap();
        assert!(admin.list_federations().await.unwrap().is_empty());
    }
}
