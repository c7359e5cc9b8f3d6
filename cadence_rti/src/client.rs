//! The federate side of the RTI connection.
//!
//! `connect` dials the server (bounded exponential backoff), splits the
//! framed socket, and wraps the sink in an unbounded channel so the
//! synchronous kernel can enqueue messages without touching the network.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::Framed;

use cadence_core::TimeKind;
use cadence_federation::{
    proto::{DownstreamMsg, JoinSnapshot, UpstreamMsg},
    FedError, ObjectModel,
};

use crate::{codec, msg::RtiMsg};

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not reach RTI node: {0}")]
    Unreachable(std::io::Error),

    #[error("the RTI closed the connection unexpectedly")]
    UnexpectedClose,

    #[error("received an unexpected message from the RTI: {0:?}")]
    UnexpectedMessage(Box<RtiMsg>),

    #[error(transparent)]
    Federation(#[from] FedError),
}

impl From<ClientError> for FedError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Federation(err) => err,
            ClientError::Unreachable(_) | ClientError::UnexpectedClose => FedError::NotConnected,
            ClientError::UnexpectedMessage(msg) => {
                FedError::RtiInternalError(format!("unexpected message: {msg:?}"))
            }
        }
    }
}

/// A live connection to an RTI node.
#[derive(Debug)]
pub struct RtiClient {
    sender: mpsc::UnboundedSender<RtiMsg>,
    incoming: mpsc::UnboundedReceiver<RtiMsg>,
}

/// A cloneable handle that enqueues upstream messages onto the socket.
#[derive(Debug, Clone)]
pub struct RtiSender {
    sender: mpsc::UnboundedSender<RtiMsg>,
}

impl RtiSender {
    pub fn send(&self, msg: UpstreamMsg) -> Result<(), ClientError> {
        self.sender
            .send(RtiMsg::Up(msg))
            .map_err(|_| ClientError::UnexpectedClose)
    }
}

/// Dial the RTI node, retrying with exponential backoff (three attempts).
#[tracing::instrument]
pub async fn connect(addr: SocketAddr) -> Result<RtiClient, ClientError> {
    let mut backoff = CONNECT_BACKOFF;
    let mut last_err = None;
    let mut socket = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                socket = Some(stream);
                break;
            }
            Err(err) => {
                tracing::warn!(attempt, "Connect failed: {err}; retrying in {backoff:?}.");
                last_err = Some(err);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
    let Some(socket) = socket else {
        return Err(ClientError::Unreachable(
            last_err.expect("at least one attempt"),
        ));
    };
    tracing::info!("Connected to RTI node.");

    let framed = Framed::new(socket, codec::create::<RtiMsg>());
    let (sink, mut stream) = framed.split();

    // Multiple senders funnel into the socket through one channel.
    let (sender, to_socket) = mpsc::unbounded_channel::<RtiMsg>();
    tokio::spawn(
        UnboundedReceiverStream::new(to_socket)
            .map(Ok)
            .forward(sink),
    );

    let (incoming_tx, incoming) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(msg) => {
                    if incoming_tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!("Decode error from RTI: {err}");
                    break;
                }
            }
        }
        tracing::debug!("RTI read loop ended.");
    });

    Ok(RtiClient { sender, incoming })
}

impl RtiClient {
    pub async fn create_federation(
        &mut self,
        federation: &str,
        model: ObjectModel,
        time_kind: TimeKind,
    ) -> Result<(), ClientError> {
        let reply = self
            .request(RtiMsg::CreateFederation {
                federation: federation.to_owned(),
                model,
                time_kind,
            })
            .await?;
        expect_ack(reply)
    }

    pub async fn destroy_federation(&mut self, federation: &str) -> Result<(), ClientError> {
        let reply = self
            .request(RtiMsg::DestroyFederation {
                federation: federation.to_owned(),
            })
            .await?;
        expect_ack(reply)
    }

    pub async fn list_federations(&mut self) -> Result<Vec<String>, ClientError> {
        match self.request(RtiMsg::ListFederations).await? {
            RtiMsg::FederationList(names) => Ok(names),
            RtiMsg::Error(err) => Err(err.into()),
            other => Err(ClientError::UnexpectedMessage(Box::new(other))),
        }
    }

    pub async fn join(
        &mut self,
        federation: &str,
        federate_type: &str,
        federate_name: Option<&str>,
    ) -> Result<JoinSnapshot, ClientError> {
        let reply = self
            .request(RtiMsg::Join {
                federation: federation.to_owned(),
                federate_type: federate_type.to_owned(),
                federate_name: federate_name.map(str::to_owned),
            })
            .await?;
        match reply {
            RtiMsg::Joined(snapshot) => Ok(*snapshot),
            RtiMsg::Error(err) => Err(err.into()),
            other => Err(ClientError::UnexpectedMessage(Box::new(other))),
        }
    }

    /// Enqueue an in-federation message; never blocks on the network.
    pub fn send(&self, msg: UpstreamMsg) -> Result<(), ClientError> {
        self.sender
            .send(RtiMsg::Up(msg))
            .map_err(|_| ClientError::UnexpectedClose)
    }

    pub fn sender(&self) -> RtiSender {
        RtiSender {
            sender: self.sender.clone(),
        }
    }

    /// Next downstream message, if the connection is still up.
    pub async fn recv(&mut self) -> Option<DownstreamMsg> {
        loop {
            match self.incoming.recv().await? {
                RtiMsg::Down(msg) => return Some(msg),
                other => {
                    tracing::warn!(?other, "Unexpected non-downstream message; ignoring.");
                }
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<DownstreamMsg> {
        loop {
            match self.incoming.try_recv().ok()? {
                RtiMsg::Down(msg) => return Some(msg),
                other => {
                    tracing::warn!(?other, "Unexpected non-downstream message; ignoring.");
                }
            }
        }
    }

    async fn request(&mut self, msg: RtiMsg) -> Result<RtiMsg, ClientError> {
        self.sender
            .send(msg)
            .map_err(|_| ClientError::UnexpectedClose)?;
        self.incoming
            .recv()
            .await
            .ok_or(ClientError::UnexpectedClose)
    }
}

fn expect_ack(reply: RtiMsg) -> Result<(), ClientError> {
    match reply {
        RtiMsg::Ack => Ok(()),
        RtiMsg::Error(err) => Err(err.into()),
        other => Err(ClientError::UnexpectedMessage(Box::new(other))),
    }
}
