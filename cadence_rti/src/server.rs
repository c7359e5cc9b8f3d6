//! The federation server: accepts federate connections, hosts any number of
//! federation executions, and runs each federation's coordinator on its own
//! serial task so every directory change is totally ordered.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, oneshot},
};
use tokio_util::codec::Framed;

use cadence_core::{FederateHandle, HlaFloat64Time, HlaInteger64Time, TimeKind};
use cadence_federation::{
    proto::{DownstreamMsg, JoinSnapshot, UpstreamMsg},
    Coordinator, FedError, ObjectModel,
};

use crate::{codec, msg::RtiMsg};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] codec::CodecError),
}

/// One coordinator per federation, erased over the two time kinds.
enum AnyCoordinator {
    I64(Coordinator<HlaInteger64Time>),
    F64(Coordinator<HlaFloat64Time>),
}

macro_rules! with_coordinator {
    ($any:expr, $c:ident => $body:expr) => {
        match $any {
            AnyCoordinator::I64($c) => $body,
            AnyCoordinator::F64($c) => $body,
        }
    };
}

impl AnyCoordinator {
    fn new(kind: TimeKind, federation: &str, model: ObjectModel) -> Self {
        match kind {
            TimeKind::HlaInteger64Time => Self::I64(Coordinator::new(federation, model)),
            TimeKind::HlaFloat64Time => Self::F64(Coordinator::new(federation, model)),
        }
    }
}

enum FederationCmd {
    Join {
        federate_type: String,
        federate_name: Option<String>,
        #[allow(clippy::type_complexity)]
        reply: oneshot::Sender<
            Result<(JoinSnapshot, mpsc::UnboundedReceiver<DownstreamMsg>), FedError>,
        >,
    },
    Up {
        from: FederateHandle,
        msg: UpstreamMsg,
    },
    Disconnect {
        from: FederateHandle,
    },
    Destroy {
        reply: oneshot::Sender<Result<(), FedError>>,
    },
}

#[derive(Default)]
struct Registry {
    federations: Mutex<HashMap<String, mpsc::UnboundedSender<FederationCmd>>>,
}

/// Bind the server listener.
pub async fn create_listener(bind: SocketAddr) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "RTI node listening.");
    Ok(listener)
}

/// Serve federations until the listener fails.
pub async fn serve(listener: TcpListener) -> Result<(), ServerError> {
    let registry = Arc::new(Registry::default());
    loop {
        let (socket, addr) = listener.accept().await?;
        tracing::debug!(%addr, "Accepted connection.");
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, registry).await {
                tracing::warn!(%addr, "Connection ended with error: {err}");
            }
        });
    }
}

async fn handle_connection(socket: TcpStream, registry: Arc<Registry>) -> Result<(), ServerError> {
    let mut framed = Framed::new(socket, codec::create::<RtiMsg>());

    while let Some(msg) = framed.next().await {
        match msg? {
            RtiMsg::CreateFederation {
                federation,
                model,
                time_kind,
            } => {
                let reply = create_federation(&registry, &federation, model, time_kind);
                framed.send(result_msg(reply)).await?;
            }
            RtiMsg::DestroyFederation { federation } => {
                let reply = destroy_federation(&registry, &federation).await;
                framed.send(result_msg(reply)).await?;
            }
            RtiMsg::ListFederations => {
                let names = {
                    let federations = registry.federations.lock().expect("registry poisoned");
                    let mut names: Vec<_> = federations.keys().cloned().collect();
                    names.sort();
                    names
                };
                framed.send(RtiMsg::FederationList(names)).await?;
            }
            RtiMsg::Join {
                federation,
                federate_type,
                federate_name,
            } => {
                let cmd = {
                    let federations = registry.federations.lock().expect("registry poisoned");
                    federations.get(&federation).cloned()
                };
                let Some(cmd) = cmd else {
                    framed
                        .send(RtiMsg::Error(FedError::FederationNotFound(federation)))
                        .await?;
                    continue;
                };
                let (reply_tx, reply_rx) = oneshot::channel();
                let sent = cmd.send(FederationCmd::Join {
                    federate_type,
                    federate_name,
                    reply: reply_tx,
                });
                let joined = match sent {
                    Ok(()) => reply_rx.await.unwrap_or_else(|_| {
                        Err(FedError::RtiInternalError("federation task gone".into()))
                    }),
                    Err(_) => Err(FedError::FederationNotFound(federation)),
                };
                match joined {
                    Ok((snapshot, down)) => {
                        let handle = snapshot.handle;
                        tracing::info!(federate = %handle, "Federate joined.");
                        framed.send(RtiMsg::Joined(Box::new(snapshot))).await?;
                        return joined_loop(framed, handle, cmd, down).await;
                    }
                    Err(err) => framed.send(RtiMsg::Error(err)).await?,
                }
            }
            other => {
                tracing::warn!(?other, "Unexpected message before join.");
                framed
                    .send(RtiMsg::Error(FedError::RtiInternalError(
                        "unexpected message before join".into(),
                    )))
                    .await?;
            }
        }
    }
    Ok(())
}

fn result_msg(result: Result<(), FedError>) -> RtiMsg {
    match result {
        Ok(()) => RtiMsg::Ack,
        Err(err) => RtiMsg::Error(err),
    }
}

fn create_federation(
    registry: &Registry,
    federation: &str,
    model: ObjectModel,
    time_kind: TimeKind,
) -> Result<(), FedError> {
    let mut federations = registry.federations.lock().expect("registry poisoned");
    if federations.contains_key(federation) {
        return Err(FedError::FederationExecutionAlreadyExists(
            federation.to_owned(),
        ));
    }
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let coordinator = AnyCoordinator::new(time_kind, federation, model);
    tracing::info!(%federation, kind = %time_kind, "Created federation execution.");
    tokio::spawn(federation_task(coordinator, cmd_rx));
    federations.insert(federation.to_owned(), cmd_tx);
    Ok(())
}

async fn destroy_federation(registry: &Registry, federation: &str) -> Result<(), FedError> {
    let cmd = {
        let federations = registry.federations.lock().expect("registry poisoned");
        federations.get(federation).cloned()
    };
    let Some(cmd) = cmd else {
        return Err(FedError::FederationNotFound(federation.to_owned()));
    };
    let (reply_tx, reply_rx) = oneshot::channel();
    if cmd.send(FederationCmd::Destroy { reply: reply_tx }).is_err() {
        return Err(FedError::FederationNotFound(federation.to_owned()));
    }
    let result = reply_rx
        .await
        .unwrap_or_else(|_| Err(FedError::RtiInternalError("federation task gone".into())));
    if result.is_ok() {
        let mut federations = registry.federations.lock().expect("registry poisoned");
        federations.remove(federation);
        tracing::info!(%federation, "Destroyed federation execution.");
    }
    result
}

/// The serial loop of one federation execution.
async fn federation_task(
    mut coordinator: AnyCoordinator,
    mut cmds: mpsc::UnboundedReceiver<FederationCmd>,
) {
    let mut senders: HashMap<FederateHandle, mpsc::UnboundedSender<DownstreamMsg>> = HashMap::new();

    while let Some(cmd) = cmds.recv().await {
        match cmd {
            FederationCmd::Join {
                federate_type,
                federate_name,
                reply,
            } => {
                let joined = with_coordinator!(&mut coordinator, c => c
                    .join(&federate_type, federate_name.as_deref()));
                let response = joined.map(|(snapshot, routed)| {
                    let (down_tx, down_rx) = mpsc::unbounded_channel();
                    senders.insert(snapshot.handle, down_tx);
                    route(&senders, routed);
                    (snapshot, down_rx)
                });
                let _ = reply.send(response);
            }
            FederationCmd::Up { from, msg } => {
                let routed = with_coordinator!(&mut coordinator, c => c.handle(from, msg));
                match routed {
                    Ok(routed) => {
                        route(&senders, routed);
                        let gone = !with_coordinator!(&coordinator, c => c.contains(from));
                        if gone {
                            senders.remove(&from);
                        }
                    }
                    Err(err) => {
                        tracing::error!(federate = %from, "Rejected upstream message: {err}");
                    }
                }
            }
            FederationCmd::Disconnect { from } => {
                let routed = with_coordinator!(&mut coordinator, c => c.disconnect(from));
                senders.remove(&from);
                route(&senders, routed);
            }
            FederationCmd::Destroy { reply } => {
                let count = with_coordinator!(&coordinator, c => c.federate_count());
                if count > 0 {
                    let _ = reply.send(Err(FedError::FederatesCurrentlyJoined));
                } else {
                    let _ = reply.send(Ok(()));
                    return;
                }
            }
        }
    }
}

fn route(
    senders: &HashMap<FederateHandle, mpsc::UnboundedSender<DownstreamMsg>>,
    routed: Vec<(FederateHandle, DownstreamMsg)>,
) {
    for (to, msg) in routed {
        match senders.get(&to) {
            Some(sender) => {
                if sender.send(msg).is_err() {
                    tracing::debug!(federate = %to, "Dropping message for detached federate.");
                }
            }
            None => tracing::debug!(federate = %to, "No channel for federate."),
        }
    }
}

/// Pump the socket for one joined federate: upstream frames go to the
/// federation task, downstream messages go back out the socket.
async fn joined_loop(
    mut framed: Framed<TcpStream, codec::FrameCodec<RtiMsg>>,
    handle: FederateHandle,
    cmd: mpsc::UnboundedSender<FederationCmd>,
    mut down: mpsc::UnboundedReceiver<DownstreamMsg>,
) -> Result<(), ServerError> {
    loop {
        tokio::select! {
            outgoing = down.recv() => match outgoing {
                Some(msg) => framed.send(RtiMsg::Down(msg)).await?,
                // The federation dropped our channel (resign completed).
                None => break,
            },
            incoming = framed.next() => match incoming {
                Some(Ok(RtiMsg::Up(msg))) => {
                    if cmd.send(FederationCmd::Up { from: handle, msg }).is_err() {
                        break;
                    }
                }
                Some(Ok(other)) => {
                    tracing::warn!(federate = %handle, ?other, "Unexpected message after join.");
                }
                Some(Err(err)) => {
                    tracing::warn!(federate = %handle, "Decode error: {err}");
                    break;
                }
                None => break,
            },
        }
    }
    // Silent departure or clean close; either way the federation forgets us.
    let _ = cmd.send(FederationCmd::Disconnect { from: handle });
    Ok(())
}
