//! The federate-facing ambassador: connection and federation lifecycle, the
//! full time- and object-management API, and the callback pump.
//!
//! Every non-lifecycle call is synchronous and never blocks on the network:
//! it runs the kernel under a short lock and enqueues any produced wire
//! messages. Completion of the asynchronous operations (regulation enable,
//! advance grants) is observed through callbacks delivered by the pump.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use cadence_core::{
    AttributeHandle, FederateHandle, InteractionClassHandle, LogicalTime, ObjectClassHandle,
    ObjectInstanceHandle, ParameterHandle, RetractionHandle,
};
use cadence_federation::{
    proto::{DownstreamMsg, UserTag},
    FedCallback, FedError, FederateKernel, ObjectModel, ResignAction,
};
use cadence_rti::{RtiClient, RtiSender};

use crate::{federate::FederateAmbassador, settings::ConnectSettings};

/// A connection to an RTI node; the entry point for federation lifecycle.
pub struct Connection {
    settings: ConnectSettings,
    client: RtiClient,
}

impl Connection {
    pub async fn connect(settings: ConnectSettings) -> Result<Self, FedError> {
        let addr = resolve(&settings.rti_node).await?;
        let client = cadence_rti::connect(addr).await.map_err(FedError::from)?;
        Ok(Self { settings, client })
    }

    pub fn settings(&self) -> &ConnectSettings {
        &self.settings
    }

    pub async fn create_federation_execution(
        &mut self,
        federation: &str,
        model: ObjectModel,
    ) -> Result<(), FedError> {
        self.client
            .create_federation(federation, model, self.settings.time_kind)
            .await
            .map_err(FedError::from)
    }

    pub async fn destroy_federation_execution(&mut self, federation: &str) -> Result<(), FedError> {
        self.client
            .destroy_federation(federation)
            .await
            .map_err(FedError::from)
    }

    pub async fn list_federation_executions(&mut self) -> Result<Vec<String>, FedError> {
        self.client
            .list_federations()
            .await
            .map_err(FedError::from)
    }

    /// Join a federation execution with logical-time kind `T`.
    ///
    /// The kind must match the one this connection was configured with;
    /// anything else fails `CouldNotCreateLogicalTimeFactory`.
    pub async fn join_federation_execution<T: LogicalTime>(
        &self,
        federation: &str,
        federate_type: &str,
        federate_name: Option<&str>,
    ) -> Result<RtiAmbassador<T>, FedError> {
        if T::KIND != self.settings.time_kind {
            return Err(FedError::CouldNotCreateLogicalTimeFactory(
                self.settings.time_kind.factory_name().to_owned(),
            ));
        }
        let addr = resolve(&self.settings.rti_node).await?;
        let mut client = cadence_rti::connect(addr).await.map_err(FedError::from)?;
        let snapshot = client
            .join(federation, federate_type, federate_name)
            .await
            .map_err(FedError::from)?;
        let kernel = FederateKernel::new(snapshot)?;
        Ok(RtiAmbassador {
            sender: client.sender(),
            kernel: Arc::new(Mutex::new(kernel)),
            events: Arc::new(AsyncMutex::new(client)),
            in_callback: Arc::new(AtomicBool::new(false)),
            resigned: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn disconnect(self) {
        // Dropping the client tears down the socket tasks.
    }
}

async fn resolve(node: &str) -> Result<std::net::SocketAddr, FedError> {
    tokio::net::lookup_host(node)
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or(FedError::NotConnected)
}

/// One joined federate's RTI ambassador. Cheap to clone; clones share the
/// same federate.
pub struct RtiAmbassador<T: LogicalTime> {
    kernel: Arc<Mutex<FederateKernel<T>>>,
    sender: RtiSender,
    events: Arc<AsyncMutex<RtiClient>>,
    in_callback: Arc<AtomicBool>,
    resigned: Arc<AtomicBool>,
}

impl<T: LogicalTime> std::fmt::Debug for RtiAmbassador<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtiAmbassador").finish_non_exhaustive()
    }
}

impl<T: LogicalTime> Clone for RtiAmbassador<T> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel.clone(),
            sender: self.sender.clone(),
            events: self.events.clone(),
            in_callback: self.in_callback.clone(),
            resigned: self.resigned.clone(),
        }
    }
}

impl<T: LogicalTime> RtiAmbassador<T> {
    pub fn federate_handle(&self) -> FederateHandle {
        self.kernel.lock().expect("kernel poisoned").handle()
    }

    fn guard(&self) -> Result<(), FedError> {
        if self.in_callback.load(Ordering::SeqCst) {
            return Err(FedError::CallNotAllowedFromWithinCallback);
        }
        if self.resigned.load(Ordering::SeqCst) {
            return Err(FedError::FederateNotExecutionMember);
        }
        Ok(())
    }

    /// Run a kernel operation and flush whatever it produced to the wire.
    fn with_kernel<R>(
        &self,
        f: impl FnOnce(&mut FederateKernel<T>) -> Result<R, FedError>,
    ) -> Result<R, FedError> {
        self.guard()?;
        let mut kernel = self.kernel.lock().expect("kernel poisoned");
        let result = f(&mut kernel)?;
        for msg in kernel.drain_outbox() {
            self.sender.send(msg).map_err(|_| FedError::NotConnected)?;
        }
        Ok(result)
    }

    // -- declaration management --

    pub fn get_object_class_handle(&self, name: &str) -> Result<ObjectClassHandle, FedError> {
        self.with_kernel(|k| k.object_class_handle(name))
    }

    pub fn get_attribute_handle(
        &self,
        class: ObjectClassHandle,
        name: &str,
    ) -> Result<AttributeHandle, FedError> {
        self.with_kernel(|k| k.attribute_handle(class, name))
    }

    pub fn get_interaction_class_handle(
        &self,
        name: &str,
    ) -> Result<InteractionClassHandle, FedError> {
        self.with_kernel(|k| k.interaction_class_handle(name))
    }

    pub fn get_parameter_handle(
        &self,
        class: InteractionClassHandle,
        name: &str,
    ) -> Result<ParameterHandle, FedError> {
        self.with_kernel(|k| k.parameter_handle(class, name))
    }

    pub fn publish_object_class_attributes(
        &self,
        class: ObjectClassHandle,
        attributes: &[AttributeHandle],
    ) -> Result<(), FedError> {
        self.with_kernel(|k| k.publish_object_class_attributes(class, attributes))
    }

    pub fn unpublish_object_class(&self, class: ObjectClassHandle) -> Result<(), FedError> {
        self.with_kernel(|k| k.unpublish_object_class(class))
    }

    pub fn subscribe_object_class_attributes(
        &self,
        class: ObjectClassHandle,
        attributes: &[AttributeHandle],
    ) -> Result<(), FedError> {
        self.with_kernel(|k| k.subscribe_object_class_attributes(class, attributes))
    }

    pub fn unsubscribe_object_class(&self, class: ObjectClassHandle) -> Result<(), FedError> {
        self.with_kernel(|k| k.unsubscribe_object_class(class))
    }

    pub fn publish_interaction_class(&self, class: InteractionClassHandle) -> Result<(), FedError> {
        self.with_kernel(|k| k.publish_interaction_class(class))
    }

    pub fn unpublish_interaction_class(
        &self,
        class: InteractionClassHandle,
    ) -> Result<(), FedError> {
        self.with_kernel(|k| k.unpublish_interaction_class(class))
    }

    pub fn subscribe_interaction_class(
        &self,
        class: InteractionClassHandle,
    ) -> Result<(), FedError> {
        self.with_kernel(|k| k.subscribe_interaction_class(class))
    }

    pub fn unsubscribe_interaction_class(
        &self,
        class: InteractionClassHandle,
    ) -> Result<(), FedError> {
        self.with_kernel(|k| k.unsubscribe_interaction_class(class))
    }

    // -- object management --

    pub fn register_object_instance(
        &self,
        class: ObjectClassHandle,
        name: Option<&str>,
    ) -> Result<ObjectInstanceHandle, FedError> {
        self.with_kernel(|k| k.register_object_instance(class, name))
    }

    pub fn update_attribute_values(
        &self,
        object: ObjectInstanceHandle,
        values: Vec<(AttributeHandle, Vec<u8>)>,
        tag: UserTag,
        time: Option<T>,
    ) -> Result<Option<RetractionHandle>, FedError> {
        self.with_kernel(|k| k.update_attribute_values(object, values, tag, time))
    }

    pub fn send_interaction(
        &self,
        class: InteractionClassHandle,
        parameters: Vec<(ParameterHandle, Vec<u8>)>,
        tag: UserTag,
        time: Option<T>,
    ) -> Result<Option<RetractionHandle>, FedError> {
        self.with_kernel(|k| k.send_interaction(class, parameters, tag, time))
    }

    pub fn delete_object_instance(
        &self,
        object: ObjectInstanceHandle,
        tag: UserTag,
        time: Option<T>,
    ) -> Result<Option<RetractionHandle>, FedError> {
        self.with_kernel(|k| k.delete_object_instance(object, tag, time))
    }

    pub fn request_attribute_value_update(
        &self,
        object: ObjectInstanceHandle,
        attributes: Vec<AttributeHandle>,
        tag: UserTag,
    ) -> Result<(), FedError> {
        self.with_kernel(|k| k.request_attribute_value_update(object, attributes, tag))
    }

    pub fn retract(&self, handle: RetractionHandle) -> Result<(), FedError> {
        self.with_kernel(|k| k.retract(handle))
    }

    // -- time management --

    pub fn enable_time_regulation(&self, lookahead: T::Interval) -> Result<(), FedError> {
        self.with_kernel(|k| k.enable_time_regulation(lookahead))
    }

    pub fn disable_time_regulation(&self) -> Result<(), FedError> {
        self.with_kernel(|k| k.disable_time_regulation())
    }

    pub fn enable_time_constrained(&self) -> Result<(), FedError> {
        self.with_kernel(|k| k.enable_time_constrained())
    }

    pub fn disable_time_constrained(&self) -> Result<(), FedError> {
        self.with_kernel(|k| k.disable_time_constrained())
    }

    pub fn time_advance_request(&self, time: T) -> Result<(), FedError> {
        self.with_kernel(|k| k.time_advance_request(time))
    }

    pub fn time_advance_request_available(&self, time: T) -> Result<(), FedError> {
        self.with_kernel(|k| k.time_advance_request_available(time))
    }

    pub fn next_message_request(&self, time: T) -> Result<(), FedError> {
        self.with_kernel(|k| k.next_message_request(time))
    }

    pub fn next_message_request_available(&self, time: T) -> Result<(), FedError> {
        self.with_kernel(|k| k.next_message_request_available(time))
    }

    pub fn flush_queue_request(&self, time: T) -> Result<(), FedError> {
        self.with_kernel(|k| k.flush_queue_request(time))
    }

    pub fn modify_lookahead(&self, lookahead: T::Interval) -> Result<(), FedError> {
        self.with_kernel(|k| k.modify_lookahead(lookahead))
    }

    pub fn enable_asynchronous_delivery(&self) -> Result<(), FedError> {
        self.with_kernel(|k| {
            k.enable_asynchronous_delivery();
            Ok(())
        })
    }

    pub fn disable_asynchronous_delivery(&self) -> Result<(), FedError> {
        self.with_kernel(|k| {
            k.disable_asynchronous_delivery();
            Ok(())
        })
    }

    pub fn query_logical_time(&self) -> Result<T, FedError> {
        self.with_kernel(|k| Ok(k.query_logical_time()))
    }

    pub fn query_lookahead(&self) -> Result<T::Interval, FedError> {
        self.with_kernel(|k| k.query_lookahead())
    }

    pub fn query_galt(&self) -> Result<Option<T>, FedError> {
        self.with_kernel(|k| Ok(k.query_galt()))
    }

    pub fn query_lits(&self) -> Result<Option<T>, FedError> {
        self.with_kernel(|k| Ok(k.query_lits()))
    }

    // -- federation lifecycle --

    /// Resign from the federation. Blocks until the federation has
    /// acknowledged and processed the resignation.
    pub async fn resign_federation_execution(&self, action: ResignAction) -> Result<(), FedError> {
        self.with_kernel(|k| {
            k.prepare_resign(action);
            Ok(())
        })?;
        loop {
            let msg = {
                let mut events = self.events.lock().await;
                events.recv().await
            };
            match msg {
                Some(DownstreamMsg::ResignAccepted) => break,
                Some(msg) => self.ingest(msg)?,
                None => return Err(FedError::NotConnected),
            }
        }
        self.resigned.store(true, Ordering::SeqCst);
        Ok(())
    }

    // -- the callback pump --

    /// Deliver at most one callback, waiting up to `max_wait` for one to
    /// become available. Returns whether callbacks remain pending.
    pub async fn evoke_callback(
        &self,
        federate: &mut dyn FederateAmbassador<T>,
        max_wait: Duration,
    ) -> Result<bool, FedError> {
        self.guard()?;
        if self.dispatch_one(federate)? {
            return Ok(self.callbacks_pending());
        }
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let msg = {
                let mut events = self.events.lock().await;
                tokio::time::timeout_at(deadline, events.recv()).await
            };
            match msg {
                Err(_) => return Ok(false),
                Ok(None) => return Err(FedError::NotConnected),
                Ok(Some(down)) => {
                    self.ingest(down)?;
                    if self.dispatch_one(federate)? {
                        return Ok(self.callbacks_pending());
                    }
                }
            }
        }
    }

    /// Deliver callbacks for at least `min_wait` and at most `max_wait`.
    /// Returns whether callbacks remain pending.
    pub async fn evoke_multiple_callbacks(
        &self,
        federate: &mut dyn FederateAmbassador<T>,
        min_wait: Duration,
        max_wait: Duration,
    ) -> Result<bool, FedError> {
        self.guard()?;
        let start = tokio::time::Instant::now();
        let min_deadline = start + min_wait;
        let max_deadline = start + max_wait.max(min_wait);
        loop {
            if tokio::time::Instant::now() >= max_deadline {
                break;
            }
            if self.dispatch_one(federate)? {
                continue;
            }
            if tokio::time::Instant::now() >= min_deadline {
                break;
            }
            let msg = {
                let mut events = self.events.lock().await;
                tokio::time::timeout_at(min_deadline, events.recv()).await
            };
            match msg {
                Err(_) => break,
                Ok(None) => return Err(FedError::NotConnected),
                Ok(Some(down)) => self.ingest(down)?,
            }
        }
        Ok(self.callbacks_pending())
    }

    /// The `HLA_IMMEDIATE` callback model: one task repeatedly invoking the
    /// same pump.
    pub fn spawn_callback_task(
        &self,
        mut federate: Box<dyn FederateAmbassador<T>>,
    ) -> tokio::task::JoinHandle<()> {
        let ambassador = self.clone();
        tokio::spawn(async move {
            loop {
                match ambassador
                    .evoke_callback(federate.as_mut(), Duration::from_millis(100))
                    .await
                {
                    Ok(_) => {}
                    Err(FedError::FederateNotExecutionMember) => break,
                    Err(err) => {
                        tracing::error!("Immediate callback dispatch stopped: {err}");
                        break;
                    }
                }
            }
        })
    }

    fn callbacks_pending(&self) -> bool {
        self.kernel
            .lock()
            .expect("kernel poisoned")
            .callbacks_pending()
    }

    fn ingest(&self, msg: DownstreamMsg) -> Result<(), FedError> {
        let mut kernel = self.kernel.lock().expect("kernel poisoned");
        kernel.handle_event(msg)?;
        for out in kernel.drain_outbox() {
            self.sender.send(out).map_err(|_| FedError::NotConnected)?;
        }
        Ok(())
    }

    /// Pop and deliver one callback. Callback errors are logged and
    /// swallowed; they never poison the core.
    fn dispatch_one(&self, federate: &mut dyn FederateAmbassador<T>) -> Result<bool, FedError> {
        let callback = self
            .kernel
            .lock()
            .expect("kernel poisoned")
            .next_callback();
        let Some(callback) = callback else {
            return Ok(false);
        };
        self.in_callback.store(true, Ordering::SeqCst);
        let result = deliver(federate, callback);
        self.in_callback.store(false, Ordering::SeqCst);
        if let Err(err) = result {
            tracing::error!("Federate callback failed: {err:#}");
        }
        Ok(true)
    }
}

fn deliver<T: LogicalTime>(
    federate: &mut dyn FederateAmbassador<T>,
    callback: FedCallback<T>,
) -> anyhow::Result<()> {
    match callback {
        FedCallback::TimeRegulationEnabled(time) => federate.time_regulation_enabled(time),
        FedCallback::TimeConstrainedEnabled(time) => federate.time_constrained_enabled(time),
        FedCallback::TimeAdvanceGrant(time) => federate.time_advance_grant(time),
        FedCallback::ReflectAttributes {
            object,
            values,
            tag,
            info,
        } => federate.reflect_attribute_values(object, &values, &tag, &info),
        FedCallback::ReceiveInteraction {
            class,
            parameters,
            tag,
            info,
        } => federate.receive_interaction(class, &parameters, &tag, &info),
        FedCallback::RemoveObject { object, tag, info } => {
            federate.remove_object_instance(object, &tag, &info)
        }
        FedCallback::DiscoverObject {
            object,
            class,
            name,
        } => federate.discover_object_instance(object, class, &name),
        FedCallback::ProvideUpdate {
            object,
            attributes,
            tag,
        } => federate.provide_attribute_value_update(object, &attributes, &tag),
    }
}
