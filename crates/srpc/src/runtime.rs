//! # Runtime facade
//!
//! The per-peer state: the channel binding and its pump, the host
//! registries, the pending-call table, the remote descriptor caches, and the
//! registration and proxy-acquisition surface user code talks to.
//!
//! One runtime talks to exactly one counterpart through one channel pair.
//! The pump is a single spawned task that processes inbound messages to
//! completion, in order; outbound sends may originate on any thread.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::oneshot;

use srpc_wire::Body;
use srpc_wire::CallAction;
use srpc_wire::ClassDescriptor;
use srpc_wire::FunctionDescriptor;
use srpc_wire::Message;
use srpc_wire::ObjectDescriptor;
use srpc_wire::ObjectDescriptorWithProps;
use srpc_wire::WireValue;

use crate::channel::Channel;
use crate::channel::Inbound;
use crate::dispatch;
use crate::error::Result;
use crate::error::RpcError;
use crate::marshal;
use crate::marshal::TypeHint;
use crate::pending::CompletionSlot;
use crate::pending::PendingCalls;
use crate::pending::SettledValue;
use crate::proxy::InterfaceShape;
use crate::proxy::ProxyFactory;
use crate::proxy::ProxyFunction;
use crate::proxy::ProxyObject;
use crate::registry::IdGenerator;
use crate::registry::Registries;
use crate::registry::SequentialIds;
use crate::target::HostClass;
use crate::target::HostFunction;
use crate::target::RpcTarget;
use crate::value::FunctionValue;
use crate::value::Value;

type DeserializerFn = Arc<dyn Fn(&WireValue, &TypeHint) -> Result<Value> + Send + Sync>;

/// One peer's runtime state.
pub struct Runtime {
    channel: RwLock<Option<Arc<dyn Channel>>>,
    pub(crate) registries: Registries,
    pub(crate) pending: PendingCalls,
    /// Settlements that arrived before their pending entry was created. A
    /// settlement can outrun the reply that carries its promise sentinel,
    /// because the reply is decoded on the caller's task while the pump keeps
    /// running.
    early_settlements: DashMap<String, (bool, WireValue)>,
    proxy_classes: DashMap<String, InterfaceShape>,
    remote_objects: RwLock<BTreeMap<String, ObjectDescriptorWithProps>>,
    remote_functions: RwLock<BTreeMap<String, FunctionDescriptor>>,
    remote_classes: RwLock<BTreeMap<String, ClassDescriptor>>,
    descriptor_waiters: Mutex<Vec<oneshot::Sender<()>>>,
    deserializers: RwLock<Vec<(TypeHint, DeserializerFn)>>,
    next_call_id: AtomicU64,
}

impl Runtime {
    /// Creates a runtime with default configuration and no channel bound.
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Binds the channel and, when it can be pumped, spawns the pump task.
    pub fn bind_channel(self: &Arc<Self>, channel: Arc<dyn Channel>) {
        *self.channel.write().unwrap() = Some(channel.clone());
        if channel.supports_receive() {
            let rt = self.clone();
            tokio::spawn(async move {
                rt.pump(channel).await;
            });
        }
    }

    /// The bound channel.
    pub fn channel(&self) -> Result<Arc<dyn Channel>> {
        self.channel
            .read()
            .unwrap()
            .clone()
            .ok_or(RpcError::ChannelUnavailable("channel"))
    }

    /// Reads inbound messages until the channel closes, processing each to
    /// completion before the next.
    async fn pump(self: Arc<Self>, channel: Arc<dyn Channel>) {
        loop {
            match channel.recv().await {
                Ok(Some(inbound)) => self.handle_inbound(inbound).await,
                Ok(None) => {
                    tracing::debug!("channel closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "channel receive failed");
                    break;
                }
            }
        }
        self.pending.fail_all("channel closed");
    }

    /// Classifies and processes one inbound delivery. Messages without the
    /// protocol marker are dropped without side effect.
    pub async fn handle_inbound(self: &Arc<Self>, inbound: Inbound) {
        let Inbound { message, reply, context } = inbound;
        if !message.has_marker() {
            tracing::debug!("dropping message without rpc marker");
            return;
        }

        match message.body {
            Body::GetDescriptors => {
                let response = self.local_descriptors_message();
                let outcome = match reply {
                    Some(sink) => sink.deliver(response).await,
                    None => self.post(response).await,
                };
                if let Err(e) = outcome {
                    tracing::warn!(error = %e, "failed to deliver descriptors");
                }
            }
            Body::DescriptorsResult { objects, functions, classes } => {
                self.apply_remote_descriptors(objects, functions, classes);
            }
            Body::PropGet(call) => {
                dispatch::handle_call(self.clone(), CallAction::PropGet, call, reply, context)
                    .await;
            }
            Body::PropSet(call) => {
                dispatch::handle_call(self.clone(), CallAction::PropSet, call, reply, context)
                    .await;
            }
            Body::MethodCall(call) => {
                dispatch::handle_call(self.clone(), CallAction::MethodCall, call, reply, context)
                    .await;
            }
            Body::FnCall(call) => {
                dispatch::handle_call(self.clone(), CallAction::FnCall, call, reply, context)
                    .await;
            }
            Body::CtorCall(call) => {
                dispatch::handle_call(self.clone(), CallAction::CtorCall, call, reply, context)
                    .await;
            }
            Body::SyncFnResult { .. } => {
                // Sync replies are defined only on the reply path of the
                // message that caused them.
                tracing::warn!("sync_fn_result outside a reply path");
            }
            Body::AsyncFnResult { success, result, call_id } => {
                self.settle(&call_id, success, &result);
            }
            Body::ObjectDied { obj_id } => {
                self.registries.objects.remove(&obj_id);
                self.registries.functions.remove(&obj_id);
            }
        }
    }

    /// Fire-and-forget delivery on the bound channel.
    pub(crate) async fn post(&self, message: Message) -> Result<()> {
        let channel = self.channel()?;
        if channel.supports_send() {
            channel.send(message).await
        } else {
            Err(RpcError::ChannelUnavailable("send"))
        }
    }

    /// Pushes the settlement of a locally marshalled future.
    pub(crate) async fn send_settlement(self: &Arc<Self>, call_id: String, settled: SettledValue) {
        let (success, result) = match settled {
            Ok(value) => match marshal::marshal(self, &value, None) {
                Ok(wire) => (true, wire),
                Err(e) => (false, WireValue::String(e.to_string())),
            },
            Err(text) => (false, WireValue::String(text)),
        };
        let message = Message::new(Body::AsyncFnResult { success, result, call_id });
        if let Err(e) = self.post(message).await {
            tracing::warn!(error = %e, "failed to deliver settlement");
        }
    }

    /// Retires the pending entry for `call_id` and settles its slot,
    /// decoding the payload against the shape recorded at registration. A
    /// settlement with no entry yet is parked until one appears.
    pub(crate) fn settle(self: &Arc<Self>, call_id: &str, success: bool, raw: &WireValue) {
        let Some(entry) = self.pending.take(call_id) else {
            tracing::debug!(call_id, "parking settlement that outran its pending entry");
            self.early_settlements
                .insert(call_id.to_string(), (success, raw.clone()));
            return;
        };
        let settled = if success {
            marshal::unmarshal(self, raw, &entry.expects).map_err(|e| e.to_string())
        } else {
            Err(marshal::error_text(raw))
        };
        entry.slot.complete(settled);
    }

    /// Looks up or creates the pending entry for `call_id`, draining any
    /// settlement that arrived ahead of it.
    pub(crate) fn register_pending(
        self: &Arc<Self>,
        call_id: &str,
        expects: TypeHint,
    ) -> Arc<CompletionSlot> {
        let slot = self.pending.register(call_id, expects.clone());
        if let Some((_, (success, raw))) = self.early_settlements.remove(call_id) {
            self.pending.take(call_id);
            let settled = if success {
                marshal::unmarshal(self, &raw, &expects).map_err(|e| e.to_string())
            } else {
                Err(marshal::error_text(&raw))
            };
            slot.complete(settled);
        }
        slot
    }

    /// The next outbound call id, stringified for the wire.
    pub(crate) fn next_call_id(&self) -> String {
        self.next_call_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    // --- registration ---

    /// Exposes a host object under `id`. Idempotent on target identity.
    pub fn register_host_object(
        &self,
        id: impl Into<String>,
        target: Arc<dyn RpcTarget>,
        descriptor: ObjectDescriptor,
    ) -> String {
        self.registries.objects.register_as(id, target, descriptor)
    }

    /// Exposes a host function under `id`.
    pub fn register_host_function(
        &self,
        id: impl Into<String>,
        function: HostFunction,
        descriptor: Option<FunctionDescriptor>,
    ) -> String {
        self.registries.functions.register_as(id, function, descriptor)
    }

    /// Exposes a host class under `id`. A declared static surface is
    /// additionally registered as a host object under the class id.
    pub fn register_host_class(
        &self,
        id: impl Into<String>,
        class: Arc<HostClass>,
        descriptor: ClassDescriptor,
    ) -> String {
        let id = id.into();
        if let (Some(statics), Some(statics_desc)) = (class.statics(), descriptor.statics.clone())
        {
            self.registries
                .objects
                .register_as(id.clone(), statics.clone(), statics_desc);
        }
        self.registries.classes.register_as(id, class, descriptor)
    }

    /// Declares intent to materialize remote class `class_id` as a local
    /// implementation of `shape`. No factory is built until first needed.
    pub fn register_proxy_class(&self, class_id: impl Into<String>, shape: InterfaceShape) {
        self.proxy_classes.insert(class_id.into(), shape);
    }

    /// Installs a custom deserializer for values expected as `hint`. A
    /// deserializer registered for [`TypeHint::Any`] acts as the fallback.
    pub fn register_deserializer<F>(&self, hint: TypeHint, f: F)
    where
        F: Fn(&WireValue, &TypeHint) -> Result<Value> + Send + Sync + 'static,
    {
        self.deserializers.write().unwrap().push((hint, Arc::new(f)));
    }

    pub(crate) fn custom_deserialize(
        &self,
        raw: &WireValue,
        hint: &TypeHint,
    ) -> Option<Result<Value>> {
        let deserializers = self.deserializers.read().unwrap();
        if let Some((_, f)) = deserializers.iter().find(|(h, _)| h == hint) {
            return Some(f(raw, hint));
        }
        if *hint != TypeHint::Any {
            if let Some((_, f)) = deserializers.iter().find(|(h, _)| *h == TypeHint::Any) {
                return Some(f(raw, hint));
            }
        }
        None
    }

    pub(crate) fn has_proxy_class(&self, class_id: &str) -> bool {
        self.proxy_classes.contains_key(class_id)
    }

    // --- descriptor exchange ---

    /// Fetches the peer's descriptors: over send-sync when available, else
    /// as a push requested with send-async and awaited here.
    pub async fn request_remote_descriptors(self: &Arc<Self>) -> Result<()> {
        let channel = self.channel()?;
        if channel.supports_send_sync() {
            let reply = channel.send_sync(Message::new(Body::GetDescriptors)).await?;
            match reply.body {
                Body::DescriptorsResult { objects, functions, classes } => {
                    self.apply_remote_descriptors(objects, functions, classes);
                    Ok(())
                }
                _ => Err(RpcError::Protocol("expected descriptors_result reply".into())),
            }
        } else if channel.supports_send() {
            let (tx, rx) = oneshot::channel();
            self.descriptor_waiters.lock().unwrap().push(tx);
            channel.send(Message::new(Body::GetDescriptors)).await?;
            rx.await
                .map_err(|_| RpcError::Protocol("descriptor exchange abandoned".into()))
        } else {
            Err(RpcError::ChannelUnavailable("send"))
        }
    }

    /// Pushes the local descriptors to the peer.
    pub async fn send_remote_descriptors(self: &Arc<Self>) -> Result<()> {
        let channel = self.channel()?;
        let message = self.local_descriptors_message();
        if channel.supports_send_sync() {
            if let Err(e) = channel.send_sync(message).await {
                tracing::debug!(error = %e, "descriptor push returned no reply");
            }
            Ok(())
        } else {
            channel.send(message).await
        }
    }

    /// Snapshots the local registries as a `descriptors_result` message,
    /// evaluating readonly properties into inline bags now.
    fn local_descriptors_message(self: &Arc<Self>) -> Message {
        let mut objects = BTreeMap::new();
        for entry in self.registries.objects.entries() {
            let mut props = BTreeMap::new();
            for name in &entry.descriptor.readonly_properties {
                let value = entry.target.get(name).unwrap_or(Value::Null);
                match marshal::marshal(self, &value, None) {
                    Ok(wire) => {
                        props.insert(name.clone(), wire);
                    }
                    Err(e) => {
                        tracing::warn!(id = %entry.id, prop = %name, error = %e,
                            "skipping readonly property that failed to marshal");
                    }
                }
            }
            let props = if props.is_empty() { None } else { Some(props) };
            objects.insert(
                entry.id.clone(),
                ObjectDescriptorWithProps { descriptor: entry.descriptor.clone(), props },
            );
        }

        let functions: BTreeMap<String, FunctionDescriptor> = self
            .registries
            .functions
            .entries()
            .into_iter()
            .map(|entry| {
                let descriptor = entry
                    .descriptor
                    .clone()
                    .unwrap_or_else(|| FunctionDescriptor::new(entry.id.clone()));
                (entry.id, descriptor)
            })
            .collect();

        let classes: BTreeMap<String, ClassDescriptor> = self
            .registries
            .classes
            .entries()
            .into_iter()
            .map(|entry| (entry.id, entry.descriptor))
            .collect();

        Message::new(Body::DescriptorsResult {
            objects: Some(objects),
            functions: Some(functions),
            classes: Some(classes),
        })
    }

    /// Replaces the remote descriptor caches whole and wakes any pending
    /// exchange waiters.
    fn apply_remote_descriptors(
        &self,
        objects: Option<BTreeMap<String, ObjectDescriptorWithProps>>,
        functions: Option<BTreeMap<String, FunctionDescriptor>>,
        classes: Option<BTreeMap<String, ClassDescriptor>>,
    ) {
        *self.remote_objects.write().unwrap() = objects.unwrap_or_default();
        *self.remote_functions.write().unwrap() = functions.unwrap_or_default();
        *self.remote_classes.write().unwrap() = classes.unwrap_or_default();
        for waiter in self.descriptor_waiters.lock().unwrap().drain(..) {
            let _ = waiter.send(());
        }
    }

    /// The cached descriptor entry for a remote object, if exchanged.
    pub fn remote_object(&self, obj_id: &str) -> Option<ObjectDescriptorWithProps> {
        self.remote_objects.read().unwrap().get(obj_id).cloned()
    }

    /// The cached descriptor for a remote function, if exchanged.
    pub fn remote_function(&self, obj_id: &str) -> Option<FunctionDescriptor> {
        self.remote_functions.read().unwrap().get(obj_id).cloned()
    }

    /// The cached descriptor for a remote class, if exchanged.
    pub fn remote_class(&self, class_id: &str) -> Option<ClassDescriptor> {
        self.remote_classes.read().unwrap().get(class_id).cloned()
    }

    // --- proxy acquisition ---

    /// The factory for remote class `class_id`, validated against the
    /// registered interface shape when one exists.
    pub fn get_proxy_class(self: &Arc<Self>, class_id: &str) -> Result<ProxyFactory> {
        let descriptor = self
            .remote_class(class_id)
            .ok_or_else(|| RpcError::NotRegistered(class_id.to_string()))?;
        let shape = self.proxy_classes.get(class_id).map(|s| s.value().clone());
        ProxyFactory::for_class(&descriptor, shape.as_ref())
    }

    /// Materializes a proxy for the remote object `obj_id` from its
    /// exchanged descriptor and inline bag.
    pub fn get_proxy_object(self: &Arc<Self>, obj_id: &str) -> Result<Arc<ProxyObject>> {
        let entry = self
            .remote_object(obj_id)
            .ok_or_else(|| RpcError::NotRegistered(obj_id.to_string()))?;
        let shape = self.proxy_classes.get(obj_id).map(|s| s.value().clone());
        let factory = ProxyFactory::for_object(obj_id, &entry.descriptor, shape.as_ref())?;
        factory.instantiate(self, obj_id, entry.props.as_ref())
    }

    /// A callable proxy for the remote function `obj_id`. Requires the
    /// function to appear in the exchanged descriptors.
    pub fn get_proxy_function(self: &Arc<Self>, obj_id: &str) -> Result<FunctionValue> {
        let descriptor = self
            .remote_function(obj_id)
            .ok_or_else(|| RpcError::NotRegistered(obj_id.to_string()))?;
        let proxy = ProxyFunction::new(self.clone(), obj_id.to_string(), Some(descriptor));
        Ok(FunctionValue::Proxy(Arc::new(proxy)))
    }
}

/// Fluent configuration for a [`Runtime`].
pub struct RuntimeBuilder {
    ids: Option<Arc<dyn IdGenerator>>,
    channel: Option<Arc<dyn Channel>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self { ids: None, channel: None }
    }

    /// Injects the id generation policy. Defaults to a prefixed counter.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Binds a channel as part of construction.
    pub fn channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn build(self) -> Arc<Runtime> {
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(SequentialIds::new("obj-")));
        let rt = Arc::new(Runtime {
            channel: RwLock::new(None),
            registries: Registries::new(ids),
            pending: PendingCalls::new(),
            early_settlements: DashMap::new(),
            proxy_classes: DashMap::new(),
            remote_objects: RwLock::new(BTreeMap::new()),
            remote_functions: RwLock::new(BTreeMap::new()),
            remote_classes: RwLock::new(BTreeMap::new()),
            descriptor_waiters: Mutex::new(Vec::new()),
            deserializers: RwLock::new(Vec::new()),
            next_call_id: AtomicU64::new(1),
        });
        if let Some(channel) = self.channel {
            rt.bind_channel(channel);
        }
        rt
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
