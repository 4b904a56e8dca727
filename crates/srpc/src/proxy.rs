//! # Proxy synthesis
//!
//! Builds local stand-ins for the peer's host targets. A proxy is a routing
//! table: each member resolved from the remote descriptor maps property
//! reads, property writes, and method invocations onto call messages, using
//! the call style negotiated per member against the channel's capabilities.
//!
//! ## Invariants
//!
//! - A proxy carries its remote `obj_id` immutably; it never re-binds.
//! - Construction fails with `SpecMismatch` when a declared interface member
//!   has no matching descriptor entry.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use srpc_wire::Body;
use srpc_wire::CallAction;
use srpc_wire::CallBody;
use srpc_wire::CallType;
use srpc_wire::ClassDescriptor;
use srpc_wire::FunctionDescriptor;
use srpc_wire::Message;
use srpc_wire::ObjectDescriptor;
use srpc_wire::WireValue;

use crate::channel::Channel;
use crate::error::Result;
use crate::error::RpcError;
use crate::marshal;
use crate::marshal::TypeHint;
use crate::runtime::Runtime;
use crate::value::FutureValue;
use crate::value::Value;

/// What kind of member an interface declares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberKind {
    Property,
    Method,
}

/// One required member of an interface shape.
#[derive(Clone, Debug)]
pub struct MemberShape {
    pub name: String,
    pub kind: MemberKind,
    /// The expected type of reads or invocation results.
    pub returns: TypeHint,
}

/// The members a proxy class requires of its remote descriptor.
#[derive(Clone, Debug, Default)]
pub struct InterfaceShape {
    members: Vec<MemberShape>,
}

impl InterfaceShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, returns: TypeHint) -> Self {
        self.members.push(MemberShape {
            name: name.into(),
            kind: MemberKind::Property,
            returns,
        });
        self
    }

    pub fn method(mut self, name: impl Into<String>, returns: TypeHint) -> Self {
        self.members.push(MemberShape {
            name: name.into(),
            kind: MemberKind::Method,
            returns,
        });
        self
    }

    pub fn members(&self) -> &[MemberShape] {
        &self.members
    }

    fn find(&self, name: &str) -> Option<&MemberShape> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// How one member routes.
#[derive(Clone, Debug)]
enum MemberPlan {
    /// Served from the inline bag delivered with the object.
    ReadonlyField,
    Property {
        get: Option<FunctionDescriptor>,
        set: Option<FunctionDescriptor>,
        read_only: bool,
        returns: TypeHint,
    },
    Method {
        descriptor: FunctionDescriptor,
        returns: TypeHint,
    },
}

/// Builds proxies for one remote descriptor.
#[derive(Debug)]
pub struct ProxyFactory {
    label: String,
    class_id: Option<String>,
    ctor: Option<FunctionDescriptor>,
    plans: Arc<HashMap<String, MemberPlan>>,
}

impl ProxyFactory {
    /// Builds a factory for a remote class, validating the descriptor
    /// against the registered interface shape when one exists.
    pub fn for_class(descriptor: &ClassDescriptor, shape: Option<&InterfaceShape>) -> Result<Self> {
        let plans = build_plans(&descriptor.instance, shape, &descriptor.class_id)?;
        Ok(Self {
            label: descriptor.class_id.clone(),
            class_id: Some(descriptor.class_id.clone()),
            ctor: descriptor.ctor.clone(),
            plans: Arc::new(plans),
        })
    }

    /// Builds a factory for a free-standing remote object.
    pub fn for_object(
        obj_id: &str,
        descriptor: &ObjectDescriptor,
        shape: Option<&InterfaceShape>,
    ) -> Result<Self> {
        let plans = build_plans(descriptor, shape, obj_id)?;
        Ok(Self {
            label: obj_id.to_string(),
            class_id: None,
            ctor: None,
            plans: Arc::new(plans),
        })
    }

    /// Produces an instance bound to `obj_id`, decoding the inline readonly
    /// bag shipped with the object.
    pub fn instantiate(
        &self,
        rt: &Arc<Runtime>,
        obj_id: &str,
        props: Option<&BTreeMap<String, WireValue>>,
    ) -> Result<Arc<ProxyObject>> {
        let mut fields = BTreeMap::new();
        if let Some(bag) = props {
            for (name, raw) in bag {
                fields.insert(name.clone(), marshal::unmarshal(rt, raw, &TypeHint::Any)?);
            }
        }
        Ok(Arc::new(ProxyObject {
            rt: rt.clone(),
            obj_id: obj_id.to_string(),
            class_id: self.class_id.clone(),
            fields,
            plans: self.plans.clone(),
            released: AtomicBool::new(false),
        }))
    }

    /// Invokes the remote constructor and returns the new instance (or a
    /// future settling with it, per the negotiated call style).
    pub async fn construct(&self, rt: &Arc<Runtime>, args: Vec<Value>) -> Result<Value> {
        let class_id = self
            .class_id
            .clone()
            .ok_or_else(|| RpcError::NotRegistered(self.label.clone()))?;
        let requested = self.ctor.as_ref().and_then(|c| c.returns);
        route_call(
            rt,
            CallAction::CtorCall,
            &class_id,
            None,
            args,
            requested,
            &TypeHint::Instance(class_id.clone()),
        )
        .await
    }
}

fn build_plans(
    descriptor: &ObjectDescriptor,
    shape: Option<&InterfaceShape>,
    label: &str,
) -> Result<HashMap<String, MemberPlan>> {
    let hint_for = |name: &str| -> TypeHint {
        shape
            .and_then(|s| s.find(name))
            .map(|m| m.returns.clone())
            .unwrap_or(TypeHint::Any)
    };

    let mut plans = HashMap::new();
    for name in &descriptor.readonly_properties {
        plans.insert(name.clone(), MemberPlan::ReadonlyField);
    }
    for prop in &descriptor.proxied_properties {
        plans.insert(
            prop.name.clone(),
            MemberPlan::Property {
                get: prop.get.clone(),
                set: prop.set.clone(),
                read_only: prop.read_only,
                returns: hint_for(&prop.name),
            },
        );
    }
    for func in &descriptor.functions {
        plans.insert(
            func.name.clone(),
            MemberPlan::Method {
                descriptor: func.clone(),
                returns: hint_for(&func.name),
            },
        );
    }

    if let Some(shape) = shape {
        for member in shape.members() {
            let covered = match (plans.get(&member.name), member.kind) {
                (Some(MemberPlan::ReadonlyField), MemberKind::Property) => true,
                (Some(MemberPlan::Property { .. }), MemberKind::Property) => true,
                (Some(MemberPlan::Method { .. }), MemberKind::Method) => true,
                _ => false,
            };
            if !covered {
                return Err(RpcError::SpecMismatch {
                    class_id: label.to_string(),
                    member: member.name.clone(),
                });
            }
        }
    }

    Ok(plans)
}

/// A local stand-in for one of the peer's host objects.
pub struct ProxyObject {
    rt: Arc<Runtime>,
    obj_id: String,
    class_id: Option<String>,
    /// Readonly members, from the inline bag delivered with the object.
    fields: BTreeMap<String, Value>,
    plans: Arc<HashMap<String, MemberPlan>>,
    released: AtomicBool,
}

impl ProxyObject {
    pub fn obj_id(&self) -> &str {
        &self.obj_id
    }

    pub fn class_id(&self) -> Option<&str> {
        self.class_id.as_deref()
    }

    fn plan(&self, member: &str) -> Result<&MemberPlan> {
        self.plans
            .get(member)
            .ok_or_else(|| RpcError::MemberNotFound { member: member.to_string() })
    }

    /// Reads a property. Readonly members answer from the inline bag;
    /// proxied members send a `prop_get`.
    pub async fn get(&self, prop: &str) -> Result<Value> {
        match self.plan(prop)? {
            MemberPlan::ReadonlyField => Ok(self.fields.get(prop).cloned().unwrap_or(Value::Null)),
            MemberPlan::Property { get, returns, .. } => {
                let requested = get.as_ref().and_then(|d| d.returns);
                route_call(
                    &self.rt,
                    CallAction::PropGet,
                    &self.obj_id,
                    Some(prop),
                    Vec::new(),
                    requested,
                    returns,
                )
                .await
            }
            MemberPlan::Method { .. } => {
                Err(RpcError::MemberNotFound { member: prop.to_string() })
            }
        }
    }

    /// Writes a property with a `prop_set`. Fails on readonly members.
    pub async fn set(&self, prop: &str, value: Value) -> Result<()> {
        match self.plan(prop)? {
            MemberPlan::Property { set, read_only: false, .. } => {
                let requested = set.as_ref().and_then(|d| d.returns);
                route_call(
                    &self.rt,
                    CallAction::PropSet,
                    &self.obj_id,
                    Some(prop),
                    vec![value],
                    requested,
                    &TypeHint::Void,
                )
                .await
                .map(|_| ())
            }
            _ => Err(RpcError::MemberNotFound { member: prop.to_string() }),
        }
    }

    /// Invokes a method with a `method_call` and decodes the result per the
    /// member's negotiated call style: void members return null immediately,
    /// sync members return the decoded reply, async members return a future.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        match self.plan(method)? {
            MemberPlan::Method { descriptor, returns } => {
                route_call(
                    &self.rt,
                    CallAction::MethodCall,
                    &self.obj_id,
                    Some(method),
                    args,
                    descriptor.returns,
                    returns,
                )
                .await
            }
            _ => Err(RpcError::MemberNotFound { member: method.to_string() }),
        }
    }

    /// Tells the peer this proxy is gone, releasing the host-side entry.
    /// Idempotent; also runs on drop.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(channel) = self.rt.channel() else { return };
        if !channel.supports_send() {
            return;
        }
        let message = Message::new(Body::ObjectDied { obj_id: self.obj_id.clone() });
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = channel.send(message).await;
            });
        }
    }
}

impl Drop for ProxyObject {
    fn drop(&mut self) {
        self.release();
    }
}

/// A local stand-in for one of the peer's host functions, also used for
/// callback arguments received from the peer.
pub struct ProxyFunction {
    rt: Arc<Runtime>,
    obj_id: String,
    descriptor: Option<FunctionDescriptor>,
}

impl ProxyFunction {
    pub(crate) fn new(rt: Arc<Runtime>, obj_id: String, descriptor: Option<FunctionDescriptor>) -> Self {
        Self { rt, obj_id, descriptor }
    }

    pub fn obj_id(&self) -> &str {
        &self.obj_id
    }

    /// Invokes the remote function with an `fn_call`.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        let requested = self.descriptor.as_ref().and_then(|d| d.returns);
        route_call(
            &self.rt,
            CallAction::FnCall,
            &self.obj_id,
            None,
            args,
            requested,
            &TypeHint::Any,
        )
        .await
    }
}

/// Resolves the effective call style for a member against the channel's
/// capabilities: async downgrades to sync without send-async, sync upgrades
/// to async without send-sync.
pub(crate) fn resolve_call_style(
    requested: Option<CallType>,
    channel: &dyn Channel,
) -> Result<CallType> {
    let mut style = requested.unwrap_or(CallType::Async);
    if style == CallType::Async && !channel.supports_send() && channel.supports_send_sync() {
        style = CallType::Sync;
    }
    if style == CallType::Sync && !channel.supports_send_sync() && channel.supports_send() {
        style = CallType::Async;
    }
    let available = match style {
        CallType::Void => channel.supports_send() || channel.supports_send_sync(),
        CallType::Sync => channel.supports_send_sync(),
        CallType::Async => channel.supports_send(),
    };
    if !available {
        return Err(RpcError::ChannelUnavailable("send"));
    }
    Ok(style)
}

/// Sends one call message and decodes its outcome per the resolved style.
pub(crate) async fn route_call(
    rt: &Arc<Runtime>,
    action: CallAction,
    obj_id: &str,
    prop: Option<&str>,
    args: Vec<Value>,
    requested: Option<CallType>,
    result_hint: &TypeHint,
) -> Result<Value> {
    let channel = rt.channel()?;
    let style = resolve_call_style(requested, channel.as_ref())?;

    let wire_args = marshal::marshal_args(rt, &args, None)?;
    let mut body = CallBody {
        obj_id: obj_id.to_string(),
        call_type: style,
        call_id: None,
        prop: prop.map(str::to_string),
        args: if wire_args.is_empty() { None } else { Some(wire_args) },
    };

    match style {
        CallType::Void => {
            let message = Message::new(Body::call(action, body));
            if channel.supports_send() {
                channel.send(message).await?;
            } else if let Err(e) = channel.send_sync(message).await {
                tracing::debug!(error = %e, "void call over a sync channel returned no reply");
            }
            Ok(Value::Null)
        }
        CallType::Sync => {
            let message = Message::new(Body::call(action, body));
            let reply = channel.send_sync(message).await?;
            match reply.body {
                Body::SyncFnResult { success: true, result } => {
                    marshal::unmarshal(rt, &result, result_hint)
                }
                Body::SyncFnResult { success: false, result } => {
                    Err(RpcError::RemoteCall(marshal::error_text(&result)))
                }
                _ => Err(RpcError::Protocol("expected sync_fn_result reply".to_string())),
            }
        }
        CallType::Async => {
            let call_id = rt.next_call_id();
            body.call_id = Some(call_id.clone());
            let slot = rt.register_pending(&call_id, result_hint.unwrap_future());
            let message = Message::new(Body::call(action, body));
            if let Err(e) = channel.send(message).await {
                rt.pending.take(&call_id);
                return Err(e);
            }
            Ok(Value::Future(FutureValue::from_slot(slot)))
        }
    }
}
