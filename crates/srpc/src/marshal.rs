//! # Marshal / unmarshal pipeline
//!
//! Before-send walks a [`Value`] graph and rewrites everything that cannot
//! cross the wire by value — live futures, registered instances, callables,
//! record graphs containing any of those — into reference sentinels, minting
//! registry entries as it goes. After-receive runs the inverse, steered by
//! the expected static type and any per-argument descriptors.
//!
//! ## Invariants
//!
//! - Registry insertion happens before the corresponding id is placed in the
//!   output; a peer can never name an id this side does not hold.
//! - Settlements for futures marshalled during a dispatch wait for that
//!   dispatch's reply barrier, so the peer sees the reply first.

use std::collections::BTreeMap;
use std::sync::Arc;

use srpc_wire::FunctionDescriptor;
use srpc_wire::PROMISE_CLASS_ID;
use srpc_wire::RpcRef;
use srpc_wire::WireValue;

use crate::error::Result;
use crate::error::RpcError;
use crate::pending::CompletionSlot;
use crate::pending::ReplyBarrier;
use crate::proxy::ProxyFunction;
use crate::runtime::Runtime;
use crate::target::PromiseTarget;
use crate::target::RecordTarget;
use crate::target::RpcTarget;
use crate::value::FunctionValue;
use crate::value::FutureValue;
use crate::value::ObjectValue;
use crate::value::Value;

/// The expected static type steering unmarshalling.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeHint {
    /// No expectation; decode structurally.
    Any,
    /// No meaningful result.
    Void,
    Bool,
    Int,
    Float,
    String,
    Record,
    List(Box<TypeHint>),
    /// A callback; the descriptor, when present, shapes the generated proxy.
    Function(Option<FunctionDescriptor>),
    /// An instance of the named registered proxy class.
    Instance(String),
    /// A future settling with the inner type.
    Future(Box<TypeHint>),
}

impl TypeHint {
    pub fn list(inner: TypeHint) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn future(inner: TypeHint) -> Self {
        Self::Future(Box::new(inner))
    }

    /// The type a settlement for this hint is decoded against.
    pub fn unwrap_future(&self) -> TypeHint {
        match self {
            Self::Future(inner) => (**inner).clone(),
            other => other.clone(),
        }
    }

    /// Value types cannot hold null.
    pub fn is_value_type(&self) -> bool {
        matches!(self, Self::Bool | Self::Int | Self::Float)
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Void => "void",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Record => "record",
            Self::List(_) => "list",
            Self::Function(_) => "function",
            Self::Instance(_) => "instance",
            Self::Future(_) => "future",
        }
    }
}

/// Rewrites a value for the wire. `barrier`, when present, gates the
/// settlement messages of any futures encountered during the walk.
pub(crate) fn marshal(
    rt: &Arc<Runtime>,
    value: &Value,
    barrier: Option<&Arc<ReplyBarrier>>,
) -> Result<WireValue> {
    Ok(walk(rt, value, barrier)?.0)
}

/// Marshals a call's arguments element-wise.
pub(crate) fn marshal_args(
    rt: &Arc<Runtime>,
    args: &[Value],
    barrier: Option<&Arc<ReplyBarrier>>,
) -> Result<Vec<WireValue>> {
    args.iter().map(|a| marshal(rt, a, barrier)).collect()
}

/// Returns the rewritten value and whether any rewriting happened in this
/// subtree. Record graphs are re-registered only when a descendant changed.
fn walk(
    rt: &Arc<Runtime>,
    value: &Value,
    barrier: Option<&Arc<ReplyBarrier>>,
) -> Result<(WireValue, bool)> {
    match value {
        Value::Null => Ok((WireValue::Null, false)),
        Value::Bool(b) => Ok((WireValue::Bool(*b), false)),
        Value::Int(n) => Ok((WireValue::Int(*n), false)),
        Value::Float(x) => Ok((WireValue::Float(*x), false)),
        Value::String(s) => Ok((WireValue::String(s.clone()), false)),

        Value::Future(fut) => {
            let target: Arc<dyn RpcTarget> = Arc::new(PromiseTarget);
            let obj_id = rt.registries.objects.register(target, Default::default());
            schedule_settlement(rt, obj_id.clone(), fut.slot().clone(), barrier.cloned());
            let sentinel = RpcRef::Object {
                obj_id,
                props: None,
                class_id: Some(PROMISE_CLASS_ID.to_string()),
            };
            Ok((WireValue::Ref(sentinel), true))
        }

        Value::Object(obj) => marshal_object(rt, obj, barrier),

        Value::Proxy(proxy) => {
            // A proxy travels as a plain sentinel carrying its immutable
            // remote id; the origin resolves it back to the live target.
            let sentinel = RpcRef::Object {
                obj_id: proxy.obj_id().to_string(),
                props: None,
                class_id: proxy.class_id().map(str::to_string),
            };
            Ok((WireValue::Ref(sentinel), true))
        }

        Value::Function(f) => {
            let obj_id = match f {
                FunctionValue::Host(host) => rt.registries.functions.register(host.clone(), None),
                FunctionValue::Proxy(proxy) => proxy.obj_id().to_string(),
            };
            Ok((WireValue::Ref(RpcRef::Function { obj_id }), true))
        }

        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            let mut rewritten = false;
            for item in items {
                let (w, changed) = walk(rt, item, barrier)?;
                rewritten |= changed;
                out.push(w);
            }
            Ok((WireValue::List(out), rewritten))
        }

        Value::Record(map) => {
            let mut out = BTreeMap::new();
            let mut rewritten = false;
            for (key, child) in map {
                let (w, changed) = walk(rt, child, barrier)?;
                rewritten |= changed;
                out.insert(key.clone(), w);
            }
            if rewritten {
                let target: Arc<dyn RpcTarget> = Arc::new(RecordTarget::new(map.clone()));
                let obj_id = rt.registries.objects.register(target, Default::default());
                let sentinel = RpcRef::Object { obj_id, props: Some(out), class_id: None };
                Ok((WireValue::Ref(sentinel), true))
            } else {
                Ok((WireValue::Record(out), false))
            }
        }
    }
}

fn marshal_object(
    rt: &Arc<Runtime>,
    obj: &ObjectValue,
    barrier: Option<&Arc<ReplyBarrier>>,
) -> Result<(WireValue, bool)> {
    let class_entry = obj
        .class_id
        .as_ref()
        .and_then(|cid| rt.registries.classes.get(cid));

    match class_entry {
        Some(class) => {
            // An instance of a registered host class: register it under the
            // class's instance descriptor and evaluate the readonly bag now.
            let descriptor = class.descriptor.instance.clone();
            let obj_id = rt
                .registries
                .objects
                .register(obj.target.clone(), descriptor.clone());
            let mut props = BTreeMap::new();
            for name in &descriptor.readonly_properties {
                let value = obj.target.get(name)?;
                props.insert(name.clone(), marshal(rt, &value, barrier)?);
            }
            let sentinel = RpcRef::Object {
                obj_id,
                props: Some(props),
                class_id: obj.class_id.clone(),
            };
            Ok((WireValue::Ref(sentinel), true))
        }
        None => {
            let obj_id = rt
                .registries
                .objects
                .register(obj.target.clone(), Default::default());
            let sentinel = RpcRef::Object { obj_id, props: None, class_id: obj.class_id.clone() };
            Ok((WireValue::Ref(sentinel), true))
        }
    }
}

/// Emits the settlement for a marshalled future: once the reply that carried
/// the sentinel is out and the future settles, push an `async_fn_result`
/// keyed by the future's object id.
fn schedule_settlement(
    rt: &Arc<Runtime>,
    obj_id: String,
    slot: Arc<CompletionSlot>,
    barrier: Option<Arc<ReplyBarrier>>,
) {
    let rt = rt.clone();
    tokio::spawn(async move {
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        let settled = slot.wait().await;
        rt.send_settlement(obj_id, settled).await;
    });
}

/// Reconstructs a value from the wire, steered by the expected type.
pub(crate) fn unmarshal(rt: &Arc<Runtime>, raw: &WireValue, hint: &TypeHint) -> Result<Value> {
    if raw.is_null() {
        if hint.is_value_type() {
            return Err(RpcError::Marshal(format!(
                "null where {} was expected",
                hint.name()
            )));
        }
        return Ok(Value::Null);
    }

    if let WireValue::Ref(sentinel) = raw {
        return unmarshal_ref(rt, sentinel, hint);
    }

    if let Some(result) = rt.custom_deserialize(raw, hint) {
        return result;
    }

    Ok(match raw {
        // Null and sentinels were peeled off above.
        WireValue::Null | WireValue::Ref(_) => Value::Null,
        WireValue::Bool(b) => match hint {
            TypeHint::Int => Value::Int(*b as i64),
            _ => Value::Bool(*b),
        },
        WireValue::Int(n) => match hint {
            TypeHint::Float => Value::Float(*n as f64),
            TypeHint::Bool => Value::Bool(*n != 0),
            _ => Value::Int(*n),
        },
        WireValue::Float(x) => match hint {
            TypeHint::Int if x.fract() == 0.0 => Value::Int(*x as i64),
            _ => Value::Float(*x),
        },
        WireValue::String(s) => Value::String(s.clone()),
        WireValue::List(items) => {
            let inner = match hint {
                TypeHint::List(h) => (**h).clone(),
                _ => TypeHint::Any,
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(unmarshal(rt, item, &inner)?);
            }
            Value::List(out)
        }
        WireValue::Record(map) => {
            let mut out = BTreeMap::new();
            for (key, child) in map {
                out.insert(key.clone(), unmarshal(rt, child, &TypeHint::Any)?);
            }
            Value::Record(out)
        }
    })
}

fn unmarshal_ref(rt: &Arc<Runtime>, sentinel: &RpcRef, hint: &TypeHint) -> Result<Value> {
    match sentinel {
        RpcRef::Function { obj_id } => {
            // A callback bounced back to its origin resolves to the original
            // closure; otherwise build a proxy with the expected shape.
            if let Some(entry) = rt.registries.functions.get(obj_id) {
                return Ok(Value::Function(FunctionValue::Host(entry.target)));
            }
            let descriptor = match hint {
                TypeHint::Function(d) => d.clone(),
                _ => None,
            };
            let proxy = ProxyFunction::new(rt.clone(), obj_id.clone(), descriptor);
            Ok(Value::Function(FunctionValue::Proxy(Arc::new(proxy))))
        }

        RpcRef::Object { obj_id, props, class_id } => {
            if sentinel.is_promise() {
                let slot = rt.register_pending(obj_id, hint.unwrap_future());
                return Ok(Value::Future(FutureValue::from_slot(slot)));
            }

            // An object bounced back to its origin resolves to the live
            // local target.
            if let Some(entry) = rt.registries.objects.get(obj_id) {
                return Ok(Value::Object(ObjectValue {
                    target: entry.target,
                    class_id: class_id.clone(),
                }));
            }

            if let Some(cid) = class_id {
                let hint_accepts = match hint {
                    TypeHint::Instance(expected) => expected == cid,
                    TypeHint::Any | TypeHint::Future(_) => true,
                    _ => false,
                };
                if hint_accepts && rt.has_proxy_class(cid) {
                    let factory = rt.get_proxy_class(cid)?;
                    let proxy = factory.instantiate(rt, obj_id, props.as_ref())?;
                    return Ok(Value::Proxy(proxy));
                }
            }

            // A generic object: reconstruct an independent local copy.
            let mut record = BTreeMap::new();
            if let Some(props) = props {
                for (key, child) in props {
                    record.insert(key.clone(), unmarshal(rt, child, &TypeHint::Any)?);
                }
            }
            Ok(Value::Record(record))
        }
    }
}

/// The failure text carried in a `success = false` result payload.
pub(crate) fn error_text(raw: &WireValue) -> String {
    match raw {
        WireValue::String(s) => s.clone(),
        other => format!("{:?}", other),
    }
}
