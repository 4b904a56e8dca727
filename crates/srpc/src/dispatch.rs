//! # Inbound call dispatcher
//!
//! Decodes a call message, resolves the target through the registries,
//! invokes it, and delivers the result under the reply discipline the caller
//! asked for. Argument decoding and target invocation complete before any
//! yield, so argument-carried proxies are registered before the peer can
//! refer to them.
//!
//! ## Invariants
//!
//! - Per call id, exactly one result message is emitted.
//! - A future-returning target settles only after the immediate reply for
//!   the same call has gone out.
//! - Every dispatch failure becomes `{success = false, result = <text>}`
//!   when the call type expects a reply; void calls never reply.

use std::sync::Arc;

use srpc_wire::Body;
use srpc_wire::CallAction;
use srpc_wire::CallBody;
use srpc_wire::CallType;
use srpc_wire::Message;
use srpc_wire::ObjectDescriptor;
use srpc_wire::WireValue;
use srpc_wire::select_argument;

use crate::channel::ReplySink;
use crate::context;
use crate::error::Result;
use crate::error::RpcError;
use crate::marshal;
use crate::marshal::TypeHint;
use crate::pending::ReplyBarrier;
use crate::runtime::Runtime;
use crate::value::Value;

/// Handles one inbound call message end to end.
pub(crate) async fn handle_call(
    rt: Arc<Runtime>,
    action: CallAction,
    call: CallBody,
    reply: Option<ReplySink>,
    dispatch_context: Option<Value>,
) {
    let barrier = Arc::new(ReplyBarrier::new());
    let outcome =
        context::scope(dispatch_context.clone(), run_target(&rt, action, &call)).await;

    match call.call_type {
        CallType::Void => {}
        CallType::Sync => {
            let (success, result) = settle_wire(&rt, outcome, &barrier);
            let message = Message::new(Body::SyncFnResult { success, result });
            deliver_reply(&rt, reply, message).await;
        }
        CallType::Async => {
            let Some(call_id) = call.call_id.clone() else {
                tracing::warn!(obj_id = %call.obj_id, "async call without call_id");
                barrier.open();
                return;
            };
            match outcome {
                // The target's direct result is a future: the settlement is
                // the one reply for this call id, carrying the unwrapped
                // value once it exists.
                Ok(Value::Future(fut)) => {
                    let slot = fut.slot().clone();
                    let settle_rt = rt.clone();
                    tokio::spawn(context::scope(dispatch_context, async move {
                        let settled = slot.wait().await;
                        let (success, result) = match settled {
                            Ok(value) => wire_ok(&settle_rt, &value, None),
                            Err(text) => (false, WireValue::String(text)),
                        };
                        let message =
                            Message::new(Body::AsyncFnResult { success, result, call_id });
                        if let Err(e) = settle_rt.post(message).await {
                            tracing::warn!(error = %e, "failed to deliver async settlement");
                        }
                    }));
                }
                outcome => {
                    let (success, result) = settle_wire(&rt, outcome, &barrier);
                    let message = Message::new(Body::AsyncFnResult { success, result, call_id });
                    deliver_async_reply(&rt, reply, message).await;
                }
            }
        }
    }

    barrier.open();
}

/// Resolves and invokes the target. Runs entirely within the dispatch task.
async fn run_target(rt: &Arc<Runtime>, action: CallAction, call: &CallBody) -> Result<Value> {
    match action {
        CallAction::PropGet => {
            let entry = rt
                .registries
                .objects
                .get(&call.obj_id)
                .ok_or_else(|| RpcError::NotRegistered(call.obj_id.clone()))?;
            let prop = required_prop(call)?;
            entry.target.get(prop)
        }
        CallAction::PropSet => {
            let entry = rt
                .registries
                .objects
                .get(&call.obj_id)
                .ok_or_else(|| RpcError::NotRegistered(call.obj_id.clone()))?;
            let prop = required_prop(call)?;
            let raw = call
                .args
                .as_ref()
                .and_then(|args| args.first())
                .ok_or_else(|| RpcError::Marshal("missing value for property write".into()))?;
            let hint = setter_hint(&entry.descriptor, prop);
            let value = marshal::unmarshal(rt, raw, &hint)?;
            entry.target.set(prop, value)?;
            Ok(Value::Null)
        }
        CallAction::MethodCall => {
            let entry = rt
                .registries
                .objects
                .get(&call.obj_id)
                .ok_or_else(|| RpcError::NotRegistered(call.obj_id.clone()))?;
            let prop = required_prop(call)?;
            let descs = entry
                .descriptor
                .find_function(prop)
                .and_then(|f| f.arguments.as_deref());
            let args = bind_args(rt, call, descs)?;
            entry.target.invoke(prop, args)
        }
        CallAction::FnCall => {
            let entry = rt
                .registries
                .functions
                .get(&call.obj_id)
                .ok_or_else(|| RpcError::NotRegistered(call.obj_id.clone()))?;
            let descs = entry
                .descriptor
                .as_ref()
                .and_then(|d| d.arguments.as_deref());
            let args = bind_args(rt, call, descs)?;
            entry.target.invoke(args)
        }
        CallAction::CtorCall => {
            let entry = rt
                .registries
                .classes
                .get(&call.obj_id)
                .ok_or_else(|| RpcError::NotRegistered(call.obj_id.clone()))?;
            let ctor = entry
                .target
                .ctor()
                .ok_or_else(|| RpcError::MemberNotFound { member: "constructor".into() })?
                .clone();
            let descs = entry
                .descriptor
                .ctor
                .as_ref()
                .and_then(|c| c.arguments.as_deref());
            let args = bind_args(rt, call, descs)?;
            let mut instance = ctor.invoke(args)?;
            // New instances marshal as instances of this class.
            if let Value::Object(ref mut obj) = instance {
                if obj.class_id.is_none() {
                    obj.class_id = Some(call.obj_id.clone());
                }
            }
            Ok(instance)
        }
    }
}

fn required_prop(call: &CallBody) -> Result<&str> {
    call.prop
        .as_deref()
        .ok_or_else(|| RpcError::Protocol("call message missing prop".into()))
}

/// Decodes arguments element-wise against their per-argument descriptors.
fn bind_args(
    rt: &Arc<Runtime>,
    call: &CallBody,
    descs: Option<&[srpc_wire::ArgumentDescriptor]>,
) -> Result<Vec<Value>> {
    let raws: &[WireValue] = call.args.as_deref().unwrap_or(&[]);
    raws.iter()
        .enumerate()
        .map(|(idx, raw)| {
            let hint = match select_argument(descs, idx) {
                Some(desc) => TypeHint::Function(Some(desc.function.clone())),
                None => TypeHint::Any,
            };
            marshal::unmarshal(rt, raw, &hint)
        })
        .collect()
}

/// The hint for a property write, from the property's setter descriptor.
fn setter_hint(descriptor: &ObjectDescriptor, prop: &str) -> TypeHint {
    descriptor
        .find_property(prop)
        .and_then(|p| p.set.as_ref())
        .and_then(|set| select_argument(set.arguments.as_deref(), 0))
        .map(|desc| TypeHint::Function(Some(desc.function.clone())))
        .unwrap_or(TypeHint::Any)
}

fn settle_wire(
    rt: &Arc<Runtime>,
    outcome: Result<Value>,
    barrier: &Arc<ReplyBarrier>,
) -> (bool, WireValue) {
    match outcome {
        Ok(value) => wire_ok(rt, &value, Some(barrier)),
        Err(e) => (false, WireValue::String(e.to_string())),
    }
}

fn wire_ok(
    rt: &Arc<Runtime>,
    value: &Value,
    barrier: Option<&Arc<ReplyBarrier>>,
) -> (bool, WireValue) {
    match marshal::marshal(rt, value, barrier) {
        Ok(wire) => (true, wire),
        Err(e) => (false, WireValue::String(e.to_string())),
    }
}

/// Sync replies go to the request's reply path, falling back to the bound
/// channel.
async fn deliver_reply(rt: &Arc<Runtime>, sink: Option<ReplySink>, message: Message) {
    let outcome = match sink {
        Some(sink) => sink.deliver(message).await,
        None => rt.post(message).await,
    };
    if let Err(e) = outcome {
        tracing::warn!(error = %e, "failed to deliver reply");
    }
}

/// Async replies are sent asynchronously: a request-scoped reply channel is
/// honored, but a blocking reply slot is not a legal carrier for them.
async fn deliver_async_reply(rt: &Arc<Runtime>, sink: Option<ReplySink>, message: Message) {
    let outcome = match sink {
        Some(ReplySink::Channel(ch)) => ch.send(message).await,
        _ => rt.post(message).await,
    };
    if let Err(e) = outcome {
        tracing::warn!(error = %e, "failed to deliver async reply");
    }
}
