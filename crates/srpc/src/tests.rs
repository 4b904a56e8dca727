//! Unit tests for registries, completion slots, the call-style ladder, and
//! the marshalling pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use srpc_wire::Body;
use srpc_wire::CallBody;
use srpc_wire::CallType;
use srpc_wire::Message;
use srpc_wire::ClassDescriptor;
use srpc_wire::FunctionDescriptor;
use srpc_wire::ObjectDescriptor;
use srpc_wire::PROMISE_CLASS_ID;
use srpc_wire::RpcRef;
use srpc_wire::WireValue;

use crate::channel::Channel;
use crate::error::RpcError;
use crate::marshal;
use crate::mock_channel::DuplexChannel;
use crate::marshal::TypeHint;
use crate::pending::CompletionSlot;
use crate::proxy::InterfaceShape;
use crate::proxy::ProxyFactory;
use crate::proxy::resolve_call_style;
use crate::runtime::Runtime;
use crate::target::HostClass;
use crate::target::HostFunction;
use crate::target::RpcTarget;
use crate::value::FunctionValue;
use crate::value::Value;

struct Counter {
    count: Mutex<i64>,
}

impl Counter {
    fn new() -> Arc<Self> {
        Arc::new(Self { count: Mutex::new(0) })
    }
}

impl RpcTarget for Counter {
    fn get(&self, prop: &str) -> crate::error::Result<Value> {
        match prop {
            "count" => Ok(Value::Int(*self.count.lock().unwrap())),
            _ => Err(RpcError::MemberNotFound { member: prop.to_string() }),
        }
    }
}

// --- registries ---

#[test]
fn test_registration_is_idempotent_on_target_identity() {
    let rt = Runtime::new();
    let target: Arc<dyn RpcTarget> = Counter::new();

    let first = rt.registries.objects.register(target.clone(), ObjectDescriptor::new());
    let second = rt.registries.objects.register(target.clone(), ObjectDescriptor::new());

    assert_eq!(first, second);
    assert_eq!(rt.registries.objects.len(), 1);
    assert_eq!(rt.registries.objects.id_of(&target), Some(first));
}

#[test]
fn test_register_as_returns_existing_id_for_known_target() {
    let rt = Runtime::new();
    let target: Arc<dyn RpcTarget> = Counter::new();

    let minted = rt.registries.objects.register(target.clone(), ObjectDescriptor::new());
    let explicit = rt.register_host_object("calc", target, ObjectDescriptor::new());

    assert_eq!(minted, explicit);
    assert_eq!(rt.registries.objects.len(), 1);
}

#[test]
fn test_distinct_targets_get_distinct_ids() {
    let rt = Runtime::new();
    let a: Arc<dyn RpcTarget> = Counter::new();
    let b: Arc<dyn RpcTarget> = Counter::new();

    let id_a = rt.registries.objects.register(a, ObjectDescriptor::new());
    let id_b = rt.registries.objects.register(b, ObjectDescriptor::new());

    assert_ne!(id_a, id_b);
    assert_eq!(rt.registries.objects.len(), 2);
}

#[test]
fn test_remove_clears_both_directions() {
    let rt = Runtime::new();
    let target: Arc<dyn RpcTarget> = Counter::new();

    let id = rt.registries.objects.register(target.clone(), ObjectDescriptor::new());
    assert!(rt.registries.objects.remove(&id).is_some());

    assert!(rt.registries.objects.get(&id).is_none());
    assert!(rt.registries.objects.id_of(&target).is_none());
    assert!(rt.registries.objects.is_empty());
}

// --- completion slots ---

#[tokio::test]
async fn test_completion_slot_first_settlement_wins() {
    let slot = Arc::new(CompletionSlot::new());
    slot.complete(Ok(Value::Int(1)));
    slot.complete(Ok(Value::Int(2)));
    assert_eq!(slot.wait().await, Ok(Value::Int(1)));
}

#[tokio::test]
async fn test_completion_slot_wakes_all_waiters() {
    let slot = Arc::new(CompletionSlot::new());

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait().await })
        })
        .collect();

    slot.complete(Ok(Value::from("done")));

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), Ok(Value::from("done")));
    }
}

#[tokio::test]
async fn test_pending_table_preserves_slot_identity() {
    let rt = Runtime::new();
    let first = rt.pending.register("17", TypeHint::Any);
    let second = rt.pending.register("17", TypeHint::Any);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(rt.pending.len(), 1);

    assert!(rt.pending.take("17").is_some());
    assert!(rt.pending.is_empty());
}

// --- call-style ladder ---

struct CapChannel {
    send: bool,
    send_sync: bool,
}

#[async_trait::async_trait]
impl Channel for CapChannel {
    fn supports_send(&self) -> bool {
        self.send
    }

    fn supports_send_sync(&self) -> bool {
        self.send_sync
    }
}

#[test]
fn test_call_style_defaults_to_async() {
    let ch = CapChannel { send: true, send_sync: true };
    assert_eq!(resolve_call_style(None, &ch).unwrap(), CallType::Async);
}

#[test]
fn test_call_style_downgrades_async_to_sync() {
    let ch = CapChannel { send: false, send_sync: true };
    assert_eq!(resolve_call_style(Some(CallType::Async), &ch).unwrap(), CallType::Sync);
}

#[test]
fn test_call_style_upgrades_sync_to_async() {
    let ch = CapChannel { send: true, send_sync: false };
    assert_eq!(resolve_call_style(Some(CallType::Sync), &ch).unwrap(), CallType::Async);
}

#[test]
fn test_call_style_fails_without_any_send_capability() {
    let ch = CapChannel { send: false, send_sync: false };
    assert!(matches!(
        resolve_call_style(Some(CallType::Sync), &ch),
        Err(RpcError::ChannelUnavailable(_))
    ));
}

// --- marshal ---

#[tokio::test]
async fn test_marshal_primitives_pass_through() {
    let rt = Runtime::new();
    for (value, expected) in [
        (Value::Null, WireValue::Null),
        (Value::Bool(true), WireValue::Bool(true)),
        (Value::Int(7), WireValue::Int(7)),
        (Value::from("hi"), WireValue::from("hi")),
    ] {
        assert_eq!(marshal::marshal(&rt, &value, None).unwrap(), expected);
    }
    assert!(rt.registries.objects.is_empty());
}

#[tokio::test]
async fn test_marshal_future_mints_promise_sentinel() {
    let rt = Runtime::new();
    let value = Value::future(async { Ok(Value::Int(1)) });

    let wire = marshal::marshal(&rt, &value, None).unwrap();
    let WireValue::Ref(RpcRef::Object { obj_id, class_id, .. }) = wire else {
        panic!("expected an object sentinel");
    };
    assert_eq!(class_id.as_deref(), Some(PROMISE_CLASS_ID));
    assert!(rt.registries.objects.contains(&obj_id));
}

#[tokio::test]
async fn test_marshal_registered_class_instance_inlines_readonly_bag() {
    let rt = Runtime::new();
    let descriptor = ClassDescriptor::new("counter")
        .with_instance(ObjectDescriptor::new().with_readonly("count"));
    rt.register_host_class("counter", Arc::new(HostClass::new()), descriptor);

    let instance = Value::instance("counter", Counter::new());
    let wire = marshal::marshal(&rt, &instance, None).unwrap();

    let WireValue::Ref(RpcRef::Object { obj_id, props, class_id }) = wire else {
        panic!("expected an object sentinel");
    };
    assert_eq!(class_id.as_deref(), Some("counter"));
    assert_eq!(props.unwrap().get("count"), Some(&WireValue::Int(0)));
    assert!(rt.registries.objects.contains(&obj_id));

    // Marshalling the same instance again reuses the entry.
    let before = rt.registries.objects.len();
    marshal::marshal(&rt, &instance, None).unwrap();
    assert_eq!(rt.registries.objects.len(), before);
}

#[tokio::test]
async fn test_marshal_function_mints_function_sentinel() {
    let rt = Runtime::new();
    let f = HostFunction::new(|_| Ok(Value::Null));
    let value = Value::function(f.clone());

    let wire = marshal::marshal(&rt, &value, None).unwrap();
    let WireValue::Ref(RpcRef::Function { obj_id }) = wire else {
        panic!("expected a function sentinel");
    };
    assert_eq!(rt.registries.functions.id_of(&f), Some(obj_id));
}

#[tokio::test]
async fn test_marshal_unchanged_record_stays_structural() {
    let rt = Runtime::new();
    let record = Value::record([("a", Value::Int(1)), ("b", Value::from("x"))]);

    let wire = marshal::marshal(&rt, &record, None).unwrap();
    assert!(matches!(wire, WireValue::Record(_)));
    assert!(rt.registries.objects.is_empty());
}

#[tokio::test]
async fn test_marshal_rewritten_record_registers_generically() {
    let rt = Runtime::new();
    let record = Value::record([
        ("plain", Value::Int(1)),
        ("cb", Value::function(HostFunction::new(|_| Ok(Value::Null)))),
    ]);

    let wire = marshal::marshal(&rt, &record, None).unwrap();
    let WireValue::Ref(RpcRef::Object { obj_id, props, class_id }) = wire else {
        panic!("expected an object sentinel");
    };
    assert!(class_id.is_none());
    assert!(rt.registries.objects.contains(&obj_id));

    let props = props.unwrap();
    assert_eq!(props.get("plain"), Some(&WireValue::Int(1)));
    assert!(matches!(props.get("cb"), Some(WireValue::Ref(RpcRef::Function { .. }))));
}

// --- unmarshal ---

#[tokio::test]
async fn test_unmarshal_null_into_value_type_fails() {
    let rt = Runtime::new();
    let err = marshal::unmarshal(&rt, &WireValue::Null, &TypeHint::Int).unwrap_err();
    assert!(matches!(err, RpcError::Marshal(_)));

    let ok = marshal::unmarshal(&rt, &WireValue::Null, &TypeHint::String).unwrap();
    assert_eq!(ok, Value::Null);
}

#[tokio::test]
async fn test_unmarshal_promise_sentinel_creates_pending_entry() {
    let rt = Runtime::new();
    let raw = WireValue::Ref(RpcRef::Object {
        obj_id: "p1".into(),
        props: None,
        class_id: Some(PROMISE_CLASS_ID.into()),
    });

    let value = marshal::unmarshal(&rt, &raw, &TypeHint::future(TypeHint::String)).unwrap();
    assert!(matches!(value, Value::Future(_)));
    assert!(rt.pending.contains("p1"));

    // A second reception of the same promise joins the same wait.
    let again = marshal::unmarshal(&rt, &raw, &TypeHint::future(TypeHint::String)).unwrap();
    assert_eq!(value, again);
    assert_eq!(rt.pending.len(), 1);
}

#[tokio::test]
async fn test_unmarshal_function_sentinel_builds_callback_proxy() {
    let rt = Runtime::new();
    let raw = WireValue::Ref(RpcRef::Function { obj_id: "cb7".into() });

    let value = marshal::unmarshal(&rt, &raw, &TypeHint::Any).unwrap();
    match value {
        Value::Function(FunctionValue::Proxy(p)) => assert_eq!(p.obj_id(), "cb7"),
        other => panic!("expected a callback proxy, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unmarshal_own_function_resolves_to_host_closure() {
    let rt = Runtime::new();
    let f = HostFunction::new(|_| Ok(Value::Int(9)));
    let id = rt.register_host_function("echo", f, None);

    let raw = WireValue::Ref(RpcRef::Function { obj_id: id });
    let value = marshal::unmarshal(&rt, &raw, &TypeHint::Any).unwrap();
    match value {
        Value::Function(FunctionValue::Host(host)) => {
            assert_eq!(host.invoke(Vec::new()).unwrap(), Value::Int(9));
        }
        other => panic!("expected the original closure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unmarshal_generic_object_yields_independent_copy() {
    let rt = Runtime::new();
    let raw = WireValue::Ref(RpcRef::Object {
        obj_id: "g1".into(),
        props: Some(BTreeMap::from([("a".to_string(), WireValue::Int(1))])),
        class_id: None,
    });

    let first = marshal::unmarshal(&rt, &raw, &TypeHint::Any).unwrap();
    let second = marshal::unmarshal(&rt, &raw, &TypeHint::Any).unwrap();

    assert_eq!(first, Value::record([("a", Value::Int(1))]));
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unmarshal_coerces_numeric_primitives() {
    let rt = Runtime::new();
    assert_eq!(
        marshal::unmarshal(&rt, &WireValue::Int(3), &TypeHint::Float).unwrap(),
        Value::Float(3.0)
    );
    assert_eq!(
        marshal::unmarshal(&rt, &WireValue::Float(4.0), &TypeHint::Int).unwrap(),
        Value::Int(4)
    );
}

#[tokio::test]
async fn test_custom_deserializer_exact_match_and_fallback() {
    let rt = Runtime::new();
    rt.register_deserializer(TypeHint::String, |raw, _| {
        Ok(Value::String(format!("custom:{}", raw.as_str().unwrap_or(""))))
    });
    rt.register_deserializer(TypeHint::Any, |_, _| Ok(Value::from("fallback")));

    let exact = marshal::unmarshal(&rt, &WireValue::from("x"), &TypeHint::String).unwrap();
    assert_eq!(exact, Value::from("custom:x"));

    let fallback = marshal::unmarshal(&rt, &WireValue::Int(1), &TypeHint::Record).unwrap();
    assert_eq!(fallback, Value::from("fallback"));
}

// --- pump over the mock channel ---

#[tokio::test]
async fn test_get_descriptors_round_trip_over_mock_channel() {
    let (near, far) = DuplexChannel::pair();
    let rt = Runtime::builder().channel(near).build();
    rt.register_host_function(
        "echo",
        HostFunction::new(|args| Ok(args.into_iter().next().unwrap_or(Value::Null))),
        None,
    );

    let reply = far
        .send_sync(Message::new(Body::GetDescriptors))
        .await
        .unwrap();

    match reply.body {
        Body::DescriptorsResult { functions, .. } => {
            assert!(functions.unwrap().contains_key("echo"));
        }
        other => panic!("expected descriptors_result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pump_drops_messages_without_marker() {
    let (near, far) = DuplexChannel::pair();
    let rt = Runtime::builder().channel(near).build();
    rt.register_host_object("count", Counter::new(), ObjectDescriptor::new());

    far.send(Message {
        rpc_marker: "other-protocol".into(),
        body: Body::ObjectDied { obj_id: "count".into() },
    })
    .await
    .unwrap();

    // A marked read right behind the dropped message still resolves the
    // target, proving the drop had no side effect.
    let reply = far
        .send_sync(Message::new(Body::PropGet(CallBody {
            obj_id: "count".into(),
            call_type: CallType::Sync,
            call_id: None,
            prop: Some("count".into()),
            args: None,
        })))
        .await
        .unwrap();
    assert_eq!(
        reply.body,
        Body::SyncFnResult { success: true, result: WireValue::Int(0) }
    );
}

// --- proxy factory ---

#[test]
fn test_spec_mismatch_on_uncovered_member() {
    let descriptor = ClassDescriptor::new("animal")
        .with_instance(ObjectDescriptor::new().with_readonly("Name"));
    let shape = InterfaceShape::new()
        .property("Name", TypeHint::String)
        .method("Speak", TypeHint::future(TypeHint::String));

    let err = ProxyFactory::for_class(&descriptor, Some(&shape)).unwrap_err();
    match err {
        RpcError::SpecMismatch { class_id, member } => {
            assert_eq!(class_id, "animal");
            assert_eq!(member, "Speak");
        }
        other => panic!("expected SpecMismatch, got {:?}", other),
    }
}

#[test]
fn test_proxy_factory_accepts_covering_descriptor() {
    let descriptor = ClassDescriptor::new("animal").with_instance(
        ObjectDescriptor::new()
            .with_readonly("Name")
            .with_function(FunctionDescriptor::new("Speak").returning(CallType::Async)),
    );
    let shape = InterfaceShape::new()
        .property("Name", TypeHint::String)
        .method("Speak", TypeHint::future(TypeHint::String));

    assert!(ProxyFactory::for_class(&descriptor, Some(&shape)).is_ok());
}
