//! # Runtime values
//!
//! The value graph host code hands to and receives from the runtime. It is
//! the wire grammar plus live handles: local targets, callables, proxies,
//! and completion-slot-backed futures. Marshalling rewrites the live handles
//! into wire sentinels; unmarshalling produces them from sentinels.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::error::RpcError;
use crate::pending::CompletionSlot;
use crate::pending::SettledValue;
use crate::proxy::ProxyFunction;
use crate::proxy::ProxyObject;
use crate::target::HostFunction;
use crate::target::RpcTarget;

/// A value as host code sees it.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
    /// A live local target, optionally bound to a registered class.
    Object(ObjectValue),
    /// A local stand-in for one of the peer's host objects.
    Proxy(Arc<ProxyObject>),
    /// A callable: a host closure or a remote callback proxy.
    Function(FunctionValue),
    /// A settlement handle, local or remote.
    Future(FutureValue),
}

impl Value {
    /// Builds a record from key/value pairs.
    pub fn record<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Record(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Wraps a local async computation as a future value.
    ///
    /// The computation starts immediately on the current Tokio runtime and
    /// inherits the dispatch context in effect at the call site.
    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = SettledValue> + Send + 'static,
    {
        Self::Future(FutureValue::spawn(fut))
    }

    /// Wraps a live local target.
    pub fn object(target: Arc<dyn RpcTarget>) -> Self {
        Self::Object(ObjectValue { target, class_id: None })
    }

    /// Wraps a live local target bound to a registered class.
    pub fn instance(class_id: impl Into<String>, target: Arc<dyn RpcTarget>) -> Self {
        Self::Object(ObjectValue { target, class_id: Some(class_id.into()) })
    }

    pub fn function(f: HostFunction) -> Self {
        Self::Function(FunctionValue::Host(f))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Arc<ProxyObject>> {
        match self {
            Self::Proxy(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionValue> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_future(&self) -> Option<&FutureValue> {
        match self {
            Self::Future(f) => Some(f),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a == b,
            // Handles compare by identity.
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(&a.target, &b.target),
            (Self::Proxy(a), Self::Proxy(b)) => Arc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Future(a), Self::Future(b)) => Arc::ptr_eq(&a.slot, &b.slot),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(b) => write!(f, "Bool({})", b),
            Self::Int(n) => write!(f, "Int({})", n),
            Self::Float(x) => write!(f, "Float({})", x),
            Self::String(s) => write!(f, "String({:?})", s),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Record(map) => f.debug_tuple("Record").field(map).finish(),
            Self::Object(o) => write!(f, "Object(class_id: {:?})", o.class_id),
            Self::Proxy(p) => write!(f, "Proxy({})", p.obj_id()),
            Self::Function(_) => write!(f, "Function"),
            Self::Future(_) => write!(f, "Future"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

/// A live local target with its optional class binding. The class binding is
/// what selects marshal rule 3 (registered-class instance) over generic
/// identity transport.
#[derive(Clone)]
pub struct ObjectValue {
    pub target: Arc<dyn RpcTarget>,
    pub class_id: Option<String>,
}

/// A callable value.
#[derive(Clone)]
pub enum FunctionValue {
    /// A local closure.
    Host(HostFunction),
    /// A callback proxy that routes invocations to the peer.
    Proxy(Arc<ProxyFunction>),
}

impl FunctionValue {
    /// Invokes the callable. Host closures run inline; callback proxies send
    /// a `fn_call` and decode the outcome per their negotiated call style.
    pub async fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        match self {
            Self::Host(f) => f.invoke(args),
            Self::Proxy(p) => p.call(args).await,
        }
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Host(a), Self::Host(b)) => a.ptr_eq(b),
            (Self::Proxy(a), Self::Proxy(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A settlement handle backed by a [`CompletionSlot`].
///
/// Locally produced futures fill the slot when their computation finishes;
/// remotely produced ones are filled by the matching result message.
#[derive(Clone)]
pub struct FutureValue {
    slot: Arc<CompletionSlot>,
}

impl FutureValue {
    /// Spawns `fut` and returns a handle that settles with its output. The
    /// dispatch context in effect at the call site is carried into the task.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = SettledValue> + Send + 'static,
    {
        let slot = Arc::new(CompletionSlot::new());
        let inner = slot.clone();
        let context = crate::context::current_context();
        tokio::spawn(async move {
            let result = crate::context::scope(context, fut).await;
            inner.complete(result);
        });
        Self { slot }
    }

    pub(crate) fn from_slot(slot: Arc<CompletionSlot>) -> Self {
        Self { slot }
    }

    pub fn slot(&self) -> &Arc<CompletionSlot> {
        &self.slot
    }

    /// Waits for settlement. A failure settlement surfaces as
    /// [`RpcError::RemoteCall`] carrying the reported message.
    pub async fn wait(&self) -> Result<Value> {
        self.slot.wait().await.map_err(RpcError::RemoteCall)
    }
}
