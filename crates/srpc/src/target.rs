//! # Host targets
//!
//! The callable surfaces a peer exposes: objects, free functions, and
//! classes. A target implements only the members it exposes; everything else
//! answers `MemberNotFound`, which dispatch reports back to the peer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::error::Result;
use crate::error::RpcError;
use crate::value::Value;

/// A host object reachable from the peer.
///
/// Dispatch resolves the object by id and routes property reads, property
/// writes, and method invocations here. Methods that do asynchronous work
/// return [`Value::Future`]; the runtime settles the peer's side when the
/// future completes.
pub trait RpcTarget: Send + Sync + 'static {
    fn get(&self, prop: &str) -> Result<Value> {
        Err(RpcError::MemberNotFound { member: prop.to_string() })
    }

    fn set(&self, prop: &str, value: Value) -> Result<()> {
        let _ = value;
        Err(RpcError::MemberNotFound { member: prop.to_string() })
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let _ = args;
        Err(RpcError::MemberNotFound { member: method.to_string() })
    }
}

type HostFn = dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync;

/// A host-registered free function or delegate.
///
/// Identity is the closure allocation: registering the same `HostFunction`
/// twice yields the same id.
#[derive(Clone)]
pub struct HostFunction {
    f: Arc<HostFn>,
}

impl HostFunction {
    pub fn new(f: impl Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }

    pub fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        (self.f)(args)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.f) as *const () as usize
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

/// A host-registered class: a constructor plus an optional static surface.
///
/// The static surface is registered as a host object under the class id, so
/// the peer reaches statics exactly like any other object's members.
pub struct HostClass {
    ctor: Option<HostFunction>,
    statics: Option<Arc<dyn RpcTarget>>,
}

impl HostClass {
    pub fn new() -> Self {
        Self { ctor: None, statics: None }
    }

    pub fn with_ctor(mut self, ctor: HostFunction) -> Self {
        self.ctor = Some(ctor);
        self
    }

    pub fn with_statics(mut self, statics: Arc<dyn RpcTarget>) -> Self {
        self.statics = Some(statics);
        self
    }

    pub fn ctor(&self) -> Option<&HostFunction> {
        self.ctor.as_ref()
    }

    pub fn statics(&self) -> Option<&Arc<dyn RpcTarget>> {
        self.statics.as_ref()
    }
}

impl Default for HostClass {
    fn default() -> Self {
        Self::new()
    }
}

/// Backing target for a record graph registered solely to transport
/// identity.
pub struct RecordTarget {
    fields: Mutex<BTreeMap<String, Value>>,
}

impl RecordTarget {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self { fields: Mutex::new(fields) }
    }
}

impl RpcTarget for RecordTarget {
    fn get(&self, prop: &str) -> Result<Value> {
        self.fields
            .lock()
            .unwrap()
            .get(prop)
            .cloned()
            .ok_or_else(|| RpcError::MemberNotFound { member: prop.to_string() })
    }

    fn set(&self, prop: &str, value: Value) -> Result<()> {
        self.fields.lock().unwrap().insert(prop.to_string(), value);
        Ok(())
    }
}

/// Placeholder target behind the id minted for a marshalled future. The id
/// only correlates the later settlement message; nothing dispatches on it.
pub struct PromiseTarget;

impl RpcTarget for PromiseTarget {}
