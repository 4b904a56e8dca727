//! # Identity registries
//!
//! Two-way id↔target maps for everything a peer exposes. Uses DashMap for
//! concurrent access without global locking: the channel's dispatch task and
//! user code invoking proxies on other threads touch these maps freely.
//!
//! ## Invariants
//!
//! - Registration is idempotent on target identity: the same target maps to
//!   the same id on every lookup.
//! - An entry is inserted before its id is ever written to the wire.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;

use srpc_wire::ClassDescriptor;
use srpc_wire::FunctionDescriptor;
use srpc_wire::ObjectDescriptor;

use crate::target::HostClass;
use crate::target::HostFunction;
use crate::target::RpcTarget;

/// Mints registry ids. Injected so the hosting application controls id
/// policy; ids must be unique for the lifetime of this peer.
pub trait IdGenerator: Send + Sync + 'static {
    fn next_id(&self) -> String;
}

/// Default generator: a prefixed monotonic counter.
pub struct SequentialIds {
    prefix: &'static str,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix, next: AtomicU64::new(1) }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        format!("{}{}", self.prefix, self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity key for reverse lookup. Targets are keyed by allocation address,
/// the Rust rendition of reference identity.
pub trait Keyed {
    fn key_addr(&self) -> usize;
}

impl Keyed for Arc<dyn RpcTarget> {
    fn key_addr(&self) -> usize {
        Arc::as_ptr(self) as *const () as usize
    }
}

impl Keyed for HostFunction {
    fn key_addr(&self) -> usize {
        self.addr()
    }
}

impl Keyed for Arc<HostClass> {
    fn key_addr(&self) -> usize {
        Arc::as_ptr(self) as *const () as usize
    }
}

/// One registered target.
#[derive(Clone)]
pub struct Entry<T, D> {
    pub id: String,
    pub target: T,
    pub descriptor: D,
}

/// A two-way id↔target map.
pub struct Registry<T, D> {
    by_id: DashMap<String, Entry<T, D>>,
    by_addr: DashMap<usize, String>,
    ids: Arc<dyn IdGenerator>,
}

impl<T: Keyed + Clone, D: Clone> Registry<T, D> {
    pub(crate) fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            by_id: DashMap::new(),
            by_addr: DashMap::new(),
            ids,
        }
    }

    /// Registers `target` under a freshly minted id, or returns the id it
    /// already holds.
    pub fn register(&self, target: T, descriptor: D) -> String {
        let addr = target.key_addr();
        if let Some(existing) = self.by_addr.get(&addr) {
            return existing.value().clone();
        }
        let id = self.ids.next_id();
        self.insert(id.clone(), addr, target, descriptor);
        id
    }

    /// Registers `target` under an explicit id, or returns the id it already
    /// holds.
    pub fn register_as(&self, id: impl Into<String>, target: T, descriptor: D) -> String {
        let addr = target.key_addr();
        if let Some(existing) = self.by_addr.get(&addr) {
            return existing.value().clone();
        }
        let id = id.into();
        self.insert(id.clone(), addr, target, descriptor);
        id
    }

    fn insert(&self, id: String, addr: usize, target: T, descriptor: D) {
        let entry = Entry { id: id.clone(), target, descriptor };
        if let Some(old) = self.by_id.insert(id.clone(), entry) {
            self.by_addr.remove(&old.target.key_addr());
        }
        self.by_addr.insert(addr, id);
    }

    pub fn get(&self, id: &str) -> Option<Entry<T, D>> {
        self.by_id.get(id).map(|e| e.value().clone())
    }

    pub fn id_of(&self, target: &T) -> Option<String> {
        self.by_addr.get(&target.key_addr()).map(|e| e.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Entry<T, D>> {
        let (_, entry) = self.by_id.remove(id)?;
        self.by_addr.remove(&entry.target.key_addr());
        Some(entry)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn entries(&self) -> Vec<Entry<T, D>> {
        self.by_id.iter().map(|e| e.value().clone()).collect()
    }
}

/// The host-side registries: objects, free functions, and classes. All three
/// share one id generator, so ids are unique across the peer.
pub struct Registries {
    pub objects: Registry<Arc<dyn RpcTarget>, ObjectDescriptor>,
    pub functions: Registry<HostFunction, Option<FunctionDescriptor>>,
    pub classes: Registry<Arc<HostClass>, ClassDescriptor>,
}

impl Registries {
    pub(crate) fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            objects: Registry::new(ids.clone()),
            functions: Registry::new(ids.clone()),
            classes: Registry::new(ids),
        }
    }
}
