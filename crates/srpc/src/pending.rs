//! # Completion slots and the pending-call table
//!
//! A [`CompletionSlot`] is the single settlement abstraction used on both
//! sides of the future bridge: outbound async calls wait on one until the
//! matching result message arrives, and inbound host futures fill one whose
//! settlement is then emitted to the peer.
//!
//! ## Invariants
//!
//! - A slot settles at most once; later completions are ignored.
//! - A pending-call entry exists iff the local side is waiting for exactly
//!   one result message with that call id.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::marshal::TypeHint;
use crate::value::Value;

/// The outcome a slot settles with: a value, or the failure text reported by
/// whichever side produced it.
pub type SettledValue = std::result::Result<Value, String>;

/// A one-shot, multi-waiter settlement cell.
pub struct CompletionSlot {
    state: Mutex<Option<SettledValue>>,
    notify: Notify,
}

impl CompletionSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Settles the slot. The first completion wins; any later one is a no-op.
    pub fn complete(&self, result: SettledValue) {
        let mut state = self.state.lock().unwrap();
        if state.is_none() {
            *state = Some(result);
            drop(state);
            self.notify.notify_waiters();
        }
    }

    /// Returns the settlement if one has happened.
    pub fn try_result(&self) -> Option<SettledValue> {
        self.state.lock().unwrap().clone()
    }

    /// Waits until the slot settles. Every waiter observes the same outcome.
    pub async fn wait(&self) -> SettledValue {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            if let Some(result) = self.try_result() {
                return result;
            }
            notified.await;
        }
    }
}

impl Default for CompletionSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// A one-shot barrier set once the immediate reply for the current inbound
/// call has been emitted. Follow-up settlements wait on it so the peer always
/// observes the acknowledgement before the settlement.
pub struct ReplyBarrier {
    opened: AtomicBool,
    notify: Notify,
}

impl ReplyBarrier {
    pub fn new() -> Self {
        Self {
            opened: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn open(&self) {
        if !self.opened.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub async fn wait(&self) {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.opened.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ReplyBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// One outstanding settlement: the slot to fill and the shape the result
/// message should be decoded against.
#[derive(Clone)]
pub struct PendingCall {
    pub slot: Arc<CompletionSlot>,
    pub expects: TypeHint,
}

/// The table of calls awaiting a result message, keyed by call id (or, for
/// Promise sentinels, by the future's object id).
pub struct PendingCalls {
    entries: DashMap<String, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Looks up or creates the entry for `call_id`, preserving slot identity
    /// across overlapping waits on the same id.
    pub fn register(&self, call_id: impl Into<String>, expects: TypeHint) -> Arc<CompletionSlot> {
        let entry = self
            .entries
            .entry(call_id.into())
            .or_insert_with(|| PendingCall {
                slot: Arc::new(CompletionSlot::new()),
                expects,
            });
        entry.slot.clone()
    }

    /// Retires and returns the entry for `call_id`.
    pub fn take(&self, call_id: &str) -> Option<PendingCall> {
        self.entries.remove(call_id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.entries.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Settles every outstanding entry with the given failure. Used when the
    /// channel closes underneath the runtime.
    pub fn fail_all(&self, reason: &str) {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                entry.slot.complete(Err(reason.to_string()));
            }
        }
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}
