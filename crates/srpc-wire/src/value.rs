//! # Wire values
//!
//! The post-marshal value grammar. Anything that survives marshalling is
//! either plain data (null, scalars, strings, lists, string-keyed records)
//! or a reference sentinel standing in for an entity that cannot cross the
//! wire by value: a registered object, a callable, or a live future.
//!
//! ## Invariants
//!
//! - A sentinel's `obj_id` is registered on the sending side before the
//!   sentinel is emitted.
//! - `class_id = "Promise"` always denotes a pending future, never a class.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// The reserved `class_id` denoting a live future.
pub const PROMISE_CLASS_ID: &str = "Promise";

/// A reference sentinel embedded in a serialized value, tagged by `rpc_type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rpc_type", rename_all = "snake_case")]
pub enum RpcRef {
    /// `RPC_Object`: a registered object. With `class_id = "Promise"` this is
    /// a live future; with any other `class_id` an instance of a registered
    /// host class; with no `class_id` a generic object registered solely to
    /// transport identity.
    Object {
        obj_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        props: Option<BTreeMap<String, WireValue>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class_id: Option<String>,
    },
    /// `RPC_Function`: a marshalled callable.
    Function { obj_id: String },
}

impl RpcRef {
    pub fn obj_id(&self) -> &str {
        match self {
            Self::Object { obj_id, .. } => obj_id,
            Self::Function { obj_id } => obj_id,
        }
    }

    /// True when this is an object sentinel for a live future.
    pub fn is_promise(&self) -> bool {
        matches!(self, Self::Object { class_id: Some(c), .. } if c == PROMISE_CLASS_ID)
    }
}

/// A value as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<WireValue>),
    // Sentinels must precede Record: both decode from maps, and the
    // `rpc_type` tag is what tells them apart.
    Ref(RpcRef),
    Record(BTreeMap<String, WireValue>),
}

impl WireValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_ref_sentinel(&self) -> Option<&RpcRef> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }
}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for WireValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for WireValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for WireValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for WireValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for WireValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}
