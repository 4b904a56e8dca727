//! # Protocol messages
//!
//! The `action`-tagged envelope both peers exchange. Every message carries
//! the fixed `rpc_marker`; traffic without it is not ours and is silently
//! ignored by the receiving runtime.
//!
//! ## Invariants
//!
//! - Decoding never panics on foreign data; unknown fields are skipped.
//! - A present marker with an unknown `action` is a protocol error; an
//!   absent marker is not.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::descriptor::ClassDescriptor;
use crate::descriptor::FunctionDescriptor;
use crate::descriptor::ObjectDescriptorWithProps;
use crate::error::Error;
use crate::error::Result;
use crate::value::WireValue;

/// The fixed marker every protocol message carries.
pub const RPC_MARKER: &str = "srpc";

/// Every `action` value a peer understands.
const KNOWN_ACTIONS: &[&str] = &[
    "get_descriptors",
    "descriptors_result",
    "prop_get",
    "prop_set",
    "method_call",
    "fn_call",
    "ctor_call",
    "sync_fn_result",
    "async_fn_result",
    "obj_died",
];

/// The caller's reply-discipline preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// No reply, even on failure.
    Void,
    /// The reply is returned on the reply channel before control returns.
    Sync,
    /// The reply arrives later as an `async_fn_result` keyed by `call_id`.
    Async,
}

/// The kind of invocation a `Call` message requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallAction {
    PropGet,
    PropSet,
    MethodCall,
    FnCall,
    CtorCall,
}

/// The payload shared by all five call actions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallBody {
    pub obj_id: String,
    pub call_type: CallType,
    /// Present iff `call_type = async`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<WireValue>>,
}

impl Default for CallType {
    fn default() -> Self {
        Self::Async
    }
}

/// Message body, discriminated on the wire by `action`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Body {
    GetDescriptors,
    DescriptorsResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        objects: Option<BTreeMap<String, ObjectDescriptorWithProps>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        functions: Option<BTreeMap<String, FunctionDescriptor>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        classes: Option<BTreeMap<String, ClassDescriptor>>,
    },
    PropGet(CallBody),
    PropSet(CallBody),
    MethodCall(CallBody),
    FnCall(CallBody),
    CtorCall(CallBody),
    SyncFnResult {
        success: bool,
        result: WireValue,
    },
    AsyncFnResult {
        success: bool,
        result: WireValue,
        call_id: String,
    },
    #[serde(rename = "obj_died")]
    ObjectDied { obj_id: String },
}

impl Body {
    /// Splits a call message into its action and payload.
    pub fn as_call(&self) -> Option<(CallAction, &CallBody)> {
        match self {
            Self::PropGet(c) => Some((CallAction::PropGet, c)),
            Self::PropSet(c) => Some((CallAction::PropSet, c)),
            Self::MethodCall(c) => Some((CallAction::MethodCall, c)),
            Self::FnCall(c) => Some((CallAction::FnCall, c)),
            Self::CtorCall(c) => Some((CallAction::CtorCall, c)),
            _ => None,
        }
    }

    pub fn call(action: CallAction, body: CallBody) -> Self {
        match action {
            CallAction::PropGet => Self::PropGet(body),
            CallAction::PropSet => Self::PropSet(body),
            CallAction::MethodCall => Self::MethodCall(body),
            CallAction::FnCall => Self::FnCall(body),
            CallAction::CtorCall => Self::CtorCall(body),
        }
    }
}

/// A complete protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub rpc_marker: String,
    #[serde(flatten)]
    pub body: Body,
}

impl Message {
    pub fn new(body: Body) -> Self {
        Self { rpc_marker: RPC_MARKER.to_string(), body }
    }

    pub fn has_marker(&self) -> bool {
        self.rpc_marker == RPC_MARKER
    }
}

/// Interprets a raw JSON value as a protocol message.
///
/// Returns `Ok(None)` when the marker is absent or wrong (the message is not
/// ours and must be ignored without side effect). With the marker present, an
/// unrecognized `action` is `Error::UnknownAction` and any other decode
/// failure is `Error::Malformed`.
pub fn parse(raw: &serde_json::Value) -> Result<Option<Message>> {
    let marker = raw.get("rpc_marker").and_then(|v| v.as_str());
    if marker != Some(RPC_MARKER) {
        return Ok(None);
    }
    match serde_json::from_value::<Message>(raw.clone()) {
        Ok(msg) => Ok(Some(msg)),
        Err(e) => {
            let action = raw.get("action").and_then(|v| v.as_str());
            match action {
                Some(a) if !KNOWN_ACTIONS.contains(&a) => Err(Error::UnknownAction(a.to_string())),
                _ => Err(Error::Malformed(e.to_string())),
            }
        }
    }
}

/// Interprets raw JSON bytes as a protocol message. See [`parse`].
pub fn parse_slice(raw: &[u8]) -> Result<Option<Message>> {
    let value: serde_json::Value =
        serde_json::from_slice(raw).map_err(|e| Error::Malformed(e.to_string()))?;
    parse(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_message_shape() {
        let msg = Message::new(Body::MethodCall(CallBody {
            obj_id: "calc".into(),
            call_type: CallType::Sync,
            call_id: None,
            prop: Some("Add".into()),
            args: Some(vec![WireValue::from(2), WireValue::from(3)]),
        }));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "rpc_marker": "srpc",
                "action": "method_call",
                "obj_id": "calc",
                "call_type": "sync",
                "prop": "Add",
                "args": [2, 3],
            })
        );
    }

    #[test]
    fn test_async_result_shape() {
        let msg = Message::new(Body::AsyncFnResult {
            success: true,
            result: WireValue::from("hi"),
            call_id: "17".into(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "rpc_marker": "srpc",
                "action": "async_fn_result",
                "success": true,
                "result": "hi",
                "call_id": "17",
            })
        );
    }

    #[test]
    fn test_obj_died_shape() {
        let msg = Message::new(Body::ObjectDied { obj_id: "lion".into() });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["action"], "obj_died");
        assert_eq!(json["obj_id"], "lion");
    }

    #[test]
    fn test_parse_missing_marker_is_ignored() {
        let raw = serde_json::json!({ "action": "method_call", "obj_id": "x" });
        assert_eq!(parse(&raw).unwrap(), None);
    }

    #[test]
    fn test_parse_unknown_action_is_an_error() {
        let raw = serde_json::json!({ "rpc_marker": "srpc", "action": "explode" });
        match parse(&raw) {
            Err(Error::UnknownAction(a)) => assert_eq!(a, "explode"),
            other => panic!("expected UnknownAction, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_round_trip() {
        let msg = Message::new(Body::GetDescriptors);
        let raw = serde_json::to_value(&msg).unwrap();
        let back = parse(&raw).unwrap().expect("marker present");
        assert_eq!(back, msg);
    }

    #[test]
    fn test_call_round_trip_preserves_call_id() {
        let msg = Message::new(Body::FnCall(CallBody {
            obj_id: "echo".into(),
            call_type: CallType::Async,
            call_id: Some("17".into()),
            prop: None,
            args: Some(vec![WireValue::from("hi")]),
        }));
        let bytes = serde_json::to_vec(&msg).unwrap();
        let back = parse_slice(&bytes).unwrap().unwrap();
        let (action, call) = back.body.as_call().unwrap();
        assert_eq!(action, CallAction::FnCall);
        assert_eq!(call.call_id.as_deref(), Some("17"));
    }
}
