//! # Descriptors
//!
//! Metadata naming which members of a host target are reachable and how they
//! should be called. Descriptors travel inside `descriptors_result` messages
//! and are the schema the proxy factory builds against.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::message::CallType;
use crate::value::WireValue;

/// Names which members of a host instance are exposed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Properties read once at descriptor time and shipped inline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readonly_properties: Vec<String>,
    /// Properties whose reads and writes round-trip through the channel.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proxied_properties: Vec<PropertyDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionDescriptor>,
}

impl ObjectDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_readonly(mut self, name: impl Into<String>) -> Self {
        self.readonly_properties.push(name.into());
        self
    }

    pub fn with_property(mut self, prop: PropertyDescriptor) -> Self {
        self.proxied_properties.push(prop);
        self
    }

    pub fn with_function(mut self, func: FunctionDescriptor) -> Self {
        self.functions.push(func);
        self
    }

    pub fn find_function(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn find_property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.proxied_properties.iter().find(|p| p.name == name)
    }
}

/// A proxied property: reads and writes are routed through the channel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<FunctionDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<FunctionDescriptor>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_get(mut self, desc: FunctionDescriptor) -> Self {
        self.get = Some(desc);
        self
    }

    pub fn with_set(mut self, desc: FunctionDescriptor) -> Self {
        self.set = Some(desc);
        self
    }
}

/// Describes a callable member. `returns` is the caller's preference for how
/// a reply should be delivered; the runtime may downgrade it to fit the
/// channel's capabilities.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<ArgumentDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<CallType>,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn returning(mut self, returns: CallType) -> Self {
        self.returns = Some(returns);
        self
    }

    pub fn with_argument(mut self, arg: ArgumentDescriptor) -> Self {
        self.arguments.get_or_insert_with(Vec::new).push(arg);
        self
    }
}

/// Describes one argument position. `idx = None` applies to every position
/// no indexed descriptor claimed. The descriptor body is a function shape,
/// used when the argument is a callback.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idx: Option<usize>,
    #[serde(flatten)]
    pub function: FunctionDescriptor,
}

impl ArgumentDescriptor {
    pub fn at(idx: usize, function: FunctionDescriptor) -> Self {
        Self { idx: Some(idx), function }
    }

    pub fn any(function: FunctionDescriptor) -> Self {
        Self { idx: None, function }
    }
}

/// Selects the descriptor governing argument position `idx`.
///
/// First match by ascending `idx` wins; descriptors without an index apply
/// to the positions no indexed descriptor claimed.
pub fn select_argument<'a>(
    descs: Option<&'a [ArgumentDescriptor]>,
    idx: usize,
) -> Option<&'a ArgumentDescriptor> {
    let descs = descs?;
    descs
        .iter()
        .filter(|d| d.idx == Some(idx))
        .min_by_key(|d| d.idx)
        .or_else(|| descs.iter().find(|d| d.idx.is_none()))
}

/// Describes a class: its constructor, its per-instance members, and
/// optionally a static surface registered as a host object under the
/// class id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub class_id: String,
    #[serde(rename = "static", default, skip_serializing_if = "Option::is_none")]
    pub statics: Option<ObjectDescriptor>,
    #[serde(default)]
    pub instance: ObjectDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctor: Option<FunctionDescriptor>,
}

impl ClassDescriptor {
    pub fn new(class_id: impl Into<String>) -> Self {
        Self { class_id: class_id.into(), ..Self::default() }
    }

    pub fn with_instance(mut self, instance: ObjectDescriptor) -> Self {
        self.instance = instance;
        self
    }

    pub fn with_statics(mut self, statics: ObjectDescriptor) -> Self {
        self.statics = Some(statics);
        self
    }

    pub fn with_ctor(mut self, ctor: FunctionDescriptor) -> Self {
        self.ctor = Some(ctor);
        self
    }
}

/// A host-object entry in a descriptor exchange: the descriptor plus the
/// inline bag produced by evaluating its readonly properties at exchange
/// time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescriptorWithProps {
    #[serde(flatten)]
    pub descriptor: ObjectDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<BTreeMap<String, WireValue>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_selection_indexed_first() {
        let descs = vec![
            ArgumentDescriptor::any(FunctionDescriptor::new("fallback")),
            ArgumentDescriptor::at(1, FunctionDescriptor::new("one")),
        ];
        let picked = select_argument(Some(&descs), 1).unwrap();
        assert_eq!(picked.function.name, "one");
    }

    #[test]
    fn test_argument_selection_falls_back_to_unindexed() {
        let descs = vec![
            ArgumentDescriptor::at(0, FunctionDescriptor::new("zero")),
            ArgumentDescriptor::any(FunctionDescriptor::new("fallback")),
        ];
        let picked = select_argument(Some(&descs), 3).unwrap();
        assert_eq!(picked.function.name, "fallback");
    }

    #[test]
    fn test_argument_selection_none_when_uncovered() {
        let descs = vec![ArgumentDescriptor::at(0, FunctionDescriptor::new("zero"))];
        assert!(select_argument(Some(&descs), 2).is_none());
        assert!(select_argument(None, 0).is_none());
    }

    #[test]
    fn test_class_descriptor_static_field_name() {
        let desc = ClassDescriptor::new("animal")
            .with_statics(ObjectDescriptor::new().with_readonly("kingdom"));
        let json = serde_json::to_value(&desc).unwrap();
        assert!(json.get("static").is_some());
        assert!(json.get("statics").is_none());
    }

    #[test]
    fn test_object_descriptor_round_trip() {
        let desc = ObjectDescriptor::new()
            .with_readonly("Name")
            .with_property(PropertyDescriptor::new("Age").read_only())
            .with_function(FunctionDescriptor::new("Speak").returning(CallType::Async));
        let json = serde_json::to_string(&desc).unwrap();
        let back: ObjectDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);
        assert!(back.find_function("Speak").is_some());
        assert!(back.find_property("Age").unwrap().read_only);
    }

    #[test]
    fn test_descriptor_with_props_flattens() {
        let entry = ObjectDescriptorWithProps {
            descriptor: ObjectDescriptor::new().with_readonly("Name"),
            props: Some(BTreeMap::from([("Name".to_string(), WireValue::from("Leo"))])),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["readonly_properties"][0], "Name");
        assert_eq!(json["props"]["Name"], "Leo");
    }
}
