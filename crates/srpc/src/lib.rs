//! # srpc runtime
//!
//! A bidirectional object-oriented RPC runtime. Two peers connected by a
//! message channel expose objects, functions, and classes to each other and
//! invoke them as if they were local: descriptors describe what is
//! reachable, the marshalling pipeline rewrites live handles into reference
//! sentinels, and proxies route member access back over the channel using
//! the call style each endpoint negotiated.

pub mod channel;
pub mod context;
pub mod error;
pub mod marshal;
pub mod pending;
pub mod proxy;
pub mod registry;
pub mod runtime;
pub mod target;
pub mod value;

mod dispatch;

#[cfg(test)]
mod mock_channel;

#[cfg(test)]
mod tests;

pub use channel::Channel;
pub use channel::Inbound;
pub use channel::ReplySink;
pub use context::current_context;
pub use error::Result;
pub use error::RpcError;
pub use marshal::TypeHint;
pub use pending::CompletionSlot;
pub use proxy::InterfaceShape;
pub use proxy::MemberKind;
pub use proxy::ProxyFactory;
pub use proxy::ProxyFunction;
pub use proxy::ProxyObject;
pub use registry::IdGenerator;
pub use registry::SequentialIds;
pub use runtime::Runtime;
pub use runtime::RuntimeBuilder;
pub use target::HostClass;
pub use target::HostFunction;
pub use target::RecordTarget;
pub use target::RpcTarget;
pub use value::FunctionValue;
pub use value::FutureValue;
pub use value::ObjectValue;
pub use value::Value;
