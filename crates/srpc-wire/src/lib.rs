//! # srpc wire protocol
//!
//! Value grammar, message envelopes, and descriptors shared by both peers.
//! This crate fixes every field name the protocol treats as normative; how
//! the resulting structures become bytes is the transport's concern.

pub mod descriptor;
pub mod error;
pub mod message;
pub mod value;

pub use descriptor::ArgumentDescriptor;
pub use descriptor::ClassDescriptor;
pub use descriptor::FunctionDescriptor;
pub use descriptor::ObjectDescriptor;
pub use descriptor::ObjectDescriptorWithProps;
pub use descriptor::PropertyDescriptor;
pub use descriptor::select_argument;
pub use error::Error;
pub use error::Result;
pub use message::Body;
pub use message::CallAction;
pub use message::CallBody;
pub use message::CallType;
pub use message::Message;
pub use message::RPC_MARKER;
pub use message::parse;
pub use message::parse_slice;
pub use value::PROMISE_CLASS_ID;
pub use value::RpcRef;
pub use value::WireValue;
