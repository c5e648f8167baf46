//! # CordRPC
//!
//! The wire protocol of the marionette bridge, layered over Cordpack.
//!
//! ## Architecture
//!
//! A controller never ships code to the sandbox. It ships `Operation`s: a
//! kind (Get, Set, Apply), a property path, and serializable data. Anything
//! that cannot be serialized stays on the remote side and crosses the wire as
//! a `RefId` token instead.
//!
//! Every request travels in a `RequestFrame` tagged with a sequence number;
//! the matching `ReplyFrame` carries either a `Payload` or a `Failure`.

pub mod codec;
pub mod error;
pub mod frame;
pub mod op;
pub mod value;

#[cfg(test)]
mod tests;

pub use codec::decode_path;
pub use codec::decode_value;
pub use codec::encode_path;
pub use codec::encode_value;
pub use error::Error;
pub use error::Failure;
pub use error::LoadFailureKind;
pub use error::Result;
pub use frame::decode_seq;
pub use frame::CaptureEncoding;
pub use frame::CaptureOptions;
pub use frame::Clip;
pub use frame::Frame;
pub use frame::Payload;
pub use frame::ReplyFrame;
pub use frame::Request;
pub use frame::RequestFrame;
pub use frame::RootId;
pub use frame::Target;
pub use op::OpKind;
pub use op::Operation;
pub use value::RefId;
pub use value::Segment;
pub use value::Value;
