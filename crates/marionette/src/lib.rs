//! # marionette
//!
//! Drive an object graph that lives inside a sandbox as if it were local.
//!
//! The controller never learns the remote API up front. It holds `Proxy`
//! values that record property paths; reads, writes and calls become
//! `Operation`s that the sandbox executes against the real objects. Primitive
//! results come back by copy. Everything else is parked in a per-root
//! registry and comes back as a new proxy bound to its registry id, which can
//! itself be passed back in as an argument without ever being copied.
//!
//! ## Layers
//!
//! - `transport`: opaque ordered byte pipes, plus an in-process channel pair.
//! - `peer`: sequence-numbered request/reply over a transport.
//! - `proxy`, `marshal`, `resolve`: the controller's view of remote objects.
//! - `context`: lifecycle (open, roots, capture, resource loads, close).
//! - `sandbox`: the remote side, with a small 2D canvas stand-in.

pub mod context;
pub mod error;
pub mod marshal;
pub mod peer;
pub mod proxy;
pub mod resolve;
pub mod sandbox;
pub mod transport;


pub use context::Capture;
pub use context::Context;
pub use context::ContextBuilder;
pub use error::Error;
pub use error::Result;
pub use marshal::Arg;
pub use peer::Peer;
pub use proxy::Pending;
pub use proxy::Proxy;
pub use proxy::ProxyState;
pub use proxy::Resolved;
pub use sandbox::Sandbox;
pub use sandbox::resources::AssetStore;
pub use sandbox::resources::Fetch;
pub use sandbox::resources::FetchError;
pub use transport::ChannelTransport;
pub use transport::Transport;

pub use cordrpc::CaptureEncoding;
pub use cordrpc::CaptureOptions;
pub use cordrpc::Clip;
pub use cordrpc::Failure;
pub use cordrpc::LoadFailureKind;
pub use cordrpc::RefId;
pub use cordrpc::RootId;
pub use cordrpc::Segment;
pub use cordrpc::Value;
