//! Turns a reply payload into what the caller sees.
//!
//! A reference id is not handed out raw: it is first resolved with a separate
//! `Resolve` request, which confirms the entry is live and reports its class,
//! and only then wrapped in a bound proxy that targets the entry directly.

use std::sync::Arc;

use tracing::debug;

use cordrpc::Payload;
use cordrpc::Request;
use cordrpc::RootId;
use cordrpc::Value;

use crate::error::Error;
use crate::error::Result;
use crate::peer::Peer;
use crate::proxy::Proxy;
use crate::proxy::Resolved;

pub(crate) async fn resolve(peer: &Arc<Peer>, root: RootId, payload: Payload) -> Result<Resolved> {
    match payload {
        Payload::Unit => Ok(Resolved::Value(Value::Undefined)),
        Payload::Value(Value::Ref(id)) => {
            let described = peer.call(Request::Resolve { root, id: id.clone() }).await?;
            let Payload::Value(Value::String(class)) = described else {
                return Err(Error::UnexpectedReply(format!("resolve of {} returned {:?}", id, described)));
            };
            debug!(%root, %id, %class, "reference resolved");
            Ok(Resolved::Object(Proxy::bound(peer.clone(), root, id, &class)))
        }
        Payload::Value(value) => Ok(Resolved::Value(value)),
        Payload::Root(other) => Err(Error::UnexpectedReply(format!("root {} where a value was expected", other))),
    }
}

/// Like `resolve`, for calls that must produce an object.
pub(crate) async fn resolve_object(peer: &Arc<Peer>, root: RootId, payload: Payload) -> Result<Proxy> {
    resolve(peer, root, payload).await?.into_proxy()
}
