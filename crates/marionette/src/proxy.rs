//! # Local Proxies
//!
//! A `Proxy` stands in for something inside the sandbox. It is either an
//! *unbound path* (a root, or a bound reference, plus property segments that
//! have not been looked up yet) or a *bound reference* (a registry id with an
//! empty path).
//!
//! Extending a path is local and free. Only `fetch`, `set` and `invoke` talk
//! to the sandbox, and they submit their request before returning, so the
//! sandbox sees operations in the order they were issued whether or not the
//! returned `Pending` is awaited.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::FutureExt;
use futures::future::BoxFuture;

use cordrpc::Operation;
use cordrpc::RefId;
use cordrpc::Request;
use cordrpc::RootId;
use cordrpc::Segment;
use cordrpc::Target;
use cordrpc::Value;

use crate::error::Error;
use crate::error::Result;
use crate::marshal::Arg;
use crate::peer::Peer;
use crate::peer::PendingReply;
use crate::resolve;

/// Which of the two proxy states a proxy is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    UnboundPath,
    BoundReference,
}

/// What a round trip produced: a copied primitive or a new bound proxy.
#[derive(Debug, Clone)]
pub enum Resolved {
    Value(Value),
    Object(Proxy),
}

impl Resolved {
    pub fn into_value(self) -> Result<Value> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Object(p) => Err(Error::UnexpectedReply(format!("expected a value, got {}", p))),
        }
    }

    pub fn into_proxy(self) -> Result<Proxy> {
        match self {
            Self::Object(p) => Ok(p),
            Self::Value(v) => Err(Error::UnexpectedReply(format!("expected an object, got {:?}", v))),
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Object(_) => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Self::Object(p) => Some(p),
            Self::Value(_) => None,
        }
    }
}

/// A round trip already submitted to the sandbox.
///
/// Awaiting it yields the outcome; dropping it only discards the outcome.
#[must_use = "the operation is already submitted; await this to observe its outcome"]
pub struct Pending<T> {
    inner: BoxFuture<'static, Result<T>>,
}

impl<T: Send + 'static> Pending<T> {
    pub(crate) fn new(fut: impl Future<Output = Result<T>> + Send + 'static) -> Self {
        Self { inner: fut.boxed() }
    }

    pub(crate) fn ready(result: Result<T>) -> Self {
        Self::new(futures::future::ready(result))
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

/// Client-side stand-in for a sandbox object.
#[derive(Clone)]
pub struct Proxy {
    peer: Arc<Peer>,
    target: Target,
    path: Vec<Segment>,
    class: Option<Arc<str>>,
}

impl Proxy {
    pub(crate) fn root(peer: Arc<Peer>, root: RootId) -> Self {
        Self {
            peer,
            target: Target::Root(root),
            path: Vec::new(),
            class: None,
        }
    }

    pub(crate) fn bound(peer: Arc<Peer>, root: RootId, id: RefId, class: &str) -> Self {
        Self {
            peer,
            target: Target::Reference { root, id },
            path: Vec::new(),
            class: Some(Arc::from(class)),
        }
    }

    pub fn state(&self) -> ProxyState {
        match self.target {
            Target::Reference { .. } if self.path.is_empty() => ProxyState::BoundReference,
            _ => ProxyState::UnboundPath,
        }
    }

    pub fn root_id(&self) -> RootId {
        self.target.root()
    }

    /// The id this proxy is bound to, if it is a bound reference.
    pub fn ref_id(&self) -> Option<&RefId> {
        match &self.target {
            Target::Reference { id, .. } if self.path.is_empty() => Some(id),
            _ => None,
        }
    }

    /// Class name reported by the sandbox when the reference was resolved.
    pub fn class(&self) -> Option<&str> {
        match self.state() {
            ProxyState::BoundReference => self.class.as_deref(),
            ProxyState::UnboundPath => None,
        }
    }

    pub fn path(&self) -> &[Segment] {
        &self.path
    }

    pub(crate) fn belongs_to(&self, peer: &Arc<Peer>) -> bool {
        Arc::ptr_eq(&self.peer, peer)
    }

    /// A new proxy one property further down. No round trip.
    pub fn get(&self, name: impl Into<Segment>) -> Proxy {
        let mut path = self.path.clone();
        path.push(name.into());
        Self {
            peer: self.peer.clone(),
            target: self.target.clone(),
            path,
            class: self.class.clone(),
        }
    }

    /// Assigns `name` below the current path.
    ///
    /// The assignment is submitted immediately; await the result to learn
    /// whether it succeeded.
    pub fn set(&self, name: impl Into<Segment>, value: impl Into<Arg>) -> Pending<()> {
        let mut path = self.path.clone();
        path.push(name.into());

        let submitted = Into::<Arg>::into(value)
            .marshal(&self.peer, self.root_id())
            .and_then(|value| self.submit(Operation::set(path, value)));

        match submitted {
            Ok(reply) => Pending::new(async move {
                reply.wait().await?;
                Ok(())
            }),
            Err(e) => Pending::ready(Err(e)),
        }
    }

    /// Calls the function at the current path with its owner as `this`.
    pub fn invoke(&self, args: Vec<Arg>) -> Pending<Resolved> {
        let root = self.root_id();
        let submitted = args
            .into_iter()
            .map(|arg| arg.marshal(&self.peer, root))
            .collect::<Result<Vec<_>>>()
            .and_then(|args| self.submit(Operation::apply(self.path.clone(), args)));
        self.resolve_later(submitted)
    }

    /// Shorthand for `self.get(name).invoke(args)`.
    pub fn call(&self, name: impl Into<Segment>, args: Vec<Arg>) -> Pending<Resolved> {
        self.get(name).invoke(args)
    }

    /// Reads the value at the current path.
    ///
    /// A proxy with an empty path resolves to itself without a round trip.
    pub fn fetch(&self) -> Pending<Resolved> {
        if self.path.is_empty() {
            return Pending::ready(Ok(Resolved::Object(self.clone())));
        }
        let submitted = self.submit(Operation::get(self.path.clone()));
        self.resolve_later(submitted)
    }

    /// `fetch` followed by `into_value`.
    pub async fn value(&self) -> Result<Value> {
        self.fetch().await?.into_value()
    }

    fn submit(&self, op: Operation) -> Result<PendingReply> {
        self.peer.submit(Request::Invoke { target: self.target.clone(), op })
    }

    fn resolve_later(&self, submitted: Result<PendingReply>) -> Pending<Resolved> {
        let reply = match submitted {
            Ok(reply) => reply,
            Err(e) => return Pending::ready(Err(e)),
        };
        let peer = self.peer.clone();
        let root = self.root_id();
        Pending::new(async move {
            let payload = reply.wait().await?;
            resolve::resolve(&peer, root, payload).await
        })
    }
}

impl std::fmt::Display for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Target::Root(root) => write!(f, "{}", root)?,
            Target::Reference { root, id } => write!(f, "{}/{}", root, id)?,
        }
        for segment in &self.path {
            match segment {
                Segment::Index(i) => write!(f, "[{}]", i)?,
                Segment::Name(name) => write!(f, ".{}", name)?,
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("target", &self.target)
            .field("path", &self.path)
            .field("class", &self.class)
            .finish()
    }
}
