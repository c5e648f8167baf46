//! # Argument Marshalling
//!
//! Everything a caller hands to `set` or `invoke` is an `Arg`: a plain value,
//! a proxy, or a list mixing both. Bound proxies travel as reference ids and
//! are swapped back for the live objects on the sandbox side, so they keep
//! their identity. Anything else that names a remote object cannot be sent.

use std::sync::Arc;

use cordrpc::RootId;
use cordrpc::Value;

use crate::error::Error;
use crate::error::Result;
use crate::peer::Peer;
use crate::proxy::Proxy;

/// An outgoing argument or assigned value.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Proxy(Proxy),
    List(Vec<Arg>),
}

impl Arg {
    /// Lowers this argument to a wire value for an operation on `root`.
    pub fn marshal(self, peer: &Arc<Peer>, root: RootId) -> Result<Value> {
        match self {
            Self::Value(value) => Ok(value),
            Self::List(items) => items
                .into_iter()
                .map(|item| item.marshal(peer, root))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Self::Proxy(proxy) => {
                if !proxy.belongs_to(peer) {
                    return Err(Error::Unmarshalable(format!("{} belongs to another context", proxy)));
                }
                let Some(id) = proxy.ref_id() else {
                    return Err(Error::Unmarshalable(format!(
                        "{} is an unbound path; fetch() it first",
                        proxy
                    )));
                };
                if proxy.root_id() != root {
                    return Err(Error::Unmarshalable(format!(
                        "{} belongs to {}, not {}",
                        proxy,
                        proxy.root_id(),
                        root
                    )));
                }
                Ok(Value::Ref(id.clone()))
            }
        }
    }
}

impl std::fmt::Debug for Arg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{:?}", v),
            Self::Proxy(p) => write!(f, "{}", p),
            Self::List(items) => f.debug_list().entries(items).finish(),
        }
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<Proxy> for Arg {
    fn from(p: Proxy) -> Self {
        Self::Proxy(p)
    }
}

impl From<&Proxy> for Arg {
    fn from(p: &Proxy) -> Self {
        Self::Proxy(p.clone())
    }
}

impl From<Vec<Arg>> for Arg {
    fn from(items: Vec<Arg>) -> Self {
        Self::List(items)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Self::Value(v.into())
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Self::Value(v.into())
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Self::Value(v.into())
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Self::Value(v.into())
    }
}

impl From<u32> for Arg {
    fn from(v: u32) -> Self {
        Self::Value(v.into())
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Self::Value(v.into())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Self::Value(v.into())
    }
}

/// Builds a `Vec<Arg>` from mixed values and proxies.
///
/// ```ignore
/// ctx.call("drawImage", args![&image, 100, 100]).await?;
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Arg::from($arg)),+]
    };
}
