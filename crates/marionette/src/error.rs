//! Errors seen by the controller.

use cordrpc::Failure;

use crate::transport;

#[derive(Debug, Clone)]
pub enum Error {
    /// The byte pipe to the sandbox failed.
    Transport(transport::Error),
    /// A frame could not be encoded or decoded.
    Codec(cordrpc::Error),
    /// The sandbox executed the request and it failed there.
    Remote(Failure),
    /// The context was closed before the reply arrived.
    Closed,
    /// An argument cannot be sent: an unbound proxy, or one from another context.
    Unmarshalable(String),
    /// The sandbox answered with a payload of the wrong kind.
    UnexpectedReply(String),
}

impl Error {
    /// The remote failure, if this error carries one.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Remote(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_registry_miss(&self) -> bool {
        self.failure().is_some_and(Failure::is_registry_miss)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::Remote(failure) => write!(f, "Remote failure: {}", failure),
            Self::Closed => write!(f, "Context closed"),
            Self::Unmarshalable(why) => write!(f, "Cannot marshal argument: {}", why),
            Self::UnexpectedReply(what) => write!(f, "Unexpected reply: {}", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<cordrpc::Error> for Error {
    fn from(e: cordrpc::Error) -> Self {
        Self::Codec(e)
    }
}

impl From<cordpack::Error> for Error {
    fn from(e: cordpack::Error) -> Self {
        Self::Codec(cordrpc::Error::Pack(e))
    }
}

impl From<Failure> for Error {
    fn from(f: Failure) -> Self {
        Self::Remote(f)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
