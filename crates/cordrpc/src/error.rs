//! # Error Definitions
//!
//! `Error` is the codec failing. `Failure` is the remote side failing; it is
//! carried inside a Reply frame and surfaces at the awaiting call site.

use crate::frame::RootId;
use crate::value::RefId;

/// Operational failures within the codec itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The underlying cordpack layer failed.
    Pack(cordpack::Error),
    /// A frame was structurally valid but semantically malformed (missing field, bad number).
    ProtocolViolation(String),
    /// An unknown frame, request, value or failure variant was encountered.
    UnknownVariant(String),
    /// Values nested deeper than the codec allows.
    RecursionLimitExceeded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pack(e) => write!(f, "cordpack: {}", e),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::UnknownVariant(name) => write!(f, "unknown variant: {}", name),
            Self::RecursionLimitExceeded => write!(f, "value nesting exceeds the recursion limit"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pack(e) => Some(e),
            _ => None,
        }
    }
}

impl From<cordpack::Error> for Error {
    fn from(e: cordpack::Error) -> Self {
        Self::Pack(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a resource load did not produce a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailureKind {
    /// The resource could not be fetched or decoded.
    Error,
    /// The load was cancelled before it finished.
    Aborted,
}

impl LoadFailureKind {
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Aborted => "abort",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "error" => Ok(Self::Error),
            "abort" => Ok(Self::Aborted),
            other => Err(Error::UnknownVariant(format!("load failure kind: {}", other))),
        }
    }
}

/// Reasons a request failed on the remote side (the "Err" side of a Reply).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The requested root object could not be found or created.
    Init(String),
    /// The remote engine threw while walking a path or invoking a callable.
    ///
    /// `name` is the engine's own error identity (`TypeError`, `IndexSizeError`, ...),
    /// passed through untouched.
    Thrown { name: String, message: String },
    /// A dedicated resource load reported an error or was aborted.
    Load { kind: LoadFailureKind, message: String },
    /// The root has no registry (never created, or released), or the id is not in it.
    RegistryMiss { root: RootId, id: Option<RefId> },
    /// The request frame could not be understood.
    Protocol(String),
}

impl Failure {
    pub fn thrown(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Thrown { name: name.into(), message: message.into() }
    }

    pub fn is_registry_miss(&self) -> bool {
        matches!(self, Self::RegistryMiss { .. })
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init(msg) => write!(f, "initialization failed: {}", msg),
            Self::Thrown { name, message } => write!(f, "{}: {}", name, message),
            Self::Load { kind: LoadFailureKind::Error, message } => write!(f, "load error: {}", message),
            Self::Load { kind: LoadFailureKind::Aborted, message } => write!(f, "load aborted: {}", message),
            Self::RegistryMiss { root, id: None } => write!(f, "{} has no reference registry", root),
            Self::RegistryMiss { root, id: Some(id) } => {
                write!(f, "reference {} is not registered on {}", id, root)
            }
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for Failure {}
