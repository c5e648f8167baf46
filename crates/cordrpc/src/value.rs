//! Values that cross the boundary by copy, and the tokens that stand in for
//! the ones that cannot.

use std::borrow::Cow;

/// Id of an entry in a root's reference registry.
///
/// This is the whole of a reference descriptor: it tells the remote side
/// "look this up, it was never serialized".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(String);

impl RefId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RefId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ref:{}", self.0)
    }
}

/// A serializable value.
///
/// Results are only ever primitives or `Ref`. Arguments may additionally carry
/// lists, maps and byte strings, which the remote side turns into fresh objects.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Ordered string-keyed record.
    Map(Vec<(String, Value)>),
    Ref(RefId),
}

impl Value {
    /// True for values that are returned by copy rather than by reference.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Undefined | Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_)
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<&RefId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Ref(_) => "reference",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Self::Bool(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Self::Number(v) }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self { Self::Number(f64::from(v)) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Self::Number(f64::from(v)) }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self { Self::Number(f64::from(v)) }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self { Self::Number(f64::from(v)) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Self::String(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Self::String(v) }
}

impl From<RefId> for Value {
    fn from(v: RefId) -> Self { Self::Ref(v) }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One step of a property path: a name or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Name(String),
    Index(u32),
}

impl Segment {
    /// The segment as an array index, if it is one.
    ///
    /// Names that spell a canonical index (`"0"`, `"17"`, not `"017"`) count too,
    /// since property keys are strings on the remote side.
    pub fn index(&self) -> Option<u32> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Name(s) => {
                let i = s.parse::<u32>().ok()?;
                (i.to_string() == *s).then_some(i)
            }
        }
    }

    pub fn name(&self) -> Cow<'_, str> {
        match self {
            Self::Name(s) => Cow::Borrowed(s),
            Self::Index(i) => Cow::Owned(i.to_string()),
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(s) => write!(f, "{}", s),
            Self::Index(i) => write!(f, "[{}]", i),
        }
    }
}

impl From<&str> for Segment {
    fn from(v: &str) -> Self { Self::Name(v.to_string()) }
}

impl From<String> for Segment {
    fn from(v: String) -> Self { Self::Name(v) }
}

impl From<u32> for Segment {
    fn from(v: u32) -> Self { Self::Index(v) }
}

impl From<usize> for Segment {
    fn from(v: usize) -> Self {
        match u32::try_from(v) {
            Ok(i) => Self::Index(i),
            Err(_) => Self::Name(v.to_string()),
        }
    }
}

impl From<i32> for Segment {
    fn from(v: i32) -> Self {
        match u32::try_from(v) {
            Ok(i) => Self::Index(i),
            Err(_) => Self::Name(v.to_string()),
        }
    }
}
