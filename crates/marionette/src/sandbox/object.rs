//! The sandbox's object model.
//!
//! Everything an operation can reach is a `Slot`: a primitive, or a shared
//! host object. Host objects answer property reads and writes by key, and
//! methods are detached `Method` values that re-dispatch on whatever receiver
//! they are applied to.

use std::any::Any;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use dashmap::DashMap;

use cordrpc::Failure;

pub type ObjectRef = Arc<dyn HostObject>;

/// An exception raised inside the sandbox.
///
/// `name` is the error's identity as a script would see it (`TypeError`,
/// `IndexSizeError`, ...) and crosses the wire unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thrown {
    pub name: String,
    pub message: String,
}

impl Thrown {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into() }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new("RangeError", message)
    }
}

impl From<Thrown> for Failure {
    fn from(t: Thrown) -> Self {
        Failure::Thrown { name: t.name, message: t.message }
    }
}

pub type Completion<T> = std::result::Result<T, Thrown>;

/// A value as held inside the sandbox.
#[derive(Clone)]
pub enum Slot {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(ObjectRef),
}

impl Slot {
    pub fn object(obj: impl HostObject) -> Self {
        Self::Object(Arc::new(obj))
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Downcasts an object slot to a concrete host type.
    pub fn downcast<T: HostObject>(&self) -> Option<&T> {
        self.as_object()?.as_any().downcast_ref::<T>()
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Object(o) if o.is_callable() => "function",
            Self::Object(_) => "object",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Object(_) => true,
        }
    }

    /// Numeric conversion with script semantics.
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    0.0
                } else if s == "Infinity" || s == "+Infinity" {
                    f64::INFINITY
                } else if s == "-Infinity" {
                    f64::NEG_INFINITY
                } else if s.contains(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
                    f64::NAN
                } else {
                    s.parse().unwrap_or(f64::NAN)
                }
            }
            Self::Object(_) => f64::NAN,
        }
    }

    /// String conversion with script semantics.
    pub fn to_display(&self) -> String {
        match self {
            Self::Undefined => "undefined".into(),
            Self::Null => "null".into(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => number_to_string(*n),
            Self::String(s) => s.clone(),
            Self::Object(o) => format!("[object {}]", o.class()),
        }
    }

    /// SameValueZero: objects by identity, NaN equal to itself.
    pub fn same_value_zero(&self, other: &Slot) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Object(a), Self::Object(b)) => same_object(a, b),
            _ => self.strict_equals(other),
        }
    }

    /// `===`: objects by identity, NaN unequal to everything.
    pub fn strict_equals(&self, other: &Slot) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => same_object(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.same_value_zero(other)
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{:?}", s),
            Self::Object(o) => write!(f, "[object {}]", o.class()),
            other => write!(f, "{}", other.to_display()),
        }
    }
}

impl From<f64> for Slot {
    fn from(v: f64) -> Self { Self::Number(v) }
}

impl From<u32> for Slot {
    fn from(v: u32) -> Self { Self::Number(f64::from(v)) }
}

impl From<i32> for Slot {
    fn from(v: i32) -> Self { Self::Number(f64::from(v)) }
}

impl From<bool> for Slot {
    fn from(v: bool) -> Self { Self::Bool(v) }
}

impl From<&str> for Slot {
    fn from(v: &str) -> Self { Self::String(v.to_string()) }
}

impl From<String> for Slot {
    fn from(v: String) -> Self { Self::String(v) }
}

impl From<ObjectRef> for Slot {
    fn from(v: ObjectRef) -> Self { Self::Object(v) }
}

/// Identity of two host objects, ignoring vtables.
pub fn same_object(a: &ObjectRef, b: &ObjectRef) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if n == 0.0 {
        "0".into()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Locks a host object's state. A panic while holding the lock leaves the
/// state as it was, so poisoning is ignored.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Browser-style arity check.
pub(crate) fn require_args(class: &str, method: &str, args: &[Slot], required: usize) -> Completion<()> {
    if args.len() >= required {
        return Ok(());
    }
    let noun = if required == 1 { "argument" } else { "arguments" };
    Err(Thrown::type_error(format!(
        "Failed to execute '{}' on '{}': {} {} required, but only {} present.",
        method,
        class,
        required,
        noun,
        args.len()
    )))
}

pub(crate) fn arg(args: &[Slot], i: usize) -> Slot {
    args.get(i).cloned().unwrap_or(Slot::Undefined)
}

pub(crate) fn num(args: &[Slot], i: usize) -> f64 {
    args.get(i).map_or(f64::NAN, Slot::to_number)
}

/// Anything a path can walk through or an operation can call.
#[async_trait::async_trait]
pub trait HostObject: Send + Sync + 'static {
    /// The class name reported to the controller on resolve.
    fn class(&self) -> &'static str;

    /// Reads a property. Missing properties read as `Undefined`.
    fn get(&self, key: &str) -> Completion<Slot>;

    /// Writes a property. Invalid writes to typed properties are ignored.
    fn set(&self, key: &str, value: Slot) -> Completion<()>;

    fn is_callable(&self) -> bool {
        false
    }

    /// Invokes this object as a function with `this` as receiver.
    async fn call(&self, _this: Slot, _args: Vec<Slot>) -> Completion<Slot> {
        Err(Thrown::type_error(format!("{} is not a function", self.class())))
    }

    /// Runs one of this object's own methods. `this` is the `Arc` holding `self`.
    async fn call_method(&self, _this: &ObjectRef, name: &str, _args: Vec<Slot>) -> Completion<Slot> {
        Err(Thrown::type_error(format!("{}.{} is not a function", self.class(), name)))
    }

    fn as_any(&self) -> &dyn Any;
}

/// A method pulled off an object, not yet bound to a receiver.
///
/// Applying it to an object of a different class throws, as it would in a
/// browser.
pub struct Method {
    class: &'static str,
    name: String,
}

impl Method {
    pub fn slot(class: &'static str, name: &str) -> Slot {
        Slot::object(Self { class, name: name.to_string() })
    }
}

#[async_trait::async_trait]
impl HostObject for Method {
    fn class(&self) -> &'static str {
        "Function"
    }

    fn get(&self, key: &str) -> Completion<Slot> {
        Ok(match key {
            "name" => Slot::String(self.name.clone()),
            _ => Slot::Undefined,
        })
    }

    fn set(&self, _key: &str, _value: Slot) -> Completion<()> {
        Ok(())
    }

    fn is_callable(&self) -> bool {
        true
    }

    async fn call(&self, this: Slot, args: Vec<Slot>) -> Completion<Slot> {
        match this {
            Slot::Object(receiver) if receiver.class() == self.class => {
                receiver.call_method(&receiver, &self.name, args).await
            }
            _ => Err(Thrown::type_error("Illegal invocation")),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Ad-hoc properties assigned onto host objects.
#[derive(Default)]
pub struct Expandos(DashMap<String, Slot>);

impl Expandos {
    pub fn get(&self, key: &str) -> Slot {
        self.0.get(key).map_or(Slot::Undefined, |e| e.value().clone())
    }

    pub fn set(&self, key: &str, value: Slot) {
        self.0.insert(key.to_string(), value);
    }
}

/// A plain `{ ... }` object.
#[derive(Default)]
pub struct PlainObject {
    props: Expandos,
}

impl PlainObject {
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Slot)>) -> Self {
        let obj = Self::default();
        for (key, value) in entries {
            obj.props.set(&key, value);
        }
        obj
    }
}

impl HostObject for PlainObject {
    fn class(&self) -> &'static str {
        "Object"
    }

    fn get(&self, key: &str) -> Completion<Slot> {
        Ok(self.props.get(key))
    }

    fn set(&self, key: &str, value: Slot) -> Completion<()> {
        self.props.set(key, value);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

const ARRAY_METHODS: &[&str] = &["push", "pop", "indexOf", "includes"];

/// Arrays are stored densely, so growth past this many elements throws
/// `RangeError` instead of allocating.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

fn grow_to(items: &mut Vec<Slot>, len: usize) -> Completion<()> {
    if len > MAX_ARRAY_LEN {
        return Err(Thrown::range_error("Invalid array length"));
    }
    items.resize(len, Slot::Undefined);
    Ok(())
}

/// A plain `[ ... ]` array.
#[derive(Default)]
pub struct PlainArray {
    items: Mutex<Vec<Slot>>,
}

impl PlainArray {
    pub fn new(items: Vec<Slot>) -> Self {
        Self { items: Mutex::new(items) }
    }

    pub fn to_vec(&self) -> Vec<Slot> {
        lock(&self.items).clone()
    }
}

/// Parses a canonical array index (`"3"`, not `"03"`).
pub(crate) fn array_index(key: &str) -> Option<usize> {
    let i = key.parse::<u32>().ok()?;
    (i.to_string() == key).then_some(i as usize)
}

#[async_trait::async_trait]
impl HostObject for PlainArray {
    fn class(&self) -> &'static str {
        "Array"
    }

    fn get(&self, key: &str) -> Completion<Slot> {
        let items = lock(&self.items);
        if key == "length" {
            return Ok(Slot::Number(items.len() as f64));
        }
        if let Some(i) = array_index(key) {
            return Ok(items.get(i).cloned().unwrap_or(Slot::Undefined));
        }
        if ARRAY_METHODS.contains(&key) {
            return Ok(Method::slot("Array", key));
        }
        Ok(Slot::Undefined)
    }

    fn set(&self, key: &str, value: Slot) -> Completion<()> {
        let mut items = lock(&self.items);
        if key == "length" {
            let n = value.to_number();
            if !(n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX)) {
                return Err(Thrown::range_error("Invalid array length"));
            }
            grow_to(&mut items, n as usize)?;
        } else if let Some(i) = array_index(key) {
            if i >= items.len() {
                grow_to(&mut items, i + 1)?;
            }
            items[i] = value;
        }
        Ok(())
    }

    async fn call_method(&self, _this: &ObjectRef, name: &str, args: Vec<Slot>) -> Completion<Slot> {
        let mut items = lock(&self.items);
        match name {
            "push" => {
                if items.len() + args.len() > MAX_ARRAY_LEN {
                    return Err(Thrown::range_error("Invalid array length"));
                }
                items.extend(args);
                Ok(Slot::Number(items.len() as f64))
            }
            "pop" => Ok(items.pop().unwrap_or(Slot::Undefined)),
            "indexOf" => {
                let needle = arg(&args, 0);
                let pos = items.iter().position(|item| item.strict_equals(&needle));
                Ok(Slot::Number(pos.map_or(-1.0, |p| p as f64)))
            }
            "includes" => {
                let needle = arg(&args, 0);
                Ok(Slot::Bool(items.iter().any(|item| item.same_value_zero(&needle))))
            }
            other => Err(Thrown::type_error(format!("Array.{} is not a function", other))),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A `Uint8ClampedArray`: writes are rounded half-to-even and clamped to 0..=255.
pub struct ByteArray {
    bytes: Mutex<Vec<u8>>,
}

impl ByteArray {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes: Mutex::new(bytes) }
    }

    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    pub fn to_vec(&self) -> Vec<u8> {
        lock(&self.bytes).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.bytes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clamp(n: f64) -> u8 {
        if n.is_nan() || n <= 0.0 {
            return 0;
        }
        if n >= 255.0 {
            return 255;
        }
        let rounded = n.round();
        // Ties go to the even neighbour.
        let r = if (n - n.trunc()) == 0.5 && rounded % 2.0 != 0.0 { rounded - 1.0 } else { rounded };
        r as u8
    }
}

impl HostObject for ByteArray {
    fn class(&self) -> &'static str {
        "Uint8ClampedArray"
    }

    fn get(&self, key: &str) -> Completion<Slot> {
        let bytes = lock(&self.bytes);
        if key == "length" || key == "byteLength" {
            return Ok(Slot::Number(bytes.len() as f64));
        }
        Ok(match array_index(key).and_then(|i| bytes.get(i)) {
            Some(b) => Slot::Number(f64::from(*b)),
            None => Slot::Undefined,
        })
    }

    fn set(&self, key: &str, value: Slot) -> Completion<()> {
        let mut bytes = lock(&self.bytes);
        if let Some(b) = array_index(key).and_then(|i| bytes.get_mut(i)) {
            *b = Self::clamp(value.to_number());
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
