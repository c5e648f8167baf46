//! Applies one operation to a root's object tree.

use tracing::debug;

use cordrpc::Failure;
use cordrpc::OpKind;
use cordrpc::Operation;
use cordrpc::RefId;
use cordrpc::RootId;
use cordrpc::Segment;
use cordrpc::Value;

use crate::sandbox::object::ByteArray;
use crate::sandbox::object::Completion;
use crate::sandbox::object::ObjectRef;
use crate::sandbox::object::PlainArray;
use crate::sandbox::object::PlainObject;
use crate::sandbox::object::Slot;
use crate::sandbox::object::Thrown;
use crate::sandbox::registry::Registry;

/// Turns wire values back into sandbox values.
///
/// References are swapped for the live objects they name; lists, maps and
/// byte strings become fresh objects.
pub fn dereference(registry: &Registry, root: RootId, value: Value) -> Result<Slot, Failure> {
    Ok(match value {
        Value::Undefined => Slot::Undefined,
        Value::Null => Slot::Null,
        Value::Bool(b) => Slot::Bool(b),
        Value::Number(n) => Slot::Number(n),
        Value::String(s) => Slot::String(s),
        Value::Bytes(b) => Slot::object(ByteArray::new(b)),
        Value::List(items) => {
            let items = items
                .into_iter()
                .map(|item| dereference(registry, root, item))
                .collect::<Result<Vec<_>, _>>()?;
            Slot::object(PlainArray::new(items))
        }
        Value::Map(entries) => {
            let entries = entries
                .into_iter()
                .map(|(key, item)| Ok((key, dereference(registry, root, item)?)))
                .collect::<Result<Vec<_>, Failure>>()?;
            Slot::object(PlainObject::from_entries(entries))
        }
        Value::Ref(id) => Slot::Object(lookup(registry, root, &id)?),
    })
}

pub fn lookup(registry: &Registry, root: RootId, id: &RefId) -> Result<ObjectRef, Failure> {
    registry
        .get(id)
        .ok_or_else(|| Failure::RegistryMiss { root, id: Some(id.clone()) })
}

/// Primitives go back by value; objects are parked in the registry.
pub fn classify(registry: &mut Registry, slot: Slot) -> Value {
    match slot {
        Slot::Undefined => Value::Undefined,
        Slot::Null => Value::Null,
        Slot::Bool(b) => Value::Bool(b),
        Slot::Number(n) => Value::Number(n),
        Slot::String(s) => Value::String(s),
        Slot::Object(obj) => Value::Ref(registry.insert(obj)),
    }
}

/// Reads one property of any value.
pub fn get_property(base: &Slot, segment: &Segment) -> Completion<Slot> {
    let key = segment.name();
    match base {
        Slot::Object(obj) => obj.get(&key),
        Slot::String(s) => Ok(match (&*key, segment.index()) {
            ("length", _) => Slot::Number(s.encode_utf16().count() as f64),
            (_, Some(i)) => s
                .chars()
                .nth(i as usize)
                .map_or(Slot::Undefined, |c| Slot::String(c.to_string())),
            _ => Slot::Undefined,
        }),
        Slot::Undefined | Slot::Null => Err(Thrown::type_error(format!(
            "Cannot read properties of {} (reading '{}')",
            base.type_name(),
            key
        ))),
        Slot::Bool(_) | Slot::Number(_) => Ok(Slot::Undefined),
    }
}

pub fn walk(base: &Slot, path: &[Segment]) -> Completion<Slot> {
    let mut current = base.clone();
    for segment in path {
        current = get_property(&current, segment)?;
    }
    Ok(current)
}

fn render_path(path: &[Segment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            Segment::Index(i) => out.push_str(&format!("[{}]", i)),
            Segment::Name(name) if out.is_empty() => out.push_str(name),
            Segment::Name(name) => {
                out.push('.');
                out.push_str(name);
            }
        }
    }
    out
}

/// Executes `op` relative to `base`, returning its wire-ready result.
pub async fn execute(
    registry: &mut Registry,
    root: RootId,
    base: Slot,
    op: Operation,
) -> Result<Value, Failure> {
    debug!(%root, op = %op, "execute");
    let Operation { kind, path, value, args } = op;

    let value = value.map(|v| dereference(registry, root, v)).transpose()?;
    let args = args
        .into_iter()
        .map(|a| dereference(registry, root, a))
        .collect::<Result<Vec<_>, _>>()?;

    let result = match kind {
        OpKind::Get => walk(&base, &path)?,
        OpKind::Set => {
            let Some((last, owner_path)) = path.split_last() else {
                return Err(Failure::Protocol("SET needs a property to assign".into()));
            };
            let owner = walk(&base, owner_path)?;
            match &owner {
                Slot::Object(obj) => obj.set(&last.name(), value.unwrap_or(Slot::Undefined))?,
                Slot::Undefined | Slot::Null => {
                    return Err(Thrown::type_error(format!(
                        "Cannot set properties of {} (setting '{}')",
                        owner.type_name(),
                        last.name()
                    ))
                    .into());
                }
                _ => {}
            }
            return Ok(Value::Undefined);
        }
        OpKind::Apply => {
            let (receiver, callable) = match path.split_last() {
                None => (base.clone(), base),
                Some((last, owner_path)) => {
                    let receiver = walk(&base, owner_path)?;
                    let callable = get_property(&receiver, last)?;
                    (receiver, callable)
                }
            };
            match callable {
                Slot::Object(f) if f.is_callable() => f.call(receiver, args).await?,
                _ => {
                    let name = if path.is_empty() { "object".to_string() } else { render_path(&path) };
                    return Err(Thrown::type_error(format!("{} is not a function", name)).into());
                }
            }
        }
    };

    Ok(classify(registry, result))
}

/// The class name of a registered object.
pub fn describe(registry: &Registry, root: RootId, id: &RefId) -> Result<Value, Failure> {
    let obj = lookup(registry, root, id)?;
    Ok(Value::String(obj.class().to_string()))
}
