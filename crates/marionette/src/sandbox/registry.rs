//! Per-root reference registry.
//!
//! Objects that cannot be copied across the wire are parked here and handed
//! to the controller as ids. Entries are never evicted one by one; the whole
//! registry goes away when its root is released.

use std::collections::HashMap;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rand::Rng;

use cordrpc::RefId;

use crate::sandbox::object::ObjectRef;

#[derive(Default)]
pub struct Registry {
    entries: HashMap<RefId, ObjectRef>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks an object and returns a fresh id for it.
    ///
    /// The same object registered twice gets two ids.
    pub fn insert(&mut self, obj: ObjectRef) -> RefId {
        let mut id = mint_id();
        while self.entries.contains_key(&id) {
            id = mint_id();
        }
        self.entries.insert(id.clone(), obj);
        id
    }

    pub fn get(&self, id: &RefId) -> Option<ObjectRef> {
        self.entries.get(id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// `<microseconds since epoch, hex>-<64 random bits, hex>`
fn mint_id() -> RefId {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_micros());
    let noise: u64 = rand::thread_rng().r#gen();
    RefId::new(format!("{:x}-{:016x}", micros, noise))
}
