//! Per-connection object table.
//!
//! Maps object ids to live proxies. Client ids are handed out sequentially
//! from 1 and never reused, so an id that has been unregistered can never
//! resolve to a newer object.

use crate::connection::Inner;
use crate::error::{Error, Result};
use crate::proxy::Proxy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use waylink_protocol::ObjectId;

struct Slots {
    objects: HashMap<ObjectId, Arc<dyn Proxy>>,
    /// Next client id to hand out
    next_id: u32,
}

/// Registry of live proxies, shared by the dispatch thread and callers
/// issuing requests.
pub(crate) struct ObjectTable {
    slots: RwLock<Slots>,
}

impl ObjectTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: RwLock::new(Slots {
                objects: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Assign the next client id to `proxy` and store it.
    pub(crate) fn register(&self, proxy: Arc<dyn Proxy>, owner: Weak<Inner>) -> Result<ObjectId> {
        let mut slots = self.slots.write();

        let id = match ObjectId::new(slots.next_id) {
            Some(id) if slots.next_id <= ObjectId::CLIENT_MAX => id,
            _ => return Err(Error::IdsExhausted),
        };

        proxy
            .base()
            .attach(id, owner)
            .map_err(|existing| Error::AlreadyRegistered {
                interface: proxy.interface(),
                id: existing,
            })?;

        slots.next_id += 1;
        slots.objects.insert(id, proxy);
        Ok(id)
    }

    /// Store `proxy` under an id the server allocated.
    pub(crate) fn register_at(
        &self,
        id: ObjectId,
        proxy: Arc<dyn Proxy>,
        owner: Weak<Inner>,
    ) -> Result<()> {
        let mut slots = self.slots.write();

        if slots.objects.contains_key(&id) {
            return Err(Error::IdInUse { id });
        }

        proxy
            .base()
            .attach(id, owner)
            .map_err(|existing| Error::AlreadyRegistered {
                interface: proxy.interface(),
                id: existing,
            })?;

        slots.objects.insert(id, proxy);
        Ok(())
    }

    /// Resolve an id. A miss is an ordinary outcome, not an error.
    pub(crate) fn lookup(&self, id: ObjectId) -> Option<Arc<dyn Proxy>> {
        self.slots.read().objects.get(&id).cloned()
    }

    /// Remove the binding for `id`, returning the proxy it held.
    pub(crate) fn unregister(&self, id: ObjectId) -> Option<Arc<dyn Proxy>> {
        self.slots.write().objects.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.read().objects.len()
    }

    /// Drop every binding. The id counter is left untouched.
    pub(crate) fn clear(&self) -> Vec<Arc<dyn Proxy>> {
        self.slots.write().objects.drain().map(|(_, p)| p).collect()
    }

    #[cfg(test)]
    pub(crate) fn set_next_id(&self, next_id: u32) {
        self.slots.write().next_id = next_id;
    }
}
