//! Keyed map of shared status managers with lazy creation and
//! self-removing entries.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::types::StatusKey;

struct Entry<M> {
    id: u64,
    manager: Arc<M>,
}

struct RegistryMap<M> {
    next_id: u64,
    entries: HashMap<StatusKey, Entry<M>>,
}

/// Back-reference a manager uses to remove itself on destroy. Removal only
/// succeeds while the map still holds this exact manager, so a stale manager
/// can never evict its replacement.
pub(crate) struct RegistrySlot<M> {
    key: StatusKey,
    id: u64,
    map: Weak<Mutex<RegistryMap<M>>>,
}

impl<M> RegistrySlot<M> {
    pub(crate) fn key(&self) -> &StatusKey {
        &self.key
    }

    pub(crate) fn detach(&self) -> bool {
        let Some(map) = self.map.upgrade() else {
            return false;
        };
        let mut map = map.lock();
        match map.entries.get(&self.key) {
            Some(entry) if entry.id == self.id => {
                map.entries.remove(&self.key);
                true
            }
            _ => false,
        }
    }
}

/// Lock order: the registry map is always taken before a manager's own
/// state, never the other way around.
pub(crate) struct ManagerRegistry<M> {
    map: Arc<Mutex<RegistryMap<M>>>,
}

impl<M> Default for ManagerRegistry<M> {
    fn default() -> Self {
        Self {
            map: Arc::new(Mutex::new(RegistryMap {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }
}

impl<M> ManagerRegistry<M> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attach to the live manager for `key`, or build a fresh one.
    ///
    /// `attach` returns `None` when the existing manager is already
    /// destroyed but not yet detached; it is then replaced. `create` builds
    /// a manager that already counts the caller as attached.
    pub(crate) fn acquire_with<R>(
        &self,
        key: &StatusKey,
        attach: impl FnOnce(&Arc<M>) -> Option<R>,
        create: impl FnOnce(RegistrySlot<M>) -> (Arc<M>, R),
    ) -> R {
        let mut map = self.map.lock();
        if let Some(entry) = map.entries.get(key) {
            if let Some(attached) = attach(&entry.manager) {
                return attached;
            }
            tracing::debug!(target = "live_status::registry", key = %key, "replacing destroyed manager");
        }

        map.next_id += 1;
        let id = map.next_id;
        let slot = RegistrySlot {
            key: key.clone(),
            id,
            map: Arc::downgrade(&self.map),
        };
        let (manager, attached) = create(slot);
        map.entries.insert(key.clone(), Entry { id, manager });
        attached
    }

    pub(crate) fn get(&self, key: &StatusKey) -> Option<Arc<M>> {
        self.map
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.manager.clone())
    }

    pub(crate) fn contains(&self, key: &StatusKey) -> bool {
        self.map.lock().entries.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.lock().entries.len()
    }

    pub(crate) fn keys(&self) -> Vec<StatusKey> {
        let mut keys: Vec<StatusKey> = self.map.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ManagerRegistry, RegistrySlot};
    use crate::types::StatusKey;

    struct Fake {
        slot: RegistrySlot<Fake>,
        live: bool,
    }

    fn acquire(reg: &ManagerRegistry<Fake>, key: &StatusKey, live: bool) -> Arc<Fake> {
        reg.acquire_with(
            key,
            |m| m.live.then(|| m.clone()),
            |slot| {
                let m = Arc::new(Fake { slot, live });
                (m.clone(), m)
            },
        )
    }

    #[test]
    fn lazily_creates_and_reuses() {
        let reg = ManagerRegistry::new();
        let key = StatusKey::new("c:t");
        let a = acquire(&reg, &key, true);
        let b = acquire(&reg, &key, true);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
        assert_eq!(a.slot.key(), &key);
    }

    #[test]
    fn detach_removes_only_own_entry() {
        let reg = ManagerRegistry::new();
        let key = StatusKey::new("c:t");
        let dead = acquire(&reg, &key, false);
        let fresh = acquire(&reg, &key, true);
        assert!(!Arc::ptr_eq(&dead, &fresh));

        assert!(!dead.slot.detach());
        assert!(reg.contains(&key));
        assert!(fresh.slot.detach());
        assert!(!reg.contains(&key));
        assert!(reg.get(&key).is_none());
    }

    #[test]
    fn keys_are_sorted() {
        let reg = ManagerRegistry::new();
        acquire(&reg, &StatusKey::new("b"), true);
        acquire(&reg, &StatusKey::new("a"), true);
        assert_eq!(reg.keys(), vec![StatusKey::new("a"), StatusKey::new("b")]);
    }
}
