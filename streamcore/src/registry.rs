//! Core Registry: the authoritative list of Globals.
//!
//! Every node, port, link, module, and client the daemon knows about is
//! registered here under a monotonically increasing id. The auto-link
//! policy and any other interested subsystem subscribes to add/remove
//! events rather than polling, mirroring `pw_core`'s global registry and
//! its `global_added`/`global_removed` signals consumed by
//! `module-autolink.c`.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::properties::Properties;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    Node,
    Port,
    Link,
    Module,
    Client,
}

#[derive(Debug, Clone)]
pub struct Global {
    pub id: GlobalId,
    pub kind: GlobalKind,
    pub properties: Properties,
}

#[derive(Debug, Clone, Copy)]
pub enum RegistryEvent {
    Added(GlobalId),
    Removed(GlobalId),
}

pub type RegistryListener = Box<dyn Fn(RegistryEvent) + Send + Sync>;

struct Inner {
    next_id: u64,
    globals: HashMap<GlobalId, Global>,
    listeners: Vec<RegistryListener>,
}

pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_id: 0,
                globals: HashMap::new(),
                listeners: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self, listener: RegistryListener) {
        self.inner.write().listeners.push(listener);
    }

    /// Register a new Global, returning its freshly allocated id. Ids
    /// are never reused for the lifetime of the registry.
    pub fn add_global(&self, kind: GlobalKind, properties: Properties) -> GlobalId {
        let mut inner = self.inner.write();
        let id = GlobalId(inner.next_id);
        inner.next_id += 1;
        inner.globals.insert(
            id,
            Global {
                id,
                kind,
                properties,
            },
        );
        debug!(?id, ?kind, "global added");
        for listener in &inner.listeners {
            listener(RegistryEvent::Added(id));
        }
        id
    }

    pub fn remove_global(&self, id: GlobalId) {
        let mut inner = self.inner.write();
        if inner.globals.remove(&id).is_none() {
            return;
        }
        debug!(?id, "global removed");
        for listener in &inner.listeners {
            listener(RegistryEvent::Removed(id));
        }
    }

    pub fn get(&self, id: GlobalId) -> Option<Global> {
        self.inner.read().globals.get(&id).cloned()
    }

    pub fn globals_of_kind(&self, kind: GlobalKind) -> Vec<Global> {
        self.inner
            .read()
            .globals
            .values()
            .filter(|g| g.kind == kind)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn ids_are_monotonic_and_not_reused() {
        let registry = Registry::new();
        let a = registry.add_global(GlobalKind::Node, Properties::new());
        let b = registry.add_global(GlobalKind::Node, Properties::new());
        assert!(b.0 > a.0);
        registry.remove_global(a);
        let c = registry.add_global(GlobalKind::Node, Properties::new());
        assert!(c.0 > b.0);
    }

    #[test]
    fn listeners_see_add_and_remove_events() {
        let registry = Registry::new();
        let added = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));
        let added_cb = Arc::clone(&added);
        let removed_cb = Arc::clone(&removed);
        registry.subscribe(Box::new(move |event| match event {
            RegistryEvent::Added(_) => {
                added_cb.fetch_add(1, Ordering::SeqCst);
            }
            RegistryEvent::Removed(_) => {
                removed_cb.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let id = registry.add_global(GlobalKind::Port, Properties::new());
        registry.remove_global(id);

        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn globals_of_kind_filters() {
        let registry = Registry::new();
        registry.add_global(GlobalKind::Node, Properties::new());
        registry.add_global(GlobalKind::Port, Properties::new());
        registry.add_global(GlobalKind::Port, Properties::new());
        assert_eq!(registry.globals_of_kind(GlobalKind::Port).len(), 2);
        assert_eq!(registry.globals_of_kind(GlobalKind::Node).len(), 1);
    }
}
