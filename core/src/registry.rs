//! Live tunnel registry.
//!
//! The registry is the only shared mutable structure in the core. All
//! mutations go through this single lock-guarded owner; readers receive
//! ordered snapshots of `Arc`'d entities and never a mutable reference.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tunnel::Tunnel;

/// The set of live tunnel entities, keyed and ordered by identity.
#[derive(Default)]
pub struct TunnelRegistry {
    inner: RwLock<BTreeMap<Uuid, Arc<Tunnel>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tunnel. Rejects an identity that is already present.
    pub fn insert(&self, tunnel: Arc<Tunnel>) -> Result<()> {
        let mut inner = self.inner.write();
        let id = tunnel.id();
        if inner.contains_key(&id) {
            return Err(Error::DuplicateTunnel { id });
        }
        inner.insert(id, tunnel);
        Ok(())
    }

    /// Removes and returns the tunnel with the given identity.
    pub fn remove(&self, id: &Uuid) -> Option<Arc<Tunnel>> {
        self.inner.write().remove(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Tunnel>> {
        self.inner.read().get(id).cloned()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Ordered read snapshot of the current membership.
    pub fn snapshot(&self) -> Vec<Arc<Tunnel>> {
        self.inner.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.inner.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::TunnelSpec;

    fn tunnel(context: &str, local_port: u16) -> Arc<Tunnel> {
        Arc::new(Tunnel::new(TunnelSpec {
            group: "default".to_string(),
            context: context.to_string(),
            target: "svc/gateway".to_string(),
            namespace: "default".to_string(),
            local_port,
            destination_port: "80".to_string(),
            start_on_startup: false,
            kind: None,
            database: None,
        }))
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = TunnelRegistry::new();
        let t = tunnel("staging", 8080);
        let id = t.id();

        registry.insert(t).unwrap();
        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id).unwrap().id(), id);
    }

    #[test]
    fn test_insert_rejects_duplicate_identity() {
        let registry = TunnelRegistry::new();
        registry.insert(tunnel("staging", 8080)).unwrap();

        let err = registry.insert(tunnel("staging", 8080)).unwrap_err();
        assert!(matches!(err, Error::DuplicateTunnel { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_returns_entity() {
        let registry = TunnelRegistry::new();
        let t = tunnel("staging", 8080);
        let id = t.id();
        registry.insert(t).unwrap();

        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.id(), id);
        assert!(registry.is_empty());
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn test_snapshot_ordered_by_identity() {
        let registry = TunnelRegistry::new();
        let a = tunnel("a", 8080);
        let b = tunnel("b", 8081);
        let c = tunnel("c", 8082);
        for t in [c.clone(), a.clone(), b.clone()] {
            registry.insert(t).unwrap();
        }

        let ids: Vec<_> = registry.snapshot().iter().map(|t| t.id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 3);
    }
}
