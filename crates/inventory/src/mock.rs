//! Mock inventory for tests (no Portainer required)

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::client::InventoryClient;
use crate::error::InventoryError;
use crate::types::{DetailedState, EntityRecord, ScopeId, ScopeMetadata};

/// Scripted in-memory inventory
#[derive(Default)]
pub struct MockInventory {
    scopes: Mutex<BTreeMap<ScopeId, ScopeMetadata>>,
    entities: Mutex<HashMap<ScopeId, Vec<EntityRecord>>>,
    inspections: Mutex<HashMap<(ScopeId, String), DetailedState>>,
    failing_scopes: Mutex<HashSet<ScopeId>>,
    malformed_scopes: Mutex<HashSet<ScopeId>>,
    fail_scope_listing: AtomicBool,
    list_calls: AtomicUsize,
}

impl MockInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scope
    pub fn with_scope(self, id: ScopeId, name: &str) -> Self {
        if let Ok(mut scopes) = self.scopes.lock() {
            scopes.insert(id, ScopeMetadata::new(id, name));
        }
        self
    }

    /// Replace the entity listing of a scope
    pub fn set_entities(&self, scope: ScopeId, entities: Vec<EntityRecord>) {
        if let Ok(mut map) = self.entities.lock() {
            map.insert(scope, entities);
        }
    }

    /// Script an inspect answer
    pub fn set_inspect(&self, scope: ScopeId, entity_id: &str, state: DetailedState) {
        if let Ok(mut map) = self.inspections.lock() {
            map.insert((scope, entity_id.to_string()), state);
        }
    }

    /// Make every call touching `scope` fail
    pub fn fail_scope(&self, scope: ScopeId, fail: bool) {
        if let Ok(mut set) = self.failing_scopes.lock() {
            if fail {
                set.insert(scope);
            } else {
                set.remove(&scope);
            }
        }
    }

    /// Make every call touching `scope` return an undecodable body
    pub fn malform_scope(&self, scope: ScopeId, malformed: bool) {
        if let Ok(mut set) = self.malformed_scopes.lock() {
            if malformed {
                set.insert(scope);
            } else {
                set.remove(&scope);
            }
        }
    }

    /// Make `list_scopes` fail
    pub fn fail_scope_listing(&self, fail: bool) {
        self.fail_scope_listing.store(fail, Ordering::SeqCst);
    }

    /// Number of `list_entities` calls served
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn check_scope(&self, scope: ScopeId) -> Result<(), InventoryError> {
        let failing = self
            .failing_scopes
            .lock()
            .map(|s| s.contains(&scope))
            .unwrap_or(false);
        if failing {
            return Err(InventoryError::Http(format!("scope {} unreachable", scope)));
        }
        let malformed = self
            .malformed_scopes
            .lock()
            .map(|s| s.contains(&scope))
            .unwrap_or(false);
        if malformed {
            return Err(InventoryError::Decode("expected array".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryClient for MockInventory {
    async fn list_scopes(&self) -> Result<BTreeMap<ScopeId, ScopeMetadata>, InventoryError> {
        if self.fail_scope_listing.load(Ordering::SeqCst) {
            return Err(InventoryError::Http("inventory unreachable".to_string()));
        }
        Ok(self.scopes.lock().map(|s| s.clone()).unwrap_or_default())
    }

    async fn list_entities(
        &self,
        scope: ScopeId,
        include_stopped: bool,
    ) -> Result<Vec<EntityRecord>, InventoryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_scope(scope)?;
        let all = self
            .entities
            .lock()
            .map(|m| m.get(&scope).cloned().unwrap_or_default())
            .unwrap_or_default();
        debug!("Mock: listing {} entities in scope {}", all.len(), scope);
        if include_stopped {
            Ok(all)
        } else {
            Ok(all.into_iter().filter(EntityRecord::is_running).collect())
        }
    }

    async fn inspect(
        &self,
        scope: ScopeId,
        entity_id: &str,
    ) -> Result<DetailedState, InventoryError> {
        self.check_scope(scope)?;
        let scripted = self
            .inspections
            .lock()
            .ok()
            .and_then(|m| m.get(&(scope, entity_id.to_string())).cloned());
        if let Some(state) = scripted {
            return Ok(state);
        }

        let listed = self
            .entities
            .lock()
            .ok()
            .and_then(|m| m.get(&scope).and_then(|v| v.iter().find(|e| e.id == entity_id).cloned()));
        match listed {
            Some(entry) => Ok(DetailedState {
                running: entry.is_running(),
                status: Some(entry.state),
                health: None,
            }),
            None => Err(InventoryError::Status {
                status: 404,
                path: format!("/endpoints/{}/docker/containers/{}/json", scope, entity_id),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_running_filter() {
        let mock = MockInventory::new().with_scope(1, "local");
        mock.set_entities(
            1,
            vec![
                EntityRecord::new("a", "api", "running", "Up"),
                EntityRecord::new("b", "db", "exited", "Exited (0)"),
            ],
        );

        assert_eq!(mock.list_entities(1, false).await.unwrap().len(), 1);
        assert_eq!(mock.list_entities(1, true).await.unwrap().len(), 2);
        assert_eq!(mock.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let mock = MockInventory::new().with_scope(1, "local");
        mock.fail_scope(1, true);
        assert!(mock.list_entities(1, true).await.is_err());
        mock.fail_scope(1, false);
        assert!(mock.list_entities(1, true).await.is_ok());

        mock.fail_scope_listing(true);
        assert!(mock.list_scopes().await.is_err());
    }
}
