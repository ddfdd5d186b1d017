//! In-memory portal definition registry with query support.

use crate::{
    definition::PortalDefinition,
    error::{PortalError, Result},
    loader::PortalLoader,
};
use registra_core::{RecordCategory, TargetId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// In-memory cache of portal definitions.
///
/// Definitions are read-only once loaded; concurrent queries each clone the
/// definition they need, so nothing mutable is shared between requests.
#[derive(Clone)]
pub struct PortalRegistry {
    /// Cached portal definitions, indexed by target ID
    definitions: Arc<RwLock<HashMap<TargetId, PortalDefinition>>>,
}

impl PortalRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            definitions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a registry and load all definitions from the given loader.
    ///
    /// # Errors
    /// Returns error if loading fails.
    pub fn load_from(loader: &PortalLoader) -> Result<Self> {
        let registry = Self::new();
        registry.reload(loader)?;
        Ok(registry)
    }

    /// Replace the cache with freshly loaded definitions.
    ///
    /// # Errors
    /// Returns error if loading fails.
    pub fn reload(&self, loader: &PortalLoader) -> Result<()> {
        let definitions = loader.load_all()?;

        let mut cache = self
            .definitions
            .write()
            .expect("acquire write lock on definitions");

        cache.clear();
        for definition in definitions {
            cache.insert(definition.id().clone(), definition);
        }

        info!(count = cache.len(), "reloaded portal definitions");

        Ok(())
    }

    /// Get a portal definition by ID.
    ///
    /// # Errors
    /// Returns error if the portal is not found.
    pub fn get(&self, target_id: &TargetId) -> Result<PortalDefinition> {
        let cache = self
            .definitions
            .read()
            .expect("acquire read lock on definitions");

        cache
            .get(target_id)
            .cloned()
            .ok_or_else(|| PortalError::NotFound {
                target_id: target_id.to_string(),
            })
    }

    /// Get all portal definitions, ordered by target ID.
    #[must_use]
    pub fn get_all(&self) -> Vec<PortalDefinition> {
        let cache = self
            .definitions
            .read()
            .expect("acquire read lock on definitions");

        let mut all: Vec<_> = cache.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Query portals by record category, ordered by target ID.
    #[must_use]
    pub fn get_by_category(&self, category: RecordCategory) -> Vec<PortalDefinition> {
        self.get_all()
            .into_iter()
            .filter(|def| def.category() == category)
            .collect()
    }

    /// Get the total number of portals in the registry.
    #[must_use]
    pub fn count(&self) -> usize {
        self.definitions
            .read()
            .expect("acquire read lock on definitions")
            .len()
    }

    /// Check if a portal exists in the registry.
    #[must_use]
    pub fn contains(&self, target_id: &TargetId) -> bool {
        self.definitions
            .read()
            .expect("acquire read lock on definitions")
            .contains_key(target_id)
    }

    /// Get portal count by category.
    #[must_use]
    pub fn count_by_category(&self) -> HashMap<RecordCategory, usize> {
        let cache = self
            .definitions
            .read()
            .expect("acquire read lock on definitions");

        let mut counts: HashMap<RecordCategory, usize> = HashMap::new();
        for definition in cache.values() {
            *counts.entry(definition.category()).or_insert(0) += 1;
        }
        counts
    }

    /// Add or update a portal definition.
    ///
    /// # Errors
    /// Returns error if the definition fails validation.
    pub fn insert(&self, definition: PortalDefinition) -> Result<()> {
        definition.validate()?;

        let mut cache = self
            .definitions
            .write()
            .expect("acquire write lock on definitions");

        let target_id = definition.id().clone();
        cache.insert(target_id.clone(), definition);

        debug!(target_id = %target_id, "inserted portal definition");

        Ok(())
    }

    /// Remove a portal definition.
    ///
    /// Returns `true` if the portal was present, `false` otherwise.
    pub fn remove(&self, target_id: &TargetId) -> bool {
        let removed = self
            .definitions
            .write()
            .expect("acquire write lock on definitions")
            .remove(target_id)
            .is_some();

        if removed {
            debug!(target_id = %target_id, "removed portal definition");
        }

        removed
    }
}

impl Default for PortalRegistry {
    fn default() -> Self {
        Self::new()
    }
}
