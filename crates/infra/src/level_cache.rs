//! Read-mostly cache of company level tables.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use dunning_core::CompanyId;
use dunning_followup::{FollowupLevel, LevelStore, StoreError};

/// Caches `levels_for` per company; writes through and invalidates.
#[derive(Debug)]
pub struct CachedLevelStore<S> {
    inner: S,
    cache: RwLock<HashMap<CompanyId, Vec<FollowupLevel>>>,
}

impl<S: LevelStore> CachedLevelStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn invalidate(&self, company_id: CompanyId) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&company_id);
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: LevelStore> LevelStore for CachedLevelStore<S> {
    fn levels_for(&self, company_id: CompanyId) -> Result<Vec<FollowupLevel>, StoreError> {
        if let Some(levels) = self
            .cache
            .read()
            .ok()
            .and_then(|cache| cache.get(&company_id).cloned())
        {
            return Ok(levels);
        }

        let levels = self.inner.levels_for(company_id)?;
        debug!(company_id = %company_id, levels = levels.len(), "level table cached");
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(company_id, levels.clone());
        }
        Ok(levels)
    }

    fn save_levels(
        &self,
        company_id: CompanyId,
        levels: &[FollowupLevel],
    ) -> Result<(), StoreError> {
        let saved = self.inner.save_levels(company_id, levels);
        self.invalidate(company_id);
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLevelStore;

    #[test]
    fn reads_are_cached_until_written() {
        let company = CompanyId::new();
        let store = CachedLevelStore::new(InMemoryLevelStore::new());
        store
            .save_levels(company, &[FollowupLevel::new(company, 1, 10, "L1")])
            .unwrap();

        assert_eq!(store.levels_for(company).unwrap().len(), 1);
        assert_eq!(store.levels_for(company).unwrap().len(), 1);
        assert_eq!(store.inner().reads(), 1);

        store
            .save_levels(
                company,
                &[
                    FollowupLevel::new(company, 1, 10, "L1"),
                    FollowupLevel::new(company, 2, 20, "L2"),
                ],
            )
            .unwrap();

        assert_eq!(store.levels_for(company).unwrap().len(), 2);
        assert_eq!(store.inner().reads(), 2);
    }
}
