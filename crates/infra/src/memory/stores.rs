use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dunning_core::{CompanyId, LevelId, PartnerId};
use dunning_followup::{
    FollowupError, FollowupLevel, FollowupResult, FollowupStateStore, LevelStore,
    PartnerFollowupState, StoreError,
};

#[derive(Debug, Default)]
pub struct InMemoryLevelStore {
    levels: RwLock<HashMap<CompanyId, Vec<FollowupLevel>>>,
    reads: AtomicUsize,
}

impl InMemoryLevelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `levels_for` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl LevelStore for InMemoryLevelStore {
    fn levels_for(&self, company_id: CompanyId) -> Result<Vec<FollowupLevel>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .levels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&company_id)
            .cloned()
            .unwrap_or_default())
    }

    fn save_levels(
        &self,
        company_id: CompanyId,
        levels: &[FollowupLevel],
    ) -> Result<(), StoreError> {
        self.levels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(company_id, levels.to_vec());
        Ok(())
    }
}

/// Partner states with one mutex per partner.
///
/// `with_lock` holds the partner mutex for the whole closure, so two workers
/// can never interleave on the same partner.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<PartnerId, PartnerFollowupState>>,
    locks: Mutex<HashMap<PartnerId, Arc<Mutex<()>>>>,
    unavailable: AtomicBool,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, state: PartnerFollowupState) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state.partner_id, state);
    }

    pub fn get(&self, partner_id: PartnerId) -> Option<PartnerFollowupState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&partner_id)
            .cloned()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn partner_lock(&self, partner_id: PartnerId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(partner_id)
            .or_default()
            .clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("state store offline".into()));
        }
        Ok(())
    }
}

impl FollowupStateStore for InMemoryStateStore {
    fn load(&self, partner_id: PartnerId) -> Result<Option<PartnerFollowupState>, StoreError> {
        self.check_available()?;
        Ok(self.get(partner_id))
    }

    fn partners_in_cycle(&self, levels: &[LevelId]) -> Result<Vec<PartnerId>, StoreError> {
        self.check_available()?;
        let mut partners: Vec<PartnerId> = self
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.current_level.is_some_and(|id| levels.contains(&id)))
            .map(|s| s.partner_id)
            .collect();
        partners.sort();
        Ok(partners)
    }

    fn with_lock(
        &self,
        partner_id: PartnerId,
        f: &mut dyn FnMut(&mut Option<PartnerFollowupState>) -> FollowupResult<()>,
    ) -> FollowupResult<()> {
        self.check_available()?;
        let lock = self.partner_lock(partner_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let before = self.get(partner_id);
        let mut slot = before.clone();
        f(&mut slot)?;

        if slot == before {
            return Ok(());
        }
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        match slot {
            Some(state) if state.partner_id == partner_id => {
                states.insert(partner_id, state);
            }
            Some(state) => {
                return Err(FollowupError::StorageUnavailable(format!(
                    "state of partner {} written under lock of {partner_id}",
                    state.partner_id
                )));
            }
            None => {
                states.remove(&partner_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn failed_closure_discards_changes() {
        let store = InMemoryStateStore::new();
        let partner = PartnerId::new();

        let result = store.with_lock(partner, &mut |slot: &mut Option<PartnerFollowupState>| {
            *slot = Some(PartnerFollowupState::new(partner));
            Err(FollowupError::render("boom"))
        });

        assert!(result.is_err());
        assert_eq!(store.get(partner), None);
    }

    #[test]
    fn lock_serializes_writers_per_partner() {
        let store = Arc::new(InMemoryStateStore::new());
        let partner = PartnerId::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        store
                            .with_lock(partner, &mut |slot: &mut Option<PartnerFollowupState>| {
                                let state =
                                    slot.get_or_insert_with(|| PartnerFollowupState::new(partner));
                                state.version += 1;
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get(partner).unwrap().version, 200);
    }

    #[test]
    fn partners_in_cycle_filters_by_level() {
        let store = InMemoryStateStore::new();
        let (l1, other) = (LevelId::new(), LevelId::new());

        let mut reminded = PartnerFollowupState::new(PartnerId::new());
        reminded.current_level = Some(l1);
        let mut elsewhere = PartnerFollowupState::new(PartnerId::new());
        elsewhere.current_level = Some(other);
        let cleared = PartnerFollowupState::new(PartnerId::new());

        store.insert(reminded.clone());
        store.insert(elsewhere);
        store.insert(cleared);

        assert_eq!(
            store.partners_in_cycle(&[l1]).unwrap(),
            vec![reminded.partner_id]
        );
        store.set_unavailable(true);
        assert!(store.partners_in_cycle(&[l1]).is_err());
    }
}
