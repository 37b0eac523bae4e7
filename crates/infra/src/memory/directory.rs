use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use dunning_core::PartnerId;
use dunning_followup::{PartnerContacts, PartnerDirectory, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    partners: RwLock<HashMap<PartnerId, PartnerContacts>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, partner_id: PartnerId, contacts: PartnerContacts) {
        self.partners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(partner_id, contacts);
    }
}

impl PartnerDirectory for InMemoryDirectory {
    fn get_followup_contacts(&self, partner_id: PartnerId) -> Result<PartnerContacts, StoreError> {
        self.partners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&partner_id)
            .cloned()
            .ok_or_else(|| StoreError::Unavailable(format!("partner {partner_id} not found")))
    }
}
