use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use dunning_core::{CompanyId, PartnerId};
use dunning_receivables::{
    Currency, InvoiceItem, ItemId, Ledger, LedgerError, RateError, RateService,
};

/// Receivable items per company.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    items: RwLock<HashMap<CompanyId, Vec<InvoiceItem>>>,
    unavailable: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace (by id) an item.
    pub fn post(&self, company_id: CompanyId, item: InvoiceItem) {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let company = items.entry(company_id).or_default();
        match company.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item,
            None => company.push(item),
        }
    }

    /// Apply `f` to an existing item. Returns whether the item exists.
    pub fn update(
        &self,
        company_id: CompanyId,
        item_id: ItemId,
        f: impl FnOnce(&mut InvoiceItem),
    ) -> bool {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        match items
            .get_mut(&company_id)
            .and_then(|company| company.iter_mut().find(|i| i.id == item_id))
        {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        }
    }

    /// Simulate an outage of the accounting kernel.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger offline".into()));
        }
        Ok(())
    }
}

impl Ledger for InMemoryLedger {
    fn open_items(
        &self,
        company_id: CompanyId,
        partner_id: PartnerId,
        _as_of: NaiveDate,
    ) -> Result<Vec<InvoiceItem>, LedgerError> {
        self.check_available()?;
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items
            .get(&company_id)
            .map(|company| {
                company
                    .iter()
                    .filter(|i| i.partner_id == partner_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn partners_with_overdue_items(
        &self,
        company_id: CompanyId,
        as_of: NaiveDate,
    ) -> Result<Vec<PartnerId>, LedgerError> {
        self.check_available()?;
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items
            .get(&company_id)
            .map(|company| {
                company
                    .iter()
                    .filter(|i| i.is_open_as_of(as_of) && i.is_overdue_as_of(as_of))
                    .map(|i| i.partner_id)
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Rate table: the rate of a pair on a date is the latest one set on or
/// before that date. Inverse pairs are derived.
#[derive(Debug, Clone, Default)]
pub struct FixedRates {
    rates: HashMap<(Currency, Currency), BTreeMap<NaiveDate, Decimal>>,
}

impl FixedRates {
    pub fn new() -> Self {
        Self::default()
    }

    /// `1 from = rate to`, effective from `since`.
    pub fn with_rate(mut self, from: Currency, to: Currency, since: NaiveDate, rate: Decimal) -> Self {
        self.rates.entry((from, to)).or_default().insert(since, rate);
        self
    }

    fn rate_on(&self, from: &Currency, to: &Currency, date: NaiveDate) -> Option<Decimal> {
        self.rates
            .get(&(from.clone(), to.clone()))
            .and_then(|history| history.range(..=date).next_back())
            .map(|(_, rate)| *rate)
    }
}

impl RateService for FixedRates {
    fn convert(
        &self,
        amount: Decimal,
        from: &Currency,
        to: &Currency,
        date: NaiveDate,
    ) -> Result<Decimal, RateError> {
        if from == to {
            return Ok(amount);
        }
        if let Some(rate) = self.rate_on(from, to, date) {
            return Ok(amount * rate);
        }
        match self.rate_on(to, from, date) {
            Some(rate) if !rate.is_zero() => Ok(amount / rate),
            _ => Err(RateError::MissingRate {
                from: from.clone(),
                to: to.clone(),
                date,
            }),
        }
    }
}
