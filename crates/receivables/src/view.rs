//! Receivables view: the point-in-time set of open items for one partner.

use std::cmp::Ordering;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::debug;

use dunning_core::{CompanyId, PartnerId};

use crate::item::InvoiceItem;
use crate::ledger::{Ledger, LedgerError};
use crate::rates::RateError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReceivablesError {
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error(transparent)]
    Rate(#[from] RateError),
}

impl From<LedgerError> for ReceivablesError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::Unavailable(msg) => Self::LedgerUnavailable(msg),
        }
    }
}

/// Read-only projection over the ledger.
///
/// - items posted after `as_of` are ignored
/// - reconciliations dated after `as_of` are ignored
/// - ordering is `(date_due, id)` ascending, undated items last
#[derive(Debug, Clone)]
pub struct ReceivablesView<L> {
    ledger: L,
}

impl<L: Ledger> ReceivablesView<L> {
    pub fn new(ledger: L) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Open items of `partner_id` as of `as_of`, residuals projected to that date.
    pub fn open_items_for(
        &self,
        company_id: CompanyId,
        partner_id: PartnerId,
        as_of: NaiveDate,
    ) -> Result<Vec<InvoiceItem>, ReceivablesError> {
        let raw = self.ledger.open_items(company_id, partner_id, as_of)?;
        let fetched = raw.len();

        let mut items = Vec::with_capacity(fetched);
        for item in raw {
            if item.partner_id != partner_id {
                return Err(ReceivablesError::LedgerUnavailable(format!(
                    "item {} belongs to partner {}, expected {}",
                    item.id, item.partner_id, partner_id
                )));
            }
            if item.currency.is_none() {
                return Err(ReceivablesError::LedgerUnavailable(format!(
                    "item {} has no currency",
                    item.id
                )));
            }
            if item.is_open_as_of(as_of) {
                items.push(item.as_of(as_of));
            }
        }

        items.sort_by(due_date_order);

        debug!(
            company_id = %company_id,
            partner_id = %partner_id,
            %as_of,
            fetched,
            open = items.len(),
            "loaded open receivable items"
        );

        Ok(items)
    }
}

/// `(date_due ascending, id ascending)`, undated items after all dated ones.
pub fn due_date_order(a: &InvoiceItem, b: &InvoiceItem) -> Ordering {
    let due = match (a.date_due, b.date_due) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    due.then_with(|| a.id.cmp(&b.id))
}
