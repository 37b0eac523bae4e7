//! Ledger port (accounting kernel, read-only).

use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;

use dunning_core::{CompanyId, PartnerId};

use crate::item::InvoiceItem;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to receivable items.
pub trait Ledger: Send + Sync {
    /// Receivable items of `partner` that may still be open on `as_of`.
    ///
    /// Implementations may return closed items too; the receivables view
    /// applies the point-in-time filter itself.
    fn open_items(
        &self,
        company_id: CompanyId,
        partner_id: PartnerId,
        as_of: NaiveDate,
    ) -> Result<Vec<InvoiceItem>, LedgerError>;

    /// Partners with at least one open item due on or before `as_of`.
    fn partners_with_overdue_items(
        &self,
        company_id: CompanyId,
        as_of: NaiveDate,
    ) -> Result<Vec<PartnerId>, LedgerError>;
}

impl<L> Ledger for Arc<L>
where
    L: Ledger + ?Sized,
{
    fn open_items(
        &self,
        company_id: CompanyId,
        partner_id: PartnerId,
        as_of: NaiveDate,
    ) -> Result<Vec<InvoiceItem>, LedgerError> {
        (**self).open_items(company_id, partner_id, as_of)
    }

    fn partners_with_overdue_items(
        &self,
        company_id: CompanyId,
        as_of: NaiveDate,
    ) -> Result<Vec<PartnerId>, LedgerError> {
        (**self).partners_with_overdue_items(company_id, as_of)
    }
}
