//! Aging aggregator.
//!
//! Totals are always computed from a fresh pull of the ledger; no denormalized
//! balance is trusted. One pull per (partner, date) produces a
//! [`PartnerReceivables`] snapshot that both the aging summary and the
//! statement are derived from.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::debug;

use dunning_core::{CompanyId, PartnerId};

use crate::item::{Currency, InvoiceItem};
use crate::ledger::Ledger;
use crate::rates::RateService;
use crate::view::{ReceivablesError, ReceivablesView};

/// Aged-receivable buckets (days past due).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgingBucket {
    NotDue,
    Days1To30,
    Days31To60,
    Days61To90,
    Days91To120,
    Older,
}

impl AgingBucket {
    pub fn for_item(item: &InvoiceItem, as_of: NaiveDate) -> Self {
        match item.date_due {
            Some(due) if due < as_of => Self::from_days_past_due(item.days_overdue(as_of)),
            _ => Self::NotDue,
        }
    }

    pub fn from_days_past_due(days: u32) -> Self {
        match days {
            0 => Self::NotDue,
            1..=30 => Self::Days1To30,
            31..=60 => Self::Days31To60,
            61..=90 => Self::Days61To90,
            91..=120 => Self::Days91To120,
            _ => Self::Older,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NotDue => "Not Due",
            Self::Days1To30 => "1 - 30",
            Self::Days31To60 => "31 - 60",
            Self::Days61To90 => "61 - 90",
            Self::Days91To120 => "91 - 120",
            Self::Older => "Older",
        }
    }
}

/// Aging of one partner on one date, in the target currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgingSummary {
    pub currency: Currency,
    pub total_due: Decimal,
    pub total_overdue: Decimal,
    pub most_overdue_days: u32,
    pub items_by_due_bucket: BTreeMap<AgingBucket, Decimal>,
}

impl AgingSummary {
    pub fn empty(currency: Currency) -> Self {
        Self {
            currency,
            total_due: Decimal::ZERO,
            total_overdue: Decimal::ZERO,
            most_overdue_days: 0,
            items_by_due_bucket: BTreeMap::new(),
        }
    }

    /// Net debit balance: the customer owes something.
    pub fn has_positive_balance(&self) -> bool {
        self.total_due > Decimal::ZERO
    }

    pub fn has_overdue(&self) -> bool {
        self.total_overdue > Decimal::ZERO
    }
}

/// One open item with its residual converted to the target currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivableLine {
    pub item: InvoiceItem,
    /// Residual in the target currency, rounded to the cent.
    pub amount: Decimal,
}

/// Snapshot of a partner's open receivables for one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerReceivables {
    pub company_id: CompanyId,
    pub partner_id: PartnerId,
    pub as_of: NaiveDate,
    pub currency: Currency,
    /// Ordered like the receivables view.
    pub lines: Vec<ReceivableLine>,
}

impl PartnerReceivables {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Blocked items are skipped; credits count against the balance.
    pub fn aging(&self) -> AgingSummary {
        let mut summary = AgingSummary::empty(self.currency.clone());
        let mut oldest_due: Option<NaiveDate> = None;

        for line in self.lines.iter().filter(|l| !l.item.is_blocked) {
            summary.total_due += line.amount;
            *summary
                .items_by_due_bucket
                .entry(AgingBucket::for_item(&line.item, self.as_of))
                .or_insert(Decimal::ZERO) += line.amount;

            if line.item.is_overdue_as_of(self.as_of) {
                summary.total_overdue += line.amount;
                // Credits reduce the balance but never age the partner.
                if line.amount > Decimal::ZERO {
                    oldest_due = match (oldest_due, line.item.date_due) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (None, b) => b,
                        (a, None) => a,
                    };
                }
            }
        }

        summary.most_overdue_days = oldest_due
            .map(|due| (self.as_of - due).num_days().max(0) as u32)
            .unwrap_or(0);
        summary
    }
}

/// Round to the currency cent, half away from zero.
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Computes per-partner aging from the receivables view and the rate service.
#[derive(Debug, Clone)]
pub struct AgingAggregator<L, R> {
    view: ReceivablesView<L>,
    rates: R,
}

impl<L, R> AgingAggregator<L, R>
where
    L: Ledger,
    R: RateService,
{
    pub fn new(ledger: L, rates: R) -> Self {
        Self {
            view: ReceivablesView::new(ledger),
            rates,
        }
    }

    pub fn view(&self) -> &ReceivablesView<L> {
        &self.view
    }

    /// Pull the partner's open items once and convert them to `target`
    /// at the rate of each item's posting date.
    pub fn receivables(
        &self,
        company_id: CompanyId,
        partner_id: PartnerId,
        as_of: NaiveDate,
        target: &Currency,
    ) -> Result<PartnerReceivables, ReceivablesError> {
        let items = self.view.open_items_for(company_id, partner_id, as_of)?;

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let amount = match &item.currency {
                Some(currency) if currency != target => round_cents(self.rates.convert(
                    item.amount_residual,
                    currency,
                    target,
                    item.date,
                )?),
                Some(_) => round_cents(item.amount_residual),
                None => {
                    return Err(ReceivablesError::LedgerUnavailable(format!(
                        "item {} has no currency",
                        item.id
                    )));
                }
            };
            lines.push(ReceivableLine { item, amount });
        }

        Ok(PartnerReceivables {
            company_id,
            partner_id,
            as_of,
            currency: target.clone(),
            lines,
        })
    }

    pub fn aggregate(
        &self,
        company_id: CompanyId,
        partner_id: PartnerId,
        as_of: NaiveDate,
        target: &Currency,
    ) -> Result<AgingSummary, ReceivablesError> {
        let summary = self
            .receivables(company_id, partner_id, as_of, target)?
            .aging();
        debug!(
            partner_id = %partner_id,
            total_due = %summary.total_due,
            total_overdue = %summary.total_overdue,
            most_overdue_days = summary.most_overdue_days,
            "aggregated aging"
        );
        Ok(summary)
    }

    /// Partners with something due on or before `as_of`, in stable order.
    pub fn candidates(
        &self,
        company_id: CompanyId,
        as_of: NaiveDate,
    ) -> Result<Vec<PartnerId>, ReceivablesError> {
        let mut partners = self
            .view
            .ledger()
            .partners_with_overdue_items(company_id, as_of)?;
        partners.sort();
        partners.dedup();
        Ok(partners)
    }
}
