use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use dunning_core::{DomainError, Entity, PartnerId};

/// Ledger item identifier.
///
/// Ledger rows are numbered by the accounting kernel; the numbering is used as
/// the deterministic tie-break when items share a due date.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// ISO 4217 currency code (e.g. "USD").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Result<Self, DomainError> {
        let code = code.as_ref().trim().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "currency code must be three letters, got {code:?}"
            )));
        }
        Ok(Self(code))
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Kind of accounting document an item originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Invoice,
    Refund,
    Payment,
    Misc,
}

/// A (partial) reconciliation matched against an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub date: NaiveDate,
    /// Portion of the item settled by this reconciliation, signed like the
    /// item's balance (positive for an invoice settled by a payment).
    pub amount: Decimal,
}

/// Receivable ledger item, as exposed by the accounting kernel.
///
/// Read-only to the follow-up engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: ItemId,
    pub partner_id: PartnerId,
    /// Human-readable document reference (e.g. "INV/2016/0001").
    pub document_ref: String,
    pub document_kind: DocumentKind,
    /// `None` only for inconsistent ledger rows; the view refuses those.
    pub currency: Option<Currency>,
    /// Posting date.
    pub date: NaiveDate,
    pub date_due: Option<NaiveDate>,
    /// Signed residual today: positive = customer owes, negative = credit.
    pub amount_residual: Decimal,
    pub is_reconciled: bool,
    /// Disputed/blocked items are displayed but never counted in totals.
    pub is_blocked: bool,
    #[serde(default)]
    pub reconciliations: Vec<Reconciliation>,
    #[serde(default)]
    pub expected_pay_date: Option<NaiveDate>,
    #[serde(default)]
    pub internal_note: Option<String>,
}

impl InvoiceItem {
    /// Residual as it stood on `as_of`: reconciliations dated after that day
    /// had not happened yet, so their amounts are added back.
    pub fn residual_as_of(&self, as_of: NaiveDate) -> Decimal {
        self.amount_residual
            + self
                .reconciliations
                .iter()
                .filter(|r| r.date > as_of)
                .map(|r| r.amount)
                .sum::<Decimal>()
    }

    /// Whether the item was open (posted and not fully reconciled) on `as_of`.
    pub fn is_open_as_of(&self, as_of: NaiveDate) -> bool {
        if self.date > as_of {
            return false;
        }
        let reconciled_later = self.reconciliations.iter().any(|r| r.date > as_of);
        if self.is_reconciled && !reconciled_later {
            return false;
        }
        !self.residual_as_of(as_of).is_zero()
    }

    /// Items without a due date are never overdue.
    pub fn is_overdue_as_of(&self, as_of: NaiveDate) -> bool {
        self.date_due.is_some_and(|due| due <= as_of)
    }

    /// Days past due on `as_of` (0 when not yet due or undated).
    pub fn days_overdue(&self, as_of: NaiveDate) -> u32 {
        match self.date_due {
            Some(due) if due <= as_of => (as_of - due).num_days().max(0) as u32,
            _ => 0,
        }
    }

    /// Point-in-time copy of the item as it stood on `as_of`.
    pub fn as_of(&self, as_of: NaiveDate) -> InvoiceItem {
        let mut projected = self.clone();
        projected.amount_residual = self.residual_as_of(as_of);
        projected.is_reconciled = !self.is_open_as_of(as_of);
        projected.reconciliations.retain(|r| r.date <= as_of);
        projected
    }
}

impl Entity for InvoiceItem {
    type Id = ItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
