//! Statement renderer.
//!
//! Produces the structured statement handed to the template layer: document
//! lines in receivables order followed by `Total Due` and `Total Overdue`.
//! Styling is left to the templates; lines only carry presentation hints.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use dunning_core::PartnerId;
use dunning_receivables::{Currency, DocumentKind, PartnerReceivables, ReceivableLine};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub document_ref: String,
    pub document_kind: DocumentKind,
    pub date: NaiveDate,
    pub date_due: Option<NaiveDate>,
    /// Signed amount in the statement currency.
    pub amount: Decimal,
    /// Residual in the document's own currency.
    pub original_amount: Decimal,
    pub original_currency: Currency,
    pub is_overdue: bool,
    pub blocked: bool,
    pub expected_payment_note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    TotalDue,
    TotalOverdue,
}

impl SummaryKind {
    pub fn label(&self) -> &'static str {
        match self {
            SummaryKind::TotalDue => "Total Due",
            SummaryKind::TotalOverdue => "Total Overdue",
        }
    }
}

/// Row as laid out for the template layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatementRow {
    Document(StatementLine),
    Summary {
        kind: SummaryKind,
        label: String,
        amount: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub partner_id: PartnerId,
    pub as_of: NaiveDate,
    pub currency: Currency,
    pub lines: Vec<StatementLine>,
    pub total_due: Decimal,
    pub total_overdue: Decimal,
}

impl Statement {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Document lines followed by the two summary rows.
    pub fn rows(&self) -> Vec<StatementRow> {
        let mut rows: Vec<StatementRow> = self
            .lines
            .iter()
            .cloned()
            .map(StatementRow::Document)
            .collect();
        for (kind, amount) in [
            (SummaryKind::TotalDue, self.total_due),
            (SummaryKind::TotalOverdue, self.total_overdue),
        ] {
            rows.push(StatementRow::Summary {
                kind,
                label: kind.label().to_string(),
                amount,
            });
        }
        rows
    }

    /// Sum of the lines that count towards the totals (blocked lines excluded).
    pub fn counted_amount(&self) -> Decimal {
        self.lines
            .iter()
            .filter(|l| !l.blocked)
            .map(|l| l.amount)
            .sum()
    }
}

#[derive(Debug, Default, Copy, Clone)]
pub struct StatementRenderer;

impl StatementRenderer {
    pub fn render(&self, receivables: &PartnerReceivables) -> Statement {
        let aging = receivables.aging();
        let lines = receivables
            .lines
            .iter()
            .map(|line| statement_line(line, receivables.as_of, &receivables.currency))
            .collect();

        Statement {
            partner_id: receivables.partner_id,
            as_of: receivables.as_of,
            currency: receivables.currency.clone(),
            lines,
            total_due: aging.total_due,
            total_overdue: aging.total_overdue,
        }
    }
}

fn statement_line(line: &ReceivableLine, as_of: NaiveDate, currency: &Currency) -> StatementLine {
    let item = &line.item;
    StatementLine {
        document_ref: item.document_ref.clone(),
        document_kind: item.document_kind,
        date: item.date,
        date_due: item.date_due,
        amount: line.amount,
        original_amount: item.amount_residual,
        original_currency: item.currency.clone().unwrap_or_else(|| currency.clone()),
        is_overdue: item.is_overdue_as_of(as_of),
        blocked: item.is_blocked,
        expected_payment_note: expected_payment_note(
            item.expected_pay_date,
            item.internal_note.as_deref(),
        ),
    }
}

fn expected_payment_note(date: Option<NaiveDate>, note: Option<&str>) -> Option<String> {
    let note = note.map(str::trim).filter(|n| !n.is_empty());
    match (date, note) {
        (Some(d), Some(n)) => Some(format!("Expected payment: {d}. {n}")),
        (Some(d), None) => Some(format!("Expected payment: {d}")),
        (None, Some(n)) => Some(n.to_string()),
        (None, None) => None,
    }
}
