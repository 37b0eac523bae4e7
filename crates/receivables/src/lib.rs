//! Receivables module: open-item view over the accounts-receivable ledger and
//! the aging aggregator built on top of it.
//!
//! Pure domain logic only. The ledger and the rate service are ports
//! implemented elsewhere (see `dunning-infra`).

pub mod aging;
pub mod item;
pub mod ledger;
pub mod rates;
pub mod view;

pub use aging::{AgingAggregator, AgingBucket, AgingSummary, PartnerReceivables, ReceivableLine};
pub use item::{Currency, DocumentKind, InvoiceItem, ItemId, Reconciliation};
pub use ledger::{Ledger, LedgerError};
pub use rates::{RateError, RateService};
pub use view::{ReceivablesError, ReceivablesView};
