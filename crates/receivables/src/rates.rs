//! Currency conversion port.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::item::Currency;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateError {
    #[error("no {from}->{to} rate on {date}")]
    MissingRate {
        from: Currency,
        to: Currency,
        date: NaiveDate,
    },
}

/// Converts amounts between currencies at the rate of a given date.
pub trait RateService: Send + Sync {
    fn convert(
        &self,
        amount: Decimal,
        from: &Currency,
        to: &Currency,
        date: NaiveDate,
    ) -> Result<Decimal, RateError>;
}

impl<R> RateService for Arc<R>
where
    R: RateService + ?Sized,
{
    fn convert(
        &self,
        amount: Decimal,
        from: &Currency,
        to: &Currency,
        date: NaiveDate,
    ) -> Result<Decimal, RateError> {
        (**self).convert(amount, from, to, date)
    }
}
