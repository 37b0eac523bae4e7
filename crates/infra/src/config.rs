//! Scheduler configuration.
//!
//! Defaults suit a daily run; every knob can be overridden from the
//! environment. Malformed values fall back to the default with a warning.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use dunning_core::CompanyId;
use dunning_receivables::Currency;

pub const ENV_INTERVAL_SECS: &str = "DUNNING_SCHEDULER_INTERVAL_SECS";
pub const ENV_WORKERS: &str = "DUNNING_SCHEDULER_WORKERS";
pub const ENV_BATCH_SIZE: &str = "DUNNING_SCHEDULER_BATCH_SIZE";
pub const ENV_PARTNER_BUDGET_SECS: &str = "DUNNING_PARTNER_BUDGET_SECS";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid scheduler configuration: {0}")]
    Invalid(String),
}

/// A company the scheduler runs follow-ups for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub company_id: CompanyId,
    /// Currency statements and thresholds are expressed in.
    pub currency: Currency,
    /// Fallback language for addressees without one.
    pub locale: String,
}

impl CompanyProfile {
    pub fn new(company_id: CompanyId, currency: Currency) -> Self {
        Self {
            company_id,
            currency,
            locale: "en_US".to_string(),
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Time between ticks of the interval tick source.
    pub interval: Duration,
    /// Parallel workers consuming the partner queue.
    pub workers: usize,
    /// Partners evaluated per company and tick.
    pub batch_size: usize,
    /// Wall-clock budget of one partner; `None` disables it.
    pub partner_budget: Option<Duration>,
    pub companies: Vec<CompanyProfile>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            workers: 4,
            batch_size: 100,
            partner_budget: Some(Duration::from_secs(30)),
            companies: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Defaults overridden by `DUNNING_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let budget_default = defaults.partner_budget.map(|d| d.as_secs()).unwrap_or(0);
        let budget = parse_or(&lookup, ENV_PARTNER_BUDGET_SECS, budget_default);

        Self {
            interval: Duration::from_secs(parse_or(
                &lookup,
                ENV_INTERVAL_SECS,
                defaults.interval.as_secs(),
            )),
            workers: parse_or(&lookup, ENV_WORKERS, defaults.workers),
            batch_size: parse_or(&lookup, ENV_BATCH_SIZE, defaults.batch_size),
            // 0 disables the budget.
            partner_budget: (budget > 0).then(|| Duration::from_secs(budget)),
            companies: defaults.companies,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_partner_budget(mut self, budget: Option<Duration>) -> Self {
        self.partner_budget = budget;
        self
    }

    pub fn with_company(mut self, company: CompanyProfile) -> Self {
        self.companies.push(company);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch size must be at least 1".into()));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid("interval must be positive".into()));
        }
        Ok(())
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "malformed setting; using default");
            default
        }),
    }
}
