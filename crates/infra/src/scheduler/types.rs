//! Run summaries and counters.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use dunning_core::{CompanyId, PartnerId};
use dunning_followup::{ExecutionOutcome, FollowupError, SkipReason};

/// What happened to one partner during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerOutcome {
    /// Reminder dispatched (or recorded, for levels without channels).
    Sent,
    Partial,
    /// Transient failure; picked up again next tick.
    Retry,
    /// Already reminded today at this level.
    Skipped,
    AwaitingOperator,
    NoAction,
    Failed,
    TimedOut,
}

impl PartnerOutcome {
    pub fn from_execution(outcome: &ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Sent | ExecutionOutcome::Recorded => PartnerOutcome::Sent,
            ExecutionOutcome::Partial => PartnerOutcome::Partial,
            ExecutionOutcome::Retry(_) => PartnerOutcome::Retry,
            ExecutionOutcome::Undeliverable(_) => PartnerOutcome::Failed,
            ExecutionOutcome::TimedOut => PartnerOutcome::TimedOut,
            ExecutionOutcome::DryRun => PartnerOutcome::NoAction,
            ExecutionOutcome::Skipped(reason) => match reason {
                SkipReason::AwaitingOperator => PartnerOutcome::AwaitingOperator,
                SkipReason::AlreadySentToday => PartnerOutcome::Skipped,
                SkipReason::NoActionNeeded | SkipReason::NotDueYet | SkipReason::EmptyStatement => {
                    PartnerOutcome::NoAction
                }
            },
        }
    }

    pub fn from_error(error: &FollowupError) -> Self {
        if error.is_retryable() {
            PartnerOutcome::Retry
        } else {
            PartnerOutcome::Failed
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounters {
    pub sent: u64,
    pub partial: u64,
    pub retry: u64,
    pub skipped: u64,
    pub awaiting_operator: u64,
    pub no_action: u64,
    pub failed: u64,
    pub timed_out: u64,
}

impl OutcomeCounters {
    pub fn record(&mut self, outcome: PartnerOutcome) {
        let counter = match outcome {
            PartnerOutcome::Sent => &mut self.sent,
            PartnerOutcome::Partial => &mut self.partial,
            PartnerOutcome::Retry => &mut self.retry,
            PartnerOutcome::Skipped => &mut self.skipped,
            PartnerOutcome::AwaitingOperator => &mut self.awaiting_operator,
            PartnerOutcome::NoAction => &mut self.no_action,
            PartnerOutcome::Failed => &mut self.failed,
            PartnerOutcome::TimedOut => &mut self.timed_out,
        };
        *counter += 1;
    }

    pub fn merge(&mut self, other: &OutcomeCounters) {
        self.sent += other.sent;
        self.partial += other.partial;
        self.retry += other.retry;
        self.skipped += other.skipped;
        self.awaiting_operator += other.awaiting_operator;
        self.no_action += other.no_action;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
    }

    /// Partners whose state advanced.
    pub fn dispatched(&self) -> u64 {
        self.sent + self.partial
    }

    pub fn total(&self) -> u64 {
        self.sent
            + self.partial
            + self.retry
            + self.skipped
            + self.awaiting_operator
            + self.no_action
            + self.failed
            + self.timed_out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerReport {
    pub partner_id: PartnerId,
    pub outcome: PartnerOutcome,
    pub level: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRun {
    pub company_id: CompanyId,
    /// Why the whole company was skipped (configuration or ledger failure).
    pub skipped: Option<String>,
    pub counters: OutcomeCounters,
    /// In partner order.
    pub partners: Vec<PartnerReport>,
}

impl CompanyRun {
    pub fn new(company_id: CompanyId) -> Self {
        Self {
            company_id,
            skipped: None,
            counters: OutcomeCounters::default(),
            partners: Vec::new(),
        }
    }

    pub fn skipped(company_id: CompanyId, reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Self::new(company_id)
        }
    }

    pub fn outcome_of(&self, partner_id: PartnerId) -> Option<PartnerOutcome> {
        self.partners
            .iter()
            .find(|p| p.partner_id == partner_id)
            .map(|p| p.outcome)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub date: NaiveDate,
    pub companies: Vec<CompanyRun>,
}

impl RunSummary {
    pub fn totals(&self) -> OutcomeCounters {
        let mut totals = OutcomeCounters::default();
        for company in &self.companies {
            totals.merge(&company.counters);
        }
        totals
    }

    pub fn company(&self, company_id: CompanyId) -> Option<&CompanyRun> {
        self.companies.iter().find(|c| c.company_id == company_id)
    }
}

/// Cumulative statistics of a spawned scheduler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub totals: OutcomeCounters,
    pub last_summary: Option<RunSummary>,
    pub uptime_secs: u64,
}
