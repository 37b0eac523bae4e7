//! Follow-up decider.
//!
//! | condition                                      | decision                         |
//! |------------------------------------------------|----------------------------------|
//! | `total_due <= 0`                               | no action, clear state           |
//! | nothing overdue                                | no action, keep state            |
//! | overdue, `today < next_action_date`            | with overdue invoices            |
//! | overdue, no next date or `today >= next date`  | in need of action at next level  |
//!
//! When no higher level qualifies, the current level is re-applied as long as
//! its own delay is still satisfied (periodic reminders on the terminal level).
//! A partner only returns to the first level after its state was cleared.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use dunning_receivables::AgingSummary;

use crate::error::{FollowupError, FollowupResult};
use crate::level::{FollowupLevel, LevelTable};
use crate::state::PartnerFollowupState;

/// Derived partner status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowupStatus {
    NoActionNeeded,
    InNeedOfAction,
    WithOverdueInvoices,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    NoActionNeeded {
        /// Net balance is not positive: the partner leaves the cycle.
        clear_state: bool,
    },
    /// Overdue, but not actionable today.
    WithOverdueInvoices { next_action_date: Option<NaiveDate> },
    InNeedOfAction {
        level: FollowupLevel,
        /// The level is the partner's current one (no higher level qualifies).
        reapply: bool,
    },
}

impl Decision {
    pub fn status(&self) -> FollowupStatus {
        match self {
            Decision::NoActionNeeded { .. } => FollowupStatus::NoActionNeeded,
            Decision::WithOverdueInvoices { .. } => FollowupStatus::WithOverdueInvoices,
            Decision::InNeedOfAction { .. } => FollowupStatus::InNeedOfAction,
        }
    }

    pub fn level(&self) -> Option<&FollowupLevel> {
        match self {
            Decision::InNeedOfAction { level, .. } => Some(level),
            _ => None,
        }
    }

    /// Action due on a level the scheduler may fire without an operator.
    pub fn is_automatic(&self) -> bool {
        self.level().is_some_and(FollowupLevel::is_automatic)
    }
}

/// Pure decision function.
///
/// Fails only when the state points at a level the table does not know.
pub fn decide(
    aging: &AgingSummary,
    state: Option<&PartnerFollowupState>,
    levels: &LevelTable,
    today: NaiveDate,
) -> FollowupResult<Decision> {
    if !aging.has_positive_balance() {
        return Ok(Decision::NoActionNeeded {
            clear_state: state.is_some_and(PartnerFollowupState::is_in_cycle),
        });
    }

    if !aging.has_overdue() {
        return Ok(Decision::NoActionNeeded { clear_state: false });
    }

    let current = match state.and_then(|s| s.current_level) {
        Some(id) => Some(levels.get(id).ok_or_else(|| {
            FollowupError::configuration(format!(
                "partner state references unknown follow-up level {id}"
            ))
        })?),
        None => None,
    };

    if let Some(next) = state.and_then(|s| s.next_action_date) {
        if today < next {
            return Ok(Decision::WithOverdueInvoices {
                next_action_date: Some(next),
            });
        }
    }

    let days = aging.most_overdue_days;
    if let Some(level) = levels.next_level_after(current, days) {
        return Ok(Decision::InNeedOfAction {
            level: level.clone(),
            reapply: false,
        });
    }

    match current {
        Some(level) if level.delay_days <= days => Ok(Decision::InNeedOfAction {
            level: level.clone(),
            reapply: true,
        }),
        _ => Ok(Decision::WithOverdueInvoices {
            next_action_date: None,
        }),
    }
}
