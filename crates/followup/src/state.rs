//! Partner follow-up state.
//!
//! Modelled as an aggregate: the executor sends commands, the state answers
//! with events and evolves only by applying them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use dunning_core::{Aggregate, AggregateRoot, DomainError, LevelId, PartnerId, UserId};

/// Follow-up state attached to a partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerFollowupState {
    pub partner_id: PartnerId,
    /// `None` means the partner is not in the follow-up cycle yet.
    pub current_level: Option<LevelId>,
    pub next_action_date: Option<NaiveDate>,
    pub last_reminder_date: Option<NaiveDate>,
    pub responsible_user_id: Option<UserId>,
    pub version: u64,
}

impl PartnerFollowupState {
    /// Fresh state for a partner seen for the first time.
    pub fn new(partner_id: PartnerId) -> Self {
        Self {
            partner_id,
            current_level: None,
            next_action_date: None,
            last_reminder_date: None,
            responsible_user_id: None,
            version: 0,
        }
    }

    pub fn is_in_cycle(&self) -> bool {
        self.current_level.is_some() || self.next_action_date.is_some()
    }
}

impl AggregateRoot for PartnerFollowupState {
    type Id = PartnerId;

    fn id(&self) -> &Self::Id {
        &self.partner_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: record a dispatched (or logged) reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReminder {
    pub level_id: LevelId,
    pub date: NaiveDate,
    pub next_action_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowupCommand {
    RecordReminder(RecordReminder),
    /// Leave the cycle (nothing owed any more).
    Clear { date: NaiveDate },
    AssignResponsible { user_id: Option<UserId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowupEvent {
    ReminderRecorded {
        partner_id: PartnerId,
        level_id: LevelId,
        date: NaiveDate,
        next_action_date: NaiveDate,
    },
    FollowupCleared {
        partner_id: PartnerId,
        date: NaiveDate,
    },
    ResponsibleAssigned {
        partner_id: PartnerId,
        user_id: Option<UserId>,
    },
}

impl FollowupEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            FollowupEvent::ReminderRecorded { .. } => "followup.partner.reminder_recorded",
            FollowupEvent::FollowupCleared { .. } => "followup.partner.cleared",
            FollowupEvent::ResponsibleAssigned { .. } => "followup.partner.responsible_assigned",
        }
    }
}

impl Aggregate for PartnerFollowupState {
    type Command = FollowupCommand;
    type Event = FollowupEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            FollowupEvent::ReminderRecorded {
                level_id,
                date,
                next_action_date,
                ..
            } => {
                self.current_level = Some(*level_id);
                self.last_reminder_date = Some(*date);
                self.next_action_date = Some(*next_action_date);
            }
            FollowupEvent::FollowupCleared { .. } => {
                self.current_level = None;
                self.next_action_date = None;
            }
            FollowupEvent::ResponsibleAssigned { user_id, .. } => {
                self.responsible_user_id = *user_id;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            FollowupCommand::RecordReminder(cmd) => self.handle_record(cmd),
            FollowupCommand::Clear { date } => {
                if !self.is_in_cycle() {
                    return Ok(Vec::new());
                }
                Ok(vec![FollowupEvent::FollowupCleared {
                    partner_id: self.partner_id,
                    date: *date,
                }])
            }
            FollowupCommand::AssignResponsible { user_id } => {
                if self.responsible_user_id == *user_id {
                    return Ok(Vec::new());
                }
                Ok(vec![FollowupEvent::ResponsibleAssigned {
                    partner_id: self.partner_id,
                    user_id: *user_id,
                }])
            }
        }
    }
}

impl PartnerFollowupState {
    fn handle_record(&self, cmd: &RecordReminder) -> Result<Vec<FollowupEvent>, DomainError> {
        if cmd.next_action_date < cmd.date {
            return Err(DomainError::validation(
                "next action date must not precede the reminder date",
            ));
        }
        if let Some(last) = self.last_reminder_date {
            if cmd.date < last {
                return Err(DomainError::conflict(format!(
                    "reminder dated {} precedes last reminder {}",
                    cmd.date, last
                )));
            }
        }

        Ok(vec![FollowupEvent::ReminderRecorded {
            partner_id: self.partner_id,
            level_id: cmd.level_id,
            date: cmd.date,
            next_action_date: cmd.next_action_date,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn record_reminder_advances_state() {
        let mut state = PartnerFollowupState::new(PartnerId::new());
        let level = LevelId::new();

        let events = state
            .execute(&FollowupCommand::RecordReminder(RecordReminder {
                level_id: level,
                date: date(2016, 1, 15),
                next_action_date: date(2016, 2, 14),
            }))
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(state.current_level, Some(level));
        assert_eq!(state.last_reminder_date, Some(date(2016, 1, 15)));
        assert_eq!(state.next_action_date, Some(date(2016, 2, 14)));
        assert_eq!(state.version(), 1);
    }

    #[test]
    fn reminders_cannot_go_back_in_time() {
        let mut state = PartnerFollowupState::new(PartnerId::new());
        state.last_reminder_date = Some(date(2016, 1, 15));

        let err = state
            .handle(&FollowupCommand::RecordReminder(RecordReminder {
                level_id: LevelId::new(),
                date: date(2016, 1, 10),
                next_action_date: date(2016, 1, 20),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn next_action_must_not_precede_reminder() {
        let state = PartnerFollowupState::new(PartnerId::new());
        let err = state
            .handle(&FollowupCommand::RecordReminder(RecordReminder {
                level_id: LevelId::new(),
                date: date(2016, 1, 15),
                next_action_date: date(2016, 1, 14),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn clear_keeps_history_and_responsible() {
        let mut state = PartnerFollowupState::new(PartnerId::new());
        let user = UserId::new();
        state
            .execute(&FollowupCommand::AssignResponsible { user_id: Some(user) })
            .unwrap();
        state
            .execute(&FollowupCommand::RecordReminder(RecordReminder {
                level_id: LevelId::new(),
                date: date(2016, 1, 15),
                next_action_date: date(2016, 1, 29),
            }))
            .unwrap();

        state
            .execute(&FollowupCommand::Clear { date: date(2016, 2, 1) })
            .unwrap();

        assert!(!state.is_in_cycle());
        assert_eq!(state.responsible_user_id, Some(user));
        assert_eq!(state.last_reminder_date, Some(date(2016, 1, 15)));
    }

    #[test]
    fn clearing_an_idle_state_emits_nothing() {
        let state = PartnerFollowupState::new(PartnerId::new());
        let events = state
            .handle(&FollowupCommand::Clear { date: date(2016, 1, 15) })
            .unwrap();
        assert!(events.is_empty());
    }
}
