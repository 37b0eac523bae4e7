//! Reminder executor.
//!
//! Applies a decision to one partner while holding the partner's state lock:
//! re-aggregate, re-decide, render, dispatch per channel, advance state and
//! leave an audit record. Rendering and dispatch go through [`FollowupPorts`].

use std::time::Instant;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use dunning_core::{Aggregate, CompanyId, PartnerId, UserId};
use dunning_receivables::{
    AgingAggregator, AgingSummary, DocumentKind, Ledger, PartnerReceivables, RateService,
};

use crate::contacts::Contact;
use crate::context::EvaluationContext;
use crate::decider::{Decision, FollowupStatus, decide};
use crate::error::{FollowupError, FollowupResult};
use crate::level::{FollowupLevel, LevelTable, TemplateRef};
use crate::ports::{Attachment, DispatchError, FollowupPorts, MailOutcome, RenderedDocument};
use crate::state::{FollowupCommand, PartnerFollowupState, RecordReminder};
use crate::statement::{Statement, StatementRenderer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Letter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ChannelStatus {
    Delivered,
    TransientFailure(String),
    PermanentFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReport {
    pub channel: Channel,
    pub status: ChannelStatus,
    /// Print queue handle for letters.
    pub reference: Option<String>,
}

impl ChannelReport {
    pub fn delivered(&self) -> bool {
        self.status == ChannelStatus::Delivered
    }
}

/// Channels and extras for one execution. Defaults to the level's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    pub send_email: bool,
    pub send_letter: bool,
    pub attach_invoices: bool,
    pub dry_run: bool,
}

impl ExecutionOptions {
    pub fn from_level(level: &FollowupLevel) -> Self {
        Self {
            send_email: level.send_email,
            send_letter: level.send_letter,
            attach_invoices: false,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_attachments(mut self) -> Self {
        self.attach_invoices = true;
        self
    }
}

/// Who triggered the execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Unattended run: manual levels wait for an operator, same-day repeats
    /// are skipped and the wall-clock budget applies.
    Scheduled { deadline: Option<Instant> },
    /// Explicit operator action: no manual gate, no timeout.
    Operator,
}

impl ExecutionMode {
    fn expired(&self) -> bool {
        match self {
            ExecutionMode::Scheduled {
                deadline: Some(deadline),
            } => Instant::now() >= *deadline,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoActionNeeded,
    /// Overdue, but the next action date is still ahead.
    NotDueYet,
    /// The chosen level needs an operator.
    AwaitingOperator,
    AlreadySentToday,
    EmptyStatement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Skipped(SkipReason),
    /// Every enabled channel delivered.
    Sent,
    /// At least one channel delivered, at least one failed.
    Partial,
    /// Level without channels: only the state moved.
    Recorded,
    /// No channel delivered and at least one failure is transient.
    Retry(String),
    /// Every channel failed permanently.
    Undeliverable(String),
    DryRun,
    /// Wall-clock budget exhausted before dispatch.
    TimedOut,
}

impl ExecutionOutcome {
    pub fn advances_state(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Sent | ExecutionOutcome::Partial | ExecutionOutcome::Recorded
        )
    }

    /// Dispatch failure as an error kind, for callers reporting by error.
    pub fn dispatch_error(&self) -> Option<FollowupError> {
        match self {
            ExecutionOutcome::Retry(reason) => Some(FollowupError::DispatchTransient(reason.clone())),
            ExecutionOutcome::Undeliverable(reason) => {
                Some(FollowupError::DispatchPermanent(reason.clone()))
            }
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Skipped(_) => "skipped",
            ExecutionOutcome::Sent => "sent",
            ExecutionOutcome::Partial => "partial",
            ExecutionOutcome::Recorded => "recorded",
            ExecutionOutcome::Retry(_) => "retry",
            ExecutionOutcome::Undeliverable(_) => "undeliverable",
            ExecutionOutcome::DryRun => "dry_run",
            ExecutionOutcome::TimedOut => "timed_out",
        }
    }
}

/// The artifact handed to the dispatchers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedReminder {
    pub addressee: Contact,
    pub locale: String,
    pub description: String,
    pub statement: Statement,
    /// Dictionary passed to the template layer.
    pub context: Value,
    pub letter: Option<RenderedDocument>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub partner_id: PartnerId,
    pub outcome: ExecutionOutcome,
    pub level: Option<FollowupLevel>,
    pub channels: Vec<ChannelReport>,
    /// State after the run (before it, for dry runs).
    pub state: Option<PartnerFollowupState>,
    pub rendered: Option<RenderedReminder>,
}

impl ExecutionResult {
    fn skipped(
        partner_id: PartnerId,
        reason: SkipReason,
        level: Option<FollowupLevel>,
        state: Option<PartnerFollowupState>,
    ) -> Self {
        Self {
            partner_id,
            outcome: ExecutionOutcome::Skipped(reason),
            level,
            channels: Vec::new(),
            state,
            rendered: None,
        }
    }
}

/// Side-effect free evaluation of one partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub aging: AgingSummary,
    pub state: Option<PartnerFollowupState>,
    pub decision: Decision,
}

/// What is due and overdue for a partner, and what would happen next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowupReport {
    pub partner_id: PartnerId,
    pub as_of: NaiveDate,
    pub status: FollowupStatus,
    pub aging: AgingSummary,
    pub state: Option<PartnerFollowupState>,
    pub next_level: Option<FollowupLevel>,
    pub statement: Statement,
}

pub struct ReminderExecutor<L, R> {
    aggregator: AgingAggregator<L, R>,
    ports: FollowupPorts,
    statements: StatementRenderer,
}

impl<L, R> ReminderExecutor<L, R>
where
    L: Ledger,
    R: RateService,
{
    pub fn new(aggregator: AgingAggregator<L, R>, ports: FollowupPorts) -> Self {
        Self {
            aggregator,
            ports,
            statements: StatementRenderer,
        }
    }

    pub fn aggregator(&self) -> &AgingAggregator<L, R> {
        &self.aggregator
    }

    pub fn ports(&self) -> &FollowupPorts {
        &self.ports
    }

    /// Validated level table of `company_id`.
    pub fn level_table(&self, company_id: CompanyId) -> FollowupResult<LevelTable> {
        let levels = self.ports.levels.levels_for(company_id)?;
        LevelTable::new(company_id, levels)
            .map_err(|err| FollowupError::configuration(err.to_string()))
    }

    pub fn evaluate(
        &self,
        ctx: &EvaluationContext,
        partner_id: PartnerId,
    ) -> FollowupResult<Evaluation> {
        let table = self.level_table(ctx.company_id)?;
        let aging = self.aggregator.aggregate(
            ctx.company_id,
            partner_id,
            ctx.today,
            &ctx.target_currency,
        )?;
        let state = self.ports.states.load(partner_id)?;
        let decision = decide(&aging, state.as_ref(), &table, ctx.today)?;

        Ok(Evaluation {
            aging,
            state,
            decision,
        })
    }

    pub fn report(
        &self,
        ctx: &EvaluationContext,
        partner_id: PartnerId,
    ) -> FollowupResult<FollowupReport> {
        let table = self.level_table(ctx.company_id)?;
        let receivables = self.aggregator.receivables(
            ctx.company_id,
            partner_id,
            ctx.today,
            &ctx.target_currency,
        )?;
        let aging = receivables.aging();
        let state = self.ports.states.load(partner_id)?;
        let decision = decide(&aging, state.as_ref(), &table, ctx.today)?;

        Ok(FollowupReport {
            partner_id,
            as_of: ctx.today,
            status: decision.status(),
            next_level: decision.level().cloned(),
            statement: self.statements.render(&receivables),
            aging,
            state,
        })
    }

    /// Assign (or unassign) the follow-up responsible of a partner.
    pub fn assign_responsible(
        &self,
        partner_id: PartnerId,
        user_id: Option<UserId>,
    ) -> FollowupResult<PartnerFollowupState> {
        let mut assigned = None;
        self.ports.states.with_lock(partner_id, &mut |slot: &mut Option<PartnerFollowupState>| {
            let state = slot.get_or_insert_with(|| PartnerFollowupState::new(partner_id));
            state.execute(&FollowupCommand::AssignResponsible { user_id })?;
            assigned = Some(state.clone());
            Ok(())
        })?;
        assigned.ok_or_else(|| {
            FollowupError::StorageUnavailable(format!("no state returned for partner {partner_id}"))
        })
    }

    /// Apply `decision` to `partner_id`.
    ///
    /// The decision is recomputed under the partner lock; a stale one only
    /// shows up in the logs. `options` default to the chosen level's policy.
    pub fn execute(
        &self,
        ctx: &EvaluationContext,
        partner_id: PartnerId,
        decision: &Decision,
        options: Option<ExecutionOptions>,
        mode: ExecutionMode,
    ) -> FollowupResult<ExecutionResult> {
        let table = self.level_table(ctx.company_id)?;

        if options.is_some_and(|o| o.dry_run) {
            let mut snapshot = self.ports.states.load(partner_id)?;
            return self.run(
                ctx,
                partner_id,
                &table,
                decision,
                options,
                mode,
                &mut snapshot,
            );
        }

        let mut result = None;
        self.ports.states.with_lock(partner_id, &mut |slot: &mut Option<PartnerFollowupState>| {
            result = Some(self.run(ctx, partner_id, &table, decision, options, mode, slot)?);
            Ok(())
        })?;

        result.ok_or_else(|| {
            FollowupError::StorageUnavailable(format!(
                "state store returned without running partner {partner_id}"
            ))
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        ctx: &EvaluationContext,
        partner_id: PartnerId,
        table: &LevelTable,
        requested: &Decision,
        options: Option<ExecutionOptions>,
        mode: ExecutionMode,
        slot: &mut Option<PartnerFollowupState>,
    ) -> FollowupResult<ExecutionResult> {
        let dry_run = options.is_some_and(|o| o.dry_run);
        let receivables = self.aggregator.receivables(
            ctx.company_id,
            partner_id,
            ctx.today,
            &ctx.target_currency,
        )?;
        let aging = receivables.aging();
        let decision = decide(&aging, slot.as_ref(), table, ctx.today)?;

        if decision != *requested {
            debug!(
                partner_id = %partner_id,
                requested = ?requested.status(),
                current = ?decision.status(),
                "decision changed since evaluation"
            );
        }

        let level = match decision {
            Decision::NoActionNeeded { clear_state } => {
                if clear_state && !dry_run {
                    if let Some(state) = slot.as_mut() {
                        state.execute(&FollowupCommand::Clear { date: ctx.today })?;
                        info!(partner_id = %partner_id, "partner left follow-up cycle");
                    }
                }
                return Ok(ExecutionResult::skipped(
                    partner_id,
                    SkipReason::NoActionNeeded,
                    None,
                    slot.clone(),
                ));
            }
            Decision::WithOverdueInvoices { .. } => {
                return Ok(ExecutionResult::skipped(
                    partner_id,
                    SkipReason::NotDueYet,
                    None,
                    slot.clone(),
                ));
            }
            Decision::InNeedOfAction { level, .. } => level,
        };

        if let ExecutionMode::Scheduled { .. } = mode {
            if !level.is_automatic() {
                return Ok(ExecutionResult::skipped(
                    partner_id,
                    SkipReason::AwaitingOperator,
                    Some(level),
                    slot.clone(),
                ));
            }
            let already_sent = slot.as_ref().is_some_and(|s| {
                s.last_reminder_date == Some(ctx.today) && s.current_level == Some(level.id)
            });
            if already_sent {
                return Ok(ExecutionResult::skipped(
                    partner_id,
                    SkipReason::AlreadySentToday,
                    Some(level),
                    slot.clone(),
                ));
            }
        }

        let options = options.unwrap_or_else(|| ExecutionOptions::from_level(&level));
        let statement = self.statements.render(&receivables);
        if statement.is_empty() {
            return Ok(ExecutionResult::skipped(
                partner_id,
                SkipReason::EmptyStatement,
                Some(level),
                slot.clone(),
            ));
        }

        let rendered = self.render(ctx, &receivables, statement, &level, &options)?;

        if dry_run {
            return Ok(ExecutionResult {
                partner_id,
                outcome: ExecutionOutcome::DryRun,
                level: Some(level),
                channels: Vec::new(),
                state: slot.clone(),
                rendered: Some(rendered),
            });
        }

        if mode.expired() {
            return Ok(self.timed_out(partner_id, level, slot));
        }

        // A delivered reminder is always recorded, even past the budget.
        let channels = self.dispatch(&level, &options, &rendered);

        let outcome = classify(&channels);
        if outcome.advances_state() {
            let next_action_date = next_action_date(table, &level, ctx.today);
            let state = slot.get_or_insert_with(|| PartnerFollowupState::new(partner_id));
            state.execute(&FollowupCommand::RecordReminder(RecordReminder {
                level_id: level.id,
                date: ctx.today,
                next_action_date,
            }))?;
        }

        for report in channels.iter().filter(|c| !c.delivered()) {
            warn!(
                partner_id = %partner_id,
                level = %level.name,
                channel = ?report.channel,
                status = ?report.status,
                "reminder channel failed"
            );
        }

        if outcome.advances_state() || matches!(outcome, ExecutionOutcome::Undeliverable(_)) {
            self.post_chatter(ctx, partner_id, &level, &outcome, &channels, &rendered);
        }

        info!(
            company_id = %ctx.company_id,
            partner_id = %partner_id,
            level = %level.name,
            outcome = outcome.label(),
            total_overdue = %aging.total_overdue,
            "follow-up executed"
        );

        Ok(ExecutionResult {
            partner_id,
            outcome,
            level: Some(level),
            channels,
            state: slot.clone(),
            rendered: Some(rendered),
        })
    }

    fn render(
        &self,
        ctx: &EvaluationContext,
        receivables: &PartnerReceivables,
        statement: Statement,
        level: &FollowupLevel,
        options: &ExecutionOptions,
    ) -> FollowupResult<RenderedReminder> {
        if options.send_email && level.mail_template.is_none() {
            return Err(FollowupError::configuration(format!(
                "level '{}' has no mail template",
                level.name
            )));
        }

        let contacts = self
            .ports
            .directory
            .get_followup_contacts(receivables.partner_id)?;
        let addressee = contacts.addressee().clone();
        let locale = addressee
            .language
            .clone()
            .unwrap_or_else(|| ctx.locale.clone());
        let description = level.description_for(&locale).to_string();

        let attachments = if options.attach_invoices {
            statement
                .lines
                .iter()
                .filter(|l| l.document_kind == DocumentKind::Invoice)
                .map(|l| Attachment {
                    document_ref: l.document_ref.clone(),
                    document_kind: l.document_kind,
                })
                .collect()
        } else {
            Vec::new()
        };

        let context = template_context(ctx, level, &addressee, &locale, &description, &statement)?;

        let letter = if options.send_letter {
            let template = level.print_template.as_ref().ok_or_else(|| {
                FollowupError::configuration(format!(
                    "level '{}' has no print template",
                    level.name
                ))
            })?;
            Some(self.ports.documents.render(template, &context)?)
        } else {
            None
        };

        Ok(RenderedReminder {
            addressee,
            locale,
            description,
            statement,
            context,
            letter,
            attachments,
        })
    }

    fn dispatch(
        &self,
        level: &FollowupLevel,
        options: &ExecutionOptions,
        rendered: &RenderedReminder,
    ) -> Vec<ChannelReport> {
        let mut reports = Vec::with_capacity(2);

        if options.send_email {
            let status = match (level.mail_template.as_ref(), rendered.addressee.email()) {
                (Some(template), Some(_)) => self.send_mail(template, rendered),
                (None, _) => ChannelStatus::PermanentFailure("no mail template".to_string()),
                (_, None) => ChannelStatus::PermanentFailure(format!(
                    "{} has no email address",
                    rendered.addressee.name
                )),
            };
            reports.push(ChannelReport {
                channel: Channel::Email,
                status,
                reference: None,
            });
        }

        if options.send_letter {
            let (status, reference) =
                match (rendered.letter.as_ref(), rendered.addressee.postal_address()) {
                    (Some(document), Some(address)) => {
                        match self.ports.print.enqueue(document, address) {
                            Ok(handle) => (ChannelStatus::Delivered, Some(handle.0)),
                            Err(DispatchError::Transient(reason)) => {
                                (ChannelStatus::TransientFailure(reason), None)
                            }
                            Err(DispatchError::Permanent(reason)) => {
                                (ChannelStatus::PermanentFailure(reason), None)
                            }
                        }
                    }
                    (None, _) => (
                        ChannelStatus::PermanentFailure("no rendered letter".to_string()),
                        None,
                    ),
                    (_, None) => (
                        ChannelStatus::PermanentFailure(format!(
                            "{} has no postal address",
                            rendered.addressee.name
                        )),
                        None,
                    ),
                };
            reports.push(ChannelReport {
                channel: Channel::Letter,
                status,
                reference,
            });
        }

        reports
    }

    fn send_mail(&self, template: &TemplateRef, rendered: &RenderedReminder) -> ChannelStatus {
        match self.ports.mail.send(
            template,
            &rendered.addressee,
            &rendered.context,
            &rendered.attachments,
        ) {
            MailOutcome::Ok => ChannelStatus::Delivered,
            MailOutcome::TransientError(reason) => ChannelStatus::TransientFailure(reason),
            MailOutcome::PermanentError(reason) => ChannelStatus::PermanentFailure(reason),
        }
    }

    fn timed_out(
        &self,
        partner_id: PartnerId,
        level: FollowupLevel,
        slot: &Option<PartnerFollowupState>,
    ) -> ExecutionResult {
        warn!(
            partner_id = %partner_id,
            level = %level.name,
            "partner budget exhausted, state not advanced"
        );
        ExecutionResult {
            partner_id,
            outcome: ExecutionOutcome::TimedOut,
            level: Some(level),
            channels: Vec::new(),
            state: slot.clone(),
            rendered: None,
        }
    }

    fn post_chatter(
        &self,
        ctx: &EvaluationContext,
        partner_id: PartnerId,
        level: &FollowupLevel,
        outcome: &ExecutionOutcome,
        channels: &[ChannelReport],
        rendered: &RenderedReminder,
    ) {
        let sent: Vec<&str> = channels
            .iter()
            .filter(|c| c.delivered())
            .map(|c| match c.channel {
                Channel::Email => "email",
                Channel::Letter => "letter",
            })
            .collect();
        let body = if sent.is_empty() {
            format!(
                "Follow-up '{}' could not be delivered to {}",
                level.name, rendered.addressee.name
            )
        } else {
            format!(
                "Follow-up '{}' sent to {} by {} (total due {} {}, overdue {} {})",
                level.name,
                rendered.addressee.name,
                sent.join(" and "),
                rendered.statement.total_due,
                rendered.statement.currency,
                rendered.statement.total_overdue,
                rendered.statement.currency,
            )
        };
        let metadata = json!({
            "company_id": ctx.company_id,
            "actor_id": ctx.actor_id,
            "level_id": level.id,
            "level_sequence": level.sequence,
            "outcome": outcome.label(),
            "channels": channels,
            "date": ctx.today,
        });
        self.ports.chatter.post(partner_id, &body, &metadata);
    }
}

/// Classify per-channel results into an execution outcome.
fn classify(channels: &[ChannelReport]) -> ExecutionOutcome {
    if channels.is_empty() {
        return ExecutionOutcome::Recorded;
    }

    let delivered = channels.iter().filter(|c| c.delivered()).count();
    if delivered == channels.len() {
        return ExecutionOutcome::Sent;
    }
    if delivered > 0 {
        return ExecutionOutcome::Partial;
    }

    let reasons = channels
        .iter()
        .filter_map(|c| match &c.status {
            ChannelStatus::TransientFailure(r) | ChannelStatus::PermanentFailure(r) => {
                Some(format!("{:?}: {r}", c.channel))
            }
            ChannelStatus::Delivered => None,
        })
        .collect::<Vec<_>>()
        .join("; ");

    let any_transient = channels
        .iter()
        .any(|c| matches!(c.status, ChannelStatus::TransientFailure(_)));
    if any_transient {
        ExecutionOutcome::Retry(reasons)
    } else {
        ExecutionOutcome::Undeliverable(reasons)
    }
}

/// `today` plus the delay of the following level, or of `level` when terminal.
fn next_action_date(table: &LevelTable, level: &FollowupLevel, today: NaiveDate) -> NaiveDate {
    let delay = table
        .level_after(level)
        .map(|next| next.delay_days)
        .unwrap_or(level.delay_days);
    today + Duration::days(i64::from(delay))
}

fn template_context(
    ctx: &EvaluationContext,
    level: &FollowupLevel,
    addressee: &Contact,
    locale: &str,
    description: &str,
    statement: &Statement,
) -> FollowupResult<Value> {
    let rows = serde_json::to_value(statement.rows())
        .map_err(|err| FollowupError::render(format!("statement context: {err}")))?;
    let total = |amount: Decimal| amount.to_string();

    Ok(json!({
        "company_id": ctx.company_id,
        "partner_id": statement.partner_id,
        "date": ctx.today,
        "locale": locale,
        "level": {
            "id": level.id,
            "name": level.name,
            "sequence": level.sequence,
            "description": description,
        },
        "addressee": {
            "name": addressee.name,
            "email": addressee.email(),
            "postal_address": addressee.postal_address(),
        },
        "currency": statement.currency.code(),
        "lines": rows,
        "total_due": total(statement.total_due),
        "total_overdue": total(statement.total_overdue),
    }))
}
