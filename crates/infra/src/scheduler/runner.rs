//! Scheduler loop and worker pool.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::Instant;

use chrono::NaiveDate;
use tracing::{debug, info, info_span, warn};

use dunning_core::{Clock, LevelId, PartnerId};
use dunning_followup::{
    Decision, EvaluationContext, ExecutionMode, FollowupError, FollowupStateStore,
    ReminderExecutor,
};
use dunning_receivables::{Ledger, RateService};

use crate::config::{CompanyProfile, SchedulerConfig};

use super::ticks::{Tick, TickSource};
use super::types::{CompanyRun, PartnerOutcome, PartnerReport, RunSummary, SchedulerStats};

/// Handle to control a spawned scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl SchedulerHandle {
    /// Request graceful shutdown; the current run finishes first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct Scheduler<L, R, C> {
    executor: Arc<ReminderExecutor<L, R>>,
    clock: C,
    config: SchedulerConfig,
}

impl<L, R, C> Scheduler<L, R, C>
where
    L: Ledger + 'static,
    R: RateService + 'static,
    C: Clock + 'static,
{
    pub fn new(executor: Arc<ReminderExecutor<L, R>>, clock: C, config: SchedulerConfig) -> Self {
        Self {
            executor,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// One pass over every configured company.
    pub fn run_once(&self) -> RunSummary {
        let today = self.clock.today();
        let companies = self
            .config
            .companies
            .iter()
            .map(|profile| self.run_company(profile, today))
            .collect();

        RunSummary {
            date: today,
            companies,
        }
    }

    /// Run in a background thread, once per tick.
    pub fn spawn(self, mut ticks: impl TickSource + 'static) -> std::io::Result<SchedulerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name("followup-scheduler".to_string())
            .spawn(move || {
                info!(companies = self.config.companies.len(), "follow-up scheduler started");
                let started = Instant::now();

                while ticks.next_tick(&shutdown_rx) == Tick::Run {
                    let summary = self.run_once();
                    let mut s = stats_clone.lock().unwrap_or_else(PoisonError::into_inner);
                    s.ticks += 1;
                    s.totals.merge(&summary.totals());
                    s.last_summary = Some(summary);
                    s.uptime_secs = started.elapsed().as_secs();
                }

                info!("follow-up scheduler stopped");
            })?;

        Ok(SchedulerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    fn run_company(&self, profile: &CompanyProfile, today: NaiveDate) -> CompanyRun {
        let company_id = profile.company_id;

        let table = match self.executor.level_table(company_id) {
            Ok(table) => table,
            Err(err) => {
                warn!(company_id = %company_id, error = %err, "skipping company");
                return CompanyRun::skipped(company_id, err.to_string());
            }
        };

        let mut candidates = match self.executor.aggregator().candidates(company_id, today) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(company_id = %company_id, error = %err, "candidate lookup failed");
                return CompanyRun::skipped(company_id, FollowupError::from(err).to_string());
            }
        };

        // Partners still in a cycle are visited too, so a paid-off one is cleared.
        let level_ids: Vec<LevelId> = table.levels().iter().map(|l| l.id).collect();
        match self.executor.ports().states.partners_in_cycle(&level_ids) {
            Ok(in_cycle) => candidates.extend(in_cycle),
            Err(err) => {
                warn!(company_id = %company_id, error = %err, "in-cycle lookup failed");
                return CompanyRun::skipped(company_id, FollowupError::from(err).to_string());
            }
        }
        candidates.sort();
        candidates.dedup();

        let ctx = EvaluationContext::new(company_id, today, profile.currency.clone())
            .with_locale(profile.locale.clone());

        let mut run = CompanyRun::new(company_id);
        for batch in candidates.chunks(self.config.batch_size.max(1)) {
            let mut reports = self.run_batch(&ctx, batch);
            reports.sort_by_key(|r| r.partner_id);
            for report in &reports {
                run.counters.record(report.outcome);
            }
            run.partners.extend(reports);
        }

        let c = &run.counters;
        info!(
            company_id = %company_id,
            date = %today,
            candidates = candidates.len(),
            sent = c.sent,
            partial = c.partial,
            retry = c.retry,
            skipped = c.skipped,
            awaiting_operator = c.awaiting_operator,
            no_action = c.no_action,
            failed = c.failed,
            timed_out = c.timed_out,
            "follow-up run finished"
        );
        run
    }

    /// Drain `batch` with the worker pool.
    fn run_batch(&self, ctx: &EvaluationContext, batch: &[PartnerId]) -> Vec<PartnerReport> {
        let queue = Mutex::new(batch.iter().copied().collect::<VecDeque<_>>());
        let reports = Mutex::new(Vec::with_capacity(batch.len()));
        let workers = self.config.workers.clamp(1, batch.len().max(1));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let next = queue
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .pop_front();
                        let Some(partner_id) = next else { break };
                        let report = self.process_partner(ctx, partner_id);
                        reports
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(report);
                    }
                });
            }
        });

        reports.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn process_partner(&self, ctx: &EvaluationContext, partner_id: PartnerId) -> PartnerReport {
        let span = info_span!(
            "followup.partner",
            company_id = %ctx.company_id,
            partner_id = %partner_id
        );
        let _entered = span.enter();

        let deadline = self.config.partner_budget.map(|budget| Instant::now() + budget);
        let report = |outcome: PartnerOutcome, level: Option<String>, detail: Option<String>| PartnerReport {
            partner_id,
            outcome,
            level,
            detail,
        };

        let evaluation = match self.executor.evaluate(ctx, partner_id) {
            Ok(evaluation) => evaluation,
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "evaluation failed");
                return report(PartnerOutcome::from_error(&err), None, Some(err.to_string()));
            }
        };

        match &evaluation.decision {
            Decision::NoActionNeeded { clear_state: false }
            | Decision::WithOverdueInvoices { .. } => {
                debug!(status = ?evaluation.decision.status(), "nothing to do");
                return report(PartnerOutcome::NoAction, None, None);
            }
            Decision::InNeedOfAction { level, .. } if !level.is_automatic() => {
                debug!(level = %level.name, "level awaits an operator");
                return report(
                    PartnerOutcome::AwaitingOperator,
                    Some(level.name.clone()),
                    None,
                );
            }
            _ => {}
        }

        match self.executor.execute(
            ctx,
            partner_id,
            &evaluation.decision,
            None,
            ExecutionMode::Scheduled { deadline },
        ) {
            Ok(result) => {
                let outcome = PartnerOutcome::from_execution(&result.outcome);
                let detail = result.outcome.dispatch_error().map(|err| {
                    warn!(error = %err, kind = err.kind(), "reminder not delivered");
                    err.to_string()
                });
                debug!(outcome = ?outcome, "partner processed");
                report(outcome, result.level.map(|l| l.name), detail)
            }
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "execution failed");
                report(PartnerOutcome::from_error(&err), None, Some(err.to_string()))
            }
        }
    }
}
