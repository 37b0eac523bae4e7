//! End-to-end tests of the follow-up pipeline.
//!
//! Ledger → Aging → Decider → Executor → Dispatchers → State, driven by the
//! scheduler with a fixed clock, against the in-memory adapters.
//!
//! Verifies:
//! - The literal scenarios (single overdue invoice, partial payment, credit
//!   note, level jump, blocked item, manual level)
//! - Same-day idempotence and retry semantics
//! - Reminder ordering over a long simulated period

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use dunning_core::{CompanyId, FixedClock, PartnerId, UserId};
    use dunning_followup::{
        Contact, ContactKind, DispatchError, EvaluationContext, ExecutionMode, ExecutionOptions,
        ExecutionOutcome, FollowupError, FollowupLevel, FollowupPorts, FollowupStateStore,
        FollowupStatus, LevelStore, MailOutcome, PartnerContacts, PartnerFollowupState,
        ReminderExecutor, TemplateRef,
    };
    use dunning_receivables::{
        AgingAggregator, Currency, DocumentKind, InvoiceItem, ItemId, Reconciliation,
    };

    use crate::config::{CompanyProfile, SchedulerConfig};
    use crate::level_cache::CachedLevelStore;
    use crate::memory::{
        FixedRates, InMemoryDirectory, InMemoryLedger, InMemoryLevelStore, InMemoryStateStore,
        JsonDocumentRenderer, MemoryChatter, RecordingMailDispatcher, RecordingPrintDispatcher,
    };
    use crate::scheduler::{ManualTicks, PartnerOutcome, RunSummary, Scheduler};

    type Executor = ReminderExecutor<Arc<InMemoryLedger>, FixedRates>;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn today() -> NaiveDate {
        d(2016, 1, 15)
    }

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn eur() -> Currency {
        Currency::new("EUR").unwrap()
    }

    struct Fixture {
        company: CompanyId,
        ledger: Arc<InMemoryLedger>,
        directory: Arc<InMemoryDirectory>,
        mail: Arc<RecordingMailDispatcher>,
        print: Arc<RecordingPrintDispatcher>,
        documents: Arc<JsonDocumentRenderer>,
        chatter: Arc<MemoryChatter>,
        levels: Arc<CachedLevelStore<InMemoryLevelStore>>,
        states: Arc<InMemoryStateStore>,
        executor: Arc<Executor>,
        l1: FollowupLevel,
        l2: FollowupLevel,
        l3: FollowupLevel,
        next_item: AtomicU64,
    }

    impl Fixture {
        /// L1 delay=14 email, L2 delay=30 email, L3 delay=60 email+letter.
        fn new() -> Self {
            Self::with_levels(|l1, l2, l3| (l1, l2, l3))
        }

        fn with_levels(
            adjust: impl FnOnce(
                FollowupLevel,
                FollowupLevel,
                FollowupLevel,
            ) -> (FollowupLevel, FollowupLevel, FollowupLevel),
        ) -> Self {
            dunning_observability::init();
            let company = CompanyId::new();
            let (l1, l2, l3) = adjust(
                FollowupLevel::new(company, 1, 14, "First reminder")
                    .with_email(TemplateRef::new("mail.l1"))
                    .with_description("Our records show an overdue balance."),
                FollowupLevel::new(company, 2, 30, "Second reminder")
                    .with_email(TemplateRef::new("mail.l2")),
                FollowupLevel::new(company, 3, 60, "Final notice")
                    .with_email(TemplateRef::new("mail.l3"))
                    .with_letter(TemplateRef::new("print.l3")),
            );

            let ledger = Arc::new(InMemoryLedger::new());
            let rates = FixedRates::new().with_rate(eur(), usd(), d(2015, 1, 1), Decimal::new(11, 1));
            let directory = Arc::new(InMemoryDirectory::new());
            let mail = Arc::new(RecordingMailDispatcher::new());
            let print = Arc::new(RecordingPrintDispatcher::new());
            let documents = Arc::new(JsonDocumentRenderer::new());
            let chatter = Arc::new(MemoryChatter::new());
            let levels = Arc::new(CachedLevelStore::new(InMemoryLevelStore::new()));
            let states = Arc::new(InMemoryStateStore::new());

            levels
                .save_levels(company, &[l1.clone(), l2.clone(), l3.clone()])
                .unwrap();

            let ports = FollowupPorts {
                directory: directory.clone(),
                mail: mail.clone(),
                print: print.clone(),
                documents: documents.clone(),
                chatter: chatter.clone(),
                levels: levels.clone(),
                states: states.clone(),
            };
            let executor = Arc::new(ReminderExecutor::new(
                AgingAggregator::new(ledger.clone(), rates),
                ports,
            ));

            Self {
                company,
                ledger,
                directory,
                mail,
                print,
                documents,
                chatter,
                levels,
                states,
                executor,
                l1,
                l2,
                l3,
                next_item: AtomicU64::new(1),
            }
        }

        /// Partner with a follow-up contact reachable by email and post.
        fn partner(&self) -> PartnerId {
            self.partner_with(
                Contact::new(ContactKind::Followup, "Accounts Payable")
                    .with_email("ap@customer.test")
                    .with_postal_address("1 Main Street, Springfield"),
            )
        }

        fn partner_with(&self, contact: Contact) -> PartnerId {
            let partner = PartnerId::new();
            let mut contacts = PartnerContacts::new(Contact::new(ContactKind::Default, "Customer"));
            contacts.contacts.push(contact);
            self.directory.insert(partner, contacts);
            partner
        }

        fn item(
            &self,
            partner: PartnerId,
            kind: DocumentKind,
            date: NaiveDate,
            due: NaiveDate,
            residual: i64,
        ) -> InvoiceItem {
            let id = self.next_item.fetch_add(1, Ordering::SeqCst);
            InvoiceItem {
                id: ItemId(id),
                partner_id: partner,
                document_ref: format!("DOC/{id:04}"),
                document_kind: kind,
                currency: Some(usd()),
                date,
                date_due: Some(due),
                amount_residual: Decimal::from(residual),
                is_reconciled: false,
                is_blocked: false,
                reconciliations: Vec::new(),
                expected_pay_date: None,
                internal_note: None,
            }
        }

        fn post(&self, item: InvoiceItem) -> ItemId {
            let id = item.id;
            self.ledger.post(self.company, item);
            id
        }

        fn invoice(&self, partner: PartnerId, date: NaiveDate, due: NaiveDate, residual: i64) -> ItemId {
            self.post(self.item(partner, DocumentKind::Invoice, date, due, residual))
        }

        /// Reconcile the whole residual of `item` on `date`.
        fn pay_in_full(&self, item: ItemId, date: NaiveDate) {
            let found = self.ledger.update(self.company, item, |item| {
                item.reconciliations.push(Reconciliation {
                    date,
                    amount: item.amount_residual,
                });
                item.amount_residual = Decimal::ZERO;
                item.is_reconciled = true;
            });
            assert!(found);
        }

        fn ctx(&self) -> EvaluationContext {
            self.ctx_on(today())
        }

        fn ctx_on(&self, date: NaiveDate) -> EvaluationContext {
            EvaluationContext::new(self.company, date, usd())
        }

        fn config(&self) -> SchedulerConfig {
            SchedulerConfig::default()
                .with_workers(2)
                .with_company(CompanyProfile::new(self.company, usd()))
        }

        fn run_on(&self, date: NaiveDate) -> RunSummary {
            Scheduler::new(self.executor.clone(), FixedClock(date), self.config()).run_once()
        }

        fn run(&self) -> RunSummary {
            self.run_on(today())
        }

        fn state(&self, partner: PartnerId) -> Option<PartnerFollowupState> {
            self.states.get(partner)
        }

        fn seed_state(&self, partner: PartnerId, level: &FollowupLevel, last: NaiveDate, next: NaiveDate) {
            let mut state = PartnerFollowupState::new(partner);
            state.current_level = Some(level.id);
            state.last_reminder_date = Some(last);
            state.next_action_date = Some(next);
            self.states.insert(state);
        }
    }

    fn outcome(summary: &RunSummary, company: CompanyId, partner: PartnerId) -> PartnerOutcome {
        summary
            .company(company)
            .and_then(|c| c.outcome_of(partner))
            .unwrap()
    }

    #[test]
    fn single_overdue_invoice_gets_first_reminder() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);

        let report = f.executor.report(&f.ctx(), partner).unwrap();
        assert_eq!(report.status, FollowupStatus::InNeedOfAction);
        assert_eq!(report.next_level.as_ref().unwrap().id, f.l1.id);
        assert_eq!(report.statement.lines.len(), 1);
        assert_eq!(report.statement.lines[0].amount, Decimal::from(300));
        assert_eq!(report.statement.total_due, Decimal::from(300));
        assert_eq!(report.statement.total_overdue, Decimal::from(300));

        let summary = f.run();
        assert_eq!(outcome(&summary, f.company, partner), PartnerOutcome::Sent);

        let mails = f.mail.delivered();
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0].template, TemplateRef::new("mail.l1"));
        assert_eq!(mails[0].recipient.name, "Accounts Payable");
        assert!(f.print.jobs().is_empty());

        let state = f.state(partner).unwrap();
        assert_eq!(state.current_level, Some(f.l1.id));
        assert_eq!(state.last_reminder_date, Some(today()));
        // Next level (L2) delay.
        assert_eq!(state.next_action_date, Some(d(2016, 2, 14)));

        let posts = f.chatter.posts_for(partner);
        assert_eq!(posts.len(), 1);
        assert!(posts[0].body.contains("First reminder"));
    }

    #[test]
    fn partially_paid_invoice_shows_residual() {
        let f = Fixture::new();
        let partner = f.partner();
        let mut item = f.item(partner, DocumentKind::Invoice, d(2016, 1, 1), d(2016, 1, 1), 300);
        item.reconciliations.push(Reconciliation {
            date: d(2016, 1, 1),
            amount: Decimal::from(200),
        });
        f.post(item);

        let report = f.executor.report(&f.ctx(), partner).unwrap();
        assert_eq!(report.statement.lines.len(), 1);
        assert_eq!(report.statement.lines[0].amount, Decimal::from(300));
        assert_eq!(report.statement.total_due, Decimal::from(300));
    }

    #[test]
    fn credit_note_below_zero_blocks_reminders() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);
        f.post(f.item(partner, DocumentKind::Refund, d(2016, 1, 15), d(2016, 1, 15), -400));

        let evaluation = f.executor.evaluate(&f.ctx(), partner).unwrap();
        assert_eq!(evaluation.aging.total_due, Decimal::from(-100));
        assert_eq!(evaluation.decision.status(), FollowupStatus::NoActionNeeded);

        let summary = f.run();
        assert_eq!(outcome(&summary, f.company, partner), PartnerOutcome::NoAction);
        assert!(f.mail.attempts().is_empty());
    }

    #[test]
    fn aging_past_several_levels_jumps_to_highest() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2015, 11, 15), d(2015, 11, 15), 500);
        f.seed_state(partner, &f.l1, d(2016, 1, 1), d(2016, 1, 15));

        let evaluation = f.executor.evaluate(&f.ctx(), partner).unwrap();
        assert_eq!(evaluation.aging.most_overdue_days, 61);
        assert_eq!(evaluation.decision.level().unwrap().id, f.l3.id);

        let summary = f.run();
        assert_eq!(outcome(&summary, f.company, partner), PartnerOutcome::Sent);

        let mails = f.mail.delivered();
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0].template, TemplateRef::new("mail.l3"));
        let jobs = f.print.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].address, "1 Main Street, Springfield");

        let state = f.state(partner).unwrap();
        assert_eq!(state.current_level, Some(f.l3.id));
        // Terminal level: its own delay.
        assert_eq!(state.next_action_date, Some(d(2016, 3, 15)));
    }

    #[test]
    fn blocked_item_is_shown_but_not_counted() {
        let f = Fixture::new();
        let partner = f.partner();
        let mut blocked = f.item(partner, DocumentKind::Invoice, d(2016, 1, 1), d(2016, 1, 1), 200);
        blocked.is_blocked = true;
        f.post(blocked);
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 100);

        let report = f.executor.report(&f.ctx(), partner).unwrap();
        assert_eq!(report.aging.total_due, Decimal::from(100));
        assert_eq!(report.statement.lines.len(), 2);
        assert_eq!(report.statement.lines.iter().filter(|l| l.blocked).count(), 1);
        assert_eq!(report.statement.total_due, Decimal::from(100));
        assert_eq!(report.statement.counted_amount(), Decimal::from(100));
    }

    #[test]
    fn manual_level_waits_for_operator() {
        let f = Fixture::with_levels(|l1, l2, l3| (l1, l2.manual(), l3));
        let partner = f.partner();
        f.invoice(partner, d(2015, 12, 15), d(2015, 12, 15), 300);

        let summary = f.run();
        assert_eq!(
            outcome(&summary, f.company, partner),
            PartnerOutcome::AwaitingOperator
        );
        assert!(f.mail.attempts().is_empty());
        assert!(f.state(partner).is_none());

        let operator = UserId::new();
        let ctx = f.ctx().with_actor(operator);
        let evaluation = f.executor.evaluate(&ctx, partner).unwrap();
        assert_eq!(evaluation.decision.level().unwrap().id, f.l2.id);

        let result = f
            .executor
            .execute(&ctx, partner, &evaluation.decision, None, ExecutionMode::Operator)
            .unwrap();
        assert_eq!(result.outcome, ExecutionOutcome::Sent);
        assert_eq!(f.mail.delivered().len(), 1);
        assert_eq!(f.state(partner).unwrap().current_level, Some(f.l2.id));

        let posts = f.chatter.posts_for(partner);
        assert_eq!(posts[0].metadata["actor_id"], serde_json::json!(operator));
    }

    #[test]
    fn second_run_on_same_day_sends_nothing() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);

        f.run();
        let second = f.run();
        assert_eq!(outcome(&second, f.company, partner), PartnerOutcome::NoAction);
        assert_eq!(f.mail.delivered().len(), 1);

        // Even with the next action date pulled back to today, the guard holds.
        let mut state = f.state(partner).unwrap();
        state.next_action_date = Some(today());
        f.states.insert(state);

        let third = f.run();
        assert_eq!(outcome(&third, f.company, partner), PartnerOutcome::Skipped);
        assert_eq!(f.mail.delivered().len(), 1);
    }

    #[test]
    fn transient_failure_retries_without_advancing() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);
        f.mail.push_outcome(MailOutcome::TransientError("smtp timeout".into()));

        let first = f.run();
        assert_eq!(outcome(&first, f.company, partner), PartnerOutcome::Retry);
        assert!(f.state(partner).is_none());
        assert!(f.chatter.posts().is_empty());

        let second = f.run();
        assert_eq!(outcome(&second, f.company, partner), PartnerOutcome::Sent);
        assert_eq!(f.state(partner).unwrap().current_level, Some(f.l1.id));
        assert_eq!(f.mail.attempts().len(), 2);
    }

    #[test]
    fn failed_letter_still_advances_on_delivered_email() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2015, 11, 1), d(2015, 11, 1), 500);
        f.print
            .push_failure(DispatchError::Permanent("printer rejected job".into()));

        let summary = f.run();
        assert_eq!(outcome(&summary, f.company, partner), PartnerOutcome::Partial);
        assert_eq!(f.state(partner).unwrap().current_level, Some(f.l3.id));
        assert_eq!(f.chatter.posts_for(partner).len(), 1);
    }

    #[test]
    fn missing_email_is_undeliverable() {
        let f = Fixture::new();
        let partner = f.partner_with(Contact::new(ContactKind::Invoice, "Billing"));
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);

        let summary = f.run();
        assert_eq!(outcome(&summary, f.company, partner), PartnerOutcome::Failed);
        assert!(f.mail.attempts().is_empty());
        assert!(f.state(partner).is_none());
        assert!(f.chatter.posts_for(partner)[0].body.contains("could not be delivered"));

        let report = summary
            .company(f.company)
            .and_then(|c| c.partners.iter().find(|r| r.partner_id == partner))
            .unwrap();
        assert!(
            report
                .detail
                .as_deref()
                .unwrap()
                .starts_with("permanent dispatch failure")
        );
    }

    #[test]
    fn paid_off_partner_leaves_the_cycle() {
        let f = Fixture::new();
        let partner = f.partner();
        let invoice = f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);
        f.run();
        assert!(f.state(partner).unwrap().is_in_cycle());

        f.pay_in_full(invoice, d(2016, 1, 20));
        let summary = f.run_on(d(2016, 2, 1));

        assert_eq!(outcome(&summary, f.company, partner), PartnerOutcome::NoAction);
        let state = f.state(partner).unwrap();
        assert!(!state.is_in_cycle());
        assert_eq!(state.next_action_date, None);
        assert_eq!(f.mail.delivered().len(), 1);
    }

    #[test]
    fn paying_the_oldest_invoice_keeps_the_schedule() {
        let f = Fixture::new();
        let partner = f.partner();
        let old = f.invoice(partner, d(2015, 11, 1), d(2015, 11, 1), 500);
        f.invoice(partner, d(2016, 1, 10), d(2016, 1, 18), 100);

        f.run();
        assert_eq!(f.state(partner).unwrap().current_level, Some(f.l3.id));
        assert_eq!(f.state(partner).unwrap().next_action_date, Some(d(2016, 3, 15)));

        f.pay_in_full(old, d(2016, 1, 20));
        let summary = f.run_on(d(2016, 2, 1));
        assert_eq!(outcome(&summary, f.company, partner), PartnerOutcome::NoAction);
        assert_eq!(f.mail.delivered().len(), 1);
        assert_eq!(f.state(partner).unwrap().current_level, Some(f.l3.id));

        // The younger invoice reaches the terminal delay: L3 again, never L1.
        let summary = f.run_on(d(2016, 3, 18));
        assert_eq!(outcome(&summary, f.company, partner), PartnerOutcome::Sent);
        let mails = f.mail.delivered();
        assert_eq!(mails.len(), 2);
        assert_eq!(mails[1].template, TemplateRef::new("mail.l3"));
    }

    #[test]
    fn render_failure_is_surfaced_without_state_change() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2015, 11, 1), d(2015, 11, 1), 500);
        f.documents.break_template(TemplateRef::new("print.l3"));

        let evaluation = f.executor.evaluate(&f.ctx(), partner).unwrap();
        let err = f
            .executor
            .execute(&f.ctx(), partner, &evaluation.decision, None, ExecutionMode::Operator)
            .unwrap_err();

        assert!(matches!(err, FollowupError::RenderFailure(_)));
        assert!(f.mail.attempts().is_empty());
        assert!(f.state(partner).is_none());
    }

    #[test]
    fn dry_run_renders_without_side_effects() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2015, 11, 1), d(2015, 11, 1), 500);

        let evaluation = f.executor.evaluate(&f.ctx(), partner).unwrap();
        let options = ExecutionOptions::from_level(&f.l3).dry_run();
        let result = f
            .executor
            .execute(&f.ctx(), partner, &evaluation.decision, Some(options), ExecutionMode::Operator)
            .unwrap();

        assert_eq!(result.outcome, ExecutionOutcome::DryRun);
        let rendered = result.rendered.unwrap();
        assert_eq!(rendered.statement.total_due, Decimal::from(500));
        assert!(rendered.letter.is_some());
        let total: Decimal = rendered.context["total_due"].as_str().unwrap().parse().unwrap();
        assert_eq!(total, Decimal::from(500));
        assert!(f.mail.attempts().is_empty());
        assert!(f.print.jobs().is_empty());
        assert!(f.state(partner).is_none());
    }

    #[test]
    fn operator_can_attach_invoices() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);

        let evaluation = f.executor.evaluate(&f.ctx(), partner).unwrap();
        let options = ExecutionOptions::from_level(&f.l1).with_attachments();
        f.executor
            .execute(&f.ctx(), partner, &evaluation.decision, Some(options), ExecutionMode::Operator)
            .unwrap();

        let mails = f.mail.delivered();
        assert_eq!(mails[0].attachments.len(), 1);
        assert_eq!(mails[0].attachments[0].document_ref, "DOC/0001");
    }

    #[test]
    fn description_follows_addressee_language() {
        let f = Fixture::with_levels(|l1, l2, l3| {
            (l1.with_translation("fr_FR", "Nos livres indiquent un solde en retard."), l2, l3)
        });
        let partner = f.partner_with(
            Contact::new(ContactKind::Followup, "Comptabilité")
                .with_email("compta@client.test")
                .with_language("fr_FR"),
        );
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);

        f.run();
        let mails = f.mail.delivered();
        assert_eq!(mails[0].context["locale"], "fr_FR");
        assert_eq!(
            mails[0].context["level"]["description"],
            "Nos livres indiquent un solde en retard."
        );
    }

    #[test]
    fn foreign_currency_items_are_converted() {
        let f = Fixture::new();
        let partner = f.partner();
        let mut item = f.item(partner, DocumentKind::Invoice, d(2016, 1, 1), d(2016, 1, 1), 100);
        item.currency = Some(eur());
        f.post(item);

        let report = f.executor.report(&f.ctx(), partner).unwrap();
        assert_eq!(report.statement.total_due, Decimal::new(11000, 2));
        assert_eq!(report.statement.lines[0].original_amount, Decimal::from(100));
        assert_eq!(report.statement.lines[0].original_currency, eur());
    }

    #[test]
    fn negative_balance_clears_follow_up_state() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);
        f.run();
        assert!(f.state(partner).unwrap().is_in_cycle());

        f.post(f.item(partner, DocumentKind::Refund, d(2016, 1, 20), d(2016, 1, 20), -500));
        f.run_on(d(2016, 2, 20));

        let state = f.state(partner).unwrap();
        assert!(!state.is_in_cycle());
        assert_eq!(state.last_reminder_date, Some(today()));
        assert_eq!(f.mail.delivered().len(), 1);
    }

    #[test]
    fn responsible_survives_reminders() {
        let f = Fixture::new();
        let partner = f.partner();
        let user = UserId::new();
        f.executor.assign_responsible(partner, Some(user)).unwrap();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);

        f.run();
        let state = f.state(partner).unwrap();
        assert_eq!(state.responsible_user_id, Some(user));
        assert_eq!(state.current_level, Some(f.l1.id));
    }

    #[test]
    fn exhausted_budget_times_out_without_advancing() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);

        let config = f.config().with_partner_budget(Some(Duration::ZERO));
        let summary = Scheduler::new(f.executor.clone(), FixedClock(today()), config).run_once();

        assert_eq!(outcome(&summary, f.company, partner), PartnerOutcome::TimedOut);
        assert!(f.mail.attempts().is_empty());
        assert!(f.state(partner).is_none());
    }

    #[test]
    fn budget_running_out_during_dispatch_still_records_reminder() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);
        f.mail.set_latency(Duration::from_millis(400));

        let config = f.config().with_partner_budget(Some(Duration::from_millis(200)));
        let scheduler = Scheduler::new(f.executor.clone(), FixedClock(today()), config);

        let first = scheduler.run_once();
        assert_eq!(outcome(&first, f.company, partner), PartnerOutcome::Sent);
        assert_eq!(f.state(partner).unwrap().current_level, Some(f.l1.id));

        let second = scheduler.run_once();
        assert_eq!(outcome(&second, f.company, partner), PartnerOutcome::NoAction);
        assert_eq!(f.mail.attempts().len(), 1);
    }

    #[test]
    fn ledger_outage_skips_company() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);
        f.ledger.set_unavailable(true);

        let summary = f.run();
        let run = summary.company(f.company).unwrap();
        assert!(run.skipped.as_deref().unwrap().contains("ledger unavailable"));
        assert!(f.mail.attempts().is_empty());
    }

    #[test]
    fn invalid_level_table_skips_only_that_company() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);

        let broken = CompanyId::new();
        f.levels
            .save_levels(
                broken,
                &[
                    FollowupLevel::new(broken, 1, 30, "a"),
                    FollowupLevel::new(broken, 2, 10, "b"),
                ],
            )
            .unwrap();

        let config = f
            .config()
            .with_company(CompanyProfile::new(broken, usd()));
        let summary = Scheduler::new(f.executor.clone(), FixedClock(today()), config).run_once();

        let skipped = summary.company(broken).unwrap();
        assert!(skipped.skipped.as_deref().unwrap().contains("configuration error"));
        assert_eq!(outcome(&summary, f.company, partner), PartnerOutcome::Sent);
    }

    #[test]
    fn state_store_outage_is_retryable() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);
        f.states.set_unavailable(true);

        let summary = f.run();
        let run = summary.company(f.company).unwrap();
        assert!(run.skipped.as_deref().unwrap().contains("storage unavailable"));
        assert!(f.mail.attempts().is_empty());

        let err = f.executor.evaluate(&f.ctx(), partner).unwrap_err();
        assert!(err.is_retryable());
        assert!(f.states.load(partner).is_err());
    }

    #[test]
    fn reminders_are_ordered_and_spaced_by_level_delay() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);

        let start = d(2016, 1, 1);
        for offset in 0..240 {
            f.run_on(start + chrono::Duration::days(offset));
        }

        let reminders: Vec<(NaiveDate, u64)> = f
            .mail
            .delivered()
            .iter()
            .map(|m| {
                let date: NaiveDate = serde_json::from_value(m.context["date"].clone()).unwrap();
                (date, m.context["level"]["sequence"].as_u64().unwrap())
            })
            .collect();

        assert!(reminders.len() >= 4);
        let delay_of = |sequence: u64| match sequence {
            1 => f.l1.delay_days,
            2 => f.l2.delay_days,
            _ => f.l3.delay_days,
        };
        for pair in reminders.windows(2) {
            let (first_date, first_seq) = pair[0];
            let (second_date, second_seq) = pair[1];
            assert!(second_seq >= first_seq);
            assert!(
                second_date >= first_date + chrono::Duration::days(i64::from(delay_of(first_seq)))
            );
        }
    }

    #[test]
    fn spawned_scheduler_runs_on_trigger_and_shuts_down() {
        let f = Fixture::new();
        let partner = f.partner();
        f.invoice(partner, d(2016, 1, 1), d(2016, 1, 1), 300);

        let scheduler = Scheduler::new(f.executor.clone(), FixedClock(today()), f.config());
        let (ticks, trigger) = ManualTicks::new();
        let handle = scheduler.spawn(ticks).unwrap();

        assert!(trigger.fire());
        for _ in 0..200 {
            if handle.stats().ticks >= 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let stats = handle.stats();
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.totals.sent, 1);
        handle.shutdown();
        assert_eq!(f.mail.delivered().len(), 1);
    }
}
