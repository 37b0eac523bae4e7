//! Customer follow-up (dunning) engine.
//!
//! Decides when and how to remind each customer about overdue receivables:
//!
//! - [`level`]: the ordered escalation table of a company
//! - [`state`]: per-partner follow-up state (aggregate, command/event driven)
//! - [`decider`]: pure decision from aging + state + levels + today
//! - [`statement`]: itemized statement with `Total Due` / `Total Overdue` rows
//! - [`executor`]: applies a decision (render, dispatch, advance, audit)
//!
//! External collaborators (partner directory, dispatchers, chatter, stores)
//! are reached only through the traits in [`ports`].

pub mod contacts;
pub mod context;
pub mod decider;
pub mod error;
pub mod executor;
pub mod level;
pub mod ports;
pub mod state;
pub mod statement;

pub use contacts::{Contact, ContactKind, PartnerContacts};
pub use context::EvaluationContext;
pub use decider::{decide, Decision, FollowupStatus};
pub use error::{FollowupError, FollowupResult};
pub use executor::{
    Channel, ChannelReport, ChannelStatus, Evaluation, ExecutionMode, ExecutionOptions,
    ExecutionOutcome, ExecutionResult, FollowupReport, RenderedReminder, ReminderExecutor,
    SkipReason,
};
pub use level::{FollowupLevel, LevelTable, TemplateRef};
pub use ports::{
    Attachment, Chatter, DispatchError, DocumentRenderer, FollowupPorts, FollowupStateStore,
    LevelStore, MailDispatcher, MailOutcome, PartnerDirectory, PrintDispatcher, PrintHandle,
    RenderError, RenderedDocument, StoreError,
};
pub use state::{
    FollowupCommand, FollowupEvent, PartnerFollowupState, RecordReminder,
};
pub use statement::{Statement, StatementLine, StatementRenderer, StatementRow, SummaryKind};
