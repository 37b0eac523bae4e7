//! Follow-up scheduler.
//!
//! ## Design
//!
//! - A [`TickSource`] decides when a run happens (interval in production,
//!   manual triggers in tests)
//! - Each run walks the configured companies; a company with a broken level
//!   table is skipped, the others still run
//! - Candidates are processed in stable order, in batches, by a pool of
//!   workers sharing one partner queue
//! - Every partner commits on its own; a crash mid-batch never re-sends what
//!   was already dispatched
//! - Outcomes are counted per company and accumulated in [`SchedulerStats`]

pub mod runner;
pub mod ticks;
pub mod types;

pub use runner::{Scheduler, SchedulerHandle};
pub use ticks::{IntervalTicks, ManualTicks, ManualTrigger, Tick, TickSource};
pub use types::{
    CompanyRun, OutcomeCounters, PartnerOutcome, PartnerReport, RunSummary, SchedulerStats,
};
